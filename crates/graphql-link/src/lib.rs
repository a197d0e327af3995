//! # GraphQL links
//!
//! A link is a unit of request-handling middleware for GraphQL operations.
//! Links are composed into a [`Chain`], and executing the chain against an
//! [`Operation`] yields a lazy [`ResultStream`] of responses.
//!
//! Each link receives the Operation and a [`Forward`] continuation which
//! invokes the remainder of the chain. A link may adjust the Operation's
//! [`Context`] before forwarding, transform the forwarded stream, fork it,
//! or not forward at all and produce results itself. Exactly one link of a
//! well-formed chain is "terminating": it ignores Forward and calls out to a
//! transport.
//!
//! ```ignore
//! let chain = graphql_link::compose([
//!     Arc::new(graphql_link::trace()) as graphql_link::BoxLink,
//!     Arc::new(graphql_link::retry(graphql_link::RetryConfig::default())),
//!     Arc::new(my_http_transport),
//! ]);
//! let responses = graphql_link::execute(&chain, Operation::new("{ viewer { id } }"))?;
//! ```
//!
//! Streams are cancelled by dropping them. Every combinator in this crate owns
//! its upstream stream, so dropping the outermost stream releases whatever the
//! terminating link holds open.
use itertools::Itertools;
use std::sync::Arc;

mod chain;
mod dedup;
mod link;
mod merge;
mod on_error;
mod operation;
mod response;
mod retry;
mod safe;
mod set_context;
mod split;
pub mod stream;
mod trace;

pub use chain::{compose, execute, execute_query, Chain};
pub use dedup::{dedup, Dedup, FORCE_FETCH};
pub use link::{
    empty, from_fn, terminating, BoxLink, Empty, Forward, FromFn, Link, Passthrough, Terminating,
};
pub use merge::{merge, Merge};
pub use on_error::{on_error, Failure, OnError, Recovery};
pub use operation::{Context, Operation, OperationKey, RequestBody};
pub use response::{GraphQLError, Location, Response};
pub use retry::{retry, Retry, RetryConfig, MAX_JITTER};
pub use safe::{safe, Safe};
pub use set_context::{set_context, SetContext};
pub use split::{split, split_or_forward, Split};
pub use stream::{subscribe, Event, ResultStream, Subscription};
pub use trace::{trace, Trace};

/// Map is the JSON object type used for variables, extensions, and contexts.
pub type Map = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("cannot execute an empty link chain")]
    EmptyChain,
    #[error("operation '{operation}' was forwarded past the final link of the chain (is the final link terminating?)")]
    Unterminated { operation: String },
    #[error("operation variables must serialize as a JSON object")]
    Variables(#[source] Arc<serde_json::Error>),
    #[error("{0:#}")]
    Transport(Arc<anyhow::Error>),
    #[error("graphql response has errors: [{}]", .0.iter().format(", "))]
    GraphQL(Vec<GraphQLError>),
    #[error("graphql response has no data (also no errors)")]
    NoData,
    #[error("link stream completed without a response")]
    NoResult,
    #[error("failed to decode graphql response data")]
    Decode(#[source] Arc<serde_json::Error>),
    #[error("link panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Wrap an arbitrary transport failure.
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        Self::Transport(Arc::new(err.into()))
    }

    /// Is this a configuration error of the chain itself, rather than a
    /// failure of one execution?
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::EmptyChain | Error::Unterminated { .. })
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
