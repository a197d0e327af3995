use crate::{stream, Error, Operation, Response, ResultStream};
use futures::{Future, StreamExt};
use std::sync::Arc;

/// Link is a unit of request-handling behavior within a chain.
///
/// `request` receives the Operation to execute and a [`Forward`] which
/// invokes the remainder of the chain. Terminating links ignore `forward`
/// and produce results themselves, usually by calling out to a transport.
/// Other links must eventually call `forward`, and may transform the stream
/// it returns.
///
/// An `Err` returned from `request` is a synchronous failure to start the
/// request and propagates immediately to the caller. Failures which happen
/// while the request is in flight are `Err` items of the returned stream.
pub trait Link: Send + Sync {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream>;

    /// Name of the link, used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// BoxLink is a shared, type-erased Link.
pub type BoxLink = Arc<dyn Link>;

impl<L: Link + ?Sized> Link for Arc<L> {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        (**self).request(operation, forward)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        (**self).request(operation, forward)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Forward is the continuation handed to a link, which invokes the
/// remainder of its chain.
///
/// Forward captures a position within a frozen sequence of links, built once
/// when the chain was composed. It's cheap to clone and may be called any
/// number of times: each call starts an independent request of the
/// remaining links.
#[derive(Clone)]
pub struct Forward {
    links: Arc<[BoxLink]>,
    index: usize,
    // Continuation of an enclosing chain, taken once `links` are exhausted.
    outer: Option<Arc<Forward>>,
}

impl Forward {
    /// Forward which is the end of every chain: calling it is an error.
    pub fn end() -> Self {
        Self {
            links: Vec::new().into(),
            index: 0,
            outer: None,
        }
    }

    pub(crate) fn nested(links: Arc<[BoxLink]>, outer: Forward) -> Self {
        Self {
            links,
            index: 0,
            outer: Some(Arc::new(outer)),
        }
    }

    /// Is this the end of the chain, with no further link to forward to?
    pub fn is_end(&self) -> bool {
        self.index >= self.links.len() && self.outer.as_ref().map_or(true, |o| o.is_end())
    }

    /// Forward `operation` to the next link of the chain.
    pub fn call(&self, operation: Operation) -> crate::Result<ResultStream> {
        let Some(link) = self.links.get(self.index) else {
            return match &self.outer {
                Some(outer) => outer.call(operation),
                None => Err(Error::Unterminated {
                    operation: operation.display_name().to_string(),
                }),
            };
        };

        let next = Forward {
            links: self.links.clone(),
            index: self.index + 1,
            outer: self.outer.clone(),
        };
        tracing::trace!(link = link.name(), operation = operation.display_name(), "forward");

        link.request(operation, next)
    }
}

impl std::fmt::Debug for Forward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forward")
            .field("remaining", &self.links.len().saturating_sub(self.index))
            .field("outer", &self.outer)
            .finish()
    }
}

/// Build a Link from a closure of the same signature as [`Link::request`].
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: Fn(Operation, Forward) -> crate::Result<ResultStream> + Send + Sync,
{
    FromFn(f)
}

pub struct FromFn<F>(F);

impl<F> Link for FromFn<F>
where
    F: Fn(Operation, Forward) -> crate::Result<ResultStream> + Send + Sync,
{
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        (self.0)(operation, forward)
    }
}

/// Build a terminating Link from a closure which resolves an Operation into
/// a single Response. A failed Response future becomes an error emission.
pub fn terminating<F, Fut>(f: F) -> Terminating<F>
where
    F: Fn(Operation) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<Response>> + Send + 'static,
{
    Terminating(f)
}

pub struct Terminating<F>(F);

impl<F, Fut> Link for Terminating<F>
where
    F: Fn(Operation) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<Response>> + Send + 'static,
{
    fn request(&self, operation: Operation, _forward: Forward) -> crate::Result<ResultStream> {
        Ok(futures::stream::once((self.0)(operation)).boxed())
    }
}

/// Passthrough forwards every Operation unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Link for Passthrough {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        forward.call(operation)
    }
}

/// Build a terminating link which completes without emitting anything.
pub fn empty() -> Empty {
    Empty
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Empty;

impl Link for Empty {
    fn request(&self, _operation: Operation, _forward: Forward) -> crate::Result<ResultStream> {
        Ok(futures::stream::empty().boxed())
    }
}

/// A Response is a terminating link which always emits itself.
impl Link for Response {
    fn request(&self, _operation: Operation, _forward: Forward) -> crate::Result<ResultStream> {
        Ok(stream::once(self.clone()))
    }
}
