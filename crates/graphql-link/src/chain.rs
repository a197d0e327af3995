use crate::{BoxLink, Error, Forward, Link, Operation, ResultStream};
use futures::StreamExt;
use std::sync::Arc;

/// Chain is an ordered, immutable composition of links which behaves as a
/// single Link.
///
/// Executing a Chain invokes its first link with a Forward to the second,
/// and so on. A Chain may itself be a member of another Chain: forwarding
/// past its final link continues with the enclosing chain.
#[derive(Clone)]
pub struct Chain {
    links: Arc<[BoxLink]>,
}

/// Compose `links` into a Chain, in order.
pub fn compose<I>(links: I) -> Chain
where
    I: IntoIterator<Item = BoxLink>,
{
    Chain {
        links: links.into_iter().collect(),
    }
}

impl Chain {
    /// Append `link` to the end of this Chain.
    pub fn concat(self, link: impl Link + 'static) -> Chain {
        let links = self.links.iter().cloned();
        let link: BoxLink = Arc::new(link);
        compose(links.chain(std::iter::once(link)))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Link for Chain {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        if self.links.is_empty() && forward.is_end() {
            return Err(Error::EmptyChain);
        }
        Forward::nested(self.links.clone(), forward).call(operation)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.links.iter().map(|link| link.name()))
            .finish()
    }
}

/// Execute `operation` against `link`, returning its ResultStream.
///
/// Configuration errors of the chain, and any other failure to start the
/// request, are returned immediately. Failures of the in-flight request are
/// `Err` items of the returned stream.
pub fn execute(link: &dyn Link, operation: Operation) -> crate::Result<ResultStream> {
    let name = operation.display_name().to_string();
    let key = operation.key();

    tracing::debug!(operation = %name, %key, link = link.name(), "executing operation");

    match link.request(operation, Forward::end()) {
        Ok(stream) => Ok(stream),
        Err(err) => {
            tracing::warn!(operation = %name, %key, error = %err, "failed to start operation");
            Err(err)
        }
    }
}

/// Execute the typed `graphql_client` query `Q` against `link`, returning
/// the data of its first response. The stream is cancelled after its
/// first response is read.
#[tracing::instrument(level = tracing::Level::DEBUG, err, skip_all)]
pub async fn execute_query<Q>(
    link: &dyn Link,
    variables: Q::Variables,
) -> crate::Result<Q::ResponseData>
where
    Q: graphql_client::GraphQLQuery,
{
    let operation = Operation::from_query_body(Q::build_query(variables))?;
    let mut responses = execute(link, operation)?;

    let response = responses.next().await.ok_or(Error::NoResult)??;
    response.into_data()
}
