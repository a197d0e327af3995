use crate::{Forward, Link, Operation, Passthrough, ResultStream};

/// Build a Link which routes each Operation to `left` if `predicate`
/// holds for it, or to `right` otherwise. The chosen branch receives the
/// split's own Forward, so a non-terminating branch continues with the
/// links which follow the split.
pub fn split<P, L, R>(predicate: P, left: L, right: R) -> Split<P, L, R>
where
    P: Fn(&Operation) -> bool + Send + Sync,
    L: Link,
    R: Link,
{
    Split {
        predicate,
        left,
        right,
    }
}

/// Like [`split`], but Operations which don't match `predicate` are
/// forwarded unchanged.
pub fn split_or_forward<P, L>(predicate: P, left: L) -> Split<P, L, Passthrough>
where
    P: Fn(&Operation) -> bool + Send + Sync,
    L: Link,
{
    split(predicate, left, Passthrough)
}

pub struct Split<P, L, R> {
    predicate: P,
    left: L,
    right: R,
}

impl<P, L, R> Link for Split<P, L, R>
where
    P: Fn(&Operation) -> bool + Send + Sync,
    L: Link,
    R: Link,
{
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        if (self.predicate)(&operation) {
            tracing::trace!(branch = self.left.name(), "split chose left");
            self.left.request(operation, forward)
        } else {
            tracing::trace!(branch = self.right.name(), "split chose right");
            self.right.request(operation, forward)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{compose, execute, BoxLink, Response};
    use futures::TryStreamExt;
    use serde_json::json;
    use std::sync::Arc;

    fn is_subscription(op: &Operation) -> bool {
        op.query.trim_start().starts_with("subscription")
    }

    async fn run(link: &dyn Link, query: &str) -> Vec<Response> {
        execute(link, Operation::new(query))
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_split_routes_to_one_branch() {
        let link = split(
            is_subscription,
            Response::data(json!("socket")),
            Response::data(json!("http")),
        );

        assert_eq!(
            run(&link, "subscription { ticks }").await,
            vec![Response::data(json!("socket"))]
        );
        assert_eq!(
            run(&link, "query { ticks }").await,
            vec![Response::data(json!("http"))]
        );
    }

    #[tokio::test]
    async fn test_split_or_forward_continues_the_chain() {
        let chain = compose([
            Arc::new(split_or_forward(is_subscription, Response::data(json!("socket"))))
                as BoxLink,
            Arc::new(Response::data(json!("http"))),
        ]);

        assert_eq!(
            run(&chain, "subscription { ticks }").await,
            vec![Response::data(json!("socket"))]
        );
        assert_eq!(
            run(&chain, "{ ticks }").await,
            vec![Response::data(json!("http"))]
        );
    }
}
