use crate::{BoxLink, Error, Forward, Link, Operation, ResultStream};
use futures::StreamExt;

/// Build a Link which forks each Operation into every one of `branches`,
/// and merges their results into one stream.
///
/// Every branch receives a clone of the Operation (sharing its Context) and
/// of the merge's Forward. Emissions of a single branch keep their order, but
/// branches interleave in whatever order their emissions become ready. An
/// error emission of one branch is delivered without cancelling the others,
/// and the merged stream completes once all branches have completed.
///
/// If any branch fails synchronously, the whole request fails and streams
/// already started by earlier branches are dropped.
pub fn merge<I>(branches: I) -> Merge
where
    I: IntoIterator<Item = BoxLink>,
{
    Merge {
        branches: branches.into_iter().collect(),
    }
}

pub struct Merge {
    branches: Vec<BoxLink>,
}

impl Link for Merge {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        if self.branches.is_empty() {
            return Err(Error::EmptyChain);
        }

        let streams = self
            .branches
            .iter()
            .map(|branch| branch.request(operation.clone(), forward.clone()))
            .collect::<crate::Result<Vec<_>>>()?;

        tracing::trace!(
            operation = operation.display_name(),
            branches = streams.len(),
            "merging forked streams"
        );
        Ok(futures::stream::select_all(streams).boxed())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{compose, execute, from_fn, stream, Passthrough, Response};
    use futures::channel::mpsc;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_merge_forwards_each_branch_and_keeps_branch_order() {
        let calls = Arc::new(Mutex::new(0));
        let counted = calls.clone();

        // Terminating link which emits two responses tagged by a context value.
        let terminal = from_fn(move |op: Operation, _forward| {
            *counted.lock().unwrap() += 1;
            let tag = op.context().value("tag").unwrap_or(json!(null));
            Ok(futures::stream::iter(vec![
                Ok(Response::data(json!([tag.clone(), 1]))),
                Ok(Response::data(json!([tag, 2]))),
            ])
            .boxed())
        });

        let tagging = |tag: &'static str| -> BoxLink {
            Arc::new(from_fn(move |op: Operation, forward: Forward| {
                let op =
                    op.with_context(crate::Map::from_iter([("tag".to_string(), json!(tag))]));
                forward.call(op)
            }))
        };

        let chain = compose([
            Arc::new(merge([tagging("x"), tagging("y")])) as BoxLink,
            Arc::new(terminal),
        ]);

        let mut out: Vec<_> = execute(&chain, Operation::new("{ a }"))
            .unwrap()
            .map(|item| item.unwrap().data.unwrap())
            .collect()
            .await;

        assert_eq!(*calls.lock().unwrap(), 2);

        // Within a branch, order is kept.
        let x: Vec<_> = out.iter().filter(|v| v[0] == "x").cloned().collect();
        assert_eq!(x, vec![json!(["x", 1]), json!(["x", 2])]);

        out.sort_by_key(|v| v.to_string());
        assert_eq!(
            out,
            vec![json!(["x", 1]), json!(["x", 2]), json!(["y", 1]), json!(["y", 2])]
        );
    }

    #[tokio::test]
    async fn test_merge_error_does_not_cancel_other_branches() {
        let (tx, rx) = mpsc::unbounded();

        let rx = Arc::new(Mutex::new(Some(rx.boxed())));

        let failing: BoxLink = Arc::new(from_fn(|_op, _forward| Ok(stream::fail(Error::NoData))));
        let slow: BoxLink = Arc::new(from_fn(move |_op, _forward| {
            Ok(rx.lock().unwrap().take().expect("requested once"))
        }));

        let mut merged = execute(&merge([failing, slow]), Operation::new("{ a }")).unwrap();

        // The failing branch's error arrives while the slow branch is pending.
        assert!(matches!(merged.next().await, Some(Err(Error::NoData))));

        tx.unbounded_send(Ok(Response::data(json!("late")))).unwrap();
        assert_eq!(
            merged.next().await.unwrap().unwrap(),
            Response::data(json!("late"))
        );

        drop(tx);
        assert!(merged.next().await.is_none());
    }

    #[test]
    fn test_merge_sync_failure_fails_request() {
        let branches: Vec<BoxLink> =
            vec![Arc::new(Response::data(json!(1))), Arc::new(Passthrough)];

        // Passthrough forwards past the end of the chain.
        let Err(err) = execute(&merge(branches), Operation::new("{ a }")) else {
            panic!("expected an error")
        };
        assert!(err.is_configuration(), "{err:?}");

        let Err(err) = execute(&merge([]), Operation::new("{ a }")) else {
            panic!("expected an error")
        };
        assert!(matches!(err, Error::EmptyChain));
    }
}
