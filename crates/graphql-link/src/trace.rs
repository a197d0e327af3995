use crate::{Forward, Link, Operation, ResultStream};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

/// Build a Link which logs the lifecycle of each forwarded Operation:
/// its start, each emission, and its completion or cancellation.
pub fn trace() -> Trace {
    Trace
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Trace;

impl Link for Trace {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        let span = tracing::debug_span!(
            "operation",
            name = operation.display_name(),
            key = %operation.key(),
        );
        let inner = span.in_scope(|| {
            tracing::debug!(variables = ?operation.variables, "starting operation");
            forward.call(operation)
        })?;

        Ok(Traced {
            inner,
            span,
            started: Instant::now(),
            emitted: 0,
            done: false,
        }
        .boxed())
    }
}

struct Traced {
    inner: ResultStream,
    span: tracing::Span,
    started: Instant,
    emitted: usize,
    done: bool,
}

impl Stream for Traced {
    type Item = crate::Result<crate::Response>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();
        let _guard = me.span.enter();

        let poll = me.inner.poll_next_unpin(cx);

        match &poll {
            Poll::Ready(Some(Ok(response))) => {
                me.emitted += 1;
                tracing::debug!(
                    errors = response.errors.len(),
                    has_data = response.data.is_some(),
                    "operation emitted response"
                );
            }
            Poll::Ready(Some(Err(err))) => {
                me.emitted += 1;
                tracing::warn!(error = %err, "operation emitted error");
            }
            Poll::Ready(None) => {
                me.done = true;
                tracing::debug!(
                    emitted = me.emitted,
                    elapsed = ?me.started.elapsed(),
                    "operation completed"
                );
            }
            Poll::Pending => (),
        }
        poll
    }
}

impl Drop for Traced {
    fn drop(&mut self) {
        if !self.done {
            let _guard = self.span.enter();
            tracing::debug!(
                emitted = self.emitted,
                elapsed = ?self.started.elapsed(),
                "operation cancelled"
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{compose, execute, BoxLink, Error, Response};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_trace_logs_lifecycle() {
        let terminal = crate::from_fn(|_op, _forward| {
            Ok(futures::stream::iter(vec![
                Ok(Response::data(json!(1))),
                Err(Error::NoData),
            ])
            .boxed())
        });
        let chain = compose([Arc::new(trace()) as BoxLink, Arc::new(terminal)]);

        let op = Operation::new("query Traced { a }").with_operation_name("Traced");
        let out: Vec<_> = execute(&chain, op).unwrap().collect().await;
        assert_eq!(out.len(), 2);

        assert!(logs_contain("starting operation"));
        assert!(logs_contain("Traced"));
        assert!(logs_contain("operation emitted response"));
        assert!(logs_contain("operation emitted error"));
        assert!(logs_contain("operation completed"));
        assert!(!logs_contain("operation cancelled"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_trace_logs_cancellation() {
        let chain = compose([
            Arc::new(trace()) as BoxLink,
            Arc::new(crate::from_fn(|_op, _forward| {
                Ok(futures::stream::pending().boxed())
            })),
        ]);

        let mut responses = execute(&chain, Operation::new("{ a }")).unwrap();
        assert!(futures::poll!(responses.next()).is_pending());
        std::mem::drop(responses);

        assert!(logs_contain("operation cancelled"));

        // Failing to start is not traced as a cancellation.
        let unterminated = compose([Arc::new(trace()) as BoxLink]);
        assert!(execute(&unterminated, Operation::new("{ b }")).is_err());
    }
}
