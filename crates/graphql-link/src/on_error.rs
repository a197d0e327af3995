use crate::{Error, Forward, Link, Operation, Response, ResultStream};
use futures::StreamExt;
use std::sync::Arc;

/// Failure is an unsuccessful emission observed by an [`OnError`] handler.
#[derive(Debug, Clone, Copy)]
pub enum Failure<'a> {
    /// An error emission, such as a transport failure.
    Transport(&'a Error),
    /// A payload emission which carries GraphQL errors.
    GraphQL(&'a Response),
}

/// Recovery is the action an [`OnError`] handler takes for a Failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Deliver the emission unchanged.
    Propagate,
    /// Drop the emission.
    Suppress,
    /// Cancel the current forwarded request and forward the Operation again.
    /// Further emissions are taken from the new request.
    Retry,
}

/// Build a Link which calls `handler` for each failed emission of the
/// forwarded request, and applies the Recovery it returns.
pub fn on_error<H>(handler: H) -> OnError<H>
where
    H: Fn(&Operation, Failure<'_>) -> Recovery + Send + Sync + 'static,
{
    OnError {
        handler: Arc::new(handler),
    }
}

pub struct OnError<H> {
    handler: Arc<H>,
}

impl<H> Link for OnError<H>
where
    H: Fn(&Operation, Failure<'_>) -> Recovery + Send + Sync + 'static,
{
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        let inner = forward.call(operation.clone())?;
        let handler = self.handler.clone();

        let stream = futures::stream::unfold(
            Some((inner, operation, forward, handler)),
            |state| async move {
                let (mut inner, operation, forward, handler) = state?;

                loop {
                    let item = inner.next().await?;

                    let recovery = match &item {
                        Err(err) => (*handler)(&operation, Failure::Transport(err)),
                        Ok(response) if response.has_errors() => {
                            (*handler)(&operation, Failure::GraphQL(response))
                        }
                        Ok(_) => Recovery::Propagate,
                    };

                    match recovery {
                        Recovery::Propagate => {
                            return Some((item, Some((inner, operation, forward, handler))))
                        }
                        // Yield so that a request which is always ready with
                        // failures can't starve its consumer, which may cancel.
                        Recovery::Suppress => tokio::task::yield_now().await,
                        Recovery::Retry => {
                            tracing::debug!(
                                operation = operation.display_name(),
                                "on_error handler is retrying operation"
                            );
                            // Drop (and cancel) the current request before starting another.
                            std::mem::drop(inner);
                            tokio::task::yield_now().await;

                            inner = match forward.call(operation.clone()) {
                                Ok(inner) => inner,
                                // Emit a failure to restart, and then complete.
                                Err(err) => return Some((Err(err), None)),
                            };
                        }
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}
