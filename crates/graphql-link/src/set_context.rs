use crate::{stream, Forward, Link, Map, Operation, ResultStream};
use futures::{Future, StreamExt};

/// Build a Link which asynchronously computes additions to an Operation's
/// Context before forwarding it.
///
/// `setter` is given the Operation and a copy of its current Context.
/// The map it resolves to is shallow-merged into the Context, and then the
/// Operation is forwarded. If `setter` fails, its error is emitted and the
/// Operation is not forwarded.
pub fn set_context<F, Fut>(setter: F) -> SetContext<F>
where
    F: Fn(&Operation, Map) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<Map>> + Send + 'static,
{
    SetContext { setter }
}

pub struct SetContext<F> {
    setter: F,
}

impl<F, Fut> Link for SetContext<F>
where
    F: Fn(&Operation, Map) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<Map>> + Send + 'static,
{
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        let next = (self.setter)(&operation, operation.context().get());

        let forwarded = async move {
            let result = match next.await {
                Ok(next) => {
                    operation.context().merge(next);
                    forward.call(operation)
                }
                Err(err) => Err(err),
            };
            result.unwrap_or_else(stream::fail)
        };

        Ok(futures::stream::once(forwarded).flatten().boxed())
    }
}
