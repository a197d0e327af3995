use crate::{stream, Error, Forward, Link, Operation, ResultStream};
use futures::StreamExt;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Wrap `link` so that it never fails synchronously.
///
/// An error returned by the wrapped link's `request`, or a panic raised
/// while it builds or polls its stream, becomes an error emission of the
/// returned stream, which then completes.
pub fn safe<L: Link>(link: L) -> Safe<L> {
    Safe(link)
}

pub struct Safe<L>(L);

impl<L: Link> Link for Safe<L> {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        let name = operation.display_name().to_string();

        match catch_unwind(AssertUnwindSafe(|| self.0.request(operation, forward))) {
            Ok(Ok(inner)) => Ok(AssertUnwindSafe(inner)
                .catch_unwind()
                .map(move |item| match item {
                    Ok(item) => item,
                    Err(panic) => {
                        let err = Error::Panicked(panic_message(panic));
                        tracing::error!(operation = %name, error = %err, "link stream panicked");
                        Err(err)
                    }
                })
                .boxed()),
            Ok(Err(err)) => {
                tracing::debug!(operation = %name, error = %err, "link failed to start operation");
                Ok(stream::fail(err))
            }
            Err(panic) => {
                let err = Error::Panicked(panic_message(panic));
                tracing::error!(operation = %name, error = %err, "link panicked");
                Ok(stream::fail(err))
            }
        }
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "<unknown panic payload>".to_string(),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{execute, from_fn, Passthrough, Response};
    use serde_json::json;

    async fn events(link: &dyn Link) -> Vec<String> {
        execute(link, Operation::new("{ a }"))
            .expect("safe links never fail synchronously")
            .map(|item| match item {
                Ok(response) => format!("next {}", response.data.unwrap_or_default()),
                Err(err) => format!("error {err}"),
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_safe_wrapping() {
        // Synchronous configuration error.
        insta::assert_debug_snapshot!(events(&safe(Passthrough)).await, @r###"
        [
            "error operation '<anonymous>' was forwarded past the final link of the chain (is the final link terminating?)",
        ]
        "###);

        // Panic while building the stream.
        let link = safe(from_fn(|_op, _forward| -> crate::Result<ResultStream> {
            panic!("boom")
        }));
        insta::assert_debug_snapshot!(events(&link).await, @r###"
        [
            "error link panicked: boom",
        ]
        "###);

        // Panic while polling the stream, after a first emission.
        let link = safe(from_fn(|_op, _forward| {
            let mut n = 0;
            Ok(futures::stream::repeat(())
                .map(move |()| {
                    n += 1;
                    if n == 2 {
                        panic!("polled {} times", n);
                    }
                    Ok(Response::data(json!(n)))
                })
                .boxed())
        }));
        insta::assert_debug_snapshot!(events(&link).await, @r###"
        [
            "next 1",
            "error link panicked: polled 2 times",
        ]
        "###);

        // Healthy links pass through untouched.
        insta::assert_debug_snapshot!(events(&safe(Response::data(json!("ok")))).await, @r###"
        [
            "next \"ok\"",
        ]
        "###);
    }
}
