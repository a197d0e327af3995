//! Result streams of link executions, and explicit subscriptions to them.
use crate::{Error, Response};
use futures::{stream::BoxStream, StreamExt};

/// ResultStream is the lazy sequence of results produced by a link.
/// `Ok` items are payloads, `Err` items are error emissions, and the end of
/// the stream is its completion. Dropping a ResultStream cancels it.
pub type ResultStream = BoxStream<'static, crate::Result<Response>>;

/// A ResultStream which emits `response` and then completes.
pub fn once(response: Response) -> ResultStream {
    futures::stream::once(async move { Ok(response) }).boxed()
}

/// A ResultStream which emits `error` and then completes.
pub fn fail(error: Error) -> ResultStream {
    futures::stream::once(async move { Err(error) }).boxed()
}

/// Event is a notification delivered to the observer of a [`Subscription`].
#[derive(Debug, Clone)]
pub enum Event {
    Next(Response),
    Error(Error),
    Complete,
}

/// Subscribe `observer` to `stream`, driving it on the current tokio runtime.
///
/// The observer receives an [`Event::Next`] or [`Event::Error`] for each item
/// of the stream, and then [`Event::Complete`] once it ends. Cancelling the
/// returned Subscription drops the stream, and no further events are delivered.
pub fn subscribe<O>(mut stream: ResultStream, mut observer: O) -> Subscription
where
    O: FnMut(Event) + Send + 'static,
{
    let handle = tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            observer(match item {
                Ok(response) => Event::Next(response),
                Err(err) => Event::Error(err),
            });
        }
        observer(Event::Complete);
    });

    Subscription {
        handle: Some(handle),
    }
}

/// Subscription is a handle to a subscribed [`ResultStream`].
/// Dropping a Subscription cancels it.
pub struct Subscription {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    /// Cancel the subscription, dropping its stream and every link stream
    /// it was built from.
    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    /// Has the subscription completed or been cancelled?
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the subscription to complete or be cancelled.
    pub async fn wait(mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match handle.await {
            Ok(()) => (),
            Err(err) if err.is_cancelled() => (),
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::channel::mpsc;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_end_with_complete() {
        let stream = futures::stream::iter(vec![
            Ok(Response::data(json!({"n": 1}))),
            Err(Error::NoData),
            Ok(Response::data(json!({"n": 2}))),
        ])
        .boxed();

        let (tx, rx) = mpsc::unbounded();
        let sub = subscribe(stream, move |event| tx.unbounded_send(event).unwrap());
        sub.wait().await;

        let events: Vec<String> = rx
            .map(|event| match event {
                Event::Next(response) => format!("next {}", response.data.unwrap()),
                Event::Error(err) => format!("error {err}"),
                Event::Complete => "complete".to_string(),
            })
            .collect()
            .await;

        insta::assert_debug_snapshot!(events, @r###"
        [
            "next {\"n\":1}",
            "error graphql response has no data (also no errors)",
            "next {\"n\":2}",
            "complete",
        ]
        "###);
    }

    #[tokio::test]
    async fn test_cancel_drops_stream_without_completing() {
        struct Guard(Option<futures::channel::oneshot::Sender<()>>);
        impl Drop for Guard {
            fn drop(&mut self) {
                let _ = self.0.take().unwrap().send(());
            }
        }
        let (dropped_tx, dropped_rx) = futures::channel::oneshot::channel();
        let guard = Guard(Some(dropped_tx));

        // A stream which never completes, and holds `guard` until dropped.
        let stream = futures::stream::pending::<crate::Result<Response>>()
            .map(move |item| {
                let _hold = &guard;
                item
            })
            .boxed();

        let (tx, mut rx) = mpsc::unbounded();
        let sub = subscribe(stream, move |event| tx.unbounded_send(event).unwrap());
        tokio::task::yield_now().await;

        assert!(!sub.is_finished());
        sub.cancel();
        dropped_rx.await.unwrap();
        sub.wait().await;

        // The observer was dropped without ever receiving Complete.
        assert!(rx.next().await.is_none());
    }
}
