use crate::{Error, Forward, Link, Operation, OperationKey, Response, ResultStream};
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use std::collections::{hash_map, HashMap};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

/// Context key which, when `true`, causes an Operation to bypass [`Dedup`].
pub const FORCE_FETCH: &str = "forceFetch";

/// Build a Link which shares a single forwarded request among concurrent
/// executions of identical Operations.
///
/// Operations are identical if they have the same [`OperationKey`]. The first
/// execution forwards the Operation, and later executions which arrive while
/// it's in flight subscribe to its remaining emissions rather than forwarding
/// again. The shared request is cancelled only once every subscriber has
/// dropped its stream.
pub fn dedup() -> Dedup {
    Dedup {
        inflight: Default::default(),
        next_id: AtomicU64::new(1),
    }
}

pub struct Dedup {
    inflight: Arc<Mutex<HashMap<OperationKey, Inflight>>>,
    next_id: AtomicU64,
}

type Item = crate::Result<Response>;
type InflightMap = Mutex<HashMap<OperationKey, Inflight>>;

struct Inflight {
    // Distinguishes this request from later ones having the same key.
    generation: u64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<Item>)>,
    // Forwarded stream which is awaiting its first poll.
    pending: Option<ResultStream>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Link for Dedup {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        if operation.context().value(FORCE_FETCH) == Some(serde_json::Value::Bool(true)) {
            return forward.call(operation);
        }

        let key = operation.key();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded();

        let joined = lock(&self.inflight)
            .get_mut(&key)
            .map(|entry| {
                entry.subscribers.push((id, tx.clone()));
                entry.generation
            });

        let generation = match joined {
            Some(generation) => {
                tracing::debug!(%key, operation = operation.display_name(), "joined in-flight operation");
                generation
            }
            None => {
                let inner = forward.call(operation)?;

                let mut inflight = lock(&self.inflight);
                let (generation, raced) = match inflight.entry(key) {
                    // Another execution started the same operation while we
                    // were forwarding. Join it and discard our own request.
                    hash_map::Entry::Occupied(mut entry) => {
                        entry.get_mut().subscribers.push((id, tx));
                        (entry.get().generation, Some(inner))
                    }
                    hash_map::Entry::Vacant(entry) => {
                        entry.insert(Inflight {
                            generation: id,
                            subscribers: vec![(id, tx)],
                            pending: Some(inner),
                            task: None,
                        });
                        (id, None)
                    }
                };
                std::mem::drop(inflight);
                std::mem::drop(raced);

                generation
            }
        };

        Ok(Subscriber {
            inflight: self.inflight.clone(),
            key,
            generation,
            id,
            rx,
            started: false,
        }
        .boxed())
    }
}

struct Subscriber {
    inflight: Arc<InflightMap>,
    key: OperationKey,
    generation: u64,
    id: u64,
    rx: mpsc::UnboundedReceiver<Item>,
    started: bool,
}

impl Stream for Subscriber {
    type Item = Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        let me = self.get_mut();

        if !me.started {
            me.started = true;

            let mut inflight = lock(&me.inflight);
            let entry = inflight
                .get_mut(&me.key)
                .filter(|entry| entry.generation == me.generation);

            if let Some(entry) = entry {
                if let Some(inner) = entry.pending.take() {
                    entry.task = Some(tokio::spawn(drive(
                        me.inflight.clone(),
                        me.key,
                        me.generation,
                        inner,
                    )));
                }
            }
        }
        me.rx.poll_next_unpin(cx)
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let removed = {
            let mut inflight = lock(&self.inflight);

            match inflight.get_mut(&self.key) {
                Some(entry) if entry.generation == self.generation => {
                    entry.subscribers.retain(|(id, _)| *id != self.id);

                    if entry.subscribers.is_empty() {
                        inflight.remove(&self.key)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(Inflight {
            task: Some(task), ..
        }) = &removed
        {
            tracing::debug!(key = %self.key, "cancelling in-flight operation without subscribers");
            task.abort();
        }
    }
}

// Drive the shared request, fanning out each of its items to current subscribers.
async fn drive(
    inflight: Arc<InflightMap>,
    key: OperationKey,
    generation: u64,
    inner: ResultStream,
) {
    // Removes the entry however the driver exits, which closes the channels
    // of its subscribers.
    let _release = Release {
        inflight: inflight.clone(),
        key,
        generation,
    };

    // A panic of the shared request is delivered to subscribers as an error.
    let mut inner = AssertUnwindSafe(inner).catch_unwind().map(|item| match item {
        Ok(item) => item,
        Err(panic) => {
            let err = Error::Panicked(crate::safe::panic_message(panic));
            tracing::error!(%key, error = %err, "shared operation panicked");
            Err(err)
        }
    });

    while let Some(item) = inner.next().await {
        let senders: Vec<_> = match lock(&inflight).get(&key) {
            Some(entry) if entry.generation == generation => entry
                .subscribers
                .iter()
                .map(|(_, tx)| tx.clone())
                .collect(),
            _ => return,
        };

        for tx in senders {
            let _ = tx.unbounded_send(item.clone());
        }
    }
}

struct Release {
    inflight: Arc<InflightMap>,
    key: OperationKey,
    generation: u64,
}

impl Drop for Release {
    fn drop(&mut self) {
        let removed = {
            let mut inflight = lock(&self.inflight);
            match inflight.get(&self.key) {
                Some(entry) if entry.generation == self.generation => inflight.remove(&self.key),
                _ => None,
            }
        };
        std::mem::drop(removed);
    }
}

fn lock(inflight: &InflightMap) -> MutexGuard<'_, HashMap<OperationKey, Inflight>> {
    inflight.lock().unwrap_or_else(PoisonError::into_inner)
}
