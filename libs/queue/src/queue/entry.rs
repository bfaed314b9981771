//! Type-erased queue entries.
use super::AsyncQueue;
use crate::error::OperationError;
use std::{fmt, future::Future, pin::Pin};
use tokio::sync::oneshot;
use tracing::Instrument as _;

type BoxFuture<T> = Pin<Box<dyn Send + Future<Output = T>>>;

/// Receiver of an entry's result.
pub(crate) type ResultReceiver<T> = oneshot::Receiver<Result<T, OperationError>>;

/// How a dispatched entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Succeeded,
    Failed,
    Panicked,
}

/// Result of a dispatched entry which is ready to be delivered to the caller.
pub(crate) struct Outcome {
    status: Status,
    deliver: Box<dyn Send + FnOnce()>,
}

impl Outcome {
    pub(crate) fn status(&self) -> Status {
        self.status
    }

    /// Settles the entry's future.
    pub(crate) fn deliver(self) {
        (self.deliver)()
    }
}

/// Operation waiting in a queue, together with the sender of its result.
pub struct Entry {
    id: u64,
    run: Box<dyn Send + FnOnce(AsyncQueue) -> BoxFuture<Outcome>>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Entry {
    pub(crate) fn new<T, F, Fut>(id: u64, operation: F) -> (Self, ResultReceiver<T>)
    where
        T: 'static + Send,
        F: 'static + Send + FnOnce(AsyncQueue) -> Fut,
        Fut: 'static + Send + Future<Output = anyhow::Result<T>>,
    {
        let (send, recv) = oneshot::channel();
        let run = move |child: AsyncQueue| -> BoxFuture<Outcome> {
            Box::pin(async move {
                // The operation runs in a task of its own, so that a panic
                // (in either the call or the returned future) ends up in the JoinError.
                let op_child = child.clone();
                let task = tokio::spawn(async move { operation(op_child).await }.in_current_span());
                let result = match task.await {
                    Ok(res) => res.map_err(OperationError::Failed),
                    Err(err) => Err(OperationError::from_join(err)),
                };
                // Work enqueued into the child scope completes before the entry settles,
                // whether or not the operation awaited it.
                child.drained().await;
                let status = match &result {
                    Ok(_) => Status::Succeeded,
                    Err(OperationError::Failed(_)) => Status::Failed,
                    Err(OperationError::Panicked(msg)) => {
                        tracing::warn!("operation panicked: {msg}");
                        Status::Panicked
                    }
                };
                Outcome {
                    status,
                    deliver: Box::new(move || {
                        // The caller may have dropped its `Settled`.
                        let _ = send.send(result);
                    }),
                }
            })
        };
        (
            Self {
                id,
                run: Box::new(run),
            },
            recv,
        )
    }

    /// Sequence number of the entry within its queue.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Runs the operation with `child` as its scope and drains `child`.
    pub(crate) fn dispatch(self, child: AsyncQueue) -> BoxFuture<Outcome> {
        (self.run)(child)
    }
}
