use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

/// Single-slot run queue: tasks run one at a time, in the order they were enqueued.
///
/// Each task waits for the completion signal of the task enqueued before it. The signal is
/// "sender dropped", so a task that finishes, fails or is cancelled mid-run releases its
/// successor. A task cancelled while still waiting hands its place to a small forwarding
/// task, so the order holds across cancellation too.
#[derive(Default)]
pub struct RunQueue {
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

struct Slot {
    previous: Option<oneshot::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let (Some(previous), Some(done)) = (self.previous.take(), self.done.take()) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = previous.await;
                    drop(done);
                });
            }
        }
    }
}

impl RunQueue {
    pub async fn run<F: Future>(&self, task: F) -> F::Output {
        let (done, signal) = oneshot::channel::<()>();
        let previous = self
            .tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(signal);
        let mut slot = Slot {
            previous,
            done: Some(done),
        };

        if let Some(previous) = slot.previous.as_mut() {
            let _ = previous.await;
        }
        slot.previous = None;

        task.await
    }
}
