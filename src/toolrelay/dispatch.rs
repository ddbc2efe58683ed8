//! Bridge between background network work and the single thread that owns conversation state.
//!
//! [`Dispatcher::spawn`] runs a future on a tokio runtime. When the future finishes (or is
//! cancelled, or panics) a completion action is pushed onto a FIFO queue instead of touching the
//! controller directly. The owning thread drains that queue whenever it likes (once per frame,
//! tick or event-loop turn) with [`Dispatcher::drain`], which runs at most `batch_size` actions
//! per call and catches panics so one bad action cannot take the controller down.
//!
//! ```rust
//! use toolrelay::dispatch::{Dispatcher, TaskOutcome};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut dispatcher: Dispatcher<Vec<u32>> =
//!         Dispatcher::new(tokio::runtime::Handle::current(), 10, 4);
//!     dispatcher.spawn(async { 21 * 2 }, None, |results, outcome| {
//!         if let TaskOutcome::Completed(value) = outcome {
//!             results.push(value);
//!         }
//!     });
//!
//!     let mut results = Vec::new();
//!     while results.is_empty() {
//!         dispatcher.drain(&mut results);
//!         tokio::task::yield_now().await;
//!     }
//!     assert_eq!(results, vec![42]);
//! }
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Work to run on the controlling thread with exclusive access to the controller.
pub type Completion<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// How a spawned task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The task's cancellation token fired before it finished.
    Cancelled,
    /// The task panicked; carries the panic message.
    Panicked(String),
}

/// Cloneable sender for completion actions, usable from any thread.
pub struct DispatchHandle<C> {
    sender: mpsc::UnboundedSender<Completion<C>>,
}

impl<C> Clone for DispatchHandle<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<C: 'static> DispatchHandle<C> {
    /// Queue `action`. Returns `false` when the dispatcher has been dropped.
    pub fn enqueue<F>(&self, action: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.sender.send(Box::new(action)).is_ok()
    }
}

/// Spawns background work and queues its completions for the controller of type `C`.
pub struct Dispatcher<C> {
    runtime: Handle,
    sender: mpsc::UnboundedSender<Completion<C>>,
    receiver: mpsc::UnboundedReceiver<Completion<C>>,
    batch_size: usize,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

impl<C: 'static> Dispatcher<C> {
    /// `batch_size` bounds actions run per [`drain`](Dispatcher::drain); `max_in_flight` bounds
    /// spawned futures running concurrently. Both are clamped to at least 1.
    pub fn new(runtime: Handle, batch_size: usize, max_in_flight: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            runtime,
            sender,
            receiver,
            batch_size: batch_size.max(1),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn handle(&self) -> DispatchHandle<C> {
        DispatchHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Spawned tasks that have not yet queued their completion.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run `work` in the background and queue `on_complete` with its outcome.
    ///
    /// The completion is queued exactly once whatever happens to the task: finished, cancelled
    /// through `cancel`, or panicked.
    pub fn spawn<Fut, T, F>(&self, work: Fut, cancel: Option<CancellationToken>, on_complete: F)
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        F: FnOnce(&mut C, TaskOutcome<T>) + Send + 'static,
    {
        let sender = self.sender.clone();
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let cancel = cancel.unwrap_or_else(CancellationToken::new);

        in_flight.fetch_add(1, Ordering::SeqCst);
        self.runtime.spawn(async move {
            let outcome = run_guarded(work, permits, cancel).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            let action: Completion<C> = Box::new(move |target: &mut C| on_complete(target, outcome));
            if sender.send(action).is_err() {
                log::debug!("Dispatcher dropped before a completion could be delivered");
            }
        });
    }

    /// Pop the next queued completion without running it.
    pub fn try_next(&mut self) -> Option<Completion<C>> {
        self.receiver.try_recv().ok()
    }

    /// Run up to `batch_size` queued completions against `target`, in FIFO order.
    ///
    /// Returns how many actions ran, panicking ones included.
    pub fn drain(&mut self, target: &mut C) -> usize {
        let mut executed = 0;
        while executed < self.batch_size {
            let Some(action) = self.try_next() else {
                break;
            };
            executed += 1;
            // Already logged; the controller keeps going.
            let _ = run_completion(action, target);
        }
        executed
    }
}

/// Run one completion, catching and logging a panic.
pub fn run_completion<C>(action: Completion<C>, target: &mut C) -> Result<(), String> {
    std::panic::catch_unwind(AssertUnwindSafe(|| action(target))).map_err(|panic| {
        let message = panic_message(panic.as_ref());
        log::error!("Dispatched completion panicked: {}", message);
        message
    })
}

async fn run_guarded<Fut, T>(
    work: Fut,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) -> TaskOutcome<T>
where
    Fut: Future<Output = T> + Send,
{
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return TaskOutcome::Cancelled,
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return TaskOutcome::Cancelled,
        },
    };

    tokio::select! {
        _ = cancel.cancelled() => TaskOutcome::Cancelled,
        result = AssertUnwindSafe(work).catch_unwind() => match result {
            Ok(value) => TaskOutcome::Completed(value),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("Background task panicked: {}", message);
                TaskOutcome::Panicked(message)
            }
        },
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
