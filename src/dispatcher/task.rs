use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineConnection;
use crate::error::DispatchError;
use crate::pool::SlotLease;

/// Lifecycle of one dispatched request.
///
/// `Created → Queued → Running → {Completed | Failed | Cancelled}`, plus
/// `Queued → Cancelled`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Queued = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Queued,
            3 => Self::Completed,
            4 => Self::Failed,
            5 => Self::Cancelled,
            _ => Self::Running,
        }
    }
}

/// Running with a cancel request that claimed the task before the worker finished.
/// Reported as `Running`; the worker's `finish` turns it into `Cancelled`.
const CANCEL_REQUESTED: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelOutcome {
    /// Never reached a worker; nothing touched the engine.
    Dequeued,
    /// Running on a worker; the call must be interrupted.
    Interrupt,
    /// Already terminal.
    Finished,
}

/// State shared between the caller's [`QueryTask`] and the worker running it.
///
/// The worker's `finish` and the caller's `request_cancel` both leave `Running` by
/// compare-and-swap, so exactly one of them decides how a running task ends.
#[derive(Debug)]
pub(crate) struct TaskCell {
    state: AtomicU8,
}

impl TaskCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Created as u8),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_queued(&self) -> bool {
        self.transition(TaskState::Created as u8, TaskState::Queued as u8)
    }

    /// Worker side: claim the task. False when it was cancelled while queued.
    pub(crate) fn start(&self) -> bool {
        self.transition(TaskState::Queued as u8, TaskState::Running as u8)
    }

    /// Worker side: record how the engine call ended.
    pub(crate) fn finish<T>(&self, result: &Result<T, DispatchError>) {
        let outcome = match result {
            Ok(_) => TaskState::Completed,
            Err(DispatchError::CancelledError) => TaskState::Cancelled,
            Err(_) => TaskState::Failed,
        };
        if !self.transition(TaskState::Running as u8, outcome as u8) {
            self.transition(CANCEL_REQUESTED, TaskState::Cancelled as u8);
        }
    }

    /// The worker pool refused the task.
    pub(crate) fn abandon(&self) {
        self.transition(TaskState::Queued as u8, TaskState::Failed as u8);
    }

    pub(crate) fn request_cancel(&self) -> CancelOutcome {
        loop {
            let raw = self.state.load(Ordering::Acquire);
            match TaskState::from_u8(raw) {
                TaskState::Created | TaskState::Queued => {
                    if self.transition(raw, TaskState::Cancelled as u8) {
                        return CancelOutcome::Dequeued;
                    }
                }
                TaskState::Running if raw != CANCEL_REQUESTED => {
                    if self.transition(raw, CANCEL_REQUESTED) {
                        return CancelOutcome::Interrupt;
                    }
                }
                // already requested, or terminal
                _ => return CancelOutcome::Finished,
            }
        }
    }
}

/// Handle to one dispatched request; resolves once the worker is done with it.
///
/// Dropping an unresolved task cancels it. A task cancelled while running resolves only
/// after the engine call returns, so its slot counter is already released by then.
pub struct QueryTask<T> {
    rx: oneshot::Receiver<Result<T, DispatchError>>,
    cell: Arc<TaskCell>,
    lease: Arc<SlotLease>,
    connection: Arc<dyn EngineConnection>,
    call: CancellationToken,
    cancel_called: AtomicBool,
    dequeued: AtomicBool,
    interrupted: AtomicBool,
    resolved: bool,
}

impl<T> QueryTask<T> {
    pub(crate) fn new(
        rx: oneshot::Receiver<Result<T, DispatchError>>,
        cell: Arc<TaskCell>,
        lease: Arc<SlotLease>,
        connection: Arc<dyn EngineConnection>,
        call: CancellationToken,
    ) -> Self {
        Self {
            rx,
            cell,
            lease,
            connection,
            call,
            cancel_called: AtomicBool::new(false),
            dequeued: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            resolved: false,
        }
    }

    /// Slot the task is counted against; fixed for the task's lifetime.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.lease.index()
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// Request cancellation. Only the first call has any effect.
    ///
    /// A queued task is cancelled on the spot without touching the engine. A running task
    /// has its own call interrupted once and resolves as cancelled when the engine call
    /// returns; other tasks sharing the connection are unaffected.
    pub fn cancel(&self) {
        if self.cancel_called.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.cell.request_cancel() {
            CancelOutcome::Dequeued => {
                tracing::debug!(slot = self.slot_index(), "cancelled queued task");
                self.dequeued.store(true, Ordering::Release);
                self.lease.release();
            }
            CancelOutcome::Interrupt => {
                tracing::debug!(slot = self.slot_index(), "interrupting running task");
                self.interrupted.store(true, Ordering::Release);
                self.connection.interrupt(&self.call);
            }
            CancelOutcome::Finished => {}
        }
    }
}

impl<T> Future for QueryTask<T> {
    type Output = Result<T, DispatchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.resolved {
            return Poll::Ready(Err(DispatchError::ResourceError(
                "query task polled after completion".into(),
            )));
        }
        if this.dequeued.load(Ordering::Acquire) {
            this.resolved = true;
            return Poll::Ready(Err(DispatchError::CancelledError));
        }
        let received = match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(received) => received,
        };
        this.resolved = true;
        if this.interrupted.load(Ordering::Acquire) {
            return Poll::Ready(Err(DispatchError::CancelledError));
        }
        Poll::Ready(received.unwrap_or_else(|_| {
            Err(DispatchError::ConnectionError(
                "worker dropped the task before replying".into(),
            ))
        }))
    }
}

impl<T> Drop for QueryTask<T> {
    fn drop(&mut self) {
        if !self.resolved {
            self.cancel();
        }
    }
}

impl<T> fmt::Debug for QueryTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryTask")
            .field("slot_index", &self.slot_index())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_task_cancels_without_running() {
        let cell = TaskCell::new();
        assert!(cell.mark_queued());
        assert_eq!(cell.request_cancel(), CancelOutcome::Dequeued);
        assert!(!cell.start());
        assert_eq!(cell.state(), TaskState::Cancelled);
    }

    #[test]
    fn running_task_cancel_ends_cancelled_even_on_success() {
        let cell = TaskCell::new();
        cell.mark_queued();
        assert!(cell.start());
        assert_eq!(cell.request_cancel(), CancelOutcome::Interrupt);
        cell.finish(&Ok::<(), DispatchError>(()));
        assert_eq!(cell.state(), TaskState::Cancelled);
        assert_eq!(cell.request_cancel(), CancelOutcome::Finished);
    }

    #[test]
    fn terminal_states_do_not_change() {
        let cell = TaskCell::new();
        cell.mark_queued();
        cell.start();
        cell.finish(&Err::<(), _>(DispatchError::QueryError("bad".into())));
        assert_eq!(cell.state(), TaskState::Failed);
        assert!(!cell.start());
        assert!(!cell.mark_queued());
        assert_eq!(cell.request_cancel(), CancelOutcome::Finished);
        assert_eq!(cell.state(), TaskState::Failed);
    }

    #[test]
    fn cancel_and_finish_agree_on_how_a_running_task_ends() {
        for _ in 0..2_000 {
            let cell = Arc::new(TaskCell::new());
            cell.mark_queued();
            assert!(cell.start());
            let worker = Arc::clone(&cell);
            let finisher = std::thread::spawn(move || worker.finish(&Ok::<(), DispatchError>(())));
            let outcome = cell.request_cancel();
            finisher.join().unwrap();
            match cell.state() {
                TaskState::Cancelled => assert_eq!(outcome, CancelOutcome::Interrupt),
                TaskState::Completed => assert_eq!(outcome, CancelOutcome::Finished),
                other => panic!("unexpected state {other:?}"),
            }
        }
    }
}
