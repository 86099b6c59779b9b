use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

pub(super) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(super) enum Command {
    Run(Job),
    Shutdown,
}

/// Work queue shared by every worker thread; each message is taken by exactly one worker.
#[derive(Clone)]
pub(super) struct JobQueue {
    receiver: Arc<Mutex<Receiver<Command>>>,
}

impl JobQueue {
    pub(super) fn new() -> (Sender<Command>, Self) {
        let (sender, receiver) = mpsc::channel::<Command>();
        (
            sender,
            Self {
                receiver: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    /// Block until the next command; `None` once every sender is gone and the queue is empty.
    pub(super) fn next(&self) -> Option<Command> {
        let guard = self.lock();
        guard.recv().ok()
    }

    fn lock(&self) -> MutexGuard<'_, Receiver<Command>> {
        match self.receiver.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
