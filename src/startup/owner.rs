//! Owner thread identity and dispatch.
//!
//! Exactly one thread (the owner) may run engine initialization. Other
//! threads reach it through a [`Dispatcher`], which queues work for the
//! owner to run at some later point. Two dispatchers are provided:
//!
//! - [`OwnerLoop`]: spawns a dedicated owner thread that drains its queue
//!   until shut down.
//! - [`QueueDispatcher`]: makes the creating thread the owner; queued work
//!   only runs when that thread calls [`QueueDispatcher::run_pending`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, Thread, ThreadId};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::error::{StartupError, StartupResult};

/// Work item executed on the owner thread
pub type OwnerTask = Box<dyn FnOnce() + Send + 'static>;

/// Identity of the thread allowed to run engine initialization.
#[derive(Debug, Clone)]
pub struct OwnerContext {
    id: ThreadId,
    name: Option<String>,
}

impl OwnerContext {
    /// The calling thread
    pub fn current() -> Self {
        Self::from_thread(&thread::current())
    }

    pub fn from_thread(thread: &Thread) -> Self {
        Self {
            id: thread.id(),
            name: thread.name().map(str::to_string),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the calling thread is this owner
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }
}

impl PartialEq for OwnerContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OwnerContext {}

impl fmt::Display for OwnerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({:?})", name, self.id),
            None => write!(f, "{:?}", self.id),
        }
    }
}

/// Schedules work onto the owner thread.
///
/// Posted tasks must eventually run as long as the owner keeps processing
/// its queue.
pub trait Dispatcher: Send + Sync {
    /// The thread posted tasks run on
    fn owner(&self) -> OwnerContext;

    /// Queue `task` for execution on the owner thread
    fn post(&self, task: OwnerTask) -> StartupResult<()>;
}

/// Run `f` on the owner thread and wait for its result.
///
/// Runs inline when already on the owner thread, so it never deadlocks the
/// owner against itself.
pub fn run_on_owner<R, F>(dispatcher: &dyn Dispatcher, f: F) -> StartupResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    if dispatcher.owner().is_current() {
        return Ok(f());
    }

    let (tx, rx) = oneshot::channel();
    dispatcher.post(Box::new(move || {
        let _ = tx.send(f());
    }))?;

    rx.blocking_recv()
        .map_err(|_| StartupError::Dispatch("owner thread dropped the task".to_string()))
}

/// Dedicated owner thread draining a task queue.
pub struct OwnerLoop {
    owner: OwnerContext,
    sender: Mutex<Option<mpsc::UnboundedSender<OwnerTask>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OwnerLoop {
    /// Spawn a new owner thread with the given name
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<OwnerTask>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("Owner loop started");
                let mut processed = 0usize;
                while let Some(task) = receiver.blocking_recv() {
                    task();
                    processed += 1;
                }
                debug!("Owner loop exiting after {} tasks", processed);
            })
            .with_context(|| format!("Failed to spawn owner thread: {}", name))?;

        let owner = OwnerContext::from_thread(handle.thread());
        debug!("Spawned owner loop on {}", owner);

        Ok(Self {
            owner,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Close the queue and wait for the owner thread to finish what is
    /// already queued.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if self.owner.is_current() {
                // Cannot join ourselves; the loop ends once the queue drains.
                return;
            }
            if handle.join().is_err() {
                warn!("Owner thread {} panicked", self.owner);
            }
        }
    }
}

impl Dispatcher for OwnerLoop {
    fn owner(&self) -> OwnerContext {
        self.owner.clone()
    }

    fn post(&self, task: OwnerTask) -> StartupResult<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(task)
                .map_err(|_| StartupError::Dispatch("owner loop has exited".to_string())),
            None => Err(StartupError::Dispatch(
                "owner loop is shut down".to_string(),
            )),
        }
    }
}

impl Drop for OwnerLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queue whose tasks run only when the owner thread pumps it.
pub struct QueueDispatcher {
    owner: OwnerContext,
    queue: Mutex<VecDeque<OwnerTask>>,
    closed: AtomicBool,
}

impl QueueDispatcher {
    /// Make the calling thread the owner
    pub fn for_current_thread() -> Self {
        Self {
            owner: OwnerContext::current(),
            queue: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Refuse further posts
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Run every queued task, including tasks queued while running.
    ///
    /// Only the owner thread may pump the queue.
    pub fn run_pending(&self) -> StartupResult<usize> {
        if !self.owner.is_current() {
            return Err(StartupError::NotOwnerContext {
                operation: "QueueDispatcher::run_pending",
            });
        }

        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it.
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return Ok(ran),
            }
        }
    }
}

impl Dispatcher for QueueDispatcher {
    fn owner(&self) -> OwnerContext {
        self.owner.clone()
    }

    fn post(&self, task: OwnerTask) -> StartupResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StartupError::Dispatch(
                "owner queue is closed".to_string(),
            ));
        }
        self.queue.lock().push_back(task);
        Ok(())
    }
}
