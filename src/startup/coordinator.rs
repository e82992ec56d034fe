//! Lazy, exactly-once engine startup on the owner thread.
//!
//! Any thread may call [`StartupCoordinator::ensure_started`]. The owner
//! thread runs the initialization routine inline; every other thread posts
//! the same routine to the owner through the [`Dispatcher`] and blocks until
//! the engine is up:
//!
//! ```text
//! caller (owner)      : lock -> perform_startup -> unlock -> notify listeners
//! caller (other)      : lock -> post(perform_startup) -> wait until Started
//! owner (posted task) : lock -> perform_startup -> unlock -> notify listeners
//! ```
//!
//! Both paths go through the one `perform_startup` routine, so they cannot
//! drift apart.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use anyhow::anyhow;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::error::{StartupError, StartupResult};
use super::owner::{Dispatcher, OwnerContext};
use super::registry::{PendingRegistrants, Registration, RegistrationId, StartupListener};
use super::state::EngineState;

/// Initialization routine; runs at most once, on the owner thread
pub type Initializer<E> = Box<dyn FnOnce() -> anyhow::Result<E> + Send + 'static>;

/// Called when initialization fails inside a task posted to the owner.
///
/// There is no caller on the owner thread to hand the error to, so the
/// default hook aborts the process.
pub type FatalHook = Arc<dyn Fn(&StartupError) + Send + Sync + 'static>;

/// Default [`FatalHook`]: log and abort.
pub fn abort_on_fatal(err: &StartupError) {
    error!("❌ Fatal engine startup failure on owner thread: {}", err);
    std::process::abort();
}

struct Inner<E> {
    state: EngineState,
    owner: Option<OwnerContext>,
    initializer: Option<Initializer<E>>,
    registrants: PendingRegistrants,
    failure: Option<String>,
}

struct Shared<E> {
    inner: Mutex<Inner<E>>,
    started: Condvar,
    // Written once under `inner`, after `state` becomes Started.
    engine: OnceLock<Arc<E>>,
    dispatcher: Arc<dyn Dispatcher>,
    on_fatal: FatalHook,
}

/// Handle to the process-scoped engine startup state.
///
/// Cloning is cheap; every clone refers to the same state machine.
pub struct StartupCoordinator<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for StartupCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<E: Send + Sync + 'static> StartupCoordinator<E> {
    /// Create a coordinator that aborts the process if a posted startup fails
    pub fn new<F>(dispatcher: Arc<dyn Dispatcher>, initializer: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<E> + Send + 'static,
    {
        Self::with_fatal_hook(dispatcher, initializer, Arc::new(abort_on_fatal))
    }

    pub fn with_fatal_hook<F>(
        dispatcher: Arc<dyn Dispatcher>,
        initializer: F,
        on_fatal: FatalHook,
    ) -> Self
    where
        F: FnOnce() -> anyhow::Result<E> + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: EngineState::NotStarted,
                    owner: None,
                    initializer: Some(Box::new(initializer)),
                    registrants: PendingRegistrants::new(),
                    failure: None,
                }),
                started: Condvar::new(),
                engine: OnceLock::new(),
                dispatcher,
                on_fatal,
            }),
        }
    }

    /// Make sure the engine is started, starting it if needed.
    ///
    /// `caller_is_owner` asserts that the calling thread is the owner thread;
    /// the call fails with [`StartupError::NotOwnerContext`] if it is not.
    /// From any other thread the call blocks until the owner has finished
    /// startup. Returns only once the state is `Started`.
    ///
    /// The owner is always the dispatcher's thread, recorded at the first
    /// attempt. A non-owner caller never becomes the owner by calling
    /// first; its startup is posted to the dispatcher instead.
    pub fn ensure_started(&self, caller_is_owner: bool) -> StartupResult<Arc<E>> {
        if let Some(engine) = self.shared.engine.get() {
            return Ok(engine.clone());
        }

        let mut inner = self.shared.inner.lock();

        if inner.state.is_started() {
            return self.shared.published_engine();
        }
        if let Some(reason) = &inner.failure {
            return Err(StartupError::Poisoned(reason.clone()));
        }

        let owner = self.shared.bind_owner(&mut inner);

        if owner.is_current() {
            let listeners = self.shared.perform_startup(&mut inner)?;
            drop(inner);
            notify_listeners(listeners);
            return self.shared.published_engine();
        }

        if caller_is_owner {
            return Err(StartupError::NotOwnerContext {
                operation: "ensure_started",
            });
        }

        if inner.state == EngineState::NotStarted {
            self.shared.post_startup(&mut inner)?;
            debug!("Posted engine startup to owner thread {}", owner);
        }

        // No timeout: a stalled owner thread is a deadlock bug, not a
        // condition handled here.
        while !inner.state.is_started() {
            if let Some(reason) = &inner.failure {
                return Err(StartupError::Poisoned(reason.clone()));
            }
            self.shared.started.wait(&mut inner);
        }
        drop(inner);

        self.shared.published_engine()
    }

    /// Ask to be told once the engine has started.
    ///
    /// If it already has, the listener runs right away, before this returns.
    /// Otherwise it runs exactly once on whichever thread completes startup.
    /// Only a weak reference is kept.
    pub fn register_for_startup_notification(
        &self,
        listener: &Arc<dyn StartupListener>,
    ) -> Registration {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_started() {
            drop(inner);
            listener.on_engine_started();
            return Registration::NotifiedImmediately;
        }

        let id = inner.registrants.push(listener);
        debug!("Queued startup listener {}", id.value());
        Registration::Pending(id)
    }

    /// Drop a pending registration; returns whether it was still queued
    pub fn unregister(&self, id: RegistrationId) -> bool {
        self.shared.inner.lock().registrants.remove(id)
    }

    pub fn has_started(&self) -> bool {
        self.shared.engine.get().is_some()
    }

    pub fn state(&self) -> EngineState {
        self.shared.inner.lock().state
    }

    /// The engine, if started
    pub fn engine(&self) -> Option<Arc<E>> {
        self.shared.engine.get().cloned()
    }

    /// Owner thread recorded at the first startup attempt
    pub fn owner(&self) -> Option<OwnerContext> {
        self.shared.inner.lock().owner.clone()
    }

    /// Live listeners still waiting for startup
    pub fn pending_registrations(&self) -> usize {
        self.shared.inner.lock().registrants.live_count()
    }

    /// Failure message if initialization failed
    pub fn failure(&self) -> Option<String> {
        self.shared.inner.lock().failure.clone()
    }

    /// Post a startup task without waiting for it.
    ///
    /// Used when only kicking off startup is wanted; the owner thread picks
    /// it up whenever it next drains its queue.
    pub fn start_in_background(&self) -> StartupResult<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != EngineState::NotStarted {
            return Ok(());
        }
        self.shared.bind_owner(&mut inner);
        self.shared.post_startup(&mut inner)
    }
}

impl<E: Send + Sync + 'static> Shared<E> {
    fn bind_owner(&self, inner: &mut MutexGuard<'_, Inner<E>>) -> OwnerContext {
        inner
            .owner
            .get_or_insert_with(|| {
                let owner = self.dispatcher.owner();
                let kind = if owner.is_current() { "calling" } else { "dispatcher" };
                info!("Binding engine to {} thread {}", kind, owner);
                owner
            })
            .clone()
    }

    /// Queue `perform_startup` on the owner and mark the engine `Starting`.
    ///
    /// The state is only advanced once the task has been accepted, so a
    /// dispatcher that refuses it leaves the engine `NotStarted`.
    fn post_startup(self: &Arc<Self>, inner: &mut MutexGuard<'_, Inner<E>>) -> StartupResult<()> {
        let shared = self.clone();
        self.dispatcher.post(Box::new(move || shared.run_posted_startup()))?;
        inner.state.advance(EngineState::Starting);
        Ok(())
    }

    fn published_engine(&self) -> StartupResult<Arc<E>> {
        self.engine.get().cloned().ok_or(StartupError::NotStarted {
            operation: "ensure_started",
        })
    }

    /// Run initialization on the owner thread with `inner` held.
    ///
    /// Returns the listeners to notify once the lock is released.
    fn perform_startup(
        &self,
        inner: &mut MutexGuard<'_, Inner<E>>,
    ) -> StartupResult<Vec<Arc<dyn StartupListener>>> {
        debug_assert!(inner.owner.as_ref().is_some_and(OwnerContext::is_current));

        if inner.state.is_started() {
            return Ok(Vec::new());
        }
        if let Some(reason) = &inner.failure {
            return Err(StartupError::Poisoned(reason.clone()));
        }

        inner.state.advance(EngineState::Starting);

        let Some(initializer) = inner.initializer.take() else {
            // Only reachable if startup unwound after taking the initializer.
            let reason = "initialization did not complete".to_string();
            inner.failure = Some(reason.clone());
            self.started.notify_all();
            return Err(StartupError::Poisoned(reason));
        };

        info!("🚀 Starting engine...");
        let begin = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(initializer)).unwrap_or_else(|payload| {
            Err(anyhow!("initializer panicked: {}", panic_message(&*payload)))
        });

        match outcome {
            Ok(engine) => {
                inner.state.advance(EngineState::Started);
                let published = self.engine.set(Arc::new(engine));
                debug_assert!(published.is_ok(), "engine published twice");
                let listeners = inner.registrants.drain_live();
                info!(
                    "✅ Engine started in {:?} ({} pending listeners)",
                    begin.elapsed(),
                    listeners.len()
                );
                self.started.notify_all();
                Ok(listeners)
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!("❌ Engine initialization failed: {}", reason);
                inner.failure = Some(reason.clone());
                self.started.notify_all();
                Err(StartupError::Init(reason))
            }
        }
    }

    fn run_posted_startup(&self) {
        let mut inner = self.inner.lock();
        match self.perform_startup(&mut inner) {
            Ok(listeners) => {
                drop(inner);
                notify_listeners(listeners);
            }
            Err(err @ StartupError::Init(_)) => {
                drop(inner);
                (self.on_fatal)(&err);
            }
            Err(err) => {
                // Someone already saw this failure on the owner thread.
                warn!("Posted engine startup skipped: {}", err);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn notify_listeners(listeners: Vec<Arc<dyn StartupListener>>) {
    if listeners.is_empty() {
        return;
    }
    debug!("Notifying {} startup listeners", listeners.len());
    for listener in listeners {
        listener.on_engine_started();
    }
}
