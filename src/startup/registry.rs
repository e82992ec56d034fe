//! Registry of objects waiting to hear that the engine has started.

use std::sync::{Arc, Weak};

/// Callback fired once the engine has started.
pub trait StartupListener: Send + Sync {
    fn on_engine_started(&self);
}

/// Stable identifier of a pending registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl RegistrationId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Outcome of registering for startup notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The engine had already started; the listener ran before returning
    NotifiedImmediately,
    /// Queued until startup completes
    Pending(RegistrationId),
}

impl Registration {
    pub fn id(&self) -> Option<RegistrationId> {
        match self {
            Registration::NotifiedImmediately => None,
            Registration::Pending(id) => Some(*id),
        }
    }
}

/// Ordered, weakly-held listeners registered before startup.
///
/// The registry never keeps a listener alive: entries whose referent has been
/// dropped are skipped when drained.
#[derive(Default)]
pub struct PendingRegistrants {
    next_id: u64,
    entries: Vec<(RegistrationId, Weak<dyn StartupListener>)>,
}

impl PendingRegistrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: &Arc<dyn StartupListener>) -> RegistrationId {
        self.next_id += 1;
        let id = RegistrationId(self.next_id);
        self.entries.push((id, Arc::downgrade(listener)));
        id
    }

    /// Remove a registration; returns whether it was still queued
    pub fn remove(&mut self, id: RegistrationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Entries still queued, live or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued entries whose listener is still alive
    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, listener)| listener.strong_count() > 0)
            .count()
    }

    /// Empty the registry, returning the listeners still alive in
    /// registration order.
    pub fn drain_live(&mut self) -> Vec<Arc<dyn StartupListener>> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .filter_map(|(_, listener)| listener.upgrade())
            .collect()
    }
}
