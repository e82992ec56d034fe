//! Engine lifecycle state.

use std::fmt;

/// Lifecycle of the singleton engine.
///
/// The state only ever moves forward:
/// ```text
/// NotStarted --(ensure_started)--> Starting --(init completes on owner)--> Started
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineState {
    #[default]
    NotStarted,
    Starting,
    Started,
}

impl EngineState {
    pub fn is_started(&self) -> bool {
        matches!(self, EngineState::Started)
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns `false` (and leaves the state untouched) for any backward or
    /// same-state move.
    pub fn advance(&mut self, next: EngineState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::NotStarted => write!(f, "not started"),
            EngineState::Starting => write!(f, "starting"),
            EngineState::Started => write!(f, "started"),
        }
    }
}
