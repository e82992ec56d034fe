//! Engine startup coordination.
//!
//! The engine is a heavyweight singleton that must be initialized exactly
//! once, lazily, on a single owner thread:
//! - The owner thread starts it inline on first use
//! - Any other thread posts startup to the owner and blocks until it is done
//! - Objects created before startup can ask to be told once it finishes

mod coordinator;
mod error;
mod owner;
mod registry;
mod state;

pub use coordinator::{abort_on_fatal, FatalHook, Initializer, StartupCoordinator};
pub use error::{StartupError, StartupResult};
pub use owner::{run_on_owner, Dispatcher, OwnerContext, OwnerLoop, OwnerTask, QueueDispatcher};
pub use registry::{PendingRegistrants, Registration, RegistrationId, StartupListener};
pub use state::EngineState;
