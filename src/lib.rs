//! Lazy, exactly-once startup of a heavyweight engine on a designated owner
//! thread, plus a provider that hands out engine-backed services.
//!
//! ```ignore
//! let owner_loop = Arc::new(OwnerLoop::spawn("engine-owner")?);
//! let provider = EngineProvider::new(config, owner_loop, SimulatedEngine::boot)?;
//!
//! // From any thread: blocks until the owner thread has started the engine
//! let statics = provider.statics()?;
//! ```

pub mod config;
pub mod engine;
pub mod prefs;
pub mod provider;
pub mod startup;
