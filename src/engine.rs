//! The engine surface used by the provider, and a simulated engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ProviderConfig;
use crate::startup::StartupListener;

/// Opaque heavyweight engine, started once per process.
pub trait Engine: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn default_user_agent(&self) -> String;

    /// First postal-address-like fragment in `text`
    fn find_address(&self, text: &str) -> Option<String>;

    fn set_remote_debugging(&self, enabled: bool);

    fn remote_debugging_enabled(&self) -> bool;
}

/// In-process stand-in for a real engine
#[derive(Debug)]
pub struct SimulatedEngine {
    version_code: u32,
    switches: Vec<String>,
    started_at: DateTime<Utc>,
    remote_debugging: AtomicBool,
}

impl SimulatedEngine {
    /// Boot the engine: prepares the data directory and waits out the
    /// configured warmup.
    pub fn boot(config: &ProviderConfig) -> Result<Self> {
        let switches = config.engine_switches()?;
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        debug!("Booting simulated engine with switches {:?}", switches);
        std::thread::sleep(Duration::from_millis(config.warmup_ms));

        info!("Simulated engine v{} up", config.version_code);
        Ok(Self {
            version_code: config.version_code,
            switches,
            started_at: Utc::now(),
            remote_debugging: AtomicBool::new(false),
        })
    }

    pub fn switches(&self) -> &[String] {
        &self.switches
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl Engine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    fn default_user_agent(&self) -> String {
        format!(
            "Mozilla/5.0 (X11; Linux) EngineStartup/{} SimulatedEngine/{}",
            env!("CARGO_PKG_VERSION"),
            self.version_code
        )
    }

    fn find_address(&self, text: &str) -> Option<String> {
        // A house number followed by at least two more words, up to the end
        // of the sentence or line.
        for sentence in text.split(['.', '\n']) {
            let words: Vec<&str> = sentence.split_whitespace().collect();
            let Some(start) = words
                .iter()
                .position(|w| w.chars().all(|c| c.is_ascii_digit()))
            else {
                continue;
            };
            if words.len() - start >= 3 {
                return Some(words[start..].join(" "));
            }
        }
        None
    }

    fn set_remote_debugging(&self, enabled: bool) {
        self.remote_debugging.store(enabled, Ordering::SeqCst);
        info!(
            "Remote debugging {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    fn remote_debugging_enabled(&self) -> bool {
        self.remote_debugging.load(Ordering::SeqCst)
    }
}

/// A view backed by the engine.
///
/// Views can be created before the engine is up; they attach to it once
/// the startup notification arrives.
#[derive(Debug)]
pub struct EngineView {
    id: Uuid,
    attached: AtomicBool,
    attach_count: AtomicUsize,
}

impl EngineView {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            attached: AtomicBool::new(false),
            attach_count: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// How many times the view was told the engine started
    pub fn attach_count(&self) -> usize {
        self.attach_count.load(Ordering::SeqCst)
    }

    fn start_your_engine(&self) {
        self.attach_count.fetch_add(1, Ordering::SeqCst);
        if !self.attached.swap(true, Ordering::SeqCst) {
            debug!("View {} attached to engine", self.id);
        }
    }
}

impl Default for EngineView {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupListener for EngineView {
    fn on_engine_started(&self) {
        self.start_your_engine();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(base: &std::path::Path) -> ProviderConfig {
        ProviderConfig {
            base_dir: base.to_path_buf(),
            version_code: 9,
            warmup_ms: 0,
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_boot_creates_data_dir() {
        let tmp = tempdir().unwrap();
        let config = test_config(tmp.path());

        let engine = SimulatedEngine::boot(&config).unwrap();
        assert!(config.data_dir().is_dir());
        assert_eq!(engine.switches(), &["enable-dcheck".to_string()]);
        assert!(engine.default_user_agent().contains("SimulatedEngine/9"));
        assert!(!engine.remote_debugging_enabled());
    }

    #[test]
    fn test_find_address() {
        let tmp = tempdir().unwrap();
        let engine = SimulatedEngine::boot(&test_config(tmp.path())).unwrap();

        assert_eq!(
            engine.find_address("Meet me at 1600 Amphitheatre Parkway. Thanks"),
            Some("1600 Amphitheatre Parkway".to_string())
        );
        assert_eq!(
            engine.find_address("Hello.\nShip to 42 Wallaby Way, Sydney"),
            Some("42 Wallaby Way, Sydney".to_string())
        );
        assert_eq!(engine.find_address("no numbers here"), None);
        assert_eq!(engine.find_address("room 12"), None);
    }

    #[test]
    fn test_view_attaches() {
        let view = EngineView::new();
        assert!(!view.is_attached());

        view.on_engine_started();
        assert!(view.is_attached());
        assert_eq!(view.attach_count(), 1);
    }
}
