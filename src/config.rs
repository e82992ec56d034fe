//! Provider configuration.
//!
//! Settings come from, in increasing priority:
//! 1. Built-in defaults (base directory `~/.engine-startup`, or `ENGINE_STARTUP_HOME`)
//! 2. An optional JSON config file
//! 3. Command-line flags (applied by the CLI)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the default base directory
pub const HOME_ENV: &str = "ENGINE_STARTUP_HOME";

/// Switch that is always passed to the engine
pub const ALWAYS_ON_SWITCH: &str = "enable-dcheck";

/// Resolve the default base directory
pub fn default_base_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    Ok(dirs::home_dir()
        .context("Could not determine home directory")?
        .join(".engine-startup"))
}

/// Configuration for [`crate::provider::EngineProvider`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Holds `prefs.json` and the engine data directory
    pub base_dir: PathBuf,
    /// Version code of the engine package in use
    pub version_code: u32,
    /// Debuggable builds read extra switches and keep remote debugging on
    pub debuggable: bool,
    /// Extra engine switches, only read on debuggable builds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line_file: Option<PathBuf>,
    /// Simulated engine warmup time
    pub warmup_ms: u64,
    /// Name of the owner thread
    pub owner_thread_name: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir().unwrap_or_else(|_| PathBuf::from(".engine-startup")),
            version_code: 1,
            debuggable: false,
            command_line_file: None,
            warmup_ms: 200,
            owner_thread_name: "engine-owner".to_string(),
        }
    }
}

impl ProviderConfig {
    /// Load from a JSON file, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.base_dir.join("prefs.json")
    }

    /// Switches the engine is started with
    pub fn engine_switches(&self) -> Result<Vec<String>> {
        let mut switches = match (&self.command_line_file, self.debuggable) {
            (Some(path), true) => read_switches(path)?,
            _ => Vec::new(),
        };

        if !switches.iter().any(|s| s == ALWAYS_ON_SWITCH) {
            switches.push(ALWAYS_ON_SWITCH.to_string());
        }
        Ok(switches)
    }
}

/// Read `--switch` tokens from a command-line file.
///
/// A missing file means no switches. Tokens without the `--` prefix (such
/// as the leading program name) are ignored.
pub fn read_switches(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        debug!("No command-line file at {:?}", path);
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read command-line file: {:?}", path))?;

    Ok(content
        .split_whitespace()
        .filter_map(|token| token.strip_prefix("--"))
        .filter(|switch| !switch.is_empty())
        .map(str::to_string)
        .collect())
}
