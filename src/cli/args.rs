use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use engine_startup::config::ProviderConfig;

/// engine-startup - lazy, owner-thread engine startup
#[derive(Parser)]
#[command(name = "engine-startup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding prefs and engine data. Defaults to ~/.engine-startup
    #[arg(long, global = true, env = "ENGINE_STARTUP_HOME")]
    pub base_dir: Option<PathBuf>,

    /// Engine package version code
    #[arg(long, global = true)]
    pub version_code: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        let mut config = ProviderConfig::load(self.config.as_deref())?;
        if let Some(base_dir) = &self.base_dir {
            config.base_dir = base_dir.clone();
        }
        if let Some(version_code) = self.version_code {
            config.version_code = version_code;
        }
        Ok(config)
    }
}

/// Which thread triggers startup in `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Trigger {
    /// The owner thread starts the engine inline
    Owner,
    /// Worker threads post startup to the owner and wait
    Worker,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a simulated engine from several threads and report
    Run {
        /// Threads calling into the provider concurrently
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Views created before startup
        #[arg(long, default_value_t = 2)]
        views: usize,

        /// Simulated engine warmup in milliseconds
        #[arg(long)]
        warmup_ms: Option<u64>,

        /// Treat this as a debuggable build
        #[arg(long)]
        debuggable: bool,

        /// Extra engine switches file (debuggable builds only)
        #[arg(long)]
        command_line_file: Option<PathBuf>,

        /// Who triggers startup
        #[arg(long, value_enum, default_value_t = Trigger::Worker)]
        trigger: Trigger,

        /// Make engine initialization fail. With `--trigger worker` this
        /// aborts the process, since a failed posted startup is fatal.
        #[arg(long)]
        fail: bool,
    },
    /// Show persisted prefs and data directory
    Status,
    /// Delete persisted prefs and engine data
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
