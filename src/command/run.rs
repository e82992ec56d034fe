use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info};

use engine_startup::config::ProviderConfig;
use engine_startup::engine::{Engine, SimulatedEngine};
use engine_startup::prefs::VersionChange;
use engine_startup::provider::EngineProvider;
use engine_startup::startup::{run_on_owner, Dispatcher, OwnerLoop};

use crate::cli::Trigger;

pub struct RunOptions {
    pub workers: usize,
    pub views: usize,
    pub trigger: Trigger,
    pub fail: bool,
}

pub async fn run_engine(config: ProviderConfig, options: RunOptions) -> Result<()> {
    let owner_loop = Arc::new(OwnerLoop::spawn(&config.owner_thread_name)?);
    let dispatcher: Arc<dyn Dispatcher> = owner_loop.clone();

    let fail = options.fail;
    let provider = Arc::new(EngineProvider::new(
        config,
        dispatcher.clone(),
        move |config| {
            if fail {
                anyhow::bail!("simulated engine library failed to load");
            }
            SimulatedEngine::boot(config)
        },
    )?);

    match provider.version_change() {
        VersionChange::FirstRun => {
            println!("🆕 First run in {}", provider.config().base_dir.display())
        }
        VersionChange::Unchanged => {}
        VersionChange::Upgraded { from } => println!("⬆️  Upgraded from version {}", from),
        VersionChange::Downgraded { from } => {
            println!("⬇️  Downgraded from version {}; engine data was wiped", from)
        }
    }

    let views: Vec<_> = (0..options.views).map(|_| provider.create_view()).collect();
    println!("🪟 Created {} views before startup", views.len());

    let begin = Instant::now();
    match options.trigger {
        Trigger::Owner => {
            info!("Starting engine from the owner thread");
            let p = provider.clone();
            let d = dispatcher.clone();
            tokio::task::spawn_blocking(move || {
                run_on_owner(d.as_ref(), move || p.start_engines(true).map(|_| ()))
            })
            .await
            .context("Owner task panicked")??
            .context("Engine startup on the owner thread failed")?;
        }
        Trigger::Worker => {
            info!("Starting engine from {} worker threads", options.workers);
            let handles: Vec<_> = (0..options.workers)
                .map(|_| {
                    let p = provider.clone();
                    tokio::task::spawn_blocking(move || {
                        let waited = Instant::now();
                        p.start_engines(false).map(|_| waited.elapsed())
                    })
                })
                .collect();

            for (i, handle) in handles.into_iter().enumerate() {
                let waited: Duration = handle.await.context("Worker panicked")??;
                debug!("Worker {} waited {:?}", i, waited);
                println!("   worker {} waited {:?}", i, waited);
            }
        }
    }

    // Listener notifications run on the owner thread after startup; a no-op
    // round trip guarantees they have been delivered.
    let d = dispatcher.clone();
    tokio::task::spawn_blocking(move || run_on_owner(d.as_ref(), || ()))
        .await
        .context("Owner task panicked")??;

    let statics = provider.statics()?;
    let engine = provider
        .coordinator()
        .engine()
        .context("Engine missing after startup")?;
    let attached = views.iter().filter(|v| v.is_attached()).count();

    println!("\n✅ Engine started in {:?}", begin.elapsed());
    if let Some(owner) = provider.coordinator().owner() {
        println!("   Owner thread: {}", owner);
    }
    println!("   Engine: {}", engine.name());
    println!("   User agent: {}", statics.default_user_agent());
    println!("   Remote debugging: {}", engine.remote_debugging_enabled());
    println!("   Views attached: {}/{}", attached, views.len());

    owner_loop.shutdown();
    Ok(())
}
