use anyhow::Result;

use engine_startup::config::ProviderConfig;
use engine_startup::prefs::PrefsStore;

pub async fn run_status(config: &ProviderConfig) -> Result<()> {
    let store = PrefsStore::new(config.prefs_path())?;
    let prefs = store.read()?;

    println!("Base directory: {}", config.base_dir.display());

    if prefs.last_version_code_used == 0 {
        println!("❌ Engine has never run here");
    } else {
        println!("✅ Last engine version code: {}", prefs.last_version_code_used);
        if let Some(updated_at) = &prefs.updated_at {
            println!("   Updated at: {}", updated_at);
        }
        if prefs.last_version_code_used > config.version_code {
            println!(
                "⚠️  Configured version {} is older; engine data will be wiped on next run.",
                config.version_code
            );
        }
    }

    let data_dir = config.data_dir();
    match std::fs::read_dir(&data_dir) {
        Ok(entries) => println!(
            "   Data directory: {} ({} entries)",
            data_dir.display(),
            entries.count()
        ),
        Err(_) => println!("   Data directory: {} (missing)", data_dir.display()),
    }

    Ok(())
}
