use anyhow::Result;
use std::io::{self, Write};

use engine_startup::config::ProviderConfig;
use engine_startup::prefs::{delete_contents, PrefsStore};

pub async fn run_reset(config: &ProviderConfig, yes: bool) -> Result<()> {
    if !yes {
        print!(
            "Delete prefs and all engine data under {}? [y/N]: ",
            config.base_dir.display()
        );
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        let answer = answer.trim().to_lowercase();

        if answer != "y" && answer != "yes" {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    PrefsStore::new(config.prefs_path())?.remove()?;
    delete_contents(&config.data_dir());
    println!("✅ Engine prefs and data removed.");

    Ok(())
}
