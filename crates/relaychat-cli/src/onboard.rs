//! `relaychat onboard`: write a default config and the data directories.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use relaychat_core::config::{save_config, Config};
use relaychat_core::utils::get_history_path;

/// Run the onboard command.
pub fn run(config_path: Option<&Path>) -> Result<()> {
    println!();
    println!("{}", "Relaychat Setup".cyan().bold());
    println!();

    let config_file = crate::config_file(config_path);
    if write_default_config(&config_file)? {
        println!("  {} created config at {}", "✓".green(), config_file.display());
    } else {
        println!(
            "  {} config already exists at {}",
            "✓".green(),
            config_file.display()
        );
    }

    let history_dir = get_history_path();
    std::fs::create_dir_all(&history_dir)?;
    println!("  {} history dir at {}", "✓".green(), history_dir.display());

    println!();
    println!(
        "{}",
        "  Setup complete! Run `relaychat chat` to join.".green()
    );
    println!();

    Ok(())
}

/// Write `Config::default()` unless a file is already there.
///
/// Returns whether a file was written.
fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    save_config(&Config::default(), Some(path))?;
    Ok(true)
}
