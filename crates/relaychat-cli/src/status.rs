//! `relaychat status`: show the effective configuration.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use relaychat_core::config::load_config;

/// Run the status command.
pub fn run(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let config_file = crate::config_file(config_path);

    println!();
    println!("{}", "Relaychat Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_file.display(),
        if config_file.exists() {
            "✓".green().to_string()
        } else {
            "(not found, using defaults)".red().to_string()
        }
    );

    println!("  {:<18} {}", "Endpoint:".bold(), config.endpoint.url);
    println!(
        "  {:<18} {}",
        "Timeouts:".bold(),
        format!(
            "handshake {}s | keepalive {}s | server {}s",
            config.endpoint.handshake_timeout_secs,
            config.endpoint.keepalive_interval_secs,
            config.endpoint.server_timeout_secs
        )
        .dimmed()
    );

    println!(
        "  {:<18} {}",
        "Reconnect:".bold(),
        reconnect_summary(&config.reconnect.delays_ms, config.reconnect.enabled)
    );

    let name = if config.user.display_name.is_empty() {
        "· not set".dimmed().to_string()
    } else {
        config.user.display_name.clone()
    };
    println!("  {:<18} {}", "Display name:".bold(), name);
    println!();

    Ok(())
}

/// `"4 attempts after 0ms, 2000ms, 10000ms, 30000ms"` or `"disabled"`.
fn reconnect_summary(delays_ms: &[u64], enabled: bool) -> String {
    if !enabled || delays_ms.is_empty() {
        return "disabled".to_string();
    }
    let delays: Vec<String> = delays_ms.iter().map(|ms| format!("{ms}ms")).collect();
    let noun = if delays_ms.len() == 1 { "attempt" } else { "attempts" };
    format!("{} {noun} after {}", delays_ms.len(), delays.join(", "))
}
