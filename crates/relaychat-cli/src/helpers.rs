//! Shared CLI helpers: path expansion, message/state printing, banner.

use std::path::PathBuf;

use chrono::Local;
use colored::Colorize;

use relaychat_core::utils::truncate_string;
use relaychat_core::{ChatMessage, ConnectionState};

/// Presence ids are opaque; show only a prefix.
const PEER_ID_WIDTH: usize = 12;

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// One log entry as a line: `[14:02:11] alice: hi`.
pub fn format_message(message: &ChatMessage, own: bool) -> String {
    let time = message
        .received_at
        .with_timezone(&Local)
        .format("%H:%M:%S")
        .to_string();
    let sender = if own {
        message.sender.green().bold()
    } else {
        message.sender.cyan().bold()
    };
    format!("{} {}: {}", format!("[{time}]").dimmed(), sender, message.body)
}

pub fn print_message(message: &ChatMessage, own: bool) {
    println!("{}", format_message(message, own));
}

/// Connection state with a colored marker.
pub fn format_state(state: ConnectionState, session_id: Option<&str>) -> String {
    let marker = match state {
        ConnectionState::Connected => "●".green(),
        ConnectionState::Reconnecting => "●".yellow(),
        ConnectionState::Disconnected => "●".red(),
    };
    match session_id {
        Some(id) => format!("{marker} {state} {}", format!("(session {id})").dimmed()),
        None => format!("{marker} {state}"),
    }
}

pub fn print_state(state: ConnectionState, session_id: Option<&str>) {
    println!("{}", format_state(state, session_id));
}

pub fn print_presence(joined: bool, peer: &str) {
    let peer = truncate_string(peer, PEER_ID_WIDTH);
    let line = if joined {
        format!("→ {peer} joined")
    } else {
        format!("← {peer} left")
    };
    println!("{}", line.dimmed());
}

pub fn print_info(text: &str) {
    println!("{}", text.dimmed());
}

pub fn print_error(text: &str) {
    eprintln!("{} {text}", "✗".red().bold());
}

/// Print the banner shown when the chat starts.
pub fn print_banner(url: &str, name: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "Relaychat".cyan().bold(), version.dimmed());
    println!("{}", format!("endpoint: {url}").dimmed());
    println!("{}", format!("chatting as {name}").dimmed());
    println!(
        "{}",
        "Type a message, /help for commands, /quit to leave.".dimmed()
    );
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
