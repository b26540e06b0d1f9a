//! Interactive chat: `relaychat chat`.
//!
//! Input is read with `rustyline` on a dedicated thread (readline blocks);
//! session events are printed by a separate task as they arrive, so
//! broadcasts from other participants show up while the prompt is idle.

use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::thread;

use anyhow::{bail, Context, Result};
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relaychat_client::SessionEvent;
use relaychat_core::config::{load_config_file, save_config};
use relaychat_core::utils::get_history_path;
use relaychat_core::ChatError;

use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

// ─────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Exit,
    Help,
    Status,
    Name(&'a str),
    NewSession,
    Connect,
    Say(&'a str),
    Unknown(&'a str),
}

/// Parse an input line. `None` for blank input.
fn parse_command(input: &str) -> Option<Command<'_>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if is_exit_command(trimmed) {
        return Some(Command::Exit);
    }
    if !trimmed.starts_with('/') {
        return Some(Command::Say(trimmed));
    }

    let (cmd, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (trimmed, ""),
    };
    Some(match cmd.to_lowercase().as_str() {
        "/help" => Command::Help,
        "/status" => Command::Status,
        "/name" => Command::Name(arg),
        "/new" => Command::NewSession,
        "/connect" => Command::Connect,
        _ => Command::Unknown(cmd),
    })
}

fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}

fn print_help() {
    println!();
    println!("  /status        connection state and session id");
    println!("  /name NAME     change your display name");
    println!("  /connect       reconnect after the channel closed");
    println!("  /new           start a fresh session (clears history)");
    println!("  /quit          leave");
    println!();
}

// ─────────────────────────────────────────────
// Chat loop
// ─────────────────────────────────────────────

/// Run the interactive chat.
pub async fn run(
    config_path: Option<&Path>,
    name: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let config = crate::effective_config(config_path, url);
    let mut reader = LineReader::spawn()?;

    let Some(name) = resolve_name(&mut reader, name, &config.user.display_name).await? else {
        return Ok(());
    };
    remember_name(config_path, &name);

    helpers::print_banner(&config.endpoint.url, &name);
    let (name_tx, name_rx) = watch::channel(name);

    let manager = crate::build_session_manager(&config);
    let printer = spawn_printer(manager.subscribe(), name_rx);

    if let Err(e) = manager.start().await {
        printer.abort();
        return Err(e).with_context(|| format!("failed to connect to {}", config.endpoint.url));
    }

    loop {
        let prompt = format!("{}> ", *name_tx.borrow());
        let input = tokio::select! {
            input = reader.read(&prompt) => input,
            _ = tokio::signal::ctrl_c() => Input::Interrupted,
        };

        let line = match input {
            Input::Line(line) => line,
            Input::Interrupted | Input::Eof => break,
            Input::Failed(e) => {
                helpers::print_error(&format!("input error: {e}"));
                break;
            }
        };

        let Some(command) = parse_command(&line) else {
            continue;
        };

        match command {
            Command::Exit => break,
            Command::Help => print_help(),
            Command::Status => helpers::print_state(
                manager.current_state(),
                manager.current_session_id().as_deref(),
            ),
            Command::Name("") => helpers::print_error("usage: /name NEW_NAME"),
            Command::Name(new_name) => {
                remember_name(config_path, new_name);
                name_tx.send_replace(new_name.to_string());
                helpers::print_info(&format!("now chatting as {new_name}"));
            }
            Command::NewSession => {
                if let Err(e) = manager.stop().await {
                    warn!(error = %e, "error while closing the previous session");
                }
                match manager.start_new_session().await {
                    Ok(()) => helpers::print_info("started a new session"),
                    Err(e) => helpers::print_error(&format!("connect failed: {e}")),
                }
            }
            Command::Connect => match manager.start().await {
                Ok(()) => {}
                Err(ChatError::AlreadyStarted) => helpers::print_info("already connected"),
                Err(e) => helpers::print_error(&format!("connect failed: {e}")),
            },
            Command::Say(body) => {
                let sender = name_tx.borrow().clone();
                if let Err(e) = manager.submit(&sender, body).await {
                    helpers::print_error(&format!("not sent: {e}"));
                }
            }
            Command::Unknown(cmd) => {
                helpers::print_error(&format!("unknown command {cmd}, try /help"))
            }
        }
    }

    println!("\nGoodbye!");
    if let Err(e) = manager.stop().await {
        warn!(error = %e, "error while leaving the chat");
    }
    printer.abort();

    Ok(())
}

/// Pick the display name: `--name`, else the remembered one, else ask.
///
/// `None` when the user gave up at the prompt.
async fn resolve_name(
    reader: &mut LineReader,
    flag: Option<String>,
    remembered: &str,
) -> Result<Option<String>> {
    if let Some(name) = flag.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        return Ok(Some(name));
    }
    if !remembered.trim().is_empty() {
        return Ok(Some(remembered.trim().to_string()));
    }

    loop {
        match reader.read("Your name: ").await {
            Input::Line(line) if !line.trim().is_empty() => {
                return Ok(Some(line.trim().to_string()))
            }
            Input::Line(_) => helpers::print_error("name must not be empty"),
            Input::Interrupted | Input::Eof => return Ok(None),
            Input::Failed(e) => bail!("input error: {e}"),
        }
    }
}

/// Store the display name in the config file for next time.
fn remember_name(config_path: Option<&Path>, name: &str) {
    let mut stored = load_config_file(config_path);
    if stored.user.display_name == name {
        return;
    }
    stored.user.display_name = name.to_string();
    match save_config(&stored, config_path) {
        Ok(()) => debug!(name = name, "display name saved"),
        Err(e) => warn!(error = %e, "failed to remember display name"),
    }
}

/// Print session events until the manager goes away.
fn spawn_printer(
    mut events: broadcast::Receiver<SessionEvent>,
    own_name: watch::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event, &own_name.borrow()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "chat output fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &SessionEvent, own_name: &str) {
    match event {
        SessionEvent::MessageAppended(message) => {
            helpers::print_message(message, message.is_from(own_name))
        }
        SessionEvent::StateChanged { state, session_id } => {
            helpers::print_state(*state, session_id.as_deref())
        }
        SessionEvent::PeerConnected(peer) => helpers::print_presence(true, peer),
        SessionEvent::PeerDisconnected(peer) => helpers::print_presence(false, peer),
    }
}

// ─────────────────────────────────────────────
// Line input
// ─────────────────────────────────────────────

enum Input {
    Line(String),
    /// Ctrl-C
    Interrupted,
    /// Ctrl-D
    Eof,
    Failed(String),
}

/// Readline on its own thread, one line per requested prompt.
struct LineReader {
    prompts: std_mpsc::Sender<String>,
    lines: mpsc::UnboundedReceiver<Input>,
}

impl LineReader {
    fn spawn() -> Result<Self> {
        let (prompts, prompt_rx) = std_mpsc::channel();
        let (line_tx, lines) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name("relaychat-input".into())
            .spawn(move || read_lines(prompt_rx, line_tx))
            .context("failed to start input thread")?;

        Ok(Self { prompts, lines })
    }

    async fn read(&mut self, prompt: &str) -> Input {
        if self.prompts.send(prompt.to_string()).is_err() {
            return Input::Eof;
        }
        self.lines.recv().await.unwrap_or(Input::Eof)
    }
}

fn read_lines(prompts: std_mpsc::Receiver<String>, lines: mpsc::UnboundedSender<Input>) {
    let mut editor = match create_editor() {
        Ok(editor) => editor,
        Err(e) => {
            let _ = lines.send(Input::Failed(e.to_string()));
            return;
        }
    };

    while let Ok(prompt) = prompts.recv() {
        let input = match editor.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                    save_history(&mut editor);
                }
                Input::Line(line)
            }
            Err(ReadlineError::Interrupted) => Input::Interrupted,
            Err(ReadlineError::Eof) => Input::Eof,
            Err(e) => Input::Failed(e.to_string()),
        };
        if lines.send(input).is_err() {
            break;
        }
    }
}

/// Create a rustyline editor with history.
fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
        debug!("loaded chat history from {}", history_path.display());
    }

    Ok(editor)
}

fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

fn history_path() -> PathBuf {
    get_history_path().join("chat_history")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
