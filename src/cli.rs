//! Command-line interface and REPL
//!
//! rustyline blocks, so the editor runs on its own thread and forwards
//! parsed commands to the async main loop over a channel.

use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::error;

use crate::devices::DeviceDescriptor;
use crate::error::PipelineError;
use crate::reconciler::SuppressorState;

const PROMPT: &str = "hushline> ";

/// A command typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// List capture devices
    Devices,
    /// Enable on a device, by list number or source name
    Enable(String),
    Disable,
    Status,
    Help,
    Quit,
}

impl ReplCommand {
    /// Parse one input line. `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(None);
        };
        let argument = words.next();
        if words.next().is_some() {
            return Err(format!("Too many arguments for '{}'", command));
        }

        let parsed = match (command.to_ascii_lowercase().as_str(), argument) {
            ("devices" | "list" | "ls", None) => ReplCommand::Devices,
            ("enable" | "on", Some(device)) => ReplCommand::Enable(device.to_string()),
            ("enable" | "on", None) => {
                return Err("Usage: enable <number|source name>".to_string())
            }
            ("disable" | "off", None) => ReplCommand::Disable,
            ("status" | "state", None) => ReplCommand::Status,
            ("help" | "?", None) => ReplCommand::Help,
            ("quit" | "exit" | "q", None) => ReplCommand::Quit,
            (other, _) => {
                return Err(format!(
                    "Unknown command '{}' (type 'help' for a list)",
                    other
                ))
            }
        };
        Ok(Some(parsed))
    }
}

/// Start the prompt thread. Closing the prompt (Ctrl-D, Ctrl-C) sends `Quit`.
pub fn spawn_repl(tx: mpsc::Sender<ReplCommand>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("repl".to_string())
        .spawn(move || run_repl(tx))
}

fn run_repl(tx: mpsc::Sender<ReplCommand>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            error!("Failed to start the prompt: {}", e);
            let _ = tx.blocking_send(ReplCommand::Quit);
            return;
        }
    };

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.as_str());
                }
                match ReplCommand::parse(&line) {
                    Ok(Some(command)) => {
                        let quit = command == ReplCommand::Quit;
                        if tx.blocking_send(command).is_err() || quit {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => println!("{}", message.yellow()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                let _ = tx.blocking_send(ReplCommand::Quit);
                return;
            }
            Err(e) => {
                error!("Prompt failed: {}", e);
                let _ = tx.blocking_send(ReplCommand::Quit);
                return;
            }
        }
    }
}

/// Look up a device by 1-based list number or by source name
pub fn resolve_device<'a>(
    devices: &'a [DeviceDescriptor],
    selector: &str,
) -> Option<&'a DeviceDescriptor> {
    if let Ok(number) = selector.parse::<usize>() {
        return number.checked_sub(1).and_then(|i| devices.get(i));
    }
    devices.iter().find(|device| device.id == selector)
}

fn device_line(number: usize, device: &DeviceDescriptor) -> String {
    let mut tags = Vec::new();
    if device.is_monitor {
        tags.push("monitor");
    }
    if device.supports_dynamic_latency {
        tags.push("low latency");
    }
    let tags = if tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", tags.join(", "))
    };
    format!("{:>3}. {} ({}){}", number, device.display_name, device.id, tags)
}

pub fn print_devices(devices: &[DeviceDescriptor]) {
    println!("\n{}", "Capture devices:".bold());
    if devices.is_empty() {
        println!("  {}", "none found".yellow());
    }
    for (i, device) in devices.iter().enumerate() {
        let line = device_line(i + 1, device);
        if device.is_monitor {
            println!("{}", line.dimmed());
        } else {
            println!("{}", line);
        }
    }
    println!();
}

pub fn state_label(state: SuppressorState) -> ColoredString {
    match state {
        SuppressorState::Loaded => "● noise suppression loaded".green().bold(),
        SuppressorState::Unloaded => "○ noise suppression off".normal(),
        SuppressorState::Transitioning => "◐ noise suppression changing".yellow(),
    }
}

pub fn print_state(state: SuppressorState) {
    println!("{}", state_label(state));
}

/// Report whether the server accepted an enable/disable request
pub fn print_outcome(action: &str, outcome: &Result<(), PipelineError>) {
    match outcome {
        Ok(()) => println!("{} {}", "✓".green(), format!("{} accepted", action).green()),
        Err(e) => println!("{} {}", "✗".red(), format!("{} failed: {}", action, e).red()),
    }
}

pub fn print_help() {
    println!("\n{}", "Commands:".bold());
    for (command, description) in [
        ("devices", "list capture devices"),
        ("enable <n|name>", "load noise suppression on a device"),
        ("disable", "unload noise suppression"),
        ("status", "show whether noise suppression is loaded"),
        ("help", "show this help"),
        ("quit", "exit (the filter stays loaded)"),
    ] {
        println!("  {:<18} {}", command.cyan(), description);
    }
    println!();
}
