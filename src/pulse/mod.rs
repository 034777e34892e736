//! Audio server protocol
//!
//! The rest of the crate talks to the sound server only through the
//! [`AudioServer`] trait. The server's own vocabulary (source names, module
//! names, module argument strings, capability flags) is passed through as-is.
//!
//! Production code uses [`PactlServer`], which drives the `pactl` client that
//! ships with both PulseAudio and pipewire-pulse.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ServerError;

#[cfg(test)]
pub mod memory;
pub mod pactl;

pub use pactl::PactlServer;

/// `PA_INVALID_INDEX`: "no such object", e.g. a source that monitors no sink
pub const PA_INVALID_INDEX: u32 = u32::MAX;

/// `pa_source_flags_t` bits
pub mod source_flags {
    pub const HW_VOLUME_CTRL: u32 = 0x0001;
    pub const LATENCY: u32 = 0x0002;
    pub const HARDWARE: u32 = 0x0004;
    pub const NETWORK: u32 = 0x0008;
    pub const HW_MUTE_CTRL: u32 = 0x0010;
    pub const DECIBEL_VOLUME: u32 = 0x0020;
    pub const DYNAMIC_LATENCY: u32 = 0x0040;
    pub const FLAT_VOLUME: u32 = 0x0080;

    /// Map a flag name as printed by the server tools to its bit
    pub fn from_name(name: &str) -> Option<u32> {
        match name {
            "HW_VOLUME_CTRL" => Some(HW_VOLUME_CTRL),
            "LATENCY" => Some(LATENCY),
            "HARDWARE" => Some(HARDWARE),
            "NETWORK" => Some(NETWORK),
            "HW_MUTE_CTRL" => Some(HW_MUTE_CTRL),
            "DECIBEL_VOLUME" => Some(DECIBEL_VOLUME),
            "DYNAMIC_LATENCY" => Some(DYNAMIC_LATENCY),
            "FLAT_VOLUME" => Some(FLAT_VOLUME),
            _ => None,
        }
    }
}

/// A capture source as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub index: u32,
    pub name: String,
    pub description: String,
    /// Index of the sink this source monitors, or [`PA_INVALID_INDEX`]
    pub monitor_of_sink: u32,
    /// `pa_source_flags_t` bitmask
    pub flags: u32,
}

/// A loaded server module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub index: u32,
    pub name: String,
    pub argument: String,
}

impl ModuleRecord {
    /// Value of `key` in the module argument string, if present
    pub fn arg(&self, key: &str) -> Option<String> {
        parse_module_args(&self.argument)
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Kind of object a change notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Module,
    Source,
    Sink,
    Other,
}

/// A single change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub facility: Facility,
    /// "new", "change" or "remove"
    pub kind: String,
    pub index: Option<u32>,
}

/// Connection to a PulseAudio-compatible sound server
///
/// All methods take `&self`; implementations are shared as
/// `Arc<dyn AudioServer>` between the reconciler task and the controller.
#[async_trait]
pub trait AudioServer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Verify the server is reachable
    async fn ping(&self) -> Result<(), ServerError>;

    async fn list_sources(&self) -> Result<Vec<SourceRecord>, ServerError>;

    async fn list_modules(&self) -> Result<Vec<ModuleRecord>, ServerError>;

    /// Load a module and return its index
    async fn load_module(&self, name: &str, argument: &str) -> Result<u32, ServerError>;

    async fn unload_module(&self, index: u32) -> Result<(), ServerError>;

    /// Subscribe to graph change notifications
    ///
    /// The channel closing means the connection to the server was lost.
    /// Delivery is not loss-free; consumers must re-derive state from a full
    /// query rather than apply events incrementally.
    async fn subscribe(&self) -> Result<mpsc::Receiver<ServerEvent>, ServerError>;
}

/// Split a module argument string into `key=value` pairs.
///
/// Whitespace separates pairs unless quoted with `"` or `'`. One pair of
/// quotes wrapping a whole value is stripped.
pub fn parse_module_args(argument: &str) -> Vec<(String, String)> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in argument.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
        .into_iter()
        .filter_map(|token| {
            let (key, value) = token.split_once('=')?;
            Some((key.to_string(), strip_quotes(value).to_string()))
        })
        .collect()
}

fn strip_quotes(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
