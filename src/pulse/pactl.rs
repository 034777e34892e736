//! `pactl`-backed audio server connection
//!
//! Every query is a short-lived `pactl` invocation bounded by a timeout.
//! Change notifications come from one long-running `pactl subscribe` child.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{source_flags, AudioServer, Facility, ModuleRecord, ServerEvent, SourceRecord};
use super::PA_INVALID_INDEX;
use crate::config::PactlConfig;
use crate::error::ServerError;

/// Audio server reached through the `pactl` command-line client
pub struct PactlServer {
    binary: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PactlSource {
    index: u32,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    monitor_of_sink: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PactlSink {
    index: u32,
    name: String,
}

impl PactlServer {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PactlConfig) -> Self {
        Self::new(config.binary.clone(), Duration::from_millis(config.timeout_ms))
    }

    /// Run one `pactl` invocation and return its stdout
    async fn run(&self, args: &[&str], operation: &str) -> Result<String, ServerError> {
        trace!("pactl {}", args.join(" "));

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ServerError::Connection(format!(
                    "failed to run {}: {}",
                    self.binary, e
                )))
            }
            Err(_) => {
                return Err(ServerError::Timeout {
                    operation: operation.to_string(),
                    after: self.timeout,
                })
            }
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_connection_failure(&reason) {
            Err(ServerError::Connection(reason))
        } else {
            Err(ServerError::Rejected {
                operation: operation.to_string(),
                reason,
            })
        }
    }
}

fn is_connection_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("connection failure")
        || lower.contains("connection refused")
        || lower.contains("connection terminated")
}

#[async_trait]
impl AudioServer for PactlServer {
    fn name(&self) -> &str {
        "pactl"
    }

    async fn ping(&self) -> Result<(), ServerError> {
        self.run(&["info"], "server info").await.map(|_| ())
    }

    async fn list_sources(&self) -> Result<Vec<SourceRecord>, ServerError> {
        let sinks = self.run(&["-f", "json", "list", "sinks"], "sink list").await?;
        let sources = self
            .run(&["-f", "json", "list", "sources"], "source list")
            .await?;
        parse_sources(&sources, &sinks)
    }

    async fn list_modules(&self) -> Result<Vec<ModuleRecord>, ServerError> {
        let out = self
            .run(&["list", "short", "modules"], "module list")
            .await?;
        parse_modules(&out)
    }

    async fn load_module(&self, name: &str, argument: &str) -> Result<u32, ServerError> {
        let operation = format!("load of {}", name);
        let out = self
            .run(&["load-module", name, argument], &operation)
            .await?;
        out.trim().parse::<u32>().map_err(|_| {
            ServerError::Protocol(format!("load-module printed {:?}, expected an index", out.trim()))
        })
    }

    async fn unload_module(&self, index: u32) -> Result<(), ServerError> {
        let index = index.to_string();
        let operation = format!("unload of module #{}", index);
        self.run(&["unload-module", &index], &operation)
            .await
            .map(|_| ())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<ServerEvent>, ServerError> {
        let mut child = Command::new(&self.binary)
            .arg("subscribe")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ServerError::Connection(format!("failed to run {} subscribe: {}", self.binary, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServerError::Connection("pactl subscribe has no stdout".to_string()))?;

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            // The child is owned here so it dies with the task
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(event) = parse_event(&line) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            debug!("Event subscriber dropped, stopping pactl subscribe");
                            return;
                        }
                    }
                    Ok(None) => {
                        warn!("🔌 pactl subscribe stream ended");
                        return;
                    }
                    Err(e) => {
                        warn!("🔌 pactl subscribe read error: {}", e);
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Parse `pactl -f json list sources`, resolving monitor sink names through
/// the sink list
fn parse_sources(sources_json: &str, sinks_json: &str) -> Result<Vec<SourceRecord>, ServerError> {
    let sinks: Vec<PactlSink> = serde_json::from_str(sinks_json)
        .map_err(|e| ServerError::Protocol(format!("sink list: {}", e)))?;
    let sources: Vec<PactlSource> = serde_json::from_str(sources_json)
        .map_err(|e| ServerError::Protocol(format!("source list: {}", e)))?;

    let sink_index: HashMap<&str, u32> = sinks.iter().map(|s| (s.name.as_str(), s.index)).collect();

    let mut records = Vec::with_capacity(sources.len());
    for source in sources {
        let monitor_of_sink = match source.monitor_of_sink.as_deref() {
            None | Some("") | Some("n/a") => PA_INVALID_INDEX,
            Some(sink) => match sink_index.get(sink) {
                Some(index) => *index,
                None => {
                    // The sink vanished between the two queries; its monitor goes with it
                    debug!("Skipping monitor {} of vanished sink {}", source.name, sink);
                    continue;
                }
            },
        };

        let flags = source
            .flags
            .iter()
            .filter_map(|f| source_flags::from_name(f))
            .fold(0, |acc, bit| acc | bit);

        let description = source
            .description
            .filter(|d| !d.is_empty())
            .or_else(|| {
                source
                    .properties
                    .get("device.description")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        records.push(SourceRecord {
            index: source.index,
            name: source.name,
            description,
            monitor_of_sink,
            flags,
        });
    }

    Ok(records)
}

/// Parse `pactl list short modules`: `index<TAB>name<TAB>argument`
fn parse_modules(out: &str) -> Result<Vec<ModuleRecord>, ServerError> {
    out.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.splitn(3, '\t');
            let index = fields
                .next()
                .and_then(|i| i.trim().parse::<u32>().ok())
                .ok_or_else(|| ServerError::Protocol(format!("module line {:?}", line)))?;
            let name = fields
                .next()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ServerError::Protocol(format!("module line {:?}", line)))?;
            let argument = fields.next().unwrap_or("").trim();
            Ok(ModuleRecord {
                index,
                name: name.to_string(),
                argument: argument.to_string(),
            })
        })
        .collect()
}

/// Parse one `pactl subscribe` line: `Event 'new' on module #23`
fn parse_event(line: &str) -> Option<ServerEvent> {
    let rest = line.trim().strip_prefix("Event '")?;
    let (kind, rest) = rest.split_once('\'')?;
    let rest = rest.trim().strip_prefix("on ")?;

    let (facility, index) = match rest.split_once(" #") {
        Some((facility, index)) => (facility, index.trim().parse::<u32>().ok()),
        None => (rest, None),
    };

    let facility = match facility.trim() {
        "module" => Facility::Module,
        "source" => Facility::Source,
        "sink" => Facility::Sink,
        _ => Facility::Other,
    };

    Some(ServerEvent {
        facility,
        kind: kind.to_string(),
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINKS: &str = r#"[
        {"index": 0, "name": "alsa_output.pci-0000_00_1f.3.analog-stereo", "description": "Built-in Audio"},
        {"index": 4, "name": "nui_mic_denoised_out", "description": "Null Output"}
    ]"#;

    const SOURCES: &str = r#"[
        {
            "index": 1,
            "name": "alsa_output.pci-0000_00_1f.3.analog-stereo.monitor",
            "description": "Monitor of Built-in Audio",
            "monitor_of_sink": "alsa_output.pci-0000_00_1f.3.analog-stereo",
            "flags": ["LATENCY", "DECIBEL_VOLUME"]
        },
        {
            "index": 2,
            "name": "alsa_input.usb0",
            "description": null,
            "monitor_of_sink": "n/a",
            "flags": ["HARDWARE", "HW_MUTE_CTRL", "LATENCY", "DYNAMIC_LATENCY"],
            "properties": {"device.description": "USB Microphone"}
        },
        {
            "index": 9,
            "name": "gone_sink.monitor",
            "monitor_of_sink": "gone_sink"
        }
    ]"#;

    #[test]
    fn test_parse_sources() {
        let records = parse_sources(SOURCES, SINKS).unwrap();
        assert_eq!(records.len(), 2);

        let monitor = &records[0];
        assert_eq!(monitor.monitor_of_sink, 0);
        assert_eq!(monitor.description, "Monitor of Built-in Audio");
        assert_eq!(monitor.flags & source_flags::DYNAMIC_LATENCY, 0);

        let mic = &records[1];
        assert_eq!(mic.name, "alsa_input.usb0");
        assert_eq!(mic.description, "USB Microphone");
        assert_eq!(mic.monitor_of_sink, PA_INVALID_INDEX);
        assert_ne!(mic.flags & source_flags::DYNAMIC_LATENCY, 0);
        assert_ne!(mic.flags & source_flags::HARDWARE, 0);
    }

    #[test]
    fn test_parse_sources_rejects_garbage() {
        let err = parse_sources("not json", SINKS).unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));
    }

    #[test]
    fn test_parse_modules() {
        let out = "0\tmodule-device-restore\t\n\
                   23\tmodule-null-sink\tsink_name=nui_mic_denoised_out rate=48000\n\
                   24\tmodule-loopback\tsource=alsa_input.usb0 sink=nui_mic_raw_in\n";
        let modules = parse_modules(out).unwrap();
        assert_eq!(modules.len(), 3);
        assert_eq!(modules[0].argument, "");
        assert_eq!(modules[1].index, 23);
        assert_eq!(modules[1].name, "module-null-sink");
        assert_eq!(modules[2].arg("sink").as_deref(), Some("nui_mic_raw_in"));
    }

    #[test]
    fn test_parse_modules_bad_index() {
        assert!(parse_modules("x\tmodule-null-sink\t\n").is_err());
    }

    #[test]
    fn test_parse_events() {
        let event = parse_event("Event 'new' on module #23").unwrap();
        assert_eq!(event.facility, Facility::Module);
        assert_eq!(event.kind, "new");
        assert_eq!(event.index, Some(23));

        let event = parse_event("Event 'change' on server").unwrap();
        assert_eq!(event.facility, Facility::Other);
        assert_eq!(event.index, None);

        assert!(parse_event("garbage").is_none());
    }

    #[test]
    fn test_connection_failure_detection() {
        assert!(is_connection_failure("Connection failure: Connection refused"));
        assert!(!is_connection_failure("Failure: Module initialization failed"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_loss() {
        let server = PactlServer::new("/nonexistent/pactl-binary", Duration::from_secs(1));
        let err = server.ping().await.unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_slow_answer_is_timeout_not_connection_loss() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("slow-pactl");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let server = PactlServer::new(script.to_string_lossy(), Duration::from_millis(200));
        let err = server.list_modules().await.unwrap_err();
        assert!(matches!(err, ServerError::Timeout { .. }), "{}", err);
        assert!(!err.is_connection_loss());
    }
}
