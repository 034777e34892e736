//! Capture device discovery

use tracing::debug;

use crate::error::ServerError;
use crate::pipeline::graph::REMAP_SOURCE_NAME;
use crate::pulse::{source_flags, AudioServer, SourceRecord, PA_INVALID_INDEX};

/// A capture device the user can pick as pipeline input
///
/// Snapshot of one enumeration; re-enumerate to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Server source name, stable across restarts
    pub id: String,
    pub display_name: String,
    /// Monitor of an output sink rather than a real input
    pub is_monitor: bool,
    /// Source supports `PA_SOURCE_DYNAMIC_LATENCY`
    pub supports_dynamic_latency: bool,
}

impl From<&SourceRecord> for DeviceDescriptor {
    fn from(record: &SourceRecord) -> Self {
        let display_name = if record.description.is_empty() {
            record.name.clone()
        } else {
            record.description.clone()
        };

        Self {
            id: record.name.clone(),
            display_name,
            is_monitor: record.monitor_of_sink != PA_INVALID_INDEX,
            supports_dynamic_latency: record.flags & source_flags::DYNAMIC_LATENCY != 0,
        }
    }
}

/// Query the server's sources once and map them to descriptors.
///
/// The virtual source exposed by our own pipeline is left out.
pub async fn enumerate(server: &dyn AudioServer) -> Result<Vec<DeviceDescriptor>, ServerError> {
    let sources = server.list_sources().await?;

    let devices = sources
        .iter()
        .filter(|source| source.name != REMAP_SOURCE_NAME)
        .map(|source| {
            debug!("Input {}: {:?}", source.name, source);
            DeviceDescriptor::from(source)
        })
        .collect();

    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse::memory::MemoryServer;

    #[tokio::test]
    async fn test_enumerate_excludes_own_remap_source() {
        let server = MemoryServer::with_sources(vec![
            MemoryServer::source(1, "alsa_input.usb0", source_flags::DYNAMIC_LATENCY),
            MemoryServer::source(2, REMAP_SOURCE_NAME, 0),
        ]);

        let devices = enumerate(&server).await.unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "alsa_input.usb0");
        assert!(devices[0].supports_dynamic_latency);
        assert!(!devices[0].is_monitor);
    }

    #[tokio::test]
    async fn test_enumerate_keeps_everything_else_unchanged() {
        let mut monitor = MemoryServer::source(3, "alsa_output.analog-stereo.monitor", 0);
        monitor.monitor_of_sink = 0;
        let mut unnamed = MemoryServer::source(4, "bluez_input.headset", source_flags::HARDWARE);
        unnamed.description = String::new();

        let server = MemoryServer::with_sources(vec![
            MemoryServer::source(1, "alsa_input.pci", source_flags::HARDWARE),
            monitor,
            MemoryServer::source(2, REMAP_SOURCE_NAME, 0),
            unnamed,
        ]);

        let devices = enumerate(&server).await.unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["alsa_input.pci", "alsa_output.analog-stereo.monitor", "bluez_input.headset"]
        );

        assert!(!devices[0].supports_dynamic_latency);
        assert_eq!(devices[0].display_name, "alsa_input.pci description");
        assert!(devices[1].is_monitor);
        assert_eq!(devices[2].display_name, "bluez_input.headset");
    }

    #[tokio::test]
    async fn test_enumerate_propagates_connection_loss() {
        let server = MemoryServer::new();
        server.disconnect();
        let err = enumerate(&server).await.unwrap_err();
        assert!(err.is_connection_loss());
    }
}
