//! hushline: microphone noise suppression for PulseAudio-compatible servers
//!
//! Loads a bundled LADSPA noise-suppression filter into the sound server's
//! module graph as a virtual source, removes it again, and keeps an
//! up-to-date view of whether it is loaded.

pub mod cli;
pub mod config;
pub mod devices;
pub mod elevation;
pub mod error;
pub mod logging;
pub mod paths;
pub mod pipeline;
pub mod pulse;
pub mod reconciler;
pub mod session;
pub mod shutdown;
pub mod staging;
