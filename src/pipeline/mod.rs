//! Pipeline controller: builds and removes the noise-suppression graph
//!
//! The controller only reports whether the server accepted its commands.
//! Whether the pipeline is actually loaded is the reconciler's call.

pub mod graph;

pub use graph::Step;

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::devices::DeviceDescriptor;
use crate::elevation::Elevator;
use crate::error::PipelineError;
use crate::pulse::AudioServer;
use crate::session::Session;
use graph::{Element, FilterParams, Survey};

/// Controller-side view of the last request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

pub struct PipelineController {
    state: Mutex<ControllerState>,
    /// Held for the whole duration of one enable/disable
    toggle: tokio::sync::Mutex<()>,
    elevator: Arc<dyn Elevator>,
}

impl PipelineController {
    pub fn new(elevator: Arc<dyn Elevator>) -> Self {
        Self {
            state: Mutex::new(ControllerState::Disabled),
            toggle: tokio::sync::Mutex::new(()),
            elevator,
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    fn set_state(&self, state: ControllerState) {
        *self.state.lock() = state;
    }

    /// Build the pipeline on top of `source_id`.
    ///
    /// A no-op if the complete pipeline is already loaded. Leftovers of a
    /// partial pipeline are removed first. If any graph edit fails, every
    /// module loaded by this call is unloaded again before returning.
    pub async fn enable(&self, session: &Session, source_id: &str) -> Result<(), PipelineError> {
        let _guard = self.toggle.try_lock().map_err(|_| PipelineError::Busy)?;
        let server = session.server();

        let survey = Survey::take(&server.list_modules().await?);
        if survey.is_complete() {
            info!("Filter is already loaded");
            self.set_state(ControllerState::Enabled);
            return Ok(());
        }

        self.set_state(ControllerState::Enabling);
        let result = self.build(session, source_id, &survey).await;
        self.set_state(match result {
            Ok(()) => ControllerState::Enabled,
            Err(_) => ControllerState::Disabled,
        });
        result
    }

    /// Remove every pipeline module, continuing past individual failures
    pub async fn disable(&self, session: &Session) -> Result<(), PipelineError> {
        let _guard = self.toggle.try_lock().map_err(|_| PipelineError::Busy)?;
        let server = session.server();

        let survey = Survey::take(&server.list_modules().await?);
        if survey.is_empty() {
            info!("Filter is not loaded");
            self.set_state(ControllerState::Disabled);
            return Ok(());
        }

        self.set_state(ControllerState::Disabling);
        info!("🔻 Unloading noise suppression modules");
        let failed = teardown(server, &survey).await;
        self.set_state(ControllerState::Disabled);

        if failed > 0 {
            return Err(PipelineError::Teardown { failed });
        }
        Ok(())
    }

    async fn build(
        &self,
        session: &Session,
        source_id: &str,
        survey: &Survey,
    ) -> Result<(), PipelineError> {
        let server = session.server();
        let plugin_path = session.ensure_artifact()?;

        let device = server
            .list_sources()
            .await?
            .iter()
            .find(|source| source.name == source_id)
            .map(DeviceDescriptor::from)
            .ok_or_else(|| PipelineError::UnknownSource(source_id.to_string()))?;

        if session.config().elevation.enabled && !self.elevator.memlock_sufficient() {
            self.elevator.elevate(std::process::id() as i32).await?;
        }

        if !survey.is_empty() {
            warn!("⚠️  Found a partially loaded pipeline, removing it first");
            let failed = teardown(server, survey).await;
            if failed > 0 {
                return Err(PipelineError::Teardown { failed });
            }
        }

        info!(
            "🔺 Loading noise suppression on '{}' (dynamic latency: {})",
            device.display_name, device.supports_dynamic_latency
        );
        let params = FilterParams {
            source_id: &device.id,
            plugin_path: &plugin_path,
            threshold: session.config().filter.threshold,
            dynamic_latency: device.supports_dynamic_latency,
        };

        let mut loaded: Vec<(Element, u32)> = Vec::new();
        for step in Step::ALL {
            for element in step.elements() {
                let argument = element.argument(&params);
                debug!("load-module {} {}", element.module_name(), argument);
                match server.load_module(element.module_name(), &argument).await {
                    Ok(index) => loaded.push((*element, index)),
                    Err(source) => {
                        error!("❌ Failed to {}: {}", step, source);
                        rollback(server, &loaded).await;
                        return Err(PipelineError::GraphEdit { step, source });
                    }
                }
            }
            debug!("Step done: {}", step);
        }

        info!("✅ Noise suppression modules loaded");
        Ok(())
    }
}

/// Unload modules loaded by a failed enable, newest first
async fn rollback(server: &dyn AudioServer, loaded: &[(Element, u32)]) {
    for (element, index) in loaded.iter().rev() {
        match server.unload_module(*index).await {
            Ok(()) => debug!("Rolled back {:?} (module #{})", element, index),
            Err(e) => warn!("Rollback of {:?} (module #{}) failed: {}", element, index, e),
        }
    }
}

/// Unload every surveyed module in teardown order; returns the failure count
async fn teardown(server: &dyn AudioServer, survey: &Survey) -> usize {
    let mut failed = 0;
    for (element, index) in survey.teardown_order() {
        match server.unload_module(index).await {
            Ok(()) => debug!("Unloaded {:?} (module #{})", element, index),
            Err(e) => {
                warn!("⚠️  Couldn't unload {:?} (module #{}): {}", element, index, e);
                failed += 1;
            }
        }
    }
    failed
}
