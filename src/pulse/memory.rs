//! In-process audio server for tests
//!
//! Keeps a module list and a source list, records every applied and
//! reverted operation, and lets tests inject failures, mutate the graph
//! behind the tool's back, drop notifications, or cut the connection.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::mpsc;

use super::{AudioServer, Facility, ModuleRecord, ServerEvent, SourceRecord, PA_INVALID_INDEX};
use crate::error::ServerError;

/// One graph edit accepted by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Load { index: u32, name: String, argument: String },
    Unload { index: u32, name: String },
}

#[derive(Default)]
struct Inner {
    sources: Vec<SourceRecord>,
    modules: Vec<ModuleRecord>,
    next_index: u32,
    ops: Vec<Op>,
    fail_load: HashSet<String>,
    fail_unload: HashSet<String>,
    fail_module_list: Option<ServerError>,
    subscribers: Vec<mpsc::Sender<ServerEvent>>,
    silent: bool,
    disconnected: bool,
}

pub struct MemoryServer {
    inner: Mutex<Inner>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_index: 16,
                ..Default::default()
            }),
        }
    }

    pub fn with_sources(sources: Vec<SourceRecord>) -> Self {
        let server = Self::new();
        server.inner.lock().sources = sources;
        server
    }

    /// A plain capture source record
    pub fn source(index: u32, name: &str, flags: u32) -> SourceRecord {
        SourceRecord {
            index,
            name: name.to_string(),
            description: format!("{} description", name),
            monitor_of_sink: PA_INVALID_INDEX,
            flags,
        }
    }

    /// Make every future load of `module_name` fail
    pub fn fail_load_of(&self, module_name: &str) {
        self.inner.lock().fail_load.insert(module_name.to_string());
    }

    /// Make every future unload of a `module_name` module fail
    pub fn fail_unload_of(&self, module_name: &str) {
        self.inner.lock().fail_unload.insert(module_name.to_string());
    }

    /// Make module listings fail with `error` until failures are cleared
    pub fn fail_module_list(&self, error: ServerError) {
        self.inner.lock().fail_module_list = Some(error);
    }

    /// Let loads, unloads and listings succeed again
    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.fail_load.clear();
        inner.fail_unload.clear();
        inner.fail_module_list = None;
    }

    /// Stop (or resume) delivering change notifications
    pub fn set_silent(&self, silent: bool) {
        self.inner.lock().silent = silent;
    }

    /// Drop the connection: notification channels close, calls fail
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.disconnected = true;
        inner.subscribers.clear();
    }

    pub fn ops(&self) -> Vec<Op> {
        self.inner.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.inner.lock().ops.clear();
    }

    pub fn modules(&self) -> Vec<ModuleRecord> {
        self.inner.lock().modules.clone()
    }

    /// Load a module as another client would (not recorded in `ops`)
    pub fn load_external(&self, name: &str, argument: &str) -> u32 {
        let mut inner = self.inner.lock();
        let index = inner.next_index;
        inner.next_index += 1;
        inner.modules.push(ModuleRecord {
            index,
            name: name.to_string(),
            argument: argument.to_string(),
        });
        notify(&mut inner, "new", index);
        index
    }

    /// Unload a module as another client would (not recorded in `ops`)
    pub fn unload_external(&self, index: u32) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.modules.len();
        inner.modules.retain(|m| m.index != index);
        let removed = inner.modules.len() != before;
        if removed {
            notify(&mut inner, "remove", index);
        }
        removed
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(inner: &mut Inner, kind: &str, index: u32) {
    if inner.silent {
        return;
    }
    let event = ServerEvent {
        facility: Facility::Module,
        kind: kind.to_string(),
        index: Some(index),
    };
    inner
        .subscribers
        .retain(|tx| !matches!(tx.try_send(event.clone()), Err(mpsc::error::TrySendError::Closed(_))));
}

fn check_connected(inner: &Inner) -> Result<(), ServerError> {
    if inner.disconnected {
        Err(ServerError::Connection("memory server disconnected".to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl AudioServer for MemoryServer {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<(), ServerError> {
        check_connected(&self.inner.lock())
    }

    async fn list_sources(&self) -> Result<Vec<SourceRecord>, ServerError> {
        let inner = self.inner.lock();
        check_connected(&inner)?;
        Ok(inner.sources.clone())
    }

    async fn list_modules(&self) -> Result<Vec<ModuleRecord>, ServerError> {
        let inner = self.inner.lock();
        check_connected(&inner)?;
        if let Some(error) = &inner.fail_module_list {
            return Err(error.clone());
        }
        Ok(inner.modules.clone())
    }

    async fn load_module(&self, name: &str, argument: &str) -> Result<u32, ServerError> {
        let mut inner = self.inner.lock();
        check_connected(&inner)?;
        if inner.fail_load.contains(name) {
            return Err(ServerError::Rejected {
                operation: format!("load of {}", name),
                reason: "Module initialization failed".to_string(),
            });
        }

        let index = inner.next_index;
        inner.next_index += 1;
        inner.modules.push(ModuleRecord {
            index,
            name: name.to_string(),
            argument: argument.to_string(),
        });
        inner.ops.push(Op::Load {
            index,
            name: name.to_string(),
            argument: argument.to_string(),
        });
        notify(&mut inner, "new", index);
        Ok(index)
    }

    async fn unload_module(&self, index: u32) -> Result<(), ServerError> {
        let mut inner = self.inner.lock();
        check_connected(&inner)?;

        let Some(pos) = inner.modules.iter().position(|m| m.index == index) else {
            return Err(ServerError::Rejected {
                operation: format!("unload of module #{}", index),
                reason: "No such entity".to_string(),
            });
        };
        let name = inner.modules[pos].name.clone();
        if inner.fail_unload.contains(&name) {
            return Err(ServerError::Rejected {
                operation: format!("unload of module #{}", index),
                reason: "Operation refused".to_string(),
            });
        }

        inner.modules.remove(pos);
        inner.ops.push(Op::Unload { index, name });
        notify(&mut inner, "remove", index);
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<ServerEvent>, ServerError> {
        let mut inner = self.inner.lock();
        check_connected(&inner)?;
        let (tx, rx) = mpsc::channel(256);
        inner.subscribers.push(tx);
        Ok(rx)
    }
}
