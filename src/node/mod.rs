// src/node/mod.rs
//
// A node owns one block store, its dataset index and the driver that runs
// operations against them.
//
// Structure:
//   config.rs     - NodeConfig and its JSON form
//   lifecycle.rs  - new / start / stop / destroy, node identity
//   operations.rs - submission of every operation, plus async wrappers

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;

use crate::actors::{DriverHandle, DriverStats, SystemCommand};
use crate::dataset::Datasets;
use crate::models::OperationCounts;

pub mod config;
pub mod lifecycle;
pub mod operations;

pub use config::{LogFormat, LogLevel, NodeConfig, RepoKind};
pub use lifecycle::NodeState;

struct Services {
    datasets: Arc<Datasets>,
    driver: DriverHandle,
}

struct NodeInner {
    id: String,
    config: NodeConfig,
    data_dir: Option<PathBuf>,
    runtime: Handle,
    state: Mutex<NodeState>,
    services: Mutex<Option<Services>>,
    stats: Arc<DriverStats>,
    log_level: Mutex<LogLevel>,
}

/// Handle to a storage node. Cheap to clone; clones share the node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Node {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.inner.data_dir.as_deref()
    }

    pub fn state(&self) -> NodeState {
        *lock(&self.inner.state)
    }

    pub fn log_level(&self) -> LogLevel {
        *lock(&self.inner.log_level)
    }

    pub(crate) fn set_log_level(&self, level: LogLevel) {
        *lock(&self.inner.log_level) = level;
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.inner.stats.snapshot()
    }

    /// Dataset layer of a started node.
    pub fn datasets(&self) -> Option<Arc<Datasets>> {
        lock(&self.inner.services).as_ref().map(|s| s.datasets.clone())
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Log the driver's counters.
    pub fn dump_diagnostics(&self) {
        if let Some(services) = lock(&self.inner.services).as_ref() {
            services.driver.system(SystemCommand::DumpDiagnostics);
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("repo_kind", &self.inner.config.repo_kind)
            .finish()
    }
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        let services = self.services.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(services) = services.take() {
            tracing::warn!(id = %self.id, "node dropped while started, stopping driver");
            services.driver.system(SystemCommand::PoisonPill);
        }
    }
}
