// src/node/lifecycle.rs
//
// Created -> Started -> Stopping -> Stopped -> Destroyed
//
// A stopped node can be started again. Destroy is final and only allowed
// while nothing runs.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::actors::{DriverActor, DriverStats, SystemCommand};
use crate::callback::{OperationHandle, OperationSink};
use crate::dataset::Datasets;
use crate::error::{Result, StoreError};
use crate::node::{Node, NodeConfig, NodeInner, RepoKind, Services, lock};
use crate::status::StatusCode;
use crate::store::open_store;

const NODE_ID_FILE: &str = "node_id.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Started,
    Stopping,
    Stopped,
    Destroyed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Created => "created",
            NodeState::Started => "started",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
            NodeState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Reuse the id stored in `<dir>/node_id.txt`, or create and store one.
/// Without a directory the id lives only as long as the node.
pub fn load_or_create_node_id(dir: Option<&Path>) -> String {
    let Some(dir) = dir else {
        return uuid::Uuid::new_v4().to_string();
    };
    let path = dir.join(NODE_ID_FILE);
    if let Ok(id) = std::fs::read_to_string(&path) {
        let id = id.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = std::fs::write(&path, &id) {
        tracing::warn!(path = %path.display(), error = %e, "could not persist node id");
    }
    id
}

impl Node {
    /// Create a node from `config`. Nothing is opened until [`Node::start`].
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        crate::logging::init(&config);
        let runtime = crate::runtime(config.num_threads)?.handle().clone();

        let data_dir = config.resolved_data_dir();
        if let Some(dir) = &data_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                StoreError::unavailable(format!("cannot create data dir {}: {e}", dir.display()))
            })?;
        }
        let id = load_or_create_node_id(data_dir.as_deref());
        tracing::info!(
            %id,
            repo = %config.repo_kind,
            data_dir = ?data_dir,
            "node created"
        );

        Ok(Self {
            inner: Arc::new(NodeInner {
                id,
                log_level: Mutex::new(config.log_level),
                config,
                data_dir,
                runtime,
                state: Mutex::new(NodeState::Created),
                services: Mutex::new(None),
                stats: Arc::new(DriverStats::default()),
            }),
        })
    }

    /// Build a node from the JSON form of [`NodeConfig`].
    pub fn from_json(config_json: &str) -> Result<Self> {
        Self::new(NodeConfig::from_json(config_json)?)
    }

    /// Open the store and index, then start the driver.
    pub fn start(&self) -> Result<()> {
        let mut state = lock(&self.inner.state);
        if !matches!(*state, NodeState::Created | NodeState::Stopped) {
            return Err(StoreError::node_state("start", *state));
        }

        let config = &self.inner.config;
        let store = open_store(config.repo_kind, self.inner.data_dir.as_deref(), config.storage_quota)?;
        // The memory repo keeps its index in memory too.
        let index_dir = match config.repo_kind {
            RepoKind::Fs => self.inner.data_dir.as_deref(),
            RepoKind::Memory => None,
        };
        let datasets = Arc::new(Datasets::open(store, index_dir, config.block_size)?);
        let driver = DriverActor::spawn(&self.inner.runtime, self.inner.stats.clone());

        *lock(&self.inner.services) = Some(Services { datasets, driver });
        *state = NodeState::Started;
        tracing::info!(id = %self.inner.id, "node started");
        Ok(())
    }

    /// Stop accepting work, let running operations finish, close the store.
    pub async fn stop(&self) -> Result<()> {
        let services = {
            let mut state = lock(&self.inner.state);
            if *state != NodeState::Started {
                return Err(StoreError::node_state("stop", *state));
            }
            *state = NodeState::Stopping;
            lock(&self.inner.services).take()
        };

        if let Some(services) = services {
            services.driver.system(SystemCommand::PoisonPill);
            let drained = services.driver.join_handle.await;
            services.datasets.store().close();
            *lock(&self.inner.state) = NodeState::Stopped;
            drained?;
        } else {
            *lock(&self.inner.state) = NodeState::Stopped;
        }

        tracing::info!(id = %self.inner.id, counts = ?self.operation_counts(), "node stopped");
        Ok(())
    }

    /// Release the node for good. Fails while it is started.
    pub fn destroy(&self) -> Result<()> {
        let mut state = lock(&self.inner.state);
        if !matches!(*state, NodeState::Created | NodeState::Stopped) {
            return Err(StoreError::node_state("destroy", *state));
        }
        *state = NodeState::Destroyed;
        tracing::info!(id = %self.inner.id, "node destroyed");
        Ok(())
    }

    /// `start` with its outcome delivered through `sink`.
    pub fn submit_start(&self, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let Some(sink) = sink else {
            return StatusCode::MissingCallback;
        };
        self.finish_now(OperationHandle::new("start", sink), self.start().map(|_| Vec::new()))
    }

    /// `stop` with its outcome delivered through `sink` once the driver
    /// has drained.
    pub fn submit_stop(&self, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let Some(sink) = sink else {
            return StatusCode::MissingCallback;
        };
        let handle = OperationHandle::new("stop", sink);
        let state = self.state();
        if state != NodeState::Started {
            return self.finish_now(handle, Err(StoreError::node_state("stop", state)));
        }
        let node = self.clone();
        self.runtime().spawn(async move {
            let result = node.stop().await;
            handle.finish(result.map(|_| Vec::new()));
        });
        StatusCode::Ok
    }

    /// `destroy` with its outcome delivered through `sink`.
    pub fn submit_destroy(&self, sink: Option<Box<dyn OperationSink>>) -> StatusCode {
        let Some(sink) = sink else {
            return StatusCode::MissingCallback;
        };
        self.finish_now(OperationHandle::new("destroy", sink), self.destroy().map(|_| Vec::new()))
    }

    /// Deliver `result` on the calling thread. Returns the submission status
    /// matching the outcome.
    pub(crate) fn finish_now(&self, handle: OperationHandle, result: Result<Vec<u8>>) -> StatusCode {
        let status = match &result {
            Ok(_) => StatusCode::Ok,
            Err(_) => StatusCode::Err,
        };
        handle.finish(result);
        status
    }
}
