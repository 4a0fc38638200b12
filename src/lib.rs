//! Content-addressed block store with callback-driven asynchronous operations.
//!
//! Every operation is submitted to a driver running on a shared tokio
//! runtime and reports back through a single delivery contract: zero or more
//! `PROGRESS` notifications followed by exactly one terminal status. Rust
//! callers await futures built on channels ([`callback::channel`]), C callers
//! register a function pointer through the [`ffi`] surface. Both go through
//! the same [`callback::OperationHandle`].
//!
//! ```no_run
//! use codex_store::{Node, NodeConfig, RepoKind};
//!
//! # async fn demo() -> codex_store::Result<()> {
//! let node = Node::new(NodeConfig::new().repo_kind(RepoKind::Memory))?;
//! node.start()?;
//!
//! let digest = node.put(b"hello".to_vec()).await?;
//! assert_eq!(node.get(&digest).await?, b"hello");
//!
//! node.stop().await?;
//! node.destroy()?;
//! # Ok(())
//! # }
//! ```

use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;

pub mod actors;
pub mod callback;
pub mod dataset;
pub mod debug;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod models;
pub mod node;
pub mod status;
pub mod store;

pub use callback::{OperationHandle, OperationSink, OperationState, PendingOperation, Progress};
pub use dataset::{DownloadStreamOptions, UploadOptions};
pub use debug::{debug, update_log_level};
pub use error::{Result, StoreError};
pub use models::{DebugInfo, DownloadResult, Manifest, Space, UploadResult};
pub use node::{LogFormat, LogLevel, Node, NodeConfig, NodeState, RepoKind};
pub use status::StatusCode;
pub use store::{BlockStore, Digest, FsStore, MemoryStore};

/// Crate version reported by `codex_version`.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Process-wide runtime shared by every node and by the C surface.
pub static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Return the shared runtime, building it on first use.
///
/// `worker_threads == 0` keeps tokio's default (one worker per core). Only
/// the first caller decides the thread count.
pub fn runtime(worker_threads: usize) -> Result<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.thread_name("codex-worker").enable_all();
        if worker_threads > 0 {
            builder.worker_threads(worker_threads);
        }
        let runtime = builder.build().map_err(StoreError::from)?;
        tracing::debug!(worker_threads, "runtime started");
        Ok(runtime)
    })
}
