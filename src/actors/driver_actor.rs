// src/actors/driver_actor.rs
//
// DriverActor - runs submitted operations
//
// Responsibilities:
// - Receives Run commands and spawns one task per operation
// - Turns each job's result into exactly one terminal delivery
// - Keeps submitted / in-flight / completed / failed / cancelled counters
// - On PoisonPill: stops accepting, fails anything still queued, waits for
//   in-flight operations, exits

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinSet;

use crate::actors::{ActorHandle, ActorMessage, SystemCommand};
use crate::callback::{OperationHandle, ProgressReporter};
use crate::error::{Result, StoreError};
use crate::models::OperationCounts;
use crate::status::StatusCode;

/// Body of an operation. Its result becomes the terminal notification.
pub type Job = Box<dyn FnOnce(ProgressReporter) -> BoxFuture<'static, Result<Vec<u8>>> + Send>;

pub enum DriverCommand {
    Run { handle: OperationHandle, job: Job },
}

impl fmt::Debug for DriverCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverCommand::Run { handle, .. } => f.debug_struct("Run").field("handle", handle).finish(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct DriverStats {
    submitted: AtomicU64,
    in_flight: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl DriverStats {
    pub fn snapshot(&self) -> OperationCounts {
        OperationCounts {
            submitted: self.submitted.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    fn record(&self, status: StatusCode) {
        let counter = match status {
            StatusCode::Ok => &self.completed,
            StatusCode::Cancelled => &self.cancelled,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DRIVER ACTOR
// ═══════════════════════════════════════════════════════════════════════════

pub struct DriverActor {
    stats: Arc<DriverStats>,
    tasks: JoinSet<()>,
}

impl DriverActor {
    /// Spawn the actor on `runtime`.
    pub fn spawn(runtime: &Handle, stats: Arc<DriverStats>) -> ActorHandle<DriverCommand> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let actor = DriverActor {
            stats,
            tasks: JoinSet::new(),
        };
        let join_handle = runtime.spawn(actor.run(cmd_rx));
        ActorHandle { cmd_tx, join_handle }
    }

    async fn run(mut self, mut cmd_rx: UnboundedReceiver<ActorMessage<DriverCommand>>) {
        tracing::debug!("driver started");
        loop {
            tokio::select! {
                msg = cmd_rx.recv() => match msg {
                    Some(ActorMessage::Domain(DriverCommand::Run { handle, job })) => self.start(handle, job),
                    Some(ActorMessage::System(SystemCommand::DumpDiagnostics)) => self.dump(),
                    Some(ActorMessage::System(SystemCommand::PoisonPill)) | None => break,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => self.reap(joined),
            }
        }

        // Nothing queued behind the pill gets to run.
        cmd_rx.close();
        while let Some(msg) = cmd_rx.recv().await {
            if let ActorMessage::Domain(DriverCommand::Run { handle, .. }) = msg {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                self.stats.record(StatusCode::Err);
                handle.fail(StoreError::node_state("run operation", "stopping"));
            }
        }

        while let Some(joined) = self.tasks.join_next().await {
            self.reap(joined);
        }
        tracing::debug!(counts = ?self.stats.snapshot(), "driver stopped");
    }

    fn start(&mut self, handle: OperationHandle, job: Job) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(id = handle.id(), operation = handle.operation(), "operation pending");

        let stats = self.stats.clone();
        self.tasks.spawn(async move {
            let reporter = handle.reporter();
            let result = job(reporter).await;
            let status = match &result {
                Ok(_) => StatusCode::Ok,
                Err(err) => {
                    tracing::debug!(id = handle.id(), operation = handle.operation(), %err, "operation failed");
                    err.status()
                }
            };
            stats.record(status);
            handle.finish(result);
        });
    }

    fn reap(&mut self, joined: std::result::Result<(), tokio::task::JoinError>) {
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
        if let Err(err) = joined {
            // The handle was dropped with the task and already reported ERR.
            tracing::error!(%err, "operation task aborted");
            self.stats.record(StatusCode::Err);
        }
    }

    fn dump(&self) {
        tracing::info!(counts = ?self.stats.snapshot(), running = self.tasks.len(), "driver diagnostics");
    }
}
