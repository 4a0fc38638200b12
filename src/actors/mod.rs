// src/actors/mod.rs
//
// Actor plumbing for the operation driver
//
// Architecture:
//   Node
//   └── DriverActor (one per started node)
//       └── one task per submitted operation

pub mod driver_actor;

// Re-exports
pub use driver_actor::{DriverActor, DriverCommand, DriverStats, Job};

// ═══════════════════════════════════════════════════════════════════════════
// COMMON ACTOR TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// System-level commands that all actors understand
#[derive(Debug, Clone)]
pub enum SystemCommand {
    /// Stop accepting work, drain in-flight work, exit
    PoisonPill,
    /// Dump diagnostics to logs
    DumpDiagnostics,
}

/// Wrapper for actor messages - either system or domain-specific
#[derive(Debug)]
pub enum ActorMessage<C> {
    System(SystemCommand),
    Domain(C),
}

/// Handle to a spawned actor
pub struct ActorHandle<C> {
    pub cmd_tx: tokio::sync::mpsc::UnboundedSender<ActorMessage<C>>,
    pub join_handle: tokio::task::JoinHandle<()>,
}

impl<C> ActorHandle<C> {
    pub fn send(&self, cmd: C) -> Result<(), C> {
        self.cmd_tx.send(ActorMessage::Domain(cmd)).map_err(|e| match e.0 {
            ActorMessage::Domain(cmd) => cmd,
            ActorMessage::System(_) => unreachable!("sent a domain message"),
        })
    }

    pub fn system(&self, cmd: SystemCommand) -> bool {
        self.cmd_tx.send(ActorMessage::System(cmd)).is_ok()
    }
}

pub type DriverHandle = ActorHandle<DriverCommand>;
