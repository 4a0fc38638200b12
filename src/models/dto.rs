// src/models/dto.rs
//
// Data Transfer Objects returned to callers (serialized to JSON on the C side)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::Space;

// ═══════════════════════════════════════════════════════════════════════════
// TRANSFER RESULTS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub cid: String,
    pub size: u64,
    pub blocks: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub cid: String,
    pub size: u64,
    pub blocks: usize,
    pub duration_ms: u64,
    /// Every block matched its digest
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepath: Option<PathBuf>,
}

// ═══════════════════════════════════════════════════════════════════════════
// DIAGNOSTICS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationCounts {
    pub submitted: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub id: String,
    pub version: String,
    pub state: String,
    pub repo_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub log_level: String,
    pub operations: OperationCounts,
    pub upload_sessions: usize,
    pub download_sessions: usize,
    /// Present while the node is started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space: Option<Space>,
}
