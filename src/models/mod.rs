// src/models/mod.rs
//
// Models module - data types that cross the API boundary
//
// Structure:
//   manifest.rs - Dataset manifest and storage space
//   dto.rs      - Results and diagnostics handed back to callers

pub mod dto;
pub mod manifest;

// Re-exports for convenience
pub use dto::{DebugInfo, DownloadResult, OperationCounts, UploadResult};
pub use manifest::{Manifest, Space};
