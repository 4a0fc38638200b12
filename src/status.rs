// src/status.rs
//
// Outcome codes shared by the Rust and C surfaces.

use std::ffi::c_int;
use std::fmt;

pub const RET_OK: c_int = 0;
pub const RET_ERR: c_int = 1;
pub const RET_MISSING_CALLBACK: c_int = 2;
pub const RET_PROGRESS: c_int = 3;
pub const RET_CANCELLED: c_int = 4;

/// Status carried by every callback invocation and returned by every
/// submission.
///
/// `Progress` is the only non-terminal code: after any other code has been
/// delivered for an operation, nothing else is delivered for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = RET_OK,
    Err = RET_ERR,
    MissingCallback = RET_MISSING_CALLBACK,
    Progress = RET_PROGRESS,
    Cancelled = RET_CANCELLED,
}

impl StatusCode {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StatusCode::Progress)
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }

    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            RET_OK => Some(StatusCode::Ok),
            RET_ERR => Some(StatusCode::Err),
            RET_MISSING_CALLBACK => Some(StatusCode::MissingCallback),
            RET_PROGRESS => Some(StatusCode::Progress),
            RET_CANCELLED => Some(StatusCode::Cancelled),
            _ => None,
        }
    }
}

impl From<StatusCode> for c_int {
    fn from(status: StatusCode) -> Self {
        status.as_raw()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::Err => "ERR",
            StatusCode::MissingCallback => "MISSING_CALLBACK",
            StatusCode::Progress => "PROGRESS",
            StatusCode::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}
