// src/ffi/scaffold.rs
//
// Argument decoding and early rejection shared by the C entry points.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::path::PathBuf;

use crate::callback::{CallbackSink, OperationHandle, OperationSink, RawCallback};
use crate::error::StoreError;
use crate::node::Node;
use crate::status::RET_ERR;

/// Read a NUL-terminated string argument. A null pointer is `Ok(None)`.
pub unsafe fn cstr_arg(ptr: *const c_char, parameter: &str) -> Result<Option<String>, StoreError> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|_| StoreError::invalid_parameter(parameter, "is not valid UTF-8"))
}

/// Like [`cstr_arg`], with an empty string treated as absent.
pub unsafe fn path_arg(ptr: *const c_char, parameter: &str) -> Result<Option<PathBuf>, StoreError> {
    Ok(unsafe { cstr_arg(ptr, parameter) }?
        .filter(|s| !s.is_empty())
        .map(PathBuf::from))
}

/// Copy `len` bytes from `ptr`. A null pointer is only accepted for an
/// empty buffer.
pub unsafe fn bytes_arg(ptr: *const u8, len: usize) -> Option<Vec<u8>> {
    match (ptr.is_null(), len) {
        (_, 0) => Some(Vec::new()),
        (true, _) => None,
        (false, len) => Some(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()),
    }
}

/// Borrow the node behind a context pointer from `codex_new`.
pub unsafe fn node_ref<'a>(ctx: *mut c_void) -> Option<&'a Node> {
    unsafe { (ctx as *const Node).as_ref() }
}

pub fn sink_from(callback: Option<RawCallback>, user_data: *mut c_void) -> Option<Box<dyn OperationSink>> {
    callback.map(|cb| Box::new(CallbackSink::new(cb, user_data)) as Box<dyn OperationSink>)
}

/// Fail an operation before it reaches a node.
pub fn reject(operation: &'static str, sink: Box<dyn OperationSink>, error: StoreError) -> c_int {
    tracing::debug!(operation, %error, "rejected at the C boundary");
    OperationHandle::new(operation, sink).fail(error);
    RET_ERR
}

pub fn missing(parameter: &str) -> StoreError {
    StoreError::invalid_parameter(parameter, "must not be null")
}
