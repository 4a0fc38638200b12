// src/ffi/core.rs
//
// The exported codex_* functions.

use std::ffi::{c_char, c_int, c_void};

use crate::callback::{OperationHandle, RawCallback};
use crate::dataset::{DownloadStreamOptions, UploadOptions};
use crate::ffi::scaffold::*;
use crate::node::Node;
use crate::status::{RET_MISSING_CALLBACK, RET_OK};

// Shared prologue: callback first (MISSING_CALLBACK wins over every other
// problem), then the node.
macro_rules! prologue {
    ($op:literal, $ctx:expr, $callback:expr, $user_data:expr) => {{
        let Some(sink) = sink_from($callback, $user_data) else {
            return RET_MISSING_CALLBACK;
        };
        let Some(node) = (unsafe { node_ref($ctx) }) else {
            return reject($op, sink, missing("ctx"));
        };
        (node, sink)
    }};
}

macro_rules! required_str {
    ($op:literal, $sink:ident, $ptr:expr, $name:literal) => {{
        match unsafe { cstr_arg($ptr, $name) } {
            Ok(Some(value)) => value,
            Ok(None) => return reject($op, $sink, missing($name)),
            Err(error) => return reject($op, $sink, error),
        }
    }};
}

macro_rules! checked {
    ($op:literal, $sink:ident, $arg:expr) => {{
        match $arg {
            Ok(value) => value,
            Err(error) => return reject($op, $sink, error),
        }
    }};
}

// ---------- FFI: lifecycle ----------

/// Create a node from a JSON config (null or empty for defaults). On success
/// `*out_ctx` receives the node and the callback gets its id.
#[unsafe(no_mangle)]
pub extern "C" fn codex_new(
    config_json: *const c_char,
    out_ctx: *mut *mut c_void,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(sink) = sink_from(callback, user_data) else {
        return RET_MISSING_CALLBACK;
    };
    if out_ctx.is_null() {
        return reject("new", sink, missing("out_ctx"));
    }
    let config = checked!("new", sink, unsafe { cstr_arg(config_json, "config_json") }).unwrap_or_default();
    match Node::from_json(&config) {
        Ok(node) => {
            let id = node.id().as_bytes().to_vec();
            unsafe { *out_ctx = Box::into_raw(Box::new(node)) as *mut c_void };
            OperationHandle::new("new", sink).complete(id);
            RET_OK
        }
        Err(e) => reject("new", sink, e),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn codex_start(ctx: *mut c_void, callback: Option<RawCallback>, user_data: *mut c_void) -> c_int {
    let (node, sink) = prologue!("start", ctx, callback, user_data);
    node.submit_start(Some(sink)).into()
}

/// Completes once running operations have drained.
#[unsafe(no_mangle)]
pub extern "C" fn codex_stop(ctx: *mut c_void, callback: Option<RawCallback>, user_data: *mut c_void) -> c_int {
    let (node, sink) = prologue!("stop", ctx, callback, user_data);
    node.submit_stop(Some(sink)).into()
}

/// Destroy a stopped (or never started) node. `ctx` is freed on success and
/// must not be used afterwards.
#[unsafe(no_mangle)]
pub extern "C" fn codex_destroy(ctx: *mut c_void, callback: Option<RawCallback>, user_data: *mut c_void) -> c_int {
    let (node, sink) = prologue!("destroy", ctx, callback, user_data);
    let status = node.submit_destroy(Some(sink));
    if status == crate::StatusCode::Ok {
        drop(unsafe { Box::from_raw(ctx as *mut Node) });
    }
    status.into()
}

// ---------- FFI: info ----------

#[unsafe(no_mangle)]
pub extern "C" fn codex_version(ctx: *mut c_void, callback: Option<RawCallback>, user_data: *mut c_void) -> c_int {
    let (node, sink) = prologue!("version", ctx, callback, user_data);
    node.submit_version(Some(sink)).into()
}

#[unsafe(no_mangle)]
pub extern "C" fn codex_repo(ctx: *mut c_void, callback: Option<RawCallback>, user_data: *mut c_void) -> c_int {
    let (node, sink) = prologue!("repo", ctx, callback, user_data);
    node.submit_repo(Some(sink)).into()
}

/// JSON diagnostics of the node.
#[unsafe(no_mangle)]
pub extern "C" fn codex_debug(ctx: *mut c_void, callback: Option<RawCallback>, user_data: *mut c_void) -> c_int {
    let (node, sink) = prologue!("debug", ctx, callback, user_data);
    node.submit_debug(Some(sink)).into()
}

/// `level`: trace, debug, info, notice, warn, error or fatal.
#[unsafe(no_mangle)]
pub extern "C" fn codex_log_level(
    ctx: *mut c_void,
    level: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("log_level", ctx, callback, user_data);
    let level = required_str!("log_level", sink, level, "level");
    node.submit_log_level(&level, Some(sink)).into()
}

// ---------- FFI: blocks ----------

/// Store `len` bytes; the callback gets the hex digest.
#[unsafe(no_mangle)]
pub extern "C" fn codex_block_put(
    ctx: *mut c_void,
    data: *const u8,
    len: usize,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("put", ctx, callback, user_data);
    let Some(data) = (unsafe { bytes_arg(data, len) }) else {
        return reject("put", sink, missing("data"));
    };
    node.submit_put(data, Some(sink)).into()
}

/// The callback gets the block's bytes.
#[unsafe(no_mangle)]
pub extern "C" fn codex_block_get(
    ctx: *mut c_void,
    digest: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("get", ctx, callback, user_data);
    let digest = required_str!("get", sink, digest, "digest");
    node.submit_get(&digest, Some(sink)).into()
}

/// The callback gets "true" or "false".
#[unsafe(no_mangle)]
pub extern "C" fn codex_block_has(
    ctx: *mut c_void,
    digest: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("has", ctx, callback, user_data);
    let digest = required_str!("has", sink, digest, "digest");
    node.submit_has(&digest, Some(sink)).into()
}

#[unsafe(no_mangle)]
pub extern "C" fn codex_block_delete(
    ctx: *mut c_void,
    digest: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("delete_block", ctx, callback, user_data);
    let digest = required_str!("delete_block", sink, digest, "digest");
    node.submit_delete_block(&digest, Some(sink)).into()
}

// ---------- FFI: upload ----------

/// Open an upload session; the callback gets its id. `filename` may be
/// null, `block_size` 0 uses the node's.
#[unsafe(no_mangle)]
pub extern "C" fn codex_upload_init(
    ctx: *mut c_void,
    filename: *const c_char,
    block_size: usize,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("upload_init", ctx, callback, user_data);
    let filename = checked!("upload_init", sink, unsafe { cstr_arg(filename, "filename") });
    let options = UploadOptions {
        filename,
        mimetype: None,
        block_size: (block_size > 0).then_some(block_size),
    };
    node.submit_upload_init(options, Some(sink)).into()
}

/// PROGRESS carries a null buffer and the size of each committed block.
#[unsafe(no_mangle)]
pub extern "C" fn codex_upload_chunk(
    ctx: *mut c_void,
    session_id: *const c_char,
    data: *const u8,
    len: usize,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("upload_chunk", ctx, callback, user_data);
    let session_id = required_str!("upload_chunk", sink, session_id, "session_id");
    let Some(data) = (unsafe { bytes_arg(data, len) }) else {
        return reject("upload_chunk", sink, missing("data"));
    };
    node.submit_upload_chunk(&session_id, data, Some(sink)).into()
}

/// The callback gets the dataset's cid.
#[unsafe(no_mangle)]
pub extern "C" fn codex_upload_finalize(
    ctx: *mut c_void,
    session_id: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("upload_finalize", ctx, callback, user_data);
    let session_id = required_str!("upload_finalize", sink, session_id, "session_id");
    node.submit_upload_finalize(&session_id, Some(sink)).into()
}

#[unsafe(no_mangle)]
pub extern "C" fn codex_upload_cancel(
    ctx: *mut c_void,
    session_id: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("upload_cancel", ctx, callback, user_data);
    let session_id = required_str!("upload_cancel", sink, session_id, "session_id");
    node.submit_upload_cancel(&session_id, Some(sink)).into()
}

/// Upload a whole file; the callback gets the upload result as JSON.
#[unsafe(no_mangle)]
pub extern "C" fn codex_upload_file(
    ctx: *mut c_void,
    filepath: *const c_char,
    block_size: usize,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("upload_file", ctx, callback, user_data);
    let Some(path) = checked!("upload_file", sink, unsafe { path_arg(filepath, "filepath") }) else {
        return reject("upload_file", sink, missing("filepath"));
    };
    let options = UploadOptions {
        block_size: (block_size > 0).then_some(block_size),
        ..UploadOptions::default()
    };
    node.submit_upload_file(path, options, Some(sink)).into()
}

// ---------- FFI: download ----------

/// The callback gets the manifest as JSON.
#[unsafe(no_mangle)]
pub extern "C" fn codex_download_manifest(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("download_manifest", ctx, callback, user_data);
    let cid = required_str!("download_manifest", sink, cid, "cid");
    node.submit_download_manifest(&cid, Some(sink)).into()
}

#[unsafe(no_mangle)]
pub extern "C" fn codex_download_init(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("download_init", ctx, callback, user_data);
    let cid = required_str!("download_init", sink, cid, "cid");
    node.submit_download_init(&cid, Some(sink)).into()
}

/// The callback gets the next block, or a null buffer of length 0 at the end.
#[unsafe(no_mangle)]
pub extern "C" fn codex_download_chunk(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("download_chunk", ctx, callback, user_data);
    let cid = required_str!("download_chunk", sink, cid, "cid");
    node.submit_download_chunk(&cid, Some(sink)).into()
}

/// A running stream of the same cid ends with CANCELLED.
#[unsafe(no_mangle)]
pub extern "C" fn codex_download_cancel(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("download_cancel", ctx, callback, user_data);
    let cid = required_str!("download_cancel", sink, cid, "cid");
    node.submit_download_cancel(&cid, Some(sink)).into()
}

/// PROGRESS carries each block's bytes. With a non-null `filepath` the
/// dataset is also written there. The terminal OK carries the download
/// result as JSON.
#[unsafe(no_mangle)]
pub extern "C" fn codex_download_stream(
    ctx: *mut c_void,
    cid: *const c_char,
    filepath: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("download_stream", ctx, callback, user_data);
    let cid = required_str!("download_stream", sink, cid, "cid");
    let filepath = checked!("download_stream", sink, unsafe { path_arg(filepath, "filepath") });
    let options = DownloadStreamOptions { filepath };
    node.submit_download_stream(&cid, options, Some(sink)).into()
}

// ---------- FFI: storage ----------

/// The callback gets every manifest as a JSON array.
#[unsafe(no_mangle)]
pub extern "C" fn codex_storage_list(ctx: *mut c_void, callback: Option<RawCallback>, user_data: *mut c_void) -> c_int {
    let (node, sink) = prologue!("manifests", ctx, callback, user_data);
    node.submit_manifests(Some(sink)).into()
}

#[unsafe(no_mangle)]
pub extern "C" fn codex_storage_space(ctx: *mut c_void, callback: Option<RawCallback>, user_data: *mut c_void) -> c_int {
    let (node, sink) = prologue!("space", ctx, callback, user_data);
    node.submit_space(Some(sink)).into()
}

#[unsafe(no_mangle)]
pub extern "C" fn codex_storage_delete(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("delete", ctx, callback, user_data);
    let cid = required_str!("delete", sink, cid, "cid");
    node.submit_delete(&cid, Some(sink)).into()
}

#[unsafe(no_mangle)]
pub extern "C" fn codex_storage_fetch(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("fetch", ctx, callback, user_data);
    let cid = required_str!("fetch", sink, cid, "cid");
    node.submit_fetch(&cid, Some(sink)).into()
}

#[unsafe(no_mangle)]
pub extern "C" fn codex_storage_exists(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<RawCallback>,
    user_data: *mut c_void,
) -> c_int {
    let (node, sink) = prologue!("exists", ctx, callback, user_data);
    let cid = required_str!("exists", sink, cid, "cid");
    node.submit_exists(&cid, Some(sink)).into()
}
