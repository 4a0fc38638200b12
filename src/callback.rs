// src/callback.rs
//
// Callback dispatch: one delivery contract for C function pointers and Rust
// channels.
//
// An operation owns an OperationHandle. Progress goes through the handle (or
// a ProgressReporter cloned from it) and is only delivered while the
// operation is live and its position strictly increases. Terminal delivery
// consumes the handle, so at most one terminal can be produced; dropping a
// live handle delivers ERR so at least one is produced.

use std::ffi::{c_char, c_int, c_void};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{Result, StoreError};
use crate::status::StatusCode;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// C callback signature: `(status, message, length, userData)`.
///
/// `message` is not NUL-terminated and may be null when `length` describes
/// a byte count rather than a buffer.
pub type RawCallback =
    unsafe extern "C" fn(status: c_int, message: *const c_char, length: usize, user_data: *mut c_void);

// ═══════════════════════════════════════════════════════════════════════════
// NOTIFICATIONS
// ═══════════════════════════════════════════════════════════════════════════

/// One delivery to a sink.
pub enum Notification<'a> {
    /// Partial completion. `position` is cumulative and strictly increasing
    /// within an operation; `len` is the size of this step.
    Progress {
        position: u64,
        len: usize,
        chunk: Option<&'a [u8]>,
    },
    Completed(Vec<u8>),
    Failed(StoreError),
}

impl Notification<'_> {
    pub fn status(&self) -> StatusCode {
        match self {
            Notification::Progress { .. } => StatusCode::Progress,
            Notification::Completed(_) => StatusCode::Ok,
            Notification::Failed(err) => err.status(),
        }
    }
}

/// Receiver side of an operation.
pub trait OperationSink: Send + 'static {
    fn deliver(&mut self, notification: Notification<'_>);
}

/// Owned copy of a progress notification, handed to Rust closures.
#[derive(Debug, Clone)]
pub struct Progress {
    pub position: u64,
    pub len: usize,
    pub chunk: Option<Bytes>,
}

// ═══════════════════════════════════════════════════════════════════════════
// C SINK
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque caller context. Never dereferenced, copied into, or freed here.
#[derive(Debug, Clone, Copy)]
pub struct UserData(pub *mut c_void);

// The pointer is only handed back to the caller's own callback.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

pub struct CallbackSink {
    callback: RawCallback,
    user_data: UserData,
}

impl CallbackSink {
    pub fn new(callback: RawCallback, user_data: *mut c_void) -> Self {
        Self {
            callback,
            user_data: UserData(user_data),
        }
    }

    fn invoke(&self, status: StatusCode, message: &[u8], length: usize) {
        let ptr = if message.is_empty() {
            std::ptr::null()
        } else {
            message.as_ptr() as *const c_char
        };
        unsafe { (self.callback)(status.as_raw(), ptr, length, self.user_data.0) }
    }
}

impl OperationSink for CallbackSink {
    fn deliver(&mut self, notification: Notification<'_>) {
        let status = notification.status();
        match notification {
            Notification::Progress { len, chunk, .. } => {
                self.invoke(status, chunk.unwrap_or_default(), len);
            }
            Notification::Completed(payload) => self.invoke(status, &payload, payload.len()),
            Notification::Failed(err) => {
                let message = err.to_string();
                self.invoke(status, message.as_bytes(), message.len());
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHANNEL SINK
// ═══════════════════════════════════════════════════════════════════════════

pub type ProgressFn = Box<dyn Fn(&Progress) + Send + Sync>;

pub struct ChannelSink {
    on_progress: Option<ProgressFn>,
    result_tx: Option<oneshot::Sender<Result<Vec<u8>>>>,
}

impl OperationSink for ChannelSink {
    fn deliver(&mut self, notification: Notification<'_>) {
        match notification {
            Notification::Progress {
                position,
                len,
                chunk,
            } => {
                if let Some(on_progress) = &self.on_progress {
                    on_progress(&Progress {
                        position,
                        len,
                        chunk: chunk.map(Bytes::copy_from_slice),
                    });
                }
            }
            Notification::Completed(payload) => {
                if let Some(tx) = self.result_tx.take() {
                    let _ = tx.send(Ok(payload));
                }
            }
            Notification::Failed(err) => {
                if let Some(tx) = self.result_tx.take() {
                    let _ = tx.send(Err(err));
                }
            }
        }
    }
}

/// Future side of a [`ChannelSink`].
pub struct PendingOperation {
    result_rx: oneshot::Receiver<Result<Vec<u8>>>,
}

impl PendingOperation {
    /// Wait for the terminal notification.
    pub async fn wait(self) -> Result<Vec<u8>> {
        match self.result_rx.await {
            Ok(result) => result,
            Err(_) => Err(StoreError::failed("operation ended without a result")),
        }
    }
}

/// Build a sink whose terminal notification resolves the returned future.
pub fn channel(on_progress: Option<ProgressFn>) -> (ChannelSink, PendingOperation) {
    let (result_tx, result_rx) = oneshot::channel();
    (
        ChannelSink {
            on_progress,
            result_tx: Some(result_tx),
        },
        PendingOperation { result_rx },
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// OPERATION HANDLE
// ═══════════════════════════════════════════════════════════════════════════

/// Driver-side state of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Progressing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationState::Pending => "pending",
            OperationState::Progressing => "progressing",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
            OperationState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

struct Dispatch {
    id: u64,
    operation: &'static str,
    state: OperationState,
    last_position: Option<u64>,
    sink: Option<Box<dyn OperationSink>>,
}

impl Dispatch {
    fn progress(&mut self, position: u64, len: usize, chunk: Option<&[u8]>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if self.last_position.is_some_and(|last| position <= last) {
            tracing::debug!(
                id = self.id,
                operation = self.operation,
                position,
                "dropping out-of-order progress"
            );
            return false;
        }
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };
        self.last_position = Some(position);
        self.state = OperationState::Progressing;
        sink.deliver(Notification::Progress {
            position,
            len,
            chunk,
        });
        true
    }

    fn finish(&mut self, notification: Notification<'_>) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        self.state = match notification.status() {
            StatusCode::Ok => OperationState::Completed,
            StatusCode::Cancelled => OperationState::Cancelled,
            _ => OperationState::Failed,
        };
        tracing::debug!(id = self.id, operation = self.operation, state = %self.state, "operation finished");
        sink.deliver(notification);
    }
}

fn lock(dispatch: &Mutex<Dispatch>) -> MutexGuard<'_, Dispatch> {
    dispatch.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive owner of an operation's terminal delivery.
pub struct OperationHandle {
    id: u64,
    operation: &'static str,
    dispatch: Arc<Mutex<Dispatch>>,
}

impl OperationHandle {
    pub fn new(operation: &'static str, sink: Box<dyn OperationSink>) -> Self {
        let id = NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            operation,
            dispatch: Arc::new(Mutex::new(Dispatch {
                id,
                operation,
                state: OperationState::Pending,
                last_position: None,
                sink: Some(sink),
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn state(&self) -> OperationState {
        lock(&self.dispatch).state
    }

    /// Progress reporter that can be moved into the operation body.
    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter {
            dispatch: self.dispatch.clone(),
        }
    }

    pub fn progress(&self, position: u64, len: usize, chunk: Option<&[u8]>) -> bool {
        lock(&self.dispatch).progress(position, len, chunk)
    }

    pub fn complete(self, payload: Vec<u8>) {
        lock(&self.dispatch).finish(Notification::Completed(payload));
    }

    pub fn fail(self, error: StoreError) {
        lock(&self.dispatch).finish(Notification::Failed(error));
    }

    pub fn cancel(self) {
        let error = StoreError::cancelled(self.operation);
        self.fail(error);
    }

    pub fn finish(self, result: Result<Vec<u8>>) {
        match result {
            Ok(payload) => self.complete(payload),
            Err(err) => self.fail(err),
        }
    }
}

impl Drop for OperationHandle {
    fn drop(&mut self) {
        let mut dispatch = lock(&self.dispatch);
        if dispatch.sink.is_some() {
            tracing::warn!(id = self.id, operation = self.operation, "operation abandoned");
            dispatch.finish(Notification::Failed(StoreError::failed(format!(
                "{} abandoned before completion",
                self.operation
            ))));
        }
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("state", &self.state())
            .finish()
    }
}

/// Progress-only view of an operation. Silent once the operation is over.
#[derive(Clone)]
pub struct ProgressReporter {
    dispatch: Arc<Mutex<Dispatch>>,
}

impl ProgressReporter {
    pub fn progress(&self, position: u64, len: usize, chunk: Option<&[u8]>) -> bool {
        lock(&self.dispatch).progress(position, len, chunk)
    }

    /// Reporter attached to nothing, for callers that do not want progress.
    pub fn detached() -> Self {
        Self {
            dispatch: Arc::new(Mutex::new(Dispatch {
                id: 0,
                operation: "detached",
                state: OperationState::Pending,
                last_position: None,
                sink: None,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone)]
    struct Recorder {
        events: Arc<Mutex<Vec<(StatusCode, u64, Vec<u8>)>>>,
    }

    impl OperationSink for Recorder {
        fn deliver(&mut self, notification: Notification<'_>) {
            let status = notification.status();
            let entry = match notification {
                Notification::Progress { position, chunk, .. } => {
                    (status, position, chunk.unwrap_or_default().to_vec())
                }
                Notification::Completed(payload) => (status, 0, payload),
                Notification::Failed(err) => (status, 0, err.to_string().into_bytes()),
            };
            self.events.lock().unwrap().push(entry);
        }
    }

    impl Recorder {
        fn statuses(&self) -> Vec<StatusCode> {
            self.events.lock().unwrap().iter().map(|e| e.0).collect()
        }
    }

    #[test]
    fn progress_must_strictly_increase() {
        let recorder = Recorder::default();
        let handle = OperationHandle::new("test", Box::new(recorder.clone()));

        assert!(handle.progress(10, 10, None));
        assert!(!handle.progress(10, 0, None));
        assert!(!handle.progress(5, 5, None));
        assert!(handle.progress(20, 10, None));
        assert_eq!(handle.state(), OperationState::Progressing);
        handle.complete(b"done".to_vec());

        assert_eq!(
            recorder.statuses(),
            vec![StatusCode::Progress, StatusCode::Progress, StatusCode::Ok]
        );
    }

    #[test]
    fn reporter_is_silent_after_terminal() {
        let recorder = Recorder::default();
        let handle = OperationHandle::new("test", Box::new(recorder.clone()));
        let reporter = handle.reporter();

        handle.fail(StoreError::not_found("ff"));
        assert!(!reporter.progress(1, 1, None));

        assert_eq!(recorder.statuses(), vec![StatusCode::Err]);
    }

    #[test]
    fn dropped_handle_reports_error_once() {
        let recorder = Recorder::default();
        {
            let handle = OperationHandle::new("put", Box::new(recorder.clone()));
            handle.progress(1, 1, None);
        }
        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].0, StatusCode::Err);
        assert!(String::from_utf8_lossy(&events[1].2).contains("abandoned"));
    }

    #[test]
    fn cancelled_error_maps_to_cancelled_state() {
        let recorder = Recorder::default();
        let handle = OperationHandle::new("download", Box::new(recorder.clone()));
        let reporter = handle.reporter();
        handle.cancel();
        assert_eq!(recorder.statuses(), vec![StatusCode::Cancelled]);
        assert!(!reporter.progress(1, 1, None));
    }

    #[tokio::test]
    async fn channel_sink_resolves_future() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let (sink, pending) = channel(Some(Box::new(move |p: &Progress| {
            seen_clone.lock().unwrap().push(p.position);
        })));

        let handle = OperationHandle::new("test", Box::new(sink));
        handle.progress(3, 3, Some(b"abc"));
        handle.progress(6, 3, Some(b"def"));
        handle.complete(b"ok".to_vec());

        assert_eq!(pending.wait().await.unwrap(), b"ok");
        assert_eq!(*seen.lock().unwrap(), vec![3, 6]);
    }

    #[tokio::test]
    async fn channel_sink_carries_typed_error() {
        let (sink, pending) = channel(None);
        OperationHandle::new("get", Box::new(sink)).fail(StoreError::not_found("abcd"));
        match pending.wait().await {
            Err(StoreError::NotFound { digest }) => assert_eq!(digest, "abcd"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    unsafe extern "C" fn record_raw(status: c_int, message: *const c_char, length: usize, user_data: *mut c_void) {
        let events = unsafe { &*(user_data as *const Mutex<Vec<(c_int, Option<Vec<u8>>, usize)>>) };
        let bytes = if message.is_null() {
            None
        } else {
            Some(unsafe { std::slice::from_raw_parts(message as *const u8, length) }.to_vec())
        };
        events.lock().unwrap().push((status, bytes, length));
    }

    #[test]
    fn callback_sink_passes_explicit_lengths() {
        let events: Mutex<Vec<(c_int, Option<Vec<u8>>, usize)>> = Mutex::new(Vec::new());
        let user_data = &events as *const _ as *mut c_void;

        let handle = OperationHandle::new("upload", Box::new(CallbackSink::new(record_raw, user_data)));
        handle.progress(4096, 4096, None);
        handle.complete(vec![0, 1, 0, 2]);

        let events = events.lock().unwrap();
        assert_eq!(events[0], (3, None, 4096));
        assert_eq!(events[1], (0, Some(vec![0, 1, 0, 2]), 4));
    }
}
