use std::ffi::{CStr, CString, c_void};
use std::os::raw::c_char;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fieldsync_core::{
    Connectivity, Dispatcher, FieldSync, FieldSyncConfig, FieldSyncError, Intent, Notice,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Stable return codes for C/Swift/Kotlin callers.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldsyncFfiCode {
    Ok = 0,
    InvalidArgument = 1,
    RuntimeError = 2,
}

/// Owned byte buffer returned across the FFI boundary.
///
/// Ownership:
/// - Producer: Rust allocates (`Box<[u8]>`) and returns pointer/len.
/// - Consumer: Calls `fieldsync_owned_bytes_free` exactly once.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FieldsyncOwnedBytes {
    pub ptr: *mut u8,
    pub len: usize,
}

impl FieldsyncOwnedBytes {
    const fn empty() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }

    fn from_vec(value: Vec<u8>) -> Self {
        if value.is_empty() {
            return Self::empty();
        }
        let boxed = value.into_boxed_slice();
        let len = boxed.len();
        let ptr = Box::into_raw(boxed) as *mut u8;
        Self { ptr, len }
    }
}

/// Uniform response envelope for every exported call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FieldsyncFfiResult {
    pub code: FieldsyncFfiCode,
    pub payload: FieldsyncOwnedBytes,
}

impl FieldsyncFfiResult {
    const fn ok_empty() -> Self {
        Self {
            code: FieldsyncFfiCode::Ok,
            payload: FieldsyncOwnedBytes::empty(),
        }
    }

    fn ok_json_bytes(payload: Vec<u8>) -> Self {
        Self {
            code: FieldsyncFfiCode::Ok,
            payload: FieldsyncOwnedBytes::from_vec(payload),
        }
    }

    fn invalid_argument(operation: &'static str, message: impl Into<String>) -> Self {
        let payload = FfiErrorPayload {
            code: "INVALID_ARGUMENT",
            operation,
            message: message.into(),
        };
        Self::json_or_internal(FieldsyncFfiCode::InvalidArgument, operation, &payload)
    }

    fn runtime_error(operation: &'static str, err: &FieldSyncError) -> Self {
        let payload = err.to_payload(operation);
        Self::json_or_internal(FieldsyncFfiCode::RuntimeError, operation, &payload)
    }

    fn internal_error(operation: &'static str, message: impl Into<String>) -> Self {
        let payload = FfiErrorPayload {
            code: "FFI_INTERNAL",
            operation,
            message: message.into(),
        };
        Self::json_or_internal(FieldsyncFfiCode::RuntimeError, operation, &payload)
    }

    fn reentrant(operation: &'static str) -> Self {
        let payload = FfiErrorPayload {
            code: "REENTRANT_CALL",
            operation,
            message: format!(
                "{operation} cannot be called from inside the dispatch callback; \
                 replayed intents must be applied without intercepting them again"
            ),
        };
        Self::json_or_internal(FieldsyncFfiCode::RuntimeError, operation, &payload)
    }

    fn json_or_internal(
        code: FieldsyncFfiCode,
        operation: &'static str,
        payload: &impl Serialize,
    ) -> Self {
        match serde_json::to_vec(payload) {
            Ok(json) => Self {
                code,
                payload: FieldsyncOwnedBytes::from_vec(json),
            },
            Err(err) => {
                let fallback = format!(
                    r#"{{"code":"FFI_INTERNAL","operation":"{operation}","message":"failed to serialize payload: {err}"}}"#
                )
                .into_bytes();
                Self {
                    code: FieldsyncFfiCode::RuntimeError,
                    payload: FieldsyncOwnedBytes::from_vec(fallback),
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct FfiErrorPayload<'a> {
    code: &'static str,
    operation: &'a str,
    message: String,
}

/// Host dispatch entry point used when replaying queued intents.
///
/// Receives the opaque `ctx` given to `fieldsync_runtime_new`, the intent
/// name and its JSON payload, both NUL-terminated and valid only for the
/// duration of the call. Must return 0 when the backend accepted the intent.
///
/// The callback runs while the runtime is driving a drain. Calling back into
/// any `fieldsync_*` export that needs the runtime returns a `REENTRANT_CALL`
/// error instead of running.
pub type FieldsyncDispatchCallback =
    extern "C" fn(ctx: *mut c_void, name: *const c_char, payload_json: *const c_char) -> i32;

#[derive(Clone, Copy)]
struct HostContext(*mut c_void);

// SAFETY: `fieldsync_runtime_new` requires the host to accept calls with `ctx`
// from any thread for the lifetime of the runtime.
unsafe impl Send for HostContext {}
// SAFETY: see the `Send` impl above; the pointer is never dereferenced here.
unsafe impl Sync for HostContext {}

struct CallbackDispatcher {
    callback: FieldsyncDispatchCallback,
    ctx: HostContext,
}

#[async_trait]
impl Dispatcher for CallbackDispatcher {
    async fn dispatch(&self, intent: &Intent) -> fieldsync_core::Result<()> {
        let name = CString::new(intent.name.as_str()).map_err(|_| {
            FieldSyncError::Validation(format!("intent name contains NUL: {}", intent.name))
        })?;
        let payload = CString::new(serde_json::to_string(&intent.payload)?).map_err(|_| {
            FieldSyncError::Validation("intent payload contains NUL".to_string())
        })?;

        let status = (self.callback)(self.ctx.0, name.as_ptr(), payload.as_ptr());
        if status == 0 {
            Ok(())
        } else {
            Err(FieldSyncError::Dispatch(format!(
                "{}: host dispatcher returned {status}",
                intent.name
            )))
        }
    }
}

/// Opaque runtime handle for mobile callers.
pub struct FieldsyncRuntime {
    app: FieldSync,
    notices: Mutex<broadcast::Receiver<Notice>>,
    runtime: tokio::runtime::Runtime,
}

impl FieldsyncRuntime {
    /// Drives `future` on the handle's runtime. Refused when the calling
    /// thread is already inside a runtime, which is where the dispatch
    /// callback runs.
    fn block_on<F: Future>(
        &self,
        operation: &'static str,
        future: F,
    ) -> std::result::Result<F::Output, FieldsyncFfiResult> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(FieldsyncFfiResult::reentrant(operation));
        }
        Ok(self.runtime.block_on(future))
    }
}

#[unsafe(no_mangle)]
/// Create a runtime handle backed by SQLite state under `root_dir`.
///
/// `config_toml` may be null or empty for defaults. The runtime starts
/// online; report the real state with `fieldsync_set_online`.
///
/// # Safety
/// - `root_dir` must point to a valid NUL-terminated UTF-8 string.
/// - `config_toml` must be null or a valid NUL-terminated UTF-8 string.
/// - `callback` must be non-null and callable with `ctx` from any thread
///   until `fieldsync_runtime_free` returns.
/// - `out_runtime` must be non-null and writable.
/// - Caller must eventually pass returned runtime to `fieldsync_runtime_free`.
pub unsafe extern "C" fn fieldsync_runtime_new(
    root_dir: *const c_char,
    config_toml: *const c_char,
    callback: Option<FieldsyncDispatchCallback>,
    ctx: *mut c_void,
    out_runtime: *mut *mut FieldsyncRuntime,
) -> FieldsyncFfiResult {
    const OPERATION: &str = "runtime.new";

    guarded(OPERATION, || {
        if out_runtime.is_null() {
            return FieldsyncFfiResult::invalid_argument(OPERATION, "out_runtime pointer is null");
        }
        let Some(callback) = callback else {
            return FieldsyncFfiResult::invalid_argument(OPERATION, "callback pointer is null");
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            return FieldsyncFfiResult::reentrant(OPERATION);
        }
        let root_dir = match parse_required_c_string(root_dir, OPERATION, "root_dir") {
            Ok(value) => value.trim().to_string(),
            Err(result) => return result,
        };
        let config = match parse_optional_c_string(config_toml, OPERATION, "config_toml") {
            Ok(Some(raw)) => match FieldSyncConfig::from_toml_str(raw.trim()) {
                Ok(config) => config,
                Err(err) => return FieldsyncFfiResult::runtime_error(OPERATION, &err),
            },
            Ok(None) => FieldSyncConfig::default(),
            Err(result) => return result,
        };

        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("fieldsync-ffi")
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                return FieldsyncFfiResult::internal_error(
                    OPERATION,
                    format!("failed to start runtime: {err}"),
                );
            }
        };

        let dispatcher = Arc::new(CallbackDispatcher {
            callback,
            ctx: HostContext(ctx),
        });
        let app = {
            let _entered = runtime.enter();
            FieldSync::open(&root_dir, config, dispatcher)
        };
        match app {
            Ok(app) => {
                let notices = Mutex::new(app.subscribe_notices());
                let handle = Box::new(FieldsyncRuntime {
                    app,
                    notices,
                    runtime,
                });
                // SAFETY: `out_runtime` was validated as non-null and points to writable caller memory.
                unsafe {
                    *out_runtime = Box::into_raw(handle);
                }
                FieldsyncFfiResult::ok_empty()
            }
            Err(err) => FieldsyncFfiResult::runtime_error(OPERATION, &err),
        }
    })
}

#[unsafe(no_mangle)]
/// Run one intent through the offline manager and return the interception
/// result as JSON. The host still forwards the intent itself afterwards.
///
/// `name` is used verbatim; surrounding whitespace is part of the name.
///
/// # Safety
/// - `runtime` must be a live pointer previously returned by `fieldsync_runtime_new`.
/// - `name` must be a valid NUL-terminated UTF-8 string.
/// - `payload_json` must be null (JSON `null`) or a valid NUL-terminated UTF-8 string.
/// - Must not be called from inside the dispatch callback (returns `REENTRANT_CALL`).
pub unsafe extern "C" fn fieldsync_intercept(
    runtime: *mut FieldsyncRuntime,
    name: *const c_char,
    payload_json: *const c_char,
) -> FieldsyncFfiResult {
    const OPERATION: &str = "intercept";

    guarded(OPERATION, || {
        let runtime = match runtime_from_ptr(runtime, OPERATION) {
            Ok(runtime) => runtime,
            Err(result) => return result,
        };
        let name = match parse_required_c_string(name, OPERATION, "name") {
            Ok(value) => value.to_string(),
            Err(result) => return result,
        };
        let payload = match parse_optional_c_string(payload_json, OPERATION, "payload_json") {
            Ok(Some(raw)) => match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(value) => value,
                Err(err) => {
                    return FieldsyncFfiResult::invalid_argument(
                        OPERATION,
                        format!("payload_json must be valid JSON: {err}"),
                    );
                }
            },
            Ok(None) => serde_json::Value::Null,
            Err(result) => return result,
        };

        match runtime.block_on(OPERATION, runtime.app.intercept(Intent::new(name, payload))) {
            Ok(intercepted) => json_success(OPERATION, &intercepted),
            Err(result) => result,
        }
    })
}

#[unsafe(no_mangle)]
/// Report connectivity. Going from offline to online drains the queue
/// through the dispatch callback before returning.
///
/// # Safety
/// - `runtime` must be a live pointer previously returned by `fieldsync_runtime_new`.
/// - Must not be called from inside the dispatch callback (returns `REENTRANT_CALL`).
pub unsafe extern "C" fn fieldsync_set_online(
    runtime: *mut FieldsyncRuntime,
    online: bool,
) -> FieldsyncFfiResult {
    const OPERATION: &str = "connectivity.set";

    guarded(OPERATION, || {
        let runtime = match runtime_from_ptr(runtime, OPERATION) {
            Ok(runtime) => runtime,
            Err(result) => return result,
        };
        let change = runtime.block_on(
            OPERATION,
            runtime
                .app
                .set_connectivity(Connectivity::from_online(online)),
        );
        match change {
            Ok(change) => json_success(OPERATION, &change),
            Err(result) => result,
        }
    })
}

#[unsafe(no_mangle)]
/// Run a drain pass now and return the outcome as JSON.
///
/// # Safety
/// - `runtime` must be a live pointer previously returned by `fieldsync_runtime_new`.
/// - Must not be called from inside the dispatch callback (returns `REENTRANT_CALL`).
pub unsafe extern "C" fn fieldsync_drain(runtime: *mut FieldsyncRuntime) -> FieldsyncFfiResult {
    const OPERATION: &str = "queue.drain";

    guarded(OPERATION, || {
        let runtime = match runtime_from_ptr(runtime, OPERATION) {
            Ok(runtime) => runtime,
            Err(result) => return result,
        };
        match runtime.block_on(OPERATION, runtime.app.drain()) {
            Ok(outcome) => json_success(OPERATION, &outcome),
            Err(result) => result,
        }
    })
}

#[unsafe(no_mangle)]
/// Wait until every cache write scheduled so far has been applied.
///
/// # Safety
/// - `runtime` must be a live pointer previously returned by `fieldsync_runtime_new`.
/// - Must not be called from inside the dispatch callback (returns `REENTRANT_CALL`).
pub unsafe extern "C" fn fieldsync_flush(runtime: *mut FieldsyncRuntime) -> FieldsyncFfiResult {
    const OPERATION: &str = "cache.flush";

    guarded(OPERATION, || {
        let runtime = match runtime_from_ptr(runtime, OPERATION) {
            Ok(runtime) => runtime,
            Err(result) => return result,
        };
        match runtime.block_on(OPERATION, runtime.app.flush()) {
            Ok(Ok(())) => FieldsyncFfiResult::ok_empty(),
            Ok(Err(err)) => FieldsyncFfiResult::runtime_error(OPERATION, &err),
            Err(result) => result,
        }
    })
}

#[unsafe(no_mangle)]
/// Read a cache entry as JSON; `null` when the key has never been written.
///
/// # Safety
/// - `runtime` must be a live pointer previously returned by `fieldsync_runtime_new`.
/// - `key` must be a valid NUL-terminated UTF-8 string.
/// - Must not be called from inside the dispatch callback (returns `REENTRANT_CALL`).
pub unsafe extern "C" fn fieldsync_cache_get(
    runtime: *mut FieldsyncRuntime,
    key: *const c_char,
) -> FieldsyncFfiResult {
    const OPERATION: &str = "cache.get";

    guarded(OPERATION, || {
        let runtime = match runtime_from_ptr(runtime, OPERATION) {
            Ok(runtime) => runtime,
            Err(result) => return result,
        };
        let key = match parse_required_c_string(key, OPERATION, "key") {
            Ok(value) => value,
            Err(result) => return result,
        };
        match runtime.block_on(OPERATION, runtime.app.cached(key)) {
            Ok(Ok(entry)) => json_success(OPERATION, &entry),
            Ok(Err(err)) => FieldsyncFfiResult::runtime_error(OPERATION, &err),
            Err(result) => result,
        }
    })
}

#[unsafe(no_mangle)]
/// List pending queue entries in replay order as JSON.
///
/// # Safety
/// - `runtime` must be a live pointer previously returned by `fieldsync_runtime_new`.
/// - Must not be called from inside the dispatch callback (returns `REENTRANT_CALL`).
pub unsafe extern "C" fn fieldsync_queue_list(
    runtime: *mut FieldsyncRuntime,
) -> FieldsyncFfiResult {
    const OPERATION: &str = "queue.list";

    guarded(OPERATION, || {
        let runtime = match runtime_from_ptr(runtime, OPERATION) {
            Ok(runtime) => runtime,
            Err(result) => return result,
        };
        match runtime.block_on(OPERATION, runtime.app.pending()) {
            Ok(Ok(entries)) => json_success(OPERATION, &entries),
            Ok(Err(err)) => FieldsyncFfiResult::runtime_error(OPERATION, &err),
            Err(result) => result,
        }
    })
}

#[unsafe(no_mangle)]
/// Return every notice (persistence failures, abandoned intents) raised since
/// the previous call, as a JSON array. Safe to call from the dispatch callback.
///
/// # Safety
/// - `runtime` must be a live pointer previously returned by `fieldsync_runtime_new`.
pub unsafe extern "C" fn fieldsync_take_notices(
    runtime: *mut FieldsyncRuntime,
) -> FieldsyncFfiResult {
    const OPERATION: &str = "notices.take";

    guarded(OPERATION, || {
        let runtime = match runtime_from_ptr(runtime, OPERATION) {
            Ok(runtime) => runtime,
            Err(result) => return result,
        };
        let Ok(mut receiver) = runtime.notices.lock() else {
            return FieldsyncFfiResult::internal_error(OPERATION, "notice receiver poisoned");
        };
        let mut notices = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(notice) => notices.push(notice),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        json_success(OPERATION, &notices)
    })
}

#[unsafe(no_mangle)]
/// Destroy a runtime previously created by `fieldsync_runtime_new`.
///
/// A call made from inside the dispatch callback is ignored and the handle
/// stays live.
///
/// # Safety
/// - `runtime` must be null or a pointer returned by `fieldsync_runtime_new`.
/// - The pointer must be freed exactly once.
pub unsafe extern "C" fn fieldsync_runtime_free(runtime: *mut FieldsyncRuntime) {
    if runtime.is_null() || tokio::runtime::Handle::try_current().is_ok() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: pointer was produced by `Box::into_raw` in `fieldsync_runtime_new`.
        unsafe {
            drop(Box::from_raw(runtime));
        }
    }));
}

#[unsafe(no_mangle)]
/// Free JSON/byte payload memory returned by FFI calls.
///
/// # Safety
/// - `bytes` must be a value returned by this crate.
/// - The value must be freed exactly once.
pub unsafe extern "C" fn fieldsync_owned_bytes_free(bytes: FieldsyncOwnedBytes) {
    if bytes.ptr.is_null() || bytes.len == 0 {
        return;
    }
    // SAFETY: pointer/len come from `FieldsyncOwnedBytes::from_vec`, which uses `Box<[u8]>`.
    unsafe {
        let slice_ptr = ptr::slice_from_raw_parts_mut(bytes.ptr, bytes.len);
        drop(Box::from_raw(slice_ptr));
    }
}

/// Runs an export body, turning a panic into an error envelope instead of
/// unwinding into the host.
fn guarded(
    operation: &'static str,
    body: impl FnOnce() -> FieldsyncFfiResult,
) -> FieldsyncFfiResult {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|message| (*message).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            FieldsyncFfiResult::internal_error(operation, format!("panicked: {detail}"))
        }
    }
}

/// Non-null, non-empty string, returned exactly as the host passed it.
fn parse_required_c_string<'a>(
    raw: *const c_char,
    operation: &'static str,
    field: &'static str,
) -> std::result::Result<&'a str, FieldsyncFfiResult> {
    match parse_optional_c_string(raw, operation, field)? {
        Some(value) => Ok(value),
        None if raw.is_null() => Err(FieldsyncFfiResult::invalid_argument(
            operation,
            format!("{field} pointer is null"),
        )),
        None => Err(FieldsyncFfiResult::invalid_argument(
            operation,
            format!("{field} must be non-empty"),
        )),
    }
}

/// `None` for null or whitespace-only input; otherwise the untrimmed string.
fn parse_optional_c_string<'a>(
    raw: *const c_char,
    operation: &'static str,
    field: &'static str,
) -> std::result::Result<Option<&'a str>, FieldsyncFfiResult> {
    if raw.is_null() {
        return Ok(None);
    }

    // SAFETY: `raw` is non-null and expected to be a NUL-terminated C string
    // that outlives the export call.
    let c_str = unsafe { CStr::from_ptr(raw) };
    let value = c_str.to_str().map_err(|err| {
        FieldsyncFfiResult::invalid_argument(operation, format!("{field} must be valid UTF-8: {err}"))
    })?;
    if value.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(value))
}

fn runtime_from_ptr<'a>(
    runtime: *mut FieldsyncRuntime,
    operation: &'static str,
) -> std::result::Result<&'a FieldsyncRuntime, FieldsyncFfiResult> {
    if runtime.is_null() {
        return Err(FieldsyncFfiResult::invalid_argument(
            operation,
            "runtime pointer is null",
        ));
    }
    // SAFETY: pointer null-check is performed above; caller owns lifecycle.
    // Only shared access is handed out, so a re-entrant call never aliases a
    // unique borrow.
    Ok(unsafe { &*runtime })
}

fn json_success(operation: &'static str, payload: &impl Serialize) -> FieldsyncFfiResult {
    match serde_json::to_vec(payload) {
        Ok(payload) => FieldsyncFfiResult::ok_json_bytes(payload),
        Err(err) => FieldsyncFfiResult::internal_error(
            operation,
            format!("json encode failed for {operation}: {err}"),
        ),
    }
}
