//! Scriptable in-process camera for tests and the `--mock` preview mode.
//!
//! Behaves like the native bridge from the caller's point of view: the same
//! result codes, the same two-step frame protocol, and the same "missing
//! export" degradation when a capability is switched off.  Frames are
//! synthetic JPEG-shaped byte strings (SOI marker, filler, EOI marker).

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use studio_core::frame::jpeg::{EOI, SOI};
use tracing::trace;

use super::{
    fallback_error_name, CameraSdk, Capabilities, DeviceHandle, ResultCode, RuntimeDiag,
    SavedImage, StatusBits, USB_SERIAL_LEN,
};

/// Default size of a synthetic frame.
pub const DEFAULT_FRAME_LEN: usize = 4096;

#[derive(Debug, Default)]
struct MockState {
    initialized: bool,
    connected: Option<usize>,
    next_token: usize,
    liveview: bool,
    frame_len: usize,
    frame_bytes: Option<Vec<u8>>,
    leading_padding: usize,
    not_ready_polls: u32,
    fetch_latency: Duration,
    connect_result: Option<ResultCode>,
    usb_serial: Option<String>,
    save_info: Option<(i32, String, String)>,
    download_dir: Option<String>,
    frames_served: u64,
    captures: u32,
    queries: u64,
    fetches: u64,
    enable_calls: u32,
    calls: Vec<&'static str>,
}

/// A fake camera implementing [`CameraSdk`].
///
/// # Example
///
/// ```rust
/// use studio_camera::infrastructure::sdk::{mock::MockCameraSdk, CameraSdk};
///
/// let sdk = MockCameraSdk::new();
/// assert!(sdk.initialize().is_ok());
/// let (rc, handle) = sdk.connect_first();
/// assert!(rc.is_ok());
/// sdk.disconnect(handle.unwrap());
/// ```
pub struct MockCameraSdk {
    caps: Capabilities,
    state: Mutex<MockState>,
}

impl MockCameraSdk {
    /// A camera exporting every capability.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::all())
    }

    /// A camera whose library only exports `caps`.
    pub fn with_capabilities(caps: Capabilities) -> Self {
        Self {
            caps,
            state: Mutex::new(MockState {
                next_token: 0x1000,
                frame_len: DEFAULT_FRAME_LEN,
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has(&self, cap: Capabilities) -> bool {
        self.caps.contains(cap)
    }

    // ── Scripting ─────────────────────────────────────────────────────────────

    /// Size of every subsequent frame, including padding and markers.
    pub fn set_frame_len(&self, len: usize) {
        self.state().frame_len = len;
    }

    /// Serves `bytes` verbatim (after any padding) instead of synthetic
    /// frames.  Overrides [`MockCameraSdk::set_frame_len`].
    pub fn set_frame_bytes(&self, bytes: Vec<u8>) {
        self.state().frame_bytes = Some(bytes);
    }

    /// Bytes of zero padding placed before the SOI marker.
    pub fn set_leading_padding(&self, len: usize) {
        self.state().leading_padding = len;
    }

    /// The next `polls` size queries report 0 ("not ready").
    pub fn set_not_ready_polls(&self, polls: u32) {
        self.state().not_ready_polls = polls;
    }

    /// Time each `fetch_frame` call takes.
    pub fn set_fetch_latency(&self, latency: Duration) {
        self.state().fetch_latency = latency;
    }

    /// Makes both connect calls fail with `rc`.
    pub fn fail_connect_with(&self, rc: ResultCode) {
        self.state().connect_result = Some(rc);
    }

    /// Serial number `connect_usb_serial` accepts.
    pub fn set_usb_serial(&self, serial: impl Into<String>) {
        self.state().usb_serial = Some(serial.into());
    }

    // ── Observation ───────────────────────────────────────────────────────────

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected.is_some()
    }

    pub fn liveview_enabled(&self) -> bool {
        self.state().liveview
    }

    pub fn fetch_count(&self) -> u64 {
        self.state().fetches
    }

    pub fn query_count(&self) -> u64 {
        self.state().queries
    }

    /// Number of `enable_liveview(on = true)` calls.
    pub fn enable_calls(&self) -> u32 {
        self.state().enable_calls
    }

    pub fn save_info(&self) -> Option<(i32, String, String)> {
        self.state().save_info.clone()
    }

    pub fn download_dir(&self) -> Option<String> {
        self.state().download_dir.clone()
    }

    /// Names of lifecycle calls in the order they happened.
    pub fn call_log(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn is_current(state: &MockState, handle: &DeviceHandle) -> bool {
        state.connected == Some(handle.id())
    }

    fn connect(&self, call: &'static str) -> (ResultCode, Option<DeviceHandle>) {
        let mut state = self.state();
        state.calls.push(call);
        if !state.initialized {
            return (ResultCode::UNAVAILABLE, None);
        }
        if let Some(rc) = state.connect_result {
            return (rc, None);
        }
        let token = state.next_token;
        state.next_token += 0x10;
        state.connected = Some(token);
        (ResultCode::OK, DeviceHandle::from_token(token))
    }

    fn required_len(state: &MockState) -> usize {
        if !state.liveview || state.not_ready_polls > 0 {
            return 0;
        }
        match &state.frame_bytes {
            Some(bytes) => state.leading_padding + bytes.len(),
            None => state.frame_len,
        }
    }

    fn write_frame(state: &MockState, out: &mut [u8]) {
        let len = out.len();
        let pad = state.leading_padding.min(len);
        out[..pad].fill(0);
        let body = &mut out[pad..];
        if let Some(bytes) = &state.frame_bytes {
            let n = bytes.len().min(body.len());
            body[..n].copy_from_slice(&bytes[..n]);
            return;
        }
        if body.len() < SOI.len() + EOI.len() {
            body.fill(0);
            return;
        }
        let filler = (state.frames_served % 200) as u8;
        let end = body.len() - EOI.len();
        body[..SOI.len()].copy_from_slice(&SOI);
        body[SOI.len()..end].fill(filler);
        body[end..].copy_from_slice(&EOI);
    }
}

impl Default for MockCameraSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraSdk for MockCameraSdk {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn set_debug(&self, on: bool) {
        trace!(on, "mock set_debug");
    }

    fn initialize(&self) -> ResultCode {
        if !self.has(Capabilities::CONNECT) {
            return ResultCode::UNAVAILABLE;
        }
        let mut state = self.state();
        state.calls.push("initialize");
        state.initialized = true;
        ResultCode::OK
    }

    fn shutdown(&self) {
        let mut state = self.state();
        state.calls.push("shutdown");
        state.initialized = false;
    }

    fn connect_first(&self) -> (ResultCode, Option<DeviceHandle>) {
        if !self.has(Capabilities::CONNECT) {
            return (ResultCode::UNAVAILABLE, None);
        }
        self.connect("connect_first")
    }

    fn connect_usb_serial(&self, serial: &str) -> (ResultCode, Option<DeviceHandle>) {
        if !self.has(Capabilities::USB_SERIAL_CONNECT) {
            return (ResultCode::UNAVAILABLE, None);
        }
        if serial.len() != USB_SERIAL_LEN || !serial.is_ascii() {
            return (ResultCode::INVALID_ARGUMENT, None);
        }
        let matches = self.state().usb_serial.as_deref() == Some(serial);
        if !matches {
            self.state().calls.push("connect_usb_serial");
            return (ResultCode::NO_DEVICE, None);
        }
        self.connect("connect_usb_serial")
    }

    fn disconnect(&self, handle: DeviceHandle) {
        let mut state = self.state();
        state.calls.push("disconnect");
        if Self::is_current(&state, &handle) {
            state.connected = None;
            state.liveview = false;
        }
    }

    fn set_save_info(&self, handle: &DeviceHandle, mode: i32, dir: &str, name: &str) -> ResultCode {
        if !self.has(Capabilities::SAVE_INFO) {
            return ResultCode::UNAVAILABLE;
        }
        let mut state = self.state();
        if !Self::is_current(&state, handle) {
            return ResultCode::INVALID_ARGUMENT;
        }
        state.save_info = Some((mode, dir.to_string(), name.to_string()));
        ResultCode::OK
    }

    fn set_download_dir(&self, dir: &str) -> ResultCode {
        if !self.has(Capabilities::DOWNLOAD_DIR) {
            return ResultCode::UNAVAILABLE;
        }
        self.state().download_dir = Some(dir.trim_end_matches(['\\', '/']).to_string());
        ResultCode::OK
    }

    fn enable_liveview(&self, handle: &DeviceHandle, on: bool) -> ResultCode {
        if !self.has(Capabilities::LIVEVIEW) {
            return ResultCode::UNAVAILABLE;
        }
        let mut state = self.state();
        if !Self::is_current(&state, handle) {
            return ResultCode::INVALID_ARGUMENT;
        }
        state.calls.push(if on { "liveview_on" } else { "liveview_off" });
        if on {
            state.enable_calls += 1;
        }
        state.liveview = on;
        ResultCode::OK
    }

    fn query_frame_size(&self, handle: &DeviceHandle) -> usize {
        if !self.has(Capabilities::LIVEVIEW) {
            return 0;
        }
        let mut state = self.state();
        if !Self::is_current(&state, handle) {
            return 0;
        }
        state.queries += 1;
        if state.liveview && state.not_ready_polls > 0 {
            state.not_ready_polls -= 1;
            return 0;
        }
        Self::required_len(&state)
    }

    fn fetch_frame(&self, handle: &DeviceHandle, buf: &mut [u8]) -> (ResultCode, usize) {
        if !self.has(Capabilities::LIVEVIEW) {
            return (ResultCode::UNAVAILABLE, 0);
        }
        if buf.is_empty() {
            return (ResultCode::INVALID_ARGUMENT, 0);
        }

        let latency = self.state().fetch_latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut state = self.state();
        if !Self::is_current(&state, handle) {
            return (ResultCode::INVALID_ARGUMENT, 0);
        }
        state.fetches += 1;
        let required = Self::required_len(&state);
        if required > buf.len() {
            return (ResultCode::BUFFER_TOO_SMALL, 0);
        }
        if required == 0 {
            return (ResultCode::OK, 0);
        }
        Self::write_frame(&state, &mut buf[..required]);
        state.frames_served += 1;
        (ResultCode::OK, required)
    }

    fn trigger_capture(&self, handle: &DeviceHandle) -> ResultCode {
        if !self.has(Capabilities::CAPTURE) {
            return ResultCode::UNAVAILABLE;
        }
        let mut state = self.state();
        if !Self::is_current(&state, handle) {
            return ResultCode::INVALID_ARGUMENT;
        }
        state.captures += 1;
        ResultCode::OK
    }

    fn auto_focus(&self, handle: &DeviceHandle) -> ResultCode {
        if !self.has(Capabilities::AUTO_FOCUS) {
            return ResultCode::UNAVAILABLE;
        }
        if !Self::is_current(&self.state(), handle) {
            return ResultCode::INVALID_ARGUMENT;
        }
        ResultCode::OK
    }

    fn auto_white_balance(&self, _handle: &DeviceHandle) -> ResultCode {
        // Mirrors the library build without a white-balance command.
        ResultCode::UNSUPPORTED
    }

    fn last_saved_jpeg(&self, handle: &DeviceHandle) -> (ResultCode, Option<SavedImage>) {
        if !self.has(Capabilities::LAST_SAVED_JPEG) {
            return (ResultCode::UNAVAILABLE, None);
        }
        let state = self.state();
        if !Self::is_current(&state, handle) {
            return (ResultCode::INVALID_ARGUMENT, None);
        }
        let Some(dir) = state.download_dir.as_deref() else {
            return (ResultCode::INVALID_ARGUMENT, None);
        };
        if state.captures == 0 {
            // The library reports 1 when the directory holds no JPEG yet.
            return (ResultCode(1), None);
        }
        let prefix = state
            .save_info
            .as_ref()
            .map(|(_, _, name)| name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("DSC");
        let path = PathBuf::from(dir).join(format!("{prefix}{:05}.JPG", state.captures));
        (ResultCode::OK, Some(SavedImage { path }))
    }

    fn status(&self, handle: &DeviceHandle) -> StatusBits {
        if !self.has(Capabilities::STATUS) {
            return StatusBits::empty();
        }
        let state = self.state();
        if !Self::is_current(&state, handle) {
            return StatusBits::empty();
        }
        let mut bits = StatusBits::DEVICE | StatusBits::CONNECTED;
        bits.set(StatusBits::LIVEVIEW, state.liveview);
        bits
    }

    fn last_callback_error(&self, _handle: &DeviceHandle) -> ResultCode {
        if !self.has(Capabilities::LAST_CB_ERROR) {
            return ResultCode::UNAVAILABLE;
        }
        ResultCode::OK
    }

    fn diag_runtime(&self) -> Option<RuntimeDiag> {
        self.has(Capabilities::DIAG_RUNTIME).then(|| RuntimeDiag {
            missing_mask: 0,
            text: "missing=none".to_string(),
        })
    }

    fn error_name(&self, code: ResultCode) -> String {
        fallback_error_name(code)
    }
}
