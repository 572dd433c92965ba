//! Native camera library loaded at runtime with `libloading`.
//!
//! Every export is resolved once in [`NativeCameraSdk::load`] and stored as
//! an `Option` of a plain function pointer.  A missing export is not an
//! error: the matching bridge call returns [`ResultCode::UNAVAILABLE`] and the
//! capability bit stays clear.
//!
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

use std::ffi::{c_char, c_int, c_uint, c_void};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, error, info, warn};

use super::text::{from_wide, to_narrow, WideChar};
use super::{
    fallback_error_name, CameraSdk, Capabilities, DeviceHandle, ResultCode, RuntimeDiag,
    SavedImage, SdkLoadError, StatusBits, USB_SERIAL_LEN,
};

type InitFn = unsafe extern "C" fn() -> c_int;
type ReleaseFn = unsafe extern "C" fn();
type ConnectFirstFn = unsafe extern "C" fn(*mut *mut c_void) -> c_int;
type ConnectUsbSerialFn = unsafe extern "C" fn(*const c_char, *mut *mut c_void) -> c_int;
type DisconnectFn = unsafe extern "C" fn(*mut c_void);
type EnableLiveViewFn = unsafe extern "C" fn(*mut c_void, c_int) -> c_int;
type LiveViewInfoFn = unsafe extern "C" fn(*mut c_void, *mut c_uint) -> c_int;
type LiveViewImageFn = unsafe extern "C" fn(*mut c_void, *mut c_void, c_uint, *mut c_uint) -> c_int;
type HandleCommandFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type ShootOneFn = unsafe extern "C" fn(*mut c_void, c_int) -> c_int;
type SetSaveInfoFn = unsafe extern "C" fn(*mut c_void, c_int, *const c_char, *const c_char) -> c_int;
type SetDownloadDirFn = unsafe extern "C" fn(*const c_char) -> c_int;
type LastSavedJpegFn = unsafe extern "C" fn(*mut c_void, *mut WideChar, c_uint) -> c_int;
type SetDebugFn = unsafe extern "C" fn(c_int);
type StatusFn = unsafe extern "C" fn(*mut c_void) -> c_uint;
type DiagRuntimeFn = unsafe extern "C" fn(*mut WideChar, c_uint) -> c_uint;
type ErrorNameFn = unsafe extern "C" fn(c_int, *mut WideChar, c_uint) -> c_int;

/// Wide buffer length for paths returned by the library.
const PATH_CCH: usize = 1024;
/// Wide buffer length for short diagnostic strings.
const TEXT_CCH: usize = 256;

/// Resolved entry points.  `None` means the export is missing.
#[derive(Default)]
struct Api {
    init: Option<InitFn>,
    release: Option<ReleaseFn>,
    connect_first: Option<ConnectFirstFn>,
    connect_usb_serial: Option<ConnectUsbSerialFn>,
    disconnect: Option<DisconnectFn>,
    enable_liveview: Option<EnableLiveViewFn>,
    lv_info: Option<LiveViewInfoFn>,
    lv_image: Option<LiveViewImageFn>,
    shoot_one: Option<ShootOneFn>,
    one_shot_af: Option<HandleCommandFn>,
    one_shot_awb: Option<HandleCommandFn>,
    set_save_info: Option<SetSaveInfoFn>,
    set_download_dir: Option<SetDownloadDirFn>,
    last_saved_jpeg: Option<LastSavedJpegFn>,
    set_debug: Option<SetDebugFn>,
    status: Option<StatusFn>,
    last_cb_error: Option<HandleCommandFn>,
    diag_runtime: Option<DiagRuntimeFn>,
    error_name: Option<ErrorNameFn>,
}

impl Api {
    /// # Safety
    ///
    /// Each export must have the C signature of the corresponding field.
    unsafe fn resolve(lib: &Library) -> Self {
        Self {
            init: symbol(lib, "crsdk_init"),
            release: symbol(lib, "crsdk_release"),
            connect_first: symbol(lib, "crsdk_connect_first"),
            connect_usb_serial: symbol(lib, "crsdk_connect_usb_serial"),
            disconnect: symbol(lib, "crsdk_disconnect"),
            enable_liveview: symbol(lib, "crsdk_enable_liveview"),
            lv_info: symbol(lib, "crsdk_get_lv_info"),
            lv_image: symbol(lib, "crsdk_get_lv_image"),
            shoot_one: symbol(lib, "crsdk_shoot_one"),
            one_shot_af: symbol(lib, "crsdk_one_shot_af"),
            one_shot_awb: symbol(lib, "crsdk_one_shot_awb"),
            set_save_info: symbol(lib, "crsdk_set_save_info"),
            set_download_dir: symbol(lib, "crsdk_set_download_dir"),
            last_saved_jpeg: symbol(lib, "crsdk_get_last_saved_jpeg"),
            set_debug: symbol(lib, "crsdk_set_debug"),
            status: symbol(lib, "crsdk_status"),
            last_cb_error: symbol(lib, "crsdk_last_cb_error"),
            diag_runtime: symbol(lib, "crsdk_diag_runtime"),
            error_name: symbol(lib, "crsdk_error_name"),
        }
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        caps.set(
            Capabilities::CONNECT,
            self.init.is_some() && self.connect_first.is_some() && self.disconnect.is_some(),
        );
        caps.set(
            Capabilities::LIVEVIEW,
            self.enable_liveview.is_some() && self.lv_info.is_some() && self.lv_image.is_some(),
        );
        caps.set(Capabilities::USB_SERIAL_CONNECT, self.connect_usb_serial.is_some());
        caps.set(Capabilities::SAVE_INFO, self.set_save_info.is_some());
        caps.set(Capabilities::DOWNLOAD_DIR, self.set_download_dir.is_some());
        caps.set(Capabilities::CAPTURE, self.shoot_one.is_some());
        caps.set(Capabilities::AUTO_FOCUS, self.one_shot_af.is_some());
        caps.set(Capabilities::AUTO_WHITE_BALANCE, self.one_shot_awb.is_some());
        caps.set(Capabilities::LAST_SAVED_JPEG, self.last_saved_jpeg.is_some());
        caps.set(Capabilities::STATUS, self.status.is_some());
        caps.set(Capabilities::LAST_CB_ERROR, self.last_cb_error.is_some());
        caps.set(Capabilities::DIAG_RUNTIME, self.diag_runtime.is_some());
        caps.set(Capabilities::ERROR_NAME, self.error_name.is_some());
        caps.set(Capabilities::SET_DEBUG, self.set_debug.is_some());
        caps
    }
}

/// Looks up `name` and copies out the function pointer.
///
/// # Safety
///
/// `T` must be the exact function-pointer type of the export.
unsafe fn symbol<T: Copy>(lib: &Library, name: &str) -> Option<T> {
    match lib.get::<T>(name.as_bytes()) {
        Ok(sym) => Some(*sym),
        Err(e) => {
            debug!(symbol = name, "export not found: {e}");
            None
        }
    }
}

/// The vendor camera library, dynamically loaded.
pub struct NativeCameraSdk {
    api: Api,
    caps: Capabilities,
    path: PathBuf,
    // Keeps every pointer in `api` valid.  Dropped last.  `None` only when
    // the entry points are statically linked functions.
    _lib: Option<Library>,
}

impl NativeCameraSdk {
    /// Loads the library at `path` and resolves its exports.
    ///
    /// Missing exports are tolerated and reflected in
    /// [`CameraSdk::capabilities`].
    ///
    /// # Errors
    ///
    /// Returns [`SdkLoadError::Open`] if the shared object cannot be opened.
    pub fn load(path: &Path) -> Result<Self, SdkLoadError> {
        // SAFETY: opening the library runs its initialisers.  The path comes
        // from the user's configuration and names the vendor bridge.
        let lib = unsafe { Library::new(path) }.map_err(|source| SdkLoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        // SAFETY: the type aliases above mirror the bridge's exported C API.
        let api = unsafe { Api::resolve(&lib) };
        let sdk = Self::from_api(api, path.to_path_buf(), Some(lib));

        if !sdk.caps.contains(Capabilities::CONNECT | Capabilities::LIVEVIEW) {
            warn!(
                path = %path.display(),
                capabilities = ?sdk.caps,
                "camera library is missing core exports; affected calls will report Unavailable"
            );
        }
        info!(path = %path.display(), capabilities = ?sdk.caps, "camera library loaded");
        Ok(sdk)
    }

    /// Wraps resolved entry points.  `lib` must own every pointer in `api`
    /// unless they point at functions linked into this binary.
    fn from_api(api: Api, path: PathBuf, lib: Option<Library>) -> Self {
        Self {
            caps: api.capabilities(),
            api,
            path,
            _lib: lib,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, call: &'static str) -> ResultCode {
        debug!(call, "export not available");
        ResultCode::UNAVAILABLE
    }

    /// Logs non-OK codes with their resolved name.
    fn checked(&self, call: &'static str, rc: ResultCode) -> ResultCode {
        if !rc.is_ok() {
            debug!(call, code = rc.0, name = %self.error_name(rc), "camera call failed");
        }
        rc
    }

    fn connect_with(&self, call: &'static str, f: impl FnOnce(*mut *mut c_void) -> c_int) -> (ResultCode, Option<DeviceHandle>) {
        let mut raw: *mut c_void = std::ptr::null_mut();
        let rc = self.checked(call, ResultCode(f(&mut raw)));
        if !rc.is_ok() {
            return (rc, None);
        }
        match DeviceHandle::from_raw(raw) {
            Some(handle) => (ResultCode::OK, Some(handle)),
            None => {
                warn!(call, "library reported success without a device handle");
                (ResultCode::NO_DEVICE, None)
            }
        }
    }
}

impl CameraSdk for NativeCameraSdk {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn set_debug(&self, on: bool) {
        if let Some(f) = self.api.set_debug {
            // SAFETY: takes a plain int flag.
            unsafe { f(c_int::from(on)) }
        }
    }

    fn initialize(&self) -> ResultCode {
        let Some(f) = self.api.init else {
            return self.unavailable("crsdk_init");
        };
        // SAFETY: no arguments; may be called before any connect.
        self.checked("crsdk_init", ResultCode(unsafe { f() }))
    }

    fn shutdown(&self) {
        if let Some(f) = self.api.release {
            // SAFETY: called once after every handle is disconnected.
            unsafe { f() }
        }
    }

    fn connect_first(&self) -> (ResultCode, Option<DeviceHandle>) {
        let Some(f) = self.api.connect_first else {
            return (self.unavailable("crsdk_connect_first"), None);
        };
        // SAFETY: `out` points at a local the library writes the handle into.
        self.connect_with("crsdk_connect_first", |out| unsafe { f(out) })
    }

    fn connect_usb_serial(&self, serial: &str) -> (ResultCode, Option<DeviceHandle>) {
        let Some(f) = self.api.connect_usb_serial else {
            return (self.unavailable("crsdk_connect_usb_serial"), None);
        };
        if serial.len() != USB_SERIAL_LEN || !serial.is_ascii() {
            return (self.checked("crsdk_connect_usb_serial", ResultCode::INVALID_ARGUMENT), None);
        }
        let Ok(serial) = to_narrow(serial) else {
            return (ResultCode::INVALID_ARGUMENT, None);
        };
        // SAFETY: `serial` is a NUL-terminated 12-byte ASCII string that
        // outlives the call; `out` points at a local.
        self.connect_with("crsdk_connect_usb_serial", |out| unsafe { f(serial.as_ptr(), out) })
    }

    fn disconnect(&self, handle: DeviceHandle) {
        match self.api.disconnect {
            // SAFETY: `handle` came from a connect call and is consumed here,
            // so it is never passed to the library again.
            Some(f) => unsafe { f(handle.as_ptr()) },
            None => {
                self.unavailable("crsdk_disconnect");
            }
        }
    }

    fn set_save_info(&self, handle: &DeviceHandle, mode: i32, dir: &str, name: &str) -> ResultCode {
        let Some(f) = self.api.set_save_info else {
            return self.unavailable("crsdk_set_save_info");
        };
        let (dir, name) = match (to_narrow(dir), to_narrow(name)) {
            (Ok(d), Ok(n)) => (d, n),
            (Err(e), _) | (_, Err(e)) => {
                warn!("save target cannot be passed to the camera library: {e}");
                return ResultCode::INVALID_ARGUMENT;
            }
        };
        // SAFETY: both strings are NUL-terminated and live across the call.
        let rc = unsafe { f(handle.as_ptr(), mode, dir.as_ptr(), name.as_ptr()) };
        self.checked("crsdk_set_save_info", ResultCode(rc))
    }

    fn set_download_dir(&self, dir: &str) -> ResultCode {
        let Some(f) = self.api.set_download_dir else {
            return self.unavailable("crsdk_set_download_dir");
        };
        let dir = match to_narrow(dir) {
            Ok(d) => d,
            Err(e) => {
                warn!("download directory cannot be passed to the camera library: {e}");
                return ResultCode::INVALID_ARGUMENT;
            }
        };
        // SAFETY: `dir` is NUL-terminated; the library copies it.
        self.checked("crsdk_set_download_dir", ResultCode(unsafe { f(dir.as_ptr()) }))
    }

    fn enable_liveview(&self, handle: &DeviceHandle, on: bool) -> ResultCode {
        let Some(f) = self.api.enable_liveview else {
            return self.unavailable("crsdk_enable_liveview");
        };
        // SAFETY: valid handle, plain int flag.
        let rc = unsafe { f(handle.as_ptr(), c_int::from(on)) };
        self.checked("crsdk_enable_liveview", ResultCode(rc))
    }

    fn query_frame_size(&self, handle: &DeviceHandle) -> usize {
        let Some(f) = self.api.lv_info else {
            self.unavailable("crsdk_get_lv_info");
            return 0;
        };
        let mut nbytes: c_uint = 0;
        // SAFETY: `nbytes` is a valid out-pointer for the duration of the call.
        let rc = ResultCode(unsafe { f(handle.as_ptr(), &mut nbytes) });
        if self.checked("crsdk_get_lv_info", rc).is_ok() {
            nbytes as usize
        } else {
            0
        }
    }

    fn fetch_frame(&self, handle: &DeviceHandle, buf: &mut [u8]) -> (ResultCode, usize) {
        let (Some(info), Some(image)) = (self.api.lv_info, self.api.lv_image) else {
            return (self.unavailable("crsdk_get_lv_image"), 0);
        };
        let Ok(capacity) = c_uint::try_from(buf.len()) else {
            return (ResultCode::INVALID_ARGUMENT, 0);
        };
        if capacity == 0 {
            return (self.checked("crsdk_get_lv_image", ResultCode::INVALID_ARGUMENT), 0);
        }

        let mut required: c_uint = 0;
        // SAFETY: `required` is a valid out-pointer.
        let rc = self.checked("crsdk_get_lv_info", ResultCode(unsafe { info(handle.as_ptr(), &mut required) }));
        if !rc.is_ok() {
            return (rc, 0);
        }
        if required > capacity {
            debug!(required, capacity, "destination smaller than frame requirement");
            return (ResultCode::BUFFER_TOO_SMALL, 0);
        }

        let mut used: c_uint = 0;
        // SAFETY: `buf` is writable for `capacity` bytes and the library
        // writes at most that many; `used` is a valid out-pointer.
        let rc = unsafe { image(handle.as_ptr(), buf.as_mut_ptr().cast(), capacity, &mut used) };
        let rc = self.checked("crsdk_get_lv_image", ResultCode(rc));
        if !rc.is_ok() {
            return (rc, 0);
        }
        if used > capacity {
            error!(used, capacity, "camera library reported more bytes than the buffer holds");
            return (ResultCode::BUFFER_TOO_SMALL, 0);
        }
        (ResultCode::OK, used as usize)
    }

    fn trigger_capture(&self, handle: &DeviceHandle) -> ResultCode {
        let Some(f) = self.api.shoot_one else {
            return self.unavailable("crsdk_shoot_one");
        };
        // SAFETY: valid handle; the second argument is "save to host".
        self.checked("crsdk_shoot_one", ResultCode(unsafe { f(handle.as_ptr(), 1) }))
    }

    fn auto_focus(&self, handle: &DeviceHandle) -> ResultCode {
        let Some(f) = self.api.one_shot_af else {
            return self.unavailable("crsdk_one_shot_af");
        };
        // SAFETY: valid handle.
        self.checked("crsdk_one_shot_af", ResultCode(unsafe { f(handle.as_ptr()) }))
    }

    fn auto_white_balance(&self, handle: &DeviceHandle) -> ResultCode {
        let Some(f) = self.api.one_shot_awb else {
            debug!(call = "crsdk_one_shot_awb", "export not available");
            return ResultCode::UNSUPPORTED;
        };
        // SAFETY: valid handle.
        self.checked("crsdk_one_shot_awb", ResultCode(unsafe { f(handle.as_ptr()) }))
    }

    fn last_saved_jpeg(&self, handle: &DeviceHandle) -> (ResultCode, Option<SavedImage>) {
        let Some(f) = self.api.last_saved_jpeg else {
            return (self.unavailable("crsdk_get_last_saved_jpeg"), None);
        };
        let mut buf: Vec<WideChar> = vec![0; PATH_CCH];
        // SAFETY: `buf` holds PATH_CCH wide chars and the library truncates
        // to that length.
        let rc = unsafe { f(handle.as_ptr(), buf.as_mut_ptr(), PATH_CCH as c_uint) };
        let rc = self.checked("crsdk_get_last_saved_jpeg", ResultCode(rc));
        let path = from_wide(&buf);
        if !rc.is_ok() || path.is_empty() {
            return (rc, None);
        }
        (rc, Some(SavedImage { path: PathBuf::from(path) }))
    }

    fn status(&self, handle: &DeviceHandle) -> StatusBits {
        match self.api.status {
            // SAFETY: valid handle.
            Some(f) => StatusBits::from_bits_truncate(unsafe { f(handle.as_ptr()) }),
            None => StatusBits::empty(),
        }
    }

    fn last_callback_error(&self, handle: &DeviceHandle) -> ResultCode {
        match self.api.last_cb_error {
            // SAFETY: valid handle.
            Some(f) => ResultCode(unsafe { f(handle.as_ptr()) }),
            None => self.unavailable("crsdk_last_cb_error"),
        }
    }

    fn diag_runtime(&self) -> Option<RuntimeDiag> {
        let f = self.api.diag_runtime?;
        let mut buf: Vec<WideChar> = vec![0; TEXT_CCH];
        // SAFETY: `buf` holds TEXT_CCH wide chars.
        let missing_mask = unsafe { f(buf.as_mut_ptr(), TEXT_CCH as c_uint) };
        Some(RuntimeDiag {
            missing_mask,
            text: from_wide(&buf),
        })
    }

    fn error_name(&self, code: ResultCode) -> String {
        if let Some(f) = self.api.error_name {
            let mut buf: Vec<WideChar> = vec![0; TEXT_CCH];
            // SAFETY: `buf` holds TEXT_CCH wide chars.
            let rc = unsafe { f(code.0, buf.as_mut_ptr(), TEXT_CCH as c_uint) };
            let name = from_wide(&buf);
            if rc == 0 && !name.is_empty() {
                return name;
            }
        }
        fallback_error_name(code)
    }
}
