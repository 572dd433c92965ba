//! SDK bridge: the camera vendor library behind a Rust trait.
//!
//! The vendor library is a native shared object exporting a small C API
//! (`crsdk_*` functions).  This module turns that API into the [`CameraSdk`]
//! trait so the rest of the application never touches raw pointers.
//!
//! # Calling convention (for beginners)
//!
//! Every native call returns a small integer *result code*: `0` means success,
//! anything else is a library-specific failure.  The bridge keeps that
//! convention instead of converting to `Result`, because the caller, not the
//! bridge, decides whether a code is fatal.  [`ResultCode`] wraps the integer
//! and [`CameraSdk::error_name`] turns it into something a person can read.
//!
//! Bridge calls never panic and never return `Err`.  If the loaded library
//! does not export a function, the call does nothing and returns
//! [`ResultCode::UNAVAILABLE`].  The set of exported functions is probed once
//! at load time and published as [`Capabilities`].
//!
//! # Buffer protocol
//!
//! Frames are fetched in two steps: ask how many bytes the next frame needs
//! ([`CameraSdk::query_frame_size`]), then fetch into a buffer of at least that
//! size ([`CameraSdk::fetch_frame`]).  A size of zero means "not ready yet".
//!
//! # Implementations
//!
//! - [`native::NativeCameraSdk`] loads the real library with `libloading`.
//! - [`mock::MockCameraSdk`] is a scriptable in-process camera used by tests
//!   and by the binary's `--mock` mode.

use std::ffi::c_void;
use std::fmt;
use std::path::PathBuf;
use std::ptr::NonNull;

use bitflags::bitflags;
use thiserror::Error;

pub mod mock;
pub mod native;
pub mod text;

/// Save mode that stores captures on the host computer.
pub const SAVE_MODE_HOST: i32 = 2;

/// Length of a USB serial number accepted by the direct connect path.
pub const USB_SERIAL_LEN: usize = 12;

// ── Result codes ──────────────────────────────────────────────────────────────

/// Integer status returned by every bridge call.  `0` is success.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const OK: Self = Self(0);
    /// Enumeration found no camera.
    pub const NO_DEVICE: Self = Self(1);
    /// The library or the requested export is not available.
    pub const UNAVAILABLE: Self = Self(-1);
    /// Null handle, bad serial, or otherwise invalid argument.
    pub const INVALID_ARGUMENT: Self = Self(-2);
    /// The camera did not finish connecting in time.
    pub const WAIT_TIMEOUT: Self = Self(-3);
    /// The camera or library build does not support the command.
    pub const UNSUPPORTED: Self = Self(-24);
    /// The destination buffer is smaller than the frame.
    pub const BUFFER_TOO_SMALL: Self = Self(-30);
    pub const OUT_OF_MEMORY: Self = Self(-100);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Name of this code if it belongs to the bridge's own code set.
    pub fn builtin_name(self) -> Option<&'static str> {
        Some(match self {
            Self::OK => "OK",
            Self::NO_DEVICE => "NoDevice",
            Self::UNAVAILABLE => "Unavailable",
            Self::INVALID_ARGUMENT => "InvalidArgument",
            Self::WAIT_TIMEOUT => "WaitTimeout",
            Self::UNSUPPORTED => "Unsupported",
            Self::BUFFER_TOO_SMALL => "BufferTooSmall",
            Self::OUT_OF_MEMORY => "OutOfMemory",
            _ => return None,
        })
    }

    /// The first failing code of `codes`, or [`ResultCode::OK`].
    pub fn first_failure(codes: impl IntoIterator<Item = ResultCode>) -> ResultCode {
        codes
            .into_iter()
            .find(|c| !c.is_ok())
            .unwrap_or(ResultCode::OK)
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultCode({})", self.0)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rc={}", self.0)
    }
}

/// Human-readable name for `code` when the library offers no lookup.
///
/// Uses the bridge's own code table, then falls back to `rc=<n>`.
pub fn fallback_error_name(code: ResultCode) -> String {
    code.builtin_name()
        .map(str::to_string)
        .unwrap_or_else(|| code.to_string())
}

// ── Device handle ─────────────────────────────────────────────────────────────

/// Opaque handle to a connected camera.
///
/// Deliberately not `Clone` or `Copy`: there is exactly one owner, and
/// [`CameraSdk::disconnect`] consumes it so a disconnected handle cannot be
/// used again.
pub struct DeviceHandle(NonNull<c_void>);

// SAFETY: the handle is an opaque token owned by the native library.  The
// library serialises access internally; the Rust side never dereferences it.
unsafe impl Send for DeviceHandle {}
// SAFETY: see above; shared references only pass the token back to the library.
unsafe impl Sync for DeviceHandle {}

impl DeviceHandle {
    /// Wraps a pointer returned by a native connect call.  `None` for null.
    pub(crate) fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Builds a handle from a non-zero integer token (mock library).
    pub(crate) fn from_token(token: usize) -> Option<Self> {
        Self::from_raw(token as *mut c_void)
    }

    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Numeric value of the handle, for logs.
    pub fn id(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceHandle({:#x})", self.id())
    }
}

// ── Capabilities and status ───────────────────────────────────────────────────

bitflags! {
    /// Functions the loaded library actually exports.
    ///
    /// Computed once at load time; callers branch on these instead of
    /// probing for symbols again.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// init / release / connect / disconnect.
        const CONNECT            = 1 << 0;
        /// enable live view, query size, fetch image.
        const LIVEVIEW           = 1 << 1;
        const USB_SERIAL_CONNECT = 1 << 2;
        const SAVE_INFO          = 1 << 3;
        const DOWNLOAD_DIR       = 1 << 4;
        const CAPTURE            = 1 << 5;
        const AUTO_FOCUS         = 1 << 6;
        const AUTO_WHITE_BALANCE = 1 << 7;
        const LAST_SAVED_JPEG    = 1 << 8;
        const STATUS             = 1 << 9;
        const LAST_CB_ERROR      = 1 << 10;
        const DIAG_RUNTIME       = 1 << 11;
        const ERROR_NAME         = 1 << 12;
        const SET_DEBUG          = 1 << 13;
    }
}

bitflags! {
    /// Device status bits reported by the library.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusBits: u32 {
        /// A device object exists.
        const DEVICE    = 1 << 0;
        /// The connection callback reported "connected".
        const CONNECTED = 1 << 1;
        /// Live view is enabled.
        const LIVEVIEW  = 1 << 2;
    }
}

/// Result of the library's runtime dependency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDiag {
    /// One bit per missing dependency; `0` means everything loaded.
    pub missing_mask: u32,
    /// Library-provided description, e.g. `missing=none`.
    pub text: String,
}

/// Where a captured image was saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub path: PathBuf,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while loading the native library.
#[derive(Debug, Error)]
pub enum SdkLoadError {
    /// No library location was configured.
    #[error("no camera library configured; set CRSDK_DLL or [sdk].library_path")]
    NotConfigured,

    /// The shared object could not be opened.
    #[error("failed to load camera library {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}

// ── Bridge trait ──────────────────────────────────────────────────────────────

/// The camera library as seen by the application.
///
/// Every method is safe to call from any thread, never panics, and reports
/// failure through its return value.
pub trait CameraSdk: Send + Sync {
    /// Functions available in the loaded library.
    fn capabilities(&self) -> Capabilities;

    /// Turns the library's own debug logging on or off.
    fn set_debug(&self, on: bool);

    fn initialize(&self) -> ResultCode;

    fn shutdown(&self);

    /// Connects to the first enumerated camera.
    fn connect_first(&self) -> (ResultCode, Option<DeviceHandle>);

    /// Connects directly to the USB camera with the given 12-character serial.
    fn connect_usb_serial(&self, serial: &str) -> (ResultCode, Option<DeviceHandle>);

    /// Disconnects and invalidates `handle`.
    fn disconnect(&self, handle: DeviceHandle);

    /// Sets save mode, host directory, and file-name prefix.
    fn set_save_info(&self, handle: &DeviceHandle, mode: i32, dir: &str, name: &str) -> ResultCode;

    /// Sets the directory the library scans for downloaded captures.
    fn set_download_dir(&self, dir: &str) -> ResultCode;

    /// Applies save info and the download directory.
    ///
    /// Both steps are attempted; the result is the first failing code.
    fn apply_save_target(&self, handle: &DeviceHandle, mode: i32, dir: &str, name: Option<&str>) -> ResultCode {
        let info = self.set_save_info(handle, mode, dir, name.unwrap_or(""));
        let download = self.set_download_dir(dir);
        ResultCode::first_failure([info, download])
    }

    /// [`CameraSdk::apply_save_target`] in host save mode.
    fn set_save_target(&self, handle: &DeviceHandle, dir: &str, name: Option<&str>) -> ResultCode {
        self.apply_save_target(handle, SAVE_MODE_HOST, dir, name)
    }

    fn enable_liveview(&self, handle: &DeviceHandle, on: bool) -> ResultCode;

    /// Bytes required for the next live-view frame.  `0` on any failure,
    /// including "not ready yet".
    fn query_frame_size(&self, handle: &DeviceHandle) -> usize;

    /// Fetches one live-view frame into `buf`.
    ///
    /// Returns the result code and the number of bytes written.  A buffer
    /// smaller than the current requirement is refused with
    /// [`ResultCode::BUFFER_TOO_SMALL`] and nothing is written.  The used
    /// length is `0` whenever the code is not OK.
    fn fetch_frame(&self, handle: &DeviceHandle, buf: &mut [u8]) -> (ResultCode, usize);

    /// Fires the shutter once.
    fn trigger_capture(&self, handle: &DeviceHandle) -> ResultCode;

    fn auto_focus(&self, handle: &DeviceHandle) -> ResultCode;

    /// Returns [`ResultCode::UNSUPPORTED`] when neither the library nor the
    /// camera implements it.
    fn auto_white_balance(&self, handle: &DeviceHandle) -> ResultCode;

    /// Most recent JPEG in the download directory.
    fn last_saved_jpeg(&self, handle: &DeviceHandle) -> (ResultCode, Option<SavedImage>);

    /// Empty when the library does not report status.
    fn status(&self, handle: &DeviceHandle) -> StatusBits;

    /// Last error reported by the library's connection callback.
    fn last_callback_error(&self, handle: &DeviceHandle) -> ResultCode;

    /// `None` when the library has no dependency check.
    fn diag_runtime(&self) -> Option<RuntimeDiag>;

    /// Human-readable name for `code`.
    fn error_name(&self, code: ResultCode) -> String;
}
