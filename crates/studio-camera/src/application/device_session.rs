//! Device session: one connected camera and everything tied to it.
//!
//! A [`DeviceSession`] owns the camera's [`DeviceHandle`] from connect to
//! disconnect.  It applies the save target once per connection, drives the
//! live-view lifecycle, and forwards camera commands.
//!
//! Only one session may exist per process; [`DeviceSession::connect`] fails
//! with [`SessionError::AlreadyActive`] while another is alive.
//!
//! Teardown (explicit [`DeviceSession::disconnect`] or `Drop`) runs in this
//! order: stop poller → disable live view → disconnect → shutdown library.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::frame_sink::FrameSink;
use super::liveview_poller::{LiveViewPoller, PollStats, PollerError, PollerSettings, PollerState};
use crate::infrastructure::sdk::{
    CameraSdk, Capabilities, DeviceHandle, ResultCode, SavedImage, StatusBits, SAVE_MODE_HOST,
    USB_SERIAL_LEN,
};

/// Set while a session is alive.
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Error type for session operations.
///
/// Variants carrying a native code also carry its resolved name, which is
/// what gets shown to the user.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a camera session is already active in this process")]
    AlreadyActive,

    #[error("camera library initialisation failed: {name}")]
    Initialize { code: ResultCode, name: String },

    #[error("no camera connected: {name}")]
    Connect { code: ResultCode, name: String },

    #[error("the session is disconnected")]
    Disconnected,

    #[error("live view could not be enabled: {name}")]
    LiveView { code: ResultCode, name: String },

    #[error("{command} failed: {name}")]
    Command {
        command: &'static str,
        code: ResultCode,
        name: String,
    },

    #[error(transparent)]
    Poller(#[from] PollerError),
}

/// Connection-time options.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// 12-character USB serial for the direct connect path.
    pub usb_serial: Option<String>,
    /// Skip the direct path and always enumerate.
    pub force_enumerate: bool,
    /// Host directory for captures.  `None` leaves the camera's default.
    pub save_dir: Option<String>,
    /// File-name prefix for captures.
    pub file_name: Option<String>,
    pub save_mode: i32,
    /// Forwarded to the library's debug switch.
    pub debug: bool,
    /// Pause between enabling live view and the first poll.
    pub warmup: Duration,
    /// How long teardown waits for the poller thread.
    pub stop_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            usb_serial: None,
            force_enumerate: false,
            save_dir: None,
            file_name: None,
            save_mode: SAVE_MODE_HOST,
            debug: false,
            warmup: Duration::from_millis(150),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

/// What the user should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    LiveView,
}

/// Claim on the process-wide session slot.  Released on drop.
struct SessionSlot;

impl SessionSlot {
    fn claim() -> Result<Self, SessionError> {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| SessionSlot)
            .map_err(|_| SessionError::AlreadyActive)
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// A connected camera.
pub struct DeviceSession {
    sdk: Arc<dyn CameraSdk>,
    handle: Option<Arc<DeviceHandle>>,
    poller: LiveViewPoller,
    settings: SessionSettings,
    liveview: bool,
    // Declared last: released after teardown has finished.
    _slot: SessionSlot,
}

impl DeviceSession {
    /// Initialises the library, connects, and applies the save target.
    ///
    /// When a 12-character `usb_serial` is configured and `force_enumerate`
    /// is off, the direct USB path is tried first, falling back to
    /// enumeration.  A failing save target is logged, not fatal.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyActive`] if another session is alive.
    /// - [`SessionError::Initialize`] / [`SessionError::Connect`] with the
    ///   library's code and its resolved name.
    pub fn connect(sdk: Arc<dyn CameraSdk>, settings: SessionSettings) -> Result<Self, SessionError> {
        let slot = SessionSlot::claim()?;
        let caps = sdk.capabilities();

        if caps.contains(Capabilities::SET_DEBUG) {
            sdk.set_debug(settings.debug);
        }
        if let Some(diag) = sdk.diag_runtime() {
            if diag.missing_mask != 0 {
                warn!(mask = diag.missing_mask, "camera runtime dependencies missing: {}", diag.text);
            } else {
                debug!("camera runtime check: {}", diag.text);
            }
        }

        let rc = sdk.initialize();
        if !rc.is_ok() {
            return Err(SessionError::Initialize {
                code: rc,
                name: sdk.error_name(rc),
            });
        }

        let handle = match connect_device(sdk.as_ref(), &settings) {
            Ok(handle) => handle,
            Err(e) => {
                sdk.shutdown();
                return Err(e);
            }
        };
        info!(handle = ?handle, "camera connected");

        if let Some(dir) = settings.save_dir.as_deref() {
            let rc = sdk.apply_save_target(&handle, settings.save_mode, dir, settings.file_name.as_deref());
            if rc.is_ok() {
                info!(dir, "save target applied");
            } else {
                warn!(dir, "save target not applied: {}", sdk.error_name(rc));
            }
        }

        Ok(Self {
            poller: LiveViewPoller::new(Arc::clone(&sdk)),
            sdk,
            handle: Some(Arc::new(handle)),
            settings,
            liveview: false,
            _slot: slot,
        })
    }

    fn handle(&self) -> Result<&Arc<DeviceHandle>, SessionError> {
        self.handle.as_ref().ok_or(SessionError::Disconnected)
    }

    /// Enables live view, waits the warm-up interval, then starts polling.
    ///
    /// Calling this while live view is running restarts the poller with the
    /// new sink; the previous sink receives no further frames.
    pub fn start_liveview(&mut self, sink: impl FrameSink, settings: PollerSettings) -> Result<(), SessionError> {
        let handle = Arc::clone(self.handle()?);

        let rc = self.sdk.enable_liveview(&handle, true);
        if !rc.is_ok() {
            return Err(SessionError::LiveView {
                code: rc,
                name: self.sdk.error_name(rc),
            });
        }
        if !self.settings.warmup.is_zero() {
            thread::sleep(self.settings.warmup);
        }

        self.poller.start(handle, sink, settings)?;
        self.liveview = true;
        Ok(())
    }

    /// Stops polling and disables live view.
    ///
    /// Waits up to the configured stop timeout for the poller thread.
    pub fn stop_liveview(&mut self) {
        self.poller.stop();
        if let Err(e) = self.poller.wait_stopped(self.settings.stop_timeout) {
            warn!("{e}");
        }
        if self.liveview {
            if let Some(handle) = self.handle.as_ref() {
                let rc = self.sdk.enable_liveview(handle, false);
                if !rc.is_ok() {
                    debug!("disabling live view failed: {}", self.sdk.error_name(rc));
                }
            }
            self.liveview = false;
        }
    }

    pub fn capture(&self) -> Result<(), SessionError> {
        let rc = self.sdk.trigger_capture(self.handle()?);
        self.command("capture", rc)
    }

    pub fn auto_focus(&self) -> Result<(), SessionError> {
        let rc = self.sdk.auto_focus(self.handle()?);
        self.command("auto focus", rc)
    }

    /// Fails with code [`ResultCode::UNSUPPORTED`] on cameras without it.
    pub fn auto_white_balance(&self) -> Result<(), SessionError> {
        let rc = self.sdk.auto_white_balance(self.handle()?);
        self.command("auto white balance", rc)
    }

    /// Most recent capture in the save directory, if any.
    pub fn last_saved_jpeg(&self) -> Result<Option<SavedImage>, SessionError> {
        match self.sdk.last_saved_jpeg(self.handle()?) {
            (rc, image) if rc.is_ok() => Ok(image),
            // The library uses 1 for "nothing saved yet".
            (ResultCode(1), _) => Ok(None),
            (rc, _) => self.command("last saved image", rc).map(|()| None),
        }
    }

    pub fn status(&self) -> StatusBits {
        self.handle
            .as_ref()
            .map(|h| self.sdk.status(h))
            .unwrap_or_default()
    }

    pub fn last_callback_error(&self) -> Option<ResultCode> {
        let handle = self.handle.as_ref()?;
        self.sdk
            .capabilities()
            .contains(Capabilities::LAST_CB_ERROR)
            .then(|| self.sdk.last_callback_error(handle))
    }

    pub fn connection_state(&self) -> ConnectionState {
        match (&self.handle, self.liveview, self.poller.state()) {
            (None, _, _) => ConnectionState::Disconnected,
            (Some(_), true, PollerState::Running) => ConnectionState::LiveView,
            (Some(_), _, _) => ConnectionState::Connected,
        }
    }

    pub fn poll_stats(&self) -> PollStats {
        self.poller.stats()
    }

    pub fn error_name(&self, code: ResultCode) -> String {
        self.sdk.error_name(code)
    }

    /// Tears the session down.  Equivalent to dropping it.
    pub fn disconnect(mut self) {
        self.teardown();
    }

    fn command(&self, command: &'static str, rc: ResultCode) -> Result<(), SessionError> {
        if rc.is_ok() {
            debug!(command, "camera command ok");
            return Ok(());
        }
        let name = self.sdk.error_name(rc);
        warn!(command, code = rc.0, "camera command failed: {name}");
        Err(SessionError::Command { command, code: rc, name })
    }

    fn teardown(&mut self) {
        if self.handle.is_none() {
            return;
        }
        self.stop_liveview();

        let Some(handle) = self.handle.take() else {
            return;
        };
        match Arc::try_unwrap(handle) {
            Ok(handle) => {
                self.sdk.disconnect(handle);
                self.sdk.shutdown();
                info!("camera disconnected");
            }
            Err(_still_shared) => {
                // The poller thread is stuck inside a native call and still
                // holds the handle.  Disconnecting or shutting down now would
                // free memory that call is using.
                error!("poller did not release the device handle; skipping disconnect and shutdown");
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Runs the connect path: direct USB serial first when configured, then
/// enumeration.
fn connect_device(sdk: &dyn CameraSdk, settings: &SessionSettings) -> Result<DeviceHandle, SessionError> {
    let serial = settings
        .usb_serial
        .as_deref()
        .map(str::trim)
        .filter(|s| s.len() == USB_SERIAL_LEN);

    if let Some(serial) = serial.filter(|_| !settings.force_enumerate) {
        if sdk.capabilities().contains(Capabilities::USB_SERIAL_CONNECT) {
            match sdk.connect_usb_serial(serial) {
                (rc, Some(handle)) if rc.is_ok() => {
                    debug!(serial, "connected by USB serial");
                    return Ok(handle);
                }
                (rc, _) => {
                    warn!(serial, "USB serial connect failed ({}); falling back to enumeration", sdk.error_name(rc));
                }
            }
        } else {
            debug!("library has no USB serial connect; enumerating");
        }
    } else if settings.usb_serial.is_some() && !settings.force_enumerate {
        warn!("configured USB serial is not {USB_SERIAL_LEN} characters; enumerating");
    }

    match sdk.connect_first() {
        (rc, Some(handle)) if rc.is_ok() => Ok(handle),
        (rc, _) => {
            let code = if rc.is_ok() { ResultCode::NO_DEVICE } else { rc };
            Err(SessionError::Connect {
                code,
                name: sdk.error_name(code),
            })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::application::frame_sink::SinkError;
    use crate::infrastructure::sdk::mock::MockCameraSdk;

    fn quick_settings() -> SessionSettings {
        SessionSettings {
            warmup: Duration::ZERO,
            ..SessionSettings::default()
        }
    }

    #[test]
    #[serial]
    fn test_only_one_session_per_process() {
        // Arrange
        let sdk = Arc::new(MockCameraSdk::new());
        let first = DeviceSession::connect(sdk.clone(), quick_settings()).expect("first session");

        // Act
        let second = DeviceSession::connect(sdk.clone(), quick_settings());

        // Assert
        assert!(matches!(second, Err(SessionError::AlreadyActive)));
        drop(first);
        assert!(DeviceSession::connect(sdk, quick_settings()).is_ok());
    }

    #[test]
    #[serial]
    fn test_failed_connect_releases_slot_and_shuts_down() {
        // Arrange
        let sdk = Arc::new(MockCameraSdk::new());
        sdk.fail_connect_with(ResultCode::WAIT_TIMEOUT);

        // Act
        let result = DeviceSession::connect(sdk.clone(), quick_settings());

        // Assert
        match result {
            Err(SessionError::Connect { code, name }) => {
                assert_eq!(code, ResultCode::WAIT_TIMEOUT);
                assert_eq!(name, "WaitTimeout");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect must fail"),
        }
        assert!(!sdk.is_initialized());
        assert!(!SESSION_ACTIVE.load(Ordering::Acquire));
    }

    #[test]
    #[serial]
    fn test_usb_serial_path_is_tried_first() {
        // Arrange
        let sdk = Arc::new(MockCameraSdk::new());
        sdk.set_usb_serial("D12345678901");
        let settings = SessionSettings {
            usb_serial: Some("D12345678901".to_string()),
            ..quick_settings()
        };

        // Act
        let _session = DeviceSession::connect(sdk.clone(), settings).unwrap();

        // Assert
        assert_eq!(sdk.call_log(), vec!["initialize", "connect_usb_serial"]);
    }

    #[test]
    #[serial]
    fn test_usb_serial_failure_falls_back_to_enumeration() {
        let sdk = Arc::new(MockCameraSdk::new());
        let settings = SessionSettings {
            usb_serial: Some("NOSUCHCAMERA".to_string()),
            ..quick_settings()
        };

        let session = DeviceSession::connect(sdk.clone(), settings).unwrap();

        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert_eq!(
            sdk.call_log(),
            vec!["initialize", "connect_usb_serial", "connect_first"]
        );
    }

    #[test]
    #[serial]
    fn test_force_enumerate_skips_usb_serial() {
        let sdk = Arc::new(MockCameraSdk::new());
        sdk.set_usb_serial("D12345678901");
        let settings = SessionSettings {
            usb_serial: Some("D12345678901".to_string()),
            force_enumerate: true,
            ..quick_settings()
        };

        let _session = DeviceSession::connect(sdk.clone(), settings).unwrap();

        assert_eq!(sdk.call_log(), vec!["initialize", "connect_first"]);
    }

    #[test]
    #[serial]
    fn test_save_target_applied_once_on_connect() {
        // Arrange
        let sdk = Arc::new(MockCameraSdk::new());
        let settings = SessionSettings {
            save_dir: Some(r"C:\PhotoBox\captures".to_string()),
            file_name: Some("IMG_".to_string()),
            ..quick_settings()
        };

        // Act
        let _session = DeviceSession::connect(sdk.clone(), settings).unwrap();

        // Assert
        assert_eq!(
            sdk.save_info(),
            Some((SAVE_MODE_HOST, r"C:\PhotoBox\captures".to_string(), "IMG_".to_string()))
        );
        assert_eq!(sdk.download_dir().as_deref(), Some(r"C:\PhotoBox\captures"));
    }

    #[test]
    #[serial]
    fn test_commands_surface_resolved_names() {
        let sdk = Arc::new(MockCameraSdk::new());
        let session = DeviceSession::connect(sdk, quick_settings()).unwrap();

        assert!(session.capture().is_ok());
        assert!(session.auto_focus().is_ok());
        match session.auto_white_balance() {
            Err(SessionError::Command { code, name, .. }) => {
                assert_eq!(code, ResultCode::UNSUPPORTED);
                assert_eq!(name, "Unsupported");
            }
            other => panic!("expected unsupported, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_last_saved_jpeg_none_before_capture() {
        let sdk = Arc::new(MockCameraSdk::new());
        let settings = SessionSettings {
            save_dir: Some("/srv/captures".to_string()),
            ..quick_settings()
        };
        let session = DeviceSession::connect(sdk, settings).unwrap();

        assert_eq!(session.last_saved_jpeg().unwrap(), None);
        session.capture().unwrap();
        assert!(session.last_saved_jpeg().unwrap().is_some());
    }

    #[test]
    #[serial]
    fn test_teardown_order() {
        // Arrange
        let sdk = Arc::new(MockCameraSdk::new());
        let mut session = DeviceSession::connect(sdk.clone(), quick_settings()).unwrap();
        let sink = |_f: studio_core::LiveFrame| -> Result<(), SinkError> { Ok(()) };
        session.start_liveview(sink, PollerSettings::default()).unwrap();
        assert_eq!(session.connection_state(), ConnectionState::LiveView);

        // Act
        session.disconnect();

        // Assert
        assert_eq!(
            sdk.call_log(),
            vec![
                "initialize",
                "connect_first",
                "liveview_on",
                "liveview_off",
                "disconnect",
                "shutdown"
            ]
        );
        assert!(!sdk.is_connected());
    }
}
