//! Studio camera headless preview runner.
//!
//! Loads the configuration, connects to the camera, streams live view through
//! the overlay compositor, and optionally writes the composited preview to a
//! PNG snapshot.  Without a camera it reports "no camera" and exits cleanly.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config() + CRSDK_* overrides
//!  └─ CameraSdk           -- NativeCameraSdk (libloading) or MockCameraSdk (--mock)
//!  └─ DeviceSession::connect()
//!  └─ start_liveview(ChannelSink)
//!       └─ liveview-poller thread ──LiveFrame──► rx
//!  └─ preview loop (this task)
//!       ├─ FrameImage::decode_jpeg
//!       ├─ OverlayCompositor::paint
//!       └─ PNG snapshot
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use studio_camera::application::device_session::DeviceSession;
use studio_camera::application::frame_sink::frame_channel;
use studio_camera::infrastructure::sdk::mock::MockCameraSdk;
use studio_camera::infrastructure::sdk::native::NativeCameraSdk;
use studio_camera::infrastructure::sdk::{CameraSdk, SdkLoadError};
use studio_camera::infrastructure::storage::config::{self, AppConfig};
use studio_core::{FrameImage, OverlayCompositor};

/// Command-line options.  Values given here win over the config file.
#[derive(Debug, Parser)]
#[command(name = "studio-camera", version, about = "Live camera preview with alignment overlay")]
struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Native camera library.
    #[arg(long, env = "CRSDK_DLL")]
    sdk_path: Option<PathBuf>,

    /// Live-view frames per second.
    #[arg(long)]
    fps: Option<u32>,

    /// Write the latest composited preview to this PNG file.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Stop after this many previewed frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Use the built-in simulated camera instead of the native library.
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    }
    .context("loading configuration")?;
    cfg.apply_env_overrides();
    if let Some(fps) = cli.fps {
        cfg.liveview.fps = fps;
    }

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.general.log_level)),
        )
        .init();

    info!("studio camera starting");

    let mut overlay = build_overlay(&cfg)?;

    let sdk = match load_sdk(&cli, &cfg) {
        Ok(sdk) => sdk,
        Err(e) => {
            warn!("no camera: {e}");
            write_snapshot(&overlay, &cli)?;
            return Ok(());
        }
    };

    let mut session = match DeviceSession::connect(sdk, cfg.session_settings()) {
        Ok(session) => session,
        Err(e) => {
            warn!("no camera: {e}");
            write_snapshot(&overlay, &cli)?;
            return Ok(());
        }
    };

    let (sink, mut rx) = frame_channel(cfg.liveview.channel_capacity);
    if let Err(e) = session.start_liveview(sink, cfg.liveview.poller_settings()) {
        error!("live view unavailable: {e}");
        session.disconnect();
        write_snapshot(&overlay, &cli)?;
        return Ok(());
    }
    info!(state = ?session.connection_state(), "live view running; press Ctrl-C to exit");

    // ── Preview loop ──────────────────────────────────────────────────────────
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut shown: u64 = 0;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    warn!("live view ended");
                    break;
                };
                match FrameImage::decode_jpeg(frame.bytes()) {
                    Ok(image) => overlay.set_live_frame(image),
                    Err(e) => {
                        debug!(sequence = frame.sequence(), "skipping undecodable frame: {e}");
                        continue;
                    }
                }
                shown += 1;
                if cli.snapshot.is_some() {
                    write_snapshot(&overlay, &cli)?;
                }
                if cli.frames.is_some_and(|limit| shown >= limit) {
                    info!(shown, "frame limit reached");
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let stats = session.poll_stats();
    info!(
        ticks = stats.ticks,
        delivered = stats.frames_delivered,
        dropped = stats.frames_dropped,
        shown,
        "live view stopped"
    );
    session.disconnect();
    Ok(())
}

/// Builds the compositor from the `[overlay]` section.
fn build_overlay(cfg: &AppConfig) -> anyhow::Result<OverlayCompositor> {
    let mut overlay = OverlayCompositor::new(cfg.overlay.width, cfg.overlay.height)
        .context("creating overlay surface")?;
    overlay.set_style(cfg.overlay.style());
    for (id, path) in cfg.overlay.hole_paths().context("building overlay holes")? {
        overlay.set_hole(id, path);
    }
    Ok(overlay)
}

fn load_sdk(cli: &Cli, cfg: &AppConfig) -> Result<Arc<dyn CameraSdk>, SdkLoadError> {
    if cli.mock {
        let sdk = MockCameraSdk::new();
        match mock_preview_jpeg(cfg.overlay.width, cfg.overlay.height) {
            Ok(jpeg) => sdk.set_frame_bytes(jpeg),
            Err(e) => warn!("simulated camera will serve blank frames: {e}"),
        }
        info!("using simulated camera");
        return Ok(Arc::new(sdk));
    }
    let path = cfg
        .resolve_library_path(cli.sdk_path.as_deref())
        .ok_or(SdkLoadError::NotConfigured)?;
    Ok(Arc::new(NativeCameraSdk::load(&path)?))
}

/// A diagonal gradient for the simulated camera.
fn mock_preview_jpeg(width: u32, height: u32) -> image::ImageResult<Vec<u8>> {
    let (w, h) = (width.max(1), height.max(1));
    let img = image::RgbImage::from_fn(w, h, |x, y| {
        let r = (x * 255 / w) as u8;
        let g = (y * 255 / h) as u8;
        image::Rgb([r, g, 160])
    });
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 80).encode(
        img.as_raw(),
        w,
        h,
        image::ColorType::Rgb8,
    )?;
    Ok(jpeg)
}

fn write_snapshot(overlay: &OverlayCompositor, cli: &Cli) -> anyhow::Result<()> {
    let Some(path) = &cli.snapshot else {
        return Ok(());
    };
    let png = overlay.paint()?.encode_png()?;
    std::fs::write(path, png).with_context(|| format!("writing snapshot {}", path.display()))?;
    debug!(path = %path.display(), "snapshot written");
    Ok(())
}
