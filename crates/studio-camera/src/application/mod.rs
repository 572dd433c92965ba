//! Application layer use cases for the studio camera.
//!
//! # What lives here? (for beginners)
//!
//! The *application* layer orchestrates the camera through the
//! [`CameraSdk`](crate::infrastructure::sdk::CameraSdk) trait.  It never
//! touches raw pointers or the native library directly, so every use case
//! here runs unchanged against the mock camera in tests.
//!
//! # Sub-modules
//!
//! - **`device_session`** – Owns the connected camera: initialise, connect,
//!   apply the save target, forward commands, and tear down in order.
//!
//! - **`liveview_poller`** – Background thread that fetches live-view frames
//!   on a drift-corrected schedule.  At most one poller delivers frames per
//!   process; starting a new one supersedes the old.
//!
//! - **`frame_sink`** – The consumer end of the poller.  Frames cross the
//!   thread boundary as owned copies through a bounded channel.

pub mod device_session;
pub mod frame_sink;
pub mod liveview_poller;
