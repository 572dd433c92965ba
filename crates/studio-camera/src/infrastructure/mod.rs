//! Infrastructure layer for the studio camera.
//!
//! Contains OS-facing adapters: the camera SDK bridge (native library loading
//! and the in-process mock) and file-system storage for the configuration.
//!
//! **Dependency rule**: `sdk` depends only on `studio_core`.  The `storage`
//! adapter converts configuration into application settings and therefore
//! reads from `application`; nothing in `sdk` may.

pub mod sdk;
pub mod storage;
