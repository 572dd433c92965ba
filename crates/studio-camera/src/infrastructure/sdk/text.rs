//! Text conversion across the native boundary.
//!
//! The camera library takes paths and serial numbers as narrow strings in the
//! platform's active code page, and returns diagnostic text as `wchar_t`
//! buffers.  `wchar_t` is 16 bits (UTF-16) on Windows and 32 bits (UTF-32) on
//! Unix-like systems.

use std::ffi::CString;

use thiserror::Error;

/// The native `wchar_t`.
#[cfg(target_os = "windows")]
pub type WideChar = u16;

/// The native `wchar_t`.
#[cfg(not(target_os = "windows"))]
pub type WideChar = u32;

/// Errors raised while preparing text for the native library.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextError {
    /// C strings cannot carry an embedded NUL.
    #[error("text contains a NUL byte at offset {0}")]
    InteriorNul(usize),

    /// A character has no equivalent in the active code page.
    #[error("text cannot be represented in the active code page")]
    Unrepresentable,
}

/// Converts `text` to a NUL-terminated narrow string.
///
/// On Windows the result is encoded in the active ANSI code page (`CP_ACP`),
/// which is what the camera library expects for directory names.  Elsewhere
/// the narrow encoding is UTF-8.
///
/// # Errors
///
/// - [`TextError::InteriorNul`] if `text` contains `'\0'`.
/// - [`TextError::Unrepresentable`] if a character would be replaced by the
///   code page's default character.
pub fn to_narrow(text: &str) -> Result<CString, TextError> {
    if let Some(pos) = text.find('\0') {
        return Err(TextError::InteriorNul(pos));
    }
    let bytes = encode_narrow(text)?;
    CString::new(bytes).map_err(|e| TextError::InteriorNul(e.nul_position()))
}

#[cfg(not(target_os = "windows"))]
fn encode_narrow(text: &str) -> Result<Vec<u8>, TextError> {
    Ok(text.as_bytes().to_vec())
}

#[cfg(target_os = "windows")]
fn encode_narrow(text: &str) -> Result<Vec<u8>, TextError> {
    use windows::core::PCSTR;
    use windows::Win32::Foundation::BOOL;
    use windows::Win32::Globalization::{WideCharToMultiByte, CP_ACP};

    let wide: Vec<u16> = text.encode_utf16().collect();
    if wide.is_empty() {
        return Ok(Vec::new());
    }

    // SAFETY: `wide` is a valid UTF-16 slice; a `None` output buffer asks
    // only for the required length.
    let needed = unsafe { WideCharToMultiByte(CP_ACP, 0, &wide, None, PCSTR::null(), None) };
    if needed <= 0 {
        return Err(TextError::Unrepresentable);
    }

    let mut out = vec![0u8; needed as usize];
    let mut used_default = BOOL(0);
    // SAFETY: `out` has exactly the length reported by the sizing call.
    let written = unsafe {
        WideCharToMultiByte(
            CP_ACP,
            0,
            &wide,
            Some(&mut out),
            PCSTR::null(),
            Some(&mut used_default),
        )
    };
    if written <= 0 || used_default.as_bool() {
        return Err(TextError::Unrepresentable);
    }
    out.truncate(written as usize);
    Ok(out)
}

/// Decodes a NUL-terminated `wchar_t` buffer.
///
/// Stops at the first NUL (or the end of the slice).  Invalid code units are
/// replaced with U+FFFD.
pub fn from_wide(buf: &[WideChar]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    decode_wide(&buf[..len])
}

#[cfg(target_os = "windows")]
fn decode_wide(units: &[WideChar]) -> String {
    String::from_utf16_lossy(units)
}

#[cfg(not(target_os = "windows"))]
fn decode_wide(units: &[WideChar]) -> String {
    units
        .iter()
        .map(|&u| char::from_u32(u).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Encodes `text` as a NUL-terminated `wchar_t` buffer.
#[cfg(test)]
pub(crate) fn to_wide(text: &str) -> Vec<WideChar> {
    #[cfg(target_os = "windows")]
    let mut units: Vec<WideChar> = text.encode_utf16().collect();
    #[cfg(not(target_os = "windows"))]
    let mut units: Vec<WideChar> = text.chars().map(u32::from).collect();
    units.push(0);
    units
}

/// Copies `text` into `out` with truncation, always NUL-terminating.
///
/// Returns `false` if `out` is empty.  Lets test exports fill wide output
/// buffers the way the native library does.
#[cfg(test)]
pub(crate) fn write_wide(text: &str, out: &mut [WideChar]) -> bool {
    let Some(last) = out.len().checked_sub(1) else {
        return false;
    };
    let wide = to_wide(text);
    let n = (wide.len() - 1).min(last);
    out[..n].copy_from_slice(&wide[..n]);
    out[n] = 0;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_narrow_ascii_path() {
        let c = to_narrow(r"C:\PhotoBox\captures").expect("ascii is representable");
        assert_eq!(c.as_bytes(), br"C:\PhotoBox\captures");
    }

    #[test]
    fn test_to_narrow_rejects_interior_nul() {
        assert_eq!(to_narrow("ab\0cd"), Err(TextError::InteriorNul(2)));
    }

    #[test]
    fn test_to_narrow_empty_string() {
        assert_eq!(to_narrow("").unwrap().as_bytes(), b"");
    }

    #[test]
    fn test_from_wide_stops_at_nul() {
        let mut buf = to_wide("CrError_None");
        buf.extend(to_wide("garbage"));
        assert_eq!(from_wide(&buf), "CrError_None");
    }

    #[test]
    fn test_from_wide_without_terminator_uses_whole_slice() {
        let buf: Vec<WideChar> = "abc".chars().map(|c| c as WideChar).collect();
        assert_eq!(from_wide(&buf), "abc");
    }

    #[test]
    fn test_write_wide_truncates_and_terminates() {
        // Arrange
        let mut out = [0x55 as WideChar; 4];

        // Act
        let ok = write_wide("missing=none", &mut out);

        // Assert
        assert!(ok);
        assert_eq!(from_wide(&out), "mis");
        assert_eq!(out[3], 0);
    }

    #[test]
    fn test_write_wide_into_empty_buffer_fails() {
        assert!(!write_wide("x", &mut []));
    }
}
