//! Single-owner native handles.

use std::fmt;

/// A raw OS handle value.
pub type RawHandle = isize;

/// `INVALID_HANDLE_VALUE`; doubles as the closed state.
pub const CLOSED_HANDLE: RawHandle = -1;

/// Exclusively owns one native handle and closes it exactly once.
///
/// Moving the owner moves the handle. [`take`](Self::take) transfers it out
/// and leaves this owner closed, so its own drop does nothing.
pub struct OwnedHandle {
    raw: RawHandle,
    close: fn(RawHandle),
}

impl OwnedHandle {
    /// Take ownership of `raw`, released with the platform close call.
    pub fn new(raw: RawHandle) -> Self {
        Self::with_closer(raw, platform_close)
    }

    /// Take ownership of `raw`, released with `close`.
    pub fn with_closer(raw: RawHandle, close: fn(RawHandle)) -> Self {
        Self { raw, close }
    }

    /// An owner that holds nothing.
    pub fn closed() -> Self {
        Self::new(CLOSED_HANDLE)
    }

    /// The handle value, without giving up ownership.
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Whether this owner still holds a live handle.
    pub fn is_open(&self) -> bool {
        self.raw != CLOSED_HANDLE && self.raw != 0
    }

    /// Move the handle into a new owner, leaving this one closed.
    pub fn take(&mut self) -> Self {
        let raw = std::mem::replace(&mut self.raw, CLOSED_HANDLE);
        Self {
            raw,
            close: self.close,
        }
    }

    /// Close now instead of at drop.
    pub fn close(&mut self) {
        if self.is_open() {
            (self.close)(self.raw);
        }
        self.raw = CLOSED_HANDLE;
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.raw).finish()
    }
}

#[cfg(windows)]
fn platform_close(raw: RawHandle) {
    // SAFETY: the handle is owned and still open.
    unsafe {
        windows_sys::Win32::Foundation::CloseHandle(raw);
    }
}

#[cfg(not(windows))]
fn platform_close(_raw: RawHandle) {}
