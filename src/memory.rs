use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice::{from_raw_parts, from_raw_parts_mut};

use crate::error::{Error, Result};

/// Logical sector size assumed for unbuffered I/O.
pub const SECTOR_SIZE: usize = 512;

/// Round `len` up to a whole number of sectors, or `None` if that overflows.
pub fn round_up_to_sector(len: usize) -> Option<usize> {
    len.div_ceil(SECTOR_SIZE).checked_mul(SECTOR_SIZE)
}

/// A zeroed, sector-aligned heap buffer.
///
/// Handles opened with `FILE_FLAG_NO_BUFFERING` reject transfers whose
/// address or length is not sector aligned.
pub struct AlignedBuffer {
    addr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl AlignedBuffer {
    /// Allocates `len` bytes rounded up to whole sectors.
    pub fn allocate(len: usize) -> Result<Self> {
        let len = round_up_to_sector(len.max(1))
            .ok_or_else(|| Error::InvalidArgument(format!("buffer length {len}")))?;
        let layout = Layout::from_size_align(len, SECTOR_SIZE)
            .map_err(|_| Error::InvalidArgument(format!("buffer length {len}")))?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(addr) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout);
        };
        Ok(Self { addr, len, layout })
    }

    /// Start address; always a multiple of [`SECTOR_SIZE`].
    pub fn addr(&self) -> usize {
        self.addr.as_ptr() as usize
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // SAFETY: addr points at len initialized bytes owned by self.
        unsafe { from_raw_parts(self.addr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { from_raw_parts_mut(self.addr.as_ptr(), self.len) }
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl AsMut<[u8]> for AlignedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with the same layout.
        unsafe { alloc::dealloc(self.addr.as_ptr(), self.layout) }
    }
}

// SAFETY: the buffer is uniquely owned plain memory.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}
