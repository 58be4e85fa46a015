//! Raw disk I/O.
//!
//! Two routes reach the media: plain reads and writes on an unbuffered
//! handle, which need sector-aligned scratch memory, and SCSI pass-through
//! commands, which hand the caller's buffer to the port driver directly.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::{AlignedBuffer, SECTOR_SIZE};
use crate::protocol::{
    DISK_GEOMETRY_EX_LEN, VOLUME_DISK_EXTENTS_LEN, parse_first_extent_disk,
    parse_geometry_disk_size,
};
use crate::scsi::{RwCdb16, ScsiOpcode, SecurityCdb12, cdb_flags};
use crate::transport::{IoctlCode, IoctlDevice, ScsiData, ScsiRequest, SectorFile, submit};

/// TCG storage security protocol.
pub const SECURITY_PROTOCOL_TCG: u8 = 0x01;
/// ComID answering Level 0 discovery.
pub const DISCOVERY0_COM_ID: u16 = 0x0001;
/// Size of the Level 0 discovery response buffer.
pub const DISCOVERY0_LEN: usize = 4096;

/// An open disk.
#[derive(Debug)]
pub struct Disk<D> {
    device: D,
    lba_shift: u8,
    write_offset: u64,
    fua: bool,
}

impl<D> Disk<D> {
    /// Wrap an open handle using 512-byte logical blocks.
    pub fn new(device: D) -> Self {
        Self {
            device,
            lba_shift: SECTOR_SIZE.trailing_zeros() as u8,
            write_offset: 0,
            fua: false,
        }
    }

    /// Set force unit access on SCSI writes.
    pub fn with_fua(mut self, fua: bool) -> Self {
        self.fua = fua;
        self
    }

    /// Use `block_size` byte logical blocks for SCSI addressing.
    pub fn with_block_size(mut self, block_size: u32) -> Result<Self> {
        if !block_size.is_power_of_two() || (block_size as usize) < SECTOR_SIZE {
            return Err(Error::InvalidArgument(format!("block size {block_size}")));
        }
        self.lba_shift = block_size.trailing_zeros() as u8;
        Ok(self)
    }

    /// Logical block size in bytes.
    pub fn block_size(&self) -> usize {
        1 << self.lba_shift
    }

    /// Byte offset the next [`scsi_write`](Self::scsi_write) starts at.
    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Move the SCSI write position.
    pub fn seek_write(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    /// The underlying handle.
    pub fn device(&self) -> &D {
        &self.device
    }

    fn blocks(&self, len: usize) -> Result<u32> {
        if len % self.block_size() != 0 {
            return Err(Error::InvalidArgument(format!(
                "transfer of {len} bytes is not a whole number of {} byte blocks",
                self.block_size()
            )));
        }
        u32::try_from(len >> self.lba_shift)
            .map_err(|_| Error::InvalidArgument(format!("transfer of {len} bytes")))
    }
}

impl<D: SectorFile> Disk<D> {
    /// Read into `buf` at the file pointer.
    ///
    /// The OS read covers whole sectors through an aligned scratch buffer;
    /// only `buf.len()` bytes are copied out and reported.
    pub fn read_sectors(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut scratch = AlignedBuffer::allocate(buf.len())?;
        let read = self
            .device
            .read(&mut scratch)
            .map_err(|e| Error::transport("ReadFile", e))?;
        let n = read.min(buf.len());
        buf[..n].copy_from_slice(&scratch[..n]);
        debug!(requested = buf.len(), rounded = scratch.len(), read, "read sectors");
        Ok(n)
    }

    /// Write `buf` at the file pointer.
    ///
    /// The tail of the last sector is zero filled. Reports `buf.len()` once
    /// the whole rounded write went through.
    pub fn write_sectors(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut scratch = AlignedBuffer::allocate(buf.len())?;
        scratch[..buf.len()].copy_from_slice(buf);
        let written = self
            .device
            .write(&scratch)
            .map_err(|e| Error::transport("WriteFile", e))?;
        debug!(requested = buf.len(), rounded = scratch.len(), written, "write sectors");
        Ok(written.min(buf.len()))
    }
}

impl<D: IoctlDevice> Disk<D> {
    fn pass_through(&self, request: &mut ScsiRequest<'_>) -> Result<usize> {
        debug!(cdb = ?request.cdb(), len = request.data.len(), "scsi pass through");
        self.device
            .scsi_pass_through(request)
            .map_err(|e| Error::transport("IOCTL_SCSI_PASS_THROUGH_DIRECT", e))?;
        if request.scsi_status != 0 {
            warn!(
                status = request.scsi_status,
                sense_key = request.sense[2] & 0xF,
                "scsi command failed"
            );
            return Err(Error::Scsi {
                status: request.scsi_status,
                sense: request.sense,
            });
        }
        Ok(request.transferred as usize)
    }

    /// READ(16) of `buf.len()` bytes from byte `offset`.
    ///
    /// `buf` must hold whole logical blocks.
    pub fn scsi_read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let nlb = self.blocks(buf.len())?;
        let cdb = RwCdb16::new(ScsiOpcode::Read16, offset >> self.lba_shift, nlb, 0);
        let mut request = ScsiRequest::new(&cdb.to_bytes(), ScsiData::In(buf))?;
        self.pass_through(&mut request)
    }

    /// WRITE(16) of `buf` at the running write offset, which advances by
    /// the bytes transferred.
    pub fn scsi_write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let nlb = self.blocks(buf.len())?;
        let flags = if self.fua { cdb_flags::FUA } else { 0 };
        let cdb = RwCdb16::new(
            ScsiOpcode::Write16,
            self.write_offset >> self.lba_shift,
            nlb,
            flags,
        );
        let mut request = ScsiRequest::new(&cdb.to_bytes(), ScsiData::Out(buf))?;
        let written = self.pass_through(&mut request)?;
        self.write_offset += written as u64;
        Ok(written)
    }

    /// SECURITY PROTOCOL IN into `buf`.
    pub fn security_recv(&self, protocol: u8, com_id: u16, buf: &mut [u8]) -> Result<usize> {
        let cdb = SecurityCdb12::new(ScsiOpcode::SecurityRecv, protocol, com_id, buf.len() as u32);
        let mut request = ScsiRequest::new(&cdb.to_bytes(), ScsiData::In(buf))?;
        self.pass_through(&mut request)
    }

    /// SECURITY PROTOCOL OUT of `buf`.
    pub fn security_send(&self, protocol: u8, com_id: u16, buf: &[u8]) -> Result<usize> {
        let cdb = SecurityCdb12::new(ScsiOpcode::SecuritySend, protocol, com_id, buf.len() as u32);
        let mut request = ScsiRequest::new(&cdb.to_bytes(), ScsiData::Out(buf))?;
        self.pass_through(&mut request)
    }

    /// TCG Level 0 discovery.
    pub fn discovery0(&self) -> Result<Discovery0> {
        let mut buf = vec![0u8; DISCOVERY0_LEN];
        self.security_recv(SECURITY_PROTOCOL_TCG, DISCOVERY0_COM_ID, &mut buf)?;
        Discovery0::parse(buf)
    }

    /// `DiskSize` from the drive geometry.
    pub fn geometry_size(&self) -> Result<u64> {
        let mut output = [0u8; DISK_GEOMETRY_EX_LEN];
        let returned = submit(&self.device, IoctlCode::GetDriveGeometryEx, &[], &mut output)?;
        parse_geometry_disk_size(&output[..returned])
    }
}

impl<D: IoctlDevice + SectorFile> Disk<D> {
    /// Size in bytes.
    ///
    /// Raw block devices have no file size; the drive geometry covers them.
    pub fn size(&self) -> Result<u64> {
        match self.device.file_size() {
            Ok(size) if size > 0 => Ok(size),
            Ok(_) => self.geometry_size(),
            Err(e) => {
                debug!(error = %e, "no file size, falling back to geometry");
                self.geometry_size()
            }
        }
    }
}

/// Number of the physical disk holding the first extent of a volume.
pub fn volume_disk_number<D: IoctlDevice + ?Sized>(volume: &D) -> Result<Option<u32>> {
    let mut output = [0u8; VOLUME_DISK_EXTENTS_LEN];
    let returned = submit(volume, IoctlCode::GetVolumeDiskExtents, &[], &mut output)?;
    parse_first_extent_disk(&output[..returned])
}

/// A Level 0 discovery response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery0 {
    /// Length of the parameter data after the length field
    pub length: u32,
    /// Data structure major version
    pub major_version: u16,
    /// Data structure minor version
    pub minor_version: u16,
    /// Raw response
    pub raw: Vec<u8>,
}

impl Discovery0 {
    /// Decode the big-endian header.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        crate::protocol::ensure_len(&raw, 48)?;
        Ok(Self {
            length: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            major_version: u16::from_be_bytes([raw[4], raw[5]]),
            minor_version: u16::from_be_bytes([raw[6], raw[7]]),
            raw,
        })
    }

    /// Feature descriptors as (feature code, version, data).
    pub fn features(&self) -> Vec<(u16, u8, &[u8])> {
        let end = (self.length as usize + 4).min(self.raw.len());
        let mut at = 48;
        let mut out = Vec::new();
        while at + 4 <= end {
            let code = u16::from_be_bytes([self.raw[at], self.raw[at + 1]]);
            let version = self.raw[at + 2] >> 4;
            let len = self.raw[at + 3] as usize;
            let data_end = (at + 4 + len).min(end);
            out.push((code, version, &self.raw[at + 4..data_end]));
            at += 4 + len;
        }
        out
    }
}
