//! SCSI command descriptor blocks.
//!
//! Every multi-byte CDB field is big-endian regardless of host byte order.

/// Sense buffer attached to every pass-through request.
pub type SenseBuffer = [u8; 32];

/// Seconds before the port driver abandons a pass-through request.
pub const SCSI_TIMEOUT_SECS: u32 = 10;

/// SCSI operation codes used by the raw disk paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiOpcode {
    /// READ(16)
    Read16 = 0x88,
    /// WRITE(16)
    Write16 = 0x8A,
    /// SECURITY PROTOCOL IN
    SecurityRecv = 0xA2,
    /// SECURITY PROTOCOL OUT
    SecuritySend = 0xB5,
}

/// CDB byte 1 flags for READ/WRITE(16).
pub mod cdb_flags {
    /// Force unit access, non-volatile cache
    pub const FUA_NV: u8 = 0x02;
    /// Force unit access
    pub const FUA: u8 = 0x08;
    /// Disable page out
    pub const DPO: u8 = 0x10;
}

/// Direction of a SCSI data transfer as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiDirection {
    /// Host to device.
    Out,
    /// Device to host.
    In,
}

/// READ(16) / WRITE(16).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RwCdb16 {
    /// Operation code
    pub opcode: u8,
    /// DPO / FUA flags
    pub flags: u8,
    /// Logical block address
    pub lba: u64,
    /// Transfer length in logical blocks
    pub len: u32,
    /// Group number
    pub group: u8,
    /// Control byte
    pub control: u8,
}

impl RwCdb16 {
    /// Serialized length.
    pub const LEN: usize = 16;

    /// Build a read or write CDB.
    pub fn new(opcode: ScsiOpcode, lba: u64, len: u32, flags: u8) -> Self {
        Self {
            opcode: opcode as u8,
            flags,
            lba,
            len,
            ..Default::default()
        }
    }

    /// Big-endian wire form.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut cdb = [0u8; Self::LEN];
        cdb[0] = self.opcode;
        cdb[1] = self.flags;
        cdb[2..10].copy_from_slice(&self.lba.to_be_bytes());
        cdb[10..14].copy_from_slice(&self.len.to_be_bytes());
        cdb[14] = self.group;
        cdb[15] = self.control;
        cdb
    }
}

/// SECURITY PROTOCOL IN / OUT.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SecurityCdb12 {
    /// Operation code
    pub opcode: u8,
    /// Security protocol
    pub protocol: u8,
    /// Protocol specific field (ComID for TCG)
    pub com_id: u16,
    /// Allocation or transfer length in bytes
    pub len: u32,
    /// Control byte
    pub control: u8,
}

impl SecurityCdb12 {
    /// Serialized length.
    pub const LEN: usize = 12;

    /// Build a security send or receive CDB.
    pub fn new(opcode: ScsiOpcode, protocol: u8, com_id: u16, len: u32) -> Self {
        Self {
            opcode: opcode as u8,
            protocol,
            com_id,
            len,
            ..Default::default()
        }
    }

    /// Big-endian wire form.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut cdb = [0u8; Self::LEN];
        cdb[0] = self.opcode;
        cdb[1] = self.protocol;
        cdb[2..4].copy_from_slice(&self.com_id.to_be_bytes());
        // bytes 4..6 reserved
        cdb[6..10].copy_from_slice(&self.len.to_be_bytes());
        // byte 10 reserved
        cdb[11] = self.control;
        cdb
    }
}
