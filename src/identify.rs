//! Identify data decoding.

use std::fmt;

use crate::cmd::IDENTIFY_SIZE;
use crate::error::Result;
use crate::protocol::{ensure_len, le_u16, le_u32, le_u64, le_u128};

/// Upper bound on entries in a namespace-id list.
pub const MAX_NAMESPACE_LIST_ENTRIES: usize = IDENTIFY_SIZE / 4;

fn extract_string(buf: &[u8], start: usize, end: usize) -> String {
    buf[start..end]
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}

/// Controller data structure.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ControllerData {
    /// PCI vendor id
    pub vid: u16,
    /// PCI subsystem vendor id
    pub ssvid: u16,
    /// Serial number
    pub serial_number: String,
    /// Model number
    pub model_number: String,
    /// Firmware revision
    pub firmware_revision: String,
    /// Recommended arbitration burst
    pub rab: u8,
    /// IEEE OUI identifier
    pub ieee: [u8; 3],
    /// Multi-path I/O and namespace sharing capabilities
    pub cmic: u8,
    /// Maximum data transfer size as a power of two of the minimum page size
    pub mdts: u8,
    /// Controller id
    pub cntlid: u16,
    /// Version
    pub ver: u32,
    /// RTD3 resume latency in microseconds
    pub rtd3r: u32,
    /// RTD3 entry latency in microseconds
    pub rtd3e: u32,
    /// Optional asynchronous events supported
    pub oaes: u32,
    /// Controller attributes
    pub ctratt: u32,
    /// Controller type
    pub cntrltype: u8,
    /// Optional admin command support
    pub oacs: u16,
    /// Abort command limit
    pub acl: u8,
    /// Asynchronous event request limit
    pub aerl: u8,
    /// Firmware updates
    pub frmw: u8,
    /// Log page attributes
    pub lpa: u8,
    /// Error log page entries
    pub elpe: u8,
    /// Number of power states supported
    pub npss: u8,
    /// Warning composite temperature threshold in Kelvin
    pub wctemp: u16,
    /// Critical composite temperature threshold in Kelvin
    pub cctemp: u16,
    /// Total NVM capacity in bytes
    pub tnvmcap: u128,
    /// Unallocated NVM capacity in bytes
    pub unvmcap: u128,
    /// Minimum submission queue entry size (log2 bytes)
    pub sqes_min: u8,
    /// Maximum submission queue entry size (log2 bytes)
    pub sqes_max: u8,
    /// Minimum completion queue entry size (log2 bytes)
    pub cqes_min: u8,
    /// Maximum completion queue entry size (log2 bytes)
    pub cqes_max: u8,
    /// Maximum outstanding commands
    pub maxcmd: u16,
    /// Number of namespaces
    pub nn: u32,
    /// Optional NVM command support
    pub oncs: u16,
    /// Volatile write cache
    pub vwc: u8,
    /// Maximum number of allowed namespaces
    pub mnan: u32,
    /// NVM subsystem NVMe qualified name
    pub subnqn: String,
}

impl ControllerData {
    /// Decode an identify controller data structure.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, IDENTIFY_SIZE)?;
        Ok(Self {
            vid: le_u16(buf, 0),
            ssvid: le_u16(buf, 2),
            serial_number: extract_string(buf, 4, 24),
            model_number: extract_string(buf, 24, 64),
            firmware_revision: extract_string(buf, 64, 72),
            rab: buf[72],
            ieee: [buf[73], buf[74], buf[75]],
            cmic: buf[76],
            mdts: buf[77],
            cntlid: le_u16(buf, 78),
            ver: le_u32(buf, 80),
            rtd3r: le_u32(buf, 84),
            rtd3e: le_u32(buf, 88),
            oaes: le_u32(buf, 92),
            ctratt: le_u32(buf, 96),
            cntrltype: buf[111],
            oacs: le_u16(buf, 256),
            acl: buf[258],
            aerl: buf[259],
            frmw: buf[260],
            lpa: buf[261],
            elpe: buf[262],
            npss: buf[263],
            wctemp: le_u16(buf, 266),
            cctemp: le_u16(buf, 268),
            tnvmcap: le_u128(buf, 280),
            unvmcap: le_u128(buf, 296),
            sqes_min: buf[512] & 0xF,
            sqes_max: buf[512] >> 4,
            cqes_min: buf[513] & 0xF,
            cqes_max: buf[513] >> 4,
            maxcmd: le_u16(buf, 514),
            nn: le_u32(buf, 516),
            oncs: le_u16(buf, 520),
            vwc: buf[525],
            mnan: le_u32(buf, 540),
            subnqn: extract_string(buf, 768, 1024),
        })
    }

    /// NVMe version as (major, minor, tertiary).
    pub fn version(&self) -> (u16, u8, u8) {
        ((self.ver >> 16) as u16, (self.ver >> 8) as u8, self.ver as u8)
    }
}

impl fmt::Display for ControllerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<12} : {:#06x}", "vid", self.vid)?;
        writeln!(f, "{:<12} : {:#06x}", "ssvid", self.ssvid)?;
        writeln!(f, "{:<12} : {}", "sn", self.serial_number)?;
        writeln!(f, "{:<12} : {}", "mn", self.model_number)?;
        writeln!(f, "{:<12} : {}", "fr", self.firmware_revision)?;
        writeln!(f, "{:<12} : {}", "rab", self.rab)?;
        writeln!(
            f,
            "{:<12} : {:02x}{:02x}{:02x}",
            "ieee", self.ieee[2], self.ieee[1], self.ieee[0]
        )?;
        writeln!(f, "{:<12} : {:#x}", "cmic", self.cmic)?;
        writeln!(f, "{:<12} : {}", "mdts", self.mdts)?;
        writeln!(f, "{:<12} : {}", "cntlid", self.cntlid)?;
        let (major, minor, tertiary) = self.version();
        writeln!(f, "{:<12} : {}.{}.{}", "ver", major, minor, tertiary)?;
        writeln!(f, "{:<12} : {}", "rtd3r", self.rtd3r)?;
        writeln!(f, "{:<12} : {}", "rtd3e", self.rtd3e)?;
        writeln!(f, "{:<12} : {:#x}", "oaes", self.oaes)?;
        writeln!(f, "{:<12} : {:#x}", "ctratt", self.ctratt)?;
        writeln!(f, "{:<12} : {}", "cntrltype", self.cntrltype)?;
        writeln!(f, "{:<12} : {:#x}", "oacs", self.oacs)?;
        writeln!(f, "{:<12} : {}", "acl", self.acl)?;
        writeln!(f, "{:<12} : {}", "aerl", self.aerl)?;
        writeln!(f, "{:<12} : {:#x}", "frmw", self.frmw)?;
        writeln!(f, "{:<12} : {:#x}", "lpa", self.lpa)?;
        writeln!(f, "{:<12} : {}", "elpe", self.elpe)?;
        writeln!(f, "{:<12} : {}", "npss", self.npss)?;
        writeln!(f, "{:<12} : {}", "wctemp", self.wctemp)?;
        writeln!(f, "{:<12} : {}", "cctemp", self.cctemp)?;
        writeln!(f, "{:<12} : {}", "tnvmcap", self.tnvmcap)?;
        writeln!(f, "{:<12} : {}", "unvmcap", self.unvmcap)?;
        writeln!(f, "{:<12} : {}..{}", "sqes", self.sqes_min, self.sqes_max)?;
        writeln!(f, "{:<12} : {}..{}", "cqes", self.cqes_min, self.cqes_max)?;
        writeln!(f, "{:<12} : {}", "maxcmd", self.maxcmd)?;
        writeln!(f, "{:<12} : {}", "nn", self.nn)?;
        writeln!(f, "{:<12} : {:#x}", "oncs", self.oncs)?;
        writeln!(f, "{:<12} : {:#x}", "vwc", self.vwc)?;
        writeln!(f, "{:<12} : {}", "mnan", self.mnan)?;
        write!(f, "{:<12} : {}", "subnqn", self.subnqn)
    }
}

/// One LBA format entry.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbaFormat {
    /// Metadata bytes per block
    pub metadata_size: u16,
    /// Block size as a power of two
    pub lba_data_size: u8,
    /// Relative performance
    pub relative_performance: u8,
}

impl LbaFormat {
    fn from_raw(raw: u32) -> Self {
        Self {
            metadata_size: raw as u16,
            lba_data_size: (raw >> 16) as u8,
            relative_performance: ((raw >> 24) & 0x3) as u8,
        }
    }

    /// Block size in bytes, zero for an unused entry.
    pub fn block_size(&self) -> u64 {
        if self.lba_data_size == 0 || self.lba_data_size >= 64 {
            0
        } else {
            1 << self.lba_data_size
        }
    }
}

/// NVMe namespace data structure.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct NamespaceData {
    /// Namespace size in blocks
    pub nsze: u64,
    /// Namespace capacity in blocks
    pub ncap: u64,
    /// Namespace utilization in blocks
    pub nuse: u64,
    /// Namespace features
    pub nsfeat: u8,
    /// Number of LBA formats, zero based
    pub nlbaf: u8,
    /// Formatted LBA size
    pub flbas: u8,
    /// Metadata capabilities
    pub mc: u8,
    /// End-to-end data protection capabilities
    pub dpc: u8,
    /// End-to-end data protection type settings
    pub dps: u8,
    /// Namespace multi-path I/O and sharing capabilities
    pub nmic: u8,
    /// NVM capacity in bytes
    pub nvmcap: u128,
    /// Namespace globally unique identifier
    pub nguid: [u8; 16],
    /// IEEE extended unique identifier
    pub eui64: [u8; 8],
    /// Supported LBA formats
    pub lba_formats: [LbaFormat; 16],
}

impl NamespaceData {
    /// Decode an identify namespace data structure.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, IDENTIFY_SIZE)?;
        let mut lba_formats = [LbaFormat::default(); 16];
        for (i, format) in lba_formats.iter_mut().enumerate() {
            *format = LbaFormat::from_raw(le_u32(buf, 128 + i * 4));
        }
        let mut nguid = [0u8; 16];
        nguid.copy_from_slice(&buf[104..120]);
        let mut eui64 = [0u8; 8];
        eui64.copy_from_slice(&buf[120..128]);
        Ok(Self {
            nsze: le_u64(buf, 0),
            ncap: le_u64(buf, 8),
            nuse: le_u64(buf, 16),
            nsfeat: buf[24],
            nlbaf: buf[25],
            flbas: buf[26],
            mc: buf[27],
            dpc: buf[28],
            dps: buf[29],
            nmic: buf[30],
            nvmcap: le_u128(buf, 48),
            nguid,
            eui64,
            lba_formats,
        })
    }

    /// The LBA format selected by FLBAS bits 3:0.
    pub fn current_format(&self) -> LbaFormat {
        self.lba_formats[(self.flbas & 0xF) as usize]
    }

    /// Block size of the selected format.
    pub fn block_size(&self) -> u64 {
        self.current_format().block_size()
    }

    /// Metadata size of the selected format.
    pub fn metadata_size(&self) -> u16 {
        self.current_format().metadata_size
    }
}

impl fmt::Display for NamespaceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<12} : {}", "nsze", self.nsze)?;
        writeln!(f, "{:<12} : {}", "ncap", self.ncap)?;
        writeln!(f, "{:<12} : {}", "nuse", self.nuse)?;
        writeln!(f, "{:<12} : {:#x}", "nsfeat", self.nsfeat)?;
        writeln!(f, "{:<12} : {}", "nlbaf", self.nlbaf)?;
        writeln!(f, "{:<12} : {:#x}", "flbas", self.flbas)?;
        writeln!(f, "{:<12} : {}", "nvmcap", self.nvmcap)?;
        for (i, format) in self.lba_formats.iter().enumerate().take(self.nlbaf as usize + 1) {
            let in_use = if i == (self.flbas & 0xF) as usize {
                " (in use)"
            } else {
                ""
            };
            writeln!(
                f,
                "lbaf {:>2}      : ms:{:<3} lbads:{:<2} rp:{}{}",
                i,
                format.metadata_size,
                format.lba_data_size,
                format.relative_performance,
                in_use
            )?;
        }
        write!(f, "{:<12} : {}", "block size", self.block_size())
    }
}

/// Decode a namespace-id list.
///
/// Stops at the first zero entry and never looks past the buffer or the
/// 1024 entries an identify page can hold.
pub fn namespace_list(buf: &[u8]) -> Vec<u32> {
    buf.chunks_exact(4)
        .take(MAX_NAMESPACE_LIST_ENTRIES)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .take_while(|&nsid| nsid != 0)
        .collect()
}
