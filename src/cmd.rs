//! NVMe admin command encoding.

/// Size of a serialized admin command.
pub const COMMAND_SIZE: usize = 64;

/// Size of an identify data structure.
pub const IDENTIFY_SIZE: usize = 4096;

/// Largest log page fetched in one request.
pub const MAX_LOG_SIZE: usize = 0x1000;

/// An NVMe admin command (submission queue entry).
///
/// Data pointers are carried for completeness only: pass-through transports
/// move the payload through their own buffer regions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Opcode
    pub opcode: u8,
    /// Flags; FUSE (2 bits) | Reserved (4 bits) | PSDT (2 bits)
    pub flags: u8,
    /// Command ID
    pub cmd_id: u16,
    /// Namespace ID
    pub ns_id: u32,
    /// Metadata pointer
    pub md_ptr: u64,
    /// Data pointer (PRP or SGL)
    pub data_ptr: [u64; 2],
    /// Command dword 10
    pub cmd_10: u32,
    /// Command dword 11
    pub cmd_11: u32,
    /// Command dword 12
    pub cmd_12: u32,
    /// Command dword 13
    pub cmd_13: u32,
    /// Command dword 14
    pub cmd_14: u32,
    /// Command dword 15
    pub cmd_15: u32,
}

/// Identify Controller or Namespace Structure selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyCns {
    /// Identify namespace data for the given NSID.
    SpecificNamespace = 0x00,
    /// Identify controller data.
    Controller = 0x01,
    /// Active namespace ID list.
    ActiveNamespaces = 0x02,
    /// Namespace identification descriptor list.
    DescriptorNamespace = 0x03,
    /// Allocated namespace ID list.
    AllocatedNamespaceList = 0x10,
    /// Identify namespace data for an allocated NSID.
    SpecificAllocatedNamespace = 0x11,
    /// Controllers attached to the given NSID.
    ControllerListOfNsid = 0x12,
    /// Controllers in the subsystem.
    ControllerList = 0x13,
}

impl IdentifyCns {
    /// The CNS used for a namespace-id list query.
    pub fn namespace_list(all: bool) -> Self {
        if all {
            IdentifyCns::AllocatedNamespaceList
        } else {
            IdentifyCns::ActiveNamespaces
        }
    }
}

// Admin Command Opcodes
pub(crate) const OPCODE_GET_LOG_PAGE: u8 = 0x02;
pub(crate) const OPCODE_IDENTIFY: u8 = 0x06;
pub(crate) const OPCODE_SET_FEATURES: u8 = 0x09;
pub(crate) const OPCODE_GET_FEATURES: u8 = 0x0A;

/// Log page identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPageId {
    /// Supported log pages
    SupportedLogPages = 0x00,
    /// Error information
    ErrorInformation = 0x01,
    /// SMART / health information
    SmartHealth = 0x02,
    /// Firmware slot information
    FirmwareSlot = 0x03,
    /// Changed namespace list
    ChangedNamespaceList = 0x04,
    /// Commands supported and effects
    CommandsSupportedAndEffects = 0x05,
    /// Device self-test
    DeviceSelfTest = 0x06,
    /// Telemetry host-initiated
    TelemetryHostInitiated = 0x07,
    /// Telemetry controller-initiated
    TelemetryControllerInitiated = 0x08,
}

/// Feature identifiers with a dedicated decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureId {
    /// Arbitration
    Arbitration = 0x01,
    /// Power management
    PowerManagement = 0x02,
    /// LBA range type
    LbaRangeType = 0x03,
    /// Temperature threshold
    TemperatureThreshold = 0x04,
    /// Error recovery
    ErrorRecovery = 0x05,
    /// Volatile write cache
    VolatileWriteCache = 0x06,
    /// Number of queues
    NumberOfQueues = 0x07,
    /// Interrupt coalescing
    InterruptCoalescing = 0x08,
    /// Interrupt vector configuration
    InterruptVectorConfig = 0x09,
    /// Write atomicity normal
    WriteAtomicityNormal = 0x0A,
    /// Asynchronous event configuration
    AsyncEventConfig = 0x0B,
    /// Autonomous power state transition
    AutonomousPowerState = 0x0C,
    /// Host controlled thermal management
    HostControlledThermal = 0x10,
}

impl FeatureId {
    /// Look up a known feature id.
    pub fn from_raw(fid: u8) -> Option<Self> {
        Some(match fid {
            0x01 => FeatureId::Arbitration,
            0x02 => FeatureId::PowerManagement,
            0x03 => FeatureId::LbaRangeType,
            0x04 => FeatureId::TemperatureThreshold,
            0x05 => FeatureId::ErrorRecovery,
            0x06 => FeatureId::VolatileWriteCache,
            0x07 => FeatureId::NumberOfQueues,
            0x08 => FeatureId::InterruptCoalescing,
            0x09 => FeatureId::InterruptVectorConfig,
            0x0A => FeatureId::WriteAtomicityNormal,
            0x0B => FeatureId::AsyncEventConfig,
            0x0C => FeatureId::AutonomousPowerState,
            0x10 => FeatureId::HostControlledThermal,
            _ => return None,
        })
    }
}

/// Data transfer direction of an admin command, taken from opcode bits 1:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    /// No data transfer.
    None,
    /// Host to controller.
    ToDevice,
    /// Controller to host.
    FromDevice,
    /// Both directions; not expressible through the pass-through paths.
    Bidirectional,
}

impl DataDirection {
    /// Decode the two low opcode bits.
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode & 0x3 {
            0 => DataDirection::None,
            1 => DataDirection::ToDevice,
            2 => DataDirection::FromDevice,
            _ => DataDirection::Bidirectional,
        }
    }

    /// The two-bit wire encoding.
    pub fn bits(self) -> u8 {
        match self {
            DataDirection::None => 0,
            DataDirection::ToDevice => 1,
            DataDirection::FromDevice => 2,
            DataDirection::Bidirectional => 3,
        }
    }
}

impl Command {
    /// Serialize into the 64-byte submission entry layout.
    ///
    /// Every multi-byte field is little-endian.
    pub fn to_bytes(&self) -> [u8; COMMAND_SIZE] {
        let mut buf = [0u8; COMMAND_SIZE];
        buf[0] = self.opcode;
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.cmd_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ns_id.to_le_bytes());
        // bytes 8..16 reserved
        buf[16..24].copy_from_slice(&self.md_ptr.to_le_bytes());
        buf[24..32].copy_from_slice(&self.data_ptr[0].to_le_bytes());
        buf[32..40].copy_from_slice(&self.data_ptr[1].to_le_bytes());
        let dwords = [
            self.cmd_10,
            self.cmd_11,
            self.cmd_12,
            self.cmd_13,
            self.cmd_14,
            self.cmd_15,
        ];
        for (i, dw) in dwords.iter().enumerate() {
            let at = 40 + i * 4;
            buf[at..at + 4].copy_from_slice(&dw.to_le_bytes());
        }
        buf
    }

    /// Parse a 64-byte submission entry.
    pub fn from_bytes(buf: &[u8; COMMAND_SIZE]) -> Self {
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        Self {
            opcode: buf[0],
            flags: buf[1],
            cmd_id: u16::from_le_bytes([buf[2], buf[3]]),
            ns_id: u32_at(4),
            md_ptr: u64_at(16),
            data_ptr: [u64_at(24), u64_at(32)],
            cmd_10: u32_at(40),
            cmd_11: u32_at(44),
            cmd_12: u32_at(48),
            cmd_13: u32_at(52),
            cmd_14: u32_at(56),
            cmd_15: u32_at(60),
        }
    }

    /// Fused operation bits.
    pub fn fuse(&self) -> u8 {
        self.flags & 0x3
    }

    /// PRP or SGL selector bits.
    pub fn psdt(&self) -> u8 {
        (self.flags >> 6) & 0x3
    }

    /// Direction implied by the opcode.
    pub fn direction(&self) -> DataDirection {
        DataDirection::from_opcode(self.opcode)
    }

    /// Identify, with the controller id placed in CDW10 bits 31:16.
    pub fn identify(cmd_id: u16, ns_id: u32, cns: IdentifyCns, cntid: u16) -> Self {
        Self {
            opcode: OPCODE_IDENTIFY,
            cmd_id,
            ns_id,
            cmd_10: ((cntid as u32) << 16) | (cns as u32),
            ..Default::default()
        }
    }

    /// Get Log Page covering `num_bytes`, rounded down to whole dwords.
    pub fn get_log_page(cmd_id: u16, ns_id: u32, log_id: u8, num_bytes: u32, offset: u64) -> Self {
        let num_dwords = (num_bytes / 4).max(1);
        Self {
            opcode: OPCODE_GET_LOG_PAGE,
            cmd_id,
            ns_id,
            cmd_10: ((num_dwords - 1) << 16) | (log_id as u32),
            cmd_12: offset as u32,
            cmd_13: (offset >> 32) as u32,
            ..Default::default()
        }
    }

    /// Set Features; `save` sets the SV bit.
    pub fn set_features(cmd_id: u16, feature_id: u8, value: u32, save: bool) -> Self {
        Self {
            opcode: OPCODE_SET_FEATURES,
            cmd_id,
            cmd_10: set_features_cdw10(feature_id, save),
            cmd_11: value,
            ..Default::default()
        }
    }

    /// Get Features with the selector in CDW10 bits 10:8.
    pub fn get_features(cmd_id: u16, feature_id: u8, sel: u8, cdw11: u32) -> Self {
        Self {
            opcode: OPCODE_GET_FEATURES,
            cmd_id,
            cmd_10: get_features_cdw10(feature_id, sel),
            cmd_11: cdw11,
            ..Default::default()
        }
    }
}

/// CDW10 of Get Features: FID in bits 7:0, SEL in bits 10:8.
pub fn get_features_cdw10(feature_id: u8, sel: u8) -> u32 {
    (((sel & 0x7) as u32) << 8) | feature_id as u32
}

/// CDW10 of Set Features: FID in bits 7:0, SV in bit 31.
pub fn set_features_cdw10(feature_id: u8, save: bool) -> u32 {
    let sv = if save { 0x8000_0000 } else { 0 };
    sv | feature_id as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dwords_are_little_endian() {
        let cmd = Command {
            opcode: OPCODE_GET_FEATURES,
            cmd_id: 0x1234,
            ns_id: 0xAABB_CCDD,
            cmd_10: 0x0102_0304,
            cmd_15: 0xDEAD_BEEF,
            ..Default::default()
        };
        let raw = cmd.to_bytes();
        assert_eq!(raw[0], 0x0A);
        assert_eq!(&raw[2..4], &[0x34, 0x12]);
        assert_eq!(&raw[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&raw[40..44], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&raw[60..64], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(Command::from_bytes(&raw), cmd);
    }

    #[test]
    fn identify_layout() {
        let cmd = Command::identify(0, 0, IdentifyCns::ControllerListOfNsid, 0x0042);
        assert_eq!(cmd.cmd_10, 0x0042_0012);
        assert_eq!(cmd.direction(), DataDirection::FromDevice);
    }

    #[test]
    fn get_log_page_numd_is_zero_based() {
        let cmd = Command::get_log_page(0, 0xFFFF_FFFF, LogPageId::SmartHealth as u8, 512, 0);
        assert_eq!(cmd.cmd_10, (127 << 16) | 0x02);
        let full = Command::get_log_page(0, 0, 0xC0, MAX_LOG_SIZE as u32, 0);
        assert_eq!(full.cmd_10 >> 16, 1023);
    }

    #[test]
    fn feature_dwords() {
        assert_eq!(get_features_cdw10(0x06, 2), 0x0206);
        // selector is three bits wide
        assert_eq!(get_features_cdw10(0x06, 0xF), 0x0706);
        let set = Command::set_features(0, 0x07, 0x0003_0003, true);
        assert_eq!(set.cmd_10, 0x8000_0007);
        assert_eq!(set.cmd_11, 0x0003_0003);
        assert_eq!(set.direction(), DataDirection::ToDevice);
    }

    #[test]
    fn flags_bits() {
        let cmd = Command {
            flags: 0b1100_0010,
            ..Default::default()
        };
        assert_eq!(cmd.fuse(), 2);
        assert_eq!(cmd.psdt(), 3);
    }

    #[test]
    fn direction_from_opcode() {
        assert_eq!(DataDirection::from_opcode(0xF0), DataDirection::None);
        assert_eq!(DataDirection::from_opcode(0xF1), DataDirection::ToDevice);
        assert_eq!(DataDirection::from_opcode(0xF2), DataDirection::FromDevice);
        assert_eq!(DataDirection::from_opcode(0x03), DataDirection::Bidirectional);
    }
}
