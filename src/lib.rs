//! NVMe admin commands through the Windows inbox storage driver.
//!
//! This crate discovers NVMe controllers and the disks they expose, and
//! submits admin commands to them without a vendor driver:
//!
//! - Identify, Get Log Page and Get/Set Features through storage property
//!   queries and the protocol-command pass-through
//! - Two-phase vendor-specific commands (VSC)
//! - Raw sector I/O and SCSI READ/WRITE(16) and SECURITY PROTOCOL IN/OUT
//! - Controller enable, disable, remove, restart and rescan
//!
//! Everything OS specific sits behind [`IoctlDevice`], [`SectorFile`] and
//! [`DeviceTree`]; the Windows implementations live in `windows`.
#![deny(missing_docs)]

mod cmd;
mod disk;
mod error;
mod features;
mod handle;
mod identify;
mod log;
mod memory;
pub mod protocol;
mod scsi;
mod topology;
mod trace;
mod transport;

#[cfg(windows)]
pub mod windows;

// Commands and decoded data
pub use cmd::{
    COMMAND_SIZE, Command, DataDirection, FeatureId, IDENTIFY_SIZE, IdentifyCns, LogPageId,
    MAX_LOG_SIZE, get_features_cdw10, set_features_cdw10,
};
pub use error::{Error, ErrorKind, Result, StatusCode, StatusCodeType};
pub use features::{
    ArbitrationConfig, AsyncEventConfig, ErrorRecoveryConfig, FeatureSelector, FeatureValue,
    InterruptCoalescingConfig, InterruptVectorConfig, QueueCount, TemperatureThreshold,
    ThermalManagementConfig,
};
pub use identify::{
    ControllerData, LbaFormat, MAX_NAMESPACE_LIST_ENTRIES, NamespaceData, namespace_list,
};
pub use log::{ErrorLogEntry, SmartHealthInfo};

// Transport
pub use handle::{CLOSED_HANDLE, OwnedHandle, RawHandle};
pub use scsi::{
    RwCdb16, SCSI_TIMEOUT_SECS, ScsiDirection, ScsiOpcode, SecurityCdb12, SenseBuffer, cdb_flags,
};
pub use transport::{
    IoctlCode, IoctlDevice, NvmeDevice, ScsiData, ScsiRequest, SectorFile, VSC_PARAM_SIZE,
    VSC_SUB_OPCODE_NON_DATA, VSC_SUB_OPCODE_READ, VSC_SUB_OPCODE_WRITE, VscOpcode,
};

// Raw disk I/O
pub use disk::{
    DISCOVERY0_COM_ID, DISCOVERY0_LEN, Discovery0, Disk, SECURITY_PROTOCOL_TCG,
    volume_disk_number,
};
pub use memory::{AlignedBuffer, SECTOR_SIZE, round_up_to_sector};

// Topology
pub use topology::{
    Access, BOOT_VOLUME, DISK_SERVICE, DevInst, DeviceNode, DeviceProperty, DeviceTree,
    DriveLetterCache, NVME_SERVICE, NodeClass, NodeResolution, NvmeController,
    NvmeControllerList, PciBdf, PhysicalDisk, StateChange, TopologyConfig, parse_nsid,
};
pub use trace::{LatencyRecorder, TRACE_HEADER, TraceEvent};
