use std::fmt::{self, Display};
use std::io;

/// NVMe status code type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCodeType {
    /// Generic command status
    Generic,
    /// Command specific status
    CommandSpecific,
    /// Media and data integrity errors
    MediaError,
    /// Path related errors
    PathError,
    /// Vendor specific
    VendorSpecific,
}

/// NVMe command status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode {
    /// Status code type
    pub sct: StatusCodeType,
    /// Status code value
    pub sc: u8,
}

impl StatusCode {
    /// Create a new status code.
    pub fn new(sct: StatusCodeType, sc: u8) -> Self {
        Self { sct, sc }
    }

    /// Successful completion.
    pub const SUCCESS: Self = Self {
        sct: StatusCodeType::Generic,
        sc: 0,
    };

    /// Parse from a raw status field.
    ///
    /// Bit 0 is the phase tag, bits 1..=8 the status code and bits 9..=11 the
    /// status code type. The More and Do Not Retry bits are ignored.
    pub fn from_raw(status: u16) -> Self {
        let sc = ((status >> 1) & 0xFF) as u8;
        let sct_val = ((status >> 9) & 0x7) as u8;

        let sct = match sct_val {
            0 => StatusCodeType::Generic,
            1 => StatusCodeType::CommandSpecific,
            2 => StatusCodeType::MediaError,
            3 => StatusCodeType::PathError,
            7 => StatusCodeType::VendorSpecific,
            _ => StatusCodeType::Generic,
        };

        Self { sct, sc }
    }

    /// Whether this is a successful completion.
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    /// Encode back into the raw status field layout (phase tag cleared).
    pub fn to_raw(&self) -> u16 {
        let sct: u16 = match self.sct {
            StatusCodeType::Generic => 0,
            StatusCodeType::CommandSpecific => 1,
            StatusCodeType::MediaError => 2,
            StatusCodeType::PathError => 3,
            StatusCodeType::VendorSpecific => 7,
        };
        (sct << 9) | ((self.sc as u16) << 1)
    }

    /// Get human-readable description.
    pub fn description(&self) -> &'static str {
        match (self.sct, self.sc) {
            // Generic command status
            (StatusCodeType::Generic, 0x00) => "Success",
            (StatusCodeType::Generic, 0x01) => "Invalid Command Opcode",
            (StatusCodeType::Generic, 0x02) => "Invalid Field in Command",
            (StatusCodeType::Generic, 0x03) => "Command ID Conflict",
            (StatusCodeType::Generic, 0x04) => "Data Transfer Error",
            (StatusCodeType::Generic, 0x05) => "Commands Aborted due to Power Loss Notification",
            (StatusCodeType::Generic, 0x06) => "Internal Error",
            (StatusCodeType::Generic, 0x07) => "Command Abort Requested",
            (StatusCodeType::Generic, 0x08) => "Command Aborted due to SQ Deletion",
            (StatusCodeType::Generic, 0x09) => "Command Aborted due to Failed Fused Command",
            (StatusCodeType::Generic, 0x0A) => "Command Aborted due to Missing Fused Command",
            (StatusCodeType::Generic, 0x0B) => "Invalid Namespace or Format",
            (StatusCodeType::Generic, 0x0C) => "Command Sequence Error",
            (StatusCodeType::Generic, 0x0D) => "Invalid SGL Segment Descriptor",
            (StatusCodeType::Generic, 0x0E) => "Invalid Number of SGL Descriptors",
            (StatusCodeType::Generic, 0x0F) => "Data SGL Length Invalid",
            (StatusCodeType::Generic, 0x10) => "Metadata SGL Length Invalid",
            (StatusCodeType::Generic, 0x11) => "SGL Descriptor Type Invalid",
            (StatusCodeType::Generic, 0x12) => "Invalid Use of Controller Memory Buffer",
            (StatusCodeType::Generic, 0x13) => "PRP Offset Invalid",
            (StatusCodeType::Generic, 0x14) => "Atomic Write Unit Exceeded",
            (StatusCodeType::Generic, 0x15) => "Operation Denied",
            (StatusCodeType::Generic, 0x16) => "SGL Offset Invalid",
            (StatusCodeType::Generic, 0x17) => "Host Identifier Inconsistent Format",
            (StatusCodeType::Generic, 0x18) => "Keep Alive Timeout Expired",
            (StatusCodeType::Generic, 0x19) => "Keep Alive Timeout Invalid",
            (StatusCodeType::Generic, 0x1A) => "Command Aborted due to Preemption",
            (StatusCodeType::Generic, 0x1B) => "Sanitize Failed",
            (StatusCodeType::Generic, 0x1C) => "Sanitize In Progress",
            (StatusCodeType::Generic, 0x1D) => "SGL Data Block Granularity Invalid",
            (StatusCodeType::Generic, 0x1E) => "Command Not Supported for Queue in CMB",
            (StatusCodeType::Generic, 0x1F) => "Namespace is Write Protected",
            (StatusCodeType::Generic, 0x20) => "Command Interrupted",
            (StatusCodeType::Generic, 0x21) => "Transient Transport Error",

            // Command specific errors
            (StatusCodeType::CommandSpecific, 0x00) => "Completion Queue Invalid",
            (StatusCodeType::CommandSpecific, 0x01) => "Invalid Queue Identifier",
            (StatusCodeType::CommandSpecific, 0x02) => "Invalid Queue Size",
            (StatusCodeType::CommandSpecific, 0x03) => "Abort Command Limit Exceeded",
            (StatusCodeType::CommandSpecific, 0x04) => "Reserved",
            (StatusCodeType::CommandSpecific, 0x05) => "Asynchronous Event Request Limit Exceeded",
            (StatusCodeType::CommandSpecific, 0x06) => "Invalid Firmware Slot",
            (StatusCodeType::CommandSpecific, 0x07) => "Invalid Firmware Image",
            (StatusCodeType::CommandSpecific, 0x08) => "Invalid Interrupt Vector",
            (StatusCodeType::CommandSpecific, 0x09) => "Invalid Log Page",
            (StatusCodeType::CommandSpecific, 0x0A) => "Invalid Format",
            (StatusCodeType::CommandSpecific, 0x0B) => "Firmware Activation Requires Conventional Reset",
            (StatusCodeType::CommandSpecific, 0x0C) => "Invalid Queue Deletion",
            (StatusCodeType::CommandSpecific, 0x0D) => "Feature Identifier Not Saveable",
            (StatusCodeType::CommandSpecific, 0x0E) => "Feature Not Changeable",
            (StatusCodeType::CommandSpecific, 0x0F) => "Feature Not Namespace Specific",
            (StatusCodeType::CommandSpecific, 0x10) => "Firmware Activation Requires NVM Subsystem Reset",
            (StatusCodeType::CommandSpecific, 0x11) => "Firmware Activation Requires Reset",
            (StatusCodeType::CommandSpecific, 0x12) => "Firmware Activation Requires Maximum Time Violation",
            (StatusCodeType::CommandSpecific, 0x13) => "Firmware Activation Prohibited",
            (StatusCodeType::CommandSpecific, 0x14) => "Overlapping Range",
            (StatusCodeType::CommandSpecific, 0x15) => "Namespace Insufficient Capacity",
            (StatusCodeType::CommandSpecific, 0x16) => "Namespace Identifier Unavailable",
            (StatusCodeType::CommandSpecific, 0x18) => "Namespace Already Attached",
            (StatusCodeType::CommandSpecific, 0x19) => "Namespace Is Private",
            (StatusCodeType::CommandSpecific, 0x1A) => "Namespace Not Attached",
            (StatusCodeType::CommandSpecific, 0x1B) => "Thin Provisioning Not Supported",
            (StatusCodeType::CommandSpecific, 0x1C) => "Controller List Invalid",
            (StatusCodeType::CommandSpecific, 0x1D) => "Device Self-test In Progress",
            (StatusCodeType::CommandSpecific, 0x1E) => "Boot Partition Write Prohibited",
            (StatusCodeType::CommandSpecific, 0x1F) => "Invalid Controller Identifier",
            (StatusCodeType::CommandSpecific, 0x20) => "Invalid Secondary Controller State",
            (StatusCodeType::CommandSpecific, 0x21) => "Invalid Number of Controller Resources",
            (StatusCodeType::CommandSpecific, 0x22) => "Invalid Resource Identifier",
            (StatusCodeType::CommandSpecific, 0x23) => "Sanitize Prohibited While Persistent Memory Region is Enabled",
            (StatusCodeType::CommandSpecific, 0x24) => "ANA Group Identifier Invalid",
            (StatusCodeType::CommandSpecific, 0x25) => "ANA Attach Failed",

            // Media and data integrity errors
            (StatusCodeType::MediaError, 0x80) => "Write Fault",
            (StatusCodeType::MediaError, 0x81) => "Unrecovered Read Error",
            (StatusCodeType::MediaError, 0x82) => "End-to-End Guard Check Error",
            (StatusCodeType::MediaError, 0x83) => "End-to-End Application Tag Check Error",
            (StatusCodeType::MediaError, 0x84) => "End-to-End Reference Tag Check Error",
            (StatusCodeType::MediaError, 0x85) => "Compare Failure",
            (StatusCodeType::MediaError, 0x86) => "Access Denied",
            (StatusCodeType::MediaError, 0x87) => "Deallocated or Unwritten Logical Block",

            // Path related errors (NVMe 2.3)
            (StatusCodeType::PathError, 0x00) => "Internal Path Error",
            (StatusCodeType::PathError, 0x01) => "Asymmetric Access Persistent Loss",
            (StatusCodeType::PathError, 0x02) => "Asymmetric Access Inaccessible",
            (StatusCodeType::PathError, 0x03) => "Asymmetric Access Transition",
            (StatusCodeType::PathError, 0x60) => "Controller Pathing Error",
            (StatusCodeType::PathError, 0x70) => "Host Pathing Error",
            (StatusCodeType::PathError, 0x71) => "Command Aborted By Host",

            _ => "Unknown Error",
        }
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (sct {:?}, sc {:#04x})",
            self.description(),
            self.sct,
            self.sc
        )
    }
}

/// Broad failure classes shared by every operation in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The OS call itself failed or returned something unusable.
    Transport,
    /// The device completed the command with a non-success status.
    ProtocolStatus,
    /// The caller supplied an unusable argument.
    Validation,
    /// The requested disk or controller is not in the topology snapshot.
    Lookup,
    /// A device string did not match its expected grammar.
    Parse,
}

/// Contains all possible errors that can occur while talking to a device.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An OS pass-through or device call failed.
    #[error("{op} failed: {source}")]
    Transport {
        /// The operation that was attempted.
        op: &'static str,
        /// The OS error.
        #[source]
        source: io::Error,
    },
    /// The returned data descriptor did not carry the expected header.
    #[error("invalid {0} data descriptor")]
    InvalidDescriptor(&'static str),
    /// The OS returned fewer bytes than the structure requires.
    #[error("response too short: expected {expected} bytes, got {actual}")]
    ShortResponse {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
    /// No device handle is open for the target.
    #[error("no device handle is open for {0}")]
    NotOpen(String),
    /// NVMe status code error.
    #[error("NVMe error: {0}")]
    Status(StatusCode),
    /// A SCSI pass-through completed with a non-good SCSI status.
    #[error("SCSI status {status:#04x}")]
    Scsi {
        /// SCSI status byte.
        status: u8,
        /// Raw sense data.
        sense: [u8; 32],
    },
    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Bidirectional transfers cannot be expressed through the pass-through.
    #[error("data transfer direction {0} is not supported")]
    UnsupportedDirection(u8),
    /// Requested disk or controller does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// A device string did not match its grammar.
    #[error("cannot parse {what} from {input:?}")]
    Parse {
        /// What was being parsed.
        what: &'static str,
        /// The offending input.
        input: String,
    },
}

impl Error {
    /// Wrap an OS error with the operation that produced it.
    pub fn transport(op: &'static str, source: io::Error) -> Self {
        Error::Transport { op, source }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. }
            | Error::InvalidDescriptor(_)
            | Error::ShortResponse { .. }
            | Error::NotOpen(_) => ErrorKind::Transport,
            Error::Status(_) | Error::Scsi { .. } => ErrorKind::ProtocolStatus,
            Error::InvalidArgument(_) | Error::UnsupportedDirection(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::Lookup,
            Error::Parse { .. } => ErrorKind::Parse,
        }
    }
}

/// Result type for NVMe operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_field_layout() {
        // sct 1 (command specific), sc 0x0D, phase bit set
        let raw = (1 << 9) | (0x0D << 1) | 1;
        let status = StatusCode::from_raw(raw);
        assert_eq!(status.sct, StatusCodeType::CommandSpecific);
        assert_eq!(status.sc, 0x0D);
        assert_eq!(status.description(), "Feature Identifier Not Saveable");
        assert_eq!(status.to_raw(), raw & !1);
    }

    #[test]
    fn success_ignores_phase_and_retry_bits() {
        assert!(StatusCode::from_raw(0x0001).is_success());
        assert!(StatusCode::from_raw(0x8000).is_success());
        assert!(!StatusCode::from_raw(0x0002).is_success());
    }

    #[test]
    fn error_kinds() {
        let err = Error::transport("query property", io::Error::other("boom"));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(
            Error::Status(StatusCode::from_raw(0x4)).kind(),
            ErrorKind::ProtocolStatus
        );
        assert_eq!(Error::NotFound("disk 3".into()).kind(), ErrorKind::Lookup);
        assert_eq!(Error::UnsupportedDirection(3).kind(), ErrorKind::Validation);
    }
}
