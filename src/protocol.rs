//! Byte layouts of the storage pass-through structures.
//!
//! Requests are built into plain byte vectors and replies are read back from
//! fixed offsets, so nothing here depends on the host OS headers.

use crate::cmd::{COMMAND_SIZE, Command, DataDirection};
use crate::error::{Error, Result};

pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

pub(crate) fn le_u128(buf: &[u8], at: usize) -> u128 {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&buf[at..at + 16]);
    u128::from_le_bytes(raw)
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn ensure_len(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() < expected {
        return Err(Error::ShortResponse {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// `STORAGE_PROTOCOL_TYPE` value for NVMe.
pub const PROTOCOL_TYPE_NVME: u32 = 3;

/// Storage property identifiers understood by the NVMe miniport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyId {
    /// Addressed to the adapter (controller scope).
    AdapterProtocolSpecific = 49,
    /// Addressed to the device (namespace scope).
    DeviceProtocolSpecific = 50,
}

impl PropertyId {
    /// Look up a raw property id.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            49 => Some(PropertyId::AdapterProtocolSpecific),
            50 => Some(PropertyId::DeviceProtocolSpecific),
            _ => None,
        }
    }
}

/// What a protocol-specific property request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolDataType {
    /// Identify data; value is CNS, sub-value is NSID.
    Identify = 1,
    /// Log page; value is LID.
    LogPage = 2,
    /// Feature; value is CDW10, sub-value is CDW11.
    Feature = 3,
}

impl ProtocolDataType {
    /// Look up a raw data type.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(ProtocolDataType::Identify),
            2 => Some(ProtocolDataType::LogPage),
            3 => Some(ProtocolDataType::Feature),
            _ => None,
        }
    }
}

/// `PropertyId` and `QueryType`/`SetType` precede `AdditionalParameters`.
pub const PROPERTY_HEADER_LEN: usize = 8;
/// `STORAGE_PROTOCOL_SPECIFIC_DATA`
pub const SPECIFIC_DATA_LEN: usize = 40;
/// `STORAGE_PROTOCOL_SPECIFIC_DATA_EXT`
pub const SPECIFIC_DATA_EXT_LEN: usize = 64;
/// `STORAGE_PROTOCOL_DATA_DESCRIPTOR`
pub const DESCRIPTOR_LEN: usize = DESCRIPTOR_SPECIFIC_DATA_OFFSET + SPECIFIC_DATA_LEN;
/// `STORAGE_PROTOCOL_DATA_DESCRIPTOR_EXT`
pub const DESCRIPTOR_EXT_LEN: usize = DESCRIPTOR_SPECIFIC_DATA_OFFSET + SPECIFIC_DATA_EXT_LEN;

/// Offset of `ProtocolSpecificData` inside a data descriptor.
///
/// `ProtocolDataOffset` in a reply counts from here, not from the start of
/// the buffer.
pub const DESCRIPTOR_SPECIFIC_DATA_OFFSET: usize = 8;

// Field offsets shared by STORAGE_PROTOCOL_SPECIFIC_DATA and its _EXT form.
const SPD_PROTOCOL_TYPE: usize = 0;
const SPD_DATA_TYPE: usize = 4;
const SPD_REQUEST_VALUE: usize = 8;
const SPD_REQUEST_SUB_VALUE: usize = 12;
const SPD_DATA_OFFSET: usize = 16;
const SPD_DATA_LENGTH: usize = 20;
const SPD_FIXED_RETURN: usize = 24;

/// A protocol-specific property request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolRequest {
    /// Request kind
    pub data_type: ProtocolDataType,
    /// `ProtocolDataRequestValue`
    pub value: u32,
    /// `ProtocolDataRequestSubValue`
    pub sub_value: u32,
    /// Payload bytes expected back (query) or sent (set)
    pub data_len: u32,
}

impl ProtocolRequest {
    /// Build a request.
    pub fn new(data_type: ProtocolDataType, value: u32, sub_value: u32, data_len: u32) -> Self {
        Self {
            data_type,
            value,
            sub_value,
            data_len,
        }
    }

    fn write_specific(&self, buf: &mut [u8], header_len: usize) {
        let offset = if self.data_len > 0 { header_len as u32 } else { 0 };
        put_u32(buf, SPD_PROTOCOL_TYPE, PROTOCOL_TYPE_NVME);
        put_u32(buf, SPD_DATA_TYPE, self.data_type as u32);
        put_u32(buf, SPD_REQUEST_VALUE, self.value);
        put_u32(buf, SPD_REQUEST_SUB_VALUE, self.sub_value);
        put_u32(buf, SPD_DATA_OFFSET, offset);
        put_u32(buf, SPD_DATA_LENGTH, self.data_len);
    }

    /// `STORAGE_PROPERTY_QUERY` followed by `STORAGE_PROTOCOL_SPECIFIC_DATA`
    /// and room for the payload.
    pub fn query_buffer(&self, property: PropertyId) -> Vec<u8> {
        let len = PROPERTY_HEADER_LEN + SPECIFIC_DATA_LEN + self.data_len as usize;
        let mut buf = vec![0u8; len];
        put_u32(&mut buf, 0, property as u32);
        // QueryType = PropertyStandardQuery (0)
        self.write_specific(&mut buf[PROPERTY_HEADER_LEN..], SPECIFIC_DATA_LEN);
        buf
    }

    /// `STORAGE_PROPERTY_SET` followed by `STORAGE_PROTOCOL_SPECIFIC_DATA_EXT`
    /// and room for the payload.
    pub fn set_buffer(&self, property: PropertyId) -> Vec<u8> {
        let len = PROPERTY_HEADER_LEN + SPECIFIC_DATA_EXT_LEN + self.data_len as usize;
        let mut buf = vec![0u8; len];
        put_u32(&mut buf, 0, property as u32);
        // SetType = PropertyStandardSet (0)
        self.write_specific(&mut buf[PROPERTY_HEADER_LEN..], SPECIFIC_DATA_EXT_LEN);
        buf
    }

    /// Parse a request buffer built by [`query_buffer`](Self::query_buffer)
    /// or [`set_buffer`](Self::set_buffer).
    pub fn parse(buf: &[u8]) -> Result<(PropertyId, Self)> {
        ensure_len(buf, PROPERTY_HEADER_LEN + SPECIFIC_DATA_LEN)?;
        let property = PropertyId::from_raw(le_u32(buf, 0))
            .ok_or(Error::InvalidDescriptor("property request"))?;
        let spd = &buf[PROPERTY_HEADER_LEN..];
        let data_type = ProtocolDataType::from_raw(le_u32(spd, SPD_DATA_TYPE))
            .ok_or(Error::InvalidDescriptor("property request"))?;
        Ok((
            property,
            Self {
                data_type,
                value: le_u32(spd, SPD_REQUEST_VALUE),
                sub_value: le_u32(spd, SPD_REQUEST_SUB_VALUE),
                data_len: le_u32(spd, SPD_DATA_LENGTH),
            },
        ))
    }
}

/// Decoded `STORAGE_PROTOCOL_DATA_DESCRIPTOR`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyReply {
    /// Completion dword 0 of the underlying admin command.
    pub fixed_return: u32,
    /// Returned payload.
    pub payload: Vec<u8>,
}

/// Byte range of the payload inside a reply descriptor.
fn payload_range(buf: &[u8]) -> (usize, usize) {
    let spd = DESCRIPTOR_SPECIFIC_DATA_OFFSET;
    let offset = le_u32(buf, spd + SPD_DATA_OFFSET) as usize;
    let len = le_u32(buf, spd + SPD_DATA_LENGTH) as usize;
    (spd + offset, len)
}

/// Validate a query reply and extract its payload.
///
/// `expected_len` is the payload size that was requested; zero for requests
/// whose only result is the fixed return dword.
pub fn parse_query_reply(buf: &[u8], expected_len: usize) -> Result<PropertyReply> {
    ensure_len(buf, DESCRIPTOR_LEN)?;
    if le_u32(buf, 0) as usize != DESCRIPTOR_LEN || le_u32(buf, 4) as usize != DESCRIPTOR_LEN {
        return Err(Error::InvalidDescriptor("protocol data"));
    }
    let fixed_return = le_u32(buf, DESCRIPTOR_SPECIFIC_DATA_OFFSET + SPD_FIXED_RETURN);
    if expected_len == 0 {
        return Ok(PropertyReply {
            fixed_return,
            payload: Vec::new(),
        });
    }

    let (start, len) = payload_range(buf);
    if start < DESCRIPTOR_LEN || len < expected_len {
        return Err(Error::InvalidDescriptor("protocol data"));
    }
    ensure_len(buf, start + expected_len)?;
    Ok(PropertyReply {
        fixed_return,
        payload: buf[start..start + expected_len].to_vec(),
    })
}

/// Validate a set reply and return its fixed return dword.
///
/// An empty reply is a success with no completion data.
pub fn parse_set_reply(buf: &[u8], returned: usize) -> Result<u32> {
    if returned == 0 {
        return Ok(0);
    }
    ensure_len(buf, DESCRIPTOR_LEN)?;
    let (version, size) = (le_u32(buf, 0) as usize, le_u32(buf, 4) as usize);
    if version != size || (size != DESCRIPTOR_LEN && size != DESCRIPTOR_EXT_LEN) {
        return Err(Error::InvalidDescriptor("protocol data"));
    }
    Ok(le_u32(buf, DESCRIPTOR_SPECIFIC_DATA_OFFSET + SPD_FIXED_RETURN))
}

/// Write a reply descriptor carrying `payload`.
///
/// This is the device side of [`parse_query_reply`], used by software devices.
pub fn write_query_reply(buf: &mut [u8], request: &ProtocolRequest, fixed_return: u32, payload: &[u8]) -> Result<()> {
    ensure_len(buf, DESCRIPTOR_LEN + payload.len())?;
    put_u32(buf, 0, DESCRIPTOR_LEN as u32);
    put_u32(buf, 4, DESCRIPTOR_LEN as u32);
    let spd = DESCRIPTOR_SPECIFIC_DATA_OFFSET;
    request.write_specific(&mut buf[spd..], SPECIFIC_DATA_LEN);
    put_u32(buf, spd + SPD_FIXED_RETURN, fixed_return);
    if !payload.is_empty() {
        put_u32(buf, spd + SPD_DATA_OFFSET, SPECIFIC_DATA_LEN as u32);
        put_u32(buf, spd + SPD_DATA_LENGTH, payload.len() as u32);
        buf[DESCRIPTOR_LEN..DESCRIPTOR_LEN + payload.len()].copy_from_slice(payload);
    }
    Ok(())
}

/// `STORAGE_PROTOCOL_STRUCTURE_VERSION`
const PROTOCOL_STRUCTURE_VERSION: u32 = 1;
/// `sizeof(STORAGE_PROTOCOL_COMMAND)` including its one-byte command stub.
const PROTOCOL_COMMAND_STRUCT_LEN: u32 = 84;
/// `STORAGE_PROTOCOL_COMMAND_FLAG_ADAPTER_REQUEST`
const FLAG_ADAPTER_REQUEST: u32 = 0x8000_0000;
/// `STORAGE_PROTOCOL_SPECIFIC_NVME_ADMIN_COMMAND`
const NVME_ADMIN_COMMAND: u32 = 1;
/// `STORAGE_PROTOCOL_STATUS_SUCCESS`
pub const PROTOCOL_STATUS_SUCCESS: u32 = 1;

/// Offset of the inline command block in `STORAGE_PROTOCOL_COMMAND`.
pub const PROTOCOL_COMMAND_HEADER_LEN: usize = 80;
/// `sizeof(NVME_ERROR_INFO_LOG)`
pub const ERROR_INFO_LEN: usize = 64;
/// Seconds the miniport waits before failing a protocol command.
pub const PROTOCOL_COMMAND_TIMEOUT_SECS: u32 = 30;

const PC_VERSION: usize = 0;
const PC_LENGTH: usize = 4;
const PC_PROTOCOL_TYPE: usize = 8;
const PC_FLAGS: usize = 12;
const PC_RETURN_STATUS: usize = 16;
const PC_ERROR_CODE: usize = 20;
const PC_COMMAND_LENGTH: usize = 24;
const PC_ERROR_INFO_LENGTH: usize = 28;
const PC_TO_DEVICE_LENGTH: usize = 32;
const PC_FROM_DEVICE_LENGTH: usize = 36;
const PC_TIMEOUT: usize = 40;
const PC_ERROR_INFO_OFFSET: usize = 44;
const PC_TO_DEVICE_OFFSET: usize = 48;
const PC_FROM_DEVICE_OFFSET: usize = 52;
const PC_COMMAND_SPECIFIC: usize = 56;
const PC_FIXED_RETURN: usize = 64;

/// Region offsets of a protocol command buffer.
///
/// Each region starts where the previous one ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolCommandLayout {
    /// Start of the error-information block
    pub error_info_offset: usize,
    /// Start of the host-to-device payload
    pub to_device_offset: usize,
    /// Length of the host-to-device payload
    pub to_device_len: usize,
    /// Start of the device-to-host payload
    pub from_device_offset: usize,
    /// Length of the device-to-host payload
    pub from_device_len: usize,
}

impl ProtocolCommandLayout {
    /// Lay out a command moving `data_len` bytes in `direction`.
    pub fn new(direction: DataDirection, data_len: usize) -> Result<Self> {
        let (to_device_len, from_device_len) = match direction {
            DataDirection::None => (0, 0),
            DataDirection::ToDevice => (data_len, 0),
            DataDirection::FromDevice => (0, data_len),
            DataDirection::Bidirectional => {
                return Err(Error::UnsupportedDirection(direction.bits()));
            }
        };
        let mut cursor = PROTOCOL_COMMAND_HEADER_LEN + COMMAND_SIZE;
        let error_info_offset = cursor;
        cursor += ERROR_INFO_LEN;
        let to_device_offset = cursor;
        cursor += to_device_len;
        let from_device_offset = cursor;
        Ok(Self {
            error_info_offset,
            to_device_offset,
            to_device_len,
            from_device_offset,
            from_device_len,
        })
    }

    /// Total buffer length.
    pub fn total_len(&self) -> usize {
        self.from_device_offset + self.from_device_len
    }

    /// Parse the layout back out of a built buffer.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, PROTOCOL_COMMAND_HEADER_LEN + COMMAND_SIZE)?;
        let layout = Self {
            error_info_offset: le_u32(buf, PC_ERROR_INFO_OFFSET) as usize,
            to_device_offset: le_u32(buf, PC_TO_DEVICE_OFFSET) as usize,
            to_device_len: le_u32(buf, PC_TO_DEVICE_LENGTH) as usize,
            from_device_offset: le_u32(buf, PC_FROM_DEVICE_OFFSET) as usize,
            from_device_len: le_u32(buf, PC_FROM_DEVICE_LENGTH) as usize,
        };
        ensure_len(buf, layout.total_len())?;
        Ok(layout)
    }
}

/// Build a `STORAGE_PROTOCOL_COMMAND` buffer for an NVMe admin command.
///
/// `data` is copied in only for host-to-device transfers; for reads only its
/// length matters. Only reads are flagged as adapter requests.
pub fn build_protocol_command(
    cmd: &Command,
    direction: DataDirection,
    data: &[u8],
) -> Result<(Vec<u8>, ProtocolCommandLayout)> {
    let layout = ProtocolCommandLayout::new(direction, data.len())?;
    let mut buf = vec![0u8; layout.total_len()];

    put_u32(&mut buf, PC_VERSION, PROTOCOL_STRUCTURE_VERSION);
    put_u32(&mut buf, PC_LENGTH, PROTOCOL_COMMAND_STRUCT_LEN);
    put_u32(&mut buf, PC_PROTOCOL_TYPE, PROTOCOL_TYPE_NVME);
    let flags = match direction {
        DataDirection::FromDevice => FLAG_ADAPTER_REQUEST,
        _ => 0,
    };
    put_u32(&mut buf, PC_FLAGS, flags);
    put_u32(&mut buf, PC_COMMAND_LENGTH, COMMAND_SIZE as u32);
    put_u32(&mut buf, PC_ERROR_INFO_LENGTH, ERROR_INFO_LEN as u32);
    put_u32(&mut buf, PC_TO_DEVICE_LENGTH, layout.to_device_len as u32);
    put_u32(&mut buf, PC_FROM_DEVICE_LENGTH, layout.from_device_len as u32);
    put_u32(&mut buf, PC_TIMEOUT, PROTOCOL_COMMAND_TIMEOUT_SECS);
    put_u32(&mut buf, PC_ERROR_INFO_OFFSET, layout.error_info_offset as u32);
    put_u32(&mut buf, PC_TO_DEVICE_OFFSET, layout.to_device_offset as u32);
    put_u32(&mut buf, PC_FROM_DEVICE_OFFSET, layout.from_device_offset as u32);
    put_u32(&mut buf, PC_COMMAND_SPECIFIC, NVME_ADMIN_COMMAND);

    let at = PROTOCOL_COMMAND_HEADER_LEN;
    buf[at..at + COMMAND_SIZE].copy_from_slice(&cmd.to_bytes());

    if layout.to_device_len > 0 {
        let at = layout.to_device_offset;
        buf[at..at + layout.to_device_len].copy_from_slice(data);
    }
    Ok((buf, layout))
}

/// The inline command of a protocol command buffer.
pub fn protocol_command_of(buf: &[u8]) -> Result<Command> {
    ensure_len(buf, PROTOCOL_COMMAND_HEADER_LEN + COMMAND_SIZE)?;
    let mut raw = [0u8; COMMAND_SIZE];
    raw.copy_from_slice(&buf[PROTOCOL_COMMAND_HEADER_LEN..PROTOCOL_COMMAND_HEADER_LEN + COMMAND_SIZE]);
    Ok(Command::from_bytes(&raw))
}

/// Output fields of a completed protocol command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolCommandReply {
    /// `ReturnStatus`
    pub return_status: u32,
    /// `ErrorCode`
    pub error_code: u32,
    /// `FixedProtocolReturnData`, completion dword 0
    pub fixed_return: u32,
}

impl ProtocolCommandReply {
    /// Whether the miniport reported success.
    pub fn is_success(&self) -> bool {
        self.return_status == PROTOCOL_STATUS_SUCCESS
    }
}

/// Read the output fields of a protocol command buffer.
pub fn parse_protocol_command_reply(buf: &[u8]) -> Result<ProtocolCommandReply> {
    ensure_len(buf, PROTOCOL_COMMAND_HEADER_LEN)?;
    Ok(ProtocolCommandReply {
        return_status: le_u32(buf, PC_RETURN_STATUS),
        error_code: le_u32(buf, PC_ERROR_CODE),
        fixed_return: le_u32(buf, PC_FIXED_RETURN),
    })
}

/// Fill in the output fields of a protocol command buffer.
///
/// The device side of [`parse_protocol_command_reply`].
pub fn write_protocol_command_reply(buf: &mut [u8], reply: &ProtocolCommandReply) -> Result<()> {
    ensure_len(buf, PROTOCOL_COMMAND_HEADER_LEN)?;
    put_u32(buf, PC_RETURN_STATUS, reply.return_status);
    put_u32(buf, PC_ERROR_CODE, reply.error_code);
    put_u32(buf, PC_FIXED_RETURN, reply.fixed_return);
    Ok(())
}

/// `sizeof(STORAGE_DEVICE_NUMBER)`
pub const DEVICE_NUMBER_LEN: usize = 12;
/// `sizeof(DISK_GEOMETRY_EX)`
pub const DISK_GEOMETRY_EX_LEN: usize = 40;
/// `sizeof(VOLUME_DISK_EXTENTS)` with one extent.
pub const VOLUME_DISK_EXTENTS_LEN: usize = 32;

/// `DeviceNumber` of a `STORAGE_DEVICE_NUMBER`.
pub fn parse_device_number(buf: &[u8]) -> Result<u32> {
    ensure_len(buf, DEVICE_NUMBER_LEN)?;
    Ok(le_u32(buf, 4))
}

/// `DiskSize` of a `DISK_GEOMETRY_EX`.
pub fn parse_geometry_disk_size(buf: &[u8]) -> Result<u64> {
    ensure_len(buf, 32)?;
    Ok(le_u64(buf, 24))
}

/// `DiskNumber` of the first extent of a `VOLUME_DISK_EXTENTS`.
pub fn parse_first_extent_disk(buf: &[u8]) -> Result<Option<u32>> {
    ensure_len(buf, VOLUME_DISK_EXTENTS_LEN)?;
    if le_u32(buf, 0) == 0 {
        return Ok(None);
    }
    Ok(Some(le_u32(buf, 8)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::IdentifyCns;

    #[test]
    fn query_buffer_layout() {
        let request = ProtocolRequest::new(
            ProtocolDataType::Identify,
            IdentifyCns::Controller as u32,
            0,
            4096,
        );
        let buf = request.query_buffer(PropertyId::AdapterProtocolSpecific);
        assert_eq!(buf.len(), 8 + 40 + 4096);
        assert_eq!(le_u32(&buf, 0), 49);
        assert_eq!(le_u32(&buf, 4), 0);
        assert_eq!(le_u32(&buf, 8), PROTOCOL_TYPE_NVME);
        assert_eq!(le_u32(&buf, 12), 1);
        assert_eq!(le_u32(&buf, 16), 1);
        assert_eq!(le_u32(&buf, 24), 40);
        assert_eq!(le_u32(&buf, 28), 4096);

        let (property, parsed) = ProtocolRequest::parse(&buf).unwrap();
        assert_eq!(property, PropertyId::AdapterProtocolSpecific);
        assert_eq!(parsed, request);
    }

    #[test]
    fn zero_length_request_has_no_data_offset() {
        let request = ProtocolRequest::new(ProtocolDataType::Feature, 0x06, 0, 0);
        let buf = request.set_buffer(PropertyId::AdapterProtocolSpecific);
        assert_eq!(buf.len(), 8 + 64);
        assert_eq!(le_u32(&buf, 8 + 16), 0);
    }

    #[test]
    fn payload_offset_is_relative_to_specific_data() {
        let request = ProtocolRequest::new(ProtocolDataType::LogPage, 0x02, 0, 8);
        let mut buf = vec![0u8; DESCRIPTOR_LEN + 8];
        write_query_reply(&mut buf, &request, 7, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        // ProtocolDataOffset = 40, but the payload starts at byte 48
        assert_eq!(le_u32(&buf, 8 + 16), 40);
        let reply = parse_query_reply(&buf, 8).unwrap();
        assert_eq!(reply.payload, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(reply.fixed_return, 7);
    }

    #[test]
    fn rejects_bad_descriptor_header() {
        let mut buf = vec![0u8; DESCRIPTOR_LEN];
        put_u32(&mut buf, 0, 48);
        put_u32(&mut buf, 4, 40);
        assert!(matches!(
            parse_query_reply(&buf, 0),
            Err(Error::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let request = ProtocolRequest::new(ProtocolDataType::Identify, 1, 0, 4096);
        let mut buf = vec![0u8; DESCRIPTOR_LEN + 16];
        write_query_reply(&mut buf, &request, 0, &[0xAA; 16]).unwrap();
        assert!(parse_query_reply(&buf, 4096).is_err());
    }

    #[test]
    fn protocol_command_regions_follow_each_other() {
        let read = ProtocolCommandLayout::new(DataDirection::FromDevice, 4096).unwrap();
        assert_eq!(read.error_info_offset, 144);
        assert_eq!(read.to_device_offset, 208);
        assert_eq!(read.to_device_len, 0);
        assert_eq!(read.from_device_offset, 208);
        assert_eq!(read.total_len(), 208 + 4096);

        let write = ProtocolCommandLayout::new(DataDirection::ToDevice, 512).unwrap();
        assert_eq!(write.to_device_len, 512);
        assert_eq!(write.from_device_offset, 208 + 512);
        assert_eq!(write.total_len(), 208 + 512);

        assert!(matches!(
            ProtocolCommandLayout::new(DataDirection::Bidirectional, 16),
            Err(Error::UnsupportedDirection(3))
        ));
    }

    #[test]
    fn protocol_command_header() {
        let cmd = Command::identify(0, 0, IdentifyCns::ActiveNamespaces, 0);
        let payload = [0x5Au8; 16];
        let (buf, layout) = build_protocol_command(&cmd, DataDirection::ToDevice, &payload).unwrap();
        assert_eq!(le_u32(&buf, PC_VERSION), 1);
        assert_eq!(le_u32(&buf, PC_LENGTH), 84);
        assert_eq!(le_u32(&buf, PC_FLAGS), 0);
        assert_eq!(le_u32(&buf, PC_COMMAND_LENGTH), 64);
        assert_eq!(le_u32(&buf, PC_TIMEOUT), PROTOCOL_COMMAND_TIMEOUT_SECS);
        assert_eq!(le_u32(&buf, PC_COMMAND_SPECIFIC), 1);
        assert_eq!(protocol_command_of(&buf).unwrap(), cmd);
        assert_eq!(ProtocolCommandLayout::parse(&buf).unwrap(), layout);
        assert_eq!(&buf[layout.to_device_offset..layout.total_len()], &payload);
    }

    #[test]
    fn only_reads_are_adapter_requests() {
        let cmd = Command::identify(0, 0, IdentifyCns::Controller, 0);
        let (read, _) = build_protocol_command(&cmd, DataDirection::FromDevice, &[0; 4096]).unwrap();
        assert_eq!(le_u32(&read, PC_FLAGS), FLAG_ADAPTER_REQUEST);
        let (none, _) = build_protocol_command(&cmd, DataDirection::None, &[]).unwrap();
        assert_eq!(le_u32(&none, PC_FLAGS), 0);
    }

    #[test]
    fn small_structures() {
        let mut sdn = [0u8; DEVICE_NUMBER_LEN];
        put_u32(&mut sdn, 4, 3);
        assert_eq!(parse_device_number(&sdn).unwrap(), 3);

        let mut geo = [0u8; DISK_GEOMETRY_EX_LEN];
        geo[24..32].copy_from_slice(&(512u64 * 1024).to_le_bytes());
        assert_eq!(parse_geometry_disk_size(&geo).unwrap(), 512 * 1024);

        let mut extents = [0u8; VOLUME_DISK_EXTENTS_LEN];
        assert_eq!(parse_first_extent_disk(&extents).unwrap(), None);
        put_u32(&mut extents, 0, 1);
        put_u32(&mut extents, 8, 2);
        assert_eq!(parse_first_extent_disk(&extents).unwrap(), Some(2));
    }
}
