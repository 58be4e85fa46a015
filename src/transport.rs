//! Pass-through submission paths.
//!
//! [`IoctlDevice`] and [`SectorFile`] are the only places that touch the OS.
//! Everything above them builds and validates plain byte buffers, so the
//! whole dispatcher runs against in-memory devices as well as real handles.

use std::io;

use tracing::debug;

use crate::cmd::{
    Command, DataDirection, IDENTIFY_SIZE, IdentifyCns, MAX_LOG_SIZE, get_features_cdw10,
    set_features_cdw10,
};
use crate::error::{Error, Result, StatusCode};
use crate::features::FeatureSelector;
use crate::identify::{self, ControllerData, NamespaceData};
use crate::protocol::{
    DESCRIPTOR_EXT_LEN, DESCRIPTOR_LEN, DEVICE_NUMBER_LEN, PropertyId, ProtocolDataType,
    ProtocolRequest, build_protocol_command, le_u16, parse_device_number,
    parse_protocol_command_reply, parse_query_reply, parse_set_reply,
};
use crate::scsi::{SCSI_TIMEOUT_SECS, ScsiDirection, SenseBuffer};

/// Device control requests issued by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCode {
    /// `IOCTL_STORAGE_QUERY_PROPERTY`
    QueryProperty,
    /// `IOCTL_STORAGE_SET_PROPERTY`
    SetProperty,
    /// `IOCTL_STORAGE_PROTOCOL_COMMAND`
    ProtocolCommand,
    /// `IOCTL_STORAGE_GET_DEVICE_NUMBER`
    GetDeviceNumber,
    /// `IOCTL_DISK_GET_DRIVE_GEOMETRY_EX`
    GetDriveGeometryEx,
    /// `IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS`
    GetVolumeDiskExtents,
}

impl IoctlCode {
    /// Name used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            IoctlCode::QueryProperty => "IOCTL_STORAGE_QUERY_PROPERTY",
            IoctlCode::SetProperty => "IOCTL_STORAGE_SET_PROPERTY",
            IoctlCode::ProtocolCommand => "IOCTL_STORAGE_PROTOCOL_COMMAND",
            IoctlCode::GetDeviceNumber => "IOCTL_STORAGE_GET_DEVICE_NUMBER",
            IoctlCode::GetDriveGeometryEx => "IOCTL_DISK_GET_DRIVE_GEOMETRY_EX",
            IoctlCode::GetVolumeDiskExtents => "IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS",
        }
    }
}

/// Data attached to a SCSI pass-through request.
///
/// The caller's buffer is handed to the port driver as is.
#[derive(Debug)]
pub enum ScsiData<'a> {
    /// Device to host.
    In(&'a mut [u8]),
    /// Host to device.
    Out(&'a [u8]),
}

impl ScsiData<'_> {
    /// Transfer length in bytes.
    pub fn len(&self) -> usize {
        match self {
            ScsiData::In(buf) => buf.len(),
            ScsiData::Out(buf) => buf.len(),
        }
    }

    /// Whether the transfer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direction of the transfer.
    pub fn direction(&self) -> ScsiDirection {
        match self {
            ScsiData::In(_) => ScsiDirection::In,
            ScsiData::Out(_) => ScsiDirection::Out,
        }
    }
}

/// A `SCSI_PASS_THROUGH_DIRECT` request and its outputs.
#[derive(Debug)]
pub struct ScsiRequest<'a> {
    /// Command descriptor block, zero padded
    pub cdb: [u8; 16],
    /// Meaningful bytes of `cdb`
    pub cdb_len: u8,
    /// Attached data buffer
    pub data: ScsiData<'a>,
    /// Seconds before the request is abandoned
    pub timeout_secs: u32,
    /// SCSI status byte reported by the device
    pub scsi_status: u8,
    /// Sense data reported by the device
    pub sense: SenseBuffer,
    /// Bytes actually transferred
    pub transferred: u32,
}

impl<'a> ScsiRequest<'a> {
    /// Wrap a CDB of up to 16 bytes and its data buffer.
    pub fn new(cdb: &[u8], data: ScsiData<'a>) -> Result<Self> {
        if cdb.is_empty() || cdb.len() > 16 {
            return Err(Error::InvalidArgument(format!("CDB length {}", cdb.len())));
        }
        let mut raw = [0u8; 16];
        raw[..cdb.len()].copy_from_slice(cdb);
        Ok(Self {
            cdb: raw,
            cdb_len: cdb.len() as u8,
            data,
            timeout_secs: SCSI_TIMEOUT_SECS,
            scsi_status: 0,
            sense: [0; 32],
            transferred: 0,
        })
    }

    /// The meaningful CDB bytes.
    pub fn cdb(&self) -> &[u8] {
        &self.cdb[..self.cdb_len as usize]
    }
}

/// An open device handle that accepts device control requests.
pub trait IoctlDevice {
    /// Issue `code` with `input`, filling `output`; returns the bytes written
    /// to `output`.
    fn ioctl(&self, code: IoctlCode, input: &[u8], output: &mut [u8]) -> io::Result<usize>;

    /// Submit a SCSI pass-through request, filling in its status, sense and
    /// transferred fields.
    fn scsi_pass_through(&self, request: &mut ScsiRequest<'_>) -> io::Result<()>;
}

impl<T: IoctlDevice + ?Sized> IoctlDevice for &T {
    fn ioctl(&self, code: IoctlCode, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        (**self).ioctl(code, input, output)
    }

    fn scsi_pass_through(&self, request: &mut ScsiRequest<'_>) -> io::Result<()> {
        (**self).scsi_pass_through(request)
    }
}

/// An open file or block device with a file pointer.
///
/// Handles opened without buffering only accept whole sectors at
/// sector-aligned addresses.
pub trait SectorFile {
    /// Read at the file pointer.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write at the file pointer.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Size reported by the file system.
    fn file_size(&self) -> io::Result<u64>;
}

/// Issue `code` and map a failed call to a transport error.
pub(crate) fn submit<D: IoctlDevice + ?Sized>(
    device: &D,
    code: IoctlCode,
    input: &[u8],
    output: &mut [u8],
) -> Result<usize> {
    debug!(ioctl = code.name(), input = input.len(), output = output.len(), "submit");
    let returned = device
        .ioctl(code, input, output)
        .map_err(|e| Error::transport(code.name(), e))?;
    Ok(returned.min(output.len()))
}

/// `NVME_VSC_OPCODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VscOpcode {
    /// Data phase without a transfer; OR in the direction bits
    None = 0xF0,
    /// Parameter phase
    Write = 0xF1,
    /// Data phase reading from the device
    Read = 0xF2,
}

/// Sub-opcode tagging a VSC that reads data.
pub const VSC_SUB_OPCODE_READ: u32 = 0x8306_1400;
/// Sub-opcode tagging a VSC that writes data.
pub const VSC_SUB_OPCODE_WRITE: u32 = 0x8306_1401;
/// Sub-opcode tagging a VSC without data.
pub const VSC_SUB_OPCODE_NON_DATA: u32 = 0x8306_1402;
/// Size of the VSC parameter buffer.
pub const VSC_PARAM_SIZE: usize = 4096;

/// NVMe admin submission through an inbox-driver handle.
#[derive(Debug)]
pub struct NvmeDevice<D> {
    device: D,
}

impl<D: IoctlDevice> NvmeDevice<D> {
    /// Wrap an open handle.
    pub fn new(device: D) -> Self {
        Self { device }
    }

    /// The underlying handle.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Release the underlying handle.
    pub fn into_inner(self) -> D {
        self.device
    }

    /// Issue a protocol-specific property query and extract its payload.
    pub fn query_property(
        &self,
        property: PropertyId,
        request: &ProtocolRequest,
    ) -> Result<crate::protocol::PropertyReply> {
        let input = request.query_buffer(property);
        let mut output = vec![0u8; DESCRIPTOR_LEN + request.data_len as usize];
        debug!(?property, ?request, "query property");
        let returned = submit(&self.device, IoctlCode::QueryProperty, &input, &mut output)?;
        parse_query_reply(&output[..returned], request.data_len as usize)
    }

    /// Issue a protocol-specific property set; returns the fixed return dword.
    pub fn set_property(&self, property: PropertyId, request: &ProtocolRequest) -> Result<u32> {
        let input = request.set_buffer(property);
        let mut output = vec![0u8; DESCRIPTOR_EXT_LEN];
        debug!(?property, ?request, "set property");
        let returned = submit(&self.device, IoctlCode::SetProperty, &input, &mut output)?;
        parse_set_reply(&output, returned)
    }

    /// Raw identify data through the property path.
    ///
    /// Controller-scope structures (`nsid == 0`) go to the adapter,
    /// namespace-scope structures to the device.
    pub fn identify_query(&self, cns: IdentifyCns, nsid: u32) -> Result<Vec<u8>> {
        let property = if nsid == 0 {
            PropertyId::AdapterProtocolSpecific
        } else {
            PropertyId::DeviceProtocolSpecific
        };
        let request = ProtocolRequest::new(
            ProtocolDataType::Identify,
            cns as u32,
            nsid,
            IDENTIFY_SIZE as u32,
        );
        Ok(self.query_property(property, &request)?.payload)
    }

    /// Identify controller.
    pub fn identify_controller(&self) -> Result<ControllerData> {
        ControllerData::parse(&self.identify_query(IdentifyCns::Controller, 0)?)
    }

    /// Identify namespace `nsid`.
    pub fn identify_namespace(&self, nsid: u32) -> Result<NamespaceData> {
        NamespaceData::parse(&self.identify_query(IdentifyCns::SpecificNamespace, nsid)?)
    }

    /// Active (or, with `all`, allocated) namespace ids, through the
    /// protocol-command path.
    pub fn namespace_list(&self, all: bool) -> Result<Vec<u32>> {
        let cmd = Command::identify(0, 0, IdentifyCns::namespace_list(all), 0);
        let mut buf = vec![0u8; IDENTIFY_SIZE];
        self.protocol_command(&cmd, DataDirection::FromDevice, &mut buf)?;
        Ok(identify::namespace_list(&buf))
    }

    /// A log page through the property path.
    pub fn log_page(&self, lid: u8, sub_value: u32) -> Result<Vec<u8>> {
        let request = ProtocolRequest::new(
            ProtocolDataType::LogPage,
            lid as u32,
            sub_value,
            MAX_LOG_SIZE as u32,
        );
        Ok(self
            .query_property(PropertyId::DeviceProtocolSpecific, &request)?
            .payload)
    }

    /// Get Features; returns completion dword 0.
    pub fn get_feature(&self, fid: u8, sel: FeatureSelector, cdw11: u32) -> Result<u32> {
        let request = ProtocolRequest::new(
            ProtocolDataType::Feature,
            get_features_cdw10(fid, sel as u8),
            cdw11,
            0,
        );
        Ok(self
            .query_property(PropertyId::AdapterProtocolSpecific, &request)?
            .fixed_return)
    }

    /// Set Features; returns completion dword 0.
    pub fn set_feature(&self, fid: u8, value: u32, save: bool) -> Result<u32> {
        let request = ProtocolRequest::new(
            ProtocolDataType::Feature,
            set_features_cdw10(fid, save),
            value,
            0,
        );
        self.set_property(PropertyId::AdapterProtocolSpecific, &request)
    }

    /// Submit an admin command through `IOCTL_STORAGE_PROTOCOL_COMMAND`.
    ///
    /// `data` is sent for [`DataDirection::ToDevice`] and overwritten for
    /// [`DataDirection::FromDevice`]. Returns completion dword 0; a failed
    /// completion is decoded from the error-information block.
    pub fn protocol_command(
        &self,
        cmd: &Command,
        direction: DataDirection,
        data: &mut [u8],
    ) -> Result<u32> {
        let (mut buf, layout) = build_protocol_command(cmd, direction, data)?;
        let input = buf.clone();
        debug!(
            opcode = cmd.opcode,
            ?direction,
            len = data.len(),
            "protocol command"
        );
        submit(&self.device, IoctlCode::ProtocolCommand, &input, &mut buf)?;

        let reply = parse_protocol_command_reply(&buf)?;
        if !reply.is_success() {
            let status = StatusCode::from_raw(le_u16(&buf, layout.error_info_offset + 12));
            debug!(
                return_status = reply.return_status,
                error_code = reply.error_code,
                %status,
                "protocol command failed"
            );
            if status.is_success() {
                return Err(Error::transport(
                    IoctlCode::ProtocolCommand.name(),
                    io::Error::other(format!(
                        "return status {:#x}, error code {:#x}",
                        reply.return_status, reply.error_code
                    )),
                ));
            }
            return Err(Error::Status(status));
        }

        if direction == DataDirection::FromDevice && layout.from_device_len > 0 {
            let at = layout.from_device_offset;
            data.copy_from_slice(&buf[at..at + layout.from_device_len]);
        }
        Ok(reply.fixed_return)
    }

    /// Two-phase vendor-specific command.
    ///
    /// The parameter phase always runs; the data phase runs only when it
    /// succeeded and `direction` moves data.
    pub fn vsc2(
        &self,
        sub_opcode: u32,
        direction: DataDirection,
        param: &mut [u8],
        data: &mut [u8],
        nsid: u32,
    ) -> Result<u32> {
        let mut cmd = Command {
            opcode: VscOpcode::Write as u8,
            ns_id: nsid,
            cmd_10: (param.len() / 4) as u32,
            cmd_12: sub_opcode,
            ..Default::default()
        };
        let dw0 = self.protocol_command(&cmd, DataDirection::ToDevice, param)?;
        if direction == DataDirection::None {
            return Ok(dw0);
        }

        cmd.opcode = VscOpcode::None as u8 | direction.bits();
        cmd.cmd_10 = (data.len() / 4) as u32;
        cmd.cmd_14 = 1;
        self.protocol_command(&cmd, direction, data)
    }

    /// Wrap a standard admin command in a VSC.
    ///
    /// Without a data buffer the command is sent as non-data regardless of
    /// its opcode.
    pub fn vsc_admin(&self, admin: &Command, data: Option<&mut [u8]>) -> Result<u32> {
        let direction = match data {
            Some(_) => admin.direction(),
            None => DataDirection::None,
        };
        let sub_opcode = match direction {
            DataDirection::None => VSC_SUB_OPCODE_NON_DATA,
            DataDirection::ToDevice => VSC_SUB_OPCODE_WRITE,
            DataDirection::FromDevice => VSC_SUB_OPCODE_READ,
            DataDirection::Bidirectional => {
                return Err(Error::UnsupportedDirection(direction.bits()));
            }
        };
        let mut param = vec![0u8; VSC_PARAM_SIZE];
        param[..crate::cmd::COMMAND_SIZE].copy_from_slice(&admin.to_bytes());
        let mut empty = [0u8; 0];
        let data = data.unwrap_or(&mut empty);
        self.vsc2(sub_opcode, direction, &mut param, data, admin.ns_id)
    }

    /// Namespace ids through a VSC.
    pub fn vsc_namespace_list(&self, all: bool) -> Result<Vec<u32>> {
        let cmd = Command::identify(0, 0, IdentifyCns::namespace_list(all), 0);
        let mut buf = vec![0u8; IDENTIFY_SIZE];
        self.vsc_admin(&cmd, Some(&mut buf))?;
        Ok(identify::namespace_list(&buf))
    }

    /// Identify controller through a VSC.
    pub fn vsc_identify_controller(&self) -> Result<ControllerData> {
        let cmd = Command::identify(0, 0, IdentifyCns::Controller, 0);
        let mut buf = vec![0u8; IDENTIFY_SIZE];
        self.vsc_admin(&cmd, Some(&mut buf))?;
        ControllerData::parse(&buf)
    }

    /// A log page through a VSC.
    pub fn vsc_log_page(&self, lid: u8, nsid: u32) -> Result<Vec<u8>> {
        let cmd = Command::get_log_page(0, nsid, lid, MAX_LOG_SIZE as u32, 0);
        let mut buf = vec![0u8; MAX_LOG_SIZE];
        self.vsc_admin(&cmd, Some(&mut buf))?;
        Ok(buf)
    }

    /// `DeviceNumber` of the disk behind this handle.
    pub fn device_number(&self) -> Result<u32> {
        let mut output = [0u8; DEVICE_NUMBER_LEN];
        let returned = submit(&self.device, IoctlCode::GetDeviceNumber, &[], &mut output)?;
        parse_device_number(&output[..returned])
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::StatusCodeType;
    use crate::protocol::{
        ERROR_INFO_LEN, PROTOCOL_STATUS_SUCCESS, ProtocolCommandLayout, ProtocolCommandReply,
        protocol_command_of, write_protocol_command_reply,
    };

    /// Completes protocol commands from a script and records what it saw.
    #[derive(Default)]
    struct ScriptedDevice {
        statuses: RefCell<Vec<u16>>,
        seen: RefCell<Vec<(Command, usize)>>,
        fill: u8,
    }

    impl ScriptedDevice {
        fn with_statuses(statuses: &[u16]) -> Self {
            Self {
                statuses: RefCell::new(statuses.iter().rev().copied().collect()),
                fill: 0xA5,
                ..Default::default()
            }
        }
    }

    impl IoctlDevice for ScriptedDevice {
        fn ioctl(&self, code: IoctlCode, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
            assert_eq!(code, IoctlCode::ProtocolCommand);
            let cmd = protocol_command_of(input).map_err(io::Error::other)?;
            let layout = ProtocolCommandLayout::parse(input).map_err(io::Error::other)?;
            self.seen
                .borrow_mut()
                .push((cmd, layout.to_device_len + layout.from_device_len));
            let status = self.statuses.borrow_mut().pop().unwrap_or(0);
            output.copy_from_slice(input);
            let at = layout.error_info_offset;
            output[at..at + ERROR_INFO_LEN].fill(0);
            output[at + 12..at + 14].copy_from_slice(&status.to_le_bytes());
            let from = layout.from_device_offset;
            output[from..from + layout.from_device_len].fill(self.fill);
            let reply = ProtocolCommandReply {
                return_status: if status == 0 { PROTOCOL_STATUS_SUCCESS } else { 0x83 },
                error_code: 0,
                fixed_return: 0x55,
            };
            write_protocol_command_reply(output, &reply).map_err(io::Error::other)?;
            Ok(output.len())
        }

        fn scsi_pass_through(&self, _request: &mut ScsiRequest<'_>) -> io::Result<()> {
            Err(io::Error::other("not a disk"))
        }
    }

    #[test]
    fn vsc_runs_both_phases_on_success() {
        let nvme = NvmeDevice::new(ScriptedDevice::with_statuses(&[0, 0]));
        let list = nvme.vsc_namespace_list(false).unwrap();
        // the fill pattern has no zero dword, so the list is full
        assert_eq!(list.len(), 1024);

        let seen = nvme.device().seen.borrow();
        assert_eq!(seen.len(), 2);
        let (param, param_len) = seen[0];
        assert_eq!(param.opcode, 0xF1);
        assert_eq!(param.cmd_10, (VSC_PARAM_SIZE / 4) as u32);
        assert_eq!(param.cmd_12, VSC_SUB_OPCODE_READ);
        assert_eq!(param_len, VSC_PARAM_SIZE);
        let (data, data_len) = seen[1];
        assert_eq!(data.opcode, 0xF2);
        assert_eq!(data.cmd_10, 1024);
        assert_eq!(data.cmd_12, VSC_SUB_OPCODE_READ);
        assert_eq!(data.cmd_14, 1);
        assert_eq!(data_len, IDENTIFY_SIZE);
    }

    #[test]
    fn vsc_stops_after_failed_parameter_phase() {
        // Invalid Field in Command
        let nvme = NvmeDevice::new(ScriptedDevice::with_statuses(&[0x02 << 1]));
        let err = nvme.vsc_identify_controller().unwrap_err();
        match err {
            Error::Status(status) => {
                assert_eq!(status.sct, StatusCodeType::Generic);
                assert_eq!(status.sc, 0x02);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(nvme.device().seen.borrow().len(), 1);
    }

    #[test]
    fn vsc_without_buffer_is_non_data() {
        let nvme = NvmeDevice::new(ScriptedDevice::with_statuses(&[0]));
        let cmd = Command::set_features(0, 0x06, 1, false);
        assert_eq!(nvme.vsc_admin(&cmd, None).unwrap(), 0x55);
        let seen = nvme.device().seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.cmd_12, VSC_SUB_OPCODE_NON_DATA);
    }

    #[test]
    fn vsc_rejects_bidirectional_opcode() {
        let nvme = NvmeDevice::new(ScriptedDevice::default());
        let cmd = Command {
            opcode: 0x03,
            ..Default::default()
        };
        let mut buf = [0u8; 16];
        assert!(matches!(
            nvme.vsc_admin(&cmd, Some(&mut buf)),
            Err(Error::UnsupportedDirection(3))
        ));
        assert!(nvme.device().seen.borrow().is_empty());
    }

    #[test]
    fn read_command_copies_data_back() {
        let nvme = NvmeDevice::new(ScriptedDevice::with_statuses(&[0]));
        let mut buf = [0u8; 64];
        let cmd = Command::get_log_page(0, 0, 0x02, 64, 0);
        assert_eq!(
            nvme.protocol_command(&cmd, DataDirection::FromDevice, &mut buf)
                .unwrap(),
            0x55
        );
        assert!(buf.iter().all(|&b| b == 0xA5));

        let mut out = [0x11u8; 64];
        nvme.protocol_command(&cmd, DataDirection::ToDevice, &mut out)
            .unwrap();
        assert!(out.iter().all(|&b| b == 0x11));
    }
}
