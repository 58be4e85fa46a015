//! CfgMgr32 and `DeviceIoControl` backends.

use std::ffi::c_void;
use std::io;
use std::iter;
use std::mem::{offset_of, size_of, zeroed};
use std::ptr::{null, null_mut};
use std::sync::Arc;

use tracing::debug;
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::*;
use windows_sys::Win32::Devices::Properties::*;
use windows_sys::Win32::Foundation::*;
use windows_sys::Win32::Storage::FileSystem::*;
use windows_sys::Win32::Storage::IscsiDisc::*;
use windows_sys::Win32::System::IO::DeviceIoControl;
use windows_sys::Win32::System::Ioctl::*;
use windows_sys::core::GUID;

use crate::handle::OwnedHandle;
use crate::scsi::{ScsiDirection, SenseBuffer};
use crate::topology::{
    Access, DevInst, DeviceProperty, DeviceTree, DriveLetterCache, NodeResolution,
    NvmeControllerList, StateChange, TopologyConfig,
};
use crate::transport::{IoctlCode, IoctlDevice, ScsiData, ScsiRequest, SectorFile};

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(iter::once(0)).collect()
}

fn from_wide(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

fn split_multi_sz(buf: &[u16]) -> Vec<String> {
    buf.split(|&c| c == 0)
        .filter(|s| !s.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

fn cm_error(op: &str, cr: CONFIGRET) -> io::Error {
    io::Error::other(format!("{op} failed: CONFIGRET {cr:#x}"))
}

fn interface_list(guid: &GUID, device_id: Option<&str>, flags: u32) -> io::Result<Vec<String>> {
    let id = device_id.map(wide);
    let id_ptr = id.as_ref().map_or(null(), |id| id.as_ptr());
    let mut len = 0u32;
    // SAFETY: guid and id outlive the call; len is a valid out pointer.
    let cr = unsafe { CM_Get_Device_Interface_List_SizeW(&mut len, guid, id_ptr, flags) };
    if cr != CR_SUCCESS {
        return Err(cm_error("CM_Get_Device_Interface_List_Size", cr));
    }
    let mut list = vec![0u16; len as usize];
    // SAFETY: list holds len wide chars.
    let cr =
        unsafe { CM_Get_Device_Interface_ListW(guid, id_ptr, list.as_mut_ptr(), len, flags) };
    if cr != CR_SUCCESS {
        return Err(cm_error("CM_Get_Device_Interface_List", cr));
    }
    Ok(split_multi_sz(&list))
}

/// The live Plug and Play device tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsDeviceTree;

impl WindowsDeviceTree {
    fn relative(
        node: DevInst,
        f: unsafe extern "system" fn(*mut u32, u32, u32) -> CONFIGRET,
    ) -> Option<DevInst> {
        let mut out = 0u32;
        // SAFETY: out is a valid out pointer.
        (unsafe { f(&mut out, node, 0) } == CR_SUCCESS).then_some(out)
    }
}

impl DeviceTree for WindowsDeviceTree {
    type Device = DeviceFile;

    fn storage_port_interfaces(&self) -> io::Result<Vec<String>> {
        interface_list(
            &GUID_DEVINTERFACE_STORAGEPORT,
            None,
            CM_GET_DEVICE_INTERFACE_LIST_ALL_DEVICES,
        )
    }

    fn interface_instance_id(&self, interface: &str) -> Option<String> {
        let interface = wide(interface);
        let mut buf = vec![0u16; 512];
        let mut size = (buf.len() * 2) as u32;
        let mut kind: DEVPROPTYPE = 0;
        // SAFETY: buf holds size bytes.
        let cr = unsafe {
            CM_Get_Device_Interface_PropertyW(
                interface.as_ptr(),
                &DEVPKEY_Device_InstanceId,
                &mut kind,
                buf.as_mut_ptr() as *mut u8,
                &mut size,
                0,
            )
        };
        if cr != CR_SUCCESS || kind != DEVPROP_TYPE_STRING {
            return None;
        }
        Some(from_wide(&buf))
    }

    fn locate(&self, instance_id: &str, resolution: NodeResolution) -> Option<DevInst> {
        let id = wide(instance_id);
        let flags = match resolution {
            NodeResolution::PresentOnly => CM_LOCATE_DEVNODE_NORMAL,
            NodeResolution::IncludePhantom => CM_LOCATE_DEVNODE_PHANTOM,
        };
        let mut inst = 0u32;
        // SAFETY: id is NUL terminated.
        (unsafe { CM_Locate_DevNodeW(&mut inst, id.as_ptr(), flags) } == CR_SUCCESS)
            .then_some(inst)
    }

    fn root(&self) -> Option<DevInst> {
        let mut inst = 0u32;
        // SAFETY: a null device id locates the root.
        (unsafe { CM_Locate_DevNodeW(&mut inst, null(), CM_LOCATE_DEVNODE_NORMAL) }
            == CR_SUCCESS)
            .then_some(inst)
    }

    fn status(&self, node: DevInst) -> Option<(u32, u32)> {
        let mut status = 0;
        let mut problem = 0;
        // SAFETY: both are valid out pointers.
        (unsafe { CM_Get_DevNode_Status(&mut status, &mut problem, node, 0) } == CR_SUCCESS)
            .then_some((status, problem))
    }

    fn property(&self, node: DevInst, property: DeviceProperty) -> Option<String> {
        let key = match property {
            DeviceProperty::Service => &DEVPKEY_Device_Service,
            DeviceProperty::LocationInfo => &DEVPKEY_Device_LocationInfo,
            DeviceProperty::InstanceId => &DEVPKEY_Device_InstanceId,
        };
        let mut buf = vec![0u16; 260];
        loop {
            let mut size = (buf.len() * 2) as u32;
            let mut kind: DEVPROPTYPE = 0;
            // SAFETY: buf holds size bytes.
            let cr = unsafe {
                CM_Get_DevNode_PropertyW(
                    node,
                    key,
                    &mut kind,
                    buf.as_mut_ptr() as *mut u8,
                    &mut size,
                    0,
                )
            };
            match cr {
                CR_SUCCESS => return Some(from_wide(&buf)),
                CR_BUFFER_SMALL if (size as usize) > buf.len() * 2 => {
                    buf.resize((size as usize).div_ceil(2), 0);
                }
                _ => return None,
            }
        }
    }

    fn first_child(&self, node: DevInst) -> Option<DevInst> {
        Self::relative(node, CM_Get_Child)
    }

    fn next_sibling(&self, node: DevInst) -> Option<DevInst> {
        Self::relative(node, CM_Get_Sibling)
    }

    fn parent(&self, node: DevInst) -> Option<DevInst> {
        Self::relative(node, CM_Get_Parent)
    }

    fn disk_interface(&self, instance_id: &str) -> Option<String> {
        match interface_list(
            &GUID_DEVINTERFACE_DISK,
            Some(instance_id),
            CM_GET_DEVICE_INTERFACE_LIST_PRESENT,
        ) {
            Ok(list) => list.into_iter().next(),
            Err(e) => {
                debug!(%instance_id, error = %e, "no disk interface");
                None
            }
        }
    }

    fn open(&self, path: &str, access: Access) -> io::Result<DeviceFile> {
        DeviceFile::open(path, access)
    }

    fn change_state(&self, node: DevInst, change: StateChange) -> bool {
        // SAFETY: plain CfgMgr32 calls on a device instance handle.
        let cr = unsafe {
            match change {
                StateChange::Enable => CM_Enable_DevNode(node, 0),
                StateChange::Disable => {
                    CM_Disable_DevNode(node, CM_DISABLE_HARDWARE | CM_DISABLE_UI_NOT_OK)
                }
                StateChange::Remove => CM_Query_And_Remove_SubTreeW(
                    node,
                    null_mut(),
                    null_mut(),
                    0,
                    CM_REMOVE_NO_RESTART,
                ),
                StateChange::Setup => CM_Setup_DevNode(node, CM_SETUP_DEVNODE_READY),
                StateChange::Reenumerate => CM_Reenumerate_DevNode(node, 0),
            }
        };
        if cr != CR_SUCCESS {
            debug!(node, ?change, cr, "CONFIGRET");
        }
        cr == CR_SUCCESS
    }

    fn logical_drives(&self) -> Vec<String> {
        let mut buf = vec![0u16; 1024];
        // SAFETY: buf holds the advertised number of wide chars.
        let len = unsafe { GetLogicalDriveStringsW(buf.len() as u32, buf.as_mut_ptr()) };
        if len == 0 || len as usize > buf.len() {
            return Vec::new();
        }
        split_multi_sz(&buf[..len as usize])
    }
}

/// Enumerate the NVMe controllers on this machine.
pub fn enumerate(config: &TopologyConfig) -> NvmeControllerList<WindowsDeviceTree> {
    NvmeControllerList::enumerate_with(
        Arc::new(WindowsDeviceTree),
        DriveLetterCache::global(),
        config,
    )
}

#[repr(C)]
struct ScsiPassThroughDirectWithSense {
    sptd: SCSI_PASS_THROUGH_DIRECT,
    filler: u32,
    sense: SenseBuffer,
}

/// An open device path.
///
/// Opened unbuffered and write-through, so transfers must be sector aligned.
#[derive(Debug)]
pub struct DeviceFile {
    handle: OwnedHandle,
    path: String,
}

impl DeviceFile {
    /// Open `path`.
    pub fn open(path: &str, access: Access) -> io::Result<Self> {
        let name = wide(path);
        let desired = match access {
            Access::Read => GENERIC_READ,
            Access::ReadWrite => GENERIC_READ | GENERIC_WRITE,
        };
        // SAFETY: name is NUL terminated; no template handle.
        let raw = unsafe {
            CreateFileW(
                name.as_ptr(),
                desired,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                null(),
                OPEN_EXISTING,
                FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH,
                0,
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        debug!(%path, ?access, "opened");
        Ok(Self {
            handle: OwnedHandle::new(raw),
            path: path.to_string(),
        })
    }

    /// The path this file was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn control(
        &self,
        code: u32,
        input: *const c_void,
        input_len: usize,
        output: *mut c_void,
        output_len: usize,
    ) -> io::Result<usize> {
        let mut returned = 0u32;
        // SAFETY: callers pass buffers valid for the given lengths.
        let ok = unsafe {
            DeviceIoControl(
                self.handle.raw(),
                code,
                input,
                input_len as u32,
                output,
                output_len as u32,
                &mut returned,
                null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(returned as usize)
    }
}

fn control_code(code: IoctlCode) -> u32 {
    match code {
        IoctlCode::QueryProperty => IOCTL_STORAGE_QUERY_PROPERTY,
        IoctlCode::SetProperty => IOCTL_STORAGE_SET_PROPERTY,
        IoctlCode::ProtocolCommand => IOCTL_STORAGE_PROTOCOL_COMMAND,
        IoctlCode::GetDeviceNumber => IOCTL_STORAGE_GET_DEVICE_NUMBER,
        IoctlCode::GetDriveGeometryEx => IOCTL_DISK_GET_DRIVE_GEOMETRY_EX,
        IoctlCode::GetVolumeDiskExtents => IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS,
    }
}

impl IoctlDevice for DeviceFile {
    fn ioctl(&self, code: IoctlCode, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        let input_ptr = if input.is_empty() {
            null()
        } else {
            input.as_ptr() as *const c_void
        };
        self.control(
            control_code(code),
            input_ptr,
            input.len(),
            output.as_mut_ptr() as *mut c_void,
            output.len(),
        )
    }

    fn scsi_pass_through(&self, request: &mut ScsiRequest<'_>) -> io::Result<()> {
        // SAFETY: all-zero is a valid SCSI_PASS_THROUGH_DIRECT.
        let mut sptd: ScsiPassThroughDirectWithSense = unsafe { zeroed() };
        let (data_in, buffer) = match &mut request.data {
            ScsiData::In(buf) => (SCSI_IOCTL_DATA_IN, buf.as_mut_ptr() as *mut c_void),
            ScsiData::Out(buf) => (SCSI_IOCTL_DATA_OUT, buf.as_ptr() as *mut c_void),
        };
        debug_assert_eq!(
            request.data.direction() == ScsiDirection::In,
            data_in == SCSI_IOCTL_DATA_IN
        );
        sptd.sptd.Length = size_of::<SCSI_PASS_THROUGH_DIRECT>() as u16;
        sptd.sptd.CdbLength = request.cdb_len;
        sptd.sptd.SenseInfoLength = request.sense.len() as u8;
        sptd.sptd.SenseInfoOffset = offset_of!(ScsiPassThroughDirectWithSense, sense) as u32;
        sptd.sptd.DataIn = data_in as u8;
        sptd.sptd.DataTransferLength = request.data.len() as u32;
        sptd.sptd.TimeOutValue = request.timeout_secs;
        sptd.sptd.DataBuffer = buffer;
        sptd.sptd.Cdb = request.cdb;

        let len = size_of::<ScsiPassThroughDirectWithSense>();
        let ptr = &mut sptd as *mut ScsiPassThroughDirectWithSense as *mut c_void;
        self.control(IOCTL_SCSI_PASS_THROUGH_DIRECT, ptr, len, ptr, len)?;

        request.scsi_status = sptd.sptd.ScsiStatus;
        request.sense = sptd.sense;
        request.transferred = sptd.sptd.DataTransferLength;
        Ok(())
    }
}

impl SectorFile for DeviceFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read = 0u32;
        // SAFETY: buf is valid for buf.len() bytes.
        let ok = unsafe {
            ReadFile(
                self.handle.raw(),
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut read,
                null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(read as usize)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0u32;
        // SAFETY: buf is valid for buf.len() bytes.
        let ok = unsafe {
            WriteFile(
                self.handle.raw(),
                buf.as_ptr(),
                buf.len() as u32,
                &mut written,
                null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(written as usize)
    }

    fn file_size(&self) -> io::Result<u64> {
        let mut size = 0i64;
        // SAFETY: size is a valid out pointer.
        if unsafe { GetFileSizeEx(self.handle.raw(), &mut size) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_sz_splits_on_nul() {
        let buf: Vec<u16> = "C:\\\0D:\\\0\0".encode_utf16().collect();
        assert_eq!(split_multi_sz(&buf), vec!["C:\\", "D:\\"]);
        assert_eq!(from_wide(&wide("abc")), "abc");
    }
}
