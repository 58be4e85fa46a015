//! Controller, disk and namespace topology.
//!
//! The OS device tree is reached through [`DeviceTree`]. A node is classified
//! once, when it is created; everything downstream matches on [`NodeClass`].

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spin::Mutex;
use tracing::{debug, warn};

use crate::disk::{Disk, volume_disk_number};
use crate::error::{Error, Result};
use crate::transport::{IoctlDevice, NvmeDevice};

/// Opaque device instance handle.
pub type DevInst = u32;

/// Service name of the inbox NVMe miniport.
pub const NVME_SERVICE: &str = "stornvme";
/// Service name of the disk class driver.
pub const DISK_SERVICE: &str = "disk";
/// Volume that is never disabled.
pub const BOOT_VOLUME: &str = "C:";

/// How an interface's instance id is mapped back to a device node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum NodeResolution {
    /// Only devices currently present.
    #[default]
    PresentOnly,
    /// Also devices that are installed but not present.
    IncludePhantom,
}

/// Topology settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyConfig {
    /// Node resolution mode used during enumeration.
    pub resolution: NodeResolution,
    /// Pause between dependent state transitions.
    pub settle_delay: Duration,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            resolution: NodeResolution::default(),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// String properties read from a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProperty {
    /// `DEVPKEY_Device_Service`
    Service,
    /// `DEVPKEY_Device_LocationInfo`
    LocationInfo,
    /// `DEVPKEY_Device_InstanceId`
    InstanceId,
}

/// Device node state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// `CM_Enable_DevNode`
    Enable,
    /// `CM_Disable_DevNode`
    Disable,
    /// `CM_Query_And_Remove_SubTree`
    Remove,
    /// `CM_Setup_DevNode`
    Setup,
    /// `CM_Reenumerate_DevNode`
    Reenumerate,
}

/// Access requested when opening a device path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read only.
    Read,
    /// Read and write.
    ReadWrite,
}

/// The OS device tree and the handles it hands out.
pub trait DeviceTree {
    /// Handle type returned by [`open`](Self::open).
    type Device: IoctlDevice;

    /// Every storage-port interface path, present or not.
    fn storage_port_interfaces(&self) -> io::Result<Vec<String>>;

    /// Instance id of the device exposing `interface`.
    fn interface_instance_id(&self, interface: &str) -> Option<String>;

    /// Locate the device node for `instance_id`.
    fn locate(&self, instance_id: &str, resolution: NodeResolution) -> Option<DevInst>;

    /// The root of the device tree.
    fn root(&self) -> Option<DevInst>;

    /// `(status, problem)` of a node; `None` if the node is gone.
    fn status(&self, node: DevInst) -> Option<(u32, u32)>;

    /// A string property. `None` when the node has no such property,
    /// `Some("")` when it is set but empty.
    fn property(&self, node: DevInst, property: DeviceProperty) -> Option<String>;

    /// First child of a node.
    fn first_child(&self, node: DevInst) -> Option<DevInst>;

    /// Next sibling of a node.
    fn next_sibling(&self, node: DevInst) -> Option<DevInst>;

    /// Parent of a node.
    fn parent(&self, node: DevInst) -> Option<DevInst>;

    /// First present disk interface of the device `instance_id`.
    fn disk_interface(&self, instance_id: &str) -> Option<String>;

    /// Open a device path.
    fn open(&self, path: &str, access: Access) -> io::Result<Self::Device>;

    /// Apply a state transition; `true` on success.
    fn change_state(&self, node: DevInst, change: StateChange) -> bool;

    /// Mounted drive roots such as `C:\`.
    fn logical_drives(&self) -> Vec<String>;
}

/// Role of a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// Served by the NVMe miniport.
    Controller,
    /// Served by the disk class driver.
    Disk,
    /// Anything else.
    Unclassified,
}

impl NodeClass {
    /// Classify by service name. Absent and empty names are unclassified.
    pub fn from_service(service: Option<&str>) -> Self {
        match service {
            Some(NVME_SERVICE) => NodeClass::Controller,
            Some(DISK_SERVICE) => NodeClass::Disk,
            _ => NodeClass::Unclassified,
        }
    }
}

/// PCI segment, bus, device and function.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciBdf {
    /// Segment
    pub segment: u16,
    /// Bus
    pub bus: u8,
    /// Device
    pub device: u8,
    /// Function
    pub function: u8,
}

impl PciBdf {
    /// Build from parts.
    pub fn new(segment: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            segment,
            bus,
            device,
            function,
        }
    }

    /// Parse a location string of the form `PCI bus B, device D, function F`.
    ///
    /// The segment is not part of that form and is left at zero.
    pub fn parse(location_info: &str) -> Option<Self> {
        sscanf::sscanf!(location_info, "PCI bus {u8}, device {u8}, function {u8}")
            .ok()
            .map(|(bus, device, function)| Self::new(0, bus, device, function))
    }
}

impl FromStr for PciBdf {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::Parse {
            what: "PCI location",
            input: s.to_string(),
        })
    }
}

impl fmt::Display for PciBdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}:{:02X}:{:02X}.{}",
            self.segment, self.bus, self.device, self.function
        )
    }
}

/// Namespace id from an instance id ending in `&<k>`; the suffix is zero
/// based, so the namespace id is `k + 1`.
pub fn parse_nsid(instance_id: &str) -> Option<u32> {
    let (_, suffix) = instance_id.rsplit_once('&')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse::<u32>().ok()?.checked_add(1)
}

/// A position in the device tree.
///
/// Stale once the tree changes underneath it.
pub struct DeviceNode<T> {
    tree: Arc<T>,
    inst: DevInst,
    status: u32,
    problem: u32,
    class: NodeClass,
}

impl<T: DeviceTree> DeviceNode<T> {
    /// Wrap `inst` if the tree still knows it.
    pub fn new(tree: Arc<T>, inst: DevInst) -> Option<Self> {
        let (status, problem) = tree.status(inst)?;
        let service = tree.property(inst, DeviceProperty::Service);
        let class = NodeClass::from_service(service.as_deref());
        Some(Self {
            tree,
            inst,
            status,
            problem,
            class,
        })
    }

    /// The instance handle.
    pub fn inst(&self) -> DevInst {
        self.inst
    }

    /// Status flags at creation.
    pub fn status(&self) -> u32 {
        self.status
    }

    /// Problem code at creation.
    pub fn problem(&self) -> u32 {
        self.problem
    }

    /// Classification at creation.
    pub fn class(&self) -> NodeClass {
        self.class
    }

    /// The tree this node belongs to.
    pub fn tree(&self) -> &Arc<T> {
        &self.tree
    }

    /// Read a string property.
    pub fn property(&self, property: DeviceProperty) -> Option<String> {
        self.tree.property(self.inst, property)
    }

    /// Service name.
    pub fn service(&self) -> Option<String> {
        self.property(DeviceProperty::Service)
    }

    /// Location string.
    pub fn location_info(&self) -> Option<String> {
        self.property(DeviceProperty::LocationInfo)
    }

    /// Instance id.
    pub fn instance_id(&self) -> Option<String> {
        self.property(DeviceProperty::InstanceId)
    }

    /// PCI location; zero when absent or unparseable.
    pub fn pcibdf(&self) -> PciBdf {
        self.location_info()
            .as_deref()
            .and_then(PciBdf::parse)
            .unwrap_or_default()
    }

    /// Parent node.
    pub fn parent(&self) -> Option<Self> {
        let parent = self.tree.parent(self.inst)?;
        Self::new(self.tree.clone(), parent)
    }

    /// Child nodes in tree order.
    pub fn children(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut next = self.tree.first_child(self.inst);
        while let Some(inst) = next {
            if let Some(node) = Self::new(self.tree.clone(), inst) {
                out.push(node);
            }
            next = self.tree.next_sibling(inst);
        }
        out
    }

    fn change(&self, change: StateChange) -> bool {
        debug!(node = self.inst, ?change, "state change");
        let ok = self.tree.change_state(self.inst, change);
        if !ok {
            warn!(node = self.inst, ?change, "state change failed");
        }
        ok
    }

    /// Enable.
    pub fn enable(&self) -> bool {
        self.change(StateChange::Enable)
    }

    /// Disable.
    pub fn disable(&self) -> bool {
        self.change(StateChange::Disable)
    }

    /// Remove the node and its subtree.
    pub fn remove(&self) -> bool {
        self.change(StateChange::Remove)
    }

    /// Bring a removed node back.
    pub fn restart(&self) -> bool {
        self.change(StateChange::Setup)
    }

    /// Re-enumerate from the root of the tree.
    pub fn refresh(&self) -> bool {
        match self.tree.root() {
            Some(root) => {
                debug!(node = root, "reenumerate");
                self.tree.change_state(root, StateChange::Reenumerate)
            }
            None => {
                warn!(node = self.inst, "no root node to reenumerate");
                false
            }
        }
    }
}

impl<T> fmt::Display for DeviceNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>2}", self.inst)
    }
}

impl<T> fmt::Debug for DeviceNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceNode")
            .field("inst", &self.inst)
            .field("status", &self.status)
            .field("problem", &self.problem)
            .field("class", &self.class)
            .finish()
    }
}

/// Physical disk numbers to mounted drive letters.
///
/// Built once, on first use, and never invalidated implicitly: volumes
/// mounted later show up only after [`refresh`](Self::refresh).
pub struct DriveLetterCache {
    map: Mutex<Option<BTreeMap<u32, Vec<String>>>>,
}

static GLOBAL_DRIVE_LETTERS: DriveLetterCache = DriveLetterCache::new();

impl DriveLetterCache {
    /// An empty, unpopulated cache.
    pub const fn new() -> Self {
        Self {
            map: Mutex::new(None),
        }
    }

    /// The process-wide cache.
    pub fn global() -> &'static Self {
        &GLOBAL_DRIVE_LETTERS
    }

    fn build<T: DeviceTree + ?Sized>(tree: &T) -> BTreeMap<u32, Vec<String>> {
        let mut map: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for root in tree.logical_drives() {
            let drive = root.trim_end_matches('\\').to_string();
            let volume = match tree.open(&format!(r"\\.\{drive}"), Access::Read) {
                Ok(volume) => volume,
                Err(e) => {
                    debug!(%drive, error = %e, "cannot open volume");
                    continue;
                }
            };
            match volume_disk_number(&volume) {
                Ok(Some(number)) => map.entry(number).or_default().push(drive),
                Ok(None) => {}
                Err(e) => debug!(%drive, error = %e, "no disk extents"),
            }
        }
        map
    }

    /// Drive letters on disk `number`, populating the cache on first use.
    pub fn letters<T: DeviceTree + ?Sized>(&self, tree: &T, number: u32) -> Vec<String> {
        let mut guard = self.map.lock();
        let map = guard.get_or_insert_with(|| Self::build(tree));
        map.get(&number).cloned().unwrap_or_default()
    }

    /// Rebuild from the current mounts.
    pub fn refresh<T: DeviceTree + ?Sized>(&self, tree: &T) {
        *self.map.lock() = Some(Self::build(tree));
    }

    /// Drop the cached mapping; the next lookup rebuilds it.
    pub fn invalidate(&self) {
        *self.map.lock() = None;
    }

    /// Whether the cache has been built.
    pub fn is_populated(&self) -> bool {
        self.map.lock().is_some()
    }
}

impl Default for DriveLetterCache {
    fn default() -> Self {
        Self::new()
    }
}

fn settle(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

/// One namespace exposed as a block device.
#[derive(Debug)]
pub struct PhysicalDisk<T: DeviceTree> {
    node: DeviceNode<T>,
    interface_path: Option<String>,
    device_path: Option<String>,
    disk_number: Option<u32>,
    nsid: Option<u32>,
    drives: Vec<String>,
    driver: Option<NvmeDevice<T::Device>>,
}

impl<T: DeviceTree> PhysicalDisk<T> {
    /// A disk that has not been inspected yet.
    pub fn new(node: DeviceNode<T>) -> Self {
        Self {
            node,
            interface_path: None,
            device_path: None,
            disk_number: None,
            nsid: None,
            drives: Vec::new(),
            driver: None,
        }
    }

    /// Resolve interface path, disk number, namespace id and drive letters,
    /// and open the protocol handle.
    ///
    /// A step that fails leaves its field empty.
    pub fn inspect(&mut self, cache: &DriveLetterCache) -> &mut Self {
        let tree = self.node.tree().clone();
        let instance_id = self.node.instance_id().filter(|id| !id.is_empty());
        self.nsid = instance_id.as_deref().and_then(parse_nsid);
        self.interface_path = instance_id
            .as_deref()
            .and_then(|id| tree.disk_interface(id));

        let Some(path) = self.interface_path.as_deref() else {
            warn!(node = self.node.inst(), "disk has no interface path");
            return self;
        };
        let number = tree
            .open(path, Access::Read)
            .map_err(|e| Error::transport("CreateFile", e))
            .and_then(|device| NvmeDevice::new(device).device_number());
        match number {
            Ok(number) => {
                self.disk_number = Some(number);
                self.device_path = Some(format!(r"\\.\PhysicalDrive{number}"));
            }
            Err(e) => warn!(%path, error = %e, "device number query failed"),
        }
        match tree.open(path, Access::ReadWrite) {
            Ok(device) => self.driver = Some(NvmeDevice::new(device)),
            Err(e) => warn!(%path, error = %e, "cannot open disk for protocol commands"),
        }
        if let Some(number) = self.disk_number {
            self.drives = cache.letters(tree.as_ref(), number);
        }
        self
    }

    /// The device node.
    pub fn node(&self) -> &DeviceNode<T> {
        &self.node
    }

    /// Disk interface path.
    pub fn interface_path(&self) -> Option<&str> {
        self.interface_path.as_deref()
    }

    /// `\\.\PhysicalDriveN`
    pub fn device_path(&self) -> Option<&str> {
        self.device_path.as_deref()
    }

    /// OS disk number.
    pub fn disk_number(&self) -> Option<u32> {
        self.disk_number
    }

    /// Namespace id.
    pub fn nsid(&self) -> Option<u32> {
        self.nsid
    }

    /// Mounted drive letters.
    pub fn drives(&self) -> &[String] {
        &self.drives
    }

    /// Whether the boot volume lives on this disk.
    pub fn holds_boot_volume(&self) -> bool {
        self.drives.iter().any(|d| d.eq_ignore_ascii_case(BOOT_VOLUME))
    }

    /// The protocol handle.
    pub fn nvme(&self) -> Result<&NvmeDevice<T::Device>> {
        self.driver.as_ref().ok_or_else(|| Error::NotOpen(self.to_string()))
    }

    /// SCSI access through the protocol handle.
    pub fn scsi(&self) -> Result<Disk<&T::Device>> {
        Ok(Disk::new(self.nvme()?.device()))
    }

    /// Enable.
    pub fn enable(&self) -> bool {
        self.node.enable()
    }

    /// Disable, unless the boot volume is on this disk.
    pub fn disable(&self) -> bool {
        if self.holds_boot_volume() {
            warn!(disk = ?self.disk_number, "refusing to disable the boot disk");
            return false;
        }
        self.node.disable()
    }

    /// Remove.
    pub fn remove(&self) -> bool {
        self.node.remove()
    }
}

impl<T: DeviceTree> fmt::Display for PhysicalDisk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let number = self.disk_number.map_or("-".to_string(), |n| n.to_string());
        let nsid = self.nsid.map_or("-".to_string(), |n| n.to_string());
        write!(
            f,
            " L PhyDisk {:<2} ({}): nsid {} - {:?}",
            number, self.node, nsid, self.drives
        )
    }
}

/// One NVMe controller and its disks.
#[derive(Debug)]
pub struct NvmeController<T: DeviceTree> {
    node: DeviceNode<T>,
    interface_path: String,
    bdf: PciBdf,
    disks: Vec<PhysicalDisk<T>>,
    driver: OnceCell<NvmeDevice<T::Device>>,
    settle_delay: Duration,
}

impl<T: DeviceTree> NvmeController<T> {
    /// Wrap a node classified as a controller.
    pub fn new(node: DeviceNode<T>, interface_path: String, settle_delay: Duration) -> Option<Self> {
        if node.class() != NodeClass::Controller {
            return None;
        }
        let bdf = node.pcibdf();
        Some(Self {
            node,
            interface_path,
            bdf,
            disks: Vec::new(),
            driver: OnceCell::new(),
            settle_delay,
        })
    }

    /// Walk the child nodes and inspect each as a disk, in tree order.
    pub fn enum_child_disks(&mut self, cache: &DriveLetterCache) -> &mut Self {
        for child in self.node.children() {
            let mut disk = PhysicalDisk::new(child);
            disk.inspect(cache);
            self.disks.push(disk);
        }
        self
    }

    /// The device node.
    pub fn node(&self) -> &DeviceNode<T> {
        &self.node
    }

    /// PCI location.
    pub fn bdf(&self) -> PciBdf {
        self.bdf
    }

    /// Storage-port interface path.
    pub fn interface_path(&self) -> &str {
        &self.interface_path
    }

    /// Child disks in tree order.
    pub fn disks(&self) -> &[PhysicalDisk<T>] {
        &self.disks
    }

    /// Disk with OS number `number`.
    pub fn by_num(&self, number: u32) -> Option<&PhysicalDisk<T>> {
        self.disks.iter().find(|d| d.disk_number == Some(number))
    }

    /// The controller's protocol handle, opened on first use.
    pub fn nvme(&self) -> Result<&NvmeDevice<T::Device>> {
        if let Some(driver) = self.driver.get() {
            return Ok(driver);
        }
        let device = self
            .node
            .tree()
            .open(&self.interface_path, Access::ReadWrite)
            .map_err(|e| Error::transport("CreateFile", e))?;
        Ok(self.driver.get_or_init(|| NvmeDevice::new(device)))
    }

    /// Enable the controller, then its disks.
    pub fn enable(&self) -> bool {
        let ok = self.node.enable();
        if ok {
            for disk in &self.disks {
                disk.enable();
                settle(self.settle_delay);
            }
        }
        ok
    }

    /// Disable every disk, best effort, then the controller.
    ///
    /// Disk failures, including a refused boot disk, do not stop the
    /// controller disable; its result is the one reported.
    pub fn disable(&self) -> bool {
        for disk in &self.disks {
            if !disk.disable() {
                debug!(disk = %disk, "disk disable failed, continuing");
            }
            settle(self.settle_delay);
        }
        self.node.disable()
    }

    /// Remove every disk, best effort, then the controller.
    pub fn remove(&self) -> bool {
        for disk in &self.disks {
            disk.remove();
            settle(self.settle_delay);
        }
        self.node.remove()
    }

    /// Remove, then set the node up again.
    pub fn restart(&self) -> bool {
        self.remove();
        let ok = self.node.restart();
        settle(self.settle_delay);
        ok
    }

    /// Disable and re-enable the parent node (the PCI port).
    ///
    /// The two calls are not atomic: between them the parent is disabled
    /// and anything else acting on it races with this rescan. Returns the
    /// enable result, or `false` without a parent.
    pub fn rescan(&self) -> bool {
        let Some(parent) = self.node.parent() else {
            warn!(node = self.node.inst(), "controller has no parent to rescan");
            return false;
        };
        parent.disable();
        settle(self.settle_delay);
        let ok = parent.enable();
        settle(self.settle_delay);
        ok
    }

    /// Re-enumerate the device tree.
    pub fn refresh(&self) -> bool {
        self.node.refresh()
    }
}

impl<T: DeviceTree> fmt::Display for NvmeController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = self
            .node
            .parent()
            .map(|p| p.pcibdf().to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(f, "({}) {}/{}", self.node, port, self.bdf)?;
        for disk in &self.disks {
            writeln!(f, "{disk}")?;
        }
        Ok(())
    }
}

/// Every NVMe controller, sorted by PCI location.
pub struct NvmeControllerList<T: DeviceTree> {
    controllers: Vec<NvmeController<T>>,
}

impl<T: DeviceTree> NvmeControllerList<T> {
    /// Enumerate from scratch.
    ///
    /// A tree that cannot list its interfaces yields an empty list.
    pub fn enumerate_with(tree: Arc<T>, cache: &DriveLetterCache, config: &TopologyConfig) -> Self {
        let mut controllers = Vec::new();
        let interfaces = match tree.storage_port_interfaces() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!(error = %e, "no storage port interfaces");
                return Self { controllers };
            }
        };

        for interface in interfaces {
            let Some(instance_id) = tree.interface_instance_id(&interface) else {
                continue;
            };
            let Some(inst) = tree.locate(&instance_id, config.resolution) else {
                debug!(%instance_id, resolution = ?config.resolution, "not located");
                continue;
            };
            let Some(node) = DeviceNode::new(tree.clone(), inst) else {
                continue;
            };
            let Some(mut controller) = NvmeController::new(node, interface, config.settle_delay)
            else {
                continue;
            };
            controller.enum_child_disks(cache);
            controllers.push(controller);
        }
        controllers.sort_by_key(|c| c.bdf);
        Self { controllers }
    }

    /// Controllers in PCI order.
    pub fn controllers(&self) -> &[NvmeController<T>] {
        &self.controllers
    }

    /// Iterate controllers.
    pub fn iter(&self) -> std::slice::Iter<'_, NvmeController<T>> {
        self.controllers.iter()
    }

    /// Number of controllers.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Whether no controller was found.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// First disk with OS number `number`.
    pub fn by_num(&self, number: u32) -> Option<&PhysicalDisk<T>> {
        self.controllers.iter().find_map(|c| c.by_num(number))
    }

    /// First controller on PCI bus `bus`.
    pub fn by_bus(&self, bus: u8) -> Option<&NvmeController<T>> {
        self.controllers.iter().find(|c| c.bdf.bus == bus)
    }

    /// Like [`by_num`](Self::by_num), failing with [`Error::NotFound`].
    pub fn disk(&self, number: u32) -> Result<&PhysicalDisk<T>> {
        self.by_num(number)
            .ok_or_else(|| Error::NotFound(format!("disk {number}")))
    }

    /// Like [`by_bus`](Self::by_bus), failing with [`Error::NotFound`].
    pub fn controller(&self, bus: u8) -> Result<&NvmeController<T>> {
        self.by_bus(bus)
            .ok_or_else(|| Error::NotFound(format!("controller on bus {bus}")))
    }
}

impl<'a, T: DeviceTree> IntoIterator for &'a NvmeControllerList<T> {
    type Item = &'a NvmeController<T>;
    type IntoIter = std::slice::Iter<'a, NvmeController<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: DeviceTree> fmt::Display for NvmeControllerList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, controller) in self.controllers.iter().enumerate() {
            write!(f, "NVME {index}: {controller}")?;
        }
        Ok(())
    }
}
