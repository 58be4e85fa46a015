use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use nvme_passthru::protocol::{
    PROTOCOL_STATUS_SUCCESS, ProtocolCommandLayout, ProtocolCommandReply, protocol_command_of,
    write_protocol_command_reply,
};
use nvme_passthru::{
    Access, DevInst, DeviceNode, DeviceProperty, DeviceTree, DriveLetterCache, ErrorKind,
    IoctlCode, IoctlDevice, NodeClass, NodeResolution, NvmeControllerList, PciBdf, ScsiRequest,
    StateChange, TopologyConfig, VscOpcode,
};

const ROOT: DevInst = 1;

#[derive(Debug, Default, Clone)]
struct Node {
    service: Option<String>,
    location: Option<String>,
    instance_id: Option<String>,
    parent: Option<DevInst>,
    children: Vec<DevInst>,
    present: bool,
    disk_number: Option<u32>,
}

/// An in-memory device tree.
#[derive(Debug, Default)]
struct MockTree {
    nodes: BTreeMap<DevInst, Node>,
    interfaces: Vec<(String, String)>,
    drives: RefCell<Vec<(String, u32)>>,
    failing: HashSet<(DevInst, StateChange)>,
    changes: RefCell<Vec<(DevInst, StateChange)>>,
    opens: RefCell<Vec<(String, Access)>>,
    no_interfaces: bool,
    read_only: bool,
}

#[derive(Debug, Default)]
struct MockDevice {
    disk_number: Option<u32>,
    volume_disk: Option<u32>,
    /// Answered to a VSC namespace-list data phase on a storage port.
    namespaces: Vec<u32>,
    opcodes: RefCell<Vec<u8>>,
}

impl MockDevice {
    fn answer_vsc(&self, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        let cmd = protocol_command_of(input).map_err(io::Error::other)?;
        let layout = ProtocolCommandLayout::parse(input).map_err(io::Error::other)?;
        self.opcodes.borrow_mut().push(cmd.opcode);
        if cmd.opcode == VscOpcode::Read as u8 {
            let at = layout.from_device_offset;
            for (i, nsid) in self.namespaces.iter().enumerate() {
                output[at + i * 4..at + i * 4 + 4].copy_from_slice(&nsid.to_le_bytes());
            }
        }
        let reply = ProtocolCommandReply {
            return_status: PROTOCOL_STATUS_SUCCESS,
            error_code: 0,
            fixed_return: 0,
        };
        write_protocol_command_reply(output, &reply).map_err(io::Error::other)?;
        Ok(output.len())
    }
}

impl IoctlDevice for MockDevice {
    fn ioctl(&self, code: IoctlCode, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        match (code, self.disk_number, self.volume_disk) {
            (IoctlCode::ProtocolCommand, ..) if !self.namespaces.is_empty() => {
                self.answer_vsc(input, output)
            }
            (IoctlCode::GetDeviceNumber, Some(number), _) => {
                output[..12].fill(0);
                output[4..8].copy_from_slice(&number.to_le_bytes());
                Ok(12)
            }
            (IoctlCode::GetVolumeDiskExtents, _, Some(number)) => {
                output[..32].fill(0);
                output[0..4].copy_from_slice(&1u32.to_le_bytes());
                output[8..12].copy_from_slice(&number.to_le_bytes());
                Ok(32)
            }
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    fn scsi_pass_through(&self, _request: &mut ScsiRequest<'_>) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

impl MockTree {
    fn new() -> Self {
        let mut tree = Self::default();
        tree.nodes.insert(
            ROOT,
            Node {
                present: true,
                ..Default::default()
            },
        );
        tree
    }

    fn add(&mut self, inst: DevInst, parent: DevInst, node: Node) {
        self.nodes.get_mut(&parent).unwrap().children.push(inst);
        self.nodes.insert(
            inst,
            Node {
                parent: Some(parent),
                ..node
            },
        );
    }

    /// A PCI port with an NVMe controller below it.
    fn add_controller(&mut self, port: DevInst, inst: DevInst, bus: u8, present: bool) {
        self.add(
            port,
            ROOT,
            Node {
                service: Some("pci".into()),
                location: Some(format!("PCI bus 0, device {}, function 0", bus)),
                instance_id: Some(format!("PCI\\PORT\\{port}")),
                present: true,
                ..Default::default()
            },
        );
        let instance_id = format!("PCI\\VEN_144D&DEV_A808\\{inst}");
        self.add(
            inst,
            port,
            Node {
                service: Some("stornvme".into()),
                location: Some(format!("PCI bus {bus}, device 0, function 0")),
                instance_id: Some(instance_id.clone()),
                present,
                ..Default::default()
            },
        );
        self.interfaces
            .push((format!("\\\\?\\storageport#{inst}"), instance_id));
    }

    fn add_disk(&mut self, inst: DevInst, controller: DevInst, k: u32, number: u32) {
        self.add(
            inst,
            controller,
            Node {
                service: Some("disk".into()),
                instance_id: Some(format!("SCSI\\Disk&Ven_NVMe&Prod_X\\5&1a2b&0&{k:06}")),
                present: true,
                disk_number: Some(number),
                ..Default::default()
            },
        );
    }

    fn mount(&self, drive: &str, number: u32) {
        self.drives.borrow_mut().push((drive.into(), number));
    }

    fn by_instance(&self, instance_id: &str) -> Option<(&DevInst, &Node)> {
        self.nodes
            .iter()
            .find(|(_, n)| n.instance_id.as_deref() == Some(instance_id))
    }

    fn changes(&self) -> Vec<(DevInst, StateChange)> {
        self.changes.borrow().clone()
    }
}

impl DeviceTree for MockTree {
    type Device = MockDevice;

    fn storage_port_interfaces(&self) -> io::Result<Vec<String>> {
        if self.no_interfaces {
            return Err(io::Error::other("CR_FAILURE"));
        }
        Ok(self.interfaces.iter().map(|(i, _)| i.clone()).collect())
    }

    fn interface_instance_id(&self, interface: &str) -> Option<String> {
        self.interfaces
            .iter()
            .find(|(i, _)| i == interface)
            .map(|(_, id)| id.clone())
    }

    fn locate(&self, instance_id: &str, resolution: NodeResolution) -> Option<DevInst> {
        let (inst, node) = self.by_instance(instance_id)?;
        (node.present || resolution == NodeResolution::IncludePhantom).then_some(*inst)
    }

    fn root(&self) -> Option<DevInst> {
        Some(ROOT)
    }

    fn status(&self, node: DevInst) -> Option<(u32, u32)> {
        self.nodes.get(&node).map(|_| (0x0180_200A, 0))
    }

    fn property(&self, node: DevInst, property: DeviceProperty) -> Option<String> {
        let node = self.nodes.get(&node)?;
        match property {
            DeviceProperty::Service => node.service.clone(),
            DeviceProperty::LocationInfo => node.location.clone(),
            DeviceProperty::InstanceId => node.instance_id.clone(),
        }
    }

    fn first_child(&self, node: DevInst) -> Option<DevInst> {
        self.nodes.get(&node)?.children.first().copied()
    }

    fn next_sibling(&self, node: DevInst) -> Option<DevInst> {
        let parent = self.nodes.get(&node)?.parent?;
        let siblings = &self.nodes.get(&parent)?.children;
        let at = siblings.iter().position(|&c| c == node)?;
        siblings.get(at + 1).copied()
    }

    fn parent(&self, node: DevInst) -> Option<DevInst> {
        self.nodes.get(&node)?.parent
    }

    fn disk_interface(&self, instance_id: &str) -> Option<String> {
        let (inst, _) = self.by_instance(instance_id)?;
        Some(format!("\\\\?\\disk#{inst}"))
    }

    fn open(&self, path: &str, access: Access) -> io::Result<MockDevice> {
        self.opens.borrow_mut().push((path.to_string(), access));
        if self.read_only && access == Access::ReadWrite {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        if let Some(inst) = path.strip_prefix("\\\\?\\disk#") {
            let inst: DevInst = inst.parse().map_err(io::Error::other)?;
            let node = self.nodes.get(&inst).ok_or(io::ErrorKind::NotFound)?;
            return Ok(MockDevice {
                disk_number: node.disk_number,
                ..Default::default()
            });
        }
        if let Some(drive) = path.strip_prefix("\\\\.\\") {
            let drives = self.drives.borrow();
            let (_, number) = drives
                .iter()
                .find(|(d, _)| d == drive)
                .ok_or(io::ErrorKind::NotFound)?;
            return Ok(MockDevice {
                volume_disk: Some(*number),
                ..Default::default()
            });
        }
        Ok(MockDevice {
            namespaces: vec![1, 2],
            ..Default::default()
        })
    }

    fn change_state(&self, node: DevInst, change: StateChange) -> bool {
        self.changes.borrow_mut().push((node, change));
        !self.failing.contains(&(node, change))
    }

    fn logical_drives(&self) -> Vec<String> {
        self.drives
            .borrow()
            .iter()
            .map(|(d, _)| format!("{d}\\"))
            .collect()
    }
}

fn config() -> TopologyConfig {
    TopologyConfig {
        resolution: NodeResolution::PresentOnly,
        settle_delay: Duration::ZERO,
    }
}

/// Three controllers listed out of PCI order; the one on bus 1 has two disks.
fn machine() -> MockTree {
    let mut tree = MockTree::new();
    tree.add_controller(10, 11, 3, true);
    tree.add_controller(20, 21, 1, true);
    tree.add_controller(30, 31, 2, true);
    tree.add_disk(22, 21, 0, 0);
    tree.add_disk(23, 21, 1, 1);
    tree.add_disk(32, 31, 0, 2);
    tree.mount("C:", 0);
    tree.mount("D:", 1);
    tree.mount("E:", 1);
    tree
}

fn enumerate(tree: MockTree) -> (Arc<MockTree>, NvmeControllerList<MockTree>) {
    let tree = Arc::new(tree);
    let cache = DriveLetterCache::new();
    let list = NvmeControllerList::enumerate_with(tree.clone(), &cache, &config());
    (tree, list)
}

#[test]
fn controllers_are_sorted_by_bdf() {
    let (_, list) = enumerate(machine());
    let bdfs: Vec<String> = list.iter().map(|c| c.bdf().to_string()).collect();
    assert_eq!(bdfs, vec!["0000:01:00.0", "0000:02:00.0", "0000:03:00.0"]);
    assert!(list.iter().all(|c| c.node().class() == NodeClass::Controller));
}

#[test]
fn non_nvme_storage_ports_are_skipped() {
    let mut tree = machine();
    tree.add(
        40,
        ROOT,
        Node {
            service: Some("storahci".into()),
            location: Some("PCI bus 0, device 23, function 0".into()),
            instance_id: Some("PCI\\VEN_8086&DEV_A352\\40".into()),
            present: true,
            ..Default::default()
        },
    );
    tree.interfaces
        .push(("\\\\?\\storageport#40".into(), "PCI\\VEN_8086&DEV_A352\\40".into()));
    let (_, list) = enumerate(tree);
    assert_eq!(list.len(), 3);
}

#[test]
fn disks_carry_number_nsid_and_drive_letters() {
    let (_, list) = enumerate(machine());
    let ctrl = list.by_bus(1).unwrap();
    let disks = ctrl.disks();
    assert_eq!(disks.len(), 2);

    assert_eq!(disks[0].disk_number(), Some(0));
    assert_eq!(disks[0].nsid(), Some(1));
    assert_eq!(disks[0].device_path(), Some("\\\\.\\PhysicalDrive0"));
    assert_eq!(disks[0].drives(), ["C:"]);
    assert!(disks[0].holds_boot_volume());

    assert_eq!(disks[1].nsid(), Some(2));
    assert_eq!(disks[1].drives(), ["D:", "E:"]);
    assert!(disks[1].nvme().is_ok());
}

#[test]
fn lookups_by_number_and_bus() {
    let (_, list) = enumerate(machine());
    assert_eq!(list.by_num(2).unwrap().nsid(), Some(1));
    assert_eq!(list.by_num(1).unwrap().drives(), ["D:", "E:"]);
    assert!(list.by_num(42).is_none());
    assert_eq!(list.by_bus(3).unwrap().bdf(), PciBdf::new(0, 3, 0, 0));
    assert!(list.by_bus(9).is_none());
    assert_eq!(list.controller(9).unwrap_err().kind(), ErrorKind::Lookup);
    assert_eq!(list.disk(42).unwrap_err().to_string(), "disk 42 not found");
}

#[test]
fn disk_number_needs_only_read_access() {
    let mut tree = machine();
    tree.read_only = true;
    let (tree, list) = enumerate(tree);

    let disk = list.by_num(0).unwrap();
    assert_eq!(disk.device_path(), Some("\\\\.\\PhysicalDrive0"));
    assert_eq!(disk.drives(), ["C:"]);
    assert_eq!(disk.nvme().unwrap_err().kind(), ErrorKind::Transport);

    let opens = tree.opens.borrow();
    assert!(opens.contains(&("\\\\?\\disk#22".to_string(), Access::Read)));
    assert!(opens.contains(&("\\\\?\\disk#22".to_string(), Access::ReadWrite)));
}

#[test]
fn controller_handle_opens_once_on_demand() {
    let (tree, list) = enumerate(machine());
    let ctrl = list.by_bus(2).unwrap();
    let path = "\\\\?\\storageport#31".to_string();
    let opened = || {
        tree.opens
            .borrow()
            .iter()
            .filter(|(p, _)| *p == path)
            .count()
    };
    assert_eq!(opened(), 0);

    assert!(ctrl.nvme().is_ok());
    assert!(ctrl.nvme().is_ok());
    assert_eq!(opened(), 1);
    assert!(tree.opens.borrow().contains(&(path.clone(), Access::ReadWrite)));

    let mut denied = machine();
    denied.read_only = true;
    let (_, list) = enumerate(denied);
    let err = list.by_bus(2).unwrap().nvme().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[test]
fn controller_admin_goes_through_vsc_on_the_port() {
    let (_, list) = enumerate(machine());
    let nvme = list.by_bus(1).unwrap().nvme().unwrap();
    assert_eq!(nvme.vsc_namespace_list(false).unwrap(), vec![1, 2]);
    assert_eq!(
        *nvme.device().opcodes.borrow(),
        vec![VscOpcode::Write as u8, VscOpcode::Read as u8]
    );
}

#[test]
fn boot_disk_refuses_but_controller_disable_still_runs() {
    let (tree, list) = enumerate(machine());
    let ctrl = list.by_bus(1).unwrap();

    assert!(!ctrl.disks()[0].disable());
    assert!(tree.changes().is_empty());

    assert!(ctrl.disable());
    assert_eq!(
        tree.changes(),
        vec![(23, StateChange::Disable), (21, StateChange::Disable)]
    );
}

#[test]
fn controller_disable_reports_its_own_result() {
    let mut tree = machine();
    tree.failing.insert((23, StateChange::Disable));
    tree.failing.insert((21, StateChange::Disable));
    let (tree, list) = enumerate(tree);
    assert!(!list.by_bus(1).unwrap().disable());
    assert_eq!(tree.changes().last(), Some(&(21, StateChange::Disable)));

    // a failing disk alone does not fail the controller
    let mut other = machine();
    other.failing.insert((32, StateChange::Disable));
    let (other, list) = enumerate(other);
    assert!(list.by_bus(2).unwrap().disable());
    assert_eq!(
        other.changes(),
        vec![(32, StateChange::Disable), (31, StateChange::Disable)]
    );
}

#[test]
fn lifecycle_ordering() {
    let (tree, list) = enumerate(machine());
    let ctrl = list.by_bus(1).unwrap();

    assert!(ctrl.enable());
    assert!(ctrl.remove());
    assert!(ctrl.restart());
    assert!(ctrl.refresh());
    assert_eq!(
        tree.changes(),
        vec![
            (21, StateChange::Enable),
            (22, StateChange::Enable),
            (23, StateChange::Enable),
            (22, StateChange::Remove),
            (23, StateChange::Remove),
            (21, StateChange::Remove),
            (22, StateChange::Remove),
            (23, StateChange::Remove),
            (21, StateChange::Remove),
            (21, StateChange::Setup),
            (ROOT, StateChange::Reenumerate),
        ]
    );
}

#[test]
fn rescan_cycles_the_parent() {
    let mut tree = machine();
    tree.failing.insert((30, StateChange::Enable));
    let (tree, list) = enumerate(tree);

    assert!(list.by_bus(1).unwrap().rescan());
    assert!(!list.by_bus(2).unwrap().rescan());
    assert_eq!(
        tree.changes(),
        vec![
            (20, StateChange::Disable),
            (20, StateChange::Enable),
            (30, StateChange::Disable),
            (30, StateChange::Enable),
        ]
    );
}

#[test]
fn phantom_controllers_need_opt_in() {
    let mut tree = machine();
    tree.add_controller(50, 51, 4, false);
    let tree = Arc::new(tree);
    let cache = DriveLetterCache::new();

    let present = NvmeControllerList::enumerate_with(tree.clone(), &cache, &config());
    assert!(present.by_bus(4).is_none());

    let phantom = TopologyConfig {
        resolution: NodeResolution::IncludePhantom,
        ..config()
    };
    let all = NvmeControllerList::enumerate_with(tree, &cache, &phantom);
    assert_eq!(all.len(), 4);
    assert_eq!(all.by_bus(4).unwrap().bdf().to_string(), "0000:04:00.0");
}

#[test]
fn absent_and_empty_properties_are_distinct() {
    let mut tree = MockTree::new();
    tree.add(
        60,
        ROOT,
        Node {
            service: Some(String::new()),
            location: None,
            instance_id: Some(String::new()),
            present: true,
            ..Default::default()
        },
    );
    let tree = Arc::new(tree);
    let node = DeviceNode::new(tree.clone(), 60).unwrap();

    assert_eq!(node.service(), Some(String::new()));
    assert_eq!(node.location_info(), None);
    assert_eq!(node.class(), NodeClass::Unclassified);
    assert_eq!(node.pcibdf(), PciBdf::default());
    assert!(DeviceNode::new(tree, 999).is_none());
}

#[test]
fn empty_location_gives_zero_bdf_and_empty_instance_gives_no_nsid() {
    let mut tree = MockTree::new();
    tree.add(
        70,
        ROOT,
        Node {
            service: Some("stornvme".into()),
            location: Some(String::new()),
            instance_id: Some("PCI\\VEN_1\\70".into()),
            present: true,
            ..Default::default()
        },
    );
    tree.add(
        71,
        70,
        Node {
            service: Some("disk".into()),
            instance_id: Some(String::new()),
            present: true,
            ..Default::default()
        },
    );
    tree.interfaces
        .push(("\\\\?\\storageport#70".into(), "PCI\\VEN_1\\70".into()));
    let (_, list) = enumerate(tree);

    let ctrl = list.by_bus(0).unwrap();
    assert_eq!(ctrl.bdf(), PciBdf::default());
    let disk = &ctrl.disks()[0];
    assert_eq!(disk.nsid(), None);
    assert_eq!(disk.disk_number(), None);
    assert!(disk.nvme().is_err());
}

#[test]
fn interface_failure_yields_empty_list() {
    let mut tree = machine();
    tree.no_interfaces = true;
    let (_, list) = enumerate(tree);
    assert!(list.is_empty());
    assert_eq!(list.to_string(), "");
}

#[test]
fn drive_letters_are_cached_until_refreshed() {
    let tree = machine();
    let cache = DriveLetterCache::new();
    assert!(!cache.is_populated());
    assert_eq!(cache.letters(&tree, 1), ["D:", "E:"]);
    assert!(cache.is_populated());

    tree.mount("F:", 1);
    assert_eq!(cache.letters(&tree, 1), ["D:", "E:"]);

    cache.refresh(&tree);
    assert_eq!(cache.letters(&tree, 1), ["D:", "E:", "F:"]);

    cache.invalidate();
    assert!(!cache.is_populated());
    assert!(cache.letters(&tree, 7).is_empty());
}

#[test]
fn listing_shows_port_and_controller() {
    let (_, list) = enumerate(machine());
    let text = list.to_string();
    assert!(text.starts_with("NVME 0: (21) 0000:00:01.0/0000:01:00.0\n"));
    assert!(text.contains("nsid 2"));
    assert!(text.contains("NVME 2: (11)"));
}
