#![cfg_attr(not(windows), allow(dead_code))]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Result, anyhow, bail};
use clap::error::ErrorKind as UsageKind;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use nvme_passthru::{
    DeviceTree, ErrorLogEntry, FeatureSelector, FeatureValue, LatencyRecorder, LogPageId,
    NodeResolution, NvmeController, NvmeControllerList, PhysicalDisk, SmartHealthInfo,
    TopologyConfig,
};

/// NVMe admin commands through the inbox storage driver
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// PhysicalDrive number. ex) 1 -> "\\.\PhysicalDrive1"
    #[arg(short, long, global = true)]
    disk: Option<u32>,
    /// PCI bus number of a controller. ex) 3 -> "0000:03:00.0"
    #[arg(short, long, global = true)]
    bus: Option<u8>,
    /// Resolve devices that are installed but not present
    #[arg(long, global = true)]
    include_phantom: bool,
    /// Write command latencies to this CSV file
    #[arg(long, global = true)]
    trace: Option<PathBuf>,
    /// More logging; repeat for more
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Controller list
    List,
    /// Namespace list
    ListNs {
        /// Allocated namespaces instead of active ones
        #[arg(short, long)]
        all: bool,
    },
    /// Creates a namespace (rescans the controller)
    Create {
        /// Size of the namespace (NSZE)
        #[arg(long)]
        size: u64,
    },
    /// Deletes a namespace (removes the controller)
    Delete,
    /// Attaches a namespace (enables the controller)
    Attach,
    /// Detaches a namespace (disables the controller)
    Detach,
    /// Identify controller
    IdCtrl,
    /// Identify namespace
    IdNs {
        /// Namespace id
        #[arg(long, default_value_t = 1)]
        nsid: u32,
    },
    /// Get log page
    GetLog {
        /// Log id, decimal or 0x hex
        #[arg(long, value_parser = parse_number)]
        lid: u32,
        /// Namespace id
        #[arg(long, default_value_t = 1)]
        nsid: u32,
    },
    /// Get feature
    GetFeature {
        /// Feature id, decimal or 0x hex
        #[arg(long, value_parser = parse_number)]
        fid: u32,
        /// Select, decimal or 0x hex
        #[arg(long, value_parser = parse_number, default_value = "0")]
        sel: u32,
    },
    /// Set feature
    SetFeature {
        /// Feature id, decimal or 0x hex
        #[arg(long, value_parser = parse_number)]
        fid: u32,
        /// Value, decimal or 0x hex
        #[arg(long, value_parser = parse_number)]
        value: u32,
        /// Persist across resets
        #[arg(long)]
        save: bool,
    },
    /// Disable and re-enable the controller's PCI port
    Rescan,
    /// Remove and set up the controller again
    Restart,
    /// Re-enumerate the device tree
    Refresh,
    /// TCG level 0 discovery
    Discovery,
}

fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn byte(value: u32, what: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| anyhow!("{what} {value:#x} does not fit in a byte"))
}

fn hex_dump(buf: &[u8]) {
    for (row, chunk) in buf.chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("{:04x}: {}", row * 16, bytes.join(" "));
    }
}

fn report(what: &str, ok: bool) -> Result<()> {
    if ok {
        println!("{what} successful.");
        Ok(())
    } else {
        bail!("{what} failed")
    }
}

fn print_namespace_list(list: &[u32]) {
    for (index, nsid) in list.iter().enumerate() {
        println!("[{index:>4}]:{nsid:#x}");
    }
}

fn print_log_page(lid: u8, page: &[u8]) -> Result<()> {
    println!("Get Log Page (LID: {lid:#x}) success.");
    if lid == LogPageId::SmartHealth as u8 {
        print!("{}", SmartHealthInfo::parse(page)?);
    } else if lid == LogPageId::ErrorInformation as u8 {
        for entry in ErrorLogEntry::parse_page(page) {
            println!("{entry:?}");
        }
    } else {
        hex_dump(&page[..page.len().min(256)]);
    }
    Ok(())
}

fn disk_command<T: DeviceTree>(
    command: &Commands,
    disk: &PhysicalDisk<T>,
    recorder: &LatencyRecorder,
) -> Result<()> {
    let nvme = disk.nvme()?;
    match command {
        Commands::IdCtrl => {
            let data = recorder.time("id-ctrl", || nvme.identify_controller())?;
            print!("{data}");
        }
        Commands::IdNs { nsid } => {
            let data = recorder.time("id-ns", || nvme.identify_namespace(*nsid))?;
            print!("{data}");
        }
        Commands::ListNs { all } => {
            let list = recorder.time("list-ns", || nvme.namespace_list(*all))?;
            print_namespace_list(&list);
        }
        Commands::GetLog { lid, nsid } => {
            let lid = byte(*lid, "log id")?;
            let page = recorder.time("get-log", || nvme.log_page(lid, *nsid))?;
            print_log_page(lid, &page)?;
        }
        Commands::GetFeature { fid, sel } => {
            let fid = byte(*fid, "feature id")?;
            let sel = FeatureSelector::from_raw(byte(*sel, "select")?)?;
            let dw0 = recorder.time("get-feature", || nvme.get_feature(fid, sel, 0))?;
            println!("get-feature:{fid:#04x} (sel {sel:?}), {}", FeatureValue::decode(fid, dw0));
        }
        Commands::SetFeature { fid, value, save } => {
            let fid = byte(*fid, "feature id")?;
            let dw0 = recorder.time("set-feature", || nvme.set_feature(fid, *value, *save))?;
            println!("set-feature:{fid:#04x} (value {value:#x}), result {dw0:#010x}");
        }
        Commands::Discovery => {
            let scsi = disk.scsi()?;
            let discovery = recorder.time("discovery", || scsi.discovery0())?;
            println!(
                "level 0 discovery v{}.{}, {} bytes",
                discovery.major_version, discovery.minor_version, discovery.length
            );
            for (code, version, data) in discovery.features() {
                println!("  feature {code:#06x} v{version}: {} bytes", data.len());
            }
        }
        _ => bail!("this command is not supported when targeting a disk"),
    }
    Ok(())
}

fn controller_command<T: DeviceTree>(
    command: &Commands,
    ctrl: &NvmeController<T>,
    recorder: &LatencyRecorder,
) -> Result<()> {
    match command {
        Commands::Create { size } => {
            debug!(size, "create emulated by rescan");
            println!("Rescanning controller to emulate create...");
            report("Rescan", recorder.time("rescan", || ctrl.rescan()))
        }
        Commands::Rescan => report("Rescan", recorder.time("rescan", || ctrl.rescan())),
        Commands::Delete => {
            println!("Removing controller...");
            report("Remove", recorder.time("remove", || ctrl.remove()))
        }
        Commands::Attach => {
            println!("Enabling controller...");
            report("Enable", recorder.time("enable", || ctrl.enable()))
        }
        Commands::Detach => {
            println!("Disabling controller...");
            report("Disable", recorder.time("disable", || ctrl.disable()))
        }
        Commands::Restart => report("Restart", recorder.time("restart", || ctrl.restart())),
        Commands::Refresh => report("Refresh", recorder.time("refresh", || ctrl.refresh())),
        // Controller-scoped admin commands go through a VSC on the storage port
        Commands::IdCtrl => {
            let nvme = ctrl.nvme()?;
            let data = recorder.time("id-ctrl", || nvme.vsc_identify_controller())?;
            print!("{data}");
            Ok(())
        }
        Commands::ListNs { all } => {
            let nvme = ctrl.nvme()?;
            let list = recorder.time("list-ns", || nvme.vsc_namespace_list(*all))?;
            print_namespace_list(&list);
            Ok(())
        }
        Commands::GetLog { lid, nsid } => {
            let lid = byte(*lid, "log id")?;
            let nvme = ctrl.nvme()?;
            let page = recorder.time("get-log", || nvme.vsc_log_page(lid, *nsid))?;
            print_log_page(lid, &page)
        }
        _ => {
            let disk = ctrl
                .disks()
                .first()
                .ok_or_else(|| anyhow!("no disks on controller {} to target", ctrl.bdf()))?;
            disk_command(command, disk, recorder)
        }
    }
}

fn run<T: DeviceTree>(
    args: &Args,
    list: &NvmeControllerList<T>,
    recorder: &LatencyRecorder,
) -> Result<()> {
    if let Commands::List = args.command {
        match args.bus {
            Some(bus) => {
                print!("{}", list.controller(bus)?);
            }
            None => print!("{list}"),
        }
        return Ok(());
    }

    match (args.disk, args.bus) {
        (Some(number), _) => {
            disk_command(&args.command, list.disk(number)?, recorder)
        }
        (None, Some(bus)) => {
            controller_command(&args.command, list.controller(bus)?, recorder)
        }
        (None, None) => bail!("--disk <num> or --bus <num> is required for this command"),
    }
}

#[cfg(windows)]
fn enumerate_and_run(args: &Args, config: &TopologyConfig, recorder: &LatencyRecorder) -> Result<()> {
    let list = recorder.time("enumerate", || nvme_passthru::windows::enumerate(config));
    run(args, &list, recorder)
}

#[cfg(not(windows))]
fn enumerate_and_run(_args: &Args, _config: &TopologyConfig, _recorder: &LatencyRecorder) -> Result<()> {
    bail!("the inbox NVMe driver is only reachable on Windows")
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Exit status for a command line that did not parse. Help and version
/// requests are successes; everything else is a failure like any other.
fn usage_status(error: &clap::Error) -> u8 {
    match error.kind() {
        UsageKind::DisplayHelp | UsageKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let status = usage_status(&e);
            // help goes to stdout, errors to stderr
            let _ = e.print();
            return ExitCode::from(status);
        }
    };
    init_logging(args.verbose);

    let config = TopologyConfig {
        resolution: if args.include_phantom {
            NodeResolution::IncludePhantom
        } else {
            NodeResolution::PresentOnly
        },
        ..TopologyConfig::default()
    };
    let recorder = LatencyRecorder::new();
    let result = enumerate_and_run(&args, &config, &recorder);

    if let Some(path) = &args.trace {
        match recorder.save(path) {
            Ok(rows) => debug!(rows, path = %path.display(), "trace saved"),
            Err(e) => eprintln!("Error: cannot write trace {}: {e}", path.display()),
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
