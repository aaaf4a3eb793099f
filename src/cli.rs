use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::request::{DiskFormat, NetworkMode};

#[derive(Parser, Debug)]
#[command(
    name = "vbm",
    version,
    about = "Manage VirtualBox machines through VBoxManage"
)]
pub struct Cli {
    /// Path to config file (default: ~/.config/vbm/config.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// VBoxManage binary to run (overrides config)
    #[arg(long, global = true, value_name = "PATH")]
    pub tool: Option<PathBuf>,

    /// Seconds to wait for each VBoxManage call (overrides config). `create`
    /// runs several calls, and each one gets the full timeout
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write debug logs to ~/.local/share/vbm/vbm.log
    #[arg(long, global = true)]
    pub log: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, VBoxManage output passed through
    Text,
    /// Structured JSON on stdout
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and register a new VM
    Create {
        /// VM name
        name: String,

        /// Guest OS type, e.g. Ubuntu_64 or Windows10_64 (`VBoxManage list ostypes`)
        #[arg(long)]
        os_type: Option<String>,

        /// Memory size; plain numbers are MB, or use a suffix (512M, 4G)
        #[arg(long, alias = "ram")]
        memory: String,

        /// Number of virtual CPUs
        #[arg(long)]
        cpus: u32,

        /// Disk size in GB; 0 creates the VM without a disk
        #[arg(long, default_value_t = 0)]
        disk_gb: u64,

        /// Disk image format (default from config)
        #[arg(long, value_enum)]
        disk_format: Option<DiskFormat>,

        /// Installation ISO to attach as a DVD drive
        #[arg(long)]
        iso: Option<PathBuf>,

        /// Network attachment for the first adapter
        #[arg(long, value_enum, default_value_t = NetworkMode::Nat)]
        network: NetworkMode,

        /// Start the VM once it is created
        #[arg(long)]
        start: bool,

        /// With --start, run without a GUI window
        #[arg(long, requires = "start")]
        headless: bool,
    },

    /// Unregister a VM
    Delete {
        /// VM name or UUID
        name: String,

        /// Keep the VM's disk images and settings files
        #[arg(long)]
        keep_disks: bool,
    },

    /// Start a VM
    Start {
        /// VM name or UUID
        name: String,

        /// Run without a GUI window
        #[arg(long)]
        headless: bool,
    },

    /// Stop a running VM
    Stop {
        /// VM name or UUID
        name: String,

        /// Power off immediately instead of sending an ACPI shutdown
        #[arg(long)]
        force: bool,
    },

    /// Clone an existing VM
    Clone {
        /// Source VM name or UUID
        #[arg(alias = "original")]
        source: String,

        /// Name of the new VM
        new_name: String,

        /// Share storage with the source (requires a snapshot)
        #[arg(long)]
        linked: bool,

        /// Clone from this snapshot of the source
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// List registered VMs
    List {
        /// Include configuration and state of each VM
        #[arg(long, alias = "details")]
        detailed: bool,
    },

    /// Show a VM's configuration
    Info {
        /// VM name or UUID
        name: String,
    },

    /// Check that VBoxManage can be run and print its version
    Check,
}
