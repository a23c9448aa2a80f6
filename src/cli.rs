use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "papertape")]
#[command(about = "Mirrored archival to a robotic tape library with spot-check verification")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Specify configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    DiskQueue,
    Streaming,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CommitArg {
    Buffered,
    Fast,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which tapes sit in drives and slots
    Inventory,

    /// Load a tape into a drive, evicting whatever is there
    Load {
        /// Tape label (barcode)
        #[arg(value_name = "LABEL")]
        label: String,

        /// Drive index
        #[arg(value_name = "DRIVE", default_value = "0")]
        drive: usize,
    },

    /// Return tapes to their slots
    Unload {
        /// Drive index (all drives when omitted)
        #[arg(value_name = "DRIVE")]
        drive: Option<usize>,
    },

    /// Build a manifest CSV from a directory tree
    Manifest {
        /// Directory to archive, under the data root
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Output manifest path
        #[arg(value_name = "OUT")]
        out: PathBuf,

        /// First tape index to assign
        #[arg(long, default_value = "1")]
        first_index: u32,

        /// Record checksums of every file in the catalog
        #[arg(long)]
        checksums: bool,
    },

    /// Write a manifest to a fresh tape pair
    Dump {
        /// Manifest CSV (tape_index,path)
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Write to a single drive instead of both
        #[arg(long)]
        drive: Option<usize>,

        /// Override the configured write mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Override the configured streaming commit strategy
        #[arg(long, value_enum)]
        commit: Option<CommitArg>,

        /// Show progress
        #[arg(short, long)]
        progress: bool,
    },

    /// Spot-check one sampled file per archive on a tape
    Verify {
        /// Tape label (barcode)
        #[arg(value_name = "LABEL")]
        label: String,

        /// Catalog CSV of the tape contents (tape_index,path)
        #[arg(value_name = "CATALOG_CSV")]
        catalog: PathBuf,

        /// Pid of the job that wrote the tape (defaults to the catalog owner)
        #[arg(long)]
        job_pid: Option<u32>,

        /// Drive to use when the tape is not loaded
        #[arg(long, default_value = "0")]
        drive: usize,

        /// Seed for member sampling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Register blank tapes in the catalog so dumps can select them
    InsertLabels {
        /// Tape labels (barcodes)
        #[arg(value_name = "LABEL", required = true)]
        labels: Vec<String>,
    },

    /// Print the catalog stored at the start of a tape
    TapeCatalog {
        /// Tape label (barcode)
        #[arg(value_name = "LABEL")]
        label: String,

        /// Drive to use when the tape is not loaded
        #[arg(long, default_value = "0")]
        drive: usize,

        /// Also count the files on the tape
        #[arg(long)]
        count: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
