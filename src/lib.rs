//! papertape Library
//!
//! Mirrored archival to a robotic tape library: changer inventory and mount
//! control over `mtx`, tar archive groups written identically to two drives,
//! and spot-check verification of written tapes against a checksum catalog.

pub mod archive;
pub mod catalog;
pub mod changer;
pub mod cli;
pub mod commands;
pub mod config;
pub mod drives;
pub mod dump;
pub mod error;
pub mod executor;
pub mod hash;
pub mod logger;
pub mod simulated;
pub mod utils;
pub mod verify;


// Re-export key types for easier use
pub use archive::{ArchiveGroup, ArchiveWriter, Manifest, ManifestEntry};
pub use catalog::{JsonCatalog, TapeCatalog};
pub use changer::inventory::{parse_inventory, InventorySnapshot, TapeLabel};
pub use changer::Changer;
pub use config::Config;
pub use drives::{DriveSelection, TapeDrives};
pub use dump::{DumpReport, DumpSession};
pub use error::{PapertapeError, Result};
pub use verify::{SpotCheckReport, Verifier};
