use thiserror::Error;

pub type Result<T> = std::result::Result<T, PapertapeError>;

#[derive(Error, Debug)]
pub enum PapertapeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tape {label} not found {location}")]
    NotFound { label: String, location: String },

    #[error("Tape {label} is not loaded in any drive")]
    NotLoaded { label: String },

    #[error("Unable to mount {label} into drive {drive} after {attempts} attempts")]
    MountExhausted {
        label: String,
        drive: usize,
        attempts: u32,
    },

    #[error("Drive {drive} is busy ({state})")]
    DriveBusy { drive: usize, state: String },

    #[error("Drive {drive} has no open archive stream ({state})")]
    DriveNotOpen { drive: usize, state: String },

    #[error("Command failed: {command} ({reason})")]
    ProcessFailure { command: String, reason: String },

    #[error("Checksum mismatch on {label} at {tape_index}:{path} (expected {expected}, found {actual})")]
    ChecksumMismatch {
        label: String,
        tape_index: u32,
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Mirrored write of archive {tape_index} failed on drive(s) {failed_drives:?}, succeeded on {succeeded_drives:?}")]
    PartialMirrorFailure {
        tape_index: u32,
        failed_drives: Vec<usize>,
        succeeded_drives: Vec<usize>,
    },

    #[error("Cannot assemble archive {tape_index} from {path}: {reason}")]
    Assembly {
        tape_index: u32,
        path: String,
        reason: String,
    },

    #[error("Archive {tape_index} is at least {size} bytes, exceeds buffer limit of {limit} bytes")]
    ArchiveTooLarge { tape_index: u32, size: u64, limit: u64 },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Parameter validation error: {0}")]
    ParameterValidation(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl PapertapeError {
    pub fn process_failure<C: Into<String>, R: Into<String>>(command: C, reason: R) -> Self {
        Self::ProcessFailure {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn catalog<T: Into<String>>(msg: T) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse<T: Into<String>>(msg: T) -> Self {
        Self::Parse(msg.into())
    }

    pub fn lock<T: Into<String>>(msg: T) -> Self {
        Self::Lock(msg.into())
    }

    pub fn parameter_validation<T: Into<String>>(msg: T) -> Self {
        Self::ParameterValidation(msg.into())
    }
}
