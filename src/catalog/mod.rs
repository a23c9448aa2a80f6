//! Tape label catalog
//!
//! Bookkeeping of which labels are blank, which job claimed them, when they
//! were completed, and the expected checksum of every archived path. The
//! archive and verify paths only see the [`TapeCatalog`] trait.

pub mod json;

pub use json::JsonCatalog;

use crate::changer::inventory::TapeLabel;
use crate::error::Result;
use chrono::{DateTime, Local};
use std::collections::HashMap;

/// Completion dates are stored in this format
pub const DATE_FORMAT: &str = "%Y%m%d-%H%M";

pub fn format_date(when: DateTime<Local>) -> String {
    when.format(DATE_FORMAT).to_string()
}

pub trait TapeCatalog: Send {
    /// Lowest undated label for each configured prefix, in drive order
    fn select_available_label_pair(&mut self) -> Result<Vec<TapeLabel>>;

    /// Mark labels as owned by the job `owner_pid`
    fn claim_labels(&mut self, labels: &[TapeLabel], owner_pid: u32) -> Result<()>;

    /// Stamp labels with the completion date, taking them out of selection
    fn record_completion_date(&mut self, labels: &[TapeLabel]) -> Result<()>;

    /// Expected checksum per path. Paths without a record are omitted.
    fn expected_checksums(&self, paths: &[String]) -> Result<HashMap<String, String>>;
}
