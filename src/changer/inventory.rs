//! Library inventory model
//!
//! Parses `mtx status` output into an immutable [`InventorySnapshot`]. Only two
//! line shapes carry information:
//!
//! ```text
//! Data Transfer Element 1:Full (Storage Element 1 Loaded):VolumeTag = PAPR1001
//!       Storage Element 10:Full :VolumeTag=PAPR1010
//! ```
//!
//! Every other line (banners, empty elements, import/export slots) is ignored,
//! so firmware noise never turns into a failure.

use crate::error::{PapertapeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

pub type Slot = u32;
pub type DriveIndex = usize;

pub const LABEL_LEN: usize = 8;

static DRIVE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Data Transfer Element (\d+):Full \(Storage Element (\d+) Loaded\):VolumeTag = ([A-Z0-9]{8})",
    )
    .expect("drive line pattern")
});

static STORAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+Storage Element (\d+):Full :VolumeTag=([A-Z0-9]{8})")
        .expect("storage line pattern")
});

/// Barcode burned into a cartridge, 8 uppercase alphanumerics
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TapeLabel(String);

impl TapeLabel {
    pub fn new(label: &str) -> Result<Self> {
        if label.len() == LABEL_LEN
            && label
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            Ok(Self(label.to_string()))
        } else {
            Err(PapertapeError::parse(format!("Invalid tape label: {:?}", label)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TapeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TapeLabel {
    type Err = PapertapeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TapeLabel {
    type Error = PapertapeError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<TapeLabel> for String {
    fn from(label: TapeLabel) -> Self {
        label.0
    }
}

/// Where a mounted tape sits and which slot it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountedTape {
    pub drive: DriveIndex,
    pub origin_slot: Slot,
}

/// One atomic view of the library
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    mounted: BTreeMap<TapeLabel, MountedTape>,
    shelved: BTreeMap<Slot, TapeLabel>,
    drives: BTreeMap<DriveIndex, TapeLabel>,
}

impl InventorySnapshot {
    /// True when the status text carried no recognizable element at all
    pub fn is_empty(&self) -> bool {
        self.mounted.is_empty() && self.shelved.is_empty()
    }

    pub fn mounted(&self) -> &BTreeMap<TapeLabel, MountedTape> {
        &self.mounted
    }

    pub fn shelved(&self) -> &BTreeMap<Slot, TapeLabel> {
        &self.shelved
    }

    pub fn drives(&self) -> &BTreeMap<DriveIndex, TapeLabel> {
        &self.drives
    }

    pub fn label_in_drive(&self, drive: DriveIndex) -> Option<&TapeLabel> {
        self.drives.get(&drive)
    }

    pub fn mount_of(&self, label: &TapeLabel) -> Option<MountedTape> {
        self.mounted.get(label).copied()
    }

    pub fn slot_of(&self, label: &TapeLabel) -> Option<Slot> {
        self.shelved
            .iter()
            .find(|(_, shelved)| *shelved == label)
            .map(|(slot, _)| *slot)
    }

    fn record_mount(&mut self, drive: DriveIndex, origin_slot: Slot, label: TapeLabel) {
        // a later line for the same drive replaces the earlier occupant
        if let Some(previous) = self.drives.insert(drive, label.clone()) {
            self.mounted.remove(&previous);
        }
        if let Some(stale) = self.mounted.insert(label.clone(), MountedTape { drive, origin_slot }) {
            if stale.drive != drive {
                self.drives.remove(&stale.drive);
            }
        }
        self.shelved.retain(|_, shelved| *shelved != label);
    }

    fn record_shelved(&mut self, slot: Slot, label: TapeLabel) {
        if self.mounted.contains_key(&label) {
            return;
        }
        self.shelved.retain(|_, shelved| *shelved != label);
        self.shelved.insert(slot, label);
    }
}

impl fmt::Display for InventorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (drive, label) in &self.drives {
            let origin = self
                .mounted
                .get(label)
                .map(|m| m.origin_slot.to_string())
                .unwrap_or_else(|| "?".to_string());
            writeln!(f, "drive: {}, {} (slot {})", drive, label, origin)?;
        }
        for (slot, label) in &self.shelved {
            writeln!(f, "slot: {}, {}", slot, label)?;
        }
        Ok(())
    }
}

/// Parse library status text. Never fails; unrecognized lines are skipped.
pub fn parse_inventory(status_text: &str) -> InventorySnapshot {
    let mut snapshot = InventorySnapshot::default();

    for line in status_text.lines() {
        if let Some(caps) = DRIVE_LINE.captures(line) {
            let parsed = (
                caps[1].parse::<DriveIndex>(),
                caps[2].parse::<Slot>(),
                TapeLabel::new(&caps[3]),
            );
            if let (Ok(drive), Ok(slot), Ok(label)) = parsed {
                snapshot.record_mount(drive, slot, label);
            }
        } else if let Some(caps) = STORAGE_LINE.captures(line) {
            if let (Ok(slot), Ok(label)) = (caps[1].parse::<Slot>(), TapeLabel::new(&caps[2])) {
                snapshot.record_shelved(slot, label);
            }
        }
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const STATUS: &str = "  Storage Changer /dev/changer:2 Drives, 24 Slots ( 1 Import/Export )
Data Transfer Element 0:Full (Storage Element 1 Loaded):VolumeTag = H0C10001
Data Transfer Element 1:Empty
      Storage Element 1:Empty
      Storage Element 2:Full :VolumeTag=H0C20001
      Storage Element 3:Full :VolumeTag=H0C10002
      Storage Element 4:Empty
      Storage Element 24 IMPORT/EXPORT:Full :VolumeTag=CLN001L1
";

    fn label(s: &str) -> TapeLabel {
        TapeLabel::new(s).unwrap()
    }

    fn assert_disjoint(snapshot: &InventorySnapshot) {
        for (drive, l) in snapshot.drives() {
            assert_eq!(snapshot.mount_of(l).map(|m| m.drive), Some(*drive));
        }
        for l in snapshot.mounted().keys() {
            assert!(snapshot.slot_of(l).is_none(), "{} both mounted and shelved", l);
            assert!(snapshot.drives().values().any(|d| d == l));
        }
        let mut seen = std::collections::HashSet::new();
        for l in snapshot.shelved().values() {
            assert!(seen.insert(l.clone()), "{} shelved twice", l);
        }
    }

    #[test]
    fn test_parse_drives_and_slots() {
        let snapshot = parse_inventory(STATUS);

        assert_eq!(snapshot.label_in_drive(0), Some(&label("H0C10001")));
        assert_eq!(snapshot.label_in_drive(1), None);
        assert_eq!(
            snapshot.mount_of(&label("H0C10001")),
            Some(MountedTape { drive: 0, origin_slot: 1 })
        );
        assert_eq!(snapshot.slot_of(&label("H0C20001")), Some(2));
        assert_eq!(snapshot.slot_of(&label("H0C10002")), Some(3));
        assert_eq!(snapshot.shelved().len(), 2);
        assert_disjoint(&snapshot);
    }

    #[test]
    fn test_garbage_yields_empty_snapshot() {
        for text in ["", "mtx: cannot open /dev/changer", "Data Transfer Element 0:Full (Stor"] {
            let snapshot = parse_inventory(text);
            assert!(snapshot.is_empty());
        }
    }

    #[test]
    fn test_label_reported_in_drive_and_slot_stays_mounted() {
        let text = "      Storage Element 5:Full :VolumeTag=PAPR1001
Data Transfer Element 1:Full (Storage Element 5 Loaded):VolumeTag = PAPR1001
      Storage Element 6:Full :VolumeTag=PAPR1001
";
        let snapshot = parse_inventory(text);
        assert_eq!(snapshot.label_in_drive(1), Some(&label("PAPR1001")));
        assert!(snapshot.shelved().is_empty());
        assert_disjoint(&snapshot);
    }

    #[test]
    fn test_same_label_in_two_drives_keeps_last() {
        let text = "Data Transfer Element 0:Full (Storage Element 5 Loaded):VolumeTag = PAPR1001
Data Transfer Element 1:Full (Storage Element 5 Loaded):VolumeTag = PAPR1001
";
        let snapshot = parse_inventory(text);
        assert_eq!(snapshot.label_in_drive(0), None);
        assert_eq!(snapshot.mount_of(&label("PAPR1001")).map(|m| m.drive), Some(1));
        assert_disjoint(&snapshot);
    }

    #[test]
    fn test_random_status_text_never_breaks_invariants() {
        let mut rng = rand::thread_rng();
        let labels = ["PAPR1001", "PAPR1002", "PAPR1003", "H0C10001"];

        for _ in 0..500 {
            let mut text = String::new();
            for _ in 0..rng.gen_range(0..12) {
                let l = labels[rng.gen_range(0..labels.len())];
                let line = match rng.gen_range(0..4) {
                    0 => format!(
                        "Data Transfer Element {}:Full (Storage Element {} Loaded):VolumeTag = {}",
                        rng.gen_range(0..3),
                        rng.gen_range(1..9),
                        l
                    ),
                    1 => format!("      Storage Element {}:Full :VolumeTag={}", rng.gen_range(1..9), l),
                    2 => "Data Transfer Element 0:Empty".to_string(),
                    _ => {
                        let len = rng.gen_range(0..40);
                        (0..len).map(|_| rng.gen_range(b' '..=b'~') as char).collect()
                    }
                };
                text.push_str(&line);
                text.push('\n');
            }
            assert_disjoint(&parse_inventory(&text));
        }
    }

    #[test]
    fn test_label_validation() {
        assert!(TapeLabel::new("PAPR1001").is_ok());
        assert!(TapeLabel::new("papr1001").is_err());
        assert!(TapeLabel::new("PAPR100").is_err());
        assert!(TapeLabel::new("PAPR-001").is_err());
    }
}
