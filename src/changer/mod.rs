//! Changer controller
//!
//! Single point of truth for where every cartridge is. All mount decisions are
//! taken against a freshly queried [`InventorySnapshot`]; the snapshot is
//! replaced as a whole after every robot movement and never edited in place.

pub mod inventory;
pub mod lock;
pub mod mount;
pub mod mtx;

use crate::drives::{read_catalog_block, TapeDrives};
use crate::error::{PapertapeError, Result};
use inventory::{parse_inventory, DriveIndex, InventorySnapshot, Slot, TapeLabel};
use lock::ChangerLock;
use mount::{DriveObservation, MountEffect, MountState};
use mtx::MediaChanger;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use inventory::MountedTape;

/// Upper bound for `count_files`, far above any real cartridge
const MAX_TAPE_FILES: u32 = 100_000;

pub struct Changer<M: MediaChanger, D: TapeDrives> {
    media: M,
    drives: Arc<D>,
    snapshot: InventorySnapshot,
    mount_attempts: u32,
    _lock: ChangerLock,
}

impl<M: MediaChanger, D: TapeDrives> Changer<M, D> {
    /// Take control of the library. The lock is held until the changer is dropped.
    pub async fn new(media: M, drives: Arc<D>, lock: ChangerLock, mount_attempts: u32) -> Result<Self> {
        let mut changer = Self {
            media,
            drives,
            snapshot: InventorySnapshot::default(),
            mount_attempts: mount_attempts.max(1),
            _lock: lock,
        };
        changer.refresh_inventory().await?;
        Ok(changer)
    }

    pub fn drives(&self) -> &Arc<D> {
        &self.drives
    }

    /// Last snapshot taken. Callers that act on it should refresh first.
    pub fn inventory(&self) -> &InventorySnapshot {
        &self.snapshot
    }

    pub async fn refresh_inventory(&mut self) -> Result<&InventorySnapshot> {
        let status = self.media.status().await?;
        let snapshot = parse_inventory(&status);
        if snapshot.is_empty() {
            warn!("Library status carried no elements, treating library as not ready");
        }
        debug!(
            "Inventory: {} mounted, {} shelved",
            snapshot.mounted().len(),
            snapshot.shelved().len()
        );
        self.snapshot = snapshot;
        Ok(&self.snapshot)
    }

    pub fn locate_slot(&self, label: &TapeLabel) -> Result<Slot> {
        self.snapshot.slot_of(label).ok_or_else(|| PapertapeError::NotFound {
            label: label.to_string(),
            location: "in storage".to_string(),
        })
    }

    /// Mount `labels[0]` in drive 0 and `labels[1]` in drive 1.
    ///
    /// Stops at the first failure and leaves whatever is already mounted in place.
    pub async fn mount_pair(&mut self, labels: &[TapeLabel]) -> Result<()> {
        if labels.len() != 2 {
            return Err(PapertapeError::parameter_validation(format!(
                "a tape pair needs exactly 2 labels, got {}",
                labels.len()
            )));
        }

        for (drive, label) in labels.iter().enumerate() {
            info!("Loading {} into drive {}", label, drive);
            if let Err(e) = self.mount_one(label, drive).await {
                warn!("Load failure for {} in drive {}: {}", label, drive, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Put `label` in `drive`, evicting any other cartridge found there.
    pub async fn mount_one(&mut self, label: &TapeLabel, drive: DriveIndex) -> Result<()> {
        let mut state = MountState::Attempting { attempt: 1 };

        loop {
            let attempt = match state {
                MountState::Attempting { attempt } => attempt,
                MountState::Mounted => return Ok(()),
                MountState::Exhausted => {
                    return Err(PapertapeError::MountExhausted {
                        label: label.to_string(),
                        drive,
                        attempts: self.mount_attempts,
                    })
                }
            };

            self.refresh_inventory().await?;
            let observation = match self.snapshot.label_in_drive(drive) {
                None => DriveObservation::Empty,
                Some(current) if current == label => DriveObservation::HoldsTarget,
                Some(current) => DriveObservation::HoldsOther(current.clone()),
            };
            debug!(
                "Mount {} -> drive {} attempt {}: {:?}",
                label, drive, attempt, observation
            );

            let (next, effect) = mount::transition(state, observation, self.mount_attempts);
            match effect {
                Some(MountEffect::Load) => self.load(label, drive).await?,
                Some(MountEffect::Rewind) => {
                    info!("{} already in drive {}, rewinding", label, drive);
                    self.rewind(label).await?;
                }
                Some(MountEffect::Unload(occupant)) => {
                    info!("Drive {} holds {}, unloading", drive, occupant);
                    self.unmount_one(drive).await?;
                }
                None => {}
            }
            state = next;
        }
    }

    async fn load(&mut self, label: &TapeLabel, drive: DriveIndex) -> Result<()> {
        // a stale mount may have left the target in another drive
        if let Some(elsewhere) = self.snapshot.mount_of(label).map(|m| m.drive) {
            if elsewhere != drive {
                info!("{} sits in drive {}, returning it before loading drive {}", label, elsewhere, drive);
                self.unmount_one(elsewhere).await?;
            }
        }
        let slot = self.locate_slot(label)?;
        info!("Loading {} from slot {} into drive {}", label, slot, drive);
        self.media.load(slot, drive).await?;
        self.refresh_inventory().await?;
        Ok(())
    }

    pub async fn unmount_one(&mut self, drive: DriveIndex) -> Result<()> {
        self.refresh_inventory().await?;
        let Some(label) = self.snapshot.label_in_drive(drive).cloned() else {
            debug!("Drive {} already empty", drive);
            return Ok(());
        };
        let origin = self
            .snapshot
            .mount_of(&label)
            .map(|m| m.origin_slot)
            .ok_or_else(|| PapertapeError::NotLoaded {
                label: label.to_string(),
            })?;

        info!("Unloading {} from drive {} to slot {}", label, drive, origin);
        self.media.unload(origin, drive).await?;
        self.refresh_inventory().await?;
        Ok(())
    }

    /// Unload every mounted cartridge, whatever pair was requested
    pub async fn unmount_pair(&mut self) -> Result<()> {
        self.refresh_inventory().await?;
        let drives: Vec<DriveIndex> = self.snapshot.drives().keys().copied().collect();
        for drive in drives {
            self.unmount_one(drive).await?;
        }
        Ok(())
    }

    /// Rewind the drive holding `label`, per the current snapshot
    pub async fn rewind(&mut self, label: &TapeLabel) -> Result<()> {
        let mounted = self
            .snapshot
            .mount_of(label)
            .ok_or_else(|| PapertapeError::NotLoaded {
                label: label.to_string(),
            })?;
        debug!("Rewinding {} in drive {}", label, mounted.drive);
        self.drives.rewind(mounted.drive).await
    }

    /// Drive currently holding `label`
    pub fn drive_of(&self, label: &TapeLabel) -> Result<DriveIndex> {
        self.snapshot
            .mount_of(label)
            .map(|m| m.drive)
            .ok_or_else(|| PapertapeError::NotLoaded {
                label: label.to_string(),
            })
    }

    /// Rewind and return the catalog stored as the first tape file
    pub async fn read_tape_catalog(&mut self, label: &TapeLabel) -> Result<Vec<String>> {
        self.refresh_inventory().await?;
        self.rewind(label).await?;
        let drive = self.drive_of(label)?;
        read_catalog_block(self.drives.as_ref(), drive)
    }

    /// Rewind and count file marks until the drive refuses to space further
    pub async fn count_files(&mut self, label: &TapeLabel) -> Result<u32> {
        self.refresh_inventory().await?;
        self.rewind(label).await?;
        let drive = self.drive_of(label)?;

        let mut count = 0;
        while count < MAX_TAPE_FILES {
            if self.drives.forward_space(drive, 1).await.is_err() {
                break;
            }
            count += 1;
        }
        self.drives.rewind(drive).await?;
        Ok(count)
    }
}
