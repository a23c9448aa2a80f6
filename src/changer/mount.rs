//! Drive load/unload state machine
//!
//! There is no transactional mount primitive: a previous process may have left
//! any tape in any drive. Mounting is therefore a loop of observe-then-correct
//! steps, expressed here as a pure transition function so the retry bound can
//! be tested without hardware.

use crate::changer::inventory::TapeLabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// About to refresh the inventory for this attempt (1-based)
    Attempting { attempt: u32 },
    Mounted,
    Exhausted,
}

/// What a fresh inventory says about the target drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveObservation {
    Empty,
    HoldsTarget,
    HoldsOther(TapeLabel),
}

/// Hardware action to perform before entering the next state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountEffect {
    Load,
    Rewind,
    Unload(TapeLabel),
}

/// `(state, observation) -> (state, effect)`
///
/// Only `Attempting` consumes observations; terminal states are returned
/// unchanged with no effect.
pub fn transition(
    state: MountState,
    observation: DriveObservation,
    max_attempts: u32,
) -> (MountState, Option<MountEffect>) {
    match state {
        MountState::Attempting { attempt } => match observation {
            DriveObservation::Empty => (MountState::Mounted, Some(MountEffect::Load)),
            DriveObservation::HoldsTarget => (MountState::Mounted, Some(MountEffect::Rewind)),
            DriveObservation::HoldsOther(occupant) => {
                let next = if attempt >= max_attempts {
                    MountState::Exhausted
                } else {
                    MountState::Attempting {
                        attempt: attempt + 1,
                    }
                };
                (next, Some(MountEffect::Unload(occupant)))
            }
        },
        terminal => (terminal, None),
    }
}
