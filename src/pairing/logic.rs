//! Pure transition and invariant checks for the pairing state machine.
//!
//! These functions run inside the store transactions, against freshly-read
//! rows, so every precondition is re-validated at write time rather than
//! trusted from an earlier read.

use crate::db::models::{DirectoryEntry, Pairing, PairingStatus};

use super::error::PairingError;

pub(crate) fn ensure_status(
    pairing: &Pairing,
    required: PairingStatus,
) -> Result<(), PairingError> {
    if pairing.status == required {
        Ok(())
    } else {
        Err(PairingError::InvalidState {
            required,
            actual: pairing.status,
        })
    }
}

/// `pending -> accepted`: only the pairing's mentor may accept.
pub(crate) fn ensure_can_accept(
    pairing: &Pairing,
    acting_mentor_uid: &str,
) -> Result<(), PairingError> {
    if pairing.mentor_uid != acting_mentor_uid {
        return Err(PairingError::Forbidden);
    }
    ensure_status(pairing, PairingStatus::Pending)
}

/// `pending -> declined`: only the pairing's mentor may decline.
pub(crate) fn ensure_can_decline(
    pairing: &Pairing,
    acting_mentor_uid: &str,
) -> Result<(), PairingError> {
    if pairing.mentor_uid != acting_mentor_uid {
        return Err(PairingError::Forbidden);
    }
    ensure_status(pairing, PairingStatus::Pending)
}

/// `accepted -> ended`: either side of the pairing may end it.
pub(crate) fn ensure_can_end(pairing: &Pairing, acting_uid: &str) -> Result<(), PairingError> {
    if acting_uid != pairing.mentor_uid && acting_uid != pairing.student_uid {
        return Err(PairingError::Forbidden);
    }
    ensure_status(pairing, PairingStatus::Accepted)
}

/// Authoritative capacity gate, checked inside the accept transaction.
pub(crate) fn ensure_open_slot(entry: &DirectoryEntry) -> Result<(), PairingError> {
    if entry.has_open_slot() {
        Ok(())
    } else {
        Err(PairingError::AtCapacity)
    }
}

/// Derived slot count, floored at zero. Never trusted from a cached value.
pub(crate) fn available_slots(capacity: i32, active_students: i32) -> i32 {
    (capacity - active_students).max(0)
}

/// Decrement on end, floored so stale bookkeeping can never go negative.
pub(crate) fn release_slot(active_students: i32) -> i32 {
    (active_students - 1).max(0)
}
