use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a pairing. `Declined` and `Ended` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    Pending,
    Accepted,
    Declined,
    Ended,
}

impl PairingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingStatus::Pending => "pending",
            PairingStatus::Accepted => "accepted",
            PairingStatus::Declined => "declined",
            PairingStatus::Ended => "ended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PairingStatus::Pending),
            "accepted" => Some(PairingStatus::Accepted),
            "declined" => Some(PairingStatus::Declined),
            "ended" => Some(PairingStatus::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pairing {
    pub id: String,
    pub mentor_uid: String,
    pub student_uid: String,
    pub status: PairingStatus,
    pub mentor_handle: Option<String>,
    pub student_handle: Option<String>,
    pub mentor_kind: Option<String>,
    pub request_message: Option<String>,
    pub decline_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Creation payload for a pairing request. The id and `requested_at` are
/// assigned by the coordinator before the insert.
#[derive(Debug, Clone)]
pub struct NewPairing {
    pub id: String,
    pub mentor_uid: String,
    pub student_uid: String,
    pub mentor_handle: Option<String>,
    pub student_handle: Option<String>,
    pub mentor_kind: Option<String>,
    pub request_message: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Admin provisioning payload. Slot bookkeeping is never written through
/// this path: it is preserved on update and zero-initialized on create.
#[derive(Debug, Clone)]
pub struct DirectoryUpsert {
    pub mentor_uid: String,
    pub display_name: Option<String>,
    pub mentor_kind: Option<String>,
    pub active: bool,
    pub capacity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub mentor_uid: String,
    pub display_name: Option<String>,
    pub mentor_kind: Option<String>,
    pub active: bool,
    pub capacity: i32,
    pub active_students: i32,
    pub available_slots: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DirectoryEntry {
    #[inline]
    pub fn has_open_slot(&self) -> bool {
        self.active_students < self.capacity
    }
}
