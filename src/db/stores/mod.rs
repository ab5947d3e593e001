use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DatabaseError;
use super::models::{DirectoryEntry, DirectoryUpsert, NewPairing, Pairing};
use crate::pairing::PairingError;

/// Writes to pairings run through this trait only. The transition methods
/// execute their precondition checks and writes inside one store
/// transaction; `accept_pairing` and `end_pairing` also cover the mentor's
/// directory row in the same transaction.
#[async_trait]
pub trait PairingStore: Send + Sync {
    async fn get_pairing(&self, id: &str) -> Result<Option<Pairing>, DatabaseError>;
    async fn create_pairing(&self, new_pairing: &NewPairing) -> Result<Pairing, PairingError>;
    async fn accept_pairing(
        &self,
        id: &str,
        acting_mentor_uid: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, PairingError>;
    async fn decline_pairing(
        &self,
        id: &str,
        acting_mentor_uid: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Pairing, PairingError>;
    async fn end_pairing(
        &self,
        id: &str,
        acting_uid: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, PairingError>;
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn get_entry(&self, mentor_uid: &str) -> Result<Option<DirectoryEntry>, DatabaseError>;
    async fn upsert_entry(&self, upsert: &DirectoryUpsert) -> Result<DirectoryEntry, DatabaseError>;
    async fn list_entries(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DirectoryEntry>, DatabaseError>;
}
