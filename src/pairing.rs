use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{DatabaseManager, NewPairing, Pairing};
use crate::identity::CallerIdentity;

pub mod error;
pub(crate) mod logic;

pub use self::error::PairingError;

/// The sole writer of pairing and directory state. Precondition checks run
/// inside the store transactions (see `logic`), so every transition is
/// validated against freshly-read rows even under concurrent callers.
#[derive(Clone)]
pub struct PairingCore {
    db_manager: Arc<DatabaseManager>,
}

impl PairingCore {
    pub fn new(db_manager: Arc<DatabaseManager>) -> Self {
        Self { db_manager }
    }

    /// A student asks a mentor for a pairing. Slots are not reserved here:
    /// the soft capacity check keeps obviously-full mentors out of the
    /// request flow, and the authoritative gate runs at accept time.
    pub async fn request(
        &self,
        mentor_uid: &str,
        student: &CallerIdentity,
        message: Option<String>,
    ) -> Result<Pairing, PairingError> {
        if mentor_uid == student.uid {
            return Err(PairingError::SelfPairing);
        }

        let entry = self
            .db_manager
            .directory_store()
            .get_entry(mentor_uid)
            .await?
            .filter(|e| e.active)
            .ok_or(PairingError::MentorNotFound)?;

        if !entry.has_open_slot() {
            return Err(PairingError::NoCapacity);
        }

        let new_pairing = NewPairing {
            id: Uuid::new_v4().to_string(),
            mentor_uid: mentor_uid.to_string(),
            student_uid: student.uid.clone(),
            mentor_handle: entry.display_name.clone(),
            student_handle: student.handle.clone(),
            mentor_kind: entry.mentor_kind.clone(),
            request_message: message,
            requested_at: Utc::now(),
        };

        let pairing = self
            .db_manager
            .pairing_store()
            .create_pairing(&new_pairing)
            .await?;
        info!(
            pairing_id = %pairing.id,
            mentor_uid = %pairing.mentor_uid,
            "pairing requested"
        );
        Ok(pairing)
    }

    pub async fn accept(
        &self,
        pairing_id: &str,
        acting_mentor_uid: &str,
    ) -> Result<Pairing, PairingError> {
        let pairing = self
            .db_manager
            .pairing_store()
            .accept_pairing(pairing_id, acting_mentor_uid, Utc::now())
            .await?;
        info!(pairing_id = %pairing.id, mentor_uid = %pairing.mentor_uid, "pairing accepted");
        Ok(pairing)
    }

    pub async fn decline(
        &self,
        pairing_id: &str,
        acting_mentor_uid: &str,
        reason: Option<String>,
    ) -> Result<Pairing, PairingError> {
        let pairing = self
            .db_manager
            .pairing_store()
            .decline_pairing(pairing_id, acting_mentor_uid, reason, Utc::now())
            .await?;
        debug!(pairing_id = %pairing.id, "pairing declined");
        Ok(pairing)
    }

    pub async fn end(&self, pairing_id: &str, acting_uid: &str) -> Result<Pairing, PairingError> {
        let pairing = self
            .db_manager
            .pairing_store()
            .end_pairing(pairing_id, acting_uid, Utc::now())
            .await?;
        info!(pairing_id = %pairing.id, ended_by = %acting_uid, "pairing ended");
        Ok(pairing)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use super::{PairingCore, PairingError};
    use crate::config::DatabaseConfig;
    use crate::db::models::{DirectoryUpsert, PairingStatus};
    use crate::db::DatabaseManager;
    use crate::identity::CallerIdentity;

    struct Harness {
        core: PairingCore,
        db_manager: Arc<DatabaseManager>,
        // Held so the backing file outlives the harness
        _file: NamedTempFile,
    }

    async fn harness() -> Harness {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_path = file.path().to_string_lossy().to_string();

        let config = DatabaseConfig {
            url: None,
            conn_string: None,
            filename: Some(db_path),
            max_connections: Some(1),
            min_connections: Some(1),
        };

        let db_manager = Arc::new(DatabaseManager::new(&config).await.expect("db manager"));
        db_manager.migrate().await.expect("migrate");

        Harness {
            core: PairingCore::new(db_manager.clone()),
            db_manager,
            _file: file,
        }
    }

    fn student(uid: &str) -> CallerIdentity {
        CallerIdentity {
            uid: uid.to_string(),
            handle: Some(format!("@{uid}")),
        }
    }

    async fn seed_mentor(h: &Harness, uid: &str, capacity: i32) {
        h.db_manager
            .directory_store()
            .upsert_entry(&DirectoryUpsert {
                mentor_uid: uid.to_string(),
                display_name: Some(format!("{uid} display")),
                mentor_kind: Some("sage".to_string()),
                active: true,
                capacity,
            })
            .await
            .expect("seed mentor");
    }

    async fn active_students(h: &Harness, uid: &str) -> i32 {
        h.db_manager
            .directory_store()
            .get_entry(uid)
            .await
            .expect("query entry")
            .expect("entry exists")
            .active_students
    }

    #[tokio::test]
    async fn request_creates_a_pending_pairing_with_display_fields() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 2).await;

        let pairing = h
            .core
            .request("mentor-1", &student("student-1"), Some("hello".to_string()))
            .await
            .expect("request");

        assert_eq!(pairing.status, PairingStatus::Pending);
        assert_eq!(pairing.mentor_handle.as_deref(), Some("mentor-1 display"));
        assert_eq!(pairing.student_handle.as_deref(), Some("@student-1"));
        assert_eq!(pairing.mentor_kind.as_deref(), Some("sage"));
        assert_eq!(pairing.request_message.as_deref(), Some("hello"));
        assert!(pairing.responded_at.is_none());
        assert!(pairing.ended_at.is_none());

        // Requests never reserve a slot
        assert_eq!(active_students(&h, "mentor-1").await, 0);
    }

    #[tokio::test]
    async fn request_rejects_self_pairing_and_unknown_or_inactive_mentors() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 1).await;

        let err = h
            .core
            .request("student-1", &student("student-1"), None)
            .await
            .expect_err("self request");
        assert!(matches!(err, PairingError::SelfPairing));

        let err = h
            .core
            .request("nobody", &student("student-1"), None)
            .await
            .expect_err("unknown mentor");
        assert!(matches!(err, PairingError::MentorNotFound));

        h.db_manager
            .directory_store()
            .upsert_entry(&DirectoryUpsert {
                mentor_uid: "mentor-1".to_string(),
                display_name: None,
                mentor_kind: None,
                active: false,
                capacity: 1,
            })
            .await
            .expect("deactivate mentor");

        let err = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect_err("inactive mentor");
        assert!(matches!(err, PairingError::MentorNotFound));
    }

    // Scenario: capacity=1, two students request, mentor accepts one,
    // the second accept fails with AtCapacity.
    #[tokio::test]
    async fn last_slot_goes_to_exactly_one_pairing() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 1).await;

        let p1 = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect("first request");
        let p2 = h
            .core
            .request("mentor-1", &student("student-2"), None)
            .await
            .expect("second request also pends");

        let accepted = h.core.accept(&p1.id, "mentor-1").await.expect("accept p1");
        assert_eq!(accepted.status, PairingStatus::Accepted);
        assert!(accepted.responded_at.is_some());
        assert_eq!(active_students(&h, "mentor-1").await, 1);

        let err = h
            .core
            .accept(&p2.id, "mentor-1")
            .await
            .expect_err("second accept must fail");
        assert!(matches!(err, PairingError::AtCapacity));
        assert_eq!(active_students(&h, "mentor-1").await, 1);
    }

    // Scenario: ending an accepted pairing frees a slot that a new request
    // can then claim.
    #[tokio::test]
    async fn ending_a_pairing_frees_a_slot_for_a_new_request() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 3).await;

        let mut accepted = Vec::new();
        for i in 1..=3 {
            let p = h
                .core
                .request("mentor-1", &student(&format!("student-{i}")), None)
                .await
                .expect("request");
            accepted.push(h.core.accept(&p.id, "mentor-1").await.expect("accept"));
        }
        assert_eq!(active_students(&h, "mentor-1").await, 3);

        let err = h
            .core
            .request("mentor-1", &student("student-4"), None)
            .await
            .expect_err("full mentor rejects new requests");
        assert!(matches!(err, PairingError::NoCapacity));

        let ended = h
            .core
            .end(&accepted[0].id, "student-1")
            .await
            .expect("student ends pairing");
        assert_eq!(ended.status, PairingStatus::Ended);
        assert!(ended.ended_at.is_some());
        assert_eq!(active_students(&h, "mentor-1").await, 2);

        let p4 = h
            .core
            .request("mentor-1", &student("student-4"), None)
            .await
            .expect("slot freed, request succeeds");
        let p4 = h.core.accept(&p4.id, "mentor-1").await.expect("accept p4");
        assert_eq!(p4.status, PairingStatus::Accepted);
        assert_eq!(active_students(&h, "mentor-1").await, 3);
    }

    // Scenario: decline stores the reason and never touches the directory.
    #[tokio::test]
    async fn decline_records_reason_and_leaves_directory_untouched() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 2).await;

        let p = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect("request");

        let declined = h
            .core
            .decline(&p.id, "mentor-1", Some("not a fit".to_string()))
            .await
            .expect("decline");

        assert_eq!(declined.status, PairingStatus::Declined);
        assert_eq!(declined.decline_reason.as_deref(), Some("not a fit"));
        assert!(declined.responded_at.is_some());
        assert_eq!(active_students(&h, "mentor-1").await, 0);

        let persisted = h
            .db_manager
            .pairing_store()
            .get_pairing(&p.id)
            .await
            .expect("query pairing")
            .expect("pairing exists");
        assert_eq!(persisted.status, PairingStatus::Declined);
        assert_eq!(persisted.decline_reason.as_deref(), Some("not a fit"));
    }

    #[tokio::test]
    async fn duplicate_requests_are_rejected_until_the_pairing_settles() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 1).await;

        let p = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect("first request");

        let err = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect_err("duplicate while pending");
        assert!(matches!(err, PairingError::DuplicatePairing));

        h.core.accept(&p.id, "mentor-1").await.expect("accept");
        let err = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect_err("duplicate while accepted");
        assert!(matches!(err, PairingError::DuplicatePairing));

        h.core.end(&p.id, "mentor-1").await.expect("end");
        let again = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect("new lineage after the old one ended");
        assert_eq!(again.status, PairingStatus::Pending);
        assert_ne!(again.id, p.id, "history preserved, not overwritten");
    }

    #[tokio::test]
    async fn only_the_mentor_may_respond_and_only_participants_may_end() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 1).await;

        let p = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect("request");

        let err = h
            .core
            .accept(&p.id, "student-1")
            .await
            .expect_err("student cannot accept");
        assert!(matches!(err, PairingError::Forbidden));

        let err = h
            .core
            .decline(&p.id, "mentor-2", None)
            .await
            .expect_err("other mentor cannot decline");
        assert!(matches!(err, PairingError::Forbidden));

        h.core.accept(&p.id, "mentor-1").await.expect("accept");

        let err = h
            .core
            .end(&p.id, "bystander")
            .await
            .expect_err("third party cannot end");
        assert!(matches!(err, PairingError::Forbidden));
    }

    // Exactly one of accept/decline wins from pending; the loser sees
    // InvalidState because the status is re-checked at write time.
    #[tokio::test]
    async fn accept_and_decline_cannot_both_succeed() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 1).await;

        let p = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect("request");

        let accept = tokio::spawn({
            let core = h.core.clone();
            let id = p.id.clone();
            async move { core.accept(&id, "mentor-1").await }
        });
        let decline = tokio::spawn({
            let core = h.core.clone();
            let id = p.id.clone();
            async move { core.decline(&id, "mentor-1", None).await }
        });

        let accept = accept.await.expect("accept task");
        let decline = decline.await.expect("decline task");

        let winners = [accept.is_ok(), decline.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count();
        assert_eq!(winners, 1, "exactly one transition out of pending");

        let loser = if accept.is_ok() { decline } else { accept };
        assert!(matches!(
            loser,
            Err(PairingError::InvalidState { .. }) | Err(PairingError::Transient)
        ));

        // The slot count reflects at most the single accept
        let count = active_students(&h, "mentor-1").await;
        assert!(count <= 1);
    }

    #[tokio::test]
    async fn end_succeeds_once_and_decrements_exactly_once() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 1).await;

        let p = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect("request");
        h.core.accept(&p.id, "mentor-1").await.expect("accept");
        assert_eq!(active_students(&h, "mentor-1").await, 1);

        h.core.end(&p.id, "mentor-1").await.expect("first end");
        assert_eq!(active_students(&h, "mentor-1").await, 0);

        let err = h
            .core
            .end(&p.id, "mentor-1")
            .await
            .expect_err("second end must fail");
        assert!(matches!(err, PairingError::InvalidState { .. }));
        assert_eq!(
            active_students(&h, "mentor-1").await,
            0,
            "decremented exactly once, floored at zero"
        );
    }

    // Capacity invariant under interleaving: N pending requests racing to
    // accept against capacity 2 produce exactly 2 accepted pairings.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accepts_never_exceed_capacity() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 2).await;

        let mut pending = Vec::new();
        for i in 1..=6 {
            let p = h
                .core
                .request("mentor-1", &student(&format!("student-{i}")), None)
                .await
                .expect("request");
            pending.push(p.id);
        }

        let mut handles = Vec::new();
        for id in pending {
            let core = h.core.clone();
            handles.push(tokio::spawn(async move {
                core.accept(&id, "mentor-1").await
            }));
        }

        let mut accepted = 0;
        let mut at_capacity = 0;
        for handle in handles {
            match handle.await.expect("accept task") {
                Ok(p) => {
                    assert_eq!(p.status, PairingStatus::Accepted);
                    accepted += 1;
                }
                Err(PairingError::AtCapacity) => at_capacity += 1,
                Err(other) => panic!("unexpected accept failure: {other}"),
            }
        }

        assert_eq!(accepted, 2, "no interleaving may oversubscribe the mentor");
        assert_eq!(at_capacity, 4);
        assert_eq!(active_students(&h, "mentor-1").await, 2);
    }

    #[tokio::test]
    async fn end_completes_even_without_a_directory_entry() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 1).await;

        let p = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect("request");
        h.core.accept(&p.id, "mentor-1").await.expect("accept");

        // Simulate the mentor leaving the directory out-of-band
        {
            use diesel::prelude::*;
            let path = h._file.path().to_string_lossy().to_string();
            let mut conn = diesel::sqlite::SqliteConnection::establish(&path)
                .expect("raw sqlite connection");
            diesel::sql_query("DELETE FROM mentor_directory WHERE mentor_uid = 'mentor-1'")
                .execute(&mut conn)
                .expect("drop directory entry");
        }

        let ended = h
            .core
            .end(&p.id, "student-1")
            .await
            .expect("end must not be blocked by missing bookkeeping");
        assert_eq!(ended.status, PairingStatus::Ended);
    }

    #[tokio::test]
    async fn accept_requires_a_directory_entry() {
        let h = harness().await;
        seed_mentor(&h, "mentor-1", 1).await;

        let p = h
            .core
            .request("mentor-1", &student("student-1"), None)
            .await
            .expect("request");

        {
            use diesel::prelude::*;
            let path = h._file.path().to_string_lossy().to_string();
            let mut conn = diesel::sqlite::SqliteConnection::establish(&path)
                .expect("raw sqlite connection");
            diesel::sql_query("DELETE FROM mentor_directory WHERE mentor_uid = 'mentor-1'")
                .execute(&mut conn)
                .expect("drop directory entry");
        }

        let err = h
            .core
            .accept(&p.id, "mentor-1")
            .await
            .expect_err("accept without directory entry");
        assert!(matches!(err, PairingError::DirectoryNotFound));
    }

    #[tokio::test]
    async fn accepting_an_unknown_pairing_is_not_found() {
        let h = harness().await;
        let err = h
            .core
            .accept("no-such-pairing", "mentor-1")
            .await
            .expect_err("unknown pairing");
        assert!(matches!(err, PairingError::NotFound));
    }
}
