use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use crate::db::schema_sqlite::{mentor_directory, pairings};
use crate::pairing::{PairingError, logic};

use super::{
    DatabaseError,
    models::{DirectoryEntry, DirectoryUpsert, NewPairing, Pairing, PairingStatus},
};

// Helper function to convert DateTime to ISO string for SQLite
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// Helper function to parse ISO string to DateTime
fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

fn optional_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(string_to_datetime).transpose()
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = pairings)]
struct DbPairing {
    id: String,
    mentor_uid: String,
    student_uid: String,
    status: String,
    mentor_handle: Option<String>,
    student_handle: Option<String>,
    mentor_kind: Option<String>,
    request_message: Option<String>,
    decline_reason: Option<String>,
    requested_at: String,
    responded_at: Option<String>,
    ended_at: Option<String>,
}

impl DbPairing {
    fn to_pairing(&self) -> Result<Pairing, DatabaseError> {
        let status = PairingStatus::parse(&self.status)
            .ok_or_else(|| DatabaseError::Query(format!("unknown pairing status: {}", self.status)))?;
        Ok(Pairing {
            id: self.id.clone(),
            mentor_uid: self.mentor_uid.clone(),
            student_uid: self.student_uid.clone(),
            status,
            mentor_handle: self.mentor_handle.clone(),
            student_handle: self.student_handle.clone(),
            mentor_kind: self.mentor_kind.clone(),
            request_message: self.request_message.clone(),
            decline_reason: self.decline_reason.clone(),
            requested_at: string_to_datetime(&self.requested_at)?,
            responded_at: optional_datetime(self.responded_at.as_deref())?,
            ended_at: optional_datetime(self.ended_at.as_deref())?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = pairings)]
struct NewPairingRow<'a> {
    id: &'a str,
    mentor_uid: &'a str,
    student_uid: &'a str,
    status: &'a str,
    mentor_handle: Option<&'a str>,
    student_handle: Option<&'a str>,
    mentor_kind: Option<&'a str>,
    request_message: Option<&'a str>,
    requested_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = mentor_directory)]
struct DbDirectoryEntry {
    mentor_uid: String,
    display_name: Option<String>,
    mentor_kind: Option<String>,
    active: bool,
    capacity: i32,
    active_students: i32,
    available_slots: i32,
    created_at: String,
    updated_at: String,
}

impl DbDirectoryEntry {
    fn to_directory_entry(&self) -> Result<DirectoryEntry, DatabaseError> {
        Ok(DirectoryEntry {
            mentor_uid: self.mentor_uid.clone(),
            display_name: self.display_name.clone(),
            mentor_kind: self.mentor_kind.clone(),
            active: self.active,
            capacity: self.capacity,
            active_students: self.active_students,
            available_slots: self.available_slots,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = mentor_directory)]
struct NewDirectoryRow<'a> {
    mentor_uid: &'a str,
    display_name: Option<&'a str>,
    mentor_kind: Option<&'a str>,
    active: bool,
    capacity: i32,
    active_students: i32,
    available_slots: i32,
    created_at: String,
    updated_at: String,
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    let mut conn =
        SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))?;
    // Writers queue on the lock instead of failing immediately
    diesel::sql_query("PRAGMA busy_timeout = 5000")
        .execute(&mut conn)
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;
    Ok(conn)
}

fn task_err(e: tokio::task::JoinError) -> DatabaseError {
    DatabaseError::Query(format!("database task failed: {e}"))
}

fn load_pairing(conn: &mut SqliteConnection, pairing_id: &str) -> Result<Option<DbPairing>, DatabaseError> {
    use crate::db::schema_sqlite::pairings::dsl::*;
    pairings
        .filter(id.eq(pairing_id))
        .select(DbPairing::as_select())
        .first::<DbPairing>(conn)
        .optional()
        .map_err(DatabaseError::from)
}

fn load_directory_entry(
    conn: &mut SqliteConnection,
    uid: &str,
) -> Result<Option<DbDirectoryEntry>, DatabaseError> {
    use crate::db::schema_sqlite::mentor_directory::dsl::*;
    mentor_directory
        .filter(mentor_uid.eq(uid))
        .select(DbDirectoryEntry::as_select())
        .first::<DbDirectoryEntry>(conn)
        .optional()
        .map_err(DatabaseError::from)
}

fn reload_pairing(conn: &mut SqliteConnection, pairing_id: &str) -> Result<Pairing, PairingError> {
    load_pairing(conn, pairing_id)?
        .ok_or_else(|| {
            PairingError::Store(DatabaseError::Query(
                "pairing vanished mid-transaction".to_string(),
            ))
        })?
        .to_pairing()
        .map_err(PairingError::from)
}

pub struct SqlitePairingStore {
    db_path: Arc<String>,
}

impl SqlitePairingStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::PairingStore for SqlitePairingStore {
    async fn get_pairing(&self, pairing_id: &str) -> Result<Option<Pairing>, DatabaseError> {
        let pairing_id = pairing_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            load_pairing(&mut conn, &pairing_id)?
                .map(|p| p.to_pairing())
                .transpose()
        })
        .await
        .map_err(task_err)?
    }

    async fn create_pairing(&self, new_pairing: &NewPairing) -> Result<Pairing, PairingError> {
        let new_pairing = new_pairing.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction(|conn| {
                use crate::db::schema_sqlite::pairings::dsl::*;

                // The duplicate check and the insert must see the same
                // state; the partial unique index backstops racing inserts.
                let live: i64 = pairings
                    .filter(mentor_uid.eq(&new_pairing.mentor_uid))
                    .filter(student_uid.eq(&new_pairing.student_uid))
                    .filter(status.eq_any([
                        PairingStatus::Pending.as_str(),
                        PairingStatus::Accepted.as_str(),
                    ]))
                    .count()
                    .get_result(conn)?;
                if live > 0 {
                    return Err(PairingError::DuplicatePairing);
                }

                let row = NewPairingRow {
                    id: &new_pairing.id,
                    mentor_uid: &new_pairing.mentor_uid,
                    student_uid: &new_pairing.student_uid,
                    status: PairingStatus::Pending.as_str(),
                    mentor_handle: new_pairing.mentor_handle.as_deref(),
                    student_handle: new_pairing.student_handle.as_deref(),
                    mentor_kind: new_pairing.mentor_kind.as_deref(),
                    request_message: new_pairing.request_message.as_deref(),
                    requested_at: datetime_to_string(&new_pairing.requested_at),
                };
                diesel::insert_into(pairings).values(&row).execute(conn)?;

                reload_pairing(conn, &new_pairing.id)
            })
        })
        .await
        .map_err(task_err)?
    }

    async fn accept_pairing(
        &self,
        pairing_id: &str,
        acting_mentor_uid: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, PairingError> {
        let pairing_id = pairing_id.to_string();
        let acting_mentor_uid = acting_mentor_uid.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction(|conn| {
                let pairing = load_pairing(conn, &pairing_id)?
                    .ok_or(PairingError::NotFound)?
                    .to_pairing()?;
                logic::ensure_can_accept(&pairing, &acting_mentor_uid)?;

                let entry = load_directory_entry(conn, &pairing.mentor_uid)?
                    .ok_or(PairingError::DirectoryNotFound)?
                    .to_directory_entry()?;
                logic::ensure_open_slot(&entry)?;

                {
                    use crate::db::schema_sqlite::pairings::dsl::*;
                    diesel::update(pairings.filter(id.eq(&pairing.id)))
                        .set((
                            status.eq(PairingStatus::Accepted.as_str()),
                            responded_at.eq(Some(datetime_to_string(&now))),
                        ))
                        .execute(conn)?;
                }

                let taken = entry.active_students + 1;
                {
                    use crate::db::schema_sqlite::mentor_directory::dsl::*;
                    diesel::update(mentor_directory.filter(mentor_uid.eq(&entry.mentor_uid)))
                        .set((
                            active_students.eq(taken),
                            available_slots.eq(logic::available_slots(entry.capacity, taken)),
                            updated_at.eq(datetime_to_string(&now)),
                        ))
                        .execute(conn)?;
                }

                reload_pairing(conn, &pairing.id)
            })
        })
        .await
        .map_err(task_err)?
    }

    async fn decline_pairing(
        &self,
        pairing_id: &str,
        acting_mentor_uid: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Pairing, PairingError> {
        let pairing_id = pairing_id.to_string();
        let acting_mentor_uid = acting_mentor_uid.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            // Single-row write, but the status precondition must hold at
            // write time to lose cleanly against a concurrent accept.
            conn.immediate_transaction(|conn| {
                let pairing = load_pairing(conn, &pairing_id)?
                    .ok_or(PairingError::NotFound)?
                    .to_pairing()?;
                logic::ensure_can_decline(&pairing, &acting_mentor_uid)?;

                use crate::db::schema_sqlite::pairings::dsl::*;
                diesel::update(pairings.filter(id.eq(&pairing.id)))
                    .set((
                        status.eq(PairingStatus::Declined.as_str()),
                        responded_at.eq(Some(datetime_to_string(&now))),
                        decline_reason.eq(reason.as_deref()),
                    ))
                    .execute(conn)?;

                reload_pairing(conn, &pairing.id)
            })
        })
        .await
        .map_err(task_err)?
    }

    async fn end_pairing(
        &self,
        pairing_id: &str,
        acting_uid: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, PairingError> {
        let pairing_id = pairing_id.to_string();
        let acting_uid = acting_uid.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction(|conn| {
                let pairing = load_pairing(conn, &pairing_id)?
                    .ok_or(PairingError::NotFound)?
                    .to_pairing()?;
                logic::ensure_can_end(&pairing, &acting_uid)?;

                {
                    use crate::db::schema_sqlite::pairings::dsl::*;
                    diesel::update(pairings.filter(id.eq(&pairing.id)))
                        .set((
                            status.eq(PairingStatus::Ended.as_str()),
                            ended_at.eq(Some(datetime_to_string(&now))),
                        ))
                        .execute(conn)?;
                }

                // A mentor who left the directory must not block the end
                // transition; the slot adjustment is simply skipped.
                if let Some(entry) = load_directory_entry(conn, &pairing.mentor_uid)? {
                    let entry = entry.to_directory_entry()?;
                    let remaining = logic::release_slot(entry.active_students);
                    use crate::db::schema_sqlite::mentor_directory::dsl::*;
                    diesel::update(mentor_directory.filter(mentor_uid.eq(&entry.mentor_uid)))
                        .set((
                            active_students.eq(remaining),
                            available_slots.eq(logic::available_slots(entry.capacity, remaining)),
                            updated_at.eq(datetime_to_string(&now)),
                        ))
                        .execute(conn)?;
                }

                reload_pairing(conn, &pairing.id)
            })
        })
        .await
        .map_err(task_err)?
    }
}

pub struct SqliteDirectoryStore {
    db_path: Arc<String>,
}

impl SqliteDirectoryStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::DirectoryStore for SqliteDirectoryStore {
    async fn get_entry(&self, uid: &str) -> Result<Option<DirectoryEntry>, DatabaseError> {
        let uid = uid.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            load_directory_entry(&mut conn, &uid)?
                .map(|e| e.to_directory_entry())
                .transpose()
        })
        .await
        .map_err(task_err)?
    }

    async fn upsert_entry(&self, upsert: &DirectoryUpsert) -> Result<DirectoryEntry, DatabaseError> {
        let upsert = upsert.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = datetime_to_string(&Utc::now());
            conn.immediate_transaction(|conn| {
                let existing = load_directory_entry(conn, &upsert.mentor_uid)?;

                use crate::db::schema_sqlite::mentor_directory::dsl::*;
                if let Some(existing) = existing {
                    // Slot bookkeeping belongs to the coordinator; only
                    // recompute the derived count against the new capacity.
                    diesel::update(mentor_directory.filter(mentor_uid.eq(&upsert.mentor_uid)))
                        .set((
                            display_name.eq(upsert.display_name.as_deref()),
                            mentor_kind.eq(upsert.mentor_kind.as_deref()),
                            active.eq(upsert.active),
                            capacity.eq(upsert.capacity),
                            available_slots.eq(crate::pairing::logic::available_slots(
                                upsert.capacity,
                                existing.active_students,
                            )),
                            updated_at.eq(now.clone()),
                        ))
                        .execute(conn)?;
                } else {
                    let row = NewDirectoryRow {
                        mentor_uid: &upsert.mentor_uid,
                        display_name: upsert.display_name.as_deref(),
                        mentor_kind: upsert.mentor_kind.as_deref(),
                        active: upsert.active,
                        capacity: upsert.capacity,
                        active_students: 0,
                        available_slots: upsert.capacity.max(0),
                        created_at: now.clone(),
                        updated_at: now.clone(),
                    };
                    diesel::insert_into(mentor_directory).values(&row).execute(conn)?;
                }

                load_directory_entry(conn, &upsert.mentor_uid)?
                    .ok_or_else(|| {
                        DatabaseError::Query("directory entry vanished mid-transaction".to_string())
                    })?
                    .to_directory_entry()
            })
        })
        .await
        .map_err(task_err)?
    }

    async fn list_entries(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DirectoryEntry>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::mentor_directory::dsl::*;
            let results = mentor_directory
                .order(mentor_uid.asc())
                .limit(limit)
                .offset(offset)
                .select(DbDirectoryEntry::as_select())
                .load::<DbDirectoryEntry>(&mut conn)
                .map_err(DatabaseError::from)?;

            results.into_iter().map(|e| e.to_directory_entry()).collect()
        })
        .await
        .map_err(task_err)?
    }
}
