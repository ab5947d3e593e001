use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::manager::Pool;
use crate::db::schema::{mentor_directory, pairings};
use crate::pairing::{PairingError, logic};

use super::{
    DatabaseError,
    models::{DirectoryEntry, DirectoryUpsert, NewPairing, Pairing, PairingStatus},
};

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
    requested_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
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
            requested_at: self.requested_at,
            responded_at: self.responded_at,
            ended_at: self.ended_at,
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
    requested_at: &'a DateTime<Utc>,
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
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbDirectoryEntry> for DirectoryEntry {
    fn from(value: DbDirectoryEntry) -> Self {
        Self {
            mentor_uid: value.mentor_uid,
            display_name: value.display_name,
            mentor_kind: value.mentor_kind,
            active: value.active,
            capacity: value.capacity,
            active_students: value.active_students,
            available_slots: value.available_slots,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
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
    created_at: &'a DateTime<Utc>,
    updated_at: &'a DateTime<Utc>,
}

async fn with_connection<T, E, F>(pool: Pool, operation: F) -> Result<T, E>
where
    T: Send + 'static,
    E: From<DatabaseError> + Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, E> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| E::from(DatabaseError::Connection(e.to_string())))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| E::from(DatabaseError::Query(format!("database task failed: {e}"))))?
}

const SERIALIZATION_ATTEMPTS: usize = 3;

/// Serializable transactions abort on write conflicts; retry against fresh
/// data a bounded number of times before surfacing `Transient`.
fn run_serializable<T, F>(conn: &mut PgConnection, mut op: F) -> Result<T, PairingError>
where
    F: FnMut(&mut PgConnection) -> Result<T, PairingError>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match conn.build_transaction().serializable().run(&mut op) {
            Err(PairingError::Transient) if attempts < SERIALIZATION_ATTEMPTS => continue,
            other => return other,
        }
    }
}

fn load_pairing(conn: &mut PgConnection, pairing_id: &str) -> Result<Option<DbPairing>, DatabaseError> {
    use crate::db::schema::pairings::dsl::*;
    pairings
        .filter(id.eq(pairing_id))
        .select(DbPairing::as_select())
        .first::<DbPairing>(conn)
        .optional()
        .map_err(DatabaseError::from)
}

fn load_directory_entry(
    conn: &mut PgConnection,
    uid: &str,
) -> Result<Option<DbDirectoryEntry>, DatabaseError> {
    use crate::db::schema::mentor_directory::dsl::*;
    mentor_directory
        .filter(mentor_uid.eq(uid))
        .select(DbDirectoryEntry::as_select())
        .first::<DbDirectoryEntry>(conn)
        .optional()
        .map_err(DatabaseError::from)
}

fn reload_pairing(conn: &mut PgConnection, pairing_id: &str) -> Result<Pairing, PairingError> {
    load_pairing(conn, pairing_id)?
        .ok_or_else(|| {
            PairingError::Store(DatabaseError::Query(
                "pairing vanished mid-transaction".to_string(),
            ))
        })?
        .to_pairing()
        .map_err(PairingError::from)
}

pub struct PostgresPairingStore {
    pool: Pool,
}

impl PostgresPairingStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::PairingStore for PostgresPairingStore {
    async fn get_pairing(&self, pairing_id: &str) -> Result<Option<Pairing>, DatabaseError> {
        let pairing_id = pairing_id.to_string();
        with_connection(self.pool.clone(), move |conn| {
            load_pairing(conn, &pairing_id)?
                .map(|p| p.to_pairing())
                .transpose()
        })
        .await
    }

    async fn create_pairing(&self, new_pairing: &NewPairing) -> Result<Pairing, PairingError> {
        let new_pairing = new_pairing.clone();
        with_connection(self.pool.clone(), move |conn| {
            run_serializable(conn, |conn| {
                use crate::db::schema::pairings::dsl::*;

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
                    requested_at: &new_pairing.requested_at,
                };
                diesel::insert_into(pairings).values(&row).execute(conn)?;

                reload_pairing(conn, &new_pairing.id)
            })
        })
        .await
    }

    async fn accept_pairing(
        &self,
        pairing_id: &str,
        acting_mentor_uid: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, PairingError> {
        let pairing_id = pairing_id.to_string();
        let acting_mentor_uid = acting_mentor_uid.to_string();
        with_connection(self.pool.clone(), move |conn| {
            run_serializable(conn, |conn| {
                let pairing = load_pairing(conn, &pairing_id)?
                    .ok_or(PairingError::NotFound)?
                    .to_pairing()?;
                logic::ensure_can_accept(&pairing, &acting_mentor_uid)?;

                let entry: DirectoryEntry = load_directory_entry(conn, &pairing.mentor_uid)?
                    .ok_or(PairingError::DirectoryNotFound)?
                    .into();
                logic::ensure_open_slot(&entry)?;

                {
                    use crate::db::schema::pairings::dsl::*;
                    diesel::update(pairings.filter(id.eq(&pairing.id)))
                        .set((
                            status.eq(PairingStatus::Accepted.as_str()),
                            responded_at.eq(Some(now)),
                        ))
                        .execute(conn)?;
                }

                let taken = entry.active_students + 1;
                {
                    use crate::db::schema::mentor_directory::dsl::*;
                    diesel::update(mentor_directory.filter(mentor_uid.eq(&entry.mentor_uid)))
                        .set((
                            active_students.eq(taken),
                            available_slots.eq(logic::available_slots(entry.capacity, taken)),
                            updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }

                reload_pairing(conn, &pairing.id)
            })
        })
        .await
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
        with_connection(self.pool.clone(), move |conn| {
            run_serializable(conn, |conn| {
                let pairing = load_pairing(conn, &pairing_id)?
                    .ok_or(PairingError::NotFound)?
                    .to_pairing()?;
                logic::ensure_can_decline(&pairing, &acting_mentor_uid)?;

                use crate::db::schema::pairings::dsl::*;
                diesel::update(pairings.filter(id.eq(&pairing.id)))
                    .set((
                        status.eq(PairingStatus::Declined.as_str()),
                        responded_at.eq(Some(now)),
                        decline_reason.eq(reason.as_deref()),
                    ))
                    .execute(conn)?;

                reload_pairing(conn, &pairing.id)
            })
        })
        .await
    }

    async fn end_pairing(
        &self,
        pairing_id: &str,
        acting_uid: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, PairingError> {
        let pairing_id = pairing_id.to_string();
        let acting_uid = acting_uid.to_string();
        with_connection(self.pool.clone(), move |conn| {
            run_serializable(conn, |conn| {
                let pairing = load_pairing(conn, &pairing_id)?
                    .ok_or(PairingError::NotFound)?
                    .to_pairing()?;
                logic::ensure_can_end(&pairing, &acting_uid)?;

                {
                    use crate::db::schema::pairings::dsl::*;
                    diesel::update(pairings.filter(id.eq(&pairing.id)))
                        .set((
                            status.eq(PairingStatus::Ended.as_str()),
                            ended_at.eq(Some(now)),
                        ))
                        .execute(conn)?;
                }

                if let Some(entry) = load_directory_entry(conn, &pairing.mentor_uid)? {
                    let entry: DirectoryEntry = entry.into();
                    let remaining = logic::release_slot(entry.active_students);
                    use crate::db::schema::mentor_directory::dsl::*;
                    diesel::update(mentor_directory.filter(mentor_uid.eq(&entry.mentor_uid)))
                        .set((
                            active_students.eq(remaining),
                            available_slots.eq(logic::available_slots(entry.capacity, remaining)),
                            updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }

                reload_pairing(conn, &pairing.id)
            })
        })
        .await
    }
}

pub struct PostgresDirectoryStore {
    pool: Pool,
}

impl PostgresDirectoryStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::DirectoryStore for PostgresDirectoryStore {
    async fn get_entry(&self, uid: &str) -> Result<Option<DirectoryEntry>, DatabaseError> {
        let uid = uid.to_string();
        with_connection(self.pool.clone(), move |conn| {
            Ok(load_directory_entry(conn, &uid)?.map(DirectoryEntry::from))
        })
        .await
    }

    async fn upsert_entry(&self, upsert: &DirectoryUpsert) -> Result<DirectoryEntry, DatabaseError> {
        let upsert = upsert.clone();
        with_connection(self.pool.clone(), move |conn| {
            let now = Utc::now();
            conn.transaction(|conn| {
                let existing = load_directory_entry(conn, &upsert.mentor_uid)?;

                use crate::db::schema::mentor_directory::dsl::*;
                if let Some(existing) = existing {
                    diesel::update(mentor_directory.filter(mentor_uid.eq(&upsert.mentor_uid)))
                        .set((
                            display_name.eq(upsert.display_name.as_deref()),
                            mentor_kind.eq(upsert.mentor_kind.as_deref()),
                            active.eq(upsert.active),
                            capacity.eq(upsert.capacity),
                            available_slots.eq(logic::available_slots(
                                upsert.capacity,
                                existing.active_students,
                            )),
                            updated_at.eq(now),
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
                        created_at: &now,
                        updated_at: &now,
                    };
                    diesel::insert_into(mentor_directory).values(&row).execute(conn)?;
                }

                load_directory_entry(conn, &upsert.mentor_uid)?
                    .map(DirectoryEntry::from)
                    .ok_or_else(|| {
                        DatabaseError::Query("directory entry vanished mid-transaction".to_string())
                    })
            })
        })
        .await
    }

    async fn list_entries(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DirectoryEntry>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::mentor_directory::dsl::*;
            let results = mentor_directory
                .order(mentor_uid.asc())
                .limit(limit)
                .offset(offset)
                .select(DbDirectoryEntry::as_select())
                .load::<DbDirectoryEntry>(conn)
                .map_err(DatabaseError::from)?;

            Ok(results.into_iter().map(DirectoryEntry::from).collect())
        })
        .await
    }
}
