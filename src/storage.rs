use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::{open_db_connection, NormalizedPlate, ValidationError};

/// Storage format of `gate_events.timestamp` (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_EXPORT_LIMIT: usize = 500;

/// Record store shared by the processing threads and the command surface.
pub type SharedStore = Arc<Mutex<dyn RecordStore>>;

// -------------------- Records --------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_id: String,
    pub stream_uri: String,
}

impl CameraConfig {
    pub fn new(camera_id: impl Into<String>, stream_uri: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            stream_uri: stream_uri.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedIdentity {
    pub id: i64,
    pub name: String,
    pub plate: NormalizedPlate,
}

/// One accepted detection. Written once, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEvent {
    pub plate: NormalizedPlate,
    pub name: String,
    pub camera_id: String,
    pub timestamp: NaiveDateTime,
    pub authorized: bool,
}

impl GateEvent {
    pub fn timestamp_text(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// A stored event as returned by exports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub plate: String,
    pub name: String,
    pub camera_id: String,
    pub timestamp: String,
    pub authorized: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizedFilter {
    #[default]
    All,
    Authorized,
    Unauthorized,
}

impl AuthorizedFilter {
    fn matches(self, authorized: bool) -> bool {
        match self {
            AuthorizedFilter::All => true,
            AuthorizedFilter::Authorized => authorized,
            AuthorizedFilter::Unauthorized => !authorized,
        }
    }
}

/// Event export filter. Substring matches are case-insensitive; dates are
/// inclusive calendar days.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventFilter {
    pub name_contains: Option<String>,
    pub plate_contains: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub authorized: AuthorizedFilter,
    pub limit: usize,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            name_contains: None,
            plate_contains: None,
            from: None,
            to: None,
            authorized: AuthorizedFilter::All,
            limit: DEFAULT_EXPORT_LIMIT,
        }
    }
}

impl EventFilter {
    fn matches(&self, record: &EventRecord) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle.as_ref().map_or(true, |needle| {
                haystack.to_lowercase().contains(&needle.to_lowercase())
            })
        }
        let date = NaiveDateTime::parse_from_str(&record.timestamp, TIMESTAMP_FORMAT)
            .ok()
            .map(|ts| ts.date());
        contains(&record.name, &self.name_contains)
            && contains(&record.plate, &self.plate_contains)
            && self.from.map_or(true, |from| date.is_some_and(|d| d >= from))
            && self.to.map_or(true, |to| date.is_some_and(|d| d <= to))
            && self.authorized.matches(record.authorized)
    }
}

// -------------------- Store Trait --------------------

pub trait RecordStore: Send {
    /// Exact-match lookup of a normalized plate.
    fn lookup_authorized(&mut self, plate: &NormalizedPlate) -> Result<Option<AuthorizedIdentity>>;

    /// Add an identity. Duplicate plates and empty names are `ValidationError`s.
    fn add_authorized(&mut self, name: &str, plate: &NormalizedPlate) -> Result<i64>;

    /// Remove an identity by id. Returns whether a row was removed.
    fn remove_authorized(&mut self, id: i64) -> Result<bool>;

    /// All identities, newest first.
    fn list_authorized(&mut self) -> Result<Vec<AuthorizedIdentity>>;

    fn append_event(&mut self, event: &GateEvent) -> Result<i64>;

    /// Matching events, newest first, at most `filter.limit`.
    fn export_events(&mut self, filter: &EventFilter) -> Result<Vec<EventRecord>>;

    fn camera_settings(&mut self) -> Result<Vec<CameraConfig>>;

    /// Insert or replace a camera's stream URI.
    fn set_camera_uri(&mut self, camera_id: &str, stream_uri: &str) -> Result<()>;

    /// Insert a camera only if it is not configured yet. Returns whether it was inserted.
    fn seed_camera(&mut self, camera: &CameraConfig) -> Result<bool>;
}

/// Run `call` with the shared store locked for its duration.
pub fn with_store<T>(
    store: &SharedStore,
    call: impl FnOnce(&mut dyn RecordStore) -> Result<T>,
) -> Result<T> {
    let mut guard = store
        .lock()
        .map_err(|_| anyhow!("record store lock poisoned"))?;
    call(&mut *guard)
}

fn validate_identity_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::new("EMPTY_NAME", "authorized name must not be empty").into());
    }
    Ok(name)
}

fn duplicate_plate(plate: &NormalizedPlate) -> anyhow::Error {
    ValidationError::new(
        "DUPLICATE_PLATE",
        format!("plate {} is already authorized", plate),
    )
    .into()
}

// -------------------- SQLite --------------------

pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS authorized_identities (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              plate TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS gate_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              plate TEXT NOT NULL,
              name TEXT,
              camera_id TEXT NOT NULL,
              timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS camera_settings (
              camera_id TEXT PRIMARY KEY,
              stream_uri TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_gate_events_timestamp ON gate_events(timestamp);
            "#,
        )?;
        // Event stores created before authorization was recorded lack this column.
        ensure_columns(
            &self.conn,
            "gate_events",
            &[("authorized", "INTEGER NOT NULL DEFAULT 0")],
        )?;
        Ok(())
    }
}

/// Add any of `columns` (name, declaration) missing from `table`.
pub(crate) fn ensure_columns(
    conn: &Connection,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<()> {
    let existing = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        names
    };
    for (name, decl) in columns {
        if !existing.iter().any(|col| col == name) {
            log::info!("adding column {}.{}", table, name);
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, decl),
                [],
            )?;
        }
    }
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn identity_from_row(row: &rusqlite::Row<'_>) -> Result<AuthorizedIdentity> {
    let plate: String = row.get(2)?;
    Ok(AuthorizedIdentity {
        id: row.get(0)?,
        name: row.get(1)?,
        plate: NormalizedPlate::parse(&plate)
            .ok_or_else(|| anyhow!("corrupt authorized_identities: empty plate"))?,
    })
}

impl RecordStore for SqliteRecordStore {
    fn lookup_authorized(&mut self, plate: &NormalizedPlate) -> Result<Option<AuthorizedIdentity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, plate FROM authorized_identities WHERE plate = ?1")?;
        let mut rows = stmt.query(params![plate.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(identity_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn add_authorized(&mut self, name: &str, plate: &NormalizedPlate) -> Result<i64> {
        let name = validate_identity_name(name)?;
        match self.conn.execute(
            "INSERT INTO authorized_identities(name, plate) VALUES (?1, ?2)",
            params![name, plate.as_str()],
        ) {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(err) if is_constraint_violation(&err) => Err(duplicate_plate(plate)),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_authorized(&mut self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM authorized_identities WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn list_authorized(&mut self) -> Result<Vec<AuthorizedIdentity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, plate FROM authorized_identities ORDER BY id DESC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(identity_from_row(row)?);
        }
        Ok(out)
    }

    fn append_event(&mut self, event: &GateEvent) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO gate_events(plate, name, camera_id, timestamp, authorized)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                event.plate.as_str(),
                event.name,
                event.camera_id,
                event.timestamp_text(),
                event.authorized
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn export_events(&mut self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        let mut query = String::from(
            "SELECT id, plate, name, camera_id, timestamp, authorized FROM gate_events WHERE 1=1",
        );
        let mut values: Vec<Value> = Vec::new();

        // Name and plate substrings are matched below with Unicode case
        // folding; SQLite LIKE folds ASCII only and treats `%`/`_` as wildcards.
        if let Some(from) = filter.from {
            query.push_str(" AND date(timestamp) >= date(?)");
            values.push(Value::Text(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = filter.to {
            query.push_str(" AND date(timestamp) <= date(?)");
            values.push(Value::Text(to.format("%Y-%m-%d").to_string()));
        }
        match filter.authorized {
            AuthorizedFilter::All => {}
            AuthorizedFilter::Authorized => query.push_str(" AND authorized = 1"),
            AuthorizedFilter::Unauthorized => query.push_str(" AND authorized = 0"),
        }
        query.push_str(" ORDER BY id DESC");

        let mut stmt = self.conn.prepare(&query)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut out = Vec::new();
        while out.len() < filter.limit {
            let Some(row) = rows.next()? else {
                break;
            };
            let name: Option<String> = row.get(2)?;
            let authorized: i64 = row.get(5)?;
            let record = EventRecord {
                id: row.get(0)?,
                plate: row.get(1)?,
                name: name.unwrap_or_default(),
                camera_id: row.get(3)?,
                timestamp: row.get(4)?,
                authorized: authorized != 0,
            };
            if filter.matches(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn camera_settings(&mut self) -> Result<Vec<CameraConfig>> {
        let mut stmt = self
            .conn
            .prepare("SELECT camera_id, stream_uri FROM camera_settings ORDER BY camera_id")?;
        let cameras = stmt
            .query_map([], |row| {
                Ok(CameraConfig {
                    camera_id: row.get(0)?,
                    stream_uri: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cameras)
    }

    fn set_camera_uri(&mut self, camera_id: &str, stream_uri: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO camera_settings(camera_id, stream_uri) VALUES (?1, ?2)",
            params![camera_id, stream_uri],
        )?;
        Ok(())
    }

    fn seed_camera(&mut self, camera: &CameraConfig) -> Result<bool> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT stream_uri FROM camera_settings WHERE camera_id = ?1",
                params![camera.camera_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(false);
        }
        self.set_camera_uri(&camera.camera_id, &camera.stream_uri)?;
        Ok(true)
    }
}

// -------------------- In-Memory --------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordStore {
    identities: Vec<AuthorizedIdentity>,
    events: Vec<EventRecord>,
    cameras: BTreeMap<String, String>,
    next_identity_id: i64,
    next_event_id: i64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }
}

impl RecordStore for InMemoryRecordStore {
    fn lookup_authorized(&mut self, plate: &NormalizedPlate) -> Result<Option<AuthorizedIdentity>> {
        Ok(self
            .identities
            .iter()
            .find(|identity| &identity.plate == plate)
            .cloned())
    }

    fn add_authorized(&mut self, name: &str, plate: &NormalizedPlate) -> Result<i64> {
        let name = validate_identity_name(name)?;
        if self.identities.iter().any(|identity| &identity.plate == plate) {
            return Err(duplicate_plate(plate));
        }
        self.next_identity_id += 1;
        self.identities.push(AuthorizedIdentity {
            id: self.next_identity_id,
            name: name.to_string(),
            plate: plate.clone(),
        });
        Ok(self.next_identity_id)
    }

    fn remove_authorized(&mut self, id: i64) -> Result<bool> {
        let before = self.identities.len();
        self.identities.retain(|identity| identity.id != id);
        Ok(self.identities.len() != before)
    }

    fn list_authorized(&mut self) -> Result<Vec<AuthorizedIdentity>> {
        Ok(self.identities.iter().rev().cloned().collect())
    }

    fn append_event(&mut self, event: &GateEvent) -> Result<i64> {
        self.next_event_id += 1;
        self.events.push(EventRecord {
            id: self.next_event_id,
            plate: event.plate.to_string(),
            name: event.name.clone(),
            camera_id: event.camera_id.clone(),
            timestamp: event.timestamp_text(),
            authorized: event.authorized,
        });
        Ok(self.next_event_id)
    }

    fn export_events(&mut self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        Ok(self
            .events
            .iter()
            .rev()
            .filter(|record| filter.matches(record))
            .take(filter.limit)
            .cloned()
            .collect())
    }

    fn camera_settings(&mut self) -> Result<Vec<CameraConfig>> {
        Ok(self
            .cameras
            .iter()
            .map(|(id, uri)| CameraConfig::new(id.clone(), uri.clone()))
            .collect())
    }

    fn set_camera_uri(&mut self, camera_id: &str, stream_uri: &str) -> Result<()> {
        self.cameras
            .insert(camera_id.to_string(), stream_uri.to_string());
        Ok(())
    }

    fn seed_camera(&mut self, camera: &CameraConfig) -> Result<bool> {
        if self.cameras.contains_key(&camera.camera_id) {
            return Ok(false);
        }
        self.set_camera_uri(&camera.camera_id, &camera.stream_uri)?;
        Ok(true)
    }
}

// -------------------- Tests --------------------
