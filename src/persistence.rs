//! Key-value persistence for the task ledger and settings.
//!
//! The ledger is written as one JSON snapshot per identity. When that write
//! fails, the tasks go to a fixed backup slot instead. Loading recovers from
//! the backup slot when the snapshot cannot be read, and repairs malformed
//! task records before handing them to the ledger.

use crate::clock::SharedClock;
use crate::models::{Session, Settings, Task, TaskId};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Fixed, identity-independent slot written when the snapshot write fails.
pub const BACKUP_KEY: &str = "ledger_backup";
/// Slot used by early versions, holding a bare array of tasks.
pub const LEGACY_TASKS_KEY: &str = "tasks";
const SETTINGS_KEY: &str = "settings";

/// Storage key of the snapshot for an identity.
pub fn data_key(identity: &str) -> String {
    format!("ledger_data_{}", identity)
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to create database directory")]
    DirectoryCreation,
    #[error("Value stored under {0} is not a ledger snapshot")]
    Malformed(String),
    #[error("In-memory store lock poisoned")]
    Poisoned,
}

/// Durable string key-value storage.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// SQLite-backed key-value store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens the store at the default location, creating it if needed.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(&Self::db_path())
    }

    /// Opens the store at `path`, initializing tables if needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StoreError::DirectoryCreation)?;
        }

        let conn = Connection::open(path)?;
        Self::initialize_tables(&conn)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing).
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_tables(&conn)?;
        Ok(Self { conn })
    }

    fn initialize_tables(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    /// Database location: `POMOLEDGER_DB` if set, otherwise the platform data directory.
    pub fn db_path() -> PathBuf {
        if let Some(path) = std::env::var_os("POMOLEDGER_DB") {
            return PathBuf::from(path);
        }
        ProjectDirs::from("com", "pomoledger", "Pomoledger")
            .map(|dirs| dirs.data_dir().join("pomoledger.db"))
            .unwrap_or_else(|| PathBuf::from("pomoledger.db"))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(())
    }
}

/// In-memory key-value store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<'a> {
    tasks: &'a [Task],
    last_update: DateTime<Utc>,
    identity: &'a str,
}

#[derive(Serialize)]
struct Backup<'a> {
    tasks: &'a [Task],
    timestamp: DateTime<Utc>,
}

/// Where a save ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written under the identity slot.
    Primary,
    /// Identity slot failed; written to the backup slot.
    Backup,
    /// Both writes failed.
    Failed,
}

/// Where a load found its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    /// Snapshot unreadable; recovered from the backup slot.
    Backup,
    /// Imported from the pre-snapshot `tasks` slot.
    Legacy,
    /// Nothing usable was stored.
    Empty,
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub tasks: Vec<Task>,
    pub source: LoadSource,
    /// True if malformed records were repaired or dropped.
    pub repaired: bool,
}

/// Reads and writes the ledger snapshot for one identity.
pub struct Gateway {
    store: Box<dyn KeyValueStore>,
    identity: String,
    clock: SharedClock,
}

impl Gateway {
    pub fn new(store: Box<dyn KeyValueStore>, identity: String, clock: SharedClock) -> Self {
        Self {
            store,
            identity,
            clock,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Moves the ledger to another identity slot.
    ///
    /// The tasks are saved under the new slot first; the old slot is only
    /// cleared once that write landed.
    pub fn rebind(&mut self, identity: String, tasks: &[Task]) -> SaveOutcome {
        let previous = std::mem::replace(&mut self.identity, identity);
        let outcome = self.save(tasks);
        if outcome == SaveOutcome::Primary {
            if let Err(e) = self.store.remove(&data_key(&previous)) {
                log::warn!("Failed to clear ledger slot for {}: {}", previous, e);
            }
        }
        log::info!("Ledger moved from {} to {}", previous, self.identity);
        outcome
    }

    /// Writes the snapshot, falling back to the backup slot. Never fails.
    pub fn save(&self, tasks: &[Task]) -> SaveOutcome {
        let now = self.clock.now();
        match self.write_snapshot(tasks, now) {
            Ok(()) => {
                log::debug!("Saved {} tasks for {}", tasks.len(), self.identity);
                SaveOutcome::Primary
            }
            Err(e) => {
                log::warn!("Failed to save ledger: {}; writing backup", e);
                match self.write_backup(tasks, now) {
                    Ok(()) => SaveOutcome::Backup,
                    Err(e) => {
                        log::error!("Failed to write ledger backup: {}", e);
                        SaveOutcome::Failed
                    }
                }
            }
        }
    }

    fn write_snapshot(&self, tasks: &[Task], now: DateTime<Utc>) -> Result<(), StoreError> {
        let json = serde_json::to_string(&Snapshot {
            tasks,
            last_update: now,
            identity: &self.identity,
        })?;
        self.store.set(&data_key(&self.identity), &json)
    }

    fn write_backup(&self, tasks: &[Task], now: DateTime<Utc>) -> Result<(), StoreError> {
        let json = serde_json::to_string(&Backup {
            tasks,
            timestamp: now,
        })?;
        self.store.set(BACKUP_KEY, &json)
    }

    /// Loads the ledger, recovering from the backup or legacy slot as needed.
    ///
    /// Anything recovered or repaired is written back under the identity slot
    /// before returning. An unusable store yields an empty ledger.
    pub fn load(&self) -> Loaded {
        let key = data_key(&self.identity);
        let (records, source) = match self.read_records(&key) {
            Ok(Some(records)) => (records, LoadSource::Primary),
            Ok(None) => self.read_legacy(),
            Err(e) => {
                log::warn!("Ledger snapshot unreadable ({}); recovering from backup", e);
                self.read_backup()
            }
        };

        let (tasks, repaired) = verify_integrity(records);
        if repaired || matches!(source, LoadSource::Backup | LoadSource::Legacy) {
            log::info!("Re-persisting {} recovered tasks", tasks.len());
            let outcome = self.save(&tasks);
            if source == LoadSource::Legacy && outcome == SaveOutcome::Primary {
                if let Err(e) = self.store.remove(LEGACY_TASKS_KEY) {
                    log::warn!("Failed to clear legacy tasks: {}", e);
                }
            }
        }

        Loaded {
            tasks,
            source,
            repaired,
        }
    }

    fn read_backup(&self) -> (Vec<Value>, LoadSource) {
        match self.read_records(BACKUP_KEY) {
            Ok(Some(records)) => (records, LoadSource::Backup),
            Ok(None) => {
                log::warn!("No ledger backup found; starting empty");
                (Vec::new(), LoadSource::Empty)
            }
            Err(e) => {
                log::error!("Ledger backup unreadable ({}); starting empty", e);
                (Vec::new(), LoadSource::Empty)
            }
        }
    }

    fn read_legacy(&self) -> (Vec<Value>, LoadSource) {
        match self.read_records(LEGACY_TASKS_KEY) {
            Ok(Some(records)) => {
                log::info!("Importing {} tasks from legacy slot", records.len());
                (records, LoadSource::Legacy)
            }
            Ok(None) => (Vec::new(), LoadSource::Empty),
            Err(e) => {
                log::warn!("Ignoring unreadable legacy tasks: {}", e);
                (Vec::new(), LoadSource::Empty)
            }
        }
    }

    fn read_records(&self, key: &str) -> Result<Option<Vec<Value>>, StoreError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(&raw)?;
        match value {
            Value::Array(records) => Ok(Some(records)),
            Value::Object(mut fields) => match fields.remove("tasks") {
                Some(Value::Array(records)) => Ok(Some(records)),
                _ => Err(StoreError::Malformed(key.to_string())),
            },
            _ => Err(StoreError::Malformed(key.to_string())),
        }
    }

    /// Loads settings, returning defaults if none are stored or they are unreadable.
    pub fn load_settings(&self) -> Settings {
        load_settings(self.store.as_ref())
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        save_settings(self.store.as_ref(), settings)
    }
}

/// Loads settings from `store`, returning defaults if none are stored or they are unreadable.
pub fn load_settings(store: &dyn KeyValueStore) -> Settings {
    let stored = match store.get(SETTINGS_KEY) {
        Ok(stored) => stored,
        Err(e) => {
            log::warn!("Failed to read settings: {}", e);
            None
        }
    };

    let mut settings = match stored.map(|json| serde_json::from_str::<Settings>(&json)) {
        Some(Ok(settings)) => settings,
        Some(Err(e)) => {
            log::warn!("Ignoring malformed settings: {}", e);
            Settings::default()
        }
        None => Settings::default(),
    };
    if settings.sanitize() {
        log::warn!("Replaced out-of-range settings with defaults");
    }
    settings
}

pub fn save_settings(store: &dyn KeyValueStore, settings: &Settings) -> Result<(), StoreError> {
    let json = serde_json::to_string(settings)?;
    store.set(SETTINGS_KEY, &json)
}

/// Drops task records without a usable id or name and normalizes the rest.
///
/// Missing or non-numeric `timeSpent` becomes zero, a missing `sessionHistory`
/// becomes empty, unusable sessions are dropped, and when a history exists
/// `timeSpent` is recomputed from it. Later records repeating an id are
/// dropped. Returns the tasks and whether anything was changed.
pub fn verify_integrity(records: Vec<Value>) -> (Vec<Task>, bool) {
    let mut cleaned = false;
    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(records.len());

    for (position, record) in records.into_iter().enumerate() {
        match repair_task(record) {
            Ok((task, repaired)) => {
                if !seen.insert(task.id.clone()) {
                    log::warn!("Dropping task at position {}: duplicate id {}", position, task.id);
                    cleaned = true;
                    continue;
                }
                cleaned |= repaired;
                tasks.push(task);
            }
            Err(reason) => {
                log::warn!("Dropping task at position {}: {}", position, reason);
                cleaned = true;
            }
        }
    }

    (tasks, cleaned)
}

fn repair_task(record: Value) -> Result<(Task, bool), &'static str> {
    let Value::Object(mut fields) = record else {
        return Err("not an object");
    };

    let id = fields
        .get("id")
        .and_then(parse_task_id)
        .ok_or("missing or invalid id")?;
    let name = match fields.remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name,
        _ => return Err("missing name"),
    };

    let mut repaired = false;
    let time_spent = match fields.get("timeSpent").and_then(Value::as_u64) {
        Some(secs) => secs,
        None => {
            repaired = true;
            0
        }
    };

    let session_history = match fields.remove("sessionHistory") {
        Some(Value::Array(items)) => {
            let count = items.len();
            let mut sessions = Vec::with_capacity(count);
            for item in items {
                if let Some((session, session_repaired)) = parse_session(item) {
                    repaired |= session_repaired;
                    sessions.push(session);
                }
            }
            repaired |= sessions.len() != count;
            sessions
        }
        _ => {
            repaired = true;
            Vec::new()
        }
    };

    let mut task = Task {
        id,
        name,
        time_spent,
        session_history,
    };
    if !task.session_history.is_empty() {
        let total = task.history_total();
        if total != task.time_spent {
            task.time_spent = total;
            repaired = true;
        }
    }

    Ok((task, repaired))
}

/// Accepts a non-negative integer or a non-blank string, kept as read.
fn parse_task_id(value: &Value) -> Option<TaskId> {
    match value {
        Value::Number(n) => n.as_u64().map(TaskId::Num),
        Value::String(s) if !s.trim().is_empty() => Some(TaskId::Str(s.clone())),
        _ => None,
    }
}

/// Parses one session record. A missing id is replaced with a fresh one.
fn parse_session(value: Value) -> Option<(Session, bool)> {
    let Value::Object(fields) = value else {
        return None;
    };

    let duration = fields
        .get("duration")
        .and_then(Value::as_u64)
        .and_then(|d| u32::try_from(d).ok())
        .filter(|d| *d > 0)?;
    let completed_at = fields
        .get("completedAt")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())?;

    let (id, repaired) = match fields.get("id") {
        Some(Value::String(id)) if !id.is_empty() => (id.clone(), false),
        Some(Value::Number(n)) => (n.to_string(), true),
        _ => (Uuid::new_v4().to_string(), true),
    };

    Some((
        Session {
            id,
            duration,
            completed_at,
        },
        repaired,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    const IDENTITY: &str = "203.0.113.7";

    /// Store that rejects writes to keys with a given prefix.
    struct RejectingStore {
        inner: MemoryStore,
        reject_prefix: &'static str,
    }

    impl KeyValueStore for RejectingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if key.starts_with(self.reject_prefix) {
                return Err(StoreError::Malformed(key.to_string()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    fn gateway(store: &MemoryStore) -> Gateway {
        Gateway::new(
            Box::new(store.clone()),
            IDENTITY.to_string(),
            ManualClock::fixed().shared(),
        )
    }

    fn sample_tasks() -> Vec<Task> {
        let completed_at = "2024-01-15T09:25:00Z".parse().unwrap();
        let mut report = Task::new(TaskId::Num(1_705_309_200_000), "Write report");
        report.session_history.push(Session {
            id: "a".to_string(),
            duration: 1500,
            completed_at,
        });
        report.session_history.push(Session {
            id: "b".to_string(),
            duration: 300,
            completed_at,
        });
        report.time_spent = 1800;
        let review = Task::new(TaskId::Str("review".to_string()), "Review");
        vec![report, review]
    }

    fn as_records(tasks: &[Task]) -> Vec<Value> {
        tasks.iter().map(|t| serde_json::to_value(t).unwrap()).collect()
    }

    #[test]
    fn test_sqlite_store_get_set_remove() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "one").unwrap();
        store.set("k", "two").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("two"));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_sqlite_store_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.db");

        SqliteStore::open(&path).unwrap().set("k", "v").unwrap();
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_memory_store_clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", "v").unwrap();
        assert_eq!(other.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_save_writes_snapshot_format() {
        let store = MemoryStore::new();
        let gateway = gateway(&store);
        assert_eq!(gateway.save(&sample_tasks()), SaveOutcome::Primary);

        let raw = store.get(&data_key(IDENTITY)).unwrap().unwrap();
        let snapshot: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot["identity"], IDENTITY);
        assert_eq!(snapshot["lastUpdate"], "2024-01-15T09:00:00Z");
        assert_eq!(snapshot["tasks"][0]["name"], "Write report");
        assert_eq!(snapshot["tasks"][0]["timeSpent"], 1800);
        assert_eq!(snapshot["tasks"][0]["sessionHistory"][1]["duration"], 300);
        assert_eq!(store.get(BACKUP_KEY).unwrap(), None);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let store = MemoryStore::new();
        let tasks = sample_tasks();
        gateway(&store).save(&tasks);

        let loaded = gateway(&store).load();
        assert_eq!(loaded.source, LoadSource::Primary);
        assert!(!loaded.repaired);
        assert_eq!(loaded.tasks, tasks);
    }

    #[test]
    fn test_round_trip_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let tasks = sample_tasks();
        let clock = ManualClock::fixed();

        let store = SqliteStore::open(&path).unwrap();
        Gateway::new(Box::new(store), IDENTITY.to_string(), clock.shared()).save(&tasks);

        let store = SqliteStore::open(&path).unwrap();
        let loaded = Gateway::new(Box::new(store), IDENTITY.to_string(), clock.shared()).load();
        assert_eq!(loaded.tasks, tasks);
    }

    #[test]
    fn test_load_nothing_stored() {
        let store = MemoryStore::new();
        let loaded = gateway(&store).load();
        assert_eq!(loaded.source, LoadSource::Empty);
        assert!(loaded.tasks.is_empty());
        assert_eq!(store.get(&data_key(IDENTITY)).unwrap(), None);
    }

    #[test]
    fn test_string_ids_survive_load() {
        let store = MemoryStore::new();
        store
            .set(
                &data_key(IDENTITY),
                &json!({
                    "tasks": [
                        {"id": "task-a", "name": "Write report", "timeSpent": 300, "sessionHistory": [
                            {"id": "s1", "duration": 300, "completedAt": "2024-01-15T09:05:00Z"}
                        ]},
                        {"id": 5, "name": "Numeric"}
                    ],
                    "lastUpdate": "2024-01-15T09:05:00Z",
                    "identity": IDENTITY
                })
                .to_string(),
            )
            .unwrap();

        let loaded = gateway(&store).load();
        let names: Vec<_> = loaded.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Write report", "Numeric"]);
        assert_eq!(loaded.tasks[0].id, TaskId::Str("task-a".to_string()));
        assert_eq!(loaded.tasks[0].time_spent, 300);
        assert_eq!(loaded.tasks[0].session_history.len(), 1);
        assert_eq!(loaded.tasks[1].id, TaskId::Num(5));

        // The repaired second record is re-persisted, ids in their original form
        let raw = store.get(&data_key(IDENTITY)).unwrap().unwrap();
        let snapshot: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot["tasks"][0]["id"], "task-a");
        assert_eq!(snapshot["tasks"][1]["id"], 5);
        assert_eq!(gateway(&store).load().tasks, loaded.tasks);
    }

    #[test]
    fn test_rebind_moves_snapshot() {
        let store = MemoryStore::new();
        let mut gateway = gateway(&store);
        let tasks = sample_tasks();
        gateway.save(&tasks);

        assert_eq!(
            gateway.rebind("198.51.100.4".to_string(), &tasks),
            SaveOutcome::Primary
        );
        assert_eq!(gateway.identity(), "198.51.100.4");
        assert_eq!(store.get(&data_key(IDENTITY)).unwrap(), None);

        let moved = Gateway::new(
            Box::new(store.clone()),
            "198.51.100.4".to_string(),
            ManualClock::fixed().shared(),
        )
        .load();
        assert_eq!(moved.tasks, tasks);
    }

    #[test]
    fn test_corrupted_snapshot_recovers_from_backup() {
        let store = MemoryStore::new();
        store.set(&data_key(IDENTITY), "{not json").unwrap();
        store
            .set(
                BACKUP_KEY,
                &json!({
                    "tasks": [{"id": 7, "name": "Recovered", "timeSpent": 0, "sessionHistory": []}],
                    "timestamp": "2024-01-14T18:00:00Z"
                })
                .to_string(),
            )
            .unwrap();

        let loaded = gateway(&store).load();
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].name, "Recovered");

        // Immediately re-persisted under the identity key
        let raw = store.get(&data_key(IDENTITY)).unwrap().unwrap();
        let snapshot: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot["tasks"][0]["id"], 7);
        assert_eq!(gateway(&store).load().source, LoadSource::Primary);
    }

    #[test]
    fn test_snapshot_without_tasks_array_is_corrupt() {
        let store = MemoryStore::new();
        store.set(&data_key(IDENTITY), r#"{"tasks": 3}"#).unwrap();
        let loaded = gateway(&store).load();
        assert_eq!(loaded.source, LoadSource::Empty);
        assert!(loaded.tasks.is_empty());
    }

    #[test]
    fn test_corrupted_snapshot_and_backup_start_empty() {
        let store = MemoryStore::new();
        store.set(&data_key(IDENTITY), "garbage").unwrap();
        store.set(BACKUP_KEY, "also garbage").unwrap();

        let loaded = gateway(&store).load();
        assert_eq!(loaded.source, LoadSource::Empty);
        assert!(loaded.tasks.is_empty());
    }

    #[test]
    fn test_save_falls_back_to_backup() {
        let inner = MemoryStore::new();
        let store = RejectingStore {
            inner: inner.clone(),
            reject_prefix: "ledger_data_",
        };
        let gateway = Gateway::new(
            Box::new(store),
            IDENTITY.to_string(),
            ManualClock::fixed().shared(),
        );

        assert_eq!(gateway.save(&sample_tasks()), SaveOutcome::Backup);
        let raw = inner.get(BACKUP_KEY).unwrap().unwrap();
        let backup: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(backup["timestamp"], "2024-01-15T09:00:00Z");
        assert_eq!(backup["tasks"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_save_reports_failure_when_backup_fails() {
        let store = RejectingStore {
            inner: MemoryStore::new(),
            reject_prefix: "",
        };
        let gateway = Gateway::new(
            Box::new(store),
            IDENTITY.to_string(),
            ManualClock::fixed().shared(),
        );
        assert_eq!(gateway.save(&sample_tasks()), SaveOutcome::Failed);
    }

    #[test]
    fn test_legacy_tasks_slot_is_imported() {
        let store = MemoryStore::new();
        store
            .set(
                LEGACY_TASKS_KEY,
                r#"[{"id": 1700000000000, "name": "Old task", "timeSpent": 3000}]"#,
            )
            .unwrap();

        let loaded = gateway(&store).load();
        assert_eq!(loaded.source, LoadSource::Legacy);
        assert!(loaded.repaired);
        assert_eq!(loaded.tasks[0].name, "Old task");
        assert_eq!(loaded.tasks[0].time_spent, 3000);
        assert!(loaded.tasks[0].session_history.is_empty());
        assert!(store.get(&data_key(IDENTITY)).unwrap().is_some());
        // Migrated, so the legacy slot is cleared
        assert_eq!(store.get(LEGACY_TASKS_KEY).unwrap(), None);
        assert_eq!(gateway(&store).load().source, LoadSource::Primary);
    }

    #[test]
    fn test_repaired_snapshot_is_re_persisted() {
        let store = MemoryStore::new();
        store
            .set(
                &data_key(IDENTITY),
                &json!({
                    "tasks": [{"id": 1, "name": "A"}, {"name": "no id"}],
                    "lastUpdate": "2024-01-14T18:00:00Z",
                    "identity": IDENTITY
                })
                .to_string(),
            )
            .unwrap();

        let loaded = gateway(&store).load();
        assert!(loaded.repaired);
        assert_eq!(loaded.tasks.len(), 1);

        let again = gateway(&store).load();
        assert!(!again.repaired);
        assert_eq!(again.tasks, loaded.tasks);
    }

    #[test]
    fn test_verify_integrity_drops_invalid_records() {
        let records = vec![
            json!({"id": 1, "name": "Keep", "timeSpent": 0, "sessionHistory": []}),
            json!({"name": "No id", "timeSpent": 0, "sessionHistory": []}),
            json!({"id": 2, "timeSpent": 0, "sessionHistory": []}),
            json!({"id": 3, "name": "   ", "timeSpent": 0, "sessionHistory": []}),
            json!({"id": "  ", "name": "Blank id"}),
            json!({"id": -4, "name": "Negative id"}),
            json!({"id": 1.5, "name": "Fractional id"}),
            json!({"id": null, "name": "Null id"}),
            json!("not an object"),
            json!({"id": 1, "name": "Duplicate", "timeSpent": 0, "sessionHistory": []}),
        ];

        let (tasks, cleaned) = verify_integrity(records);
        assert!(cleaned);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "Keep");
    }

    #[test]
    fn test_verify_integrity_normalizes_fields() {
        let records = vec![
            json!({"id": 1, "name": "No history", "timeSpent": 600}),
            json!({"id": "2", "name": "Bad time", "timeSpent": "lots", "sessionHistory": []}),
            json!({"id": 3, "name": "Negative", "timeSpent": -5, "sessionHistory": []}),
        ];

        let (tasks, cleaned) = verify_integrity(records);
        assert!(cleaned);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].time_spent, 600);
        assert!(tasks[0].session_history.is_empty());
        assert_eq!(tasks[1].id, TaskId::Str("2".to_string()));
        assert_eq!(tasks[1].time_spent, 0);
        assert_eq!(tasks[2].time_spent, 0);
    }

    #[test]
    fn test_verify_integrity_repairs_history() {
        let records = vec![json!({
            "id": 1,
            "name": "Sessions",
            "timeSpent": 99,
            "sessionHistory": [
                {"id": "ok", "duration": 300, "completedAt": "2024-01-15T09:05:00Z"},
                {"id": 17, "duration": 600, "completedAt": "2024-01-15T10:00:00Z"},
                {"duration": 900, "completedAt": "2024-01-15T11:00:00Z"},
                {"id": "zero", "duration": 0, "completedAt": "2024-01-15T12:00:00Z"},
                {"id": "no date", "duration": 300},
                "junk"
            ]
        })];

        let (tasks, cleaned) = verify_integrity(records);
        assert!(cleaned);
        let task = &tasks[0];
        assert_eq!(task.session_history.len(), 3);
        assert_eq!(task.session_history[1].id, "17");
        assert!(!task.session_history[2].id.is_empty());
        assert_eq!(task.time_spent, 1800);
        assert_eq!(task.time_spent, task.history_total());
    }

    #[test]
    fn test_verify_integrity_is_idempotent() {
        let records = vec![
            json!({"id": 1, "name": "A"}),
            json!({"id": 2, "name": "B", "timeSpent": 5, "sessionHistory": [
                {"duration": 300, "completedAt": "2024-01-15T09:05:00Z"}
            ]}),
            json!({"name": "dropped"}),
        ];

        let (first, cleaned) = verify_integrity(records);
        assert!(cleaned);

        let (second, cleaned) = verify_integrity(as_records(&first));
        assert!(!cleaned);
        assert_eq!(second, first);

        let (third, cleaned) = verify_integrity(as_records(&second));
        assert!(!cleaned);
        assert_eq!(third, second);
    }

    #[test]
    fn test_verify_integrity_clean_input() {
        let tasks = sample_tasks();
        let (verified, cleaned) = verify_integrity(as_records(&tasks));
        assert!(!cleaned);
        assert_eq!(verified, tasks);
    }

    #[test]
    fn test_settings_save_and_load() {
        let store = MemoryStore::new();
        let gateway = gateway(&store);
        assert_eq!(gateway.load_settings(), Settings::default());

        let custom = Settings {
            duration_mins: 45,
            autosave_secs: 60,
            notifications_enabled: false,
            identity_lookup: false,
            identity_timeout_ms: 500,
        };
        gateway.save_settings(&custom).unwrap();
        assert_eq!(gateway.load_settings(), custom);
    }

    #[test]
    fn test_malformed_settings_use_defaults() {
        let store = MemoryStore::new();
        store.set(SETTINGS_KEY, "{oops").unwrap();
        assert_eq!(gateway(&store).load_settings(), Settings::default());

        store.set(SETTINGS_KEY, r#"{"duration_mins": 12}"#).unwrap();
        assert_eq!(gateway(&store).load_settings().duration_mins, 25);
    }
}
