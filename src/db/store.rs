//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Database lock poisoned")]
    LockPoisoned,
    #[error("Interval out of range: {0}ms (max {}ms)", MAX_INTERVAL_MS)]
    IntervalOutOfRange(u64),
}

/// Thread-safe database store.
///
/// A single connection sits behind a mutex, so every write (including
/// `record_result`) is serialized across all targets.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

type TargetRow = (String, String, String, i64, String);

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create a store that lives only as long as the process.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // --- Target CRUD ---

    /// Get all targets, oldest first.
    pub fn list_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, address, interval_ms, created_at FROM targets ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], target_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        drop(stmt);

        rows.into_iter().map(|row| hydrate(&conn, row)).collect()
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: &str) -> Result<Option<Target>, DbError> {
        let conn = self.lock()?;
        load_target(&conn, id)
    }

    /// Insert a new target with a fresh id and an empty history.
    pub fn create_target(&self, input: TargetInput) -> Result<Target, DbError> {
        let target = Target {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            address: input.address,
            interval_ms: input
                .interval_ms
                .filter(|&ms| ms > 0)
                .unwrap_or(DEFAULT_INTERVAL_MS),
            created_at: Utc::now(),
            current_status: None,
            history: Vec::new(),
        };

        let interval_ms = interval_to_db(target.interval_ms)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO targets (id, name, address, interval_ms, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                target.id,
                target.name,
                target.address,
                interval_ms,
                format_db_time(target.created_at),
            ],
        )?;

        Ok(target)
    }

    /// Apply a patch to an existing target. Returns `None` if it does not exist.
    pub fn update_target(&self, id: &str, patch: TargetPatch) -> Result<Option<Target>, DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let Some(mut target) = load_target(&tx, id)? else {
            return Ok(None);
        };

        if let Some(name) = patch.name {
            target.name = name;
        }
        if let Some(address) = patch.address {
            target.address = address;
        }
        if let Some(interval_ms) = patch.interval_ms.filter(|&ms| ms > 0) {
            target.interval_ms = interval_ms;
        }

        let interval_ms = interval_to_db(target.interval_ms)?;
        tx.execute(
            "UPDATE targets SET name = ?1, address = ?2, interval_ms = ?3 WHERE id = ?4",
            params![target.name, target.address, interval_ms, id],
        )?;
        tx.commit()?;

        Ok(Some(target))
    }

    /// Delete a target and its results. Returns whether anything was removed.
    pub fn delete_target(&self, id: &str) -> Result<bool, DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM probe_results WHERE target_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    // --- Probe history ---

    /// Append a probe result to a target's history and return the updated target.
    ///
    /// Existence check, insert, and trim run in one transaction. Returns
    /// `None` when the target has been deleted in the meantime.
    pub fn record_result(&self, id: &str, result: &ProbeResult) -> Result<Option<Target>, DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists = tx
            .query_row("SELECT 1 FROM targets WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Ok(None);
        }

        tx.execute(
            "INSERT INTO probe_results (target_id, status, latency_ms, timestamp, error) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                result.status.as_str(),
                result.latency_ms as i64,
                format_db_time(result.timestamp),
                result.error,
            ],
        )?;

        tx.execute(
            "DELETE FROM probe_results WHERE target_id = ?1 AND seq NOT IN (
                SELECT seq FROM probe_results WHERE target_id = ?1 ORDER BY seq DESC LIMIT ?2
            )",
            params![id, MAX_HISTORY as i64],
        )?;

        let target = load_target(&tx, id)?;
        tx.commit()?;
        Ok(target)
    }

    /// Get the history of a target, oldest first.
    pub fn history(&self, id: &str) -> Result<Option<Vec<ProbeResult>>, DbError> {
        Ok(self.get_target(id)?.map(|t| t.history))
    }
}

fn target_row(row: &rusqlite::Row<'_>) -> SqlResult<TargetRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn load_target(conn: &Connection, id: &str) -> Result<Option<Target>, DbError> {
    let row = conn
        .query_row(
            "SELECT id, name, address, interval_ms, created_at FROM targets WHERE id = ?1",
            params![id],
            target_row,
        )
        .optional()?;

    row.map(|row| hydrate(conn, row)).transpose()
}

fn hydrate(conn: &Connection, row: TargetRow) -> Result<Target, DbError> {
    let (id, name, address, interval_ms, created_at) = row;
    let created_at = parse_db_time(&created_at)
        .ok_or_else(|| DbError::Corrupt(format!("bad created_at for {}: {}", id, created_at)))?;
    let interval_ms = u64::try_from(interval_ms)
        .ok()
        .filter(|&ms| ms > 0 && ms <= MAX_INTERVAL_MS)
        .ok_or_else(|| DbError::Corrupt(format!("bad interval_ms for {}: {}", id, interval_ms)))?;
    let history = load_history(conn, &id)?;

    Ok(Target {
        current_status: history.last().cloned(),
        id,
        name,
        address,
        interval_ms,
        created_at,
        history,
    })
}

fn load_history(conn: &Connection, target_id: &str) -> Result<Vec<ProbeResult>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT status, latency_ms, timestamp, error FROM probe_results
         WHERE target_id = ?1 ORDER BY seq DESC LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(params![target_id, MAX_HISTORY as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<SqlResult<Vec<_>>>()?;

    // Rows come back newest first.
    rows.into_iter()
        .rev()
        .map(|(status, latency_ms, timestamp, error)| {
            Ok(ProbeResult {
                status: status.parse().map_err(DbError::Corrupt)?,
                latency_ms: latency_ms.max(0) as u64,
                timestamp: parse_db_time(&timestamp)
                    .ok_or_else(|| DbError::Corrupt(format!("bad timestamp: {}", timestamp)))?,
                error,
            })
        })
        .collect()
}

fn interval_to_db(interval_ms: u64) -> Result<i64, DbError> {
    if interval_ms > MAX_INTERVAL_MS {
        return Err(DbError::IntervalOutOfRange(interval_ms));
    }
    i64::try_from(interval_ms).map_err(|_| DbError::IntervalOutOfRange(interval_ms))
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = ["%Y-%m-%d %H:%M:%S%.9f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::NamedTempFile;
    use tokio_test::assert_ok;

    fn input(address: &str) -> TargetInput {
        TargetInput {
            name: "Test".to_string(),
            address: address.to_string(),
            interval_ms: None,
        }
    }

    fn result(latency_ms: u64) -> ProbeResult {
        ProbeResult {
            status: Status::Healthy,
            latency_ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn test_target_crud() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        // Create
        let target = store.create_target(input("example.com:9999")).unwrap();
        assert!(!target.id.is_empty());
        assert_eq!(target.interval_ms, DEFAULT_INTERVAL_MS);
        assert!(target.current_status.is_none());

        // Read
        let fetched = store.get_target(&target.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Test");
        assert_eq!(fetched.address, "example.com:9999");

        // Update
        let patch = TargetPatch {
            name: Some("Updated".to_string()),
            interval_ms: Some(2000),
            ..Default::default()
        };
        let updated = store.update_target(&target.id, patch).unwrap().unwrap();
        assert_eq!(updated.name, "Updated");
        assert_eq!(updated.interval_ms, 2000);
        assert_eq!(updated.address, "example.com:9999");

        let fetched2 = store.get_target(&target.id).unwrap().unwrap();
        assert_eq!(fetched2.name, "Updated");

        // Delete
        assert!(store.delete_target(&target.id).unwrap());
        assert!(store.get_target(&target.id).unwrap().is_none());
        assert!(!store.delete_target(&target.id).unwrap());
    }

    #[test]
    fn test_zero_interval_falls_back_to_default() {
        let store = Store::open_in_memory().unwrap();
        let target = store
            .create_target(TargetInput {
                interval_ms: Some(0),
                ..input("localhost:80")
            })
            .unwrap();
        assert_eq!(target.interval_ms, DEFAULT_INTERVAL_MS);

        let patch = TargetPatch {
            interval_ms: Some(0),
            ..Default::default()
        };
        let updated = store.update_target(&target.id, patch).unwrap().unwrap();
        assert_eq!(updated.interval_ms, DEFAULT_INTERVAL_MS);
    }

    #[test]
    fn test_update_missing_target() {
        let store = Store::open_in_memory().unwrap();
        let updated = assert_ok!(store.update_target("nope", TargetPatch::default()));
        assert!(updated.is_none());
    }

    #[test]
    fn test_record_result_sets_current_status() {
        let store = Store::open_in_memory().unwrap();
        let target = store.create_target(input("localhost:80")).unwrap();

        let down = ProbeResult {
            status: Status::Down,
            latency_ms: 12,
            timestamp: Utc::now(),
            error: Some("Connection refused".to_string()),
        };
        store.record_result(&target.id, &result(40)).unwrap();
        let updated = store.record_result(&target.id, &down).unwrap().unwrap();

        assert_eq!(updated.history.len(), 2);
        assert_eq!(updated.current_status.as_ref(), updated.history.last());
        assert_eq!(updated.current_status.unwrap().error.as_deref(), Some("Connection refused"));
    }

    #[test]
    fn test_history_is_capped_fifo() {
        let store = Store::open_in_memory().unwrap();
        let target = store.create_target(input("localhost:80")).unwrap();

        let mut last = None;
        for i in 0..(MAX_HISTORY as u64 + 5) {
            last = store.record_result(&target.id, &result(i)).unwrap();
            let len = last.as_ref().unwrap().history.len() as u64;
            assert_eq!(len, (i + 1).min(MAX_HISTORY as u64));
        }

        let target = last.unwrap();
        let latencies: Vec<u64> = target.history.iter().map(|r| r.latency_ms).collect();
        let expected: Vec<u64> = (5..(MAX_HISTORY as u64 + 5)).collect();
        assert_eq!(latencies, expected);
        assert_eq!(target.current_status.unwrap().latency_ms, MAX_HISTORY as u64 + 4);
    }

    #[test]
    fn test_history_keeps_append_order_not_timestamp_order() {
        let store = Store::open_in_memory().unwrap();
        let target = store.create_target(input("localhost:80")).unwrap();

        let later = result(1);
        let earlier = ProbeResult {
            timestamp: later.timestamp - Duration::seconds(5),
            ..result(2)
        };
        store.record_result(&target.id, &later).unwrap();
        let updated = store.record_result(&target.id, &earlier).unwrap().unwrap();

        assert_eq!(updated.history[0].latency_ms, 1);
        assert_eq!(updated.current_status.unwrap().latency_ms, 2);
    }

    #[test]
    fn test_record_result_for_deleted_target_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let target = store.create_target(input("localhost:80")).unwrap();
        store.delete_target(&target.id).unwrap();

        assert!(store.record_result(&target.id, &result(5)).unwrap().is_none());
        assert!(store.history(&target.id).unwrap().is_none());
    }

    #[test]
    fn test_list_targets_includes_history() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_target(input("localhost:80")).unwrap();
        store.create_target(input("localhost:81")).unwrap();
        store.record_result(&a.id, &result(3)).unwrap();

        let targets = store.list_targets().unwrap();
        assert_eq!(targets.len(), 2);
        let a = targets.iter().find(|t| t.id == a.id).unwrap();
        assert_eq!(a.history.len(), 1);
    }

    #[test]
    fn test_store_survives_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let id = {
            let store = Store::new(tmp.path()).unwrap();
            let target = store.create_target(input("localhost:80")).unwrap();
            store.record_result(&target.id, &result(7)).unwrap();
            target.id
        };

        let store = Store::new(tmp.path()).unwrap();
        let history = store.history(&id).unwrap().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].latency_ms, 7);
    }

    #[test]
    fn test_interval_round_trips_or_is_rejected() {
        let store = Store::open_in_memory().unwrap();

        let target = store
            .create_target(TargetInput {
                interval_ms: Some(MAX_INTERVAL_MS),
                ..input("localhost:80")
            })
            .unwrap();
        let reloaded = store.get_target(&target.id).unwrap().unwrap();
        assert_eq!(reloaded.interval_ms, MAX_INTERVAL_MS);

        let too_big = store.create_target(TargetInput {
            interval_ms: Some(u64::MAX),
            ..input("localhost:81")
        });
        assert!(matches!(too_big, Err(DbError::IntervalOutOfRange(u64::MAX))));
        assert_eq!(store.list_targets().unwrap().len(), 1);

        let patch = TargetPatch {
            interval_ms: Some(u64::MAX),
            ..Default::default()
        };
        let updated = store.update_target(&target.id, patch);
        assert!(matches!(updated, Err(DbError::IntervalOutOfRange(_))));
        let reloaded = store.get_target(&target.id).unwrap().unwrap();
        assert_eq!(reloaded.interval_ms, MAX_INTERVAL_MS);
    }

    #[test]
    fn test_concurrent_records_are_neither_lost_nor_duplicated() {
        let store = Store::open_in_memory().unwrap();
        let target = store.create_target(input("localhost:80")).unwrap();

        std::thread::scope(|s| {
            for worker in 0..8u64 {
                let store = store.clone();
                let id = target.id.clone();
                s.spawn(move || {
                    for i in 0..10u64 {
                        store.record_result(&id, &result(worker * 10 + i)).unwrap();
                    }
                });
            }
        });

        let history = store.history(&target.id).unwrap().unwrap();
        assert_eq!(history.len(), 80);

        let mut latencies: Vec<u64> = history.iter().map(|r| r.latency_ms).collect();
        latencies.sort_unstable();
        latencies.dedup();
        assert_eq!(latencies, (0..80).collect::<Vec<u64>>());
    }
}
