use crate::types::{DetectionEvent, NewDetection};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS detection (
    id TEXT NOT NULL PRIMARY KEY,
    plate TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_detection_plate_timestamp ON detection(plate, timestamp);
"#;

const COLUMNS: &str = "id, plate, timestamp, source, created_at";

/// Storage for sightings awaiting their pair.
///
/// Each call is atomic on its own; a sequence of calls is not.
pub trait Store: Send + Sync {
    fn find_exact_duplicate(
        &self,
        plate: &str,
        timestamp: &str,
    ) -> Result<Option<DetectionEvent>>;

    /// Most recently inserted sighting for `plate`, whatever its timestamp.
    fn find_any_by_plate(&self, plate: &str) -> Result<Option<DetectionEvent>>;

    fn delete(&self, event: &DetectionEvent) -> Result<()>;

    /// Assigns an id and creation time and returns the stored copy.
    fn insert(&self, detection: NewDetection) -> Result<DetectionEvent>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SqliteStore> {
        SqliteStore::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<SqliteStore> {
        SqliteStore::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<SqliteStore> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Statements apply whole; a poisoned lock still guards a usable connection.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn count_by_plate(&self, plate: &str) -> i64 {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM detection WHERE plate = ?1",
                params![plate],
                |row| row.get(0),
            )
            .unwrap()
    }
}

fn from_row(row: &Row) -> Result<DetectionEvent> {
    Ok(DetectionEvent {
        id: row.get(0)?,
        plate: row.get(1)?,
        timestamp: row.get(2)?,
        source: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Store for SqliteStore {
    fn find_exact_duplicate(
        &self,
        plate: &str,
        timestamp: &str,
    ) -> Result<Option<DetectionEvent>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {} FROM detection WHERE plate = ?1 AND timestamp = ?2 LIMIT 1",
                    COLUMNS
                ),
                params![plate, timestamp],
                from_row,
            )
            .optional()
    }

    fn find_any_by_plate(&self, plate: &str) -> Result<Option<DetectionEvent>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {} FROM detection WHERE plate = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    COLUMNS
                ),
                params![plate],
                from_row,
            )
            .optional()
    }

    fn delete(&self, event: &DetectionEvent) -> Result<()> {
        let deleted = self
            .conn()
            .execute("DELETE FROM detection WHERE id = ?1", params![event.id])?;
        debug!("Deleted {} row(s) for sighting {}", deleted, event.id);
        Ok(())
    }

    fn insert(&self, detection: NewDetection) -> Result<DetectionEvent> {
        let event = DetectionEvent {
            id: Uuid::new_v4().simple().to_string(),
            plate: detection.plate,
            timestamp: detection.timestamp,
            source: detection.source,
            created_at: now(),
        };
        self.conn().execute(
            "INSERT INTO detection (id, plate, timestamp, source, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id,
                event.plate,
                event.timestamp,
                event.source,
                event.created_at
            ],
        )?;
        Ok(event)
    }
}
