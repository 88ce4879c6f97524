//! # SQLite Run Store
//!
//! Run history and user settings in a single SQLite database.
//!
//! ## Tables
//!
//! 1. **`run_table`** - one row per completed run; identifiers come from
//!    `AUTOINCREMENT` and are never reused after a delete.
//! 2. **`user_settings`** - key/value rows; the runner profile is stored as
//!    a JSON document under the `user` key.

use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, TrackerError};
use crate::settings::{SettingsStore, UserSettings};
use crate::store::{RunRecord, RunStore, SortType};

const USER_SETTINGS_KEY: &str = "user";

const RUN_COLUMNS: &str =
    "id, img, timestamp, avg_speed_kmh, distance_meters, time_in_millis, calories_burned";

/// Run store backed by SQLite.
pub struct SqliteRunStore {
    /// Database connection
    db: Mutex<Connection>,

    /// Database path (":memory:" for in-memory databases)
    db_path: String,
}

impl SqliteRunStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the database at the given path.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[RunStore] Opened run database at {}", db_path);

        Ok(Self {
            db: Mutex::new(db),
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Completed runs
            CREATE TABLE IF NOT EXISTS run_table (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                img BLOB,
                timestamp INTEGER NOT NULL,
                avg_speed_kmh REAL NOT NULL,
                distance_meters INTEGER NOT NULL,
                time_in_millis INTEGER NOT NULL,
                calories_burned INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_run_timestamp ON run_table(timestamp);
            CREATE INDEX IF NOT EXISTS idx_run_distance ON run_table(distance_meters);

            -- User settings (name, weight, first-run flag)
            CREATE TABLE IF NOT EXISTS user_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| TrackerError::lock_poisoned("run database"))
    }

    fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: Some(row.get(0)?),
            img: row.get(1)?,
            timestamp: row.get(2)?,
            avg_speed_kmh: row.get::<_, f64>(3)? as f32,
            distance_meters: row.get(4)?,
            time_in_millis: row.get(5)?,
            calories_burned: row.get(6)?,
        })
    }

    fn order_by(sort: SortType) -> &'static str {
        match sort {
            SortType::Date => "timestamp DESC, id DESC",
            SortType::RunningTime => "time_in_millis DESC, id DESC",
            SortType::Calories => "calories_burned DESC, id DESC",
            SortType::AvgSpeed => "avg_speed_kmh DESC, id DESC",
            SortType::Distance => "distance_meters DESC, id DESC",
        }
    }

    fn query_sum(&self, column: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let sum = conn.query_row(
            &format!("SELECT SUM({}) FROM run_table", column),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(sum)
    }
}

impl RunStore for SqliteRunStore {
    fn insert_run(&self, mut run: RunRecord) -> Result<RunRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO run_table
                (img, timestamp, avg_speed_kmh, distance_meters, time_in_millis, calories_burned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.img,
                run.timestamp,
                run.avg_speed_kmh as f64,
                run.distance_meters,
                run.time_in_millis,
                run.calories_burned,
            ],
        )?;
        let id = conn.last_insert_rowid();
        run.id = Some(id);

        info!(
            "[RunStore] Inserted run {} ({}m, {}ms)",
            id, run.distance_meters, run.time_in_millis
        );
        Ok(run)
    }

    fn delete_run(&self, run: &RunRecord) -> Result<bool> {
        let Some(id) = run.id else {
            debug!("[RunStore] Delete of unsaved run ignored");
            return Ok(false);
        };

        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM run_table WHERE id = ?", params![id])?;
        if removed > 0 {
            info!("[RunStore] Deleted run {}", id);
        }
        Ok(removed > 0)
    }

    fn runs_sorted(&self, sort: SortType) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM run_table ORDER BY {}",
            RUN_COLUMNS,
            Self::order_by(sort)
        ))?;
        let runs = stmt
            .query_map([], Self::run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn total_time_in_millis(&self) -> Result<Option<i64>> {
        self.query_sum("time_in_millis")
    }

    fn total_calories_burned(&self) -> Result<Option<i64>> {
        self.query_sum("calories_burned")
    }

    fn total_distance(&self) -> Result<Option<i64>> {
        self.query_sum("distance_meters")
    }

    fn total_avg_speed(&self) -> Result<Option<f32>> {
        let conn = self.conn()?;
        let avg = conn.query_row("SELECT AVG(avg_speed_kmh) FROM run_table", [], |row| {
            row.get::<_, Option<f64>>(0)
        })?;
        Ok(avg.map(|v| v as f32))
    }

    fn run_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM run_table", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl SettingsStore for SqliteRunStore {
    fn load_settings(&self) -> Result<UserSettings> {
        let conn = self.conn()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM user_settings WHERE key = ?",
                params![USER_SETTINGS_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(UserSettings::default()),
        }
    }

    fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        settings.validate()?;
        let json = serde_json::to_string(settings)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO user_settings (key, value) VALUES (?, ?)",
            params![USER_SETTINGS_KEY, json],
        )?;
        info!(
            "[RunStore] Saved settings for '{}' ({}kg)",
            settings.name, settings.weight_kg
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, feature = "persistence"))]
mod tests {
    use super::*;
    use crate::store::tests::{check_store_contract, sample_run};

    #[test]
    fn test_create_store() {
        let store = SqliteRunStore::in_memory().unwrap();
        assert_eq!(store.run_count().unwrap(), 0);
        assert_eq!(store.db_path(), ":memory:");
    }

    #[test]
    fn test_sqlite_store_contract() {
        check_store_contract(&SqliteRunStore::in_memory().unwrap());
    }

    #[test]
    fn test_image_round_trip() {
        let store = SqliteRunStore::in_memory().unwrap();
        let mut run = sample_run(1, 2_000, 600_000, 12.0);
        run.img = Some(vec![0x89, b'P', b'N', b'G']);

        let saved = store.insert_run(run).unwrap();
        let loaded = store.runs_sorted_by_date().unwrap();
        assert_eq!(loaded, vec![saved]);
    }

    #[test]
    fn test_persistence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("runs.db");
        let path = path.to_str().unwrap();

        let deleted_id = {
            let store = SqliteRunStore::new(path).unwrap();
            store
                .save_settings(&UserSettings::new("Alex", 68.0))
                .unwrap();
            store.insert_run(sample_run(1, 3_000, 900_000, 12.0)).unwrap();
            let newest = store.insert_run(sample_run(2, 5_000, 1_800_000, 10.0)).unwrap();
            store.delete_run(&newest).unwrap();
            newest.id.unwrap()
        };

        // Reopen and verify
        let store = SqliteRunStore::new(path).unwrap();
        assert_eq!(store.run_count().unwrap(), 1);
        assert_eq!(store.total_distance().unwrap(), Some(3_000));
        assert_eq!(store.load_settings().unwrap().weight_kg, 68.0);

        // The highest identifier was deleted; it is still not handed out again
        let next = store.insert_run(sample_run(3, 1, 1, 1.0)).unwrap();
        assert!(next.id.unwrap() > deleted_id);
    }

    #[test]
    fn test_settings_defaults_and_validation() {
        let store = SqliteRunStore::in_memory().unwrap();
        assert_eq!(store.load_settings().unwrap(), UserSettings::default());

        assert!(store.save_settings(&UserSettings::new("Alex", -1.0)).is_err());
        assert_eq!(store.load_settings().unwrap(), UserSettings::default());

        let mut settings = UserSettings::new("Alex", 75.0);
        store.save_settings(&settings).unwrap();
        settings.weight_kg = 74.0;
        store.save_settings(&settings).unwrap();
        assert_eq!(store.load_settings().unwrap(), settings);
    }
}
