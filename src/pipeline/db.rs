//! SQLite storage: device catalog and idempotent sample writes
//!
//! Tables (see `/sql/`):
//! - `device` - one row per polled device, with cron schedule and JSON config
//! - `sensor` - one row per sensor, with compaction settings
//! - `sample` - readings, unique on `(sensor_id, time)`
//!
//! Sample writes use `ON CONFLICT(sensor_id, time) DO NOTHING`, so re-storing
//! a reading that is already present is a silent no-op.

use super::error::StoreError;
use super::types::{DeviceId, Sample};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Persistence collaborator of the poll pipeline
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Bulk store samples in one batch
    ///
    /// Must be idempotent on `(sensor id, timestamp)`: a pair that is already
    /// stored is neither duplicated nor reported as an error.
    async fn store_samples(&self, samples: &[Sample]) -> Result<(), StoreError>;
}

/// Raw `device` row, parsed into a `Device` by the catalog loader
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub cron: String,
    pub config: String,
}

/// Raw `sensor` row, parsed into a `Sensor` by the catalog loader
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRow {
    pub id: i64,
    pub device_id: i64,
    pub name: String,
    pub unit: String,
    pub config: String,
    pub compact: bool,
    pub max_unchanged_secs: Option<i64>,
}

/// Read access to the device/sensor definitions
pub trait DeviceCatalog {
    fn list_devices(&self) -> Result<Vec<DeviceRow>, StoreError>;

    fn get_device(&self, id: DeviceId) -> Result<Option<DeviceRow>, StoreError>;

    fn list_sensors(&self, device: DeviceId) -> Result<Vec<SensorRow>, StoreError>;
}

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` in name order and executes them.
/// Every file must use `IF NOT EXISTS` clauses so this can run on each start.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &Path) -> Result<(), StoreError> {
    if !schema_dir.exists() {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Schema directory not found: {}", schema_dir.display()),
        )));
    }

    let mut sql_files: Vec<_> = fs::read_dir(schema_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("Running schema migrations from {}", schema_dir.display());

    for entry in sql_files {
        let path = entry.path();
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
        log::debug!("Applied {}", path.display());
    }

    Ok(())
}

/// SQLite implementation of both `SampleStore` and `DeviceCatalog`
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Apply the schema files in `schema_dir`
    pub fn migrate(&self, schema_dir: &Path) -> Result<(), StoreError> {
        let mut conn = self.lock();
        run_schema_migrations(&mut conn, schema_dir)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // rusqlite leaves the connection usable after a panic elsewhere
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a closure against the connection (used by tools and tests)
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self.lock();
        Ok(f(&conn)?)
    }

    fn map_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRow> {
        Ok(DeviceRow {
            id: row.get("id")?,
            name: row.get("name")?,
            kind: row.get("type")?,
            cron: row.get("cron")?,
            config: row.get("config")?,
        })
    }
}

impl DeviceCatalog for SqliteStore {
    fn list_devices(&self) -> Result<Vec<DeviceRow>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, name, type, cron, config FROM device ORDER BY id")?;
        let rows = stmt
            .query_map([], Self::map_device)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn get_device(&self, id: DeviceId) -> Result<Option<DeviceRow>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, name, type, cron, config FROM device WHERE id = ?1",
                [id.0],
                Self::map_device,
            )
            .optional()?;
        Ok(row)
    }

    fn list_sensors(&self, device: DeviceId) -> Result<Vec<SensorRow>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, device_id, name, unit, config, compact, max_unchanged_secs
             FROM sensor WHERE device_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([device.0], |row| {
                Ok(SensorRow {
                    id: row.get("id")?,
                    device_id: row.get("device_id")?,
                    name: row.get("name")?,
                    unit: row.get("unit")?,
                    config: row.get("config")?,
                    compact: row.get("compact")?,
                    max_unchanged_secs: row.get("max_unchanged_secs")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl SampleStore for SqliteStore {
    async fn store_samples(&self, samples: &[Sample]) -> Result<(), StoreError> {
        if samples.is_empty() {
            return Ok(());
        }

        let rows: Vec<(i64, i64, String)> = samples
            .iter()
            .map(|s| (s.sensor.id.0, s.timestamp.timestamp_millis(), s.value.to_string()))
            .collect();

        let store = self.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = store.lock();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO sample (sensor_id, time, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT (sensor_id, time) DO NOTHING",
                )?;
                for (sensor_id, time, value) in &rows {
                    stmt.execute(params![sensor_id, time, value])?;
                }
            }
            tx.commit()?;

            log::debug!("Stored batch of {} samples", rows.len());
            Ok(())
        })
        .await?
    }
}
