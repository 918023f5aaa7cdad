//! Durable, content-addressed cache of computed analytics payloads.
//!
//! Files are identified by the SHA-256 of their full content, never by path: a
//! renamed or copied file with identical bytes hits, an edited one misses. Each
//! file record owns at most one payload row per [`PayloadKind`]; saving replaces
//! the row, reading it refreshes the owner's `last_accessed` timestamp.
//!
//! There is no expiry. Rows leave only through [`PersistentCache::delete_cached`]
//! or [`PersistentCache::clear_all`].
//!
//! Backed by SQLite through `rusqlite`. The schema is created on open:
//!
//! ```text
//! stdf_files(id, file_hash UNIQUE, filename, file_size, upload_time, parse_time, last_accessed)
//! stdf_data(id, file_id -> stdf_files ON DELETE CASCADE, data_type, data_json, created_at,
//!           UNIQUE(file_id, data_type))
//! ```

use crate::error::{AppResult, StdfError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn hash_file(path: &Path) -> AppResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut block = [0u8; 4096];
    loop {
        let n = file.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Which analytics view a payload row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// [`Summary`](crate::analytics::Summary) JSON.
    Summary,
    /// [`WaferMap`](crate::analytics::WaferMap) JSON.
    WaferMap,
    /// Test list JSON.
    TestList,
}

impl PayloadKind {
    /// Value stored in `stdf_data.data_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadKind::Summary => "summary",
            PayloadKind::WaferMap => "wafer_map",
            PayloadKind::TestList => "test_list",
        }
    }
}

/// One cached file record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFile {
    /// Row id, used by `delete_cached`.
    pub id: i64,
    /// SHA-256 of the file contents, lowercase hex.
    pub file_hash: String,
    /// Name the file was last saved under.
    pub filename: String,
    /// Size in bytes.
    pub file_size: u64,
    /// First save.
    pub upload_time: DateTime<Utc>,
    /// Seconds spent decoding the file, when known.
    pub parse_time: Option<f64>,
    /// Last save or payload read.
    pub last_accessed: DateTime<Utc>,
}

impl CachedFile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            file_hash: row.get(1)?,
            filename: row.get(2)?,
            file_size: row.get::<_, i64>(3)? as u64,
            upload_time: row.get(4)?,
            parse_time: row.get(5)?,
            last_accessed: row.get(6)?,
        })
    }
}

const FILE_COLUMNS: &str =
    "id, file_hash, filename, file_size, upload_time, parse_time, last_accessed";

/// One page of cached file records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFileList {
    /// Most recently accessed first.
    pub files: Vec<CachedFile>,
    /// All file records, independent of limit/offset.
    pub total: u64,
}

/// Cache-wide totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Rows in `stdf_files`.
    pub total_cached_files: u64,
    /// Rows in `stdf_data`.
    pub total_data_records: u64,
    /// Sum of `file_size` over all files.
    pub total_file_size: u64,
}

/// SQLite-backed payload cache. Cloning shares the connection.
#[derive(Debug, Clone)]
pub struct PersistentCache {
    conn: Arc<Mutex<Connection>>,
}

impl PersistentCache {
    /// Opens (creating if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let cache = Self::with_connection(Connection::open(path)?)?;
        info!(path = %path.display(), "Opened persistent cache");
        Ok(cache)
    }

    /// Private in-memory database, for tests and throwaway sessions.
    pub fn in_memory() -> AppResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> AppResult<Self> {
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.migrate()?;
        Ok(cache)
    }

    fn migrate(&self) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS stdf_files (
                id INTEGER PRIMARY KEY,
                file_hash TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                upload_time TEXT NOT NULL,
                parse_time REAL,
                last_accessed TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS ix_stdf_files_hash ON stdf_files(file_hash);

            CREATE TABLE IF NOT EXISTS stdf_data (
                id INTEGER PRIMARY KEY,
                file_id INTEGER NOT NULL REFERENCES stdf_files(id) ON DELETE CASCADE,
                data_type TEXT NOT NULL,
                data_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(file_id, data_type)
            );

            CREATE INDEX IF NOT EXISTS ix_file_type ON stdf_data(file_id, data_type);
            "#,
        )?;
        debug!("Persistent cache schema ready");
        Ok(())
    }

    /// Looks a file record up by content hash.
    pub fn file_by_hash(&self, file_hash: &str) -> AppResult<Option<CachedFile>> {
        let conn = self.conn.lock();
        let file = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM stdf_files WHERE file_hash = ?1"),
                [file_hash],
                CachedFile::from_row,
            )
            .optional()?;
        Ok(file)
    }

    /// Inserts a file record, or refreshes the existing one for this hash
    /// (filename, last access, and parse time when given).
    pub fn save_file_record(
        &self,
        file_hash: &str,
        filename: &str,
        file_size: u64,
        parse_time: Option<f64>,
    ) -> AppResult<CachedFile> {
        let now = Utc::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE stdf_files
                SET filename = ?2, last_accessed = ?3, parse_time = COALESCE(?4, parse_time)
              WHERE file_hash = ?1",
            params![file_hash, filename, now, parse_time],
        )?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO stdf_files
                    (file_hash, filename, file_size, upload_time, parse_time, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?4)",
                params![file_hash, filename, file_size as i64, now, parse_time],
            )?;
        }
        let file = tx.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM stdf_files WHERE file_hash = ?1"),
            [file_hash],
            CachedFile::from_row,
        )?;
        tx.commit()?;
        Ok(file)
    }

    /// Reads one payload and bumps the owner's `last_accessed`.
    ///
    /// A row that no longer deserialises into `T` is reported as a miss.
    pub fn load_payload<T: DeserializeOwned>(
        &self,
        file_id: i64,
        kind: PayloadKind,
    ) -> AppResult<Option<T>> {
        let json: Option<String> = {
            let conn = self.conn.lock();
            let json = conn
                .query_row(
                    "SELECT data_json FROM stdf_data WHERE file_id = ?1 AND data_type = ?2",
                    params![file_id, kind.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if json.is_some() {
                conn.execute(
                    "UPDATE stdf_files SET last_accessed = ?2 WHERE id = ?1",
                    params![file_id, Utc::now()],
                )?;
            }
            json
        };

        let Some(json) = json else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                warn!(file_id, kind = kind.as_str(), error = %e, "Discarding unreadable cached payload");
                Ok(None)
            }
        }
    }

    /// Stores a payload, replacing any previous row of the same kind.
    pub fn save_payload<T: Serialize>(
        &self,
        file_id: i64,
        kind: PayloadKind,
        payload: &T,
    ) -> AppResult<()> {
        let json = serde_json::to_string(payload)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM stdf_data WHERE file_id = ?1 AND data_type = ?2",
            params![file_id, kind.as_str()],
        )?;
        tx.execute(
            "INSERT INTO stdf_data (file_id, data_type, data_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![file_id, kind.as_str(), json, Utc::now()],
        )?;
        tx.commit()?;
        debug!(file_id, kind = kind.as_str(), bytes = json.len(), "Cached payload");
        Ok(())
    }

    /// File records, most recently accessed first.
    pub fn list_cached(&self, limit: usize, offset: usize) -> AppResult<CachedFileList> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM stdf_files
              ORDER BY last_accessed DESC, id DESC
              LIMIT ?1 OFFSET ?2"
        ))?;
        let files = stmt
            .query_map(params![limit as i64, offset as i64], CachedFile::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM stdf_files", [], |row| row.get(0))?;
        Ok(CachedFileList {
            files,
            total: total as u64,
        })
    }

    /// Removes one file record and its payloads.
    pub fn delete_cached(&self, file_id: i64) -> AppResult<()> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM stdf_files WHERE id = ?1", [file_id])?;
        if removed == 0 {
            return Err(StdfError::NotFound(format!("cached file {file_id}")));
        }
        info!(file_id, "Deleted cached file");
        Ok(())
    }

    /// Removes everything. Returns the number of file records removed.
    pub fn clear_all(&self) -> AppResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM stdf_data", [])?;
        let removed = tx.execute("DELETE FROM stdf_files", [])?;
        tx.commit()?;
        info!(removed, "Cleared persistent cache");
        Ok(removed as u64)
    }

    /// Counts files and payloads and sums file sizes.
    pub fn stats(&self) -> AppResult<CacheStats> {
        let conn = self.conn.lock();
        let (files, size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM stdf_files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let records: i64 = conn.query_row("SELECT COUNT(*) FROM stdf_data", [], |row| row.get(0))?;
        Ok(CacheStats {
            total_cached_files: files as u64,
            total_data_records: records as u64,
            total_file_size: size as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        value: u32,
    }

    #[test]
    fn hash_is_content_based() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.stdf");
        let b = dir.path().join("renamed.stdf");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        let hash = hash_file(&a).unwrap();
        assert_eq!(hash, hash_file(&b).unwrap());
        assert_eq!(hash.len(), 64);

        std::fs::write(&b, b"other bytes").unwrap();
        assert_ne!(hash, hash_file(&b).unwrap());
    }

    #[test]
    fn save_file_record_upserts_by_hash() {
        let cache = PersistentCache::in_memory().unwrap();
        let first = cache.save_file_record("abc", "lot1.stdf", 10, Some(1.5)).unwrap();
        let second = cache.save_file_record("abc", "copy.stdf", 10, None).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.filename, "copy.stdf");
        assert_eq!(second.parse_time, Some(1.5));
        assert_eq!(cache.stats().unwrap().total_cached_files, 1);
    }

    #[test]
    fn payload_save_replaces_previous_row() {
        let cache = PersistentCache::in_memory().unwrap();
        let file = cache.save_file_record("h", "f.stdf", 1, None).unwrap();
        cache.save_payload(file.id, PayloadKind::Summary, &Payload { value: 1 }).unwrap();
        cache.save_payload(file.id, PayloadKind::Summary, &Payload { value: 2 }).unwrap();
        cache.save_payload(file.id, PayloadKind::TestList, &Payload { value: 3 }).unwrap();

        let summary: Option<Payload> = cache.load_payload(file.id, PayloadKind::Summary).unwrap();
        assert_eq!(summary, Some(Payload { value: 2 }));
        assert_eq!(cache.stats().unwrap().total_data_records, 2);

        let missing: Option<Payload> = cache.load_payload(file.id, PayloadKind::WaferMap).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn reading_a_payload_bumps_last_accessed() {
        let cache = PersistentCache::in_memory().unwrap();
        let older = cache.save_file_record("h1", "old.stdf", 1, None).unwrap();
        cache.save_payload(older.id, PayloadKind::WaferMap, &Payload { value: 0 }).unwrap();
        sleep(Duration::from_millis(5));
        cache.save_file_record("h2", "new.stdf", 1, None).unwrap();

        let listed = cache.list_cached(10, 0).unwrap();
        assert_eq!(listed.files[0].filename, "new.stdf");

        sleep(Duration::from_millis(5));
        let _: Option<Payload> = cache.load_payload(older.id, PayloadKind::WaferMap).unwrap();
        let listed = cache.list_cached(10, 0).unwrap();
        assert_eq!(listed.files[0].filename, "old.stdf");
        assert!(listed.files[0].last_accessed > older.last_accessed);
    }

    #[test]
    fn unreadable_payload_is_a_miss() {
        let cache = PersistentCache::in_memory().unwrap();
        let file = cache.save_file_record("h", "f.stdf", 1, None).unwrap();
        cache.save_payload(file.id, PayloadKind::Summary, &"not a struct").unwrap();
        let loaded: Option<Payload> = cache.load_payload(file.id, PayloadKind::Summary).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn delete_cascades_and_unknown_id_is_not_found() {
        let cache = PersistentCache::in_memory().unwrap();
        let file = cache.save_file_record("h", "f.stdf", 7, None).unwrap();
        cache.save_payload(file.id, PayloadKind::Summary, &Payload { value: 1 }).unwrap();

        cache.delete_cached(file.id).unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_cached_files, 0);
        assert_eq!(stats.total_data_records, 0);

        let err = cache.delete_cached(file.id).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn clear_all_reports_removed_files() {
        let cache = PersistentCache::in_memory().unwrap();
        for hash in ["a", "b", "c"] {
            let file = cache.save_file_record(hash, "f.stdf", 100, None).unwrap();
            cache.save_payload(file.id, PayloadKind::TestList, &Payload { value: 0 }).unwrap();
        }
        assert_eq!(cache.stats().unwrap().total_file_size, 300);
        assert_eq!(cache.clear_all().unwrap(), 3);
        assert_eq!(
            cache.stats().unwrap(),
            CacheStats {
                total_cached_files: 0,
                total_data_records: 0,
                total_file_size: 0,
            }
        );
    }

    #[test]
    fn list_cached_pages_with_total() {
        let cache = PersistentCache::in_memory().unwrap();
        for hash in ["a", "b", "c"] {
            cache.save_file_record(hash, hash, 1, None).unwrap();
        }
        let page = cache.list_cached(2, 2).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.files.len(), 1);
    }

    #[test]
    fn reopening_a_database_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        {
            let cache = PersistentCache::open(&path).unwrap();
            cache.save_file_record("h", "f.stdf", 1, Some(0.25)).unwrap();
        }
        let cache = PersistentCache::open(&path).unwrap();
        let file = cache.file_by_hash("h").unwrap().unwrap();
        assert_eq!(file.parse_time, Some(0.25));
    }
}
