//! Service facade backing the transport layer.
//!
//! [`StdfService`] owns one [`JobManager`] (and through it the memory cache),
//! one [`PersistentCache`] and the configuration. Files are addressed by bare
//! filename inside `data.data_dir`.
//!
//! Summary, wafer map and test list go through the persistent cache: the file
//! is hashed, a stored payload is returned when present (and, for summaries,
//! not stale), otherwise the dataset is loaded, the view computed and the
//! payload written back. Two first computations of the same payload may race;
//! the last write wins, which is harmless since payloads are deterministic.

use crate::analytics::{
    self, Summary, TestInfo, TestResultsPage, TestResultsQuery, WaferMap,
};
use crate::collector::Dataset;
use crate::config::AppConfig;
use crate::decoder::{JsonLinesDecoder, RecordDecoder};
use crate::error::{AppResult, StdfError};
use crate::jobs::{JobManager, JobSnapshot};
use crate::persistent_cache::{
    hash_file, CacheStats, CachedFileList, PayloadKind, PersistentCache,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::runtime::Handle;
use tracing::{debug, info};
use uuid::Uuid;

/// One input file in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Bare filename.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub modified: u64,
}

/// Entry point for listing files, running parse jobs and reading analytics.
///
/// Cloning is cheap and shares the job manager and the cache connection.
#[derive(Debug, Clone)]
pub struct StdfService {
    config: Arc<AppConfig>,
    jobs: JobManager,
    cache: PersistentCache,
}

impl StdfService {
    /// Builds a service around an explicit decoder and cache.
    pub fn new(
        config: AppConfig,
        decoder: Arc<dyn RecordDecoder>,
        cache: PersistentCache,
        runtime: Handle,
    ) -> Self {
        Self {
            config: Arc::new(config),
            jobs: JobManager::new(decoder, runtime),
            cache,
        }
    }

    /// Opens the configured SQLite database and decodes with
    /// [`JsonLinesDecoder`].
    pub fn open(config: AppConfig, runtime: Handle) -> AppResult<Self> {
        let cache = PersistentCache::open(&config.cache.database_path)?;
        info!(
            data_dir = %config.data.data_dir.display(),
            database = %config.cache.database_path.display(),
            "STDF service ready"
        );
        Ok(Self::new(config, Arc::new(JsonLinesDecoder), cache, runtime))
    }

    /// Active configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The underlying job manager.
    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Maps a bare filename to its path in the data directory.
    pub fn resolve(&self, filename: &str) -> AppResult<PathBuf> {
        let bare = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && !filename.contains(|c: char| c == '/' || c == '\\');
        let path = self.config.data.data_dir.join(filename);
        if !bare || !path.is_file() {
            return Err(StdfError::NotFound(format!("file {filename} does not exist")));
        }
        Ok(path)
    }

    /// Input files with an accepted extension, sorted by name.
    pub fn list_files(&self) -> AppResult<Vec<FileEntry>> {
        let dir = &self.config.data.data_dir;
        if !dir.is_dir() {
            debug!(data_dir = %dir.display(), "data directory missing, no files");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let metadata = entry.metadata()?;
            if !metadata.is_file() || !self.config.accepts_extension(&path) {
                continue;
            }
            let modified = metadata
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0);
            files.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Starts or joins a background decode of `filename`.
    pub fn submit(&self, filename: &str) -> AppResult<JobSnapshot> {
        self.jobs.submit(&self.resolve(filename)?)
    }

    /// Current state of a parse job.
    pub fn poll(&self, job_id: Uuid) -> AppResult<JobSnapshot> {
        self.jobs.poll(job_id)
    }

    /// Yield summary, served from the persistent cache when current.
    pub fn summary(&self, filename: &str) -> AppResult<Summary> {
        let top = self.config.analytics.top_failed_tests;
        self.cached_view(
            filename,
            PayloadKind::Summary,
            |summary: &Summary| !summary.is_stale(),
            |ds| analytics::summarize(ds, top),
        )
    }

    /// One die per part result.
    pub fn wafer_map(&self, filename: &str) -> AppResult<WaferMap> {
        self.cached_view(filename, PayloadKind::WaferMap, |_| true, analytics::wafer_map)
    }

    /// Per-test statistics, highest fail rate first.
    pub fn test_list(&self, filename: &str) -> AppResult<Vec<TestInfo>> {
        self.cached_view(filename, PayloadKind::TestList, |_| true, analytics::test_list)
    }

    /// Always computed from the dataset; pages are not persisted.
    pub fn test_results(
        &self,
        filename: &str,
        query: &TestResultsQuery,
    ) -> AppResult<TestResultsPage> {
        query.validate(self.config.analytics.max_page_size)?;
        let path = self.resolve(filename)?;
        let loaded = self.jobs.load(&path)?;
        Ok(analytics::test_results(&loaded.dataset, query))
    }

    /// A query with the configured default page size.
    pub fn default_query(&self) -> TestResultsQuery {
        TestResultsQuery {
            page_size: self.config.analytics.default_page_size,
            ..Default::default()
        }
    }

    /// Persistent cache totals.
    pub fn stats(&self) -> AppResult<CacheStats> {
        self.cache.stats()
    }

    /// Cached file records, most recently accessed first.
    pub fn list_cached(&self, limit: usize, offset: usize) -> AppResult<CachedFileList> {
        self.cache.list_cached(limit, offset)
    }

    /// Removes one cached file and its payloads.
    pub fn delete_cached(&self, file_id: i64) -> AppResult<()> {
        self.cache.delete_cached(file_id)
    }

    /// Empties the persistent cache; returns the number of files removed.
    pub fn clear_all(&self) -> AppResult<u64> {
        self.cache.clear_all()
    }

    fn cached_view<T, F>(
        &self,
        filename: &str,
        kind: PayloadKind,
        is_fresh: impl Fn(&T) -> bool,
        compute: F,
    ) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&Dataset) -> T,
    {
        let path = self.resolve(filename)?;
        let file_hash = hash_file(&path)?;

        if let Some(record) = self.cache.file_by_hash(&file_hash)? {
            match self.cache.load_payload::<T>(record.id, kind)? {
                Some(payload) if is_fresh(&payload) => {
                    debug!(%file_hash, kind = kind.as_str(), "persistent cache hit");
                    return Ok(payload);
                }
                Some(_) => info!(%file_hash, kind = kind.as_str(), "stale payload, recomputing"),
                None => {}
            }
        }

        let loaded = self.jobs.load(&path)?;
        let payload = compute(&loaded.dataset);
        let file_size = std::fs::metadata(&path)?.len();
        let record =
            self.cache
                .save_file_record(&file_hash, filename, file_size, loaded.parse_time)?;
        self.cache.save_payload(record.id, kind, &payload)?;
        debug!(%file_hash, kind = kind.as_str(), file_id = record.id, "payload computed and stored");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::SUMMARY_VERSION;
    use crate::decoder::RecordSink;
    use std::io::Read;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const LOT: &str = concat!(
        "{\"kind\":\"WIR\",\"fields\":{\"WAFER_ID\":\"W01\"}}\n",
        "{\"kind\":\"PTR\",\"fields\":{\"TEST_NUM\":10,\"SITE_NUM\":1,\"RESULT\":5.0,\"LO_LIMIT\":6.0,\"HI_LIMIT\":10.0,\"TEST_TXT\":\"VDD\"}}\n",
        "{\"kind\":\"PRR\",\"fields\":{\"SITE_NUM\":1,\"HARD_BIN\":5,\"X_COORD\":3,\"Y_COORD\":4}}\n",
        "{\"kind\":\"PTR\",\"fields\":{\"TEST_NUM\":10,\"SITE_NUM\":1,\"RESULT\":7.0,\"LO_LIMIT\":6.0,\"HI_LIMIT\":10.0,\"TEST_TXT\":\"VDD\"}}\n",
        "{\"kind\":\"PRR\",\"fields\":{\"SITE_NUM\":1,\"HARD_BIN\":1,\"X_COORD\":3,\"Y_COORD\":5}}\n",
    );

    #[derive(Default)]
    struct CountingDecoder(AtomicUsize);

    impl RecordDecoder for CountingDecoder {
        fn decode(&self, input: &mut dyn Read, sink: &mut dyn RecordSink) -> AppResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            JsonLinesDecoder.decode(input, sink)
        }
    }

    fn service(dir: &Path, decoder: Arc<CountingDecoder>) -> StdfService {
        let mut config = AppConfig::default();
        config.data.data_dir = dir.to_path_buf();
        StdfService::new(
            config,
            decoder,
            PersistentCache::in_memory().unwrap(),
            Handle::current(),
        )
    }

    fn data_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lot1.stdf"), LOT).unwrap();
        dir
    }

    #[tokio::test]
    async fn summary_is_persisted_and_reused() {
        let dir = data_dir();
        let decoder = Arc::new(CountingDecoder::default());
        let service = service(dir.path(), decoder.clone());

        let first = service.summary("lot1.stdf").unwrap();
        assert_eq!(first.summary_version, SUMMARY_VERSION);
        assert_eq!(first.total_parts, 2);
        assert_eq!(first.yield_rate, 50.0);
        let bin5 = first.hbin_details.iter().find(|b| b.bin_num == 5).unwrap();
        assert_eq!(bin5.failed_tests, ["VDD"]);

        let second = service.summary("lot1.stdf").unwrap();
        assert_eq!(first, second);
        assert_eq!(decoder.0.load(Ordering::SeqCst), 1);

        let stats = service.stats().unwrap();
        assert_eq!(stats.total_cached_files, 1);
        assert_eq!(stats.total_data_records, 1);
    }

    #[tokio::test]
    async fn stale_summary_is_recomputed() {
        let dir = data_dir();
        let service = service(dir.path(), Arc::new(CountingDecoder::default()));

        let mut old = service.summary("lot1.stdf").unwrap();
        old.summary_version = 1;
        old.total_parts = 999;
        let hash = hash_file(&dir.path().join("lot1.stdf")).unwrap();
        let record = service.cache.file_by_hash(&hash).unwrap().unwrap();
        service
            .cache
            .save_payload(record.id, PayloadKind::Summary, &old)
            .unwrap();

        let fresh = service.summary("lot1.stdf").unwrap();
        assert_eq!(fresh.total_parts, 2);
        assert_eq!(fresh.summary_version, SUMMARY_VERSION);
    }

    #[tokio::test]
    async fn views_share_one_file_record() {
        let dir = data_dir();
        let service = service(dir.path(), Arc::new(CountingDecoder::default()));

        let map = service.wafer_map("lot1.stdf").unwrap();
        assert_eq!(map.wafer_id, "W01");
        assert_eq!(map.total_dies, 2);
        let tests = service.test_list("lot1.stdf").unwrap();
        assert_eq!(tests[0].fail_rate, 50.0);

        let cached = service.list_cached(10, 0).unwrap();
        assert_eq!(cached.total, 1);
        assert_eq!(cached.files[0].filename, "lot1.stdf");
        assert!(cached.files[0].parse_time.is_some());
        assert_eq!(service.stats().unwrap().total_data_records, 2);
    }

    #[tokio::test]
    async fn test_results_validates_paging() {
        let dir = data_dir();
        let service = service(dir.path(), Arc::new(CountingDecoder::default()));

        let page = service
            .test_results("lot1.stdf", &service.default_query())
            .unwrap();
        assert_eq!(page.total, 2);

        let query = TestResultsQuery {
            page_size: 5001,
            ..Default::default()
        };
        assert!(matches!(
            service.test_results("lot1.stdf", &query),
            Err(StdfError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn resolve_rejects_paths_and_missing_files() {
        let dir = data_dir();
        let service = service(dir.path(), Arc::new(CountingDecoder::default()));

        assert!(service.resolve("lot1.stdf").is_ok());
        assert!(service.resolve("missing.stdf").unwrap_err().is_not_found());
        assert!(service.resolve("../lot1.stdf").unwrap_err().is_not_found());
        assert!(service.resolve("").unwrap_err().is_not_found());
        assert!(service.summary("missing.stdf").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_files_filters_by_extension() {
        let dir = data_dir();
        std::fs::write(dir.path().join("a.STD"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub.stdf")).unwrap();
        let service = service(dir.path(), Arc::new(CountingDecoder::default()));

        let names: Vec<String> = service
            .list_files()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["a.STD", "lot1.stdf"]);
    }

    #[tokio::test]
    async fn missing_data_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir.path().join("nope"), Arc::new(CountingDecoder::default()));
        assert!(service.list_files().unwrap().is_empty());
    }
}
