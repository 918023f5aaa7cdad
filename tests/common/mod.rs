//! Shared fixtures for integration tests.

#![allow(dead_code)]

use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stdf_analytics::config::AppConfig;
use stdf_analytics::decoder::{JsonLinesDecoder, RecordDecoder, RecordSink};
use stdf_analytics::persistent_cache::PersistentCache;
use stdf_analytics::{AppResult, StdfService};
use tokio::runtime::Handle;

/// JSON-lines decoder that counts how often it runs.
#[derive(Default)]
pub struct CountingDecoder {
    calls: AtomicUsize,
}

impl CountingDecoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RecordDecoder for CountingDecoder {
    fn decode(&self, input: &mut dyn Read, sink: &mut dyn RecordSink) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        JsonLinesDecoder.decode(input, sink)
    }
}

/// Builds JSON-lines input one record at a time.
#[derive(Default)]
pub struct LotBuilder {
    lines: Vec<String>,
}

impl LotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wafer(mut self, wafer_id: &str) -> Self {
        self.push(json!({"kind": "WIR", "fields": {"HEAD_NUM": 1, "WAFER_ID": wafer_id}}));
        self
    }

    pub fn ptr(mut self, site: u8, test_num: u32, name: &str, result: f64, lo: f64, hi: f64) -> Self {
        self.push(json!({"kind": "PTR", "fields": {
            "TEST_NUM": test_num, "HEAD_NUM": 1, "SITE_NUM": site, "TEST_FLG": 0,
            "RESULT": result, "TEST_TXT": name, "LO_LIMIT": lo, "HI_LIMIT": hi, "UNITS": "V"
        }}));
        self
    }

    pub fn part(mut self, site: u8, hard_bin: u16, x: i16, y: i16) -> Self {
        self.push(json!({"kind": "PIR", "fields": {"HEAD_NUM": 1, "SITE_NUM": site}}));
        self.push(json!({"kind": "PRR", "fields": {
            "HEAD_NUM": 1, "SITE_NUM": site, "HARD_BIN": hard_bin, "SOFT_BIN": hard_bin,
            "X_COORD": x, "Y_COORD": y, "PART_FLG": 0
        }}));
        self
    }

    fn push(&mut self, value: serde_json::Value) {
        self.lines.push(value.to_string());
    }

    pub fn build(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).expect("write lot file");
        path
    }
}

/// A small lot: three parts on site 1 and 2, one failing VDD into bin 5.
pub fn small_lot() -> LotBuilder {
    LotBuilder::new()
        .wafer("W07")
        .ptr(1, 100, "VDD", 1.2, 1.0, 1.5)
        .part(1, 1, 0, 0)
        .ptr(2, 100, "VDD", 0.4, 1.0, 1.5)
        .part(2, 5, 1, 0)
        .ptr(1, 100, "VDD", 1.1, 1.0, 1.5)
        .part(1, 1, 2, 0)
}

/// Service over `data_dir` with an in-memory persistent cache.
pub fn service(data_dir: &Path, decoder: Arc<CountingDecoder>) -> StdfService {
    service_with_cache(data_dir, decoder, PersistentCache::in_memory().expect("in-memory cache"))
}

pub fn service_with_cache(
    data_dir: &Path,
    decoder: Arc<CountingDecoder>,
    cache: PersistentCache,
) -> StdfService {
    let mut config = AppConfig::default();
    config.data.data_dir = data_dir.to_path_buf();
    StdfService::new(config, decoder, cache, Handle::current())
}
