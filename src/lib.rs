//! # STDF Analytics Core Library
//!
//! This crate turns decoded STDF (Standard Test Data Format) records from
//! semiconductor test equipment into yield, bin and per-test analytics. It
//! owns the parts between a record decoder and a transport layer: record
//! collection, background parse jobs, a two-tier cache and the analytics
//! themselves.
//!
//! ## Crate Structure
//!
//! - **`records`**: typed record structs, the `Record` enum and the dynamically
//!   shaped `RawRecord` produced by decoders.
//! - **`decoder`**: the `RecordDecoder` seam, byte-progress reporting and the
//!   JSON-lines decoder.
//! - **`collector`**: `RecordCollector`, which builds a `Dataset` and attributes
//!   failing tests to the hard bin of the device they belong to.
//! - **`analytics`**: summary, wafer map, test list and paginated test results.
//! - **`memory_cache`**: in-process datasets keyed by path and file signature.
//! - **`persistent_cache`**: SQLite store of analytics payloads keyed by content
//!   hash.
//! - **`jobs`**: `JobManager`, deduplicated background decodes with progress.
//! - **`service`**: `StdfService`, the facade a transport layer calls.
//! - **`config`**, **`logging`**, **`error`**: configuration, tracing setup and
//!   the `StdfError` taxonomy.

pub mod analytics;
pub mod collector;
pub mod config;
pub mod decoder;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod memory_cache;
pub mod persistent_cache;
pub mod records;
pub mod service;

pub use error::{AppResult, StdfError};
pub use service::StdfService;
