//! Analytics over a completed [`Dataset`](crate::collector::Dataset).
//!
//! Every view here is a pure function of the dataset (plus filter and paging
//! parameters for test results). The returned values are plain serde structs so
//! that they can be persisted as JSON payloads and handed to a transport layer
//! unchanged.
//!
//! - [`summary`]: yield, per-site yield, hard-bin histogram with the top failing
//!   tests of each bin.
//! - [`wafer_map`]: one die per PRR.
//! - [`test_list`]: one entry per test number with a limit-based fail rate.
//! - [`test_results`]: filtered, paginated PTR rows.

pub mod summary;
pub mod test_list;
pub mod test_results;
pub mod wafer_map;

pub use summary::{
    summarize, HardBinInfo, MirInfo, MrrInfo, SiteYield, Summary, PASS_BIN, SUMMARY_VERSION,
};
pub use test_list::{test_list, TestAccumulator, TestInfo};
pub use test_results::{test_results, TestResultItem, TestResultsPage, TestResultsQuery};
pub use wafer_map::{wafer_map, DieResult, WaferMap};

/// `part / total * 100`, rounded to two decimals; 0 when `total` is 0.
pub(crate) fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

/// Two decimals, exact ties to even (`round(x, 2)` semantics).
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
