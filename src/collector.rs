//! Record collection: turns the decoder's record stream into a [`Dataset`].
//!
//! Besides appending every record to its kind-specific sequence, the collector
//! correlates per-device test records with the device outcome. PTR and FTR
//! records are parked in an open buffer keyed by `(head, site)`. When the PRR for
//! that `(head, site)` arrives the buffer is drained, each parked test is run
//! through the fail predicate, and failures are tallied against the PRR's hard
//! bin in the [`FailureTally`].
//!
//! A device whose test records are never closed by a PRR keeps its buffer open
//! until [`RecordCollector::finish`]; those failures are not tallied.

use crate::decoder::RecordSink;
use crate::error::AppResult;
use crate::records::{Far, Ftr, Hbr, Mir, Mrr, Pir, Prr, Ptr, RawRecord, Record, Sbr, Tsr, Wir, Wrr};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// TEST_FLG bit that marks a test as failed.
pub const TEST_FLG_FAIL: u8 = 0x40;

/// Parametric fail predicate used for bin attribution.
///
/// Fails when the flag bit is set, or when the result lies outside an asserted
/// limit. The two checks are independent; an absent limit is unbounded.
pub fn parametric_fails(ptr: &Ptr) -> bool {
    ptr.test_flg & TEST_FLG_FAIL != 0 || ptr.result.is_some_and(|r| outside_limits(r, ptr))
}

/// Functional tests carry no limits, so only the flag bit counts.
pub fn functional_fails(ftr: &Ftr) -> bool {
    ftr.test_flg & TEST_FLG_FAIL != 0
}

/// Limit-only check shared with the test list statistics.
pub fn outside_limits(result: f64, ptr: &Ptr) -> bool {
    ptr.lo_limit.is_some_and(|lo| result < lo) || ptr.hi_limit.is_some_and(|hi| result > hi)
}

/// Display name of a test, falling back to `Test <num>` when the text is empty.
pub fn test_label(test_txt: &str, test_num: u32) -> String {
    if test_txt.is_empty() {
        format!("Test {test_num}")
    } else {
        test_txt.to_owned()
    }
}

/// Per-bin fail counts, keyed by test name in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinFailures {
    counts: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl BinFailures {
    fn increment(&mut self, test_name: String) {
        match self.index.get(&test_name) {
            Some(&slot) => self.counts[slot].1 += 1,
            None => {
                self.index.insert(test_name.clone(), self.counts.len());
                self.counts.push((test_name, 1));
            }
        }
    }

    /// Fail count for one test name.
    pub fn count(&self, test_name: &str) -> u64 {
        self.index
            .get(test_name)
            .map_or(0, |&slot| self.counts[slot].1)
    }

    /// `(test name, fail count)` in first-seen order.
    pub fn entries(&self) -> &[(String, u64)] {
        &self.counts
    }

    /// Test names by descending fail count. The sort is stable, so equal counts
    /// keep first-seen order.
    pub fn top(&self, limit: usize) -> Vec<String> {
        let mut ranked: Vec<&(String, u64)> = self.counts.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
            .into_iter()
            .take(limit)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// hard bin -> test name -> fail count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureTally {
    bins: BTreeMap<u16, BinFailures>,
}

impl FailureTally {
    /// Counts one failure of `test_name` against `hard_bin`.
    pub fn record(&mut self, hard_bin: u16, test_name: String) {
        self.bins.entry(hard_bin).or_default().increment(test_name);
    }

    /// Failures attributed to `hard_bin`, if any.
    pub fn bin(&self, hard_bin: u16) -> Option<&BinFailures> {
        self.bins.get(&hard_bin)
    }

    /// Times `test_name` failed on parts that landed in `hard_bin`.
    pub fn count(&self, hard_bin: u16, test_name: &str) -> u64 {
        self.bin(hard_bin).map_or(0, |bin| bin.count(test_name))
    }

    /// True when no failure was attributed to any bin.
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// Everything collected from one file.
///
/// Sequences keep arrival order; a device's PTR/FTR entries precede its PRR.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// Latest FAR.
    pub far: Option<Far>,
    /// Latest MIR.
    pub mir: Option<Mir>,
    /// Latest MRR.
    pub mrr: Option<Mrr>,
    /// Parametric results.
    pub ptrs: Vec<Ptr>,
    /// Functional results.
    pub ftrs: Vec<Ftr>,
    /// One per tested part.
    pub prrs: Vec<Prr>,
    /// Part starts.
    pub pirs: Vec<Pir>,
    /// Wafer results.
    pub wrrs: Vec<Wrr>,
    /// Wafer starts.
    pub wirs: Vec<Wir>,
    /// Test synopses.
    pub tsrs: Vec<Tsr>,
    /// Hard bin totals as written by the tester.
    pub hbrs: Vec<Hbr>,
    /// Soft bin totals as written by the tester.
    pub sbrs: Vec<Sbr>,
    /// Failing tests per hard bin, filled as PRRs close devices.
    pub failure_tally: FailureTally,
}

impl Dataset {
    /// Total number of typed records held.
    pub fn record_count(&self) -> usize {
        usize::from(self.far.is_some())
            + usize::from(self.mir.is_some())
            + usize::from(self.mrr.is_some())
            + self.ptrs.len()
            + self.ftrs.len()
            + self.prrs.len()
            + self.pirs.len()
            + self.wrrs.len()
            + self.wirs.len()
            + self.tsrs.len()
            + self.hbrs.len()
            + self.sbrs.len()
    }
}

/// Index into the dataset of a test record waiting for its PRR.
#[derive(Debug, Clone, Copy)]
enum OpenTest {
    Parametric(usize),
    Functional(usize),
}

/// Accumulates a [`Dataset`] from a record stream.
#[derive(Debug, Default)]
pub struct RecordCollector {
    dataset: Dataset,
    open: HashMap<(u8, u8), Vec<OpenTest>>,
}

impl RecordCollector {
    /// An empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one typed record.
    pub fn ingest(&mut self, record: Record) {
        let ds = &mut self.dataset;
        match record {
            Record::Far(far) => replace_single(&mut ds.far, far, "FAR"),
            Record::Mir(mir) => replace_single(&mut ds.mir, mir, "MIR"),
            Record::Mrr(mrr) => replace_single(&mut ds.mrr, mrr, "MRR"),
            Record::Ptr(ptr) => {
                self.open
                    .entry((ptr.head_num, ptr.site_num))
                    .or_default()
                    .push(OpenTest::Parametric(ds.ptrs.len()));
                ds.ptrs.push(ptr);
            }
            Record::Ftr(ftr) => {
                self.open
                    .entry((ftr.head_num, ftr.site_num))
                    .or_default()
                    .push(OpenTest::Functional(ds.ftrs.len()));
                ds.ftrs.push(ftr);
            }
            Record::Prr(prr) => {
                self.close_device(&prr);
                self.dataset.prrs.push(prr);
            }
            Record::Pir(pir) => ds.pirs.push(pir),
            Record::Wir(wir) => ds.wirs.push(wir),
            Record::Wrr(wrr) => ds.wrrs.push(wrr),
            Record::Tsr(tsr) => ds.tsrs.push(tsr),
            Record::Hbr(hbr) => ds.hbrs.push(hbr),
            Record::Sbr(sbr) => ds.sbrs.push(sbr),
        }
    }

    fn close_device(&mut self, prr: &Prr) {
        let Some(tests) = self.open.remove(&(prr.head_num, prr.site_num)) else {
            return;
        };
        let ds = &mut self.dataset;
        for test in tests {
            let failed = match test {
                OpenTest::Parametric(i) => {
                    let ptr = &ds.ptrs[i];
                    parametric_fails(ptr).then(|| test_label(&ptr.test_txt, ptr.test_num))
                }
                OpenTest::Functional(i) => {
                    let ftr = &ds.ftrs[i];
                    functional_fails(ftr).then(|| test_label(&ftr.test_txt, ftr.test_num))
                }
            };
            if let Some(name) = failed {
                ds.failure_tally.record(prr.hard_bin, name);
            }
        }
    }

    /// Number of `(head, site)` buffers still waiting for a PRR.
    pub fn open_devices(&self) -> usize {
        self.open.len()
    }

    /// Ends collection. Buffers without a closing PRR are dropped untallied.
    pub fn finish(self) -> Dataset {
        if !self.open.is_empty() {
            let pending: usize = self.open.values().map(Vec::len).sum();
            debug!(
                devices = self.open.len(),
                tests = pending,
                "Discarding test records of devices without a PRR"
            );
        }
        self.dataset
    }
}

impl RecordSink for RecordCollector {
    fn accept(&mut self, raw: RawRecord) -> AppResult<()> {
        if let Some(record) = Record::from_raw(&raw)? {
            self.ingest(record);
        }
        Ok(())
    }
}

fn replace_single<T>(slot: &mut Option<T>, value: T, kind: &str) {
    if slot.is_some() {
        warn!(kind, "Duplicate single-instance record, keeping the latest");
    }
    *slot = Some(value);
}
