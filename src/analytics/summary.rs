//! File summary: lot metadata, yield, per-site yield and the hard-bin breakdown.

use super::percent;
use crate::collector::Dataset;
use crate::records::{Mir, Mrr};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Shape version embedded in every summary. Persisted summaries below this
/// version are recomputed.
pub const SUMMARY_VERSION: u32 = 2;

/// Hard bin that denotes a passing part.
pub const PASS_BIN: u16 = 1;

/// Lot metadata from the MIR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirInfo {
    /// MIR SETUP_T as decimal seconds.
    pub setup_time: String,
    /// MIR START_T as decimal seconds.
    pub start_time: String,
    /// Tester station.
    pub station_number: u8,
    /// Test mode code.
    pub mode_code: String,
    /// Lot identifier.
    pub lot_id: String,
    /// Product.
    pub part_type: String,
    /// Tester host.
    pub node_name: String,
    /// Tester type.
    pub tester_type: String,
    /// Test program.
    pub job_name: String,
    /// Executive software type.
    pub exec_type: String,
    /// Executive software version.
    pub exec_ver: String,
    /// Test facility.
    pub facility_id: String,
    /// Test floor.
    pub floor_id: String,
    /// Fabrication process.
    pub process_id: String,
}

impl From<&Mir> for MirInfo {
    fn from(mir: &Mir) -> Self {
        Self {
            setup_time: mir.setup_t.to_string(),
            start_time: mir.start_t.to_string(),
            station_number: mir.stat_num,
            mode_code: mir.mode_cod.clone(),
            lot_id: mir.lot_id.clone(),
            part_type: mir.part_typ.clone(),
            node_name: mir.node_nam.clone(),
            tester_type: mir.tstr_typ.clone(),
            job_name: mir.job_nam.clone(),
            exec_type: mir.exec_typ.clone(),
            exec_ver: mir.exec_ver.clone(),
            facility_id: mir.facil_id.clone(),
            floor_id: mir.floor_id.clone(),
            process_id: mir.proc_id.clone(),
        }
    }
}

/// End-of-lot data from the MRR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MrrInfo {
    /// MRR FINISH_T as decimal seconds.
    pub finish_time: String,
    /// Lot disposition.
    pub disposition_code: String,
    /// Operator description.
    pub user_description: String,
    /// Executive description.
    pub exec_description: String,
}

impl From<&Mrr> for MrrInfo {
    fn from(mrr: &Mrr) -> Self {
        Self {
            finish_time: mrr.finish_t.to_string(),
            disposition_code: mrr.disp_cod.clone(),
            user_description: mrr.usr_desc.clone(),
            exec_description: mrr.exc_desc.clone(),
        }
    }
}

/// Yield of one test site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteYield {
    /// Test site.
    pub site_num: u8,
    /// Parts tested on the site.
    pub total_parts: u64,
    /// Parts binned to hard bin 1.
    pub pass_count: u64,
    /// All other parts.
    pub fail_count: u64,
    /// Percent passing, two decimals.
    pub yield_rate: f64,
}

/// One hard bin with its most common failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardBinInfo {
    /// Hard bin number.
    pub bin_num: u16,
    /// Parts in the bin.
    pub count: u64,
    /// Share of all parts, two decimals.
    pub percent: f64,
    /// Most frequently failing tests of parts that landed in this bin.
    pub failed_tests: Vec<String>,
}

/// Yield and bin overview of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Missing in payloads written before versioning, which reads as stale.
    #[serde(default)]
    pub summary_version: u32,
    /// Lot metadata, when the file has an MIR.
    pub mir: Option<MirInfo>,
    /// End-of-lot data, when the file has an MRR.
    pub mrr: Option<MrrInfo>,
    /// PRR count.
    pub total_parts: u64,
    /// Parts in hard bin 1.
    pub pass_count: u64,
    /// Parts in any other bin.
    pub fail_count: u64,
    /// Percent passing, two decimals.
    pub yield_rate: f64,
    /// Sites seen, ascending.
    pub sites: Vec<u8>,
    /// One entry per site in `sites`.
    pub site_yields: Vec<SiteYield>,
    /// Parts per hard bin.
    pub hbin_counts: BTreeMap<u16, u64>,
    /// Hard bins ascending.
    pub hbin_details: Vec<HardBinInfo>,
    /// Distinct test numbers across PTRs.
    pub total_tests: usize,
}

impl Summary {
    /// True when the payload predates the current summary shape.
    pub fn is_stale(&self) -> bool {
        self.summary_version < SUMMARY_VERSION
    }
}

#[derive(Default)]
struct PassCount {
    total: u64,
    pass: u64,
}

impl PassCount {
    fn add(&mut self, hard_bin: u16) {
        self.total += 1;
        if hard_bin == PASS_BIN {
            self.pass += 1;
        }
    }
}

/// Builds the summary, keeping at most `top_failed_tests` names per bin.
pub fn summarize(ds: &Dataset, top_failed_tests: usize) -> Summary {
    let mut overall = PassCount::default();
    let mut per_site: BTreeMap<u8, PassCount> = BTreeMap::new();
    let mut hbin_counts: BTreeMap<u16, u64> = BTreeMap::new();

    for prr in &ds.prrs {
        overall.add(prr.hard_bin);
        per_site.entry(prr.site_num).or_default().add(prr.hard_bin);
        *hbin_counts.entry(prr.hard_bin).or_default() += 1;
    }

    let site_yields: Vec<SiteYield> = per_site
        .iter()
        .map(|(&site_num, counts)| SiteYield {
            site_num,
            total_parts: counts.total,
            pass_count: counts.pass,
            fail_count: counts.total - counts.pass,
            yield_rate: percent(counts.pass, counts.total),
        })
        .collect();

    let hbin_details = hbin_counts
        .iter()
        .map(|(&bin_num, &count)| HardBinInfo {
            bin_num,
            count,
            percent: percent(count, overall.total),
            failed_tests: ds
                .failure_tally
                .bin(bin_num)
                .map(|failures| failures.top(top_failed_tests))
                .unwrap_or_default(),
        })
        .collect();

    let total_tests = ds
        .ptrs
        .iter()
        .map(|ptr| ptr.test_num)
        .collect::<BTreeSet<_>>()
        .len();

    Summary {
        summary_version: SUMMARY_VERSION,
        mir: ds.mir.as_ref().map(MirInfo::from),
        mrr: ds.mrr.as_ref().map(MrrInfo::from),
        total_parts: overall.total,
        pass_count: overall.pass,
        fail_count: overall.total - overall.pass,
        yield_rate: percent(overall.pass, overall.total),
        sites: per_site.keys().copied().collect(),
        site_yields,
        hbin_counts,
        hbin_details,
        total_tests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Prr, Ptr};

    fn dataset_with_bins(bins: &[(u8, u16)]) -> Dataset {
        Dataset {
            prrs: bins
                .iter()
                .map(|&(site_num, hard_bin)| Prr {
                    site_num,
                    hard_bin,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_dataset_has_zero_yield() {
        let summary = summarize(&Dataset::default(), 10);
        assert_eq!(summary.total_parts, 0);
        assert_eq!(summary.yield_rate, 0.0);
        assert!(summary.hbin_details.is_empty());
        assert!(summary.mir.is_none());
    }

    #[test]
    fn yield_counts_bin_one_as_pass() {
        let summary = summarize(&dataset_with_bins(&[(0, 1), (0, 1), (0, 5)]), 10);
        assert_eq!(summary.total_parts, 3);
        assert_eq!(summary.pass_count, 2);
        assert_eq!(summary.fail_count, 1);
        assert_eq!(summary.yield_rate, 66.67);
    }

    #[test]
    fn histogram_is_sorted_by_bin_with_percent() {
        let summary = summarize(
            &dataset_with_bins(&[(0, 5), (0, 1), (0, 5), (0, 1), (0, 5)]),
            10,
        );
        let bins: Vec<(u16, u64, f64)> = summary
            .hbin_details
            .iter()
            .map(|b| (b.bin_num, b.count, b.percent))
            .collect();
        assert_eq!(bins, [(1, 2, 40.0), (5, 3, 60.0)]);
        assert_eq!(summary.hbin_counts.get(&5), Some(&3));
    }

    #[test]
    fn sites_are_ascending_with_their_own_yield() {
        let summary = summarize(&dataset_with_bins(&[(3, 1), (1, 2), (3, 2), (1, 1), (1, 1)]), 10);
        assert_eq!(summary.sites, [1, 3]);
        assert_eq!(summary.site_yields[0].total_parts, 3);
        assert_eq!(summary.site_yields[0].yield_rate, 66.67);
        assert_eq!(summary.site_yields[1].yield_rate, 50.0);
    }

    #[test]
    fn failed_tests_are_capped_per_bin() {
        let mut ds = dataset_with_bins(&[(0, 9)]);
        for i in 0..12u32 {
            for _ in 0..=i {
                ds.failure_tally.record(9, format!("T{i}"));
            }
        }
        let summary = summarize(&ds, 10);
        let failed = &summary.hbin_details[0].failed_tests;
        assert_eq!(failed.len(), 10);
        assert_eq!(failed[0], "T11");
        assert_eq!(failed[9], "T2");
    }

    #[test]
    fn total_tests_counts_distinct_numbers() {
        let mut ds = Dataset::default();
        for num in [1, 2, 1, 3, 2] {
            ds.ptrs.push(Ptr {
                test_num: num,
                ..Default::default()
            });
        }
        assert_eq!(summarize(&ds, 10).total_tests, 3);
    }

    #[test]
    fn unversioned_payload_reads_as_stale() {
        let mut value = serde_json::to_value(summarize(&Dataset::default(), 10)).unwrap();
        value.as_object_mut().unwrap().remove("summary_version");
        let old: Summary = serde_json::from_value(value).unwrap();
        assert!(old.is_stale());
        assert!(!summarize(&Dataset::default(), 10).is_stale());
    }
}
