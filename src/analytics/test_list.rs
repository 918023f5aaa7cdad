//! Per-test statistics.
//!
//! Fail rate here is limit based only: a result fails when it lies outside an
//! asserted limit of its own PTR. The TEST_FLG bit is ignored, unlike the bin
//! attribution done by the collector.

use super::percent;
use crate::collector::{outside_limits, Dataset};
use crate::records::Ptr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Statistics for one test number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    /// Test number.
    pub test_num: u32,
    /// Description from the first PTR.
    pub test_txt: String,
    /// Units from the first PTR.
    pub units: String,
    /// Low limit from the first PTR.
    pub lo_limit: Option<f64>,
    /// High limit from the first PTR.
    pub hi_limit: Option<f64>,
    /// PTRs seen.
    pub count: u64,
    /// Percent of results outside the limits, two decimals.
    pub fail_rate: f64,
}

/// Running counts for one test number, seeded from its first PTR.
#[derive(Debug, Clone)]
pub struct TestAccumulator {
    test_num: u32,
    test_txt: String,
    units: String,
    lo_limit: Option<f64>,
    hi_limit: Option<f64>,
    count: u64,
    fail_count: u64,
}

impl TestAccumulator {
    /// Takes text, units and limits from `ptr`; counts start at zero.
    pub fn seed(ptr: &Ptr) -> Self {
        Self {
            test_num: ptr.test_num,
            test_txt: ptr.test_txt.clone(),
            units: ptr.units.clone(),
            lo_limit: ptr.lo_limit,
            hi_limit: ptr.hi_limit,
            count: 0,
            fail_count: 0,
        }
    }

    /// Counts one occurrence. An absent result reads as 0.
    pub fn observe(&mut self, ptr: &Ptr) {
        self.count += 1;
        if outside_limits(ptr.result.unwrap_or(0.0), ptr) {
            self.fail_count += 1;
        }
    }

    /// Freezes the counts into a [`TestInfo`].
    pub fn finish(self) -> TestInfo {
        TestInfo {
            fail_rate: percent(self.fail_count, self.count),
            test_num: self.test_num,
            test_txt: self.test_txt,
            units: self.units,
            lo_limit: self.lo_limit,
            hi_limit: self.hi_limit,
            count: self.count,
        }
    }
}

/// One entry per distinct test number, worst fail rate first, then by number.
pub fn test_list(ds: &Dataset) -> Vec<TestInfo> {
    let mut accumulators: HashMap<u32, TestAccumulator> = HashMap::new();
    for ptr in &ds.ptrs {
        accumulators
            .entry(ptr.test_num)
            .or_insert_with(|| TestAccumulator::seed(ptr))
            .observe(ptr);
    }

    let mut tests: Vec<TestInfo> = accumulators
        .into_values()
        .map(TestAccumulator::finish)
        .collect();
    tests.sort_by(|a, b| {
        b.fail_rate
            .total_cmp(&a.fail_rate)
            .then(a.test_num.cmp(&b.test_num))
    });
    tests
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(test_num: u32, result: f64, lo: Option<f64>, hi: Option<f64>) -> Ptr {
        Ptr {
            test_num,
            test_txt: format!("T{test_num}"),
            units: "V".into(),
            result: Some(result),
            lo_limit: lo,
            hi_limit: hi,
            ..Default::default()
        }
    }

    #[test]
    fn fail_rate_is_limit_based() {
        let mut flagged = ptr(1, 0.5, Some(0.0), Some(1.0));
        flagged.test_flg = crate::collector::TEST_FLG_FAIL;
        let ds = Dataset {
            ptrs: vec![
                flagged,
                ptr(1, 1.5, Some(0.0), Some(1.0)),
                ptr(1, -0.5, Some(0.0), Some(1.0)),
            ],
            ..Default::default()
        };
        let tests = test_list(&ds);
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].count, 3);
        assert_eq!(tests[0].fail_rate, 66.67);
    }

    #[test]
    fn seeded_from_first_occurrence() {
        let mut later = ptr(7, 1.0, Some(5.0), None);
        later.test_txt = "renamed".into();
        let ds = Dataset {
            ptrs: vec![ptr(7, 1.0, None, None), later],
            ..Default::default()
        };
        let tests = test_list(&ds);
        assert_eq!(tests[0].test_txt, "T7");
        assert_eq!(tests[0].lo_limit, None);
        // The second PTR still fails against its own lower limit.
        assert_eq!(tests[0].fail_rate, 50.0);
    }

    #[test]
    fn ordered_by_fail_rate_then_test_number() {
        let ds = Dataset {
            ptrs: vec![
                ptr(30, 0.0, None, None),
                ptr(20, 9.0, None, Some(1.0)),
                ptr(10, 0.0, None, None),
                ptr(40, 9.0, None, Some(1.0)),
            ],
            ..Default::default()
        };
        let order: Vec<u32> = test_list(&ds).iter().map(|t| t.test_num).collect();
        assert_eq!(order, [20, 40, 10, 30]);
    }
}
