//! Filtered, paginated parametric test rows.

use crate::collector::Dataset;
use crate::error::{AppResult, StdfError};
use crate::records::Ptr;
use serde::{Deserialize, Serialize};

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One PTR row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultItem {
    /// Test number.
    pub test_num: u32,
    /// Test head.
    pub head_num: u8,
    /// Test site.
    pub site_num: u8,
    /// Raw TEST_FLG.
    pub test_flag: u8,
    /// Measured value; 0 when absent.
    pub result: f64,
    /// Test description.
    pub test_txt: String,
    /// Low limit, when asserted.
    pub lo_limit: Option<f64>,
    /// High limit, when asserted.
    pub hi_limit: Option<f64>,
    /// Units.
    pub units: String,
}

impl From<&Ptr> for TestResultItem {
    fn from(ptr: &Ptr) -> Self {
        Self {
            test_num: ptr.test_num,
            head_num: ptr.head_num,
            site_num: ptr.site_num,
            test_flag: ptr.test_flg,
            result: ptr.result.unwrap_or(0.0),
            test_txt: ptr.test_txt.clone(),
            lo_limit: ptr.lo_limit,
            hi_limit: ptr.hi_limit,
            units: ptr.units.clone(),
        }
    }
}

/// Filter and paging parameters. Pages are 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResultsQuery {
    /// Only this test number, when set.
    pub test_num: Option<u32>,
    /// Only this site, when set.
    pub site_num: Option<u8>,
    /// 1-indexed page.
    pub page: usize,
    /// Rows per page.
    pub page_size: usize,
}

impl Default for TestResultsQuery {
    fn default() -> Self {
        Self {
            test_num: None,
            site_num: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TestResultsQuery {
    /// Rejects page 0 and page sizes outside `1..=max_page_size`.
    pub fn validate(&self, max_page_size: usize) -> AppResult<()> {
        if self.page == 0 {
            return Err(StdfError::InvalidQuery("page must be at least 1".into()));
        }
        if self.page_size == 0 || self.page_size > max_page_size {
            return Err(StdfError::InvalidQuery(format!(
                "page_size must be between 1 and {max_page_size}, got {}",
                self.page_size
            )));
        }
        Ok(())
    }

    fn matches(&self, ptr: &Ptr) -> bool {
        self.test_num.map_or(true, |num| ptr.test_num == num)
            && self.site_num.map_or(true, |site| ptr.site_num == site)
    }
}

/// One page of test results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultsPage {
    /// Matching rows before pagination.
    pub total: usize,
    /// Echo of the requested page.
    pub page: usize,
    /// Echo of the requested page size.
    pub page_size: usize,
    /// At most `page_size` rows.
    pub results: Vec<TestResultItem>,
}

/// Filters the PTR sequence and slices out one page. A page past the end is
/// empty rather than an error.
pub fn test_results(ds: &Dataset, query: &TestResultsQuery) -> TestResultsPage {
    let start = query.page.saturating_sub(1).saturating_mul(query.page_size);
    let mut total = 0;
    let mut results = Vec::new();
    for ptr in ds.ptrs.iter().filter(|ptr| query.matches(ptr)) {
        if total >= start && results.len() < query.page_size {
            results.push(TestResultItem::from(ptr));
        }
        total += 1;
    }

    TestResultsPage {
        total,
        page: query.page,
        page_size: query.page_size,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        let ptrs = (0..8u32)
            .map(|i| Ptr {
                test_num: 100 + (i % 2),
                site_num: if i < 5 { 1 } else { 2 },
                result: Some(f64::from(i)),
                ..Default::default()
            })
            .collect();
        Dataset {
            ptrs,
            ..Default::default()
        }
    }

    #[test]
    fn site_filter_and_second_page() {
        let query = TestResultsQuery {
            site_num: Some(1),
            page: 2,
            page_size: 2,
            ..Default::default()
        };
        let page = test_results(&dataset(), &query);
        assert_eq!(page.total, 5);
        let values: Vec<f64> = page.results.iter().map(|r| r.result).collect();
        assert_eq!(values, [2.0, 3.0]);
    }

    #[test]
    fn combined_filters() {
        let query = TestResultsQuery {
            test_num: Some(101),
            site_num: Some(2),
            ..Default::default()
        };
        let page = test_results(&dataset(), &query);
        assert_eq!(page.total, 2);
        assert!(page.results.iter().all(|r| r.test_num == 101 && r.site_num == 2));
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let query = TestResultsQuery {
            page: 9,
            page_size: 5,
            ..Default::default()
        };
        let page = test_results(&dataset(), &query);
        assert_eq!(page.total, 8);
        assert!(page.results.is_empty());
    }

    #[test]
    fn validation_bounds() {
        let ok = TestResultsQuery::default();
        assert!(ok.validate(5000).is_ok());
        let zero_page = TestResultsQuery { page: 0, ..ok };
        assert!(matches!(zero_page.validate(5000), Err(StdfError::InvalidQuery(_))));
        let too_big = TestResultsQuery { page_size: 5001, ..ok };
        assert!(too_big.validate(5000).is_err());
    }
}
