//! Wafer map: one die per part result.

use crate::collector::Dataset;
use serde::{Deserialize, Serialize};

/// One tested die.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DieResult {
    /// Wafer X.
    pub x_coord: i16,
    /// Wafer Y.
    pub y_coord: i16,
    /// Hard bin.
    pub hard_bin: u16,
    /// Soft bin.
    pub soft_bin: u16,
    /// PRR PART_FLG.
    pub part_flag: u8,
    /// Test site.
    pub site_num: u8,
}

/// All dies of a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaferMap {
    /// From the first WIR; empty without one.
    pub wafer_id: String,
    /// Length of `dies`.
    pub total_dies: usize,
    /// PRR order.
    pub dies: Vec<DieResult>,
}

/// Dies in PRR order; the wafer id comes from the first WIR, if any.
pub fn wafer_map(ds: &Dataset) -> WaferMap {
    let dies: Vec<DieResult> = ds
        .prrs
        .iter()
        .map(|prr| DieResult {
            x_coord: prr.x_coord,
            y_coord: prr.y_coord,
            hard_bin: prr.hard_bin,
            soft_bin: prr.soft_bin,
            part_flag: prr.part_flg,
            site_num: prr.site_num,
        })
        .collect();

    WaferMap {
        wafer_id: ds
            .wirs
            .first()
            .map(|wir| wir.wafer_id.clone())
            .unwrap_or_default(),
        total_dies: dies.len(),
        dies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Prr, Wir};

    #[test]
    fn one_die_per_prr_with_first_wafer_id() {
        let ds = Dataset {
            wirs: vec![
                Wir {
                    wafer_id: "W07".into(),
                    ..Default::default()
                },
                Wir {
                    wafer_id: "W08".into(),
                    ..Default::default()
                },
            ],
            prrs: vec![
                Prr {
                    x_coord: -2,
                    y_coord: 5,
                    hard_bin: 1,
                    soft_bin: 11,
                    site_num: 2,
                    ..Default::default()
                },
                Prr {
                    hard_bin: 6,
                    part_flg: 0x08,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let map = wafer_map(&ds);
        assert_eq!(map.wafer_id, "W07");
        assert_eq!(map.total_dies, 2);
        assert_eq!(
            map.dies[0],
            DieResult {
                x_coord: -2,
                y_coord: 5,
                hard_bin: 1,
                soft_bin: 11,
                part_flag: 0,
                site_num: 2,
            }
        );
        assert_eq!(map.dies[1].part_flag, 0x08);
    }

    #[test]
    fn no_wir_means_empty_wafer_id() {
        let map = wafer_map(&Dataset::default());
        assert_eq!(map.wafer_id, "");
        assert_eq!(map.total_dies, 0);
    }
}
