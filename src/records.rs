//! Typed STDF V4 records.
//!
//! The decoder collaborator hands over [`RawRecord`]s: a kind tag plus an ordered
//! list of named scalar fields, exactly as they appeared in the file. That shape
//! is converted once, in [`Record::from_raw`], into a closed set of typed record
//! structs. Everything downstream (collector, analytics) works on the typed
//! structs and never looks a field up by name.
//!
//! Only the record kinds the analytics need are modelled. Other kinds (ATR, PCR,
//! MPR, DTR, ...) convert to `None` and are skipped by the collector.

use crate::error::{AppResult, StdfError};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Record type tag, as named in the STDF V4 specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordKind {
    /// File Attributes Record.
    Far,
    /// Audit Trail Record.
    Atr,
    /// Master Information Record.
    Mir,
    /// Master Results Record.
    Mrr,
    /// Part Count Record.
    Pcr,
    /// Hard Bin Record.
    Hbr,
    /// Soft Bin Record.
    Sbr,
    /// Pin Map Record.
    Pmr,
    /// Pin Group Record.
    Pgr,
    /// Pin List Record.
    Plr,
    /// Retest Data Record.
    Rdr,
    /// Site Description Record.
    Sdr,
    /// Wafer Information Record.
    Wir,
    /// Wafer Results Record.
    Wrr,
    /// Wafer Configuration Record.
    Wcr,
    /// Part Information Record.
    Pir,
    /// Part Results Record.
    Prr,
    /// Test Synopsis Record.
    Tsr,
    /// Parametric Test Record.
    Ptr,
    /// Multiple-Result Parametric Record.
    Mpr,
    /// Functional Test Record.
    Ftr,
    /// Begin Program Section.
    Bps,
    /// End Program Section.
    Eps,
    /// Generic Data Record.
    Gdr,
    /// Datalog Text Record.
    Dtr,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{self:?}").to_uppercase())
    }
}

/// A single scalar (or array) field value as produced by the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Missing or invalid value.
    Null,
    /// U*1..U*8 and bit fields.
    Unsigned(u64),
    /// I*1..I*8.
    Signed(i64),
    /// R*4 and R*8.
    Float(f64),
    /// C*n strings and single characters.
    Text(String),
    /// Array fields.
    List(Vec<FieldValue>),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Unsigned(_) => "unsigned",
            FieldValue::Signed(_) => "signed",
            FieldValue::Float(_) => "float",
            FieldValue::Text(_) => "text",
            FieldValue::List(_) => "list",
        }
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Unsigned(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Signed(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

/// One physical record in file order, before typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Record type.
    pub kind: RecordKind,
    /// Field name and value pairs in decoder order.
    #[serde(
        serialize_with = "serialize_fields",
        deserialize_with = "deserialize_fields",
        default
    )]
    pub fields: Vec<(String, FieldValue)>,
}

impl RawRecord {
    /// A record of `kind` with no fields.
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
        }
    }

    /// Builder-style field append, mostly for tests and synthetic inputs.
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.to_owned(), value.into()));
        self
    }

    fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
            .filter(|value| !matches!(value, FieldValue::Null))
    }

    fn mismatch(&self, name: &str, expected: &str, found: &FieldValue) -> StdfError {
        StdfError::Decode(format!(
            "{} field {} expected {}, found {}",
            self.kind,
            name,
            expected,
            found.type_name()
        ))
    }

    fn raw_int(&self, name: &str) -> AppResult<Option<i64>> {
        match self.get(name) {
            None => Ok(None),
            Some(FieldValue::Unsigned(v)) => i64::try_from(*v)
                .map(Some)
                .map_err(|_| StdfError::Decode(format!("{} field {} overflows", self.kind, name))),
            Some(FieldValue::Signed(v)) => Ok(Some(*v)),
            Some(other) => Err(self.mismatch(name, "integer", other)),
        }
    }

    fn int<T>(&self, name: &str) -> AppResult<T>
    where
        T: TryFrom<i64> + Default,
    {
        match self.raw_int(name)? {
            None => Ok(T::default()),
            Some(v) => T::try_from(v).map_err(|_| {
                StdfError::Decode(format!("{} field {} out of range: {}", self.kind, name, v))
            }),
        }
    }

    fn float(&self, name: &str) -> AppResult<Option<f64>> {
        match self.get(name) {
            None => Ok(None),
            Some(FieldValue::Float(v)) => Ok(Some(*v)),
            Some(FieldValue::Unsigned(v)) => Ok(Some(*v as f64)),
            Some(FieldValue::Signed(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(self.mismatch(name, "float", other)),
        }
    }

    fn text(&self, name: &str) -> AppResult<String> {
        match self.get(name) {
            None => Ok(String::new()),
            Some(FieldValue::Text(v)) => Ok(v.clone()),
            // Some decoders surface C*1 fields (MODE_COD, DISP_COD) as their byte value.
            Some(FieldValue::Unsigned(v)) => Ok(v.to_string()),
            Some(FieldValue::Signed(v)) => Ok(v.to_string()),
            Some(other) => Err(self.mismatch(name, "text", other)),
        }
    }
}

fn serialize_fields<S>(fields: &[(String, FieldValue)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (name, value) in fields {
        map.serialize_entry(name, value)?;
    }
    map.end()
}

fn deserialize_fields<'de, D>(deserializer: D) -> Result<Vec<(String, FieldValue)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedFields;

    impl<'de> Visitor<'de> for OrderedFields {
        type Value = Vec<(String, FieldValue)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of field names to values")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((name, value)) = access.next_entry::<String, FieldValue>()? {
                fields.push((name, value));
            }
            Ok(fields)
        }
    }

    deserializer.deserialize_map(OrderedFields)
}

/// Master Information Record: lot-level setup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mir {
    /// Job setup time, seconds since the epoch.
    pub setup_t: u32,
    /// Start time, seconds since the epoch.
    pub start_t: u32,
    /// Tester station number.
    pub stat_num: u8,
    /// Test mode code.
    pub mode_cod: String,
    /// Lot identifier.
    pub lot_id: String,
    /// Part type or product id.
    pub part_typ: String,
    /// Tester host name.
    pub node_nam: String,
    /// Tester type.
    pub tstr_typ: String,
    /// Test program name.
    pub job_nam: String,
    /// Tester executive software type.
    pub exec_typ: String,
    /// Tester executive software version.
    pub exec_ver: String,
    /// Test facility.
    pub facil_id: String,
    /// Test floor.
    pub floor_id: String,
    /// Fabrication process.
    pub proc_id: String,
}

/// Master Results Record: end of lot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mrr {
    /// Finish time, seconds since the epoch.
    pub finish_t: u32,
    /// Lot disposition code.
    pub disp_cod: String,
    /// Operator lot description.
    pub usr_desc: String,
    /// Executive lot description.
    pub exc_desc: String,
}

/// File Attributes Record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Far {
    /// CPU type that wrote the file.
    pub cpu_type: u8,
    /// STDF version, 4 for V4.
    pub stdf_ver: u8,
}

/// Parametric Test Record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ptr {
    /// Test number.
    pub test_num: u32,
    /// Test head.
    pub head_num: u8,
    /// Test site on the head.
    pub site_num: u8,
    /// TEST_FLG bits; `0x40` marks a failure.
    pub test_flg: u8,
    /// Parametric flags.
    pub parm_flg: u8,
    /// Measured value, absent when the tester omitted it.
    pub result: Option<f64>,
    /// Test description.
    pub test_txt: String,
    /// Low limit, when asserted.
    pub lo_limit: Option<f64>,
    /// High limit, when asserted.
    pub hi_limit: Option<f64>,
    /// Units of `result` and the limits.
    pub units: String,
}

/// Functional Test Record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ftr {
    /// Test number.
    pub test_num: u32,
    /// Test head.
    pub head_num: u8,
    /// Test site on the head.
    pub site_num: u8,
    /// TEST_FLG bits; `0x40` marks a failure.
    pub test_flg: u8,
    /// Test description.
    pub test_txt: String,
}

/// Part Results Record: closes one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prr {
    /// Test head.
    pub head_num: u8,
    /// Test site on the head.
    pub site_num: u8,
    /// Part flags.
    pub part_flg: u8,
    /// Tests executed on the part.
    pub num_test: u16,
    /// Hard bin; 1 is a pass.
    pub hard_bin: u16,
    /// Soft bin.
    pub soft_bin: u16,
    /// Wafer X coordinate.
    pub x_coord: i16,
    /// Wafer Y coordinate.
    pub y_coord: i16,
    /// Test time in milliseconds.
    pub test_t: u32,
    /// Part identifier.
    pub part_id: String,
}

/// Part Information Record: opens one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pir {
    /// Test head.
    pub head_num: u8,
    /// Test site on the head.
    pub site_num: u8,
}

/// Wafer Information Record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wir {
    /// Test head.
    pub head_num: u8,
    /// Site group.
    pub site_grp: u8,
    /// Start time, seconds since the epoch.
    pub start_t: u32,
    /// Wafer identifier.
    pub wafer_id: String,
}

/// Wafer Results Record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wrr {
    /// Test head.
    pub head_num: u8,
    /// Site group.
    pub site_grp: u8,
    /// Finish time, seconds since the epoch.
    pub finish_t: u32,
    /// Parts tested on the wafer.
    pub part_cnt: u32,
    /// Good parts on the wafer.
    pub good_cnt: u32,
    /// Wafer identifier.
    pub wafer_id: String,
}

/// Test Synopsis Record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tsr {
    /// Test head.
    pub head_num: u8,
    /// Test site on the head.
    pub site_num: u8,
    /// `P`, `F`, `M` or blank.
    pub test_typ: String,
    /// Test number.
    pub test_num: u32,
    /// Times the test ran.
    pub exec_cnt: u32,
    /// Times the test failed.
    pub fail_cnt: u32,
    /// Test name.
    pub test_nam: String,
}

/// Hard Bin Record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hbr {
    /// Test head.
    pub head_num: u8,
    /// Test site on the head.
    pub site_num: u8,
    /// Bin number.
    pub hbin_num: u16,
    /// Parts in the bin.
    pub hbin_cnt: u32,
    /// `P` for a passing bin, `F` for failing.
    pub hbin_pf: String,
    /// Bin name.
    pub hbin_nam: String,
}

/// Soft Bin Record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sbr {
    /// Test head.
    pub head_num: u8,
    /// Test site on the head.
    pub site_num: u8,
    /// Bin number.
    pub sbin_num: u16,
    /// Parts in the bin.
    pub sbin_cnt: u32,
    /// `P` for a passing bin, `F` for failing.
    pub sbin_pf: String,
    /// Bin name.
    pub sbin_nam: String,
}

/// The closed set of records the collector understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A typed FAR.
    Far(Far),
    /// A typed MIR.
    Mir(Mir),
    /// A typed MRR.
    Mrr(Mrr),
    /// A typed PTR.
    Ptr(Ptr),
    /// A typed FTR.
    Ftr(Ftr),
    /// A typed PRR.
    Prr(Prr),
    /// A typed PIR.
    Pir(Pir),
    /// A typed WIR.
    Wir(Wir),
    /// A typed WRR.
    Wrr(Wrr),
    /// A typed TSR.
    Tsr(Tsr),
    /// A typed HBR.
    Hbr(Hbr),
    /// A typed SBR.
    Sbr(Sbr),
}

impl Record {
    /// Types a raw record. Returns `Ok(None)` for record kinds that carry nothing
    /// the analytics use, and `Decode` when a field has an incompatible type.
    pub fn from_raw(raw: &RawRecord) -> AppResult<Option<Record>> {
        let record = match raw.kind {
            RecordKind::Far => Record::Far(Far {
                cpu_type: raw.int("CPU_TYPE")?,
                stdf_ver: raw.int("STDF_VER")?,
            }),
            RecordKind::Mir => Record::Mir(Mir {
                setup_t: raw.int("SETUP_T")?,
                start_t: raw.int("START_T")?,
                stat_num: raw.int("STAT_NUM")?,
                mode_cod: raw.text("MODE_COD")?,
                lot_id: raw.text("LOT_ID")?,
                part_typ: raw.text("PART_TYP")?,
                node_nam: raw.text("NODE_NAM")?,
                tstr_typ: raw.text("TSTR_TYP")?,
                job_nam: raw.text("JOB_NAM")?,
                exec_typ: raw.text("EXEC_TYP")?,
                exec_ver: raw.text("EXEC_VER")?,
                facil_id: raw.text("FACIL_ID")?,
                floor_id: raw.text("FLOOR_ID")?,
                proc_id: raw.text("PROC_ID")?,
            }),
            RecordKind::Mrr => Record::Mrr(Mrr {
                finish_t: raw.int("FINISH_T")?,
                disp_cod: raw.text("DISP_COD")?,
                usr_desc: raw.text("USR_DESC")?,
                exc_desc: raw.text("EXC_DESC")?,
            }),
            RecordKind::Ptr => Record::Ptr(Ptr {
                test_num: raw.int("TEST_NUM")?,
                head_num: raw.int("HEAD_NUM")?,
                site_num: raw.int("SITE_NUM")?,
                test_flg: raw.int("TEST_FLG")?,
                parm_flg: raw.int("PARM_FLG")?,
                result: raw.float("RESULT")?,
                test_txt: raw.text("TEST_TXT")?,
                lo_limit: raw.float("LO_LIMIT")?,
                hi_limit: raw.float("HI_LIMIT")?,
                units: raw.text("UNITS")?,
            }),
            RecordKind::Ftr => Record::Ftr(Ftr {
                test_num: raw.int("TEST_NUM")?,
                head_num: raw.int("HEAD_NUM")?,
                site_num: raw.int("SITE_NUM")?,
                test_flg: raw.int("TEST_FLG")?,
                test_txt: raw.text("TEST_TXT")?,
            }),
            RecordKind::Prr => Record::Prr(Prr {
                head_num: raw.int("HEAD_NUM")?,
                site_num: raw.int("SITE_NUM")?,
                part_flg: raw.int("PART_FLG")?,
                num_test: raw.int("NUM_TEST")?,
                hard_bin: raw.int("HARD_BIN")?,
                soft_bin: raw.int("SOFT_BIN")?,
                x_coord: raw.int("X_COORD")?,
                y_coord: raw.int("Y_COORD")?,
                test_t: raw.int("TEST_T")?,
                part_id: raw.text("PART_ID")?,
            }),
            RecordKind::Pir => Record::Pir(Pir {
                head_num: raw.int("HEAD_NUM")?,
                site_num: raw.int("SITE_NUM")?,
            }),
            RecordKind::Wir => Record::Wir(Wir {
                head_num: raw.int("HEAD_NUM")?,
                site_grp: raw.int("SITE_GRP")?,
                start_t: raw.int("START_T")?,
                wafer_id: raw.text("WAFER_ID")?,
            }),
            RecordKind::Wrr => Record::Wrr(Wrr {
                head_num: raw.int("HEAD_NUM")?,
                site_grp: raw.int("SITE_GRP")?,
                finish_t: raw.int("FINISH_T")?,
                part_cnt: raw.int("PART_CNT")?,
                good_cnt: raw.int("GOOD_CNT")?,
                wafer_id: raw.text("WAFER_ID")?,
            }),
            RecordKind::Tsr => Record::Tsr(Tsr {
                head_num: raw.int("HEAD_NUM")?,
                site_num: raw.int("SITE_NUM")?,
                test_typ: raw.text("TEST_TYP")?,
                test_num: raw.int("TEST_NUM")?,
                exec_cnt: raw.int("EXEC_CNT")?,
                fail_cnt: raw.int("FAIL_CNT")?,
                test_nam: raw.text("TEST_NAM")?,
            }),
            RecordKind::Hbr => Record::Hbr(Hbr {
                head_num: raw.int("HEAD_NUM")?,
                site_num: raw.int("SITE_NUM")?,
                hbin_num: raw.int("HBIN_NUM")?,
                hbin_cnt: raw.int("HBIN_CNT")?,
                hbin_pf: raw.text("HBIN_PF")?,
                hbin_nam: raw.text("HBIN_NAM")?,
            }),
            RecordKind::Sbr => Record::Sbr(Sbr {
                head_num: raw.int("HEAD_NUM")?,
                site_num: raw.int("SITE_NUM")?,
                sbin_num: raw.int("SBIN_NUM")?,
                sbin_cnt: raw.int("SBIN_CNT")?,
                sbin_pf: raw.text("SBIN_PF")?,
                sbin_nam: raw.text("SBIN_NAM")?,
            }),
            _ => return Ok(None),
        };
        Ok(Some(record))
    }
}
