//! Picard `CollectAlignmentSummaryMetrics` output.
//!
//! The file is tab separated: `#` comment lines, a header row starting with
//! `CATEGORY`, then one row per read category until a blank line or EOF.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::ReadNumber;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricCategory {
    FirstOfPair,
    SecondOfPair,
    Pair,
    Unpaired,
}

impl MetricCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricCategory::FirstOfPair => "FIRST_OF_PAIR",
            MetricCategory::SecondOfPair => "SECOND_OF_PAIR",
            MetricCategory::Pair => "PAIR",
            MetricCategory::Unpaired => "UNPAIRED",
        }
    }

    pub fn for_read(read: ReadNumber) -> Self {
        match read {
            ReadNumber::One => MetricCategory::FirstOfPair,
            ReadNumber::Two => MetricCategory::SecondOfPair,
        }
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MetricCategory {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "FIRST_OF_PAIR" => Ok(MetricCategory::FirstOfPair),
            "SECOND_OF_PAIR" => Ok(MetricCategory::SecondOfPair),
            "PAIR" => Ok(MetricCategory::Pair),
            "UNPAIRED" => Ok(MetricCategory::Unpaired),
            _ => Err(()),
        }
    }
}

pub const PF_READS: &str = "PF_READS";
pub const PCT_PF_READS_ALIGNED: &str = "PCT_PF_READS_ALIGNED";
pub const PCT_READS_ALIGNED_IN_PAIRS: &str = "PCT_READS_ALIGNED_IN_PAIRS";

/// Alignment summary metrics of one barcode, keyed by read category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentMetrics {
    barcode: String,
    rows: BTreeMap<MetricCategory, BTreeMap<String, String>>,
}

impl AlignmentMetrics {
    pub fn new(barcode: &str) -> Self {
        Self {
            barcode: barcode.to_string(),
            rows: BTreeMap::new(),
        }
    }

    pub fn barcode(&self) -> &str {
        &self.barcode
    }

    pub fn insert(&mut self, category: MetricCategory, column: &str, value: &str) {
        self.rows
            .entry(category)
            .or_default()
            .insert(column.to_string(), value.to_string());
    }

    pub fn has_category(&self, category: MetricCategory) -> bool {
        self.rows.contains_key(&category)
    }

    /// Category holding the stats of `read`; single-end runs only report `UNPAIRED`.
    pub fn category_for_read(&self, read: ReadNumber) -> MetricCategory {
        let category = MetricCategory::for_read(read);
        if read == ReadNumber::One
            && !self.has_category(category)
            && self.has_category(MetricCategory::Unpaired)
        {
            return MetricCategory::Unpaired;
        }
        category
    }

    pub fn pf_reads(&self, category: MetricCategory) -> Result<u64, SyncError> {
        let raw = self.value(category, PF_READS)?;
        raw.parse::<u64>().map_err(|_| {
            SyncError::MetricsParse(format!("{category} {PF_READS} is not a count: '{raw}'"))
        })
    }

    pub fn pct_pf_reads_aligned(&self, category: MetricCategory) -> Result<f64, SyncError> {
        self.fraction(category, PCT_PF_READS_ALIGNED)
    }

    pub fn pct_reads_aligned_in_pairs(&self, category: MetricCategory) -> Result<f64, SyncError> {
        self.fraction(category, PCT_READS_ALIGNED_IN_PAIRS)
    }

    fn fraction(&self, category: MetricCategory, column: &str) -> Result<f64, SyncError> {
        let raw = self.value(category, column)?;
        let value = raw.parse::<f64>().map_err(|_| {
            SyncError::MetricsParse(format!("{category} {column} is not a number: '{raw}'"))
        })?;
        if !(0.0..=1.0).contains(&value) {
            return Err(SyncError::MetricsParse(format!(
                "{category} {column} is not a fraction: {value}"
            )));
        }
        Ok(value)
    }

    fn value(&self, category: MetricCategory, column: &str) -> Result<&str, SyncError> {
        self.rows
            .get(&category)
            .and_then(|row| row.get(column))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SyncError::MissingMetrics {
                barcode: self.barcode.clone(),
                category: format!("{category}.{column}"),
            })
    }
}

pub fn parse(barcode: &str, text: &str) -> Result<AlignmentMetrics, SyncError> {
    let section = metrics_section(text).ok_or_else(|| {
        SyncError::MetricsParse("no CATEGORY header line found".to_string())
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .quoting(false)
        .from_reader(section.as_bytes());
    let columns = reader
        .headers()
        .map_err(|err| SyncError::MetricsParse(err.to_string()))?
        .clone();

    let mut metrics = AlignmentMetrics::new(barcode);
    for record in reader.records() {
        let record = record.map_err(|err| SyncError::MetricsParse(err.to_string()))?;
        let Some(Ok(category)) = record.get(0).map(str::parse::<MetricCategory>) else {
            continue;
        };
        for (column, value) in columns.iter().zip(record.iter()).skip(1) {
            metrics.insert(category, column, value);
        }
    }
    Ok(metrics)
}

/// The `CATEGORY` table, up to the blank line that precedes the histogram.
fn metrics_section(text: &str) -> Option<String> {
    let mut lines = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .skip_while(|line| !(line.starts_with("CATEGORY\t") || *line == "CATEGORY"))
        .take_while(|line| !line.trim().is_empty())
        .peekable();
    lines.peek()?;
    Some(lines.collect::<Vec<_>>().join("\n"))
}
