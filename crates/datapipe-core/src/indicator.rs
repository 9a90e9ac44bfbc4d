//! Indicator specifications, raw API rows, and the pivoted per-indicator table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Header of the entity name column.
pub const ENTITY_NAME_COLUMN: &str = "Country Name";

/// Header of the entity code column.
pub const ENTITY_CODE_COLUMN: &str = "Country Code";

/// One source indicator and where its table is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    /// Indicator code as the API knows it (e.g. "SP.POP.TOTL").
    pub code: String,

    /// Destination of the pivoted CSV table.
    pub output_path: PathBuf,
}

impl IndicatorSpec {
    pub fn new(code: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            code: code.into(),
            output_path: output_path.into(),
        }
    }

    /// Indicators pulled by a default deployment.
    pub fn defaults() -> Vec<IndicatorSpec> {
        vec![
            Self::new("SP.POP.TOTL", "data_source/api_population_data.csv"),
            Self::new("NY.GDP.MKTP.CD", "data_source/api_gdp_data.csv"),
            Self::new("SP.RUR.TOTL.ZS", "data_source/api_rural_population_data.csv"),
            Self::new("EG.ELC.ACCS.ZS", "data_source/api_electricity_access_data.csv"),
        ]
    }
}

/// One API response row, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub entity_name: String,
    pub entity_code: String,
    pub year: i32,
    /// `None` when the API reported no value for that year.
    pub value: Option<f64>,
}

impl RawRecord {
    pub fn new(
        entity_name: impl Into<String>,
        entity_code: impl Into<String>,
        year: i32,
        value: Option<f64>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_code: entity_code.into(),
            year,
            value,
        }
    }
}

/// Inclusive range of years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearRange {
    start: i32,
    end: i32,
}

impl YearRange {
    /// Range `start..=end`. An inverted range is normalized.
    pub const fn new(start: i32, end: i32) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }

    /// Years in ascending order.
    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Row key of an indicator table. Ordering is by name, then code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub name: String,
    pub code: String,
}

/// One indicator reshaped to a row per entity and a column per year.
///
/// The column set is always the full year range; years the API did not
/// return are empty cells. When two records land on the same
/// `(entity, year)` cell the later one wins, so the caller controls the
/// outcome through the order it feeds records in.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorTable {
    code: String,
    years: YearRange,
    rows: BTreeMap<EntityKey, BTreeMap<i32, Option<f64>>>,
    overwritten: usize,
}

impl IndicatorTable {
    /// Pivot `records` into a table, keeping only years inside `years`.
    pub fn pivot(
        code: impl Into<String>,
        records: impl IntoIterator<Item = RawRecord>,
        years: YearRange,
    ) -> Self {
        let mut rows: BTreeMap<EntityKey, BTreeMap<i32, Option<f64>>> = BTreeMap::new();
        let mut overwritten = 0;

        for record in records {
            if !years.contains(record.year) {
                continue;
            }
            let key = EntityKey {
                name: record.entity_name,
                code: record.entity_code,
            };
            if rows
                .entry(key)
                .or_default()
                .insert(record.year, record.value)
                .is_some()
            {
                overwritten += 1;
            }
        }

        Self {
            code: code.into(),
            years,
            rows,
            overwritten,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn years(&self) -> YearRange {
        self.years
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of cells that were written more than once during the pivot.
    pub fn overwritten_cells(&self) -> usize {
        self.overwritten
    }

    /// Entities in row order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityKey> {
        self.rows.keys()
    }

    /// Column headers: entity name, entity code, then one per year.
    pub fn header(&self) -> Vec<String> {
        let mut header = vec![ENTITY_NAME_COLUMN.to_string(), ENTITY_CODE_COLUMN.to_string()];
        header.extend(self.years.years().map(|y| y.to_string()));
        header
    }

    /// Cell value for the entity with `entity_code` in `year`.
    pub fn value(&self, entity_code: &str, year: i32) -> Option<f64> {
        self.rows
            .iter()
            .find(|(key, _)| key.code == entity_code)
            .and_then(|(_, cells)| cells.get(&year).copied().flatten())
    }

    /// Rows as string cells aligned with [`IndicatorTable::header`]; empty
    /// cells are empty strings.
    pub fn records(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.rows.iter().map(move |(key, cells)| {
            let mut record = Vec::with_capacity(self.years.len() + 2);
            record.push(key.name.clone());
            record.push(key.code.clone());
            for year in self.years.years() {
                let cell = match cells.get(&year) {
                    Some(Some(v)) => v.to_string(),
                    _ => String::new(),
                };
                record.push(cell);
            }
            record
        })
    }
}
