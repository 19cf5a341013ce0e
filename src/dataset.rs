//! Activation records and the normalizer that builds them from raw sheet rows.
//!
//! The form-response sheet arrives as rows of strings with a header row first.
//! Columns are renamed by position, the event date is parsed and expanded into
//! week/quarter/year, count fields become integers and every remaining empty
//! cell becomes `None`.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of positional columns the form layout defines.
pub const COLUMN_COUNT: usize = 29;

/// Positional column ids, in sheet order.
pub const COLUMNS: [&str; COLUMN_COUNT] = [
    "timestamp",
    "developer",
    "event_name",
    "date",
    "city",
    "state",
    "zip",
    "activation_type",
    "discipline",
    "demo_retailer",
    "demo_bob",
    "clinic_retailer",
    "clinic_shop_level",
    "clinic_staff_count",
    "festival_retail_partner",
    "festival_total_attendance",
    "festival_bob",
    "vip_retailer",
    "vip_total_attendance",
    "vip_bob",
    "trail_building_retailer",
    "trail_building_total_attendance",
    "shop_assist_retailer",
    "shop_assist_description",
    "other_activation_retailer",
    "other_activation_description",
    "other_activation_bob",
    "latitude",
    "longitude",
];

/// Derived columns appended after the positional ones in table exports.
pub const DERIVED_COLUMNS: [&str; 4] = ["week", "quarter", "year", "year_quarter"];

const DATE_FORMATS: [&str; 4] = ["%m/%d/%Y", "%Y-%m-%d", "%m/%d/%y", "%B %d, %Y"];
const DATETIME_FORMATS: [&str; 3] = ["%m/%d/%Y %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Errors raised while normalizing sheet rows
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DatasetError {
    #[error("No data found.")]
    NoData,

    #[error("header has {found} columns, expected at least {expected}")]
    SchemaMismatch { expected: usize, found: usize },

    #[error("row {row}: column '{column}' is not a non-negative count: '{value}'")]
    InvalidCount {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("row {row}: column '{column}' is not a number: '{value}'")]
    InvalidCoordinate {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("row {row}: unrecognised date '{value}'")]
    InvalidDate { row: usize, value: String },
}

/// Kind of field-marketing event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ActivationType {
    Demo,
    Clinic,
    Festival,
    Vip,
    TrailDay,
    ShopAssist,
    Other(String),
}

impl ActivationType {
    /// Parse a form label, accepting the spellings the form has used over time.
    pub fn parse(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace('-', " ");
        match normalized.as_str() {
            "demo" => ActivationType::Demo,
            "clinic" => ActivationType::Clinic,
            "festival" => ActivationType::Festival,
            "vip" | "vip event" => ActivationType::Vip,
            "trail building day" | "trail day" | "trail building" => ActivationType::TrailDay,
            "shop assist" => ActivationType::ShopAssist,
            _ => ActivationType::Other(label.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ActivationType::Demo => "Demo",
            ActivationType::Clinic => "Clinic",
            ActivationType::Festival => "Festival",
            ActivationType::Vip => "VIP Event",
            ActivationType::TrailDay => "Trail building day",
            ActivationType::ShopAssist => "Shop Assist",
            ActivationType::Other(label) => label,
        }
    }
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<ActivationType> for String {
    fn from(value: ActivationType) -> Self {
        value.label().to_string()
    }
}

impl From<String> for ActivationType {
    fn from(value: String) -> Self {
        ActivationType::parse(&value)
    }
}

/// Calendar buckets derived from the event date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// ISO-8601 week number
    pub week: u32,
    /// Quarter of the year, 1 through 4
    pub quarter: u32,
    pub year: i32,
    /// Display key such as `"2020 Q3"`
    pub year_quarter: String,
}

impl Period {
    pub fn of(date: NaiveDate) -> Self {
        let quarter = date.month0() / 3 + 1;
        Period {
            week: date.iso_week().week(),
            quarter,
            year: date.year(),
            year_quarter: format!("{} Q{}", date.year(), quarter),
        }
    }
}

/// Per-type audience and attendance counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub demo_bob: u32,
    pub clinic_staff_count: u32,
    pub festival_total_attendance: u32,
    pub festival_bob: u32,
    pub vip_total_attendance: u32,
    pub vip_bob: u32,
    pub trail_building_total_attendance: u32,
    pub other_activation_bob: u32,
}

impl Counts {
    /// Butts on bikes: riders across demo, festival, VIP and other activations.
    pub fn bob(&self) -> u64 {
        [self.demo_bob, self.festival_bob, self.vip_bob, self.other_activation_bob]
            .into_iter()
            .map(u64::from)
            .sum()
    }

    /// Overall audience used to size filtered map bubbles.
    pub fn audience(&self) -> u64 {
        [
            self.demo_bob,
            self.clinic_staff_count,
            self.festival_total_attendance,
            self.festival_bob,
            self.vip_total_attendance,
            self.vip_bob,
            self.other_activation_bob,
        ]
        .into_iter()
        .map(u64::from)
        .sum()
    }
}

/// Optional free-text answers attached to a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Details {
    pub demo_retailer: Option<String>,
    pub clinic_retailer: Option<String>,
    pub clinic_shop_level: Option<String>,
    pub festival_retail_partner: Option<String>,
    pub vip_retailer: Option<String>,
    pub trail_building_retailer: Option<String>,
    pub shop_assist_retailer: Option<String>,
    pub shop_assist_description: Option<String>,
    pub other_activation_retailer: Option<String>,
    pub other_activation_description: Option<String>,
}

/// Where the event took place
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Location {
    /// `(longitude, latitude)` when both are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }
}

/// One row per field-marketing event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    pub timestamp: Option<String>,
    pub developer: Option<String>,
    pub event_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub period: Option<Period>,
    pub activation_type: Option<ActivationType>,
    pub discipline: Option<String>,
    pub location: Location,
    pub counts: Counts,
    pub details: Details,
}

impl Activation {
    pub fn developer_name(&self) -> &str {
        self.developer.as_deref().unwrap_or("")
    }

    pub fn is_type(&self, kind: &ActivationType) -> bool {
        self.activation_type.as_ref() == Some(kind)
    }

    pub fn year_quarter(&self) -> Option<&str> {
        self.period.as_ref().map(|p| p.year_quarter.as_str())
    }

    /// Cell text for a column id from [`COLUMNS`] or [`DERIVED_COLUMNS`].
    ///
    /// Null values render as an empty string.
    pub fn cell(&self, column: &str) -> String {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        let number = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        let d = &self.details;
        let c = &self.counts;
        match column {
            "timestamp" => text(&self.timestamp),
            "developer" => text(&self.developer),
            "event_name" => text(&self.event_name),
            "date" => self.date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
            "city" => text(&self.location.city),
            "state" => text(&self.location.state),
            "zip" => text(&self.location.zip),
            "activation_type" => self
                .activation_type
                .as_ref()
                .map(|t| t.label().to_string())
                .unwrap_or_default(),
            "discipline" => text(&self.discipline),
            "demo_retailer" => text(&d.demo_retailer),
            "demo_bob" => c.demo_bob.to_string(),
            "clinic_retailer" => text(&d.clinic_retailer),
            "clinic_shop_level" => text(&d.clinic_shop_level),
            "clinic_staff_count" => c.clinic_staff_count.to_string(),
            "festival_retail_partner" => text(&d.festival_retail_partner),
            "festival_total_attendance" => c.festival_total_attendance.to_string(),
            "festival_bob" => c.festival_bob.to_string(),
            "vip_retailer" => text(&d.vip_retailer),
            "vip_total_attendance" => c.vip_total_attendance.to_string(),
            "vip_bob" => c.vip_bob.to_string(),
            "trail_building_retailer" => text(&d.trail_building_retailer),
            "trail_building_total_attendance" => c.trail_building_total_attendance.to_string(),
            "shop_assist_retailer" => text(&d.shop_assist_retailer),
            "shop_assist_description" => text(&d.shop_assist_description),
            "other_activation_retailer" => text(&d.other_activation_retailer),
            "other_activation_description" => text(&d.other_activation_description),
            "other_activation_bob" => c.other_activation_bob.to_string(),
            "latitude" => number(self.location.latitude),
            "longitude" => number(self.location.longitude),
            "week" => self.period.as_ref().map(|p| p.week.to_string()).unwrap_or_default(),
            "quarter" => self.period.as_ref().map(|p| p.quarter.to_string()).unwrap_or_default(),
            "year" => self.period.as_ref().map(|p| p.year.to_string()).unwrap_or_default(),
            "year_quarter" => self.year_quarter().unwrap_or_default().to_string(),
            _ => String::new(),
        }
    }
}

/// The normalized activation table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub records: Vec<Activation>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every column id of the normalized table, positional then derived.
    pub fn columns() -> impl Iterator<Item = &'static str> {
        COLUMNS.iter().chain(DERIVED_COLUMNS.iter()).copied()
    }

    /// Build the table from the raw `values` payload of the Sheets API.
    ///
    /// # Arguments
    /// * `values` - Rows of cell strings, header first
    ///
    /// # Errors
    /// * `NoData` when there is no header or no data row
    /// * `SchemaMismatch` when the header is narrower than the form layout
    /// * `InvalidCount`, `InvalidCoordinate` or `InvalidDate` for malformed cells
    pub fn from_values(values: &[Vec<String>]) -> Result<Self, DatasetError> {
        let (header, rows) = values.split_first().ok_or(DatasetError::NoData)?;
        if rows.is_empty() {
            return Err(DatasetError::NoData);
        }
        if header.len() < COLUMN_COUNT {
            return Err(DatasetError::SchemaMismatch {
                expected: COLUMN_COUNT,
                found: header.len(),
            });
        }
        if header.len() > COLUMN_COUNT {
            log::warn!(
                "sheet header has {} columns; ignoring {} beyond the form layout",
                header.len(),
                header.len() - COLUMN_COUNT
            );
        }

        let records = rows
            .iter()
            .enumerate()
            // Row numbers are 1-based sheet rows, the header being row 1
            .map(|(i, row)| normalize_row(i + 2, row))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("normalized {} activation records", records.len());
        Ok(Dataset { records })
    }
}

fn normalize_row(row_number: usize, row: &[String]) -> Result<Activation, DatasetError> {
    // The Sheets API drops trailing empty cells, so short rows are padded
    let cell = |index: usize| -> Option<&str> {
        row.get(index)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && *s != "None")
    };
    let text = |index: usize| cell(index).map(str::to_string);
    let count = |index: usize| parse_count(row_number, COLUMNS[index], cell(index));
    let coordinate = |index: usize| parse_coordinate(row_number, COLUMNS[index], cell(index));

    let date = cell(3).map(|raw| parse_date(row_number, raw)).transpose()?;

    Ok(Activation {
        timestamp: text(0),
        developer: text(1),
        event_name: text(2),
        date,
        period: date.map(Period::of),
        activation_type: cell(7).map(ActivationType::parse),
        discipline: text(8),
        location: Location {
            city: text(4),
            state: text(5),
            zip: text(6),
            latitude: coordinate(27)?,
            longitude: coordinate(28)?,
        },
        counts: Counts {
            demo_bob: count(10)?,
            clinic_staff_count: count(13)?,
            festival_total_attendance: count(15)?,
            festival_bob: count(16)?,
            vip_total_attendance: count(18)?,
            vip_bob: count(19)?,
            trail_building_total_attendance: count(21)?,
            other_activation_bob: count(26)?,
        },
        details: Details {
            demo_retailer: text(9),
            clinic_retailer: text(11),
            clinic_shop_level: text(12),
            festival_retail_partner: text(14),
            vip_retailer: text(17),
            trail_building_retailer: text(20),
            shop_assist_retailer: text(22),
            shop_assist_description: text(23),
            other_activation_retailer: text(24),
            other_activation_description: text(25),
        },
    })
}

fn parse_count(row: usize, column: &'static str, raw: Option<&str>) -> Result<u32, DatasetError> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    raw.replace(',', "")
        .parse::<u32>()
        .map_err(|_| DatasetError::InvalidCount {
            row,
            column,
            value: raw.to_string(),
        })
}

fn parse_coordinate(
    row: usize,
    column: &'static str,
    raw: Option<&str>,
) -> Result<Option<f64>, DatasetError> {
    raw.map(|raw| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| DatasetError::InvalidCoordinate {
                row,
                column,
                value: raw.to_string(),
            })
    })
    .transpose()
}

/// Parse a form date answer.
///
/// Accepts the US `M/D/YYYY` form the sheet uses, ISO dates, and either of
/// those followed by a time of day.
pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

fn parse_date(row: usize, raw: &str) -> Result<NaiveDate, DatasetError> {
    parse_date_str(raw).ok_or_else(|| DatasetError::InvalidDate {
        row,
        value: raw.to_string(),
    })
}
