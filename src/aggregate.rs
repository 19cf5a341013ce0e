//! Aggregation handlers behind every dashboard widget.
//!
//! Each function here is a pure computation over borrowed activation records:
//! the intermediate views (date range, filters, quarter) narrow the table and
//! the handlers reduce a view into the content one widget displays.

use crate::dataset::{Activation, ActivationType, Dataset};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dropdown value that selects every developer
pub const ALL_DEVELOPERS: &str = "All BDs";
/// Dropdown value that selects every discipline
pub const ALL_DISCIPLINES: &str = "All";

/// Bubble scale for the main map (bubble area is value / scale)
pub const MAIN_MAP_SCALE: f64 = 0.07;
/// Bubble scale for the filtered map
pub const FILTERED_MAP_SCALE: f64 = 0.1;

/// Open range of event dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The `days`-long window ending on `today`.
    pub fn trailing(today: NaiveDate, days: i64) -> Self {
        DateRange {
            start: today - Duration::days(days),
            end: today,
        }
    }

    /// Both endpoint dates are excluded.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start < date && date < self.end
    }
}

/// A multi-select dropdown value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    All,
    Only(Vec<String>),
}

impl Selection {
    /// Interpret raw dropdown values, where `sentinel` (or nothing) means all.
    pub fn from_values(values: Vec<String>, sentinel: &str) -> Self {
        if values.is_empty() || values.iter().any(|v| v == sentinel) {
            Selection::All
        } else {
            Selection::Only(values)
        }
    }

    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(values) => value.is_some_and(|v| values.iter().any(|s| s == v)),
        }
    }

    /// Raw dropdown values, with `sentinel` standing for all.
    pub fn values(&self, sentinel: &str) -> Vec<String> {
        match self {
            Selection::All => vec![sentinel.to_string()],
            Selection::Only(values) => values.clone(),
        }
    }
}

// ============================================================================
// Intermediate views
// ============================================================================

/// Records whose event date falls inside `range`. Undated records never match.
pub fn date_view<'a>(dataset: &'a Dataset, range: &DateRange) -> Vec<&'a Activation> {
    dataset
        .records
        .iter()
        .filter(|r| r.date.is_some_and(|d| range.contains(d)))
        .collect()
}

/// Narrow a view to the selected developers and disciplines.
pub fn filtered_view<'a>(
    rows: &[&'a Activation],
    developers: &Selection,
    disciplines: &Selection,
) -> Vec<&'a Activation> {
    rows.iter()
        .copied()
        .filter(|r| developers.matches(r.developer.as_deref()))
        .filter(|r| disciplines.matches(r.discipline.as_deref()))
        .collect()
}

/// Records of the whole dataset that fall in the given `"YYYY Qn"` quarter.
pub fn quarter_view<'a>(dataset: &'a Dataset, year_quarter: &str) -> Vec<&'a Activation> {
    dataset
        .records
        .iter()
        .filter(|r| r.year_quarter() == Some(year_quarter))
        .collect()
}

// ============================================================================
// Totals
// ============================================================================

/// Headline numbers shown above each map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub bob: u64,
    pub activations: usize,
    pub staff_educated: u64,
}

pub fn totals(rows: &[&Activation]) -> Totals {
    Totals {
        bob: rows.iter().map(|r| r.counts.bob()).sum(),
        activations: rows.len(),
        staff_educated: rows.iter().map(|r| r.counts.clinic_staff_count as u64).sum(),
    }
}

// ============================================================================
// Dropdown options
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub label: String,
    pub value: String,
}

impl DropdownOption {
    fn same(value: &str) -> Self {
        DropdownOption {
            label: value.to_string(),
            value: value.to_string(),
        }
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

fn options_with_sentinel<'a>(sentinel: &str, values: impl Iterator<Item = &'a str>) -> Vec<DropdownOption> {
    std::iter::once(DropdownOption::same(sentinel))
        .chain(distinct(values).into_iter().map(DropdownOption::same))
        .collect()
}

pub fn developer_options(rows: &[&Activation]) -> Vec<DropdownOption> {
    options_with_sentinel(ALL_DEVELOPERS, rows.iter().filter_map(|r| r.developer.as_deref()))
}

pub fn discipline_options(rows: &[&Activation]) -> Vec<DropdownOption> {
    options_with_sentinel(ALL_DISCIPLINES, rows.iter().filter_map(|r| r.discipline.as_deref()))
}

pub fn quarter_options(rows: &[&Activation]) -> Vec<DropdownOption> {
    distinct(rows.iter().filter_map(|r| r.year_quarter()))
        .into_iter()
        .map(DropdownOption::same)
        .collect()
}

/// The most recent quarter present in `rows`, used as the quarter default.
pub fn latest_quarter(rows: &[&Activation]) -> Option<String> {
    rows.iter()
        .filter_map(|r| r.period.as_ref())
        .max_by_key(|p| (p.year, p.quarter))
        .map(|p| p.year_quarter.clone())
}

// ============================================================================
// Maps
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Area-scaled circle sized by the point value
    Bubble,
    /// Fixed-size diamond for shop-assist visits
    Diamond,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub longitude: f64,
    pub latitude: f64,
    pub developer: String,
    /// Audience count for bubbles, shop name for diamonds
    pub hover: String,
    /// Rendered marker diameter in pixels
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapTrace {
    pub name: String,
    pub marker: MarkerKind,
    pub points: Vec<MapPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapFigure {
    pub title: String,
    pub traces: Vec<MapTrace>,
}

const SHOP_ASSIST_SIZE: f64 = 10.0;

/// Marker diameter for an area-scaled bubble.
pub fn bubble_size(value: u64, scale: f64) -> f64 {
    (value as f64 / scale).sqrt()
}

fn bubble_trace<'a>(
    name: &str,
    rows: impl Iterator<Item = &'a &'a Activation>,
    value: impl Fn(&Activation) -> u64,
    scale: f64,
) -> MapTrace {
    let points = rows
        .filter_map(|r| {
            let amount = value(r);
            let (longitude, latitude) = r.location.coordinates()?;
            (amount > 0).then(|| MapPoint {
                longitude,
                latitude,
                developer: r.developer_name().to_string(),
                hover: amount.to_string(),
                size: bubble_size(amount, scale),
            })
        })
        .collect();
    MapTrace {
        name: name.to_string(),
        marker: MarkerKind::Bubble,
        points,
    }
}

fn shop_assist_trace(rows: &[&Activation]) -> MapTrace {
    let points = rows
        .iter()
        .filter_map(|r| {
            let shop = r.details.shop_assist_retailer.as_ref()?;
            let (longitude, latitude) = r.location.coordinates()?;
            Some(MapPoint {
                longitude,
                latitude,
                developer: r.developer_name().to_string(),
                hover: shop.clone(),
                size: SHOP_ASSIST_SIZE,
            })
        })
        .collect();
    MapTrace {
        name: "Shop Assist".to_string(),
        marker: MarkerKind::Diamond,
        points,
    }
}

/// The activity map: one bubble trace per activation metric plus shop assists.
pub fn main_map(rows: &[&Activation]) -> MapFigure {
    let metrics: [(&str, fn(&Activation) -> u64); 6] = [
        ("Demo", |r| r.counts.demo_bob.into()),
        ("Clinic", |r| r.counts.clinic_staff_count.into()),
        ("Festival", |r| r.counts.festival_bob.into()),
        ("VIP Event", |r| r.counts.vip_bob.into()),
        ("Trail Day", |r| r.counts.trail_building_total_attendance.into()),
        ("Other Test Rides", |r| r.counts.other_activation_bob.into()),
    ];
    let mut traces: Vec<MapTrace> = metrics
        .iter()
        .map(|(name, value)| bubble_trace(name, rows.iter(), value, MAIN_MAP_SCALE))
        .collect();
    traces.push(shop_assist_trace(rows));
    MapFigure {
        title: "Field Marketing Activity".to_string(),
        traces,
    }
}

/// The filtered map: one bubble trace per discipline, sized by total audience.
///
/// `rows` is expected to be the filtered view already; `disciplines` only
/// decides which traces appear and in what order.
pub fn filtered_map(rows: &[&Activation], disciplines: &Selection) -> MapFigure {
    let names: Vec<String> = match disciplines {
        Selection::All => distinct(rows.iter().filter_map(|r| r.discipline.as_deref()))
            .into_iter()
            .map(String::from)
            .collect(),
        Selection::Only(values) => values.clone(),
    };
    let mut traces: Vec<MapTrace> = names
        .iter()
        .map(|name| {
            let in_discipline = rows.iter().filter(|r| r.discipline.as_deref() == Some(name.as_str()));
            bubble_trace(name, in_discipline, |r| r.counts.audience(), FILTERED_MAP_SCALE)
        })
        .collect();
    traces.push(shop_assist_trace(rows));
    MapFigure {
        title: "Filtered Activity".to_string(),
        traces,
    }
}

// ============================================================================
// Bonus tracker and weekly bars
// ============================================================================

/// The four bonus metrics counted per developer or per week
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total_bob: u64,
    pub activations: u32,
    pub clinics: u32,
    pub trail_days: u32,
}

impl Tally {
    fn add(&mut self, record: &Activation) {
        self.total_bob += record.counts.bob();
        if record.is_type(&ActivationType::Clinic) {
            self.clinics += 1;
        } else if record.is_type(&ActivationType::TrailDay) {
            self.trail_days += 1;
        } else {
            self.activations += 1;
        }
    }

    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::TotalBob => self.total_bob,
            Metric::Activations => self.activations as u64,
            Metric::Clinics => self.clinics as u64,
            Metric::TrailDays => self.trail_days as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalBob,
    Activations,
    Clinics,
    TrailDays,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::TotalBob,
        Metric::Activations,
        Metric::Clinics,
        Metric::TrailDays,
    ];

    /// Column id used by the bonus table and chart routes.
    pub fn id(self) -> &'static str {
        match self {
            Metric::TotalBob => "total_bob",
            Metric::Activations => "activation",
            Metric::Clinics => "clinics",
            Metric::TrailDays => "trail_day",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Metric::ALL.into_iter().find(|m| m.id() == id)
    }

    pub fn column_name(self) -> &'static str {
        match self {
            Metric::TotalBob => "Total B.O.B.",
            Metric::Activations => "Total Activations",
            Metric::Clinics => "Total Clinics",
            Metric::TrailDays => "Trail Building Days",
        }
    }

    pub fn chart_title(self) -> &'static str {
        match self {
            Metric::TotalBob => "Total Butts on Bikes",
            Metric::Activations => "Total Activations",
            Metric::Clinics => "Total Clinics",
            Metric::TrailDays => "Total Trail Building Days",
        }
    }
}

/// Thresholds a developer must beat in a quarter to earn each bonus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusCriteria {
    pub total_bob: u64,
    pub activations: u64,
    pub clinics: u64,
    pub trail_days: u64,
}

impl Default for BonusCriteria {
    fn default() -> Self {
        Self {
            total_bob: 150,
            activations: 6,
            clinics: 12,
            trail_days: 1,
        }
    }
}

impl BonusCriteria {
    pub fn threshold(&self, metric: Metric) -> u64 {
        match metric {
            Metric::TotalBob => self.total_bob,
            Metric::Activations => self.activations,
            Metric::Clinics => self.clinics,
            Metric::TrailDays => self.trail_days,
        }
    }

    /// Whether `tally` strictly exceeds the threshold for `metric`.
    pub fn met(&self, tally: &Tally, metric: Metric) -> bool {
        tally.get(metric) > self.threshold(metric)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusRow {
    pub developer: String,
    #[serde(flatten)]
    pub tally: Tally,
    /// Metric ids whose cell is highlighted
    pub highlighted: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusTable {
    pub quarter: Option<String>,
    pub rows: Vec<BonusRow>,
}

/// Sort order requested for the bonus table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusSort {
    /// `None` sorts by developer name
    pub metric: Option<Metric>,
    pub descending: bool,
}

impl BonusSort {
    pub fn parse(column: Option<&str>, descending: bool) -> Option<Self> {
        let column = column?;
        let metric = match column {
            "developer" | "brand_developer" | "market_developer" => None,
            other => Some(Metric::from_id(other)?),
        };
        Some(BonusSort { metric, descending })
    }
}

fn group_by<K: Ord + Clone>(
    rows: &[&Activation],
    key: impl Fn(&Activation) -> Option<K>,
) -> Vec<(K, Tally)> {
    // Keep first-appearance order for string keys; BTreeMap only indexes
    let mut order: Vec<K> = Vec::new();
    let mut tallies: BTreeMap<K, Tally> = BTreeMap::new();
    for record in rows {
        let Some(k) = key(record) else { continue };
        if !tallies.contains_key(&k) {
            order.push(k.clone());
        }
        tallies.entry(k).or_default().add(record);
    }
    order
        .into_iter()
        .map(|k| {
            let tally = tallies.get(&k).copied().unwrap_or_default();
            (k, tally)
        })
        .collect()
}

/// Per-developer quarterly summary with bonus highlighting.
///
/// # Arguments
/// * `rows` - The quarter view
/// * `quarter` - Quarter label echoed back in the table
/// * `criteria` - Bonus thresholds
/// * `sort` - Optional column ordering; developers keep sheet order otherwise
pub fn bonus_table(
    rows: &[&Activation],
    quarter: Option<&str>,
    criteria: &BonusCriteria,
    sort: Option<BonusSort>,
) -> BonusTable {
    let mut table_rows: Vec<BonusRow> = group_by(rows, |r| r.developer.clone())
        .into_iter()
        .map(|(developer, tally)| BonusRow {
            developer,
            highlighted: Metric::ALL
                .into_iter()
                .filter(|m| criteria.met(&tally, *m))
                .collect(),
            tally,
        })
        .collect();

    if let Some(sort) = sort {
        table_rows.sort_by(|a, b| {
            let ordering = match sort.metric {
                Some(metric) => a.tally.get(metric).cmp(&b.tally.get(metric)),
                None => a.developer.cmp(&b.developer),
            };
            if sort.descending { ordering.reverse() } else { ordering }
        });
    }

    BonusTable {
        quarter: quarter.map(String::from),
        rows: table_rows,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekRow {
    pub week: u32,
    #[serde(flatten)]
    pub tally: Tally,
}

/// Weekly bar data for one developer or for everyone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySeries {
    /// Developer name, or "All"
    pub who: String,
    pub weeks: Vec<WeekRow>,
}

impl WeeklySeries {
    pub fn title(&self, metric: Metric) -> String {
        format!("{} - {}", metric.chart_title(), self.who)
    }

    /// `(week, value)` bars for one metric.
    pub fn bars(&self, metric: Metric) -> Vec<(u32, u64)> {
        self.weeks.iter().map(|w| (w.week, w.tally.get(metric))).collect()
    }
}

/// Group the quarter view by ISO week, optionally for one developer only.
pub fn weekly_series(rows: &[&Activation], developer: Option<&str>) -> WeeklySeries {
    let selected: Vec<&Activation> = rows
        .iter()
        .copied()
        .filter(|r| developer.is_none_or(|d| r.developer.as_deref() == Some(d)))
        .collect();
    let mut weeks: Vec<WeekRow> = group_by(&selected, |r| r.period.as_ref().map(|p| p.week))
        .into_iter()
        .map(|(week, tally)| WeekRow { week, tally })
        .collect();
    weeks.sort_by_key(|w| w.week);
    WeeklySeries {
        who: developer.unwrap_or("All").to_string(),
        weeks,
    }
}

// ============================================================================
// Main table
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub id: String,
    pub name: String,
}

/// Every record of a view with every column, ready for display or export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainTable {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<String>>,
}

/// Human-readable header for a column id.
pub fn column_title(id: &str, developer_title: &str) -> String {
    match id {
        "developer" => developer_title.to_string(),
        "city" => "Location City (closest)".to_string(),
        "state" => "Location State".to_string(),
        "zip" => "Location Zip Code".to_string(),
        "week" => "Week".to_string(),
        "year_quarter" => "Year Quarter".to_string(),
        other => {
            let mut title = String::with_capacity(other.len());
            for (i, word) in other.split('_').enumerate() {
                if i > 0 {
                    title.push(' ');
                }
                let mut chars = word.chars();
                if let Some(first) = chars.next() {
                    title.extend(first.to_uppercase());
                    title.push_str(chars.as_str());
                }
            }
            title.replace("Bob", "B.O.B.")
        }
    }
}

pub fn main_table(rows: &[&Activation], developer_title: &str) -> MainTable {
    let columns = Dataset::columns()
        .map(|id| ColumnDef {
            id: id.to_string(),
            name: column_title(id, developer_title),
        })
        .collect();
    let rows = rows
        .iter()
        .map(|r| Dataset::columns().map(|id| r.cell(id)).collect())
        .collect();
    MainTable { columns, rows }
}
