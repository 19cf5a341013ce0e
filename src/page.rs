#![cfg(not(tarpaulin_include))]

//! Server-side rendering of the dashboard page.
//!
//! Widget values travel as query parameters: the forms submit with GET, and
//! every chart image and table link carries the same query string so that
//! each request recomputes exactly what the current widget values ask for.

use chrono::NaiveDate;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};

use crate::aggregate::{
    ALL_DEVELOPERS, ALL_DISCIPLINES, BonusSort, BonusTable, DateRange, DropdownOption, MainTable,
    Metric, Selection, Totals,
};
use crate::dataset::parse_date_str;
use crate::error::AppError;
use crate::reactive::{Content, Context, Output, ViewState};

pub const TEMPLATE_NAME: &str = "dashboard";

/// Register the dashboard template.
pub fn register_templates(handlebars: &mut Handlebars<'static>) -> Result<(), handlebars::TemplateError> {
    handlebars.register_template_string(TEMPLATE_NAME, include_str!("./templates/dashboard.hbs"))
}

/// Widget values as they arrive in the query string
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DashboardQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(default)]
    pub developer: Vec<String>,
    #[serde(default)]
    pub discipline: Vec<String>,
    pub quarter: Option<String>,
    pub selected: Option<String>,
    pub sort: Option<String>,
    #[serde(default)]
    pub desc: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn date_param(name: &str, value: Option<String>) -> Result<Option<NaiveDate>, AppError> {
    match non_empty(value) {
        None => Ok(None),
        Some(raw) => parse_date_str(&raw)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(format!("invalid {} date '{}'", name, raw))),
    }
}

impl DashboardQuery {
    /// Resolve the query into widget values.
    ///
    /// Missing dates fall back to the trailing `window_days` ending on `today`.
    ///
    /// # Errors
    /// * `BadRequest` for an unparseable date or a start after the end
    pub fn into_state(self, today: NaiveDate, window_days: i64) -> Result<ViewState, AppError> {
        let default = DateRange::trailing(today, window_days);
        let range = DateRange {
            start: date_param("start", self.start)?.unwrap_or(default.start),
            end: date_param("end", self.end)?.unwrap_or(default.end),
        };
        if range.start > range.end {
            return Err(AppError::BadRequest(format!(
                "start {} is after end {}",
                range.start, range.end
            )));
        }

        Ok(ViewState {
            range,
            developers: Selection::from_values(self.developer, ALL_DEVELOPERS),
            disciplines: Selection::from_values(self.discipline, ALL_DISCIPLINES),
            quarter: non_empty(self.quarter),
            selected_developer: non_empty(self.selected),
            bonus_sort: BonusSort::parse(self.sort.as_deref(), self.desc),
        })
    }
}

/// Widget values as query pairs, in a stable order.
fn query_pairs(state: &ViewState) -> Vec<(&'static str, String)> {
    let mut pairs: Vec<(&'static str, String)> = vec![
        ("start", state.range.start.format("%Y-%m-%d").to_string()),
        ("end", state.range.end.format("%Y-%m-%d").to_string()),
    ];
    if let Selection::Only(values) = &state.developers {
        pairs.extend(values.iter().map(|v| ("developer", v.clone())));
    }
    if let Selection::Only(values) = &state.disciplines {
        pairs.extend(values.iter().map(|v| ("discipline", v.clone())));
    }
    if let Some(quarter) = &state.quarter {
        pairs.push(("quarter", quarter.clone()));
    }
    if let Some(selected) = &state.selected_developer {
        pairs.push(("selected", selected.clone()));
    }
    if let Some(sort) = &state.bonus_sort {
        let column = sort.metric.map(Metric::id).unwrap_or("developer");
        pairs.push(("sort", column.to_string()));
        if sort.descending {
            pairs.push(("desc", "true".to_string()));
        }
    }
    pairs
}

/// Encode widget values back into a query string (without the leading `?`).
pub fn query_string(state: &ViewState) -> String {
    query_pairs(state)
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Debug, PartialEq, Serialize)]
struct HiddenField {
    name: &'static str,
    value: String,
}

/// Hidden inputs for every widget value a form does not edit itself.
fn hidden_fields(state: &ViewState, edited: &[&str]) -> Vec<HiddenField> {
    query_pairs(state)
        .into_iter()
        .filter(|(name, _)| !edited.contains(name))
        .map(|(name, value)| HiddenField { name, value })
        .collect()
}

#[derive(Debug, Serialize)]
struct OptionView {
    label: String,
    value: String,
    selected: bool,
}

fn option_views(options: Vec<DropdownOption>, chosen: &[String]) -> Vec<OptionView> {
    options
        .into_iter()
        .map(|o| OptionView {
            selected: chosen.contains(&o.value),
            label: o.label,
            value: o.value,
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct ColumnView {
    name: String,
    sort_url: String,
    sorted: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct CellView {
    value: u64,
    highlighted: bool,
}

#[derive(Debug, Serialize)]
struct BonusRowView {
    developer: String,
    select_url: String,
    selected: bool,
    cells: Vec<CellView>,
}

#[derive(Debug, Serialize)]
struct ChartView {
    title: String,
    url: String,
}

#[derive(Debug, Default, Serialize)]
struct PageView {
    developer_title: String,
    start: String,
    end: String,
    query: String,
    date_form_fields: Vec<HiddenField>,
    filter_form_fields: Vec<HiddenField>,
    quarter_form_fields: Vec<HiddenField>,
    record_count: usize,
    developer_options: Vec<OptionView>,
    discipline_options: Vec<OptionView>,
    quarter_options: Vec<OptionView>,
    totals: Totals,
    filtered_totals: Totals,
    quarter: Option<String>,
    selected_developer: Option<String>,
    bonus_columns: Vec<ColumnView>,
    bonus_rows: Vec<BonusRowView>,
    weekly_charts: Vec<ChartView>,
    table: Option<MainTable>,
}

fn bonus_view(page: &mut PageView, table: BonusTable, state: &ViewState, developer_title: &str) {
    let base = query_string(&ViewState {
        bonus_sort: None,
        ..state.clone()
    });
    let current = state.bonus_sort;

    let sort_link = |column: &str, metric: Option<Metric>| {
        let active = current.filter(|s| s.metric == metric);
        // Clicking the active column flips its direction
        let descending = active.is_some_and(|s| !s.descending);
        let mut url = format!("/?{}&sort={}", base, column);
        if descending {
            url.push_str("&desc=true");
        }
        ColumnView {
            name: match metric {
                Some(m) => m.column_name().to_string(),
                None => developer_title.to_string(),
            },
            sort_url: url,
            sorted: active.map(|s| if s.descending { "desc" } else { "asc" }),
        }
    };

    page.bonus_columns = std::iter::once(sort_link("developer", None))
        .chain(Metric::ALL.iter().map(|m| sort_link(m.id(), Some(*m))))
        .collect();

    page.bonus_rows = table
        .rows
        .into_iter()
        .map(|row| {
            let select = ViewState {
                selected_developer: Some(row.developer.clone()),
                ..state.clone()
            };
            BonusRowView {
                select_url: format!("/?{}", query_string(&select)),
                selected: state.selected_developer.as_deref() == Some(row.developer.as_str()),
                cells: Metric::ALL
                    .iter()
                    .map(|m| CellView {
                        value: row.tally.get(*m),
                        highlighted: row.highlighted.contains(m),
                    })
                    .collect(),
                developer: row.developer,
            }
        })
        .collect();
    page.quarter = table.quarter;
}

/// Outputs embedded in the page; maps and weekly bars load from their own routes.
const PAGE_OUTPUTS: [Output; 7] = [
    Output::Totals,
    Output::DeveloperOptions,
    Output::DisciplineOptions,
    Output::QuarterOptions,
    Output::FilteredTotals,
    Output::BonusTable,
    Output::MainTable,
];

/// Render the whole dashboard for the given widget values.
///
/// Each form carries the values of the widgets it does not edit, so
/// submitting one form leaves every other widget as it was.
pub fn render(handlebars: &Handlebars<'_>, ctx: &Context<'_>) -> Result<String, AppError> {
    let state = ctx.state;
    let query = query_string(state);
    let mut page = PageView {
        developer_title: ctx.developer_title.to_string(),
        start: state.range.start.format("%Y-%m-%d").to_string(),
        end: state.range.end.format("%Y-%m-%d").to_string(),
        date_form_fields: hidden_fields(state, &["start", "end"]),
        filter_form_fields: hidden_fields(state, &["developer", "discipline"]),
        quarter_form_fields: hidden_fields(state, &["quarter"]),
        record_count: ctx.dataset.len(),
        selected_developer: state.selected_developer.clone(),
        weekly_charts: Metric::ALL
            .iter()
            .map(|m| ChartView {
                title: m.chart_title().to_string(),
                url: format!("/charts/weekly/{}.svg?{}", m.id(), query),
            })
            .collect(),
        query,
        ..PageView::default()
    };

    let chosen_quarter: Vec<String> = ctx.quarter().into_iter().collect();
    for output in PAGE_OUTPUTS {
        match (output, ctx.compute(output)) {
            (Output::Totals, Content::Totals(t)) => page.totals = t,
            (Output::FilteredTotals, Content::Totals(t)) => page.filtered_totals = t,
            (Output::DeveloperOptions, Content::Options(o)) => {
                page.developer_options = option_views(o, &state.developer_values())
            }
            (Output::DisciplineOptions, Content::Options(o)) => {
                page.discipline_options = option_views(o, &state.discipline_values())
            }
            (Output::QuarterOptions, Content::Options(o)) => {
                page.quarter_options = option_views(o, &chosen_quarter)
            }
            (Output::BonusTable, Content::Bonus(table)) => {
                bonus_view(&mut page, table, state, ctx.developer_title)
            }
            (Output::MainTable, Content::Table(table)) => page.table = Some(table),
            _ => {}
        }
    }

    Ok(handlebars.render(TEMPLATE_NAME, &page)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::BonusCriteria;
    use crate::dataset::Dataset;
    use crate::dataset::fixtures::{header, row};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 9, 30).unwrap()
    }

    #[test]
    fn test_query_defaults_to_trailing_window() {
        let state = DashboardQuery::default().into_state(today(), 90).unwrap();
        assert_eq!(state.range.end, today());
        assert_eq!(state.range.start, NaiveDate::from_ymd_opt(2020, 7, 2).unwrap());
        assert_eq!(state.developers, Selection::All);
        assert_eq!(state.quarter, None);
        assert_eq!(state.bonus_sort, None);
    }

    #[test]
    fn test_query_sentinels_and_blanks() {
        let query = DashboardQuery {
            developer: vec!["Ana".into(), "All BDs".into()],
            discipline: vec!["Road".into()],
            quarter: Some(String::new()),
            selected: Some("Ben".into()),
            sort: Some("clinics".into()),
            desc: true,
            ..DashboardQuery::default()
        };
        let state = query.into_state(today(), 90).unwrap();
        assert_eq!(state.developers, Selection::All);
        assert_eq!(state.disciplines, Selection::Only(vec!["Road".into()]));
        assert_eq!(state.quarter, None);
        assert_eq!(state.selected_developer.as_deref(), Some("Ben"));
        assert_eq!(
            state.bonus_sort,
            Some(BonusSort { metric: Some(Metric::Clinics), descending: true })
        );
    }

    #[test]
    fn test_query_rejects_bad_dates() {
        let bad = DashboardQuery {
            start: Some("yesterday".into()),
            ..DashboardQuery::default()
        };
        assert!(matches!(bad.into_state(today(), 90), Err(AppError::BadRequest(_))));

        let reversed = DashboardQuery {
            start: Some("2020-09-01".into()),
            end: Some("2020-08-01".into()),
            ..DashboardQuery::default()
        };
        assert!(matches!(reversed.into_state(today(), 90), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_query_string_encodes_values() {
        let mut state = ViewState::new(DateRange::trailing(today(), 30));
        state.developers = Selection::Only(vec!["Ana Lopez".into(), "Ben".into()]);
        state.quarter = Some("2020 Q3".into());
        let qs = query_string(&state);
        assert_eq!(
            qs,
            "start=2020-08-31&end=2020-09-30&developer=Ana%20Lopez&developer=Ben&quarter=2020%20Q3"
        );
    }

    #[test]
    fn test_hidden_fields_skip_edited_widgets() {
        let mut state = ViewState::new(DateRange::trailing(today(), 30));
        state.developers = Selection::Only(vec!["Ben".into()]);
        state.quarter = Some("2020 Q3".into());
        state.selected_developer = Some("Ana".into());
        state.bonus_sort = BonusSort::parse(Some("clinics"), true);

        let names: Vec<&str> = hidden_fields(&state, &["quarter"]).iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["start", "end", "developer", "selected", "sort", "desc"]);

        let fields = hidden_fields(&state, &["start", "end"]);
        assert_eq!(fields[0], HiddenField { name: "developer", value: "Ben".into() });
        assert_eq!(fields[1], HiddenField { name: "quarter", value: "2020 Q3".into() });
    }

    #[test]
    fn test_forms_keep_other_widget_values() {
        let dataset = Dataset::from_values(&[
            header(),
            row("Ana", "7/1/2020", "Demo", "Mountain", &[(10, "400")]),
            row("Ben", "7/9/2020", "Clinic", "Road", &[(13, "5")]),
        ])
        .unwrap();
        let query = DashboardQuery {
            start: Some("2020-06-01".into()),
            end: Some("2020-09-30".into()),
            developer: vec!["Ben".into()],
            quarter: Some("2020 Q3".into()),
            selected: Some("Ana".into()),
            ..DashboardQuery::default()
        };
        let state = query.into_state(today(), 90).unwrap();
        let criteria = BonusCriteria::default();
        let ctx = Context {
            dataset: &dataset,
            state: &state,
            criteria: &criteria,
            developer_title: "Brand Developer",
        };
        let mut handlebars = Handlebars::new();
        register_templates(&mut handlebars).unwrap();
        let html = render(&handlebars, &ctx).unwrap();

        let forms: Vec<&str> = html.split("<form").skip(1).collect();
        assert_eq!(forms.len(), 3);
        let (date_form, filter_form, quarter_form) = (forms[0], forms[1], forms[2]);

        let developer = r#"<input type="hidden" name="developer" value="Ben">"#;
        let selected = r#"<input type="hidden" name="selected" value="Ana">"#;
        let quarter = r#"<input type="hidden" name="quarter" value="2020 Q3">"#;
        let start = r#"<input type="hidden" name="start" value="2020-06-01">"#;

        assert!(date_form.contains(developer) && date_form.contains(selected) && date_form.contains(quarter));
        assert!(!date_form.contains(start));
        assert!(filter_form.contains(start) && filter_form.contains(selected) && filter_form.contains(quarter));
        assert!(!filter_form.contains(developer));
        assert!(quarter_form.contains(start) && quarter_form.contains(developer) && quarter_form.contains(selected));
        assert!(!quarter_form.contains(quarter));
    }

    #[test]
    fn test_render_dashboard() {
        let dataset = Dataset::from_values(&[
            header(),
            row("Ana", "7/1/2020", "Demo", "Mountain", &[(10, "400")]),
            row("Ben", "7/9/2020", "Clinic", "Road", &[(13, "5")]),
        ])
        .unwrap();
        let state = DashboardQuery::default().into_state(today(), 120).unwrap();
        let criteria = BonusCriteria::default();
        let ctx = Context {
            dataset: &dataset,
            state: &state,
            criteria: &criteria,
            developer_title: "Brand Developer",
        };
        let mut handlebars = Handlebars::new();
        register_templates(&mut handlebars).unwrap();

        let html = render(&handlebars, &ctx).unwrap();
        assert!(html.contains("Field Marketing Tracker"));
        assert!(html.contains("Brand Developer"));
        assert!(html.contains("2020 Q3"));
        assert!(html.contains("class=\"met\""));
        assert!(html.contains("/charts/weekly/trail_day.svg?"));
        assert!(html.contains("/export/activations.csv?"));
    }
}
