//! Declarative dependency graph between dashboard inputs and outputs.
//!
//! Every output widget subscribes to a fixed set of inputs. When a set of
//! inputs changes, only the outputs subscribed to one of them are recomputed,
//! and each recomputation is a pure function of the dataset and the current
//! widget values.

use crate::aggregate::{
    self, ALL_DEVELOPERS, ALL_DISCIPLINES, BonusCriteria, BonusSort, BonusTable, DateRange,
    DropdownOption, MainTable, MapFigure, Selection, Totals, WeeklySeries,
};
use crate::dataset::{Activation, Dataset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A widget value the user can change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    /// The normalized table itself (a refresh)
    Data,
    DateRange,
    Developers,
    Disciplines,
    Quarter,
    SelectedDeveloper,
}

/// A data-bound widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    Totals,
    MainMap,
    DeveloperOptions,
    DisciplineOptions,
    QuarterOptions,
    FilteredTotals,
    FilteredMap,
    BonusTable,
    WeeklyBars,
    MainTable,
}

impl Output {
    pub const ALL: [Output; 10] = [
        Output::Totals,
        Output::MainMap,
        Output::DeveloperOptions,
        Output::DisciplineOptions,
        Output::QuarterOptions,
        Output::FilteredTotals,
        Output::FilteredMap,
        Output::BonusTable,
        Output::WeeklyBars,
        Output::MainTable,
    ];

    /// Inputs this output subscribes to.
    pub fn inputs(self) -> &'static [Input] {
        match self {
            Output::Totals
            | Output::MainMap
            | Output::DeveloperOptions
            | Output::DisciplineOptions
            | Output::QuarterOptions
            | Output::MainTable => &[Input::Data, Input::DateRange],
            Output::FilteredTotals | Output::FilteredMap => &[
                Input::Data,
                Input::DateRange,
                Input::Developers,
                Input::Disciplines,
            ],
            Output::BonusTable => &[Input::Data, Input::Quarter],
            Output::WeeklyBars => &[Input::Data, Input::Quarter, Input::SelectedDeveloper],
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Output::Totals => "totals",
            Output::MainMap => "main_map",
            Output::DeveloperOptions => "developer_options",
            Output::DisciplineOptions => "discipline_options",
            Output::QuarterOptions => "quarter_options",
            Output::FilteredTotals => "filtered_totals",
            Output::FilteredMap => "filtered_map",
            Output::BonusTable => "bonus_table",
            Output::WeeklyBars => "weekly_bars",
            Output::MainTable => "main_table",
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Output {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Output::ALL
            .into_iter()
            .find(|o| o.id() == s)
            .ok_or_else(|| format!("unknown output '{}'", s))
    }
}

/// Outputs that must be recomputed after `changed` inputs, in declaration order.
pub fn affected(changed: &[Input]) -> Vec<Output> {
    Output::ALL
        .into_iter()
        .filter(|o| o.inputs().iter().any(|i| changed.contains(i)))
        .collect()
}

/// Current value of every input widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub range: DateRange,
    pub developers: Selection,
    pub disciplines: Selection,
    /// `None` picks the latest quarter of the date view
    pub quarter: Option<String>,
    /// Developer row picked in the bonus table
    pub selected_developer: Option<String>,
    pub bonus_sort: Option<BonusSort>,
}

impl ViewState {
    pub fn new(range: DateRange) -> Self {
        ViewState {
            range,
            developers: Selection::All,
            disciplines: Selection::All,
            quarter: None,
            selected_developer: None,
            bonus_sort: None,
        }
    }

    pub fn developer_values(&self) -> Vec<String> {
        self.developers.values(ALL_DEVELOPERS)
    }

    pub fn discipline_values(&self) -> Vec<String> {
        self.disciplines.values(ALL_DISCIPLINES)
    }
}

/// Computed content of one output widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Content {
    Totals(Totals),
    Map(MapFigure),
    Options(Vec<DropdownOption>),
    Bonus(BonusTable),
    Weekly(WeeklySeries),
    Table(MainTable),
}

/// Shared inputs for every handler of one recompute pass
pub struct Context<'a> {
    pub dataset: &'a Dataset,
    pub state: &'a ViewState,
    pub criteria: &'a BonusCriteria,
    pub developer_title: &'a str,
}

impl<'a> Context<'a> {
    fn date_view(&self) -> Vec<&'a Activation> {
        aggregate::date_view(self.dataset, &self.state.range)
    }

    fn filtered_view(&self) -> Vec<&'a Activation> {
        aggregate::filtered_view(&self.date_view(), &self.state.developers, &self.state.disciplines)
    }

    /// The quarter the bonus tracker reports on.
    pub fn quarter(&self) -> Option<String> {
        self.state
            .quarter
            .clone()
            .or_else(|| aggregate::latest_quarter(&self.date_view()))
    }

    fn quarter_view(&self) -> Vec<&'a Activation> {
        match self.quarter() {
            Some(q) => aggregate::quarter_view(self.dataset, &q),
            None => Vec::new(),
        }
    }

    /// Compute one output.
    pub fn compute(&self, output: Output) -> Content {
        match output {
            Output::Totals => Content::Totals(aggregate::totals(&self.date_view())),
            Output::MainMap => Content::Map(aggregate::main_map(&self.date_view())),
            Output::DeveloperOptions => Content::Options(aggregate::developer_options(&self.date_view())),
            Output::DisciplineOptions => Content::Options(aggregate::discipline_options(&self.date_view())),
            Output::QuarterOptions => Content::Options(aggregate::quarter_options(&self.date_view())),
            Output::FilteredTotals => Content::Totals(aggregate::totals(&self.filtered_view())),
            Output::FilteredMap => Content::Map(aggregate::filtered_map(&self.filtered_view(), &self.state.disciplines)),
            Output::BonusTable => {
                let quarter = self.quarter();
                Content::Bonus(aggregate::bonus_table(
                    &self.quarter_view(),
                    quarter.as_deref(),
                    self.criteria,
                    self.state.bonus_sort,
                ))
            }
            Output::WeeklyBars => Content::Weekly(aggregate::weekly_series(
                &self.quarter_view(),
                self.state.selected_developer.as_deref(),
            )),
            Output::MainTable => Content::Table(aggregate::main_table(&self.date_view(), self.developer_title)),
        }
    }

    /// Recompute every output affected by `changed`.
    pub fn update(&self, changed: &[Input]) -> Vec<(Output, Content)> {
        let outputs = affected(changed);
        log::debug!("recomputing {} outputs for {:?}", outputs.len(), changed);
        outputs.into_iter().map(|o| (o, self.compute(o))).collect()
    }
}
