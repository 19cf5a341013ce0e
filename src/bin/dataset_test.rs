use chrono::NaiveDate;
use field_tracker::aggregate::{self, BonusCriteria, BonusSort, DateRange, Metric, Selection};
use field_tracker::dataset::{COLUMN_COUNT, COLUMNS, Dataset, DatasetError};
use field_tracker::reactive::{Content, Context, Input, Output, ViewState};

// Helper function to build a header row matching the form layout
fn header() -> Vec<String> {
    COLUMNS.iter().map(|c| c.to_string()).collect()
}

// Helper function to build a response row with column overrides
fn response(developer: &str, date: &str, kind: &str, discipline: &str, cells: &[(usize, &str)]) -> Vec<String> {
    let mut row = vec![String::new(); COLUMN_COUNT];
    row[0] = format!("{} 09:30:00", date);
    row[1] = developer.to_string();
    row[2] = format!("{} at the shop", kind);
    row[3] = date.to_string();
    row[7] = kind.to_string();
    row[8] = discipline.to_string();
    row[27] = "40.0".to_string();
    row[28] = "-105.3".to_string();
    for (index, value) in cells {
        row[*index] = value.to_string();
    }
    row
}

fn sample() -> Dataset {
    Dataset::from_values(&[
        header(),
        response("Ana", "7/1/2020", "Demo", "Mountain", &[(10, "120")]),
        response("Ana", "7/8/2020", "Festival", "Mountain", &[(15, "900"), (16, "60")]),
        response("Ana", "7/15/2020", "Trail building day", "Mountain", &[(21, "30")]),
        response("Ana", "7/22/2020", "Trail day", "Mountain", &[(21, "12")]),
        response("Ben", "8/3/2020", "Clinic", "Road", &[(13, "9")]),
        response("Ben", "11/5/2020", "Demo", "Road", &[(10, "15")]),
    ])
    .unwrap()
}

fn range(start: (i32, u32, u32), end: (i32, u32, u32)) -> DateRange {
    DateRange {
        start: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
        end: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
    }
}

fn test_normalize() {
    println!("\n====== Testing Dataset::from_values ======");
    let dataset = sample();
    assert_eq!(dataset.len(), 6);
    println!("✓ Six responses normalized");

    let first = &dataset.records[0];
    assert_eq!(first.counts.demo_bob, 120);
    assert_eq!(first.counts.clinic_staff_count, 0);
    println!("✓ Blank counts read as zero");

    assert_eq!(first.year_quarter(), Some("2020 Q3"));
    assert_eq!(dataset.records[5].year_quarter(), Some("2020 Q4"));
    println!("✓ Quarters derived from event dates");

    assert_eq!(Dataset::from_values(&[header()]), Err(DatasetError::NoData));
    println!("✓ Header-only sheet reports no data");

    let bad = Dataset::from_values(&[header(), response("Ana", "7/1/2020", "Demo", "Road", &[(10, "-4")])]);
    assert!(matches!(bad, Err(DatasetError::InvalidCount { row: 2, .. })));
    println!("✓ Negative count rejected with its row number");
}

fn test_views() {
    println!("\n====== Testing date and filter views ======");
    let dataset = sample();
    let summer = range((2020, 6, 30), (2020, 7, 23));
    let view = aggregate::date_view(&dataset, &summer);
    assert_eq!(view.len(), 4);
    println!("✓ Four July responses fall inside the range");

    let edges = aggregate::date_view(&dataset, &range((2020, 7, 1), (2020, 7, 22)));
    assert_eq!(edges.len(), 2);
    println!("✓ Responses on the start and end dates are left out");

    let totals = aggregate::totals(&view);
    assert_eq!(totals.bob, 180);
    assert_eq!(totals.activations, 4);
    println!("✓ Totals: {} B.O.B. over {} activations", totals.bob, totals.activations);

    let all = aggregate::date_view(&dataset, &range((2020, 1, 1), (2020, 12, 31)));
    let road = aggregate::filtered_view(&all, &Selection::All, &Selection::Only(vec!["Road".to_string()]));
    assert_eq!(road.len(), 2);
    println!("✓ Discipline filter keeps only Road responses");
}

fn test_bonus_tracker() {
    println!("\n====== Testing bonus tracker ======");
    let dataset = sample();
    let quarter = aggregate::quarter_view(&dataset, "2020 Q3");
    let criteria = BonusCriteria::default();
    let table = aggregate::bonus_table(&quarter, Some("2020 Q3"), &criteria, None);

    assert_eq!(table.rows.len(), 2);
    let ana = &table.rows[0];
    assert_eq!(ana.developer, "Ana");
    assert_eq!(ana.tally.total_bob, 180);
    assert_eq!(ana.tally.activations, 2);
    assert_eq!(ana.tally.trail_days, 2);
    assert_eq!(ana.highlighted, vec![Metric::TotalBob, Metric::TrailDays]);
    println!("✓ Ana beats the B.O.B. and trail day thresholds");

    let sorted = aggregate::bonus_table(&quarter, Some("2020 Q3"), &criteria, BonusSort::parse(Some("clinics"), true));
    assert_eq!(sorted.rows[0].developer, "Ben");
    println!("✓ Sorting by clinics puts Ben first");

    let weekly = aggregate::weekly_series(&quarter, Some("Ana"));
    assert_eq!(weekly.weeks.len(), 4);
    assert_eq!(weekly.title(Metric::TotalBob), "Total Butts on Bikes - Ana");
    println!("✓ Weekly series has one bar per week");
}

fn test_reactive_graph() {
    println!("\n====== Testing reactive updates ======");
    let dataset = sample();
    let state = ViewState::new(range((2020, 6, 30), (2020, 9, 30)));
    let criteria = BonusCriteria::default();
    let ctx = Context {
        dataset: &dataset,
        state: &state,
        criteria: &criteria,
        developer_title: "Brand Developer",
    };

    let updates = ctx.update(&[Input::SelectedDeveloper]);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, Output::WeeklyBars);
    println!("✓ Selecting a developer only redraws the weekly bars");

    match ctx.compute(Output::MainTable) {
        Content::Table(table) => {
            assert_eq!(table.rows.len(), 5);
            assert_eq!(table.columns[1].name, "Brand Developer");
            println!("✓ Main table lists {} rows", table.rows.len());
        }
        other => panic!("unexpected content {:?}", other),
    }
}

fn main() {
    test_normalize();
    test_views();
    test_bonus_tracker();
    test_reactive_graph();
    println!("\nAll dataset tests passed!");
}
