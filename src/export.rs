#![cfg(not(tarpaulin_include))]

use crate::aggregate::{BonusTable, MainTable, Metric};
use std::error::Error;

/// Column ids written as numbers in spreadsheet exports
const NUMERIC_COLUMNS: [&str; 13] = [
    "demo_bob",
    "clinic_staff_count",
    "festival_total_attendance",
    "festival_bob",
    "vip_total_attendance",
    "vip_bob",
    "trail_building_total_attendance",
    "other_activation_bob",
    "latitude",
    "longitude",
    "week",
    "quarter",
    "year",
];

/// Append one CSV field, quoting it when it holds a comma, quote or newline.
fn push_field(out: &mut String, value: &str) {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        let escaped = value.replace('"', "\"\"");
        out.push_str(&format!("\"{}\"", escaped));
    } else {
        out.push_str(value);
    }
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push('\n');
}

/// Convert the activations table to CSV
///
/// The header row carries the human-readable column names; null cells are
/// written as empty fields.
///
/// # Arguments
/// * `table` - The main table for the current date range
///
/// # Returns
/// * `String` - CSV content
pub fn table_to_csv(table: &MainTable) -> String {
    let mut csv_content = String::new();
    push_record(&mut csv_content, table.columns.iter().map(|c| c.name.as_str()));
    for row in &table.rows {
        push_record(&mut csv_content, row.iter().map(String::as_str));
    }
    csv_content
}

/// Convert the bonus tracker to CSV
///
/// # Arguments
/// * `table` - Bonus rows for one quarter
/// * `developer_title` - Header of the first column
pub fn bonus_to_csv(table: &BonusTable, developer_title: &str) -> String {
    let mut csv_content = String::new();
    let header = std::iter::once(developer_title).chain(Metric::ALL.iter().map(|m| m.column_name()));
    push_record(&mut csv_content, header);

    for row in &table.rows {
        let values: Vec<String> = Metric::ALL.iter().map(|m| row.tally.get(*m).to_string()).collect();
        push_record(
            &mut csv_content,
            std::iter::once(row.developer.as_str()).chain(values.iter().map(String::as_str)),
        );
    }
    csv_content
}

/// Convert the activations table to XLSX
///
/// Headers are bold and numeric columns are written as numbers so that they
/// sum in Excel; everything else is written as text.
///
/// # Arguments
/// * `table` - The main table for the current date range
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - XLSX file content as bytes or an error
pub fn table_to_xlsx(table: &MainTable) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Format, Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name("Activations")?;

    let bold = Format::new().set_bold();
    for (c, column) in table.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, &column.name, &bold)?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, (value, column)) in row.iter().zip(&table.columns).enumerate() {
            if value.is_empty() {
                continue;
            }
            let number = NUMERIC_COLUMNS
                .contains(&column.id.as_str())
                .then(|| value.parse::<f64>().ok())
                .flatten();
            match number {
                Some(n) => worksheet.write_number(r, c as u16, n)?,
                None => worksheet.write_string(r, c as u16, value)?,
            };
        }
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}
