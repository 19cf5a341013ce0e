//! Sheets API v4 `spreadsheets.values.get`.

use serde::{Deserialize, Deserializer, Serialize};

use super::{GoogleApiError, RetryPolicy, send_with_retry};

const SHEETS_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Response body of `values.get`.
///
/// The API omits `values` entirely when the range is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    #[serde(default)]
    pub range: String,
    #[serde(default)]
    pub major_dimension: Option<String>,
    #[serde(default, deserialize_with = "cells_as_text")]
    pub values: Vec<Vec<String>>,
}

/// Accept numbers and booleans as well as strings, for unformatted reads
/// and hand-edited snapshots.
fn cells_as_text<'de, D>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<serde_json::Value>> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| match cell {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect())
}

/// URL of one `values.get` call; both path segments are percent-encoded.
pub fn values_url(spreadsheet_id: &str, range: &str) -> String {
    format!(
        "{}/{}/values/{}",
        SHEETS_BASE,
        urlencoding::encode(spreadsheet_id),
        urlencoding::encode(range)
    )
}

/// Read one range of a spreadsheet.
///
/// # Arguments
/// * `client` - Shared HTTP client
/// * `spreadsheet_id` - Id from the spreadsheet URL
/// * `range` - A1 range such as `Form Responses 1!A1:AC`
/// * `access_token` - Valid OAuth bearer token
///
/// # Errors
/// * `ApiError` for any non-success status, with the body as message
/// * `Http` for transport failures after retries
pub async fn fetch_values(
    client: &reqwest::Client,
    spreadsheet_id: &str,
    range: &str,
    access_token: &str,
) -> Result<ValueRange, GoogleApiError> {
    let request = client
        .get(values_url(spreadsheet_id, range))
        .bearer_auth(access_token);
    let resp = send_with_retry(request, &RetryPolicy::default()).await?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(GoogleApiError::AuthExpired);
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(GoogleApiError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    let values: ValueRange = resp.json().await?;
    log::info!("Fetched {} rows from {}", values.values.len(), values.range);
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_url_encodes_range() {
        assert_eq!(
            values_url("1AbC", "Form Responses 1!A1:AC"),
            "https://sheets.googleapis.com/v4/spreadsheets/1AbC/values/Form%20Responses%201%21A1%3AAC"
        );
    }

    #[test]
    fn test_parse_values_response() {
        let json = r#"{
            "range": "'Form Responses 1'!A1:AC3",
            "majorDimension": "ROWS",
            "values": [
                ["Timestamp", "Brand Developer"],
                ["7/1/2020 10:00:00", "Ana", 12, true, null]
            ]
        }"#;
        let values: ValueRange = serde_json::from_str(json).unwrap();
        assert_eq!(values.major_dimension.as_deref(), Some("ROWS"));
        assert_eq!(values.values.len(), 2);
        assert_eq!(values.values[1], vec!["7/1/2020 10:00:00", "Ana", "12", "true", ""]);
    }

    #[test]
    fn test_empty_range_has_no_values() {
        let values: ValueRange =
            serde_json::from_str(r#"{"range": "Sheet1!A1:AC", "majorDimension": "ROWS"}"#).unwrap();
        assert!(values.values.is_empty());
    }
}
