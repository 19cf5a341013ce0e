//! Where the raw activation rows come from.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::SheetLocation;
use crate::google::sheets::{ValueRange, fetch_values};
use crate::google::{self, GoogleApiError, TokenStore};

/// A provider of the sheet's `values` payload, header row first.
#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Vec<String>>, GoogleApiError>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

/// Build the source named by the configuration.
pub fn from_location(location: &SheetLocation) -> Box<dyn SheetSource> {
    match location {
        SheetLocation::Google {
            spreadsheet_id,
            range,
            token_path,
            ..
        } => Box::new(GoogleSheetSource::new(
            spreadsheet_id.clone(),
            range.clone(),
            TokenStore::new(token_path.clone()),
        )),
        SheetLocation::Snapshot(path) => Box::new(SnapshotSource(path.clone())),
    }
}

/// Live Google Sheets range read with the stored OAuth token
pub struct GoogleSheetSource {
    client: reqwest::Client,
    spreadsheet_id: String,
    range: String,
    store: TokenStore,
}

impl GoogleSheetSource {
    pub fn new(spreadsheet_id: String, range: String, store: TokenStore) -> Self {
        GoogleSheetSource {
            client: reqwest::Client::new(),
            spreadsheet_id,
            range,
            store,
        }
    }
}

#[async_trait]
impl SheetSource for GoogleSheetSource {
    async fn fetch(&self) -> Result<Vec<Vec<String>>, GoogleApiError> {
        let token = google::get_valid_access_token(&self.store).await?;
        let values = match fetch_values(&self.client, &self.spreadsheet_id, &self.range, &token).await {
            // Revoked before its recorded expiry: refresh once and retry
            Err(GoogleApiError::AuthExpired) => {
                let refreshed = google::refresh_access_token(&self.store.load()?, &self.store).await?;
                fetch_values(&self.client, &self.spreadsheet_id, &self.range, &refreshed.token).await?
            }
            other => other?,
        };
        Ok(values.values)
    }

    fn describe(&self) -> String {
        format!("sheet {} range {}", self.spreadsheet_id, self.range)
    }
}

/// A saved `values.get` response on disk
pub struct SnapshotSource(pub PathBuf);

#[async_trait]
impl SheetSource for SnapshotSource {
    async fn fetch(&self) -> Result<Vec<Vec<String>>, GoogleApiError> {
        let content = tokio::fs::read_to_string(&self.0).await?;
        let values: ValueRange = serde_json::from_str(&content)?;
        Ok(values.values)
    }

    fn describe(&self) -> String {
        format!("snapshot {}", self.0.display())
    }
}

/// Fixed rows held in memory
pub struct StaticSource(pub Vec<Vec<String>>);

#[async_trait]
impl SheetSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<Vec<String>>, GoogleApiError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        format!("{} in-memory rows", self.0.len())
    }
}
