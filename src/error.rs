#![cfg(not(tarpaulin_include))]

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::dataset::DatasetError;
use crate::google::GoogleApiError;

/// Errors surfaced by the HTTP handlers
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Sheet fetch failed: {0}")]
    Sheets(#[from] GoogleApiError),

    #[error("{0}")]
    Dataset(#[from] DatasetError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chart rendering failed: {0}")]
    Chart(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Sheets(_) => StatusCode::BAD_GATEWAY,
            AppError::Dataset(DatasetError::NoData) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Dataset(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Chart(_) | AppError::Export(_) | AppError::Template(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }
        (status, self.to_string()).into_response()
    }
}
