/*!
# Field Marketing Tracker

A password-protected web dashboard over a Google Sheet of field-marketing
activation reports, built in Rust.

## Overview

Field staff (Brand or Market Developers) submit one form response per event
they run: demos, clinics, festivals, VIP rides, trail building days. The
responses land in a Google Sheet. This crate fetches that sheet, normalizes
it into a typed table, and serves a dashboard with headline totals, maps of
activity, a quarterly bonus tracker, weekly bar charts and a full table with
CSV/XLSX export.

## Architecture

### Data Layer
- **dataset**: Normalizes the raw `values` payload (header row plus data rows)
  into typed `Activation` records with derived week, quarter and year.
- **aggregate**: Pure view functions over the normalized table: date and
  filter views, totals, map traces, bonus tallies, weekly series.
- **reactive**: The input/output dependency graph. Each output is recomputed
  only when one of its inputs changes.
- **config**: Environment-driven settings, including the Brand/Market variant.

### Web Layer (feature `web`)
- **google**: OAuth installed-app flow, token persistence and the Sheets
  `values.get` client.
- **source**: Where rows come from: live Google Sheets or a saved snapshot.
- **auth**: HTTP Basic authentication middleware.
- **charts**: SVG maps and bar charts.
- **export**: CSV and XLSX downloads.
- **page**: Server-side rendering of the dashboard template.
- **app**: Routing, shared state and the server loop.

## REST API Endpoints

- `/` - The dashboard, driven by query parameters
- `/api/update` - Recompute the outputs affected by changed inputs
- `/api/outputs/{output}` - One output as JSON
- `/api/refresh` - Refetch the sheet
- `/charts/main-map.svg`, `/charts/filtered-map.svg`, `/charts/weekly/{metric}.svg`
- `/export/activations.csv`, `/export/activations.xlsx`, `/export/bonus.csv`
*/

pub mod aggregate;
pub mod config;
pub mod dataset;
pub mod reactive;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod auth;
#[cfg(feature = "web")]
pub mod charts;
#[cfg(feature = "web")]
pub mod error;
#[cfg(feature = "web")]
pub mod export;
#[cfg(feature = "web")]
pub mod google;
#[cfg(feature = "web")]
pub mod page;
#[cfg(feature = "web")]
pub mod source;

pub use aggregate::{BonusCriteria, DateRange, Metric, Selection};
pub use config::{Config, Variant};
pub use dataset::{Activation, Dataset, DatasetError};
pub use reactive::{Content, Context, Input, Output, ViewState};
