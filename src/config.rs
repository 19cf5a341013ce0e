//! Environment-driven configuration.
//!
//! Every setting is read through a lookup function so the server reads the
//! process environment while tests hand in a map.

use std::fmt::Display;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),

    #[error("invalid {key} value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which team the dashboard is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Brand Developers: data is fetched once at startup
    Brand,
    /// Market Developers: data is refetched on every interaction
    Market,
}

impl Variant {
    /// Title of the person each record is attributed to.
    pub fn developer_title(self) -> &'static str {
        match self {
            Variant::Brand => "Brand Developer",
            Variant::Market => "Market Developer",
        }
    }

    pub fn default_refresh(self) -> RefreshPolicy {
        match self {
            Variant::Brand => RefreshPolicy::Startup,
            Variant::Market => RefreshPolicy::PerRequest,
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brand" | "bd" => Ok(Variant::Brand),
            "market" | "md" => Ok(Variant::Market),
            other => Err(format!("expected 'brand' or 'market', got '{}'", other)),
        }
    }
}

/// When the sheet is fetched and normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Once at startup, then only on an explicit refresh
    Startup,
    /// On every dashboard request
    PerRequest,
}

impl FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "startup" | "cached" => Ok(RefreshPolicy::Startup),
            "request" | "per-request" => Ok(RefreshPolicy::PerRequest),
            other => Err(format!("expected 'startup' or 'request', got '{}'", other)),
        }
    }
}

/// Where activation rows come from
#[derive(Debug, Clone, PartialEq)]
pub enum SheetLocation {
    /// Live Google Sheets range
    Google {
        spreadsheet_id: String,
        range: String,
        credentials_path: PathBuf,
        token_path: PathBuf,
    },
    /// A saved `values` payload on disk
    Snapshot(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub variant: Variant,
    pub refresh: RefreshPolicy,
    pub sheet: SheetLocation,
    pub username: String,
    pub password: String,
    pub bind_addr: IpAddr,
    pub port: u16,
    pub assets_dir: PathBuf,
    pub date_window_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let variant: Variant = parse_or(&get, "DASHBOARD_VARIANT", Variant::Brand)?;

        let sheet = match get("SHEET_SNAPSHOT") {
            Some(path) => SheetLocation::Snapshot(PathBuf::from(path)),
            None => SheetLocation::Google {
                spreadsheet_id: get("SPREADSHEET_ID").ok_or(ConfigError::Missing("SPREADSHEET_ID"))?,
                range: get("RANGE_NAME").ok_or(ConfigError::Missing("RANGE_NAME"))?,
                credentials_path: PathBuf::from(
                    get("GOOGLE_CREDENTIALS").unwrap_or_else(|| "credentials.json".to_string()),
                ),
                token_path: PathBuf::from(get("GOOGLE_TOKEN").unwrap_or_else(|| "token.json".to_string())),
            },
        };

        Ok(Config {
            variant,
            refresh: parse_or(&get, "DATA_REFRESH", variant.default_refresh())?,
            sheet,
            username: get("DASHBOARD_USERNAME").unwrap_or_else(|| "demo".to_string()),
            password: get("VALID_USERNAME_PASSWORD_PAIRS")
                .ok_or(ConfigError::Missing("VALID_USERNAME_PASSWORD_PAIRS"))?,
            bind_addr: parse_or(&get, "BIND_ADDR", IpAddr::from([127, 0, 0, 1]))?,
            port: parse_or(&get, "PORT", 4050)?,
            assets_dir: PathBuf::from(get("ASSETS_DIR").unwrap_or_else(|| "assets".to_string())),
            date_window_days: parse_or(&get, "DATE_WINDOW_DAYS", 90)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| {
            log::warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key,
                value,
                reason: e.to_string(),
            }
        }),
    }
}
