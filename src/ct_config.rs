// Runtime settings: `.env` / environment first, command-line flags on top.

use crate::ct_storage::FileStorage;
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_API_BASE_URL: &str = "https://aggiespirit.ts.tamu.edu";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_TIME_ZONE: Tz = chrono_tz::America::Chicago;

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base_url: String,
    pub storage_path: PathBuf,
    pub request_timeout_secs: u64,
    pub on_campus_routes: Vec<String>,
    pub off_campus_routes: Vec<String>,
    pub time_zone: Tz,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Settings {
    /// Read settings from the process environment, loading `.env` if one
    /// is present.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded ({})", e);
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let request_timeout_secs = lookup("CT_REQUEST_TIMEOUT_SECS")
            .and_then(|v| match v.trim().parse() {
                Ok(secs) => Some(secs),
                Err(_) => {
                    log::warn!("Ignoring invalid CT_REQUEST_TIMEOUT_SECS '{}'", v);
                    None
                }
            })
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let time_zone = lookup("CT_TIME_ZONE")
            .and_then(|v| match v.parse::<Tz>() {
                Ok(tz) => Some(tz),
                Err(_) => {
                    log::warn!("Ignoring unknown CT_TIME_ZONE '{}'", v);
                    None
                }
            })
            .unwrap_or(DEFAULT_TIME_ZONE);

        Settings {
            api_base_url: lookup("CT_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            storage_path: lookup("CT_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(FileStorage::default_path),
            request_timeout_secs,
            on_campus_routes: lookup("CT_ON_CAMPUS_ROUTES")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            off_campus_routes: lookup("CT_OFF_CAMPUS_ROUTES")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            time_zone,
        }
    }

    pub fn with_overrides(mut self, api_base_url: Option<String>, storage_path: Option<PathBuf>) -> Self {
        if let Some(url) = api_base_url {
            self.api_base_url = url;
        }
        if let Some(path) = storage_path {
            self.storage_path = path;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(|_| None);

        assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(settings.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(settings.time_zone, DEFAULT_TIME_ZONE);
        assert!(settings.on_campus_routes.is_empty());
    }

    #[test]
    fn test_values_from_environment() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CT_API_BASE_URL", "http://localhost:8080"),
            ("CT_REQUEST_TIMEOUT_SECS", "3"),
            ("CT_ON_CAMPUS_ROUTES", "01, 03,,04"),
            ("CT_TIME_ZONE", "America/Denver"),
            ("CT_STORAGE_PATH", "/tmp/ct.json"),
        ]);
        let settings = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(settings.api_base_url, "http://localhost:8080");
        assert_eq!(settings.request_timeout_secs, 3);
        assert_eq!(settings.on_campus_routes, vec!["01", "03", "04"]);
        assert_eq!(settings.time_zone, chrono_tz::America::Denver);
        assert_eq!(settings.storage_path, PathBuf::from("/tmp/ct.json"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let settings = Settings::from_lookup(|k| match k {
            "CT_REQUEST_TIMEOUT_SECS" => Some("soon".to_string()),
            "CT_TIME_ZONE" => Some("Mars/Olympus".to_string()),
            _ => None,
        });

        assert_eq!(settings.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(settings.time_zone, DEFAULT_TIME_ZONE);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(|_| None)
            .with_overrides(Some("http://x".to_string()), None);
        assert_eq!(settings.api_base_url, "http://x");
    }
}
