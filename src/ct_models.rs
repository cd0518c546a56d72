// Data model for the campus transit client.
//
// The remote API speaks camelCase JSON; these types are the schema it is
// checked against before anything reaches the cache or the state store.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub stop_code: String,
    pub name: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternPoint {
    pub key: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub stop: Option<Stop>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternPath {
    pub pattern_key: String,
    #[serde(default)]
    pub direction_key: Option<String>,
    pub pattern_points: Vec<PatternPoint>,
}

impl PatternPath {
    /// Stops along the path, in travel order.
    pub fn stops(&self) -> Vec<&Stop> {
        self.pattern_points
            .iter()
            .filter_map(|point| point.stop.as_ref())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionRef {
    pub key: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRef {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Direction {
    pub direction: DirectionRef,
    pub destination: String,
    pub line_color: String,
    #[serde(default)]
    pub pattern_list: Vec<PatternRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CampusArea {
    #[serde(rename = "On Campus")]
    OnCampus,
    #[serde(rename = "Off Campus")]
    OffCampus,
}

impl std::fmt::Display for CampusArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampusArea::OnCampus => write!(f, "On Campus"),
            CampusArea::OffCampus => write!(f, "Off Campus"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub key: String,
    pub name: String,
    pub short_name: String,
    pub direction_list: Vec<Direction>,
    #[serde(default)]
    pub pattern_paths: Vec<PatternPath>,
    #[serde(default)]
    pub category: Option<CampusArea>,
}

impl Route {
    pub fn line_color(&self) -> &str {
        self.direction_list
            .first()
            .map(|d| d.line_color.as_str())
            .unwrap_or("#500000")
    }

    /// Pattern path drawn for the direction at `index`, matched through the
    /// direction's first pattern key.
    pub fn pattern_path_for_direction(&self, index: usize) -> Option<&PatternPath> {
        let pattern_key = &self.direction_list.get(index)?.pattern_list.first()?.key;
        self.pattern_paths
            .iter()
            .find(|path| &path.pattern_key == pattern_key)
    }

    pub fn stops_for_direction(&self, index: usize) -> Vec<&Stop> {
        self.pattern_path_for_direction(index)
            .map(|path| path.stops())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInterruption {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub route_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseData {
    pub routes: Vec<Route>,
    #[serde(default)]
    pub service_interruptions: Vec<ServiceInterruption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePatternPaths {
    pub route_key: String,
    pub pattern_paths: Vec<PatternPath>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Departure {
    #[serde(default)]
    pub estimated_depart_time_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_depart_time_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_off_route: bool,
}

impl Departure {
    /// Best known departure time: the live estimate if present, otherwise
    /// the schedule.
    pub fn depart_time(&self) -> Option<DateTime<Utc>> {
        self.estimated_depart_time_utc.or(self.scheduled_depart_time_utc)
    }

    pub fn is_realtime(&self) -> bool {
        self.estimated_depart_time_utc.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDirectionTime {
    pub route_key: String,
    pub direction_key: String,
    #[serde(default)]
    pub next_departs: Vec<Departure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartureTimes {
    #[serde(default)]
    pub stop_code: Option<String>,
    pub route_direction_times: Vec<RouteDirectionTime>,
}

/// Departure times held in the state store, one per stop code.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedStopEstimate {
    pub stop_code: String,
    pub departure_times: DepartureTimes,
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TransitError {
    NetworkError(String),
    AuthError(String),
    StorageError(String),
    ValidationError(String),
}

impl TransitError {
    /// Text shown to the user in an alert.
    pub fn alert_message(&self) -> String {
        match self {
            TransitError::ValidationError(_) => {
                "Something went wrong. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for TransitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitError::NetworkError(e) => write!(f, "Network error: {}", e),
            TransitError::AuthError(e) => write!(f, "Authentication error: {}", e),
            TransitError::StorageError(e) => write!(f, "Storage error: {}", e),
            TransitError::ValidationError(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for TransitError {}

pub type Result<T> = std::result::Result<T, TransitError>;

// ============================================================================
// Validation
// ============================================================================

pub struct CTModels;

impl CTModels {
    pub fn validate_base_data(data: &BaseData) -> Result<()> {
        let mut seen = HashSet::new();
        for route in &data.routes {
            if route.key.is_empty() || route.short_name.is_empty() {
                return Err(TransitError::ValidationError(format!(
                    "route '{}' is missing its key or short name",
                    route.name
                )));
            }
            if !seen.insert(route.key.as_str()) {
                return Err(TransitError::ValidationError(format!(
                    "duplicate route key '{}'",
                    route.key
                )));
            }
            if route.direction_list.is_empty() {
                return Err(TransitError::ValidationError(format!(
                    "route '{}' has no directions",
                    route.short_name
                )));
            }
            for direction in &route.direction_list {
                if direction.direction.key.is_empty() {
                    return Err(TransitError::ValidationError(format!(
                        "route '{}' has a direction without a key",
                        route.short_name
                    )));
                }
            }
        }

        for interruption in &data.service_interruptions {
            if interruption.key.is_empty() {
                return Err(TransitError::ValidationError(
                    "service interruption without a key".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn validate_pattern_paths(paths: &[RoutePatternPaths]) -> Result<()> {
        for entry in paths {
            if entry.route_key.is_empty() {
                return Err(TransitError::ValidationError(
                    "pattern paths without a route key".to_string(),
                ));
            }
            for path in &entry.pattern_paths {
                if path.pattern_key.is_empty() {
                    return Err(TransitError::ValidationError(format!(
                        "route '{}' has a pattern path without a key",
                        entry.route_key
                    )));
                }
                let bad_point = path.pattern_points.iter().any(|p| {
                    !(-90.0..=90.0).contains(&p.latitude) || !(-180.0..=180.0).contains(&p.longitude)
                });
                if bad_point {
                    return Err(TransitError::ValidationError(format!(
                        "pattern '{}' has a point outside valid coordinates",
                        path.pattern_key
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn validate_departure_times(times: &DepartureTimes) -> Result<()> {
        for entry in &times.route_direction_times {
            if entry.route_key.is_empty() || entry.direction_key.is_empty() {
                return Err(TransitError::ValidationError(
                    "departure times without a route or direction key".to_string(),
                ));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Route shaping
    // ========================================================================

    /// Attach each route's pattern paths, matched by route key. Routes with
    /// no matching entry keep whatever paths they already had.
    pub fn attach_pattern_paths(mut routes: Vec<Route>, paths: Vec<RoutePatternPaths>) -> Vec<Route> {
        for entry in paths {
            if let Some(route) = routes.iter_mut().find(|r| r.key == entry.route_key) {
                route.pattern_paths = entry.pattern_paths;
            }
        }
        routes
    }

    pub fn label_campus_areas(
        mut routes: Vec<Route>,
        on_campus: &[String],
        off_campus: &[String],
    ) -> Vec<Route> {
        for route in &mut routes {
            if off_campus.contains(&route.short_name) {
                route.category = Some(CampusArea::OffCampus);
            } else if on_campus.contains(&route.short_name) {
                route.category = Some(CampusArea::OnCampus);
            }
        }
        routes
    }

    pub fn get_route_by_short_name<'a>(short_name: &str, routes: &'a [Route]) -> Option<&'a Route> {
        routes
            .iter()
            .find(|r| r.short_name.eq_ignore_ascii_case(short_name))
    }

    pub fn interruptions_for_route<'a>(
        route_key: &str,
        interruptions: &'a [ServiceInterruption],
    ) -> Vec<&'a ServiceInterruption> {
        interruptions
            .iter()
            .filter(|i| i.route_keys.iter().any(|k| k == route_key))
            .collect()
    }

    pub fn parse_hex_color(hex_color: &str) -> (u8, u8, u8) {
        let hex = hex_color.trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return (128, 128, 128);
        }
        let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(128);
        let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(128);
        let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(128);
        (r, g, b)
    }

    pub fn format_departure(time: DateTime<Utc>, tz: Tz) -> String {
        time.with_timezone(&tz).format("%-I:%M %p").to_string()
    }

    pub fn minutes_until(time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        time.signed_duration_since(now).num_minutes()
    }
}
