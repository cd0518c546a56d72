// Views for the campus transit client
use crate::ct_cache::QueryState;
use crate::ct_favorites::RouteGroup;
use crate::ct_models::{CTModels, DepartureTimes, Route, ServiceInterruption};
use crate::ct_state::AppState;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::io::{self, Write};

pub struct CTViews;

impl CTViews {
    pub fn show_welcome_screen() {
        println!("\n{}", "═".repeat(70));
        println!("  🚌 CAMPUS TRANSIT - Live routes, stops and departures");
        println!("{}", "═".repeat(70));
    }

    /// Main menu for the interactive front end
    pub fn show_menu(state: &AppState) {
        println!("\n{}", "═".repeat(60));
        match &state.selected_route {
            Some(route) => println!(
                "  Route {} {} selected",
                Self::colorize_route(&route.short_name, route.line_color()),
                route.name
            ),
            None => println!(
                "  Showing {} ({} routes on the map)",
                Self::category_label(state.route_category),
                state.drawn_routes.len()
            ),
        }
        println!("{}", "═".repeat(60));
        println!("\n📋 MENU OPTIONS");
        println!("  1️⃣  Show route list");
        println!("  2️⃣  Switch all / favorites");
        println!("  3️⃣  Open a route");
        println!("  4️⃣  Service alerts ({})", state.service_interruptions.len());
        if state.selected_route.is_some() {
            println!("  5️⃣  Change direction");
            println!("  6️⃣  Show departures for a stop");
            println!("  7️⃣  Refresh departures 🔄");
            println!("  8️⃣  Toggle favorite ⭐");
            println!("  9️⃣  Close route");
        }
        println!("  0️⃣  Quit");
        println!("\n{}", "─".repeat(60));
        print!("➜ Your choice: ");
        let _ = io::stdout().flush();
    }

    /// Read one trimmed line from stdin; `None` on end of input.
    pub fn prompt(label: &str) -> Option<String> {
        print!("{}", label);
        let _ = io::stdout().flush();
        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(input.trim().to_string()),
        }
    }

    pub fn category_label(group: RouteGroup) -> &'static str {
        match group {
            RouteGroup::All => "All Routes",
            RouteGroup::Favorites => "Favorites",
        }
    }

    /// One line describing a query that is loading or failed; `None` when
    /// there is nothing to say.
    pub fn query_status<T>(status: &QueryState<T>, subject: &str) -> Option<String> {
        if status.is_loading() {
            return Some(format!("⏳ Loading {}...", subject));
        }
        match &status.error {
            Some(_) if status.is_success() => {
                Some(format!("⚠️  Could not refresh {}, showing earlier data", subject))
            }
            Some(e) => Some(format!("✗ Could not load {}: {}", subject, e.alert_message())),
            None => None,
        }
    }

    pub fn show_routes_list<T>(state: &AppState, status: &QueryState<T>) {
        let routes = state.routes_for_category();

        println!("\n{}", "═".repeat(70));
        println!("🚌 ROUTES - {}", Self::category_label(state.route_category));
        println!("{}", "═".repeat(70));

        if let Some(line) = Self::query_status(status, "routes") {
            println!("  {}", line);
        }
        if state.routes.is_empty() {
            println!("\n  ⏳ Routes are not loaded yet.");
            return;
        }
        if routes.is_empty() && state.route_category == RouteGroup::Favorites {
            println!("\n  You have no favorited routes.");
            return;
        }

        for route in &routes {
            println!("  {}", Self::route_row(route, state.favorite_routes.contains(route)));
        }
    }

    pub fn route_row(route: &Route, is_favorite: bool) -> String {
        let star = if is_favorite { " ⭐" } else { "" };
        let area = route
            .category
            .map(|area| format!(" · {}", area))
            .unwrap_or_default();
        let destinations = if route.direction_list.len() > 1 {
            route
                .direction_list
                .iter()
                .map(|d| d.destination.as_str())
                .collect::<Vec<_>>()
                .join(" | ")
        } else {
            "Campus Circulator".to_string()
        };
        format!(
            "{} {}{}\n       {}{}",
            Self::colorize_route(&route.short_name, route.line_color()),
            route.name,
            star,
            destinations,
            area
        )
    }

    pub fn show_route_details(
        state: &AppState,
        estimates: &HashMap<String, QueryState<DepartureTimes>>,
        tz: Tz,
        now: DateTime<Utc>,
    ) {
        let Some(route) = &state.selected_route else {
            println!("\n✗ Something went wrong.");
            return;
        };

        let index = state.selected_direction_index();
        let is_favorite = state.favorite_routes.iter().any(|r| r.key == route.key);

        println!("\n{}", "═".repeat(70));
        println!(
            "{} {}{}",
            Self::colorize_route(&route.short_name, route.line_color()),
            route.name,
            if is_favorite { "  ⭐ Favorite" } else { "" }
        );
        if route.direction_list.len() > 1 {
            let directions: Vec<String> = route
                .direction_list
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    if i == index {
                        format!("[to {}]", d.destination)
                    } else {
                        format!(" to {} ", d.destination)
                    }
                })
                .collect();
            println!("  {}", directions.join("  "));
        }
        let alerts = CTModels::interruptions_for_route(&route.key, &state.service_interruptions);
        if !alerts.is_empty() {
            println!("  ⚠️  {} alert(s) on this route", alerts.len());
        }
        if let Some(updated) = estimates.values().filter_map(|e| e.updated_at).max() {
            println!("  Departures as of {}", CTModels::format_departure(updated, tz));
        }
        println!("{}", "─".repeat(70));

        let stops = route.stops_for_direction(index);
        if stops.is_empty() {
            println!("  No stops on this direction.");
        }
        for stop in stops {
            let marker = if state.selected_stop.as_deref() == Some(stop.stop_code.as_str()) { "➤" } else { "•" };
            println!("  {} {} ({})", marker, stop.name, stop.stop_code);
            if let Some(estimate) = state.stop_estimate(&stop.stop_code) {
                for line in Self::departure_lines(&estimate.departure_times, tz, now) {
                    println!("      {}", line);
                }
            }
            let status = estimates
                .get(&stop.stop_code)
                .and_then(|e| Self::query_status(e, "departures"));
            if let Some(line) = status {
                println!("      {}", line);
            }
        }
        println!("{}", "═".repeat(70));
    }

    /// One line per upcoming departure.
    pub fn departure_lines(times: &DepartureTimes, tz: Tz, now: DateTime<Utc>) -> Vec<String> {
        let mut lines = Vec::new();
        for direction in &times.route_direction_times {
            for departure in &direction.next_departs {
                let Some(at) = departure.depart_time() else {
                    continue;
                };
                let minutes = CTModels::minutes_until(at, now);
                let source = if departure.is_realtime() { "📡" } else { "🕒" };
                let when = if minutes <= 0 {
                    "now".to_string()
                } else {
                    format!("{} min", minutes)
                };
                lines.push(format!("{} {} ({})", source, CTModels::format_departure(at, tz), when));
            }
        }
        if lines.is_empty() {
            lines.push("No upcoming departures".to_string());
        }
        lines
    }

    pub fn show_alert_list(interruptions: &[ServiceInterruption], routes: &[Route]) {
        println!("\n{}", "═".repeat(70));
        println!("⚠️  SERVICE ALERTS ({})", interruptions.len());
        println!("{}", "═".repeat(70));

        if interruptions.is_empty() {
            println!("  No active service alerts.");
            return;
        }

        for interruption in interruptions {
            println!("\n  • {}", interruption.name);
            if let Some(description) = &interruption.description {
                println!("    {}", description);
            }
            let affected: Vec<String> = routes
                .iter()
                .filter(|r| interruption.route_keys.contains(&r.key))
                .map(|r| Self::colorize_route(&r.short_name, r.line_color()))
                .collect();
            if !affected.is_empty() {
                println!("    Routes: {}", affected.join(" "));
            }
        }
    }

    pub fn show_alert(title: &str, message: &str) {
        println!("\n{}", "─".repeat(60));
        println!("❌ {}", title);
        println!("   {}", message);
        println!("{}", "─".repeat(60));
    }

    pub fn show_stop_callout(state: &AppState, stop_code: &str) {
        let stop = state
            .selected_route
            .as_ref()
            .and_then(|r| {
                r.pattern_paths
                    .iter()
                    .flat_map(|p| p.stops())
                    .find(|s| s.stop_code == stop_code)
            });
        match stop {
            Some(stop) => println!(
                "\n📍 {} ({}) at ({:.5}, {:.5})",
                stop.name, stop.stop_code, stop.latitude, stop.longitude
            ),
            None => println!("\n📍 Stop {}", stop_code),
        }
    }

    pub fn invalid_route(input: &str) {
        println!("\n✗ No route named '{}'", input);
    }

    pub fn goodbye_message() {
        println!("\n👋 Goodbye!");
    }

    fn colorize_route(code: &str, hex_color: &str) -> String {
        let (r, g, b) = CTModels::parse_hex_color(hex_color);

        let luminance = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0;
        let text_color = if luminance > 0.5 { "30" } else { "97" };

        format!(
            "\x1b[48;2;{};{};{}m\x1b[{}m {} \x1b[0m",
            r, g, b, text_color, code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ct_models::fixtures::{departure_times, route};
    use crate::ct_models::Departure;
    use chrono::TimeZone;

    #[test]
    fn test_departure_lines_in_local_time() {
        let now = Utc.with_ymd_and_hms(2026, 9, 1, 14, 0, 0).unwrap();
        let times = departure_times("r1", "d1", 7);

        let lines = CTViews::departure_lines(&times, chrono_tz::America::Chicago, now);
        assert_eq!(lines, vec!["📡 9:07 AM (7 min)".to_string()]);
    }

    #[test]
    fn test_departure_lines_skip_unknown_times() {
        let now = Utc.with_ymd_and_hms(2026, 9, 1, 14, 0, 0).unwrap();
        let mut times = departure_times("r1", "d1", 0);
        times.route_direction_times[0].next_departs = vec![Departure {
            estimated_depart_time_utc: None,
            scheduled_depart_time_utc: None,
            is_off_route: false,
        }];

        let lines = CTViews::departure_lines(&times, chrono_tz::America::Chicago, now);
        assert_eq!(lines, vec!["No upcoming departures".to_string()]);
    }

    fn status(data: Option<u32>, error: bool, is_fetching: bool) -> QueryState<u32> {
        QueryState {
            data,
            error: error.then(|| crate::ct_models::TransitError::NetworkError("offline".to_string())),
            is_fetching,
            updated_at: None,
        }
    }

    #[test]
    fn test_query_status_lines() {
        assert_eq!(CTViews::query_status(&status(Some(1), false, false), "routes"), None);
        assert_eq!(
            CTViews::query_status(&status(None, false, true), "routes").as_deref(),
            Some("⏳ Loading routes...")
        );
        assert_eq!(
            CTViews::query_status(&status(Some(1), true, false), "departures").as_deref(),
            Some("⚠️  Could not refresh departures, showing earlier data")
        );
        assert_eq!(
            CTViews::query_status(&status(None, true, false), "routes").as_deref(),
            Some("✗ Could not load routes: Network error: offline")
        );
    }

    #[test]
    fn test_route_row_lists_destinations() {
        let row = CTViews::route_row(&route("r1", "01"), true);
        assert!(row.contains("MSC | Park West"));
        assert!(row.contains("⭐"));

        let mut circulator = route("r2", "02");
        circulator.direction_list.truncate(1);
        circulator.category = Some(crate::ct_models::CampusArea::OnCampus);
        let row = CTViews::route_row(&circulator, false);
        assert!(row.contains("Campus Circulator · On Campus"));
    }
}
