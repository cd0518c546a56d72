// Application state shared by every view.
//
// `AppState` is a plain value; each transition consumes the old state and
// returns the new one. `StateStore` is the shared handle views read from
// and write through.

use crate::ct_favorites::RouteGroup;
use crate::ct_models::{CachedStopEstimate, DepartureTimes, Route, ServiceInterruption};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub auth_token: Option<String>,
    pub service_interruptions: Vec<ServiceInterruption>,
    pub routes: Vec<Route>,
    pub drawn_routes: Vec<Route>,
    pub route_category: RouteGroup,
    pub favorite_routes: Vec<Route>,
    pub selected_route: Option<Route>,
    pub selected_direction: Option<String>,
    pub selected_stop: Option<String>,
    pub popped_up_callout: Option<String>,
    pub stop_estimates: Vec<CachedStopEstimate>,
}

impl AppState {
    /// Routes the active category shows: everything, or just favorites.
    pub fn routes_for_category(&self) -> Vec<Route> {
        match self.route_category {
            RouteGroup::All => self.routes.clone(),
            RouteGroup::Favorites => self.favorite_routes.clone(),
        }
    }

    pub fn set_auth_token(self, auth_token: String) -> Self {
        AppState { auth_token: Some(auth_token), ..self }
    }

    pub fn set_service_interruptions(self, service_interruptions: Vec<ServiceInterruption>) -> Self {
        AppState { service_interruptions, ..self }
    }

    pub fn set_routes(self, routes: Vec<Route>) -> Self {
        AppState { routes, ..self }
    }

    pub fn set_drawn_routes(self, drawn_routes: Vec<Route>) -> Self {
        AppState { drawn_routes, ..self }
    }

    pub fn reset_drawn_routes(self) -> Self {
        let drawn_routes = self.routes_for_category();
        self.set_drawn_routes(drawn_routes)
    }

    /// Switch category. The map follows unless a single route is focused.
    pub fn set_route_category(self, route_category: RouteGroup) -> Self {
        let state = AppState { route_category, ..self };
        if state.selected_route.is_some() {
            state
        } else {
            state.reset_drawn_routes()
        }
    }

    /// Favorites arrive as short names; keep the matching routes in route
    /// list order.
    pub fn set_favorite_routes(self, short_names: &[String]) -> Self {
        let favorite_routes: Vec<Route> = self
            .routes
            .iter()
            .filter(|route| short_names.contains(&route.short_name))
            .cloned()
            .collect();
        let state = AppState { favorite_routes, ..self };
        if state.selected_route.is_none() && state.route_category == RouteGroup::Favorites {
            state.reset_drawn_routes()
        } else {
            state
        }
    }

    pub fn update_stop_estimate(self, departure_times: DepartureTimes, stop_code: &str) -> Self {
        let mut stop_estimates: Vec<CachedStopEstimate> = self
            .stop_estimates
            .into_iter()
            .filter(|estimate| estimate.stop_code != stop_code)
            .collect();
        stop_estimates.push(CachedStopEstimate {
            stop_code: stop_code.to_string(),
            departure_times,
        });
        AppState { stop_estimates, ..self }
    }

    pub fn clear_stop_estimates(self) -> Self {
        AppState { stop_estimates: Vec::new(), ..self }
    }

    pub fn stop_estimate(&self, stop_code: &str) -> Option<&CachedStopEstimate> {
        self.stop_estimates.iter().find(|e| e.stop_code == stop_code)
    }

    /// Focus one route: it becomes the only drawn route and its first
    /// direction is selected.
    pub fn set_selected_route(self, route: Route) -> Self {
        let selected_direction = route.direction_list.first().map(|d| d.direction.key.clone());
        AppState {
            drawn_routes: vec![route.clone()],
            selected_route: Some(route),
            selected_direction,
            selected_stop: None,
            popped_up_callout: None,
            ..self
        }
    }

    pub fn clear_selected_route(self) -> Self {
        AppState {
            selected_route: None,
            selected_direction: None,
            selected_stop: None,
            popped_up_callout: None,
            ..self
        }
        .reset_drawn_routes()
    }

    pub fn set_selected_direction(self, selected_direction: Option<String>) -> Self {
        AppState { selected_direction, selected_stop: None, ..self }
    }

    pub fn set_selected_stop(self, selected_stop: Option<String>) -> Self {
        AppState { selected_stop, ..self }
    }

    pub fn set_popped_up_callout(self, popped_up_callout: Option<String>) -> Self {
        AppState { popped_up_callout, ..self }
    }

    /// Index of the selected direction within the selected route.
    pub fn selected_direction_index(&self) -> usize {
        let (Some(route), Some(direction)) = (&self.selected_route, &self.selected_direction) else {
            return 0;
        };
        route
            .direction_list
            .iter()
            .position(|d| &d.direction.key == direction)
            .unwrap_or(0)
    }
}

#[derive(Clone, Default)]
pub struct StateStore {
    state: Arc<Mutex<AppState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, cloned out of the store.
    pub fn get(&self) -> AppState {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Apply a transition atomically.
    pub fn update<F>(&self, transition: F)
    where
        F: FnOnce(AppState) -> AppState,
    {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let current = std::mem::take(&mut *state);
        *state = transition(current);
    }

    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&state)
    }
}
