// Controllers for the campus transit client.
//
// `TransitController` holds the application context (queries, state store,
// event bus) and implements what the route list, route details and alert
// views do in response to user input.

use crate::ct_cache::QueryState;
use crate::ct_events::{AppEvent, EventBus, Sheet};
use crate::ct_favorites::RouteGroup;
use crate::ct_models::{CTModels, DepartureTimes, Result, Route};
use crate::ct_queries::{QueryKey, RouteData, StopEstimateKey, TransitQueries};
use crate::ct_state::StateStore;
use futures::future::join_all;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone)]
pub struct AppContext {
    pub queries: Arc<TransitQueries>,
    pub store: StateStore,
    pub events: EventBus,
}

pub struct TransitController {
    ctx: AppContext,
    // Bumped every time the route-details view closes; estimates that
    // finish under an older generation are dropped.
    details_generation: AtomicU64,
}

impl TransitController {
    pub fn new(ctx: AppContext) -> Self {
        TransitController {
            ctx,
            details_generation: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Authenticate and load routes. Failures have already been shown to
    /// the user by the query layer; the state keeps whatever it had.
    pub async fn load_initial_data(&self) -> Result<()> {
        let token = self.ctx.queries.auth_token().await?;
        self.ctx.store.update(|s| s.set_auth_token(token));

        let data = self.ctx.queries.routes().await?;
        self.ctx.store.update(|s| {
            s.set_routes(data.routes.clone())
                .set_service_interruptions(data.service_interruptions.clone())
                .reset_drawn_routes()
        });
        info!("Initial data ready: {} routes", data.routes.len());

        self.load_route_list_preferences().await
    }

    /// Start over after a failed startup: new token, new base data.
    pub async fn reload_initial_data(&self) -> Result<()> {
        self.ctx.queries.invalidate(&QueryKey::AuthToken);
        self.ctx.queries.invalidate(&QueryKey::Routes);
        self.load_initial_data().await
    }

    /// Default group and favorites, refreshed each time the route list is
    /// shown.
    pub async fn load_route_list_preferences(&self) -> Result<()> {
        let group = self.ctx.queries.default_group().await?;
        let favorites = self.ctx.queries.favorites().await?;

        self.ctx.store.update(|s| {
            s.set_favorite_routes(&favorites).set_route_category(group)
        });
        Ok(())
    }

    // ========================================================================
    // Route list
    // ========================================================================

    pub fn set_route_category(&self, group: RouteGroup) {
        self.ctx.store.update(|s| s.set_route_category(group));
    }

    /// Routes listed under the active category.
    pub fn listed_routes(&self) -> Vec<Route> {
        self.ctx.store.read(|s| s.routes_for_category())
    }

    pub fn routes_status(&self) -> QueryState<Arc<RouteData>> {
        self.ctx.queries.routes_state()
    }

    pub fn find_route(&self, short_name: &str) -> Option<Route> {
        self.ctx
            .store
            .read(|s| CTModels::get_route_by_short_name(short_name, &s.routes).cloned())
    }

    pub fn select_route(&self, route: Route) {
        info!("Route {} selected", route.short_name);
        self.ctx.store.update(|s| s.set_selected_route(route));
        self.ctx.events.present_sheet(Sheet::RouteDetails);
    }

    pub async fn set_default_group(&self, group: RouteGroup) -> Result<()> {
        self.ctx.queries.set_default_group(group).await
    }

    pub fn show_alerts(&self) {
        self.ctx.events.present_sheet(Sheet::Alerts);
    }

    // ========================================================================
    // Route details
    // ========================================================================

    pub fn select_direction(&self, index: usize) {
        self.ctx.store.update(|s| {
            let key = s
                .selected_route
                .as_ref()
                .and_then(|r| r.direction_list.get(index))
                .map(|d| d.direction.key.clone());
            s.set_selected_direction(key)
        });
    }

    pub fn select_stop(&self, stop_code: &str) {
        self.ctx.store.update(|s| {
            s.set_selected_stop(Some(stop_code.to_string()))
                .set_popped_up_callout(Some(stop_code.to_string()))
        });
        self.ctx.events.publish(AppEvent::ShowStopCallout(stop_code.to_string()));
    }

    /// Key of the estimate for `stop_code` on the selected route and
    /// direction.
    pub fn estimate_key(&self, stop_code: &str) -> Option<StopEstimateKey> {
        self.ctx.store.read(|s| {
            let route = s.selected_route.as_ref()?;
            let direction = s
                .selected_direction
                .clone()
                .or_else(|| route.direction_list.first().map(|d| d.direction.key.clone()))?;
            Some(StopEstimateKey::new(&route.key, &direction, stop_code))
        })
    }

    fn direction_stop_codes(&self) -> Vec<String> {
        self.ctx.store.read(|s| {
            s.selected_route
                .as_ref()
                .map(|r| {
                    r.stops_for_direction(s.selected_direction_index())
                        .into_iter()
                        .map(|stop| stop.stop_code.clone())
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Fetch state of every stop estimate requested for the selected
    /// direction, by stop code.
    pub fn estimate_statuses(&self) -> HashMap<String, QueryState<DepartureTimes>> {
        self.direction_stop_codes()
            .into_iter()
            .filter_map(|code| {
                let key = self.estimate_key(&code)?;
                let status = self.ctx.queries.stop_estimate_state(&key)?;
                Some((code, status))
            })
            .collect()
    }

    async fn apply_estimate(&self, key: &StopEstimateKey, refresh: bool) -> Result<()> {
        let generation = self.details_generation.load(Ordering::SeqCst);

        let times = if refresh {
            self.ctx.queries.refresh_stop_estimate(key).await?
        } else {
            self.ctx.queries.stop_estimate(key).await?
        };

        if self.details_generation.load(Ordering::SeqCst) != generation {
            warn!("Discarding estimate for stop {}: details view closed", key.stop_code);
            return Ok(());
        }

        let stop_code = key.stop_code.clone();
        self.ctx.store.update(|s| s.update_stop_estimate(times, &stop_code));
        Ok(())
    }

    pub async fn load_stop_estimate(&self, stop_code: &str) -> Result<()> {
        match self.estimate_key(stop_code) {
            Some(key) => self.apply_estimate(&key, false).await,
            None => Ok(()),
        }
    }

    /// Estimates for every stop on the selected direction, fetched
    /// concurrently.
    pub async fn load_direction_estimates(&self) -> Result<()> {
        let codes = self.direction_stop_codes();
        let results = join_all(codes.iter().map(|code| self.load_stop_estimate(code))).await;
        results.into_iter().collect()
    }

    /// Pull-to-refresh on the details view: refetch every stop estimate the
    /// view currently shows.
    pub async fn refresh_stop_estimates(&self) -> Result<()> {
        let codes: Vec<String> = self
            .ctx
            .store
            .read(|s| s.stop_estimates.iter().map(|e| e.stop_code.clone()).collect());

        let keys: Vec<StopEstimateKey> = codes.iter().filter_map(|code| self.estimate_key(code)).collect();
        let results = join_all(keys.iter().map(|key| self.apply_estimate(key, true))).await;
        results.into_iter().collect()
    }

    pub async fn toggle_favorite(&self, short_name: &str) -> Result<bool> {
        let is_favorite = self.ctx.queries.favorite(short_name).await?;
        if is_favorite {
            self.ctx.queries.remove_favorite(short_name).await?;
        } else {
            self.ctx.queries.add_favorite(short_name).await?;
        }

        let favorites = self.ctx.queries.favorites().await?;
        self.ctx.store.update(|s| s.set_favorite_routes(&favorites));
        Ok(!is_favorite)
    }

    pub fn close_route_details(&self) {
        self.details_generation.fetch_add(1, Ordering::SeqCst);
        self.ctx.store.update(|s| s.clear_selected_route().clear_stop_estimates());
        self.ctx.queries.forget_stop_estimates();
        self.ctx.events.present_sheet(Sheet::RoutesList);
    }
}
