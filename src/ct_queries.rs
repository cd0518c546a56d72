// Named queries over the transit API and device storage.
//
// Query identity comes from `QueryKey`, built only from the logical
// parameters of the request, so two callers asking for the same stop
// estimate land in the same cell and share one network call.

use crate::ct_cache::{QueryCell, QueryState, Staleness};
use crate::ct_client::TransitApi;
use crate::ct_events::EventBus;
use crate::ct_favorites::{FavoritesStore, RouteGroup};
use crate::ct_models::{
    CTModels, DepartureTimes, Result, Route, ServiceInterruption, TransitError,
};
use futures::future::{BoxFuture, FutureExt};
use log::{error, info};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StopEstimateKey {
    pub route_key: String,
    pub direction_key: String,
    pub stop_code: String,
}

impl StopEstimateKey {
    pub fn new(route_key: &str, direction_key: &str, stop_code: &str) -> Self {
        StopEstimateKey {
            route_key: route_key.to_string(),
            direction_key: direction_key.to_string(),
            stop_code: stop_code.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    AuthToken,
    Routes,
    Favorites,
    Favorite(String),
    DefaultGroup,
    StopEstimate(StopEstimateKey),
    /// Every stop estimate, for family-wide invalidation.
    AllStopEstimates,
    /// Every per-route favorite flag.
    AllFavoriteFlags,
}

/// Routes with their pattern paths attached, plus the service interruptions
/// that came with the same base-data response.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteData {
    pub routes: Vec<Route>,
    pub service_interruptions: Vec<ServiceInterruption>,
}

#[derive(Debug, Clone, Default)]
pub struct CampusRoutes {
    pub on_campus: Vec<String>,
    pub off_campus: Vec<String>,
}

pub struct TransitQueries {
    api: Arc<dyn TransitApi>,
    favorites_store: Arc<FavoritesStore>,
    events: EventBus,
    campus: Arc<CampusRoutes>,
    auth_token: QueryCell<String>,
    routes: QueryCell<Arc<RouteData>>,
    favorites: QueryCell<Arc<Vec<String>>>,
    default_group: QueryCell<RouteGroup>,
    favorite_flags: Mutex<HashMap<String, Arc<QueryCell<bool>>>>,
    stop_estimates: Mutex<HashMap<StopEstimateKey, Arc<QueryCell<DepartureTimes>>>>,
}

/// Wrap a fetch so a failure is logged and shown to the user once, no
/// matter how many callers share it.
fn alerting<T, Fut>(events: EventBus, title: &'static str, fut: Fut) -> BoxFuture<'static, Result<T>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    async move {
        let result = fut.await;
        if let Err(e) = &result {
            error!("{}: {}", title, e);
            events.alert(title, &e.alert_message());
        }
        result
    }
    .boxed()
}

impl TransitQueries {
    pub fn new(
        api: Arc<dyn TransitApi>,
        favorites_store: Arc<FavoritesStore>,
        events: EventBus,
        campus: CampusRoutes,
    ) -> Self {
        TransitQueries {
            api,
            favorites_store,
            events,
            campus: Arc::new(campus),
            auth_token: QueryCell::new("authToken", Staleness::Infinite),
            routes: QueryCell::new("routes", Staleness::Infinite),
            favorites: QueryCell::new("favorites", Staleness::Infinite),
            default_group: QueryCell::new("defaultRouteGroup", Staleness::Infinite),
            favorite_flags: Mutex::new(HashMap::new()),
            stop_estimates: Mutex::new(HashMap::new()),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn auth_token(&self) -> Result<String> {
        let api = self.api.clone();
        let events = self.events.clone();
        self.auth_token
            .fetch(move || {
                alerting(events, "Error while fetching auth token", async move {
                    api.authenticate().await
                })
            })
            .await
    }

    pub async fn routes(&self) -> Result<Arc<RouteData>> {
        let token = self.auth_token().await?;
        let api = self.api.clone();
        let events = self.events.clone();
        let campus = self.campus.clone();

        self.routes
            .fetch(move || {
                alerting(events, "Error while loading initial data", async move {
                    let base = api.get_base_data(&token).await?;
                    let keys: Vec<String> = base.routes.iter().map(|r| r.key.clone()).collect();
                    let paths = api.get_pattern_paths(&keys, &token).await?;

                    CTModels::validate_base_data(&base)?;
                    CTModels::validate_pattern_paths(&paths)?;

                    let routes = CTModels::attach_pattern_paths(base.routes, paths);
                    let routes = CTModels::label_campus_areas(routes, &campus.on_campus, &campus.off_campus);
                    info!(
                        "Loaded {} routes, {} service interruptions",
                        routes.len(),
                        base.service_interruptions.len()
                    );

                    Ok(Arc::new(RouteData {
                        routes,
                        service_interruptions: base.service_interruptions,
                    }))
                })
            })
            .await
    }

    /// Favorited short names. Legacy entries are resolved against the route
    /// list, so this waits for `routes` first.
    pub async fn favorites(&self) -> Result<Arc<Vec<String>>> {
        let route_data = self.routes().await?;
        let store = self.favorites_store.clone();
        let events = self.events.clone();

        self.favorites
            .fetch(move || {
                alerting(events, "Error", async move {
                    Ok(Arc::new(store.read_favorites(&route_data.routes).await?))
                })
            })
            .await
    }

    pub async fn favorite(&self, short_name: &str) -> Result<bool> {
        let cell = {
            let mut flags = self.favorite_flags.lock().unwrap_or_else(|p| p.into_inner());
            flags
                .entry(short_name.to_string())
                .or_insert_with(|| Arc::new(QueryCell::new(format!("favorite/{}", short_name), Staleness::Infinite)))
                .clone()
        };

        let store = self.favorites_store.clone();
        let events = self.events.clone();
        let short_name = short_name.to_string();
        cell.fetch(move || {
            alerting(events, "Error", async move { store.is_favorite(&short_name).await })
        })
        .await
    }

    pub async fn default_group(&self) -> Result<RouteGroup> {
        let store = self.favorites_store.clone();
        let events = self.events.clone();
        self.default_group
            .fetch(move || alerting(events, "Error", async move { store.default_group().await }))
            .await
    }

    fn stop_estimate_cell(&self, key: &StopEstimateKey) -> Arc<QueryCell<DepartureTimes>> {
        let mut cells = self.stop_estimates.lock().unwrap_or_else(|p| p.into_inner());
        cells
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(QueryCell::new(
                    format!("stopEstimate/{}/{}/{}", key.route_key, key.direction_key, key.stop_code),
                    Staleness::Immediate,
                ))
            })
            .clone()
    }

    fn stop_estimate_fetch(&self, key: &StopEstimateKey) -> impl FnOnce() -> BoxFuture<'static, Result<DepartureTimes>> {
        let api = self.api.clone();
        let events = self.events.clone();
        let token = self.auth_token.snapshot().data;
        let key = key.clone();

        move || {
            alerting(events, "Error while fetching departure times", async move {
                let token = token.ok_or_else(|| {
                    TransitError::AuthError("Not authenticated yet".to_string())
                })?;
                api.get_stop_estimate(&key.route_key, &key.direction_key, &key.stop_code, &token)
                    .await
            })
        }
    }

    /// Live departure times; never served from cache, but concurrent
    /// requests for one key share a single call.
    pub async fn stop_estimate(&self, key: &StopEstimateKey) -> Result<DepartureTimes> {
        self.auth_token().await?;
        let cell = self.stop_estimate_cell(key);
        cell.fetch(self.stop_estimate_fetch(key)).await
    }

    /// Pull-to-refresh: refetch, joining a fetch already in progress.
    pub async fn refresh_stop_estimate(&self, key: &StopEstimateKey) -> Result<DepartureTimes> {
        self.auth_token().await?;
        self.invalidate(&QueryKey::StopEstimate(key.clone()));
        let cell = self.stop_estimate_cell(key);
        cell.refetch(self.stop_estimate_fetch(key)).await
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn routes_state(&self) -> QueryState<Arc<RouteData>> {
        self.routes.snapshot()
    }

    /// `None` when nothing was ever requested for `key`.
    pub fn stop_estimate_state(&self, key: &StopEstimateKey) -> Option<QueryState<DepartureTimes>> {
        let cells = self.stop_estimates.lock().unwrap_or_else(|p| p.into_inner());
        cells.get(key).map(|cell| cell.snapshot())
    }

    // ========================================================================
    // Invalidation & mutations
    // ========================================================================

    pub fn invalidate(&self, key: &QueryKey) {
        match key {
            QueryKey::AuthToken => self.auth_token.invalidate(),
            QueryKey::Routes => self.routes.invalidate(),
            QueryKey::Favorites => self.favorites.invalidate(),
            QueryKey::DefaultGroup => self.default_group.invalidate(),
            QueryKey::Favorite(short_name) => {
                let flags = self.favorite_flags.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(cell) = flags.get(short_name) {
                    cell.invalidate();
                }
            }
            QueryKey::AllFavoriteFlags => {
                // Dropping the cells invalidates them and keeps the map from
                // growing with every route ever looked at.
                self.favorite_flags.lock().unwrap_or_else(|p| p.into_inner()).clear();
            }
            QueryKey::StopEstimate(estimate_key) => {
                let cells = self.stop_estimates.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(cell) = cells.get(estimate_key) {
                    cell.invalidate();
                }
            }
            QueryKey::AllStopEstimates => {
                let cells = self.stop_estimates.lock().unwrap_or_else(|p| p.into_inner());
                cells.values().for_each(|cell| cell.invalidate());
            }
        }
    }

    /// Drop every stop-estimate cell. Fetches still running finish for
    /// their current waiters only.
    pub fn forget_stop_estimates(&self) {
        self.stop_estimates.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    async fn after_favorite_mutation(&self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                self.invalidate(&QueryKey::Favorites);
                self.invalidate(&QueryKey::AllFavoriteFlags);
                Ok(())
            }
            Err(e) => {
                error!("Favorite update failed: {}", e);
                self.events.alert("Error", &e.alert_message());
                Err(e)
            }
        }
    }

    pub async fn add_favorite(&self, short_name: &str) -> Result<()> {
        let result = self.favorites_store.add_favorite(short_name).await;
        self.after_favorite_mutation(result).await
    }

    pub async fn remove_favorite(&self, short_name: &str) -> Result<()> {
        let result = self.favorites_store.remove_favorite(short_name).await;
        self.after_favorite_mutation(result).await
    }

    pub async fn set_default_group(&self, group: RouteGroup) -> Result<()> {
        match self.favorites_store.set_default_group(group).await {
            Ok(()) => {
                self.invalidate(&QueryKey::DefaultGroup);
                Ok(())
            }
            Err(e) => {
                self.events.alert("Error", &e.alert_message());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ct_client::mock::MockTransitApi;
    use crate::ct_events::AppEvent;
    use crate::ct_models::fixtures::{interruption, route};
    use crate::ct_storage::{KeyValueStorage, MemoryStorage};
    use tokio::sync::mpsc::UnboundedReceiver;

    pub struct Harness {
        pub api: Arc<MockTransitApi>,
        pub storage: Arc<MemoryStorage>,
        pub queries: Arc<TransitQueries>,
        pub events: EventBus,
        pub receiver: UnboundedReceiver<AppEvent>,
    }

    pub fn harness_with(storage: MemoryStorage) -> Harness {
        let api = Arc::new(
            MockTransitApi::with_routes(vec![
                route("A1B2C3D4-0000-0000-0000-000000000000", "12"),
                route("r-47", "47"),
                route("r-01", "01"),
            ])
            .with_interruptions(vec![interruption("i-1", &["r-47"])]),
        );
        let storage = Arc::new(storage);
        let store = Arc::new(FavoritesStore::new(storage.clone() as Arc<dyn KeyValueStorage>));
        let (events, receiver) = EventBus::new();
        let queries = Arc::new(TransitQueries::new(
            api.clone(),
            store,
            events.clone(),
            CampusRoutes {
                on_campus: vec!["01".to_string()],
                off_campus: vec!["12".to_string(), "47".to_string()],
            },
        ));

        Harness { api, storage, queries, events, receiver }
    }

    pub fn harness() -> Harness {
        harness_with(MemoryStorage::new())
    }

    impl TransitQueries {
        pub fn cached_stop_estimates(&self) -> usize {
            self.stop_estimates.lock().unwrap().len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::ct_events::{drain, AppEvent};
    use crate::ct_models::CampusArea;
    use crate::ct_storage::{KeyValueStorage, MemoryStorage, FAVORITES_KEY};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_query_identity_comes_from_parameters() {
        let a = QueryKey::StopEstimate(StopEstimateKey::new("r1", "d1", "0100"));
        let b = QueryKey::StopEstimate(StopEstimateKey::new("r1", "d1", "0100"));
        let c = QueryKey::StopEstimate(StopEstimateKey::new("r1", "d2", "0100"));

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[tokio::test]
    async fn test_routes_fetched_once_with_paths_and_labels() {
        let h = harness();

        let data = h.queries.routes().await.unwrap();
        h.queries.routes().await.unwrap();

        assert_eq!(h.api.base_data_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.api.auth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(data.routes.len(), 3);
        assert!(data.routes.iter().all(|r| r.pattern_paths.len() == 2));
        assert_eq!(data.routes[2].category, Some(CampusArea::OnCampus));
    }

    #[tokio::test]
    async fn test_base_data_failure_alerts_and_keeps_empty_slot() {
        let mut h = harness();
        h.api.fail_base_data.store(true, Ordering::SeqCst);

        assert!(h.queries.routes().await.is_err());

        let state = h.queries.routes_state();
        assert!(state.data.is_none());
        assert!(state.error.is_some());
        assert_eq!(
            drain(&mut h.receiver),
            vec![AppEvent::ShowAlert {
                title: "Error while loading initial data".to_string(),
                message: "Network error: base data unavailable".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_base_data_failure_on_refresh_keeps_loaded_routes() {
        let h = harness();
        h.queries.routes().await.unwrap();

        h.api.fail_base_data.store(true, Ordering::SeqCst);
        h.queries.invalidate(&QueryKey::Routes);
        assert!(h.queries.routes().await.is_err());

        assert_eq!(h.queries.routes_state().data.map(|d| d.routes.len()), Some(3));
    }

    #[tokio::test]
    async fn test_favorites_migrate_against_routes() {
        let h = harness_with(MemoryStorage::with_item(
            FAVORITES_KEY,
            r#"["A1B2C3D4-0000-0000-0000-000000000000", "47"]"#,
        ));

        let favorites = h.queries.favorites().await.unwrap();
        assert_eq!(*favorites, vec!["12".to_string(), "47".to_string()]);

        let stored = h.storage.get_item(FAVORITES_KEY).await.unwrap().unwrap();
        assert_eq!(stored, r#"["12","47"]"#);
    }

    #[tokio::test]
    async fn test_favorite_mutations_invalidate() {
        let h = harness();
        assert!(h.queries.favorites().await.unwrap().is_empty());
        assert!(!h.queries.favorite("01").await.unwrap());

        h.queries.add_favorite("01").await.unwrap();
        assert_eq!(*h.queries.favorites().await.unwrap(), vec!["01".to_string()]);
        assert!(h.queries.favorite("01").await.unwrap());

        h.queries.remove_favorite("01").await.unwrap();
        assert!(h.queries.favorites().await.unwrap().is_empty());
        assert!(!h.queries.favorite("01").await.unwrap());
    }

    #[tokio::test]
    async fn test_default_group_round_trip() {
        let h = harness();
        assert_eq!(h.queries.default_group().await.unwrap(), RouteGroup::All);

        h.queries.set_default_group(RouteGroup::Favorites).await.unwrap();
        assert_eq!(h.queries.default_group().await.unwrap(), RouteGroup::Favorites);
    }

    #[tokio::test]
    async fn test_refresh_during_fetch_shares_one_call() {
        let h = harness();
        h.queries.routes().await.unwrap();
        h.api.hold_estimates.store(true, Ordering::SeqCst);
        let key = StopEstimateKey::new("r-01", "r-01-out", "0100");

        let original = {
            let queries = h.queries.clone();
            let key = key.clone();
            tokio::spawn(async move { queries.stop_estimate(&key).await })
        };
        while h.api.estimate_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let refresh = {
            let queries = h.queries.clone();
            let key = key.clone();
            tokio::spawn(async move { queries.refresh_stop_estimate(&key).await })
        };
        tokio::task::yield_now().await;
        h.api.release();

        let a = original.await.unwrap().unwrap();
        let b = refresh.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(h.api.estimate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_estimate_is_not_cached() {
        let h = harness();
        let key = StopEstimateKey::new("r-01", "r-01-out", "0100");

        h.queries.stop_estimate(&key).await.unwrap();
        *h.api.estimate_minutes.lock().unwrap() = 9;
        let second = h.queries.stop_estimate(&key).await.unwrap();

        assert_eq!(h.api.estimate_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.queries.stop_estimate_state(&key).unwrap().data, Some(second));
    }

    #[tokio::test]
    async fn test_stop_estimate_failure_keeps_previous_value() {
        let mut h = harness();
        let key = StopEstimateKey::new("r-01", "r-01-out", "0100");
        let first = h.queries.stop_estimate(&key).await.unwrap();

        h.api.fail_estimates.store(true, Ordering::SeqCst);
        assert!(h.queries.refresh_stop_estimate(&key).await.is_err());

        assert_eq!(h.queries.stop_estimate_state(&key).unwrap().data, Some(first));
        assert_eq!(drain(&mut h.receiver).len(), 1);
    }
}
