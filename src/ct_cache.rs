// Query cache with in-flight request sharing.
//
// Each cached query lives in a `QueryCell`. A fetch started while another
// fetch of the same cell is running attaches to the running one instead of
// starting a second request; every waiter gets the same result. Failed
// fetches keep whatever data the cell already had.

use crate::ct_models::{Result, TransitError};
use futures::future::{BoxFuture, FutureExt, Shared};
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::{Mutex, MutexGuard};

pub type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Cached data is used until the cell is invalidated.
    Infinite,
    /// Every fetch goes to the network.
    Immediate,
}

/// Point-in-time view of a cell.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub error: Option<TransitError>,
    pub is_fetching: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> QueryState<T> {
    pub fn is_loading(&self) -> bool {
        self.data.is_none() && self.is_fetching
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some()
    }
}

struct CellState<T> {
    data: Option<T>,
    error: Option<TransitError>,
    invalidated: bool,
    // Generation that was current when `invalidate` last ran. A fetch only
    // clears `invalidated` if it started after that.
    invalidated_at: u64,
    updated_at: Option<DateTime<Utc>>,
    in_flight: Option<(u64, SharedFetch<T>)>,
    generation: u64,
}

pub struct QueryCell<T> {
    name: String,
    staleness: Staleness,
    state: Mutex<CellState<T>>,
}

impl<T> QueryCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, staleness: Staleness) -> Self {
        QueryCell {
            name: name.into(),
            staleness,
            state: Mutex::new(CellState {
                data: None,
                error: None,
                invalidated: false,
                invalidated_at: 0,
                updated_at: None,
                in_flight: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> QueryState<T> {
        let state = self.lock();
        QueryState {
            data: state.data.clone(),
            error: state.error.clone(),
            is_fetching: state.in_flight.is_some(),
            updated_at: state.updated_at,
        }
    }

    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.invalidated = true;
        state.invalidated_at = state.generation;
    }

    fn is_fresh(&self, state: &CellState<T>) -> bool {
        match self.staleness {
            Staleness::Infinite => state.data.is_some() && !state.invalidated,
            Staleness::Immediate => false,
        }
    }

    /// Cached data when it is still fresh, otherwise a (shared) fetch.
    pub async fn fetch<F>(&self, fetcher: F) -> Result<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        self.run(fetcher, false).await
    }

    /// Always fetch, but join a fetch that is already running.
    pub async fn refetch<F>(&self, fetcher: F) -> Result<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        self.run(fetcher, true).await
    }

    async fn run<F>(&self, fetcher: F, force: bool) -> Result<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let (generation, fetch) = {
            let mut state = self.lock();

            if !force && self.is_fresh(&state) {
                if let Some(data) = &state.data {
                    debug!("Query '{}' served from cache", self.name);
                    return Ok(data.clone());
                }
            }

            match &state.in_flight {
                Some((generation, fetch)) => {
                    debug!("Query '{}' joined a running fetch", self.name);
                    (*generation, fetch.clone())
                }
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    let fetch = fetcher().shared();
                    state.in_flight = Some((generation, fetch.clone()));
                    debug!("Query '{}' fetching (generation {})", self.name, generation);
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut state = self.lock();
        let owns_fetch = matches!(&state.in_flight, Some((g, _)) if *g == generation);
        if owns_fetch {
            state.in_flight = None;
            match &result {
                Ok(data) => {
                    state.data = Some(data.clone());
                    state.error = None;
                    if state.invalidated_at < generation {
                        state.invalidated = false;
                    }
                    state.updated_at = Some(Utc::now());
                }
                Err(e) => {
                    state.error = Some(e.clone());
                }
            }
        }

        result
    }
}
