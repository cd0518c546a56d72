// Remote transit API client.
//
// The bus-route map service hands out an anti-forgery token on its landing
// page; every data request after that carries the token. Responses are
// deserialized into the schema types in `ct_models` and validated before
// they are returned.

use crate::ct_models::{
    BaseData, CTModels, DepartureTimes, Result, RoutePatternPaths, TransitError,
};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

lazy_static! {
    static ref TOKEN_INPUT: Regex =
        Regex::new(r#"name="__RequestVerificationToken"[^>]*value="([^"]+)""#)
            .expect("token pattern is valid");
}

#[async_trait]
pub trait TransitApi: Send + Sync {
    async fn authenticate(&self) -> Result<String>;
    async fn get_base_data(&self, token: &str) -> Result<BaseData>;
    async fn get_pattern_paths(&self, route_keys: &[String], token: &str) -> Result<Vec<RoutePatternPaths>>;
    async fn get_stop_estimate(
        &self,
        route_key: &str,
        direction_key: &str,
        stop_code: &str,
        token: &str,
    ) -> Result<DepartureTimes>;
}

pub struct SpiritClient {
    client: Client,
    base_url: String,
}

impl SpiritClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .cookie_store(true)
            .build()
            .map_err(|e| TransitError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(SpiritClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn extract_token(page: &str) -> Option<String> {
        TOKEN_INPUT
            .captures(page)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        form: &[(String, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("__RequestVerificationToken", token)
            .header("X-Requested-With", "XMLHttpRequest")
            .form(form)
            .send()
            .await
            .map_err(|e| TransitError::NetworkError(format!("Request to {} failed: {}", path, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(TransitError::AuthError(format!("{} rejected the token ({})", path, status)));
        }
        if !status.is_success() {
            return Err(TransitError::NetworkError(format!("API returned error: {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransitError::NetworkError(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| TransitError::ValidationError(format!("Unexpected response from {}: {}", path, e)))
    }
}

#[async_trait]
impl TransitApi for SpiritClient {
    async fn authenticate(&self) -> Result<String> {
        let url = format!("{}/", self.base_url);
        let page = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransitError::NetworkError(format!("Failed to reach {}: {}. Check your internet connection.", url, e)))?
            .text()
            .await
            .map_err(|e| TransitError::NetworkError(format!("Failed to read response: {}", e)))?;

        Self::extract_token(&page)
            .ok_or_else(|| TransitError::AuthError("No request token found on the landing page".to_string()))
    }

    async fn get_base_data(&self, token: &str) -> Result<BaseData> {
        let data: BaseData = self.post_form("/RouteMap/GetBaseData/", token, &[]).await?;
        CTModels::validate_base_data(&data)?;
        Ok(data)
    }

    async fn get_pattern_paths(&self, route_keys: &[String], token: &str) -> Result<Vec<RoutePatternPaths>> {
        let form: Vec<(String, String)> = route_keys
            .iter()
            .map(|key| ("routeKeys[]".to_string(), key.clone()))
            .collect();

        let paths: Vec<RoutePatternPaths> = self.post_form("/RouteMap/GetPatternPaths/", token, &form).await?;
        CTModels::validate_pattern_paths(&paths)?;
        Ok(paths)
    }

    async fn get_stop_estimate(
        &self,
        route_key: &str,
        direction_key: &str,
        stop_code: &str,
        token: &str,
    ) -> Result<DepartureTimes> {
        let form = vec![
            ("routeDirectionKeys[0][routeKey]".to_string(), route_key.to_string()),
            ("routeDirectionKeys[0][directionKey]".to_string(), direction_key.to_string()),
            ("stopCode".to_string(), stop_code.to_string()),
        ];

        let mut times: DepartureTimes = self.post_form("/RouteMap/GetNextDepartTimes/", token, &form).await?;
        CTModels::validate_departure_times(&times)?;
        if times.stop_code.is_none() {
            times.stop_code = Some(stop_code.to_string());
        }
        Ok(times)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::ct_models::fixtures;
    use crate::ct_models::{Route, ServiceInterruption};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::watch;

    /// Scripted transit API that counts calls. Stop-estimate calls can be
    /// held open until `release` is called.
    pub struct MockTransitApi {
        pub routes: Vec<Route>,
        pub interruptions: Vec<ServiceInterruption>,
        pub auth_calls: AtomicUsize,
        pub base_data_calls: AtomicUsize,
        pub estimate_calls: AtomicUsize,
        pub fail_base_data: AtomicBool,
        pub fail_estimates: AtomicBool,
        pub hold_estimates: AtomicBool,
        pub estimate_minutes: Mutex<i64>,
        pub failing_stop: Mutex<Option<String>>,
        gate: watch::Sender<bool>,
    }

    impl MockTransitApi {
        pub fn with_routes(routes: Vec<Route>) -> Self {
            MockTransitApi {
                routes,
                interruptions: Vec::new(),
                auth_calls: AtomicUsize::new(0),
                base_data_calls: AtomicUsize::new(0),
                estimate_calls: AtomicUsize::new(0),
                fail_base_data: AtomicBool::new(false),
                fail_estimates: AtomicBool::new(false),
                hold_estimates: AtomicBool::new(false),
                estimate_minutes: Mutex::new(5),
                failing_stop: Mutex::new(None),
                gate: watch::Sender::new(false),
            }
        }

        pub fn with_interruptions(mut self, interruptions: Vec<ServiceInterruption>) -> Self {
            self.interruptions = interruptions;
            self
        }

        pub fn release(&self) {
            self.gate.send_replace(true);
        }
    }

    #[async_trait]
    impl TransitApi for MockTransitApi {
        async fn authenticate(&self) -> Result<String> {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            Ok("token".to_string())
        }

        async fn get_base_data(&self, _token: &str) -> Result<BaseData> {
            self.base_data_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_base_data.load(Ordering::SeqCst) {
                return Err(TransitError::NetworkError("base data unavailable".to_string()));
            }
            Ok(BaseData {
                routes: self.routes.clone(),
                service_interruptions: self.interruptions.clone(),
            })
        }

        async fn get_pattern_paths(&self, route_keys: &[String], _token: &str) -> Result<Vec<RoutePatternPaths>> {
            Ok(route_keys.iter().map(|k| fixtures::pattern_paths(k)).collect())
        }

        async fn get_stop_estimate(
            &self,
            route_key: &str,
            direction_key: &str,
            stop_code: &str,
            _token: &str,
        ) -> Result<DepartureTimes> {
            self.estimate_calls.fetch_add(1, Ordering::SeqCst);
            if self.hold_estimates.load(Ordering::SeqCst) {
                let mut gate = self.gate.subscribe();
                let _ = gate.wait_for(|open| *open).await;
            }
            let stop_fails = self.failing_stop.lock().unwrap().as_deref() == Some(stop_code);
            if stop_fails || self.fail_estimates.load(Ordering::SeqCst) {
                return Err(TransitError::NetworkError("estimates unavailable".to_string()));
            }
            let minutes = *self.estimate_minutes.lock().unwrap();
            let mut times = fixtures::departure_times(route_key, direction_key, minutes);
            times.stop_code = Some(stop_code.to_string());
            Ok(times)
        }
    }
}
