//! In-memory reservation platform, solver and notifier shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notification_services::{Notification, NotificationError, Notifier};
use reqwest::Url;
use waf_session::{
    ChallengeSolver, Cookie, Credential, GuardedClient, HttpRequest, HttpResponse, Origin,
    SessionRegistry, SolveError, Transport, TransportError,
};

use crate::config::PlatformProfile;
use crate::reservation_api::ReservationApi;

/// Serves the availability, map, resource and catalog endpoints from fixtures.
#[derive(Default)]
pub(crate) struct FakePlatform {
    availability: Mutex<HashMap<String, String>>,
    maps: Mutex<HashMap<String, String>>,
    resources: Mutex<HashMap<String, String>>,
    catalog: Mutex<Option<String>>,
    failing: Mutex<HashSet<String>>,
    slow_catalogs: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<String>>,
}

impl FakePlatform {
    /// Availability of `map_id`: site flags and child-map flags
    pub(crate) fn map(&self, map_id: &str, sites: &[(&str, i64)], children: &[(&str, i64)]) {
        let sites: serde_json::Map<String, serde_json::Value> = sites
            .iter()
            .map(|(id, flag)| {
                (
                    id.to_string(),
                    serde_json::json!([{ "availability": flag, "remainingQuota": null }]),
                )
            })
            .collect();
        let children: serde_json::Map<String, serde_json::Value> = children
            .iter()
            .map(|(id, flag)| (id.to_string(), serde_json::json!([flag])))
            .collect();

        let body = serde_json::json!({
            "mapId": map_id,
            "resourceAvailabilities": sites,
            "mapLinkAvailabilities": children,
        });
        self.availability
            .lock()
            .unwrap()
            .insert(map_id.to_string(), body.to_string());
    }

    /// Metadata of `map_id` with an optional parent
    pub(crate) fn map_details(&self, map_id: &str, title: &str, parent: Option<&str>) {
        let body = serde_json::json!({
            "mapId": map_id,
            "parentMaps": parent.into_iter().collect::<Vec<_>>(),
            "localizedValues": [{ "cultureName": "en-CA", "title": title }],
        });
        self.maps
            .lock()
            .unwrap()
            .insert(map_id.to_string(), body.to_string());
    }

    /// Metadata of site `site_id`
    pub(crate) fn site(&self, site_id: &str, name: &str, resource_location_id: Option<&str>) {
        let body = serde_json::json!({
            "resourceId": site_id,
            "resourceLocationId": resource_location_id,
            "localizedValues": [{ "cultureName": "en-CA", "name": name }],
        });
        self.resources
            .lock()
            .unwrap()
            .insert(site_id.to_string(), body.to_string());
    }

    /// Body of the resource-location catalog
    pub(crate) fn locations(&self, body: &str) {
        *self.catalog.lock().unwrap() = Some(body.to_string());
    }

    /// Make the availability query of `map_id` answer 500
    pub(crate) fn fail_availability(&self, map_id: &str) {
        self.failing.lock().unwrap().insert(map_id.to_string());
    }

    /// Delay the catalog answer for `host`
    pub(crate) fn delay_catalog(&self, host: &str, delay: Duration) {
        self.slow_catalogs
            .lock()
            .unwrap()
            .insert(host.to_string(), delay);
    }

    /// Number of requests served so far
    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Map ids whose availability was queried, in request order
    pub(crate) fn availability_queries(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|url| {
                let url = Url::parse(url).ok()?;
                if !url.path().ends_with("/availability/map") {
                    return None;
                }
                url.query_pairs()
                    .find(|(k, _)| k == "mapId")
                    .map(|(_, v)| v.into_owned())
            })
            .collect()
    }

    fn route(&self, url: &Url) -> (u16, String) {
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        };

        let found = match url.path() {
            "/api/availability/map" => {
                let map_id = param("mapId");
                if self.failing.lock().unwrap().contains(&map_id) {
                    return (500, r#"{"error":"internal"}"#.to_string());
                }
                self.availability.lock().unwrap().get(&map_id).cloned()
            }
            "/api/maps/mapdatabyid" => self.maps.lock().unwrap().get(&param("mapId")).cloned(),
            "/api/resource/details" => self
                .resources
                .lock()
                .unwrap()
                .get(&param("resourceId"))
                .cloned(),
            "/api/resourceLocation" => self.catalog.lock().unwrap().clone(),
            _ => None,
        };

        match found {
            Some(body) => (200, body),
            None => (404, r#"{"error":"not found"}"#.to_string()),
        }
    }
}

#[async_trait]
impl Transport for FakePlatform {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.url.clone());

        let url = Url::parse(&request.url).map_err(|e| TransportError(e.to_string()))?;

        let delay = match url.path() {
            "/api/resourceLocation" => url
                .host_str()
                .and_then(|host| self.slow_catalogs.lock().unwrap().get(host).copied()),
            _ => None,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (status, body) = self.route(&url);

        Ok(HttpResponse {
            url: request.url,
            status,
            content_type: Some("application/json; charset=utf-8".to_string()),
            body,
        })
    }
}

/// Solver that hands out numbered tokens after a delay and counts its calls
pub(crate) struct CountingSolver {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingSolver {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for CountingSolver {
    async fn solve(&self, origin: &Origin) -> Result<Credential, SolveError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;

        Ok(Credential::new(
            origin.clone(),
            vec![Cookie {
                name: "aws-waf-token".to_string(),
                value: format!("token-{}", call),
                domain: String::new(),
                path: "/".to_string(),
                expires: None,
            }],
        ))
    }
}

/// Guarded client over `platform` whose sessions are solved by `solver`
pub(crate) fn client_with_solver(
    platform: Arc<FakePlatform>,
    solver: Arc<CountingSolver>,
) -> Arc<GuardedClient> {
    let sessions = Arc::new(SessionRegistry::new(solver, None));
    Arc::new(GuardedClient::new(platform, sessions, "test-agent"))
}

/// Guarded client over `platform` with an instant solver
pub(crate) fn client_for(platform: Arc<FakePlatform>) -> Arc<GuardedClient> {
    client_with_solver(platform, Arc::new(CountingSolver::new(Duration::ZERO)))
}

/// API client for `profile` over `platform`
pub(crate) fn api_for(platform: Arc<FakePlatform>, profile: PlatformProfile) -> ReservationApi {
    ReservationApi::new(client_for(platform), profile).unwrap()
}

/// Notifier that keeps every notification, optionally failing each delivery
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(NotificationError::Http("connection refused".to_string()));
        }
        Ok(())
    }
}
