use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use notification_services::{Notification, Notifier, PRIORITY_ERROR, PRIORITY_HIT};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use waf_session::GuardedClient;

use crate::config::ProfileRegistry;
use crate::crawler::{check_site, find_available_sites};
use crate::error_throttle::ErrorThrottle;
use crate::names::NameCache;
use crate::reservation_api::ReservationApi;
use crate::scan_types::*;

/// Tuning of the scan loop
#[derive(Debug, Clone)]
pub struct ScanExecutorConfig {
    /// Time between passes in daemon mode (default: 60 seconds)
    pub interval: Duration,

    /// Minimum time between two notifications of the same error (default: 30 minutes)
    pub error_cooldown: chrono::Duration,

    /// Hits whose display name contains this are never notified
    pub last_minute_marker: String,

    /// Separator between parent map, map and site names
    pub name_separator: String,
}

impl Default for ScanExecutorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            error_cooldown: chrono::Duration::minutes(30),
            last_minute_marker: "(Last Minute)".to_string(),
            name_separator: " - ".to_string(),
        }
    }
}

/// Outcome of one search within a pass
#[derive(Debug, Default)]
struct SearchReport {
    hits: usize,
    notified: usize,
}

/// Runs every configured search and turns hits and failures into notifications.
pub struct ScanExecutor {
    profiles: ProfileRegistry,
    apis: HashMap<String, ReservationApi>,
    searches: Vec<SearchSpec>,
    notifier: Arc<dyn Notifier>,
    names: NameCache,
    throttle: ErrorThrottle,
    config: ScanExecutorConfig,
}

impl ScanExecutor {
    /// Create an executor with one API client per profile in `profiles`.
    pub fn new(
        client: Arc<GuardedClient>,
        profiles: ProfileRegistry,
        searches: Vec<SearchSpec>,
        notifier: Arc<dyn Notifier>,
        config: Option<ScanExecutorConfig>,
    ) -> Result<Self, ScanError> {
        let config = config.unwrap_or_default();

        let mut apis = HashMap::new();
        for profile in profiles.profiles() {
            apis.insert(
                profile.key.clone(),
                ReservationApi::new(client.clone(), profile.clone())?,
            );
        }

        Ok(Self {
            profiles,
            apis,
            searches,
            notifier,
            names: NameCache::new(config.name_separator.clone()),
            throttle: ErrorThrottle::new(config.error_cooldown),
            config,
        })
    }

    /// Start the scan loop. Runs a pass every interval and never returns.
    pub async fn start(self: Arc<Self>) {
        info!(
            "Starting scan loop over {} searches every {:?}",
            self.searches.len(),
            self.config.interval
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // A pass runs in its own task so a panic inside it only loses that pass
            let executor = self.clone();
            match tokio::spawn(async move { executor.run_once().await }).await {
                Ok(summary) => debug!("Pass finished: {:?}", summary),
                Err(e) => error!("Scan pass aborted: {}", e),
            }
        }
    }

    /// Run every search once, concurrently. A failing search never affects the others.
    pub async fn run_once(&self) -> ScanSummary {
        let results = join_all(self.searches.iter().map(|search| async move {
            let result = self.run_search(search).await;
            (search, result)
        }))
        .await;

        let mut summary = ScanSummary {
            searches: self.searches.len(),
            ..ScanSummary::default()
        };

        for (search, result) in results {
            match result {
                Ok(report) => {
                    summary.hits += report.hits;
                    summary.notified += report.notified;
                }
                Err(e) => {
                    summary.failures += 1;
                    error!("Search {} failed: {}", search.label(), e);
                    self.report_error(&e).await;
                }
            }
        }

        info!(
            "Scan pass complete: {} searches, {} hits, {} notified, {} failed",
            summary.searches, summary.hits, summary.notified, summary.failures
        );
        summary
    }

    async fn run_search(&self, search: &SearchSpec) -> Result<SearchReport, ScanError> {
        let profile = self.profiles.resolve(&search.base_url)?;
        let api = self
            .apis
            .get(&profile.key)
            .ok_or_else(|| ScanError::UnknownProfile(search.base_url.clone()))?;

        match search.kind {
            SearchKind::Map => self.run_map_search(api, search).await,
            SearchKind::Site => self.run_site_search(api, search).await,
        }
    }

    async fn run_map_search(
        &self,
        api: &ReservationApi,
        search: &SearchSpec,
    ) -> Result<SearchReport, ScanError> {
        let label = search.label();
        let range = search.date_range();

        debug!("Searching {} from map {}", label, search.map_id);
        let outcome = find_available_sites(api, &search.map_id, &range, &search.params).await?;

        let mut report = SearchReport {
            hits: outcome.hits.len(),
            notified: 0,
        };

        for hit in &outcome.hits {
            let resolved = self.names.resolve(api, hit).await;
            let display_name = resolved.display_name(&self.config.name_separator);

            if display_name.contains(&self.config.last_minute_marker) {
                debug!("Skipping last minute listing {}", display_name);
                continue;
            }
            if let Some(location) = &resolved.resource_location_id {
                if search.exclude_resource_locations.contains(location) {
                    debug!("Skipping {} in excluded location {}", display_name, location);
                    continue;
                }
            }

            let resource_location_id = match resolved.resource_location_id {
                Some(id) => id,
                None => self
                    .names
                    .find_resource_location(api, &label)
                    .await
                    .unwrap_or_default(),
            };
            let url = api.booking_url(&hit.map_id, &resource_location_id, &range)?;

            info!("🏕️ {} available: {}", label, display_name);
            let notification = Notification::new(
                "Campground available!",
                &format!("{}: {}", label, display_name),
                Some(&url),
                PRIORITY_HIT,
            );
            if self.deliver(&notification).await {
                report.notified += 1;
            }
        }

        Ok(report)
    }

    async fn run_site_search(
        &self,
        api: &ReservationApi,
        search: &SearchSpec,
    ) -> Result<SearchReport, ScanError> {
        let label = search.label();
        let site_id = search.site_id.as_deref().ok_or_else(|| {
            ScanError::ConfigError(format!("site search {} has no siteId", label))
        })?;

        let hit = check_site(
            api,
            &search.map_id,
            site_id,
            &search.date_range(),
            &search.params,
        )
        .await?;

        if hit.is_none() {
            debug!("Site {} not available", label);
            return Ok(SearchReport::default());
        }

        info!("🏕️ Site {} available", label);
        let url = api.manage_bookings_url()?;
        let notification = Notification::new(
            &format!("Campsite {} available!", label),
            "",
            Some(&url),
            PRIORITY_HIT,
        );

        Ok(SearchReport {
            hits: 1,
            notified: usize::from(self.deliver(&notification).await),
        })
    }

    /// Notify a failure unless the same message was notified within the cooldown
    async fn report_error(&self, error: &ScanError) {
        let message = error.to_string();

        if !self.throttle.claim(&message).await {
            debug!("Suppressing repeated error notification: {}", message);
            return;
        }

        let notification = Notification::new(
            "Error searching for campground",
            &message,
            None,
            PRIORITY_ERROR,
        );
        self.deliver(&notification).await;
    }

    /// Delivery is best effort; failures are logged
    async fn deliver(&self, notification: &Notification) -> bool {
        match self.notifier.notify(notification).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send notification {:?}: {}", notification.title, e);
                false
            }
        }
    }
}
