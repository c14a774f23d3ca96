use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};
use waf_session::Origin;

use crate::reservation_api::{ReservationApi, ResourceLocation};
use crate::scan_types::{ResolvedHit, ScanError, SiteHit};

/// Display name and owning resource location of a site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteInfo {
    pub name: String,
    pub resource_location_id: Option<String>,
}

type Key = (Origin, String);
type Catalog = Arc<Vec<ResourceLocation>>;

/// Process-lifetime cache of map and site names.
///
/// Names are assumed stable, so entries are never evicted. Only complete
/// lookups are cached; a partial name after a failed request is retried on
/// the next reference.
pub struct NameCache {
    separator: String,
    maps: Mutex<HashMap<Key, String>>,
    sites: Mutex<HashMap<Key, SiteInfo>>,
    /// One cell per origin; the map lock is never held across a fetch
    locations: Mutex<HashMap<Origin, Arc<OnceCell<Catalog>>>>,
}

impl NameCache {
    /// Create an empty cache joining parent and child map names with `separator`
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            maps: Mutex::new(HashMap::new()),
            sites: Mutex::new(HashMap::new()),
            locations: Mutex::new(HashMap::new()),
        }
    }

    /// Display name of `map_id`, prefixed with its first parent's title.
    pub async fn map_name(&self, api: &ReservationApi, map_id: &str) -> String {
        let key = (api.origin().clone(), map_id.to_string());
        if let Some(name) = self.maps.lock().await.get(&key) {
            return name.clone();
        }

        let details = match api.map_details(map_id).await {
            Ok(details) => details,
            Err(e) => {
                warn!("Could not resolve name of map {}: {}", map_id, e);
                return String::new();
            }
        };

        let title = details.title();
        let mut complete = true;

        let name = match details.parent_maps.first() {
            Some(parent_id) if parent_id != map_id => match api.map_details(parent_id).await {
                Ok(parent) => join_nonempty(&parent.title(), &title, &self.separator),
                Err(e) => {
                    warn!("Could not resolve parent map {} of {}: {}", parent_id, map_id, e);
                    complete = false;
                    title
                }
            },
            _ => title,
        };

        if complete {
            self.maps.lock().await.insert(key, name.clone());
        }
        name
    }

    /// Name and resource location of `site_id`; empty on failure.
    pub async fn site_info(&self, api: &ReservationApi, site_id: &str) -> SiteInfo {
        let key = (api.origin().clone(), site_id.to_string());
        if let Some(info) = self.sites.lock().await.get(&key) {
            return info.clone();
        }

        match api.resource_details(site_id).await {
            Ok(details) => {
                let info = SiteInfo {
                    name: details.name(),
                    resource_location_id: details.resource_location_id,
                };
                self.sites.lock().await.insert(key, info.clone());
                info
            }
            Err(e) => {
                warn!("Could not resolve name of site {}: {}", site_id, e);
                SiteInfo::default()
            }
        }
    }

    /// Resolve the display names of a hit
    pub async fn resolve(&self, api: &ReservationApi, hit: &SiteHit) -> ResolvedHit {
        let map_name = self.map_name(api, &hit.map_id).await;
        let site = self.site_info(api, &hit.site_id).await;

        ResolvedHit {
            hit: hit.clone(),
            map_name,
            site_name: site.name,
            resource_location_id: site.resource_location_id,
        }
    }

    async fn catalog(&self, api: &ReservationApi) -> Result<Catalog, ScanError> {
        let cell = self
            .locations
            .lock()
            .await
            .entry(api.origin().clone())
            .or_default()
            .clone();

        let catalog = cell
            .get_or_try_init(|| async {
                let catalog = Arc::new(api.resource_locations().await?);
                debug!(
                    "Loaded {} resource locations for {}",
                    catalog.len(),
                    api.origin()
                );
                Ok::<_, ScanError>(catalog)
            })
            .await?;

        Ok(catalog.clone())
    }

    /// Resource location whose English name contains `label`.
    pub async fn find_resource_location(&self, api: &ReservationApi, label: &str) -> Option<String> {
        if label.trim().is_empty() {
            return None;
        }

        match self.catalog(api).await {
            Ok(catalog) => catalog
                .iter()
                .find(|location| location.matches(label.trim()))
                .map(|location| location.resource_location_id.clone()),
            Err(e) => {
                warn!("Could not load resource locations for {}: {}", api.origin(), e);
                None
            }
        }
    }
}

fn join_nonempty(parent: &str, child: &str, separator: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (false, true) => parent.to_string(),
        (false, false) => format!("{}{}{}", parent, separator, child),
    }
}
