use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use waf_session::{GuardedClient, Origin};

use crate::config::PlatformProfile;
use crate::scan_types::{DateRange, ScanError, de_id, de_ids, de_opt_id};

const NO_PARAMS: [(&str, &str); 0] = [];

/// Client for one reservation origin's internal JSON API.
///
/// All requests go through the guarded client, so they share the origin's
/// WAF session. Query parameters come from the origin's profile.
pub struct ReservationApi {
    client: Arc<GuardedClient>,
    profile: PlatformProfile,
    origin: Origin,
    base: Url,
}

/// Availability flag reported for a site or a linked map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityFlag {
    Available,
    Unavailable,
    NotOperating,
    NonReservable,
    Closed,
    /// Value not seen in observed responses
    Unknown(i64),
}

impl From<i64> for AvailabilityFlag {
    fn from(value: i64) -> Self {
        match value {
            0 => Self::Available,
            1 => Self::Unavailable,
            2 => Self::NotOperating,
            3 => Self::NonReservable,
            4 => Self::Closed,
            other => Self::Unknown(other),
        }
    }
}

impl AvailabilityFlag {
    /// Whether a linked map with this flag is worth descending into.
    /// Unrecognised values descend so that nothing is pruned on a guess.
    pub fn may_have_availability(self) -> bool {
        matches!(self, Self::Available | Self::Unknown(_))
    }
}

/// Availability entry for one site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAvailability {
    pub availability: i64,
    #[serde(default)]
    pub remaining_quota: Option<i64>,
}

/// Response of the map availability endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapAvailability {
    #[serde(default)]
    pub resource_availabilities: Option<HashMap<String, Vec<ResourceAvailability>>>,
    #[serde(default)]
    pub map_link_availabilities: Option<HashMap<String, Vec<i64>>>,
}

impl MapAvailability {
    /// Flag of `site_id`, if the map lists it
    pub fn site_flag(&self, site_id: &str) -> Option<AvailabilityFlag> {
        let entries = self.resource_availabilities.as_ref()?.get(site_id)?;
        Some(match entries.first() {
            Some(entry) => AvailabilityFlag::from(entry.availability),
            None => AvailabilityFlag::Unknown(-1),
        })
    }

    /// Sites on this map that are available, sorted by id
    pub fn available_sites(&self) -> Vec<String> {
        let mut sites: Vec<String> = self
            .resource_availabilities
            .iter()
            .flatten()
            .filter(|(_, entries)| {
                entries
                    .first()
                    .map(|e| AvailabilityFlag::from(e.availability) == AvailabilityFlag::Available)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        sites.sort();
        sites
    }

    /// Linked child maps whose coarse flag allows availability, sorted by id
    pub fn child_maps_to_visit(&self) -> Vec<String> {
        let mut maps: Vec<String> = self
            .map_link_availabilities
            .iter()
            .flatten()
            .filter(|(id, flags)| {
                let flag = match flags.first() {
                    Some(&value) => AvailabilityFlag::from(value),
                    None => AvailabilityFlag::Unknown(-1),
                };
                if let AvailabilityFlag::Unknown(value) = flag {
                    warn!("Unexpected availability flag {} for map {}, descending", value, id);
                }
                flag.may_have_availability()
            })
            .map(|(id, _)| id.clone())
            .collect();
        maps.sort();
        maps
    }
}

/// Localized strings; which fields are filled depends on the resource type
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedValue {
    #[serde(default)]
    pub culture_name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
}

/// English entry if present, else the first one
fn english(values: &[LocalizedValue]) -> Option<&LocalizedValue> {
    values
        .iter()
        .find(|v| v.culture_name.to_ascii_lowercase().starts_with("en"))
        .or_else(|| values.first())
}

/// Response of the map metadata endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDetails {
    #[serde(deserialize_with = "de_id")]
    pub map_id: String,
    #[serde(default, deserialize_with = "de_ids")]
    pub parent_maps: Vec<String>,
    #[serde(default)]
    pub localized_values: Vec<LocalizedValue>,
}

impl MapDetails {
    /// Display title, empty when none is provided
    pub fn title(&self) -> String {
        english(&self.localized_values)
            .and_then(|v| v.title.clone().or_else(|| v.name.clone()))
            .unwrap_or_default()
    }
}

/// Response of the resource metadata endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDetails {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub resource_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub resource_location_id: Option<String>,
    #[serde(default)]
    pub localized_values: Vec<LocalizedValue>,
}

impl ResourceDetails {
    /// Display name, empty when none is provided
    pub fn name(&self) -> String {
        english(&self.localized_values)
            .and_then(|v| v.name.clone().or_else(|| v.title.clone()))
            .unwrap_or_default()
    }
}

/// Entry of the resource-location catalog
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLocation {
    #[serde(deserialize_with = "de_id")]
    pub resource_location_id: String,
    #[serde(default)]
    pub localized_values: Vec<LocalizedValue>,
}

impl ResourceLocation {
    /// Whether the English full or short name contains `needle` (case-insensitive)
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        english(&self.localized_values)
            .map(|v| {
                [&v.full_name, &v.short_name]
                    .iter()
                    .filter_map(|n| n.as_deref())
                    .any(|n| n.to_lowercase().contains(&needle))
            })
            .unwrap_or(false)
    }
}

impl ReservationApi {
    /// Create a client for `profile`'s origin
    pub fn new(client: Arc<GuardedClient>, profile: PlatformProfile) -> Result<Self, ScanError> {
        let origin = profile.parsed_origin()?;
        let base = Url::parse(&origin.root_url())
            .map_err(|e| ScanError::ConfigError(format!("bad origin {}: {}", origin, e)))?;

        Ok(Self {
            client,
            profile,
            origin,
            base,
        })
    }

    /// Origin served by this client
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url<'a>(
        &self,
        path: &str,
        params: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<String, ScanError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| ScanError::ConfigError(format!("bad endpoint path {}: {}", path, e)))?;

        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url.into())
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T, ScanError> {
        debug!("Fetching {}", url);

        let response = self.client.get(url).await?;

        if !response.is_success() {
            return Err(ScanError::ApiError(format!(
                "HTTP {} from {}",
                response.status, url
            )));
        }

        Ok(response.json()?)
    }

    /// URL of the availability query for `map_id`.
    ///
    /// Order: `mapId`, profile search params overridden by `overrides`, then dates.
    pub fn availability_url(
        &self,
        map_id: &str,
        range: &DateRange,
        overrides: &BTreeMap<String, String>,
    ) -> Result<String, ScanError> {
        let mut merged = self.profile.search_params.clone();
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let start = range.start.to_string();
        let end = range.end.to_string();

        let params = std::iter::once(("mapId", map_id))
            .chain(merged.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .chain([("startDate", start.as_str()), ("endDate", end.as_str())]);

        self.url(&self.profile.endpoints.availability, params)
    }

    /// Availability of the sites and linked maps of `map_id`
    pub async fn map_availability(
        &self,
        map_id: &str,
        range: &DateRange,
        overrides: &BTreeMap<String, String>,
    ) -> Result<MapAvailability, ScanError> {
        let url = self.availability_url(map_id, range, overrides)?;
        self.fetch(&url).await
    }

    /// Metadata of `map_id`
    pub async fn map_details(&self, map_id: &str) -> Result<MapDetails, ScanError> {
        let url = self.url(&self.profile.endpoints.map_details, [("mapId", map_id)])?;
        self.fetch(&url).await
    }

    /// Metadata of site `site_id`
    pub async fn resource_details(&self, site_id: &str) -> Result<ResourceDetails, ScanError> {
        let url = self.url(
            &self.profile.endpoints.resource_details,
            [("resourceId", site_id)],
        )?;
        self.fetch(&url).await
    }

    /// Full resource-location catalog
    pub async fn resource_locations(&self) -> Result<Vec<ResourceLocation>, ScanError> {
        let url = self.url(&self.profile.endpoints.resource_locations, NO_PARAMS)?;
        self.fetch(&url).await
    }

    /// Deep link into the booking flow for a map hit
    pub fn booking_url(
        &self,
        map_id: &str,
        resource_location_id: &str,
        range: &DateRange,
    ) -> Result<String, ScanError> {
        let start = range.start.to_string();
        let end = range.end.to_string();

        let params = [("mapId", map_id), ("resourceLocationId", resource_location_id)]
            .into_iter()
            .chain(
                self.profile
                    .booking_params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            )
            .chain([("startDate", start.as_str()), ("endDate", end.as_str())]);

        self.url(&self.profile.endpoints.booking, params)
    }

    /// Link to the booking management page
    pub fn manage_bookings_url(&self) -> Result<String, ScanError> {
        self.url(&self.profile.endpoints.manage_bookings, NO_PARAMS)
    }
}
