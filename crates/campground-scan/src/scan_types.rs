use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use waf_session::WafError;

/// Kind of search: crawl a whole map tree, or watch one site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    /// Recursive crawl from a root map
    #[default]
    Map,
    /// Single site on a single map
    Site,
}

/// Arrival/departure dates sent to the availability endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// Arrival date
    pub start: NaiveDate,
    /// Departure date
    pub end: NaiveDate,
}

/// One configured search, as read from the searches file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSpec {
    /// Profile key (`canada`, `bc`) or origin URL of a configured profile
    pub base_url: String,

    /// Root map (map search) or the site's map (site search)
    #[serde(deserialize_with = "de_id")]
    pub map_id: String,

    /// Site to watch, required for site searches
    #[serde(default, deserialize_with = "de_opt_id")]
    pub site_id: Option<String>,

    /// Arrival date
    pub start_date: NaiveDate,

    /// Departure date
    pub end_date: NaiveDate,

    /// Human readable label used in notifications
    #[serde(default)]
    pub name: Option<String>,

    /// Search kind, defaults to `map`
    #[serde(rename = "type", default)]
    pub kind: SearchKind,

    /// Availability query parameters overriding the profile's defaults
    #[serde(default, deserialize_with = "de_params")]
    pub params: BTreeMap<String, String>,

    /// Resource-location ids whose sites are never reported
    #[serde(default, deserialize_with = "de_ids")]
    pub exclude_resource_locations: Vec<String>,
}

impl SearchSpec {
    /// Date range of the search
    pub fn date_range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    /// Label for notifications and logs.
    pub fn label(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }

        match (self.kind, &self.site_id) {
            (SearchKind::Site, Some(site_id)) => format!("Site {}", site_id),
            _ => format!(
                "{} ({} - {})",
                self.map_id, self.start_date, self.end_date
            ),
        }
    }
}

/// A site reported available, identified by the map it was found on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SiteHit {
    pub map_id: String,
    pub site_id: String,
}

/// A hit with its display names resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedHit {
    pub hit: SiteHit,
    /// Map name, prefixed with its parent map's name when there is one
    pub map_name: String,
    pub site_name: String,
    pub resource_location_id: Option<String>,
}

impl ResolvedHit {
    /// Map and site names joined with `separator`, skipping empty parts
    pub fn display_name(&self, separator: &str) -> String {
        [self.map_name.as_str(), self.site_name.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Totals for one pass over all searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub searches: usize,
    pub hits: usize,
    pub notified: usize,
    pub failures: usize,
}

/// Custom error type for scan operations
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Request through the WAF session failed
    #[error(transparent)]
    Waf(#[from] WafError),

    /// API answered with a non-success status
    #[error("API error: {0}")]
    ApiError(String),

    /// Response did not have the expected shape
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Search refers to a profile that does not exist
    #[error("Unknown baseUrl key: \"{0}\"")]
    UnknownProfile(String),
}

/// Ids arrive as JSON strings or numbers; both are kept as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

pub(crate) fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    RawId::deserialize(d).map(String::from)
}

pub(crate) fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(d)?.map(String::from))
}

pub(crate) fn de_ids<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<RawId>>::deserialize(d)?
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect())
}

/// Query parameter values may be written as strings, numbers or booleans.
pub(crate) fn de_params<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(d)?.unwrap_or_default();

    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_spec_from_json() {
        let search: SearchSpec = serde_json::from_str(
            r#"{
                "baseUrl": "bc",
                "mapId": -2147483550,
                "startDate": "2025-07-18",
                "endDate": "2025-07-20",
                "name": "Alice Lake",
                "params": { "partySize": 2, "getDailyAvailability": false },
                "excludeResourceLocations": [-2147483645, "-2147483601"]
            }"#,
        )
        .unwrap();

        assert_eq!(search.map_id, "-2147483550");
        assert_eq!(search.kind, SearchKind::Map);
        assert_eq!(search.site_id, None);
        assert_eq!(search.params.get("partySize").unwrap(), "2");
        assert_eq!(search.params.get("getDailyAvailability").unwrap(), "false");
        assert_eq!(
            search.exclude_resource_locations,
            vec!["-2147483645".to_string(), "-2147483601".to_string()]
        );
        assert_eq!(search.label(), "Alice Lake");
    }

    #[test]
    fn test_default_labels() {
        let map: SearchSpec = serde_json::from_str(
            r#"{"baseUrl":"canada","mapId":"-1","startDate":"2025-08-01","endDate":"2025-08-03"}"#,
        )
        .unwrap();
        assert_eq!(map.label(), "-1 (2025-08-01 - 2025-08-03)");

        let site: SearchSpec = serde_json::from_str(
            r#"{"baseUrl":"canada","type":"site","mapId":"-1","siteId":-7,
                "startDate":"2025-08-01","endDate":"2025-08-03"}"#,
        )
        .unwrap();
        assert_eq!(site.kind, SearchKind::Site);
        assert_eq!(site.label(), "Site -7");
    }

    #[test]
    fn test_display_name_skips_missing_parts() {
        let mut resolved = ResolvedHit {
            hit: SiteHit {
                map_id: "1".into(),
                site_id: "2".into(),
            },
            map_name: "Golden Ears - North Beach".into(),
            site_name: "Site 12".into(),
            resource_location_id: None,
        };
        assert_eq!(resolved.display_name(" - "), "Golden Ears - North Beach - Site 12");

        resolved.map_name.clear();
        assert_eq!(resolved.display_name(" - "), "Site 12");
    }
}
