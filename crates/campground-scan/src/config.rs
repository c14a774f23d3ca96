use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;
use waf_session::Origin;

use crate::scan_types::{ScanError, SearchSpec, de_params};

/// Paths of the platform endpoints, relative to the origin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoints {
    /// Per-map availability (`mapId`, dates and profile search params)
    pub availability: String,
    /// Map metadata (`mapId`): localized title and parent maps
    pub map_details: String,
    /// Resource metadata (`resourceId`): localized name and resource location
    pub resource_details: String,
    /// Catalog of resource locations
    pub resource_locations: String,
    /// Booking results page used for deep links
    pub booking: String,
    /// Booking management page linked from site alerts
    pub manage_bookings: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            availability: "api/availability/map".to_string(),
            map_details: "api/maps/mapdatabyid".to_string(),
            resource_details: "api/resource/details".to_string(),
            resource_locations: "api/resourceLocation".to_string(),
            booking: "create-booking/results".to_string(),
            manage_bookings: "account/all-bookings".to_string(),
        }
    }
}

/// Query conventions of one reservation origin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformProfile {
    /// Key searches use in `baseUrl`
    pub key: String,

    /// Site root, e.g. `https://camping.bcparks.ca/`
    pub origin: String,

    /// Parameters sent with every availability query
    #[serde(default, deserialize_with = "de_params")]
    pub search_params: BTreeMap<String, String>,

    /// Parameters added to booking deep links
    #[serde(default, deserialize_with = "de_params")]
    pub booking_params: BTreeMap<String, String>,

    #[serde(default)]
    pub endpoints: Endpoints,
}

const CANADA_FILTER_DATA: &str = r#"[{"attributeDefinitionId":-32582,"attributeType":0,"enumValues":[1],"attributeDefinitionDecimalValue":0,"filterStrategy":1},{"attributeDefinitionId":-32756,"attributeType":0,"enumValues":[1],"attributeDefinitionDecimalValue":0,"filterStrategy":1}]"#;
const BC_FILTER_DATA: &str =
    r#"[{"-32767":"[[1,2,3,4],0,1,0]","-32764":"[[-1],0,1,0]","-32722":"[[-1],0,1,0]"}]"#;

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl PlatformProfile {
    /// Parks Canada reservation service
    pub fn canada() -> Self {
        Self {
            key: "canada".to_string(),
            origin: "https://reservation.pc.gc.ca/".to_string(),
            search_params: params(&[
                ("partySize", "5"),
                ("numEquipment", "1"),
                ("equipmentCategoryId", "-32768"),
                ("getDailyAvailability", "false"),
                ("subEquipmentCategoryId", "-32760"),
                ("filterData", CANADA_FILTER_DATA),
            ]),
            booking_params: params(&[
                ("partySize", "5"),
                ("numEquipment", "1"),
                ("bookingCategoryId", "0"),
                ("equipmentId", "-32768"),
                ("isReserving", "true"),
                ("flexibleSearch", "[false,false,null,1]"),
                ("subEquipmentId", "-32760"),
            ]),
            endpoints: Endpoints::default(),
        }
    }

    /// BC Parks reservation service
    pub fn bc() -> Self {
        Self {
            key: "bc".to_string(),
            origin: "https://camping.bcparks.ca/".to_string(),
            search_params: params(&[
                ("partySize", "5"),
                ("numEquipment", "1"),
                ("equipmentCategoryId", "-32768"),
                ("getDailyAvailability", "false"),
                ("subEquipmentCategoryId", "-32763"),
                ("filterData", BC_FILTER_DATA),
            ]),
            booking_params: params(&[
                ("partySize", "5"),
                ("numEquipment", "1"),
                ("bookingCategoryId", "0"),
                ("equipmentId", "-32768"),
                ("equipmentCategoryId", "-32768"),
                ("isReserving", "true"),
                ("flexibleSearch", "[false,false,null,1]"),
                ("subEquipmentId", "-32763"),
                ("subEquipmentCategoryId", "-32763"),
            ]),
            endpoints: Endpoints::default(),
        }
    }

    /// Parsed origin of the profile
    pub fn parsed_origin(&self) -> Result<Origin, ScanError> {
        Origin::from_url(&self.origin).map_err(|e| {
            ScanError::ConfigError(format!("profile {} has a bad origin: {}", self.key, e))
        })
    }
}

/// The set of known profiles, looked up by key or origin.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<PlatformProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self {
            profiles: vec![PlatformProfile::canada(), PlatformProfile::bc()],
        }
    }
}

impl ProfileRegistry {
    /// Built-in profiles with `overrides` replacing same-key entries or added.
    pub fn with_overrides(overrides: Vec<PlatformProfile>) -> Self {
        let mut registry = Self::default();
        for profile in overrides {
            match registry.profiles.iter_mut().find(|p| p.key == profile.key) {
                Some(existing) => *existing = profile,
                None => registry.profiles.push(profile),
            }
        }
        registry
    }

    /// All profiles
    pub fn profiles(&self) -> &[PlatformProfile] {
        &self.profiles
    }

    /// Resolve a search's `baseUrl`: a profile key, or the origin of a profile.
    pub fn resolve(&self, base_url: &str) -> Result<&PlatformProfile, ScanError> {
        if let Some(profile) = self.profiles.iter().find(|p| p.key == base_url) {
            return Ok(profile);
        }

        if let Ok(origin) = Origin::from_url(base_url) {
            if let Some(profile) = self
                .profiles
                .iter()
                .find(|p| p.parsed_origin().map(|o| o == origin).unwrap_or(false))
            {
                return Ok(profile);
            }
        }

        Err(ScanError::UnknownProfile(base_url.to_string()))
    }
}

/// Read the searches file: a JSON array of search records.
pub fn load_searches(path: &Path) -> Result<Vec<SearchSpec>, ScanError> {
    let content = fs::read_to_string(path).map_err(|e| {
        ScanError::ConfigError(format!("cannot read searches file {:?}: {}", path, e))
    })?;

    let searches: Vec<SearchSpec> = serde_json::from_str(&content).map_err(|e| {
        ScanError::ConfigError(format!("invalid searches file {:?}: {}", path, e))
    })?;

    info!("Loaded {} searches from {:?}", searches.len(), path);
    Ok(searches)
}

/// Read a profiles file: a JSON array of platform profiles.
pub fn load_profiles(path: &Path) -> Result<Vec<PlatformProfile>, ScanError> {
    let content = fs::read_to_string(path).map_err(|e| {
        ScanError::ConfigError(format!("cannot read profiles file {:?}: {}", path, e))
    })?;

    let profiles: Vec<PlatformProfile> = serde_json::from_str(&content).map_err(|e| {
        ScanError::ConfigError(format!("invalid profiles file {:?}: {}", path, e))
    })?;

    for profile in &profiles {
        profile.parsed_origin()?;
    }

    info!("Loaded {} platform profiles from {:?}", profiles.len(), path);
    Ok(profiles)
}
