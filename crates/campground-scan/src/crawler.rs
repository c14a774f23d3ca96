use std::collections::{BTreeMap, HashSet};

use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

use crate::reservation_api::{AvailabilityFlag, ReservationApi};
use crate::scan_types::{DateRange, ScanError, SiteHit};

/// Result of crawling one map tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlOutcome {
    /// Available sites, in discovery order
    pub hits: Vec<SiteHit>,
    /// Maps whose availability was queried, in visit order
    pub visited_maps: Vec<String>,
}

struct CrawlState {
    visited: HashSet<String>,
    outcome: CrawlOutcome,
}

/// Walk the map tree under `root_map_id` and collect every available site.
///
/// Child maps are only queried when their coarse flag allows availability. A
/// map reached twice is skipped, so a malformed cyclic response terminates.
/// Any failed availability query fails the whole crawl.
pub async fn find_available_sites(
    api: &ReservationApi,
    root_map_id: &str,
    range: &DateRange,
    overrides: &BTreeMap<String, String>,
) -> Result<CrawlOutcome, ScanError> {
    let mut state = CrawlState {
        visited: HashSet::new(),
        outcome: CrawlOutcome::default(),
    };

    crawl(api, root_map_id.to_string(), range, overrides, &mut state).await?;

    debug!(
        "Crawled {} maps from {}, {} available sites",
        state.outcome.visited_maps.len(),
        root_map_id,
        state.outcome.hits.len()
    );
    Ok(state.outcome)
}

fn crawl<'a>(
    api: &'a ReservationApi,
    map_id: String,
    range: &'a DateRange,
    overrides: &'a BTreeMap<String, String>,
    state: &'a mut CrawlState,
) -> BoxFuture<'a, Result<(), ScanError>> {
    async move {
        if !state.visited.insert(map_id.clone()) {
            warn!("Map {} reached twice, skipping", map_id);
            return Ok(());
        }
        state.outcome.visited_maps.push(map_id.clone());

        let availability = api.map_availability(&map_id, range, overrides).await?;

        for site_id in availability.available_sites() {
            state.outcome.hits.push(SiteHit {
                map_id: map_id.clone(),
                site_id,
            });
        }

        for child in availability.child_maps_to_visit() {
            crawl(api, child, range, overrides, state).await?;
        }

        Ok(())
    }
    .boxed()
}

/// Check a single site on a single map, without recursion.
///
/// Fails with [`ScanError::DataFormat`] when the map does not list the site.
pub async fn check_site(
    api: &ReservationApi,
    map_id: &str,
    site_id: &str,
    range: &DateRange,
    overrides: &BTreeMap<String, String>,
) -> Result<Option<SiteHit>, ScanError> {
    let availability = api.map_availability(map_id, range, overrides).await?;

    match availability.site_flag(site_id) {
        Some(AvailabilityFlag::Available) => Ok(Some(SiteHit {
            map_id: map_id.to_string(),
            site_id: site_id.to_string(),
        })),
        Some(flag) => {
            debug!("Site {} on map {} is {:?}", site_id, map_id, flag);
            Ok(None)
        }
        None => Err(ScanError::DataFormat(format!(
            "site {} not listed on map {}",
            site_id, map_id
        ))),
    }
}
