//! Zone resolver: nearest service city, containing service zone, combined
//! pricing multipliers, and the serviceability gate.
//!
//! City lookup is a linear Haversine scan; city tables are small enough
//! that a spatial index would not pay for itself. Results are cached by
//! coordinate rounded to 4 decimal places (~11 m) with a bounded TTL,
//! since zone boundaries change rarely.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{MatchingConfig, DEFAULT_ZONE_CACHE_CAPACITY, DEFAULT_ZONE_CACHE_TTL};
use crate::error::ProviderError;
use crate::geo::{self, BoundingBox};
use crate::providers::ZoneDataSource;

/// Closed polygon over (lat, lng) vertices with a bounding-box pre-filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<(f64, f64)>,
    bbox: BoundingBox,
}

impl Polygon {
    /// Needs at least three vertices; the closing edge is implicit.
    pub fn new(vertices: Vec<(f64, f64)>) -> Option<Self> {
        if vertices.len() < 3 {
            return None;
        }
        let bbox = BoundingBox::from_points(vertices.iter().copied())?;
        Some(Self { vertices, bbox })
    }

    /// Ray-casting point-in-polygon test.
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        if !self.bbox.contains(lat, lng) {
            return false;
        }
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let (lat_i, lng_i) = self.vertices[i];
            let (lat_j, lng_j) = self.vertices[j];
            let crosses = (lng_i > lng) != (lng_j > lng);
            if crosses {
                let intersect_lat = (lat_j - lat_i) * (lng - lng_i) / (lng_j - lng_i) + lat_i;
                if lat < intersect_lat {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Service city with its pricing multiplier and restricted sub-areas.
#[derive(Debug, Clone)]
pub struct City {
    pub city_id: u64,
    pub name: String,
    pub center_lat: f64,
    pub center_lng: f64,
    pub pricing_multiplier: f64,
    pub restricted_areas: Vec<Polygon>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Regular,
    Premium,
    Restricted,
}

/// Named area nested inside a city with its own multipliers.
#[derive(Debug, Clone)]
pub struct ServiceZone {
    pub zone_id: u64,
    pub name: String,
    pub kind: ZoneKind,
    pub boundary: Polygon,
    pub pricing_multiplier: f64,
    pub demand_multiplier: f64,
}

/// Outcome of resolving one coordinate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneResolution {
    pub city_id: Option<u64>,
    pub city_name: Option<String>,
    pub distance_to_city_km: Option<f64>,
    pub zone_id: Option<u64>,
    pub zone_name: Option<String>,
    pub zone_kind: Option<ZoneKind>,
    /// City multiplier × zone multiplier.
    pub pricing_multiplier: f64,
    pub demand_multiplier: f64,
    pub allowed: bool,
    /// Human-readable reason when `allowed` is false.
    pub reason: Option<String>,
}

impl ZoneResolution {
    fn unserviceable(reason: impl Into<String>) -> Self {
        Self {
            city_id: None,
            city_name: None,
            distance_to_city_km: None,
            zone_id: None,
            zone_name: None,
            zone_kind: None,
            pricing_multiplier: 1.0,
            demand_multiplier: 1.0,
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Default)]
struct ZoneTables {
    cities: Vec<City>,
    zones: Vec<ServiceZone>,
}

struct CachedResolution {
    resolved_at: Instant,
    resolution: ZoneResolution,
}

pub struct ZoneResolver {
    tables: RwLock<ZoneTables>,
    cache: Mutex<LruCache<(i64, i64), CachedResolution>>,
    cache_ttl: Duration,
}

impl ZoneResolver {
    pub fn new() -> Self {
        Self::with_cache(DEFAULT_ZONE_CACHE_CAPACITY, DEFAULT_ZONE_CACHE_TTL)
    }

    pub fn with_cache(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            tables: RwLock::new(ZoneTables::default()),
            cache: Mutex::new(LruCache::new(capacity)),
            cache_ttl: ttl,
        }
    }

    /// Resolver with the cache sized per the matching config.
    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::with_cache(config.zone_cache_capacity, config.zone_cache_ttl)
    }

    /// Seed static tables; tests and fixed deployments.
    pub fn with_tables(self, cities: Vec<City>, zones: Vec<ServiceZone>) -> Self {
        *self.tables.write() = ZoneTables { cities, zones };
        self
    }

    /// Reload city and zone tables from the persistence collaborator and
    /// drop cached resolutions.
    pub async fn refresh(&self, source: &dyn ZoneDataSource) -> Result<(), ProviderError> {
        let cities = source.cities().await?;
        let zones = source.service_zones().await?;
        debug!(cities = cities.len(), zones = zones.len(), "zone tables refreshed");
        *self.tables.write() = ZoneTables { cities, zones };
        self.cache.lock().clear();
        Ok(())
    }

    /// Nearest city, containing zone, combined multipliers, and the
    /// serviceability verdict for a coordinate.
    pub fn resolve(&self, lat: f64, lng: f64) -> ZoneResolution {
        let key = cache_key(lat, lng);
        {
            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(&key) {
                if cached.resolved_at.elapsed() < self.cache_ttl {
                    return cached.resolution.clone();
                }
                cache.pop(&key);
            }
        }

        let resolution = self.resolve_uncached(lat, lng);
        self.cache.lock().put(
            key,
            CachedResolution {
                resolved_at: Instant::now(),
                resolution: resolution.clone(),
            },
        );
        resolution
    }

    fn resolve_uncached(&self, lat: f64, lng: f64) -> ZoneResolution {
        let tables = self.tables.read();

        let Some((city, city_distance)) = tables
            .cities
            .iter()
            .map(|city| {
                let d = geo::distance_km(lat, lng, city.center_lat, city.center_lng);
                (city, d)
            })
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        else {
            return ZoneResolution::unserviceable("no service cities configured");
        };

        if city.restricted_areas.iter().any(|area| area.contains(lat, lng)) {
            return ZoneResolution {
                city_id: Some(city.city_id),
                city_name: Some(city.name.clone()),
                distance_to_city_km: Some(city_distance),
                zone_id: None,
                zone_name: None,
                zone_kind: None,
                pricing_multiplier: city.pricing_multiplier,
                demand_multiplier: 1.0,
                allowed: false,
                reason: Some(format!("location is in a restricted area of {}", city.name)),
            };
        }

        let zone = tables.zones.iter().find(|zone| zone.boundary.contains(lat, lng));

        let mut resolution = ZoneResolution {
            city_id: Some(city.city_id),
            city_name: Some(city.name.clone()),
            distance_to_city_km: Some(city_distance),
            zone_id: zone.map(|z| z.zone_id),
            zone_name: zone.map(|z| z.name.clone()),
            zone_kind: zone.map(|z| z.kind),
            pricing_multiplier: city.pricing_multiplier
                * zone.map(|z| z.pricing_multiplier).unwrap_or(1.0),
            demand_multiplier: zone.map(|z| z.demand_multiplier).unwrap_or(1.0),
            allowed: true,
            reason: None,
        };

        if let Some(zone) = zone {
            if zone.kind == ZoneKind::Restricted {
                resolution.allowed = false;
                resolution.reason = Some(format!("zone {} is restricted", zone.name));
            }
        }

        resolution
    }
}

impl Default for ZoneResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Round to 4 decimal places (~11 m) so nearby lookups share a cache slot.
fn cache_key(lat: f64, lng: f64) -> (i64, i64) {
    ((lat * 10_000.0).round() as i64, (lng * 10_000.0).round() as i64)
}
