//! Shared fixtures for unit and integration tests: canned Bogotá-area
//! geography, in-memory collaborator implementations, and a config with
//! short intervals for paused-time tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::MatchingConfig;
use crate::error::ProviderError;
use crate::events::{EventNotifier, SessionEvent};
use crate::providers::{
    DriverDirectory, DriverProfile, TierVehiclePair, VehicleDescriptor, ZoneDataSource,
};
use crate::session::DriverId;
use crate::zones::{City, Polygon, ServiceZone, ZoneKind, ZoneResolver};

/// Bogotá city center; the canonical test origin.
pub const BOGOTA: (f64, f64) = (4.6097, -74.0817);

/// A point ~0.3 km from [`BOGOTA`].
pub const BOGOTA_NEARBY: (f64, f64) = (4.61, -74.08);

/// Config with intervals short enough for paused-clock tests.
pub fn test_config() -> MatchingConfig {
    MatchingConfig::default()
        .with_base_interval(Duration::from_secs(1))
        .with_sweep_interval(Duration::from_secs(5))
        .with_found_grace(Duration::from_secs(60))
}

pub fn bogota_city() -> City {
    City {
        city_id: 1,
        name: "Bogotá".to_string(),
        center_lat: BOGOTA.0,
        center_lng: BOGOTA.1,
        pricing_multiplier: 1.0,
        restricted_areas: Vec::new(),
    }
}

/// Square roughly 6 km on a side around the Bogotá center.
pub fn bogota_square() -> Polygon {
    Polygon::new(vec![
        (4.58, -74.11),
        (4.58, -74.05),
        (4.64, -74.05),
        (4.64, -74.11),
    ])
    .expect("valid polygon")
}

pub fn restricted_zone_over_bogota() -> ServiceZone {
    ServiceZone {
        zone_id: 99,
        name: "Closed Perimeter".to_string(),
        kind: ZoneKind::Restricted,
        boundary: bogota_square(),
        pricing_multiplier: 1.0,
        demand_multiplier: 1.0,
    }
}

/// Resolver that serves the whole Bogotá area with no restrictions.
pub fn bogota_zone_resolver() -> ZoneResolver {
    ZoneResolver::new().with_tables(vec![bogota_city()], Vec::new())
}

/// In-memory driver directory.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    profiles: HashMap<DriverId, DriverProfile>,
    allow_list: Vec<TierVehiclePair>,
}

impl StaticDirectory {
    pub fn with_driver(
        mut self,
        driver_id: DriverId,
        name: impl Into<String>,
        rating: f64,
        vehicle: Option<VehicleDescriptor>,
    ) -> Self {
        self.profiles.insert(
            driver_id,
            DriverProfile {
                driver_id,
                name: name.into(),
                rating,
                vehicle,
                tier_ids: Vec::new(),
            },
        );
        self
    }

    /// Driver with a vehicle of the given type id.
    pub fn with_vehicle_driver(
        self,
        driver_id: DriverId,
        name: impl Into<String>,
        rating: f64,
        vehicle_type_id: u64,
    ) -> Self {
        self.with_driver(
            driver_id,
            name,
            rating,
            Some(VehicleDescriptor {
                vehicle_type_id,
                make: "Test".to_string(),
                model: "Vehicle".to_string(),
                plate: format!("TST-{}", driver_id),
            }),
        )
    }

    pub fn with_allow_pair(mut self, tier_id: u64, vehicle_type_id: u64) -> Self {
        self.allow_list.push(TierVehiclePair {
            tier_id,
            vehicle_type_id,
        });
        self
    }
}

#[async_trait]
impl DriverDirectory for StaticDirectory {
    async fn driver_profile(&self, driver_id: DriverId) -> Result<DriverProfile, ProviderError> {
        self.profiles
            .get(&driver_id)
            .cloned()
            .ok_or(ProviderError::NotFound)
    }

    async fn tier_vehicle_allow_list(&self) -> Result<Vec<TierVehiclePair>, ProviderError> {
        Ok(self.allow_list.clone())
    }
}

/// In-memory city/zone tables for resolver refresh tests.
#[derive(Debug, Clone, Default)]
pub struct StaticZoneSource {
    pub cities: Vec<City>,
    pub zones: Vec<ServiceZone>,
}

#[async_trait]
impl ZoneDataSource for StaticZoneSource {
    async fn cities(&self) -> Result<Vec<City>, ProviderError> {
        Ok(self.cities.clone())
    }

    async fn service_zones(&self) -> Result<Vec<ServiceZone>, ProviderError> {
        Ok(self.zones.clone())
    }
}

/// Notifier that records every event for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn notify(&self, event: SessionEvent) -> Result<(), ProviderError> {
        self.events.lock().push(event);
        Ok(())
    }
}
