//! Boundary traits for the persistence collaborator.
//!
//! Driver records, the tier↔vehicle allow-list, and the city/zone tables
//! live outside this core. Every call through these traits is bounded by
//! the configured provider timeout; a slow collaborator degrades a single
//! match attempt, never the session table.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::session::DriverId;
use crate::zones::{City, ServiceZone};

/// Vehicle summary as the directory stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleDescriptor {
    pub vehicle_type_id: u64,
    pub make: String,
    pub model: String,
    pub plate: String,
}

/// Driver profile snapshot used for compatibility checks and candidate
/// ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub driver_id: DriverId,
    pub name: String,
    pub rating: f64,
    pub vehicle: Option<VehicleDescriptor>,
    pub tier_ids: Vec<u64>,
}

/// One permitted (tier, vehicle type) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierVehiclePair {
    pub tier_id: u64,
    pub vehicle_type_id: u64,
}

/// Read access to driver records and the tier↔vehicle allow-list.
#[async_trait]
pub trait DriverDirectory: Send + Sync {
    async fn driver_profile(&self, driver_id: DriverId) -> Result<DriverProfile, ProviderError>;

    async fn tier_vehicle_allow_list(&self) -> Result<Vec<TierVehiclePair>, ProviderError>;
}

/// Read access to the city and service-zone tables.
#[async_trait]
pub trait ZoneDataSource: Send + Sync {
    async fn cities(&self) -> Result<Vec<City>, ProviderError>;

    async fn service_zones(&self) -> Result<Vec<ServiceZone>, ProviderError>;
}

/// Bound a collaborator call; elapsed deadlines become
/// [`ProviderError::Timeout`].
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}
