//! Driver location store: last known positions, presence, and the
//! nearest-neighbor query behind every match attempt.
//!
//! One `RwLock` guards the record table and the cell index together; it is
//! never held across an await. Directory lookups for compatibility happen
//! after the in-radius shortlist has been copied out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::{MatchingConfig, UnassignedVehiclePolicy};
use crate::error::{ProviderError, SearchResult};
use crate::geo;
use crate::providers::{self, DriverDirectory, DriverProfile, TierVehiclePair};
use crate::session::DriverId;
use crate::spatial::DriverCellIndex;
use crate::zones::{ZoneResolution, ZoneResolver};

/// Optional extras a driver client may attach to a position report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriverLocationUpdate {
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    /// Set while the driver is serving a trip; such drivers are skipped by
    /// nearby queries.
    pub ride_id: Option<u64>,
}

/// Last known position of one driver. Superseded on every update; no
/// history is kept here.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverLocationRecord {
    pub driver_id: DriverId,
    pub lat: f64,
    pub lng: f64,
    pub recorded_at: DateTime<Utc>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub ride_id: Option<u64>,
    pub online: bool,
}

/// Published on every store mutation; the scheduler's reactive fast-path
/// and trip tracking subscribe to this.
#[derive(Debug, Clone)]
pub enum LocationSignal {
    Updated(DriverLocationRecord),
    Online {
        driver_id: DriverId,
        lat: f64,
        lng: f64,
    },
    Offline {
        driver_id: DriverId,
    },
}

/// Compatibility filters for a nearby-driver query.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NearbyFilters {
    pub tier_id: Option<u64>,
    pub vehicle_type_id: Option<u64>,
}

/// One in-radius, compatible candidate with its exact distance.
#[derive(Debug, Clone)]
pub struct NearbyDriver {
    pub driver_id: DriverId,
    pub lat: f64,
    pub lng: f64,
    pub distance_km: f64,
    pub profile: DriverProfile,
}

#[derive(Default)]
struct LocationTable {
    records: HashMap<DriverId, DriverLocationRecord>,
    index: DriverCellIndex,
}

pub struct DriverLocationStore {
    table: RwLock<LocationTable>,
    signals: broadcast::Sender<LocationSignal>,
    zones: Arc<ZoneResolver>,
    directory: Arc<dyn DriverDirectory>,
    config: MatchingConfig,
}

impl DriverLocationStore {
    pub fn new(
        zones: Arc<ZoneResolver>,
        directory: Arc<dyn DriverDirectory>,
        config: MatchingConfig,
    ) -> Self {
        let (signals, _) = broadcast::channel(256);
        Self {
            table: RwLock::new(LocationTable::default()),
            signals,
            zones,
            directory,
            config,
        }
    }

    /// Subscribe to position and presence signals.
    pub fn subscribe(&self) -> broadcast::Receiver<LocationSignal> {
        self.signals.subscribe()
    }

    pub fn zone_resolution(&self, lat: f64, lng: f64) -> ZoneResolution {
        self.zones.resolve(lat, lng)
    }

    /// Overwrite a driver's position. The in-memory update never fails once
    /// the coordinates validate; publish problems are logged, not
    /// propagated. A driver reporting a position for the first time is
    /// treated as online until told otherwise.
    pub fn update_location(
        &self,
        driver_id: DriverId,
        lat: f64,
        lng: f64,
        update: DriverLocationUpdate,
    ) -> SearchResult<()> {
        geo::validate_coordinates(lat, lng)?;

        let record = {
            let mut table = self.table.write();
            let online = table.records.get(&driver_id).map(|r| r.online).unwrap_or(true);
            let record = DriverLocationRecord {
                driver_id,
                lat,
                lng,
                recorded_at: Utc::now(),
                accuracy: update.accuracy,
                speed: update.speed,
                heading: update.heading,
                ride_id: update.ride_id,
                online,
            };
            table.records.insert(driver_id, record.clone());
            if online {
                table.index.upsert(driver_id, lat, lng);
            }
            record
        };

        self.publish(LocationSignal::Updated(record));
        Ok(())
    }

    /// Presence signal: the driver became available at (lat, lng). Feeds
    /// the scheduler's reactive fast-path.
    pub fn set_online(&self, driver_id: DriverId, lat: f64, lng: f64) -> SearchResult<()> {
        geo::validate_coordinates(lat, lng)?;

        {
            let mut table = self.table.write();
            let record = table
                .records
                .entry(driver_id)
                .or_insert_with(|| DriverLocationRecord {
                    driver_id,
                    lat,
                    lng,
                    recorded_at: Utc::now(),
                    accuracy: None,
                    speed: None,
                    heading: None,
                    ride_id: None,
                    online: true,
                });
            record.lat = lat;
            record.lng = lng;
            record.online = true;
            record.recorded_at = Utc::now();
            table.index.upsert(driver_id, lat, lng);
        }

        self.publish(LocationSignal::Online { driver_id, lat, lng });
        Ok(())
    }

    /// The driver is no longer matchable; their last position is kept for
    /// trip-tracking reads.
    pub fn set_offline(&self, driver_id: DriverId) {
        let known = {
            let mut table = self.table.write();
            table.index.remove(driver_id);
            match table.records.get_mut(&driver_id) {
                Some(record) => {
                    record.online = false;
                    true
                }
                None => false,
            }
        };

        if known {
            self.publish(LocationSignal::Offline { driver_id });
        }
    }

    pub fn record(&self, driver_id: DriverId) -> Option<DriverLocationRecord> {
        self.table.read().records.get(&driver_id).cloned()
    }

    pub fn online_count(&self) -> usize {
        self.table.read().records.values().filter(|r| r.online).count()
    }

    /// Compatible online drivers within `radius_km` of the center, sorted
    /// by ascending distance then descending rating, capped at the
    /// configured candidate limit.
    ///
    /// A center outside the serviceable area yields an empty list, not an
    /// error.
    pub async fn find_nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        filters: NearbyFilters,
    ) -> Result<Vec<NearbyDriver>, ProviderError> {
        let resolution = self.zones.resolve(lat, lng);
        if !resolution.allowed {
            debug!(
                lat,
                lng,
                reason = resolution.reason.as_deref().unwrap_or("unserviceable"),
                "nearby query outside serviceable area"
            );
            return Ok(Vec::new());
        }

        // Copy the in-radius shortlist out before any collaborator I/O.
        let shortlist: Vec<(DriverId, f64, f64, f64)> = {
            let table = self.table.read();
            table
                .index
                .drivers_near(lat, lng, radius_km)
                .into_iter()
                .filter_map(|driver_id| {
                    let record = table.records.get(&driver_id)?;
                    if !record.online || record.ride_id.is_some() {
                        return None;
                    }
                    let distance = geo::distance_km(lat, lng, record.lat, record.lng);
                    (distance <= radius_km).then_some((driver_id, record.lat, record.lng, distance))
                })
                .collect()
        };

        let allow_list = if filters.tier_id.is_some() {
            Some(
                providers::bounded(
                    self.config.provider_timeout,
                    self.directory.tier_vehicle_allow_list(),
                )
                .await?,
            )
        } else {
            None
        };

        let mut candidates = Vec::with_capacity(shortlist.len());
        for (driver_id, driver_lat, driver_lng, distance_km) in shortlist {
            let profile = match providers::bounded(
                self.config.provider_timeout,
                self.directory.driver_profile(driver_id),
            )
            .await
            {
                Ok(profile) => profile,
                Err(ProviderError::NotFound) => {
                    debug!(%driver_id, "driver has a location but no directory record; skipping");
                    continue;
                }
                Err(err) => return Err(err),
            };

            if !self.is_compatible(&profile, filters, allow_list.as_deref()) {
                continue;
            }

            candidates.push(NearbyDriver {
                driver_id,
                lat: driver_lat,
                lng: driver_lng,
                distance_km,
                profile,
            });
        }

        candidates.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.profile
                        .rating
                        .partial_cmp(&a.profile.rating)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        candidates.truncate(self.config.max_candidates);
        Ok(candidates)
    }

    /// Tier/vehicle compatibility. A requested pair must be on the
    /// allow-list. A driver with no assigned vehicle follows the configured
    /// [`UnassignedVehiclePolicy`].
    fn is_compatible(
        &self,
        profile: &DriverProfile,
        filters: NearbyFilters,
        allow_list: Option<&[TierVehiclePair]>,
    ) -> bool {
        if let Some(requested_type) = filters.vehicle_type_id {
            match &profile.vehicle {
                Some(vehicle) if vehicle.vehicle_type_id == requested_type => {}
                _ => return false,
            }
        }

        let Some(tier_id) = filters.tier_id else {
            return true;
        };

        match &profile.vehicle {
            Some(vehicle) => allow_list
                .map(|pairs| {
                    pairs.iter().any(|pair| {
                        pair.tier_id == tier_id
                            && pair.vehicle_type_id == vehicle.vehicle_type_id
                    })
                })
                .unwrap_or(false),
            None => match self.config.unassigned_vehicle_policy {
                // Historical relaxation: only applies when the caller did
                // not pin a vehicle type (handled above).
                UnassignedVehiclePolicy::MatchesAnyTier => true,
                UnassignedVehiclePolicy::RequiresAssignedVehicle => false,
            },
        }
    }

    fn publish(&self, signal: LocationSignal) {
        if let Err(err) = self.signals.send(signal) {
            // No receivers; normal before the scheduler starts.
            debug!(error = %err, "location signal dropped");
        }
    }
}

impl std::fmt::Debug for DriverLocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverLocationStore")
            .field("drivers", &self.table.read().records.len())
            .finish_non_exhaustive()
    }
}
