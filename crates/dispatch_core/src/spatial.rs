//! H3-backed cell index over driver positions.
//!
//! Internal pre-filter for nearest-neighbor queries: drivers are bucketed
//! by resolution-9 cell (~240 m across) and a radius query expands to a
//! grid disk before the exact Haversine check. Not a contract; callers of
//! the location store always get exact-distance filtering on top.

use std::collections::HashMap;

use h3o::{CellIndex, LatLng, Resolution};

use crate::session::DriverId;

/// Approximate center-to-center spacing of resolution-9 cells (km).
const CELL_SPACING_KM: f64 = 0.3;

/// Grid-disk k that comfortably covers `radius_km`, padded by one ring so
/// boundary cells are never missed.
fn k_ring_for_radius(radius_km: f64) -> u32 {
    ((radius_km / CELL_SPACING_KM).ceil() as u32).saturating_add(1)
}

/// Cell → drivers and driver → cell mappings, updated incrementally as
/// drivers report positions.
#[derive(Debug, Default)]
pub struct DriverCellIndex {
    drivers_by_cell: HashMap<CellIndex, Vec<DriverId>>,
    cell_by_driver: HashMap<DriverId, CellIndex>,
}

impl DriverCellIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell_for(lat: f64, lng: f64) -> Option<CellIndex> {
        LatLng::new(lat, lng)
            .ok()
            .map(|coord| coord.to_cell(Resolution::Nine))
    }

    /// Place or move a driver. No-op when the cell is unchanged.
    pub fn upsert(&mut self, driver_id: DriverId, lat: f64, lng: f64) {
        let Some(cell) = Self::cell_for(lat, lng) else {
            return;
        };
        if self.cell_by_driver.get(&driver_id) == Some(&cell) {
            return;
        }
        self.remove(driver_id);
        self.drivers_by_cell.entry(cell).or_default().push(driver_id);
        self.cell_by_driver.insert(driver_id, cell);
    }

    pub fn remove(&mut self, driver_id: DriverId) {
        if let Some(cell) = self.cell_by_driver.remove(&driver_id) {
            if let Some(drivers) = self.drivers_by_cell.get_mut(&cell) {
                drivers.retain(|&d| d != driver_id);
                if drivers.is_empty() {
                    self.drivers_by_cell.remove(&cell);
                }
            }
        }
    }

    /// Candidate drivers whose cell lies within the grid disk covering
    /// `radius_km`. Over-approximates; exact filtering is the caller's job.
    pub fn drivers_near(&self, lat: f64, lng: f64, radius_km: f64) -> Vec<DriverId> {
        let Some(origin) = Self::cell_for(lat, lng) else {
            return Vec::new();
        };
        let disk = origin.grid_disk::<Vec<_>>(k_ring_for_radius(radius_km));
        let mut result = Vec::new();
        for cell in disk {
            if let Some(drivers) = self.drivers_by_cell.get(&cell) {
                result.extend(drivers.iter().copied());
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.cell_by_driver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_by_driver.is_empty()
    }
}
