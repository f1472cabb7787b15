//! Scheduler and store configuration with documented defaults.

use std::time::Duration;

use crate::session::Priority;

/// Base match-attempt interval before the priority weight is applied.
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(10);

/// Hard cap on concurrently SEARCHING sessions.
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 100;

/// Default search radius when the criteria leave it unset (km).
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

/// Default maximum wait before a search times out.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Cadence of the expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How long an unconfirmed FOUND session lingers before it is purged.
pub const DEFAULT_FOUND_GRACE: Duration = Duration::from_secs(300);

/// How long a TIMEOUT session stays visible to status polls before purge.
pub const DEFAULT_TIMEOUT_GRACE: Duration = Duration::from_secs(60);

/// Cap on candidates returned by a nearby-driver query.
pub const DEFAULT_MAX_CANDIDATES: usize = 20;

/// Average city speed used for straight-line pickup ETA estimates (km/h).
pub const DEFAULT_AVG_SPEED_KMH: f64 = 30.0;

/// Bound on any single collaborator call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Zone resolutions are cached this long; boundaries change rarely.
pub const DEFAULT_ZONE_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Capacity of the zone-resolution cache (rounded-coordinate keys).
pub const DEFAULT_ZONE_CACHE_CAPACITY: usize = 10_000;

/// How a driver without an assigned vehicle type is treated when a tier is
/// requested. The relaxed default mirrors the historical behavior: such
/// drivers match any tier as long as no vehicle-type filter was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnassignedVehiclePolicy {
    #[default]
    MatchesAnyTier,
    RequiresAssignedVehicle,
}

/// Frequency multipliers per priority. Higher weight means a shorter
/// attempt interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityWeights {
    pub high: f64,
    pub normal: f64,
    pub low: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            high: 3.0,
            normal: 1.0,
            low: 0.5,
        }
    }
}

impl PriorityWeights {
    pub fn weight_for(&self, priority: Priority) -> f64 {
        match priority {
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }
}

/// All tunables for the matching core in one place.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub base_interval: Duration,
    pub priority_weights: PriorityWeights,
    pub max_concurrent_sessions: usize,
    pub sweep_interval: Duration,
    pub found_grace: Duration,
    pub timeout_grace: Duration,
    pub max_candidates: usize,
    pub avg_speed_kmh: f64,
    pub provider_timeout: Duration,
    pub zone_cache_ttl: Duration,
    pub zone_cache_capacity: usize,
    pub unassigned_vehicle_policy: UnassignedVehiclePolicy,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            base_interval: DEFAULT_BASE_INTERVAL,
            priority_weights: PriorityWeights::default(),
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            found_grace: DEFAULT_FOUND_GRACE,
            timeout_grace: DEFAULT_TIMEOUT_GRACE,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            avg_speed_kmh: DEFAULT_AVG_SPEED_KMH,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            zone_cache_ttl: DEFAULT_ZONE_CACHE_TTL,
            zone_cache_capacity: DEFAULT_ZONE_CACHE_CAPACITY,
            unassigned_vehicle_policy: UnassignedVehiclePolicy::default(),
        }
    }
}

impl MatchingConfig {
    pub fn with_base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    pub fn with_priority_weights(mut self, weights: PriorityWeights) -> Self {
        self.priority_weights = weights;
        self
    }

    pub fn with_max_concurrent_sessions(mut self, cap: usize) -> Self {
        self.max_concurrent_sessions = cap;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_found_grace(mut self, grace: Duration) -> Self {
        self.found_grace = grace;
        self
    }

    pub fn with_timeout_grace(mut self, grace: Duration) -> Self {
        self.timeout_grace = grace;
        self
    }

    pub fn with_max_candidates(mut self, cap: usize) -> Self {
        self.max_candidates = cap;
        self
    }

    pub fn with_avg_speed_kmh(mut self, speed: f64) -> Self {
        self.avg_speed_kmh = speed;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_zone_cache_ttl(mut self, ttl: Duration) -> Self {
        self.zone_cache_ttl = ttl;
        self
    }

    pub fn with_zone_cache_capacity(mut self, capacity: usize) -> Self {
        self.zone_cache_capacity = capacity;
        self
    }

    pub fn with_unassigned_vehicle_policy(mut self, policy: UnassignedVehiclePolicy) -> Self {
        self.unassigned_vehicle_policy = policy;
        self
    }

    /// Attempt interval for a session: `base_interval / weight`.
    pub fn interval_for(&self, priority: Priority) -> Duration {
        let weight = self.priority_weights.weight_for(priority);
        self.base_interval.div_f64(weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_gets_shorter_interval() {
        let config = MatchingConfig::default();
        let high = config.interval_for(Priority::High);
        let normal = config.interval_for(Priority::Normal);
        let low = config.interval_for(Priority::Low);
        assert!(high < normal, "high {high:?} should tick faster than normal {normal:?}");
        assert!(normal < low, "normal {normal:?} should tick faster than low {low:?}");
        assert_eq!(normal, DEFAULT_BASE_INTERVAL);
        assert_eq!(low, DEFAULT_BASE_INTERVAL * 2);
    }

    #[test]
    fn builders_override_their_fields() {
        let config = MatchingConfig::default()
            .with_timeout_grace(Duration::from_secs(7))
            .with_avg_speed_kmh(42.0)
            .with_provider_timeout(Duration::from_secs(2))
            .with_zone_cache_ttl(Duration::from_secs(90))
            .with_zone_cache_capacity(64);
        assert_eq!(config.timeout_grace, Duration::from_secs(7));
        assert_eq!(config.avg_speed_kmh, 42.0);
        assert_eq!(config.provider_timeout, Duration::from_secs(2));
        assert_eq!(config.zone_cache_ttl, Duration::from_secs(90));
        assert_eq!(config.zone_cache_capacity, 64);
    }
}
