//! Search sessions: the data model and state machine for one in-flight
//! match request.
//!
//! All transitions funnel through the `apply_*` methods so the legality
//! rules live in one place. Callers (registry and scheduler) treat a `false`
//! return as "lost the race, no-op" rather than an error.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::{MatchingConfig, DEFAULT_MAX_WAIT, DEFAULT_RADIUS_KM};
use crate::error::{SearchError, SearchResult};
use crate::geo;
use crate::providers::VehicleDescriptor;

/// Opaque unique id of one search session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchId(Uuid);

impl SearchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SearchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriverId(pub u64);

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Request urgency. Maps to an attempt-frequency multiplier, not a queue
/// position: high priority ticks more often, it does not preempt others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// What the requester is asking for: where, what kind of ride, how long
/// they are willing to wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub tier_id: Option<u64>,
    pub vehicle_type_id: Option<u64>,
    pub radius_km: f64,
    pub max_wait: Duration,
    pub priority: Priority,
}

impl SearchCriteria {
    pub fn new(origin_lat: f64, origin_lng: f64) -> Self {
        Self {
            origin_lat,
            origin_lng,
            tier_id: None,
            vehicle_type_id: None,
            radius_km: DEFAULT_RADIUS_KM,
            max_wait: DEFAULT_MAX_WAIT,
            priority: Priority::Normal,
        }
    }

    pub fn with_tier(mut self, tier_id: u64) -> Self {
        self.tier_id = Some(tier_id);
        self
    }

    pub fn with_vehicle_type(mut self, vehicle_type_id: u64) -> Self {
        self.vehicle_type_id = Some(vehicle_type_id);
        self
    }

    pub fn with_radius_km(mut self, radius_km: f64) -> Self {
        self.radius_km = radius_km;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Synchronous validation; a criteria that fails here never enters the
    /// registry.
    pub fn validate(&self) -> SearchResult<()> {
        geo::validate_coordinates(self.origin_lat, self.origin_lng)?;
        geo::validate_radius_km(self.radius_km)?;
        if self.max_wait.is_zero() || self.max_wait > Duration::from_secs(3600) {
            return Err(SearchError::InvalidWaitTime(self.max_wait));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchStatus {
    Searching,
    Found,
    Timeout,
    Cancelled,
    Completed,
}

impl SearchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchStatus::Timeout | SearchStatus::Cancelled | SearchStatus::Completed
        )
    }
}

/// Snapshot of the winning candidate, taken at match time. Immutable once
/// set on a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedDriver {
    pub driver_id: DriverId,
    pub name: String,
    pub rating: f64,
    pub vehicle: Option<VehicleDescriptor>,
    pub lat: f64,
    pub lng: f64,
    pub distance_km: f64,
    pub eta_minutes: f64,
    pub tier_id: Option<u64>,
    /// Combined city × zone multiplier at the search origin.
    pub pricing_multiplier: f64,
    /// Higher is better. Ties are broken by shorter distance upstream.
    pub match_score: f64,
}

/// Returned by a successful match confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationResult {
    pub search_id: SearchId,
    pub user_id: UserId,
    pub driver: MatchedDriver,
    pub confirmed_at: DateTime<Utc>,
}

/// One in-flight match request. Owned by the registry; mutated only through
/// the `apply_*` transitions below.
#[derive(Debug, Clone)]
pub struct SearchSession {
    pub search_id: SearchId,
    pub user_id: UserId,
    pub criteria: SearchCriteria,
    pub status: SearchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_search_at: Option<DateTime<Utc>>,
    /// Monotonic count of actual match attempts (not admission).
    pub attempts: u32,
    /// Derived once from priority at creation; fixed for the session.
    pub search_interval: Duration,
    pub matched_driver: Option<MatchedDriver>,
    /// Hard deadline; no FOUND transition may land past it.
    pub expires_at: Instant,
    pub found_at: Option<Instant>,
    pub timed_out_at: Option<Instant>,
}

impl SearchSession {
    pub fn new(user_id: UserId, criteria: SearchCriteria, config: &MatchingConfig) -> Self {
        let now = Utc::now();
        Self {
            search_id: SearchId::new(),
            user_id,
            status: SearchStatus::Searching,
            created_at: now,
            updated_at: now,
            last_search_at: None,
            attempts: 0,
            search_interval: config.interval_for(criteria.priority),
            matched_driver: None,
            expires_at: Instant::now() + criteria.max_wait,
            found_at: None,
            timed_out_at: None,
            criteria,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before the deadline; zero once expired or terminal.
    pub fn remaining_wait(&self) -> Duration {
        if self.status != SearchStatus::Searching {
            return Duration::ZERO;
        }
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
        let now = Utc::now();
        self.last_search_at = Some(now);
        self.updated_at = now;
    }

    /// SEARCHING → FOUND. Refused once the deadline has passed or the
    /// session left SEARCHING; `matched_driver` is set exactly here.
    pub(crate) fn apply_found(&mut self, driver: MatchedDriver, now: Instant) -> bool {
        if self.status != SearchStatus::Searching || self.is_expired(now) {
            return false;
        }
        self.status = SearchStatus::Found;
        self.matched_driver = Some(driver);
        self.found_at = Some(now);
        self.updated_at = Utc::now();
        true
    }

    /// SEARCHING → TIMEOUT.
    pub(crate) fn apply_timeout(&mut self, now: Instant) -> bool {
        if self.status != SearchStatus::Searching {
            return false;
        }
        self.status = SearchStatus::Timeout;
        self.timed_out_at = Some(now);
        self.updated_at = Utc::now();
        true
    }

    /// SEARCHING → CANCELLED.
    pub(crate) fn apply_cancelled(&mut self) -> bool {
        if self.status != SearchStatus::Searching {
            return false;
        }
        self.status = SearchStatus::Cancelled;
        self.updated_at = Utc::now();
        true
    }

    /// FOUND → COMPLETED.
    pub(crate) fn apply_completed(&mut self) -> bool {
        if self.status != SearchStatus::Found {
            return false;
        }
        self.status = SearchStatus::Completed;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_driver() -> MatchedDriver {
        MatchedDriver {
            driver_id: DriverId(7),
            name: "Test Driver".to_string(),
            rating: 4.8,
            vehicle: None,
            lat: 4.61,
            lng: -74.08,
            distance_km: 0.3,
            eta_minutes: 1.0,
            tier_id: None,
            pricing_multiplier: 1.0,
            match_score: 90.0,
        }
    }

    fn searching_session() -> SearchSession {
        SearchSession::new(
            UserId(1),
            SearchCriteria::new(4.6097, -74.0817),
            &MatchingConfig::default(),
        )
    }

    #[test]
    fn interval_is_derived_from_priority() {
        let config = MatchingConfig::default();
        let high = SearchSession::new(
            UserId(1),
            SearchCriteria::new(4.6, -74.1).with_priority(Priority::High),
            &config,
        );
        let low = SearchSession::new(
            UserId(2),
            SearchCriteria::new(4.6, -74.1).with_priority(Priority::Low),
            &config,
        );
        assert!(high.search_interval < low.search_interval);
    }

    #[test]
    fn found_sets_matched_driver_once() {
        let mut session = searching_session();
        assert!(session.apply_found(test_driver(), Instant::now()));
        assert_eq!(session.status, SearchStatus::Found);
        let matched = session.matched_driver.clone().expect("matched driver");
        assert_eq!(matched.driver_id, DriverId(7));

        // A second FOUND must not land.
        let mut other = test_driver();
        other.driver_id = DriverId(8);
        assert!(!session.apply_found(other, Instant::now()));
        assert_eq!(
            session.matched_driver.expect("still first driver").driver_id,
            DriverId(7)
        );
    }

    #[test]
    fn found_is_refused_past_the_deadline() {
        let mut session = searching_session();
        let past_deadline = session.expires_at + Duration::from_secs(1);
        assert!(!session.apply_found(test_driver(), past_deadline));
        assert_eq!(session.status, SearchStatus::Searching);
        assert!(session.apply_timeout(past_deadline));
        assert_eq!(session.status, SearchStatus::Timeout);
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut session = searching_session();
        assert!(session.apply_cancelled());
        assert!(!session.apply_timeout(Instant::now()));
        assert!(!session.apply_found(test_driver(), Instant::now()));
        assert!(!session.apply_completed());
        assert_eq!(session.status, SearchStatus::Cancelled);
    }

    #[test]
    fn completed_requires_found() {
        let mut session = searching_session();
        assert!(!session.apply_completed());
        assert!(session.apply_found(test_driver(), Instant::now()));
        assert!(session.apply_completed());
        assert_eq!(session.status, SearchStatus::Completed);
    }

    #[test]
    fn criteria_validation_rejects_bad_input() {
        assert!(SearchCriteria::new(4.6, -74.1).validate().is_ok());
        assert!(SearchCriteria::new(95.0, -74.1).validate().is_err());
        assert!(SearchCriteria::new(4.6, -74.1)
            .with_radius_km(-2.0)
            .validate()
            .is_err());
        assert!(SearchCriteria::new(4.6, -74.1)
            .with_max_wait(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn remaining_wait_is_zero_for_terminal_sessions() {
        let mut session = searching_session();
        assert!(session.remaining_wait() > Duration::ZERO);
        session.apply_cancelled();
        assert_eq!(session.remaining_wait(), Duration::ZERO);
    }
}
