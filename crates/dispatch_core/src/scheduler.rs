//! Matching scheduler: drives every SEARCHING session toward FOUND or
//! TIMEOUT.
//!
//! Three kinds of task cooperate, all keyed off the registry's status as
//! the single source of truth:
//!
//! - one tick task per session, spawned at `start_search`, attempting
//!   immediately and then at the priority-derived interval;
//! - one reactive listener on the location store's signal stream, which
//!   re-evaluates any SEARCHING session whose circle covers a driver that
//!   just came online;
//! - one sweep task that forces TIMEOUT on overdue sessions whose own
//!   ticking was delayed, and purges finished sessions past their grace
//!   windows.
//!
//! A per-session in-flight flag keeps a reactive trigger and a timer tick
//! from running two concurrent attempts for the same session.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MatchingConfig;
use crate::error::SearchResult;
use crate::events::{EventNotifier, SessionEvent, SessionEventKind};
use crate::geo;
use crate::location::{DriverLocationStore, LocationSignal, NearbyDriver, NearbyFilters};
use crate::matching;
use crate::registry::{FoundOutcome, SessionRegistry};
use crate::session::{
    ConfirmationResult, DriverId, MatchedDriver, SearchCriteria, SearchId, SearchSession, UserId,
};

pub struct MatchingScheduler {
    registry: Arc<SessionRegistry>,
    store: Arc<DriverLocationStore>,
    notifier: Arc<dyn EventNotifier>,
    config: MatchingConfig,
    shutdown: CancellationToken,
}

impl MatchingScheduler {
    /// Build the scheduler and spawn its background tasks (reactive
    /// listener and expiry sweep). Must run inside a tokio runtime.
    pub fn start(
        registry: Arc<SessionRegistry>,
        store: Arc<DriverLocationStore>,
        notifier: Arc<dyn EventNotifier>,
        config: MatchingConfig,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            registry,
            store,
            notifier,
            config,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&scheduler).run_reactive());
        tokio::spawn(Arc::clone(&scheduler).run_sweep());
        scheduler
    }

    /// Begin a search for a user. Validates the criteria, admits the
    /// session, and spawns its tick task; the first attempt fires
    /// immediately.
    pub fn start_search(
        self: &Arc<Self>,
        user_id: UserId,
        criteria: SearchCriteria,
    ) -> SearchResult<SearchSession> {
        criteria.validate()?;
        let handle = self.registry.admit(user_id, criteria)?;
        let session = handle.session.clone();
        info!(
            search_id = %session.search_id,
            %user_id,
            priority = ?session.criteria.priority,
            interval = ?session.search_interval,
            "search started"
        );
        tokio::spawn(Arc::clone(self).run_session(handle.session, handle.cancel));
        Ok(session)
    }

    /// Cancel an active search. No further tick can begin once this
    /// returns; the cancellation event is emitted before returning.
    pub async fn cancel_search(
        &self,
        search_id: SearchId,
        user_id: UserId,
    ) -> SearchResult<SearchSession> {
        let session = self.registry.cancel(search_id, user_id)?;
        self.emit(SessionEvent::new(
            user_id,
            search_id,
            SessionEventKind::SearchCancelled,
        ))
        .await;
        Ok(session)
    }

    /// Read-only status poll; the guaranteed fallback when event delivery
    /// fails.
    pub fn get_search_status(
        &self,
        search_id: SearchId,
        user_id: UserId,
    ) -> SearchResult<SearchSession> {
        self.registry.status(search_id, user_id)
    }

    /// Confirm the matched driver and complete the session.
    pub fn confirm_match(
        &self,
        search_id: SearchId,
        user_id: UserId,
        driver_id: DriverId,
    ) -> SearchResult<ConfirmationResult> {
        let session = self.registry.confirm(search_id, user_id, driver_id)?;
        let driver = session
            .matched_driver
            .ok_or(crate::error::SearchError::NoDriverAvailable(search_id))?;
        info!(%search_id, %driver_id, "match confirmed");
        Ok(ConfirmationResult {
            search_id,
            user_id,
            driver,
            confirmed_at: Utc::now(),
        })
    }

    /// Stop all background and per-session tasks. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.shutdown();
    }

    /// Per-session tick loop. Torn down by the session's token on any
    /// terminal transition, or by scheduler shutdown.
    async fn run_session(self: Arc<Self>, session: SearchSession, cancel: CancellationToken) {
        let search_id = session.search_id;
        let interval = session.search_interval;
        loop {
            if cancel.is_cancelled() || self.shutdown.is_cancelled() {
                return;
            }
            self.attempt(search_id).await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.shutdown.cancelled() => return,
                _ = sleep(interval) => {}
            }
        }
    }

    /// One match attempt. Shared by the tick loop and the reactive
    /// fast-path; the attempt ticket deduplicates the two.
    async fn attempt(&self, search_id: SearchId) {
        let Some(ticket) = self.registry.begin_attempt(search_id) else {
            return;
        };

        if Instant::now() >= ticket.expires_at {
            let user_id = ticket.user_id;
            drop(ticket);
            if let Some(session) = self.registry.force_timeout(search_id) {
                info!(%search_id, attempts = session.attempts, "search timed out");
                self.emit(SessionEvent::new(
                    user_id,
                    search_id,
                    SessionEventKind::SearchTimeout,
                ))
                .await;
            }
            return;
        }

        self.registry.record_attempt(search_id);
        let criteria = ticket.criteria.clone();
        let filters = NearbyFilters {
            tier_id: criteria.tier_id,
            vehicle_type_id: criteria.vehicle_type_id,
        };

        let candidates = match self
            .store
            .find_nearby(
                criteria.origin_lat,
                criteria.origin_lng,
                criteria.radius_km,
                filters,
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                // Recovered locally: the session stays SEARCHING and the
                // next tick retries.
                warn!(%search_id, error = %err, "match attempt failed");
                return;
            }
        };

        let Some((best, score)) = matching::choose_best(&candidates, criteria.radius_km) else {
            debug!(%search_id, "no compatible driver nearby");
            return;
        };

        let matched = self.matched_driver_snapshot(&criteria, best, score);
        let user_id = ticket.user_id;
        let outcome = self.registry.complete_found(search_id, matched);
        drop(ticket);

        match outcome {
            FoundOutcome::Found(session) => {
                // FOUND always carries the driver; set in the same transition.
                let Some(driver) = session.matched_driver.clone() else {
                    return;
                };
                info!(
                    %search_id,
                    driver_id = %driver.driver_id,
                    distance_km = driver.distance_km,
                    attempts = session.attempts,
                    "driver found"
                );
                self.emit(SessionEvent::new(
                    user_id,
                    search_id,
                    SessionEventKind::DriverFound { driver },
                ))
                .await;
            }
            FoundOutcome::Expired(_) => {
                info!(%search_id, "deadline passed mid-attempt; result discarded");
                self.emit(SessionEvent::new(
                    user_id,
                    search_id,
                    SessionEventKind::SearchTimeout,
                ))
                .await;
            }
            FoundOutcome::Stale => {
                debug!(%search_id, "session left SEARCHING mid-attempt; result discarded");
            }
        }
    }

    fn matched_driver_snapshot(
        &self,
        criteria: &SearchCriteria,
        best: &NearbyDriver,
        score: f64,
    ) -> MatchedDriver {
        let resolution = self
            .store
            .zone_resolution(criteria.origin_lat, criteria.origin_lng);
        MatchedDriver {
            driver_id: best.driver_id,
            name: best.profile.name.clone(),
            rating: best.profile.rating,
            vehicle: best.profile.vehicle.clone(),
            lat: best.lat,
            lng: best.lng,
            distance_km: best.distance_km,
            eta_minutes: matching::estimate_eta_minutes(
                best.distance_km,
                self.config.avg_speed_kmh,
            ),
            tier_id: criteria.tier_id,
            pricing_multiplier: resolution.pricing_multiplier,
            match_score: score,
        }
    }

    /// Reactive fast-path: a driver position/presence signal immediately
    /// re-evaluates every SEARCHING session whose own radius covers the
    /// driver, instead of waiting for the next tick.
    async fn run_reactive(self: Arc<Self>) {
        let mut signals = self.store.subscribe();
        loop {
            let signal = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                signal = signals.recv() => signal,
            };
            match signal {
                Ok(LocationSignal::Online { lat, lng, .. }) => {
                    self.react_to_driver_at(lat, lng).await;
                }
                Ok(LocationSignal::Updated(record)) if record.online && record.ride_id.is_none() => {
                    self.react_to_driver_at(record.lat, record.lng).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // Missed signals only delay discovery until the next
                    // tick; safe to continue.
                    warn!(skipped, "location signal stream lagged");
                }
                Err(RecvError::Closed) => return,
            }
        }
    }

    async fn react_to_driver_at(&self, lat: f64, lng: f64) {
        // Snapshot under the session lock, release, then do distance math
        // and attempts without it.
        let probes = self.registry.snapshot_searching();
        for probe in probes {
            let distance =
                geo::distance_km(probe.origin_lat, probe.origin_lng, lat, lng);
            if distance <= probe.radius_km {
                debug!(
                    search_id = %probe.search_id,
                    distance_km = distance,
                    "driver signal inside search circle; attempting now"
                );
                self.attempt(probe.search_id).await;
            }
        }
    }

    /// Expiry sweep: forces TIMEOUT on sessions whose own tick was delayed
    /// or skipped, and purges finished sessions past their grace windows.
    /// A failed emit is retried implicitly by never blocking the sweep.
    async fn run_sweep(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let report = self.registry.sweep(Instant::now());
            for session in report.timed_out {
                info!(search_id = %session.search_id, "sweep timed out overdue search");
                self.emit(SessionEvent::new(
                    session.user_id,
                    session.search_id,
                    SessionEventKind::SearchTimeout,
                ))
                .await;
            }
            for session in report.expired_found {
                info!(
                    search_id = %session.search_id,
                    "unconfirmed match expired; session purged"
                );
                self.emit(SessionEvent::new(
                    session.user_id,
                    session.search_id,
                    SessionEventKind::SearchExpired,
                ))
                .await;
            }
        }
    }

    /// Best-effort delivery; the transition already happened and a status
    /// poll remains the fallback.
    async fn emit(&self, event: SessionEvent) {
        let bounded = tokio::time::timeout(
            self.config.provider_timeout,
            self.notifier.notify(event.clone()),
        );
        match bounded.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(
                    search_id = %event.search_id,
                    error = %err,
                    "event delivery failed; caller must poll for status"
                );
            }
            Err(_) => {
                warn!(
                    search_id = %event.search_id,
                    "event delivery timed out; caller must poll for status"
                );
            }
        }
    }
}

impl std::fmt::Debug for MatchingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingScheduler")
            .field("searching", &self.registry.searching_count())
            .finish_non_exhaustive()
    }
}
