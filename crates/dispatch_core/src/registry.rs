//! The authoritative in-memory table of active and recently-finished
//! searches.
//!
//! One mutex guards the whole table; every method re-reads the session's
//! current status under that lock before mutating, which is what resolves
//! races between ticks, cancels, and the reactive fast-path. No method
//! holds the lock across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::MatchingConfig;
use crate::error::{SearchError, SearchResult};
use crate::session::{
    DriverId, MatchedDriver, SearchCriteria, SearchId, SearchSession, SearchStatus, UserId,
};

struct SessionEntry {
    session: SearchSession,
    /// Cancelled exactly once on any terminal transition; tears down the
    /// per-session tick task.
    cancel: CancellationToken,
    /// Guards against a reactive trigger and a timer tick running two
    /// match attempts for the same session at once.
    attempt_in_flight: Arc<AtomicBool>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SearchId, SessionEntry>,
    /// One non-terminal session per user.
    by_user: HashMap<UserId, SearchId>,
}

/// Handle for one admitted session, given to the scheduler so it can drive
/// the tick task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session: SearchSession,
    pub cancel: CancellationToken,
}

/// Permission to run one match attempt. Dropping the ticket releases the
/// in-flight flag, so an early return or panic cannot wedge the session.
#[derive(Debug)]
pub struct AttemptTicket {
    pub search_id: SearchId,
    pub user_id: UserId,
    pub criteria: SearchCriteria,
    pub expires_at: Instant,
    flag: Arc<AtomicBool>,
}

impl Drop for AttemptTicket {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Outcome of applying a match attempt's result.
#[derive(Debug)]
pub enum FoundOutcome {
    /// The session transitioned to FOUND.
    Found(SearchSession),
    /// The deadline passed while the attempt was in flight; the result was
    /// discarded and TIMEOUT applied instead.
    Expired(SearchSession),
    /// The session left SEARCHING concurrently (cancel won the race).
    Stale,
}

/// Sessions the sweep transitioned or purged; the scheduler turns these
/// into events.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub timed_out: Vec<SearchSession>,
    pub expired_found: Vec<SearchSession>,
}

/// Minimal per-session data the reactive fast-path needs for its distance
/// check.
#[derive(Debug, Clone, Copy)]
pub struct SearchProbe {
    pub search_id: SearchId,
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub radius_km: f64,
}

pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    config: MatchingConfig,
}

impl SessionRegistry {
    pub fn new(config: MatchingConfig) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            config,
        }
    }

    /// Admit a new search. Enforces the one-active-session-per-user
    /// invariant and the concurrent-session cap before anything is spawned.
    pub fn admit(&self, user_id: UserId, criteria: SearchCriteria) -> SearchResult<SessionHandle> {
        let mut inner = self.inner.lock();

        if inner.by_user.contains_key(&user_id) {
            return Err(SearchError::AlreadySearching(user_id));
        }
        let searching = inner
            .sessions
            .values()
            .filter(|entry| entry.session.status == SearchStatus::Searching)
            .count();
        if searching >= self.config.max_concurrent_sessions {
            return Err(SearchError::CapacityExceeded(
                self.config.max_concurrent_sessions,
            ));
        }

        let session = SearchSession::new(user_id, criteria, &self.config);
        let handle = SessionHandle {
            session: session.clone(),
            cancel: CancellationToken::new(),
        };
        let search_id = session.search_id;
        inner.by_user.insert(user_id, search_id);
        inner.sessions.insert(
            search_id,
            SessionEntry {
                session,
                cancel: handle.cancel.clone(),
                attempt_in_flight: Arc::new(AtomicBool::new(false)),
            },
        );
        debug!(%search_id, %user_id, "search admitted");
        Ok(handle)
    }

    /// Cancel an active search. The token is cancelled under the lock, so
    /// no further tick can begin once this returns; an in-flight tick will
    /// observe the CANCELLED status and discard its result.
    pub fn cancel(&self, search_id: SearchId, user_id: UserId) -> SearchResult<SearchSession> {
        let mut inner = self.inner.lock();
        let entry = inner
            .sessions
            .get_mut(&search_id)
            .ok_or(SearchError::NotFound(search_id))?;
        if entry.session.user_id != user_id {
            return Err(SearchError::Unauthorized(search_id));
        }
        if !entry.session.apply_cancelled() {
            return Err(SearchError::NotActive(search_id));
        }
        entry.cancel.cancel();
        let session = entry.session.clone();
        inner.sessions.remove(&search_id);
        inner.by_user.remove(&user_id);
        debug!(%search_id, "search cancelled");
        Ok(session)
    }

    /// Read-only session snapshot for status polls.
    pub fn status(&self, search_id: SearchId, user_id: UserId) -> SearchResult<SearchSession> {
        let inner = self.inner.lock();
        let entry = inner
            .sessions
            .get(&search_id)
            .ok_or(SearchError::NotFound(search_id))?;
        if entry.session.user_id != user_id {
            return Err(SearchError::Unauthorized(search_id));
        }
        Ok(entry.session.clone())
    }

    /// Confirm the matched driver on a FOUND session. A mismatching driver
    /// id leaves the session untouched.
    pub fn confirm(
        &self,
        search_id: SearchId,
        user_id: UserId,
        driver_id: DriverId,
    ) -> SearchResult<SearchSession> {
        let mut inner = self.inner.lock();
        let entry = inner
            .sessions
            .get_mut(&search_id)
            .ok_or(SearchError::NotFound(search_id))?;
        if entry.session.user_id != user_id {
            return Err(SearchError::Unauthorized(search_id));
        }
        if entry.session.status != SearchStatus::Found {
            return Err(SearchError::NoDriverAvailable(search_id));
        }
        let matched_id = entry
            .session
            .matched_driver
            .as_ref()
            .map(|driver| driver.driver_id)
            .ok_or(SearchError::NoDriverAvailable(search_id))?;
        if matched_id != driver_id {
            return Err(SearchError::DriverMismatch {
                requested: driver_id,
                matched: matched_id,
            });
        }

        entry.session.apply_completed();
        entry.cancel.cancel();
        let session = entry.session.clone();
        inner.sessions.remove(&search_id);
        inner.by_user.remove(&user_id);
        debug!(%search_id, %driver_id, "match confirmed");
        Ok(session)
    }

    /// Claim the right to run one match attempt. Returns `None` when the
    /// session is gone, no longer SEARCHING, or an attempt is already in
    /// flight.
    pub fn begin_attempt(&self, search_id: SearchId) -> Option<AttemptTicket> {
        let inner = self.inner.lock();
        let entry = inner.sessions.get(&search_id)?;
        if entry.session.status != SearchStatus::Searching {
            return None;
        }
        if entry
            .attempt_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        Some(AttemptTicket {
            search_id,
            user_id: entry.session.user_id,
            criteria: entry.session.criteria.clone(),
            expires_at: entry.session.expires_at,
            flag: Arc::clone(&entry.attempt_in_flight),
        })
    }

    /// Count an actual match attempt against the session.
    pub fn record_attempt(&self, search_id: SearchId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.sessions.get_mut(&search_id) {
            if entry.session.status == SearchStatus::Searching {
                entry.session.record_attempt();
            }
        }
    }

    /// Apply a successful attempt. Status is re-read under the lock; the
    /// hard deadline is checked again so a result computed before expiry
    /// cannot land after it.
    pub fn complete_found(&self, search_id: SearchId, driver: MatchedDriver) -> FoundOutcome {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let Some(entry) = inner.sessions.get_mut(&search_id) else {
            return FoundOutcome::Stale;
        };
        if entry.session.status != SearchStatus::Searching {
            return FoundOutcome::Stale;
        }
        if entry.session.is_expired(now) {
            entry.session.apply_timeout(now);
            entry.cancel.cancel();
            let session = entry.session.clone();
            let user_id = session.user_id;
            inner.by_user.remove(&user_id);
            return FoundOutcome::Expired(session);
        }
        entry.session.apply_found(driver, now);
        // FOUND sessions stop ticking but stay registered (and keep their
        // by_user slot) until confirmed or purged by the sweep.
        entry.cancel.cancel();
        FoundOutcome::Found(entry.session.clone())
    }

    /// Force TIMEOUT on a session whose deadline has passed.
    pub fn force_timeout(&self, search_id: SearchId) -> Option<SearchSession> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let entry = inner.sessions.get_mut(&search_id)?;
        if !entry.session.is_expired(now) || !entry.session.apply_timeout(now) {
            return None;
        }
        entry.cancel.cancel();
        let session = entry.session.clone();
        inner.by_user.remove(&session.user_id);
        Some(session)
    }

    /// Expiry sweep: times out overdue SEARCHING sessions and purges
    /// FOUND/TIMEOUT sessions past their grace windows.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut inner = self.inner.lock();
        let mut purge = Vec::new();

        for (search_id, entry) in inner.sessions.iter_mut() {
            match entry.session.status {
                SearchStatus::Searching if entry.session.is_expired(now) => {
                    entry.session.apply_timeout(now);
                    entry.cancel.cancel();
                    report.timed_out.push(entry.session.clone());
                }
                SearchStatus::Found => {
                    let overdue = entry
                        .session
                        .found_at
                        .map(|found_at| now >= found_at + self.config.found_grace)
                        .unwrap_or(false);
                    if overdue {
                        report.expired_found.push(entry.session.clone());
                        purge.push(*search_id);
                    }
                }
                SearchStatus::Timeout => {
                    let overdue = entry
                        .session
                        .timed_out_at
                        .map(|timed_out_at| now >= timed_out_at + self.config.timeout_grace)
                        .unwrap_or(true);
                    if overdue {
                        purge.push(*search_id);
                    }
                }
                _ => {}
            }
        }

        for session in &report.timed_out {
            inner.by_user.remove(&session.user_id);
        }
        for session in &report.expired_found {
            inner.by_user.remove(&session.user_id);
        }
        for search_id in purge {
            inner.sessions.remove(&search_id);
        }

        report
    }

    /// Snapshot of SEARCHING sessions for the reactive fast-path. Taken
    /// under the session lock and released before any location-table work.
    pub fn snapshot_searching(&self) -> Vec<SearchProbe> {
        let inner = self.inner.lock();
        inner
            .sessions
            .values()
            .filter(|entry| entry.session.status == SearchStatus::Searching)
            .map(|entry| SearchProbe {
                search_id: entry.session.search_id,
                origin_lat: entry.session.criteria.origin_lat,
                origin_lng: entry.session.criteria.origin_lng,
                radius_km: entry.session.criteria.radius_km,
            })
            .collect()
    }

    pub fn searching_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .sessions
            .values()
            .filter(|entry| entry.session.status == SearchStatus::Searching)
            .count()
    }

    /// Tear down every session task. Idempotent.
    pub fn shutdown(&self) {
        let inner = self.inner.lock();
        for entry in inner.sessions.values() {
            entry.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.inner.lock().sessions.len())
            .finish_non_exhaustive()
    }
}
