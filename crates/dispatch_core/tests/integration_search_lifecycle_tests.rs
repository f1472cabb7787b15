mod support;

use std::time::Duration;

use dispatch_core::error::SearchError;
use dispatch_core::session::{DriverId, Priority, SearchCriteria, SearchStatus, UserId};
use dispatch_core::test_helpers::{test_config, StaticDirectory, BOGOTA, BOGOTA_NEARBY};

use support::{build, build_default, wait_for};

fn criteria() -> SearchCriteria {
    SearchCriteria::new(BOGOTA.0, BOGOTA.1).with_max_wait(Duration::from_secs(3))
}

#[tokio::test(start_paused = true)]
async fn search_without_drivers_times_out() {
    let harness = build_default(StaticDirectory::default());
    let session = harness
        .scheduler
        .start_search(UserId(1), criteria())
        .expect("search starts");
    let search_id = session.search_id;
    assert_eq!(session.status, SearchStatus::Searching);
    assert!(session.remaining_wait() > Duration::ZERO);

    let timed_out = wait_for(|| {
        harness
            .scheduler
            .get_search_status(search_id, UserId(1))
            .map(|s| s.status == SearchStatus::Timeout)
            .unwrap_or(false)
    })
    .await;
    assert!(timed_out, "session must reach TIMEOUT after max wait");

    let status = harness
        .scheduler
        .get_search_status(search_id, UserId(1))
        .expect("still visible during the grace window");
    assert!(status.attempts >= 1, "attempts are counted");
    assert_eq!(status.remaining_wait(), Duration::ZERO);

    let events = harness.notifier.events();
    let timeouts = events
        .iter()
        .filter(|e| {
            e.search_id == search_id
                && matches!(
                    e.kind,
                    dispatch_core::events::SessionEventKind::SearchTimeout
                )
        })
        .count();
    assert_eq!(timeouts, 1, "exactly one timeout event");
}

#[tokio::test(start_paused = true)]
async fn second_search_while_searching_is_rejected() {
    let harness = build_default(StaticDirectory::default());
    harness
        .scheduler
        .start_search(UserId(1), criteria())
        .expect("first search");

    let err = harness
        .scheduler
        .start_search(UserId(1), criteria())
        .expect_err("second search must be rejected");
    assert_eq!(err, SearchError::AlreadySearching(UserId(1)));
}

#[tokio::test(start_paused = true)]
async fn invalid_criteria_never_enter_the_registry() {
    let harness = build_default(StaticDirectory::default());
    let err = harness
        .scheduler
        .start_search(UserId(1), SearchCriteria::new(95.0, -74.0))
        .expect_err("bad latitude");
    assert!(matches!(err, SearchError::InvalidCoordinates { .. }));
    assert_eq!(harness.registry.searching_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn capacity_rejects_additional_searches() {
    let config = test_config().with_max_concurrent_sessions(2);
    let harness = build(StaticDirectory::default(), Vec::new(), config);

    harness
        .scheduler
        .start_search(UserId(1), criteria())
        .expect("first");
    harness
        .scheduler
        .start_search(UserId(2), criteria())
        .expect("second");
    let err = harness
        .scheduler
        .start_search(UserId(3), criteria())
        .expect_err("over capacity");
    assert_eq!(err, SearchError::CapacityExceeded(2));
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_the_search_and_emits_once() {
    let harness = build_default(StaticDirectory::default());
    let session = harness
        .scheduler
        .start_search(UserId(1), criteria().with_max_wait(Duration::from_secs(30)))
        .expect("search starts");
    let search_id = session.search_id;

    let cancelled = harness
        .scheduler
        .cancel_search(search_id, UserId(1))
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, SearchStatus::Cancelled);

    // Purged immediately; a second cancel cannot produce another event.
    let err = harness
        .scheduler
        .cancel_search(search_id, UserId(1))
        .await
        .expect_err("second cancel");
    assert_eq!(err, SearchError::NotFound(search_id));

    // Let any stray tick run; the cancelled session must stay silent.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let events = harness.notifier.events();
    let cancellations = events
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                dispatch_core::events::SessionEventKind::SearchCancelled
            )
        })
        .count();
    assert_eq!(cancellations, 1, "exactly one cancellation event");
    assert_eq!(events.len(), 1, "no other events for a cancelled search");

    // The user is free to search again.
    harness
        .scheduler
        .start_search(UserId(1), criteria())
        .expect("fresh search");
}

#[tokio::test(start_paused = true)]
async fn found_session_is_confirmed_and_completed() {
    let directory = StaticDirectory::default().with_driver(DriverId(7), "Ana", 4.9, None);
    let harness = build_default(directory);
    harness
        .store
        .set_online(DriverId(7), BOGOTA_NEARBY.0, BOGOTA_NEARBY.1)
        .expect("driver online");

    let session = harness
        .scheduler
        .start_search(UserId(1), criteria().with_max_wait(Duration::from_secs(30)))
        .expect("search starts");
    let search_id = session.search_id;

    let found = wait_for(|| {
        harness
            .scheduler
            .get_search_status(search_id, UserId(1))
            .map(|s| s.status == SearchStatus::Found)
            .unwrap_or(false)
    })
    .await;
    assert!(found, "immediate attempt finds the online driver");

    // Wrong driver id: rejected, session untouched.
    let err = harness
        .scheduler
        .confirm_match(search_id, UserId(1), DriverId(8))
        .expect_err("mismatched driver");
    assert!(matches!(err, SearchError::DriverMismatch { .. }));
    let status = harness
        .scheduler
        .get_search_status(search_id, UserId(1))
        .expect("status");
    assert_eq!(status.status, SearchStatus::Found);

    let confirmation = harness
        .scheduler
        .confirm_match(search_id, UserId(1), DriverId(7))
        .expect("correct driver");
    assert_eq!(confirmation.driver.driver_id, DriverId(7));

    // Completed sessions are purged.
    let err = harness
        .scheduler
        .get_search_status(search_id, UserId(1))
        .expect_err("purged after completion");
    assert_eq!(err, SearchError::NotFound(search_id));
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_found_session_expires_after_grace() {
    let directory = StaticDirectory::default().with_driver(DriverId(7), "Ana", 4.9, None);
    let harness = build_default(directory);
    harness
        .store
        .set_online(DriverId(7), BOGOTA_NEARBY.0, BOGOTA_NEARBY.1)
        .expect("driver online");

    let session = harness
        .scheduler
        .start_search(UserId(1), criteria().with_max_wait(Duration::from_secs(30)))
        .expect("search starts");
    let search_id = session.search_id;

    assert!(
        wait_for(|| {
            harness
                .scheduler
                .get_search_status(search_id, UserId(1))
                .map(|s| s.status == SearchStatus::Found)
                .unwrap_or(false)
        })
        .await
    );

    // Never confirmed: the sweep purges it after the grace period and the
    // user may start over.
    tokio::time::sleep(Duration::from_secs(70)).await;
    let err = harness
        .scheduler
        .get_search_status(search_id, UserId(1))
        .expect_err("purged");
    assert_eq!(err, SearchError::NotFound(search_id));

    let expired = harness.notifier.events().iter().any(|e| {
        e.search_id == search_id
            && matches!(
                e.kind,
                dispatch_core::events::SessionEventKind::SearchExpired
            )
    });
    assert!(expired, "search-expired event fired");

    harness
        .scheduler
        .start_search(UserId(1), criteria())
        .expect("fresh search after expiry");
}

#[tokio::test(start_paused = true)]
async fn higher_priority_attempts_more_often() {
    let harness = build_default(StaticDirectory::default());
    let slow = harness
        .scheduler
        .start_search(
            UserId(1),
            SearchCriteria::new(BOGOTA.0, BOGOTA.1)
                .with_max_wait(Duration::from_secs(20))
                .with_priority(Priority::Low),
        )
        .expect("low priority search");
    let fast = harness
        .scheduler
        .start_search(
            UserId(2),
            SearchCriteria::new(BOGOTA.0, BOGOTA.1)
                .with_max_wait(Duration::from_secs(20))
                .with_priority(Priority::High),
        )
        .expect("high priority search");
    assert!(fast.search_interval < slow.search_interval);

    tokio::time::sleep(Duration::from_secs(10)).await;

    let slow_attempts = harness
        .scheduler
        .get_search_status(slow.search_id, UserId(1))
        .expect("status")
        .attempts;
    let fast_attempts = harness
        .scheduler
        .get_search_status(fast.search_id, UserId(2))
        .expect("status")
        .attempts;
    assert!(
        fast_attempts > slow_attempts,
        "high priority ({fast_attempts}) must out-attempt low ({slow_attempts})"
    );
}
