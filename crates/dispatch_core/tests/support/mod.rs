//! Shared harness for integration tests: a full scheduler wired to
//! in-memory collaborators.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use dispatch_core::config::MatchingConfig;
use dispatch_core::location::DriverLocationStore;
use dispatch_core::registry::SessionRegistry;
use dispatch_core::scheduler::MatchingScheduler;
use dispatch_core::test_helpers::{
    bogota_city, test_config, RecordingNotifier, StaticDirectory,
};
use dispatch_core::zones::{ServiceZone, ZoneResolver};

pub struct Harness {
    pub scheduler: Arc<MatchingScheduler>,
    pub store: Arc<DriverLocationStore>,
    pub registry: Arc<SessionRegistry>,
    pub zones: Arc<ZoneResolver>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Log output for failing tests; `RUST_LOG` controls the filter.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Scheduler over the Bogotá test area with the given drivers and zones.
pub fn build(directory: StaticDirectory, zones: Vec<ServiceZone>, config: MatchingConfig) -> Harness {
    init_tracing();
    let resolver = Arc::new(ZoneResolver::from_config(&config).with_tables(vec![bogota_city()], zones));
    let store = Arc::new(DriverLocationStore::new(
        Arc::clone(&resolver),
        Arc::new(directory),
        config.clone(),
    ));
    let registry = Arc::new(SessionRegistry::new(config.clone()));
    let notifier = RecordingNotifier::new();
    let scheduler = MatchingScheduler::start(
        Arc::clone(&registry),
        Arc::clone(&store),
        Arc::clone(&notifier) as Arc<dyn dispatch_core::events::EventNotifier>,
        config,
    );
    Harness {
        scheduler,
        store,
        registry,
        zones: resolver,
        notifier,
    }
}

pub fn build_default(directory: StaticDirectory) -> Harness {
    build(directory, Vec::new(), test_config())
}

/// Poll a condition while letting the paused clock advance. Returns false
/// if the condition never held within ~30 virtual seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..600 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
