pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod location;
pub mod matching;
pub mod providers;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod spatial;
pub mod zones;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
