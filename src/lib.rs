//! Shelly EM Bridge Library
//!
//! Polls a Shelly EM energy meter over its HTTP JSON status endpoint and
//! republishes voltage, current, power and energy counters as attributes of
//! an energy-meter service, keeping a wrapping update index and a periodic
//! sign-of-life log.

pub mod attribute_store;
pub mod bridge;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod poll_scheduler;
pub mod reading_transformer;
pub mod shelly_em_client;

// Re-export commonly used types for easier access
pub use attribute_store::{AttributePath, AttributeStore, AttributeValue, MemoryAttributeStore};
pub use bridge::MeterBridge;
pub use config::{ConfigSnapshot, MeterEndpoint, Role};
pub use error::BridgeError;
pub use heartbeat::{HeartbeatReporter, HeartbeatSummary};
pub use poll_scheduler::{PollPhase, PollScheduler, PollState};
pub use reading_transformer::{transform, NormalizedMeasurement};
pub use shelly_em_client::{RawMeterReading, ShellyEmClient};
