use crate::attribute_store::{AttributeStore, AttributeValue, UPDATE_INDEX_PATH};
use crate::error::Result;
use crate::reading_transformer::{transform, NormalizedMeasurement};
use crate::shelly_em_client::ShellyEmClient;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error};

/// Fixed poll cadence. Not configurable.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Fetching,
    Publishing,
    FaultedButAlive,
}

/// What the scheduler knows about its own progress. Lent to the heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct PollState {
    pub phase: PollPhase,
    pub last_update: Option<DateTime<Utc>>,
    pub successful_polls: u64,
    pub failed_polls: u64,
}

impl Default for PollState {
    fn default() -> Self {
        Self {
            phase: PollPhase::Idle,
            last_update: None,
            successful_polls: 0,
            failed_polls: 0,
        }
    }
}

/// 0..=255, then back to 0.
pub fn next_update_index(current: u8) -> u8 {
    current.wrapping_add(1)
}

/// Poll timer: first tick fires immediately; ticks missed while a slow
/// fetch was in flight are dropped instead of bursting afterwards.
pub fn poll_interval() -> Interval {
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Drives one fetch → transform → publish cycle per tick.
pub struct PollScheduler<S: AttributeStore> {
    client: ShellyEmClient,
    channel: usize,
    store: S,
    state: PollState,
}

impl<S: AttributeStore> PollScheduler<S> {
    pub fn new(client: ShellyEmClient, channel: usize, store: S) -> Self {
        Self {
            client,
            channel,
            store,
            state: PollState::default(),
        }
    }

    /// Runs one poll cycle. Any fault is logged and swallowed so the caller
    /// keeps ticking; returns whether the cycle published.
    pub async fn tick(&mut self) -> bool {
        match self.poll_once().await {
            Ok(measurement) => {
                self.state.phase = PollPhase::Idle;
                debug!(
                    power = measurement.power,
                    energy_forward = measurement.energy_forward,
                    energy_reverse = measurement.energy_reverse,
                    update_index = self.update_index(),
                    "House consumption published"
                );
                true
            }
            Err(err) => {
                let failed_in = self.state.phase;
                self.state.phase = PollPhase::FaultedButAlive;
                self.state.failed_polls += 1;
                error!(
                    error = %err,
                    transient = err.is_transient(),
                    phase = ?failed_in,
                    endpoint = %self.client.endpoint(),
                    failed_polls = self.state.failed_polls,
                    "Error at poll tick"
                );
                false
            }
        }
    }

    async fn poll_once(&mut self) -> Result<NormalizedMeasurement> {
        self.state.phase = PollPhase::Fetching;
        let reading = self.client.fetch_reading().await?;
        let measurement = transform(&reading, self.channel)?;

        self.state.phase = PollPhase::Publishing;
        let next_index = next_update_index(self.update_index());
        let mut updates: Vec<(&str, AttributeValue)> = measurement
            .attribute_updates()
            .into_iter()
            .map(|(path, value)| (path.as_str(), value))
            .collect();
        updates.push((UPDATE_INDEX_PATH, AttributeValue::Int(next_index.into())));
        self.store.publish(&updates)?;

        self.state.last_update = Some(Utc::now());
        self.state.successful_polls += 1;
        Ok(measurement)
    }

    /// Index currently visible in the store.
    pub fn update_index(&self) -> u8 {
        self.store
            .get(UPDATE_INDEX_PATH)
            .and_then(|value| value.as_i64())
            .and_then(|value| u8::try_from(value).ok())
            .unwrap_or(0)
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}
