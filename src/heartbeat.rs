use crate::attribute_store::{AttributePath, AttributeStore};
use crate::poll_scheduler::{PollPhase, PollState};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::info;

/// Longest accepted sign-of-life interval: one week.
pub const MAX_HEARTBEAT_MINUTES: u64 = 7 * 24 * 60;

/// What a sign-of-life report saw.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatSummary {
    pub phase: PollPhase,
    pub last_update: Option<DateTime<Utc>>,
    pub last_power: Option<f64>,
    pub successful_polls: u64,
    pub failed_polls: u64,
}

/// Slow, read-only liveness logger. A zero interval disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatReporter {
    period: Option<Duration>,
}

impl HeartbeatReporter {
    /// Minutes above [`MAX_HEARTBEAT_MINUTES`] are clamped to it.
    pub fn new(interval_minutes: u64) -> Self {
        Self::every(Duration::from_secs(
            interval_minutes.min(MAX_HEARTBEAT_MINUTES) * 60,
        ))
    }

    pub fn every(period: Duration) -> Self {
        Self {
            period: (!period.is_zero()).then_some(period),
        }
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Timer for the reporter, first firing one full period from now.
    /// `None` when disabled, so a zero period never reaches tokio.
    pub fn interval(&self) -> Option<Interval> {
        self.period.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        })
    }

    pub fn report<S: AttributeStore>(&self, store: &S, state: &PollState) -> HeartbeatSummary {
        let summary = HeartbeatSummary {
            phase: state.phase,
            last_update: state.last_update,
            last_power: store
                .get(AttributePath::Power.as_str())
                .and_then(|value| value.as_f64()),
            successful_polls: state.successful_polls,
            failed_polls: state.failed_polls,
        };

        let last_update = summary
            .last_update
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let last_power = summary
            .last_power
            .map(|power| power.to_string())
            .unwrap_or_else(|| "---".to_string());

        info!("--- Start: sign of life ---");
        info!("Last successful poll: {last_update}");
        info!("Last '{}': {last_power}", AttributePath::Power);
        info!("Poll phase: {:?}", summary.phase);
        info!(
            successful_polls = summary.successful_polls,
            failed_polls = summary.failed_polls,
            "--- End: sign of life ---"
        );
        summary
    }
}

/// Resolves on the next heartbeat tick, or never when the reporter is off.
pub async fn next_heartbeat(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
