use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::coordinator::{Coordinator, CoordinatorError, RunTicket};
use crate::storage::Channel;

/// A channel is due if it was never refreshed or its interval has elapsed.
pub fn is_due(channel: &Channel, now: DateTime<Utc>) -> bool {
    match channel.last_refresh_at {
        None => true,
        Some(last) => {
            let interval = i64::from(channel.refresh_interval_hours) * 3600;
            now.timestamp().saturating_sub(last) >= interval
        }
    }
}

pub enum TickOutcome {
    NothingDue,
    Busy,
    Started(RunTicket),
}

impl std::fmt::Debug for TickOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickOutcome::NothingDue => f.write_str("NothingDue"),
            TickOutcome::Busy => f.write_str("Busy"),
            TickOutcome::Started(_) => f.write_str("Started"),
        }
    }
}

/// Periodically starts runs for due channels.
pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    period: Duration,
}

impl Scheduler {
    pub fn new(coordinator: Arc<Coordinator>, period: Duration) -> Self {
        Self {
            coordinator,
            period,
        }
    }

    /// Channels due at the coordinator's current time.
    pub async fn due_channels(&self) -> Result<Vec<Channel>, CoordinatorError> {
        let now = self.coordinator.now();
        Ok(self
            .coordinator
            .list_channels()
            .await?
            .into_iter()
            .filter(|c| is_due(c, now))
            .collect())
    }

    /// One scheduling pass. A no-op while a run is active.
    pub async fn tick(&self) -> Result<TickOutcome, CoordinatorError> {
        if self.coordinator.is_running() {
            return Ok(TickOutcome::Busy);
        }
        let due = self.due_channels().await?;
        if due.is_empty() {
            return Ok(TickOutcome::NothingDue);
        }
        tracing::info!(channels = due.len(), "Channels due for refresh");
        match self.coordinator.trigger_due(due) {
            Ok(ticket) => Ok(TickOutcome::Started(ticket)),
            Err(CoordinatorError::Busy(_)) => Ok(TickOutcome::Busy),
            Err(e) => Err(e),
        }
    }

    /// Spawn the tick loop. Tick errors are logged and the loop carries on.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(period = ?self.period, "Scheduler started");
            loop {
                interval.tick().await;
                match self.tick().await {
                    Ok(TickOutcome::Started(_)) => tracing::debug!("Scheduled run started"),
                    Ok(outcome) => tracing::trace!(outcome = ?outcome, "Scheduler tick"),
                    Err(e) => tracing::warn!(error = %e, "Scheduler tick failed"),
                }
            }
        })
    }
}
