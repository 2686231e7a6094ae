//! Single-flight run state.
//!
//! One [`RunTracker`] exists per process. Its slot holds the run state
//! machine (`Idle → Starting → InProgress → Completed | Failed`) and the set
//! of channels leased by CRUD operations. Every transition happens under the
//! slot mutex and is a compare-and-set: callers that lose get [`Busy`]
//! immediately and nothing is queued.
//!
//! The run log lives behind its own mutex so status readers never wait on
//! the slot for longer than a field copy.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::clock::Clock;

/// A run is active, or the requested channel is held by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("refresh already running")]
pub struct Busy;

/// What a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunScope {
    /// Every configured channel, due or not
    Global,
    /// The channels the scheduler found due
    Due { channels: Vec<String> },
    /// One channel requested by name
    Channel { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Starting,
    InProgress,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Starting | RunState::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Snapshot returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub running: bool,
    pub state: RunState,
    pub scope: Option<RunScope>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub log: Vec<LogEntry>,
    /// Entries pushed out of the bounded log during this run
    pub dropped_log_entries: u64,
}

struct Slot {
    state: RunState,
    scope: Option<RunScope>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    run_id: u64,
    /// Channels the active run may touch
    covered: BTreeSet<String>,
    /// Channels held by in-flight CRUD operations
    leases: BTreeSet<String>,
}

struct RunLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

impl RunLog {
    fn push(&mut self, entry: LogEntry) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.dropped = 0;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RunTracker {
    slot: Mutex<Slot>,
    log: Mutex<RunLog>,
    clock: Arc<dyn Clock>,
}

impl RunTracker {
    pub fn new(clock: Arc<dyn Clock>, log_capacity: usize) -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: RunState::Idle,
                scope: None,
                started_at: None,
                finished_at: None,
                run_id: 0,
                covered: BTreeSet::new(),
                leases: BTreeSet::new(),
            }),
            log: Mutex::new(RunLog {
                entries: VecDeque::new(),
                capacity: log_capacity,
                dropped: 0,
            }),
            clock,
        }
    }

    /// Attempt `Idle | Completed | Failed → Starting`.
    ///
    /// Fails with `Busy` if a run is active or any channel in `covered` is
    /// leased by a CRUD operation. On success the previous run's log is
    /// discarded.
    pub fn try_begin(
        self: &Arc<Self>,
        scope: RunScope,
        covered: BTreeSet<String>,
    ) -> Result<RunHandle, Busy> {
        let started_at = self.clock.now();
        let run_id = {
            let mut slot = lock(&self.slot);
            if slot.state.is_active() {
                return Err(Busy);
            }
            if let Some(held) = covered.intersection(&slot.leases).next() {
                tracing::debug!(channel = %held, "Run refused, channel is being edited");
                return Err(Busy);
            }
            slot.run_id += 1;
            slot.state = RunState::Starting;
            slot.scope = Some(scope.clone());
            slot.started_at = Some(started_at);
            slot.finished_at = None;
            slot.covered = covered;
            slot.run_id
        };
        lock(&self.log).reset();
        tracing::info!(run = run_id, scope = ?scope, "Refresh run starting");

        Ok(RunHandle {
            tracker: Arc::clone(self),
            run_id,
            started_at,
            finished: false,
        })
    }

    /// Hold a channel against runs and other edits until the lease drops.
    pub fn lease(self: &Arc<Self>, channel: &str) -> Result<ChannelLease, Busy> {
        let mut slot = lock(&self.slot);
        let in_run = slot.state.is_active() && slot.covered.contains(channel);
        if in_run || slot.leases.contains(channel) {
            return Err(Busy);
        }
        slot.leases.insert(channel.to_string());
        Ok(ChannelLease {
            tracker: Arc::clone(self),
            channel: channel.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        lock(&self.slot).state.is_active()
    }

    pub fn state(&self) -> RunState {
        lock(&self.slot).state
    }

    pub fn status(&self) -> RunStatus {
        let (state, scope, started_at, finished_at) = {
            let slot = lock(&self.slot);
            (
                slot.state,
                slot.scope.clone(),
                slot.started_at,
                slot.finished_at,
            )
        };
        let (log, dropped) = {
            let log = lock(&self.log);
            (log.entries.iter().cloned().collect(), log.dropped)
        };

        let duration_seconds = started_at.map(|start| {
            let end = if state.is_active() {
                self.clock.now()
            } else {
                finished_at.unwrap_or(start)
            };
            (end - start).num_seconds().max(0)
        });

        RunStatus {
            running: state.is_active(),
            state,
            scope,
            started_at,
            finished_at,
            duration_seconds,
            log,
            dropped_log_entries: dropped,
        }
    }

    fn transition(&self, run_id: u64, to: RunState) -> bool {
        let mut slot = lock(&self.slot);
        if slot.run_id != run_id || !slot.state.is_active() {
            return false;
        }
        slot.state = to;
        if !to.is_active() {
            slot.finished_at = Some(self.clock.now());
            slot.covered.clear();
        }
        true
    }

    fn append(&self, run_id: u64, message: String) {
        tracing::info!(run = run_id, "{message}");
        let entry = LogEntry {
            timestamp: self.clock.now(),
            message,
        };
        lock(&self.log).push(entry);
    }
}

/// Ownership of the active run.
///
/// Dropping a handle that was never finished marks the run `Failed`, so a
/// panicking or cancelled run task cannot leave the tracker stuck in an
/// active state.
pub struct RunHandle {
    tracker: Arc<RunTracker>,
    run_id: u64,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl RunHandle {
    /// The run's notion of "now" for the delay gate and refresh timestamps.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn mark_in_progress(&self) {
        self.tracker.transition(self.run_id, RunState::InProgress);
    }

    /// Append to the run log (and the tracing output).
    pub fn log(&self, message: impl Into<String>) {
        self.tracker.append(self.run_id, message.into());
    }

    pub fn complete(mut self) {
        self.finished = true;
        self.log("Refresh completed");
        self.tracker.transition(self.run_id, RunState::Completed);
    }

    pub fn fail(mut self, reason: &str) {
        self.finished = true;
        self.log(format!("Refresh failed: {reason}"));
        self.tracker.transition(self.run_id, RunState::Failed);
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker
                .append(self.run_id, "Refresh aborted unexpectedly".to_string());
            if self.tracker.transition(self.run_id, RunState::Failed) {
                tracing::error!(run = self.run_id, "Refresh run dropped before finishing");
            }
        }
    }
}

/// A CRUD hold on one channel. Released on drop.
pub struct ChannelLease {
    tracker: Arc<RunTracker>,
    channel: String,
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        lock(&self.tracker.slot).leases.remove(&self.channel);
    }
}
