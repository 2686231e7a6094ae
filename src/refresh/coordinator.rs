use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::clock::Clock;
use super::state::{Busy, RunHandle, RunScope, RunState, RunStatus, RunTracker};
use crate::pipeline::{ChannelLister, MediaProcessor, MediaRequest, RemoteVideo};
use crate::registry::{ChannelDefaults, ValidationError};
use crate::storage::{Channel, Database, Episode, StoreError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A run is active or the channel is held by another operation
    #[error(transparent)]
    Busy(#[from] Busy),

    #[error("Channel not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Unclassified storage failure
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ChannelNotFound(name) => CoordinatorError::NotFound(name),
            other => CoordinatorError::Store(other),
        }
    }
}

// ============================================================================
// Settings & Reports
// ============================================================================

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Parent of every channel media directory
    pub media_root: PathBuf,
    /// Pause inserted between consecutive downloads
    pub download_pause: Duration,
    /// Values for fields a new channel leaves out
    pub defaults: ChannelDefaults,
}

impl RefreshSettings {
    pub fn channel_dir(&self, channel: &str) -> PathBuf {
        self.media_root.join(channel)
    }
}

/// Outcome counters of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub downloaded: usize,
    pub skipped_too_new: usize,
    pub failed_items: usize,
    pub duplicates: usize,
    pub evicted: usize,
    /// Channels whose `last_refresh_at` advanced
    pub refreshed_channels: Vec<String>,
    /// Channels skipped because listing failed
    pub unreachable_channels: Vec<String>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            state: RunState::InProgress,
            downloaded: 0,
            skipped_too_new: 0,
            failed_items: 0,
            duplicates: 0,
            evicted: 0,
            refreshed_channels: Vec::new(),
            unreachable_channels: Vec::new(),
        }
    }
}

/// A started run. Await it with [`RunTicket::wait`] or drop it to let the
/// run continue in the background.
pub struct RunTicket {
    join: JoinHandle<RunReport>,
}

impl RunTicket {
    pub async fn wait(self) -> RunReport {
        match self.join.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Refresh task did not finish");
                RunReport {
                    state: RunState::Failed,
                    ..RunReport::new()
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ============================================================================
// Coordinator
// ============================================================================

/// Runs refreshes under single-flight control and owns channel mutations.
pub struct Coordinator {
    pub(crate) db: Database,
    pub(crate) lister: Arc<dyn ChannelLister>,
    processor: Arc<dyn MediaProcessor>,
    pub(crate) tracker: Arc<RunTracker>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: RefreshSettings,
}

impl Coordinator {
    pub fn new(
        db: Database,
        lister: Arc<dyn ChannelLister>,
        processor: Arc<dyn MediaProcessor>,
        clock: Arc<dyn Clock>,
        settings: RefreshSettings,
        log_capacity: usize,
    ) -> Self {
        Self {
            tracker: Arc::new(RunTracker::new(Arc::clone(&clock), log_capacity)),
            db,
            lister,
            processor,
            clock,
            settings,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn status(&self) -> RunStatus {
        self.tracker.status()
    }

    pub fn is_running(&self) -> bool {
        self.tracker.is_running()
    }

    /// Refresh every configured channel, due or not.
    pub async fn trigger_global(self: &Arc<Self>) -> Result<RunTicket, CoordinatorError> {
        if self.tracker.is_running() {
            return Err(Busy.into());
        }
        let channels = self.db.list_channels().await?;
        self.launch(RunScope::Global, channels)
    }

    /// Refresh one channel by name.
    pub async fn trigger_channel(self: &Arc<Self>, name: &str) -> Result<RunTicket, CoordinatorError> {
        let channel = self
            .db
            .get_channel(name)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(name.to_string()))?;
        self.launch(
            RunScope::Channel {
                name: channel.name.clone(),
            },
            vec![channel],
        )
    }

    /// Refresh the channels the scheduler selected.
    pub(crate) fn trigger_due(
        self: &Arc<Self>,
        channels: Vec<Channel>,
    ) -> Result<RunTicket, CoordinatorError> {
        let names = channels.iter().map(|c| c.name.clone()).collect();
        self.launch(RunScope::Due { channels: names }, channels)
    }

    fn launch(
        self: &Arc<Self>,
        scope: RunScope,
        channels: Vec<Channel>,
    ) -> Result<RunTicket, CoordinatorError> {
        let covered: BTreeSet<String> = channels.iter().map(|c| c.name.clone()).collect();
        let handle = self.tracker.try_begin(scope, covered)?;
        let this = Arc::clone(self);
        let join = tokio::spawn(async move { this.execute(handle, channels).await });
        Ok(RunTicket { join })
    }

    async fn execute(self: Arc<Self>, handle: RunHandle, channels: Vec<Channel>) -> RunReport {
        handle.mark_in_progress();
        let started_at = handle.started_at();
        let mut report = RunReport::new();
        // (channel, listing succeeded) for every channel processed to the end
        let mut finished: Vec<(Channel, bool)> = Vec::with_capacity(channels.len());

        let outcome = AssertUnwindSafe(self.process_channels(
            &handle,
            &channels,
            started_at,
            &mut report,
            &mut finished,
        ))
        .catch_unwind()
        .await;

        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("panic: {}", panic_message(payload.as_ref()))),
        };

        // Completed channels keep their progress even when the run faulted.
        let finalize_fault = self
            .finalize(&handle, &finished, started_at, &mut report)
            .await
            .err()
            .map(|e| e.to_string());

        match fault.or(finalize_fault) {
            None => {
                report.state = RunState::Completed;
                handle.complete();
            }
            Some(reason) => {
                tracing::error!(reason = %reason, "Refresh run failed");
                report.state = RunState::Failed;
                handle.fail(&reason);
            }
        }
        report
    }

    async fn process_channels(
        &self,
        handle: &RunHandle,
        channels: &[Channel],
        started_at: DateTime<Utc>,
        report: &mut RunReport,
        finished: &mut Vec<(Channel, bool)>,
    ) -> Result<(), StoreError> {
        handle.log(format!("Refreshing {} channel(s)", channels.len()));
        for channel in channels {
            let listed = self
                .process_channel(handle, channel, started_at, report)
                .await?;
            finished.push((channel.clone(), listed));
        }
        Ok(())
    }

    /// Returns whether the listing succeeded. Only unclassified faults are
    /// returned as errors.
    async fn process_channel(
        &self,
        handle: &RunHandle,
        channel: &Channel,
        started_at: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<bool, StoreError> {
        handle.log(format!("Checking {} for new videos", channel.display_name));

        let videos = match self
            .lister
            .list_videos(&channel.url, channel.max_episodes)
            .await
        {
            Ok(videos) => videos,
            Err(e) => {
                handle.log(format!("Could not list {}: {e}", channel.display_name));
                report.unreachable_channels.push(channel.name.clone());
                return Ok(false);
            }
        };

        // Seeded with stored ids; also drops repeats within one listing.
        let mut seen = self.db.episode_ids(&channel.name).await?;
        let fresh: Vec<&RemoteVideo> = videos
            .iter()
            .filter(|v| seen.insert(v.external_id.clone()))
            .collect();
        if fresh.is_empty() {
            handle.log(format!("No new videos for {}", channel.display_name));
            return Ok(true);
        }

        let dest_dir = self.settings.channel_dir(&channel.name);
        tokio::fs::create_dir_all(&dest_dir).await?;

        // None when the delay reaches past the earliest representable time:
        // nothing is old enough then.
        let cutoff = ChronoDuration::try_hours(i64::from(channel.download_delay_hours))
            .and_then(|delay| started_at.checked_sub_signed(delay))
            .map(|t| t.timestamp());

        for video in fresh {
            if cutoff.map_or(true, |c| video.published_at > c) {
                handle.log(format!(
                    "Skipping {}: published less than {}h ago",
                    video.title, channel.download_delay_hours
                ));
                report.skipped_too_new += 1;
                continue;
            }

            if report.downloaded > 0 && !self.settings.download_pause.is_zero() {
                tokio::time::sleep(self.settings.download_pause).await;
            }

            let request = MediaRequest {
                external_id: video.external_id.clone(),
                source_url: video.source_url.clone(),
                dest_dir: dest_dir.clone(),
                format: channel.format,
                quality: channel.quality,
                segment_categories: channel.segment_categories.clone(),
            };

            let media = match self.processor.process(&request).await {
                Ok(media) => media,
                Err(e) => {
                    handle.log(format!("Failed to process {}: {e}", video.title));
                    report.failed_items += 1;
                    continue;
                }
            };

            let episode = Episode {
                channel: channel.name.clone(),
                external_id: video.external_id.clone(),
                title: video.title.clone(),
                published_at: video.published_at,
                duration_seconds: video.duration_seconds,
                description: video.description.clone(),
                file_path: media.local_path,
                extension: media.extension,
                file_size: media.file_size,
                thumbnail_path: media.thumbnail_path,
                downloaded_at: self.clock.now().timestamp(),
            };

            match self.db.add_episode(&episode).await {
                Ok(()) => {
                    handle.log(format!("Downloaded {}", video.title));
                    report.downloaded += 1;
                }
                Err(StoreError::DuplicateEpisode { external_id, .. }) => {
                    tracing::warn!(channel = %channel.name, external_id = %external_id, "Episode recorded twice");
                    handle.log(format!("Already stored: {external_id}"));
                    report.duplicates += 1;
                }
                Err(StoreError::ChannelNotFound(name)) => {
                    handle.log(format!("Channel {name} was removed, stopping"));
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(true)
    }

    /// Enforce retention and advance `last_refresh_at` for finished channels.
    ///
    /// Every channel is attempted; the first unclassified error is returned.
    async fn finalize(
        &self,
        handle: &RunHandle,
        finished: &[(Channel, bool)],
        started_at: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(), StoreError> {
        let mut first_error = None;

        for (channel, listed) in finished {
            match self.db.evict_oldest(&channel.name, channel.max_episodes).await {
                Ok(evicted) if evicted.is_empty() => {}
                Ok(evicted) => {
                    handle.log(format!(
                        "Removed {} old episode(s) from {}",
                        evicted.len(),
                        channel.display_name
                    ));
                    report.evicted += evicted.len();
                }
                Err(StoreError::PartialDeletion {
                    removed, failures, ..
                }) => {
                    handle.log(format!(
                        "Removed {removed} old episode(s) from {} but {} file(s) could not be deleted",
                        channel.display_name,
                        failures.len()
                    ));
                    report.evicted += removed;
                }
                Err(e) => {
                    tracing::error!(channel = %channel.name, error = %e, "Eviction failed");
                    first_error.get_or_insert(e);
                    continue;
                }
            }

            if !listed {
                continue;
            }
            match self
                .db
                .set_last_refresh(&channel.name, started_at.timestamp())
                .await
            {
                Ok(()) => report.refreshed_channels.push(channel.name.clone()),
                Err(StoreError::ChannelNotFound(_)) => {}
                Err(e) => {
                    tracing::error!(channel = %channel.name, error = %e, "Could not record refresh time");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
