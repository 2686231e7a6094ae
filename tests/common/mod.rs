//! Shared fixtures: in-memory catalogue, fake pipeline, manual clock.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

use tubecast::pipeline::{
    ChannelLister, ChannelProbe, MediaProcessor, MediaRequest, PipelineError, ProcessedMedia,
    RemoteVideo,
};
use tubecast::refresh::{Coordinator, ManualClock, RefreshSettings};
use tubecast::registry::ChannelDefaults;
use tubecast::storage::{Channel, Database, MediaFormat, Quality};

/// 2023-11-14T22:13:20Z
pub const NOW: i64 = 1_700_000_000;
pub const HOUR: i64 = 3_600;
pub const DAY: i64 = 24 * HOUR;

pub fn video(id: &str, published_at: i64) -> RemoteVideo {
    RemoteVideo {
        external_id: id.to_string(),
        title: format!("Video {id}"),
        published_at,
        duration_seconds: Some(600),
        description: format!("About {id}"),
        source_url: format!("https://www.youtube.com/watch?v={id}"),
    }
}

pub fn channel(name: &str, max_episodes: u32, delay_hours: u32) -> Channel {
    Channel {
        name: name.to_string(),
        display_name: format!("Channel {name}"),
        url: format!("https://www.youtube.com/@{name}"),
        max_episodes,
        download_delay_hours: delay_hours,
        refresh_interval_hours: 24,
        format: MediaFormat::Video,
        quality: Quality::Max,
        segment_categories: BTreeSet::new(),
        last_refresh_at: None,
        created_at: NOW - 30 * DAY,
    }
}

// ============================================================================
// Fake lister
// ============================================================================

/// Serves listings keyed by channel URL. Unknown URLs are unreachable.
#[derive(Default)]
pub struct FakeLister {
    listings: Mutex<HashMap<String, Vec<RemoteVideo>>>,
    unreachable: Mutex<HashSet<String>>,
}

impl FakeLister {
    /// Replace the listing for a URL. Videos are stored newest first.
    pub fn set_videos(&self, url: &str, mut videos: Vec<RemoteVideo>) {
        videos.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        self.listings.lock().unwrap().insert(url.to_string(), videos);
        self.unreachable.lock().unwrap().remove(url);
    }

    pub fn set_unreachable(&self, url: &str) {
        self.unreachable.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl ChannelLister for FakeLister {
    async fn list_videos(&self, url: &str, limit: u32) -> Result<Vec<RemoteVideo>, PipelineError> {
        if self.unreachable.lock().unwrap().contains(url) {
            return Err(PipelineError::Unreachable(format!("cannot reach {url}")));
        }
        let listings = self.listings.lock().unwrap();
        let videos = listings
            .get(url)
            .ok_or_else(|| PipelineError::NotFound(url.to_string()))?;
        Ok(videos.iter().take(limit as usize).cloned().collect())
    }

    async fn probe(&self, url: &str) -> Result<ChannelProbe, PipelineError> {
        if self.unreachable.lock().unwrap().contains(url) {
            return Err(PipelineError::Unreachable(format!("cannot reach {url}")));
        }
        Ok(ChannelProbe {
            title: Some("Probed".to_string()),
            video_count: None,
        })
    }
}

// ============================================================================
// Fake processor
// ============================================================================

/// Writes a small file per request into the destination directory.
pub struct FakeProcessor {
    pub processed: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    /// Signalled each time `process` is entered
    pub entered: Notify,
    /// When present, `process` waits for a permit before doing any work
    gate: Option<Semaphore>,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self {
            processed: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            entered: Notify::new(),
            gate: None,
        }
    }

    /// A processor that blocks every call until [`FakeProcessor::release`].
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn fail_on(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    pub fn panic_on(&self, id: &str) {
        self.panicking.lock().unwrap().insert(id.to_string());
    }

    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaProcessor for FakeProcessor {
    async fn process(&self, request: &MediaRequest) -> Result<ProcessedMedia, PipelineError> {
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let id = request.external_id.clone();
        if self.panicking.lock().unwrap().contains(&id) {
            panic!("processor exploded on {id}");
        }
        if self.failing.lock().unwrap().contains(&id) {
            return Err(PipelineError::Download(format!("{id} is unavailable")));
        }

        let local_path = request.dest_dir.join(format!("{id}.mp4"));
        tokio::fs::write(&local_path, b"media").await.unwrap();
        self.processed.lock().unwrap().push(id);
        Ok(ProcessedMedia {
            local_path,
            extension: "mp4".to_string(),
            file_size: 5,
            thumbnail_path: None,
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub lister: Arc<FakeLister>,
    pub processor: Arc<FakeProcessor>,
    pub clock: ManualClock,
    pub media: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_processor(FakeProcessor::new()).await
    }

    pub async fn with_processor(processor: FakeProcessor) -> Self {
        let db = Database::open(":memory:").await.unwrap();
        let lister = Arc::new(FakeLister::default());
        let processor = Arc::new(processor);
        let clock = ManualClock::at_timestamp(NOW);
        let media = tempfile::tempdir().unwrap();
        let settings = RefreshSettings {
            media_root: media.path().to_path_buf(),
            download_pause: Duration::ZERO,
            defaults: ChannelDefaults::default(),
        };
        let coordinator = Arc::new(Coordinator::new(
            db,
            lister.clone(),
            processor.clone(),
            Arc::new(clock.clone()),
            settings,
            100,
        ));
        Self {
            coordinator,
            lister,
            processor,
            clock,
            media,
        }
    }

    /// Store a channel directly, bypassing validation and the probe.
    pub async fn insert(&self, channel: &Channel) {
        self.coordinator.db().insert_channel(channel).await.unwrap();
    }

    pub async fn stored_ids(&self, channel: &str) -> Vec<String> {
        self.coordinator
            .db()
            .list_episodes(channel)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.external_id)
            .collect()
    }

    pub fn media_file(&self, channel: &str, id: &str) -> std::path::PathBuf {
        self.media.path().join(channel).join(format!("{id}.mp4"))
    }
}
