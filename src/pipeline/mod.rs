//! Download pipeline adapter.
//!
//! The coordinator never talks to the remote site or to media tools
//! directly. It goes through [`ChannelLister`] and [`MediaProcessor`], which
//! the binary backs with [`YtDlp`] and tests back with in-memory fakes.

mod ytdlp;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::storage::{MediaFormat, Quality, SegmentCategory};

pub use ytdlp::YtDlp;

/// Recoverable failures reported by the pipeline.
///
/// None of these abort a refresh run: the channel or the single video is
/// logged and skipped.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source could not be reached (network, tool missing, rate limit)
    #[error("Source unreachable: {0}")]
    Unreachable(String),
    /// The channel or video does not exist or is not accessible
    #[error("Not found: {0}")]
    NotFound(String),
    /// Fetching the media failed
    #[error("Download failed: {0}")]
    Download(String),
    /// Post-processing (segment removal, remux, thumbnail) failed
    #[error("Processing failed: {0}")]
    Processing(String),
    /// The external call exceeded its time budget and was killed
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// One entry of a remote channel listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVideo {
    pub external_id: String,
    pub title: String,
    /// Unix seconds
    pub published_at: i64,
    pub duration_seconds: Option<i64>,
    pub description: String,
    pub source_url: String,
}

/// Result of a reachability check on a channel URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProbe {
    pub title: Option<String>,
    pub video_count: Option<u64>,
}

/// Everything the processor needs to produce one episode.
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub external_id: String,
    pub source_url: String,
    /// Channel media directory; the processor writes `{external_id}.{ext}` here
    pub dest_dir: PathBuf,
    pub format: MediaFormat,
    pub quality: Quality,
    pub segment_categories: BTreeSet<SegmentCategory>,
}

/// A finished media file on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMedia {
    pub local_path: PathBuf,
    /// Without the leading dot
    pub extension: String,
    pub file_size: u64,
    pub thumbnail_path: Option<PathBuf>,
}

#[async_trait]
pub trait ChannelLister: Send + Sync {
    /// Newest-first listing of at most `limit` videos.
    async fn list_videos(&self, url: &str, limit: u32) -> Result<Vec<RemoteVideo>, PipelineError>;

    /// Check that a channel URL resolves to something listable.
    async fn probe(&self, url: &str) -> Result<ChannelProbe, PipelineError>;
}

#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Download, trim and store one video.
    async fn process(&self, request: &MediaRequest) -> Result<ProcessedMedia, PipelineError>;
}
