use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors for the channel registry and episode store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database
    #[error("Another instance of tubecast appears to be running. Please stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// No channel with this name is configured
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// A channel with this name already exists
    #[error("Channel already exists: {0}")]
    ChannelExists(String),

    /// The episode is already recorded for the channel
    #[error("Episode {external_id} already stored for channel {channel}")]
    DuplicateEpisode {
        channel: String,
        external_id: String,
    },

    /// Episode metadata was removed but some media files could not be deleted.
    /// The metadata is not restored.
    #[error("Removed {removed} episodes from {channel} but {} files could not be deleted", .failures.len())]
    PartialDeletion {
        channel: String,
        removed: usize,
        failures: Vec<(PathBuf, String)>,
    },

    /// A stored row holds a value the current code cannot interpret
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    /// Filesystem failure while managing media
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Classify a sqlx error, mapping lock conditions to `InstanceLocked`
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::InstanceLocked;
        }

        StoreError::Database(err)
    }
}

// ============================================================================
// Channel Settings
// ============================================================================

/// Media container the pipeline should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Video,
    Audio,
}

impl MediaFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaFormat::Video => "video",
            MediaFormat::Audio => "audio",
        }
    }
}

impl FromStr for MediaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(MediaFormat::Video),
            "audio" => Ok(MediaFormat::Audio),
            other => Err(format!("unknown format '{other}' (expected video or audio)")),
        }
    }
}

/// Video quality ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "max")]
    Max,
    #[serde(rename = "480p")]
    Low,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Max => "max",
            Quality::Low => "480p",
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(Quality::Max),
            "480p" => Ok(Quality::Low),
            other => Err(format!("unknown quality '{other}' (expected max or 480p)")),
        }
    }
}

/// Sponsor-segment categories that can be cut from downloads.
///
/// The set is closed: anything else is rejected when a channel is created
/// or edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentCategory {
    Sponsor,
    Intro,
    Outro,
    Selfpromo,
    Preview,
    Filler,
    Interaction,
    MusicOfftopic,
}

impl SegmentCategory {
    pub const ALL: [SegmentCategory; 8] = [
        SegmentCategory::Sponsor,
        SegmentCategory::Intro,
        SegmentCategory::Outro,
        SegmentCategory::Selfpromo,
        SegmentCategory::Preview,
        SegmentCategory::Filler,
        SegmentCategory::Interaction,
        SegmentCategory::MusicOfftopic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SegmentCategory::Sponsor => "sponsor",
            SegmentCategory::Intro => "intro",
            SegmentCategory::Outro => "outro",
            SegmentCategory::Selfpromo => "selfpromo",
            SegmentCategory::Preview => "preview",
            SegmentCategory::Filler => "filler",
            SegmentCategory::Interaction => "interaction",
            SegmentCategory::MusicOfftopic => "music_offtopic",
        }
    }
}

impl fmt::Display for SegmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SegmentCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown segment category '{s}'"))
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A configured source channel.
///
/// Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Slug key, also the media directory name
    pub name: String,
    pub display_name: String,
    pub url: String,
    pub max_episodes: u32,
    pub download_delay_hours: u32,
    pub refresh_interval_hours: u32,
    pub format: MediaFormat,
    pub quality: Quality,
    pub segment_categories: BTreeSet<SegmentCategory>,
    /// Start time of the last run that completed this channel
    pub last_refresh_at: Option<i64>,
    pub created_at: i64,
}

/// A downloaded item belonging to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Episode {
    pub channel: String,
    pub external_id: String,
    pub title: String,
    pub published_at: i64,
    pub duration_seconds: Option<i64>,
    pub description: String,
    pub file_path: PathBuf,
    /// Media file extension without the leading dot
    pub extension: String,
    pub file_size: u64,
    pub thumbnail_path: Option<PathBuf>,
    pub downloaded_at: i64,
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for channel queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ChannelRow {
    pub name: String,
    pub display_name: String,
    pub url: String,
    pub max_episodes: i64,
    pub download_delay_hours: i64,
    pub refresh_interval_hours: i64,
    pub format: String,
    pub quality: String,
    pub segment_categories: String,
    pub last_refresh_at: Option<i64>,
    pub created_at: i64,
}

impl ChannelRow {
    pub(crate) fn into_channel(self) -> Result<Channel, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            table: "channels",
            reason,
        };
        let bounded = |value: i64, column: &str| {
            u32::try_from(value).map_err(|_| corrupt(format!("{column} out of range: {value}")))
        };

        let segment_categories = self
            .segment_categories
            .split(',')
            .filter(|s| !s.is_empty())
            .map(SegmentCategory::from_str)
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(corrupt)?;

        Ok(Channel {
            max_episodes: bounded(self.max_episodes, "max_episodes")?,
            download_delay_hours: bounded(self.download_delay_hours, "download_delay_hours")?,
            refresh_interval_hours: bounded(self.refresh_interval_hours, "refresh_interval_hours")?,
            format: self.format.parse().map_err(corrupt)?,
            quality: self.quality.parse().map_err(corrupt)?,
            segment_categories,
            name: self.name,
            display_name: self.display_name,
            url: self.url,
            last_refresh_at: self.last_refresh_at,
            created_at: self.created_at,
        })
    }
}

/// Comma-joined category list as stored in the `channels` table
pub(crate) fn join_categories(categories: &BTreeSet<SegmentCategory>) -> String {
    categories
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Internal row type for episode queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EpisodeRow {
    pub channel: String,
    pub external_id: String,
    pub title: String,
    pub published_at: i64,
    pub duration_seconds: Option<i64>,
    pub description: String,
    pub file_path: String,
    pub extension: String,
    pub file_size: i64,
    pub thumbnail_path: Option<String>,
    pub downloaded_at: i64,
}

impl EpisodeRow {
    pub(crate) fn into_episode(self) -> Episode {
        Episode {
            channel: self.channel,
            external_id: self.external_id,
            title: self.title,
            published_at: self.published_at,
            duration_seconds: self.duration_seconds,
            description: self.description,
            file_path: PathBuf::from(self.file_path),
            extension: self.extension,
            file_size: u64::try_from(self.file_size).unwrap_or(0),
            thumbnail_path: self.thumbnail_path.map(PathBuf::from),
            downloaded_at: self.downloaded_at,
        }
    }
}
