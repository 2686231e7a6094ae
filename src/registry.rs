//! Channel settings validation.
//!
//! Incoming channel definitions arrive as loosely-typed drafts (from the HTTP
//! API or the CLI). They are checked here, field by field, before anything
//! reaches the database. Checks that need I/O (name uniqueness, URL
//! reachability) are done by the coordinator on top of these.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;

use crate::storage::{Channel, MediaFormat, Quality, SegmentCategory};
use crate::util::{slugify, validate_channel_url};

pub const MAX_EPISODES_RANGE: RangeInclusive<i64> = 1..=1000;
pub const DOWNLOAD_DELAY_RANGE: RangeInclusive<i64> = 0..=720;
pub const REFRESH_INTERVAL_RANGE: RangeInclusive<i64> = 1..=8760;
const DISPLAY_NAME_CHARS: RangeInclusive<usize> = 2..=100;
const NAME_CHARS: RangeInclusive<usize> = 2..=64;

// ============================================================================
// Error Types
// ============================================================================

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// All problems found in one channel definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError {
                field,
                message: message.into(),
            }],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid channel settings")?;
        for (i, e) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Collects field errors while a draft is checked.
#[derive(Default)]
struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn reject(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn bounded(
        &mut self,
        field: &'static str,
        value: Option<i64>,
        range: RangeInclusive<i64>,
        fallback: u32,
    ) -> u32 {
        match value {
            None => fallback,
            Some(v) if range.contains(&v) => u32::try_from(v).unwrap_or(fallback),
            Some(v) => {
                self.reject(
                    field,
                    format!("must be between {} and {}, got {v}", range.start(), range.end()),
                );
                fallback
            }
        }
    }

    fn display_name(&mut self, raw: &str) -> String {
        let trimmed = raw.trim();
        let chars = trimmed.chars().count();
        if !DISPLAY_NAME_CHARS.contains(&chars) {
            self.reject(
                "display_name",
                format!(
                    "must be {} to {} characters",
                    DISPLAY_NAME_CHARS.start(),
                    DISPLAY_NAME_CHARS.end()
                ),
            );
        }
        trimmed.to_string()
    }

    fn url(&mut self, raw: &str) -> String {
        match validate_channel_url(raw) {
            Ok(url) => url.to_string(),
            Err(e) => {
                self.reject("url", e.to_string());
                raw.trim().to_string()
            }
        }
    }

    fn format(&mut self, raw: Option<&str>, fallback: MediaFormat) -> MediaFormat {
        match raw.map(str::parse::<MediaFormat>) {
            None => fallback,
            Some(Ok(f)) => f,
            Some(Err(e)) => {
                self.reject("format", e);
                fallback
            }
        }
    }

    fn quality(&mut self, raw: Option<&str>, fallback: Quality) -> Quality {
        match raw.map(str::parse::<Quality>) {
            None => fallback,
            Some(Ok(q)) => q,
            Some(Err(e)) => {
                self.reject("quality", e);
                fallback
            }
        }
    }

    fn categories(&mut self, raw: &[String]) -> BTreeSet<SegmentCategory> {
        let mut set = BTreeSet::new();
        for item in raw {
            match item.trim().parse::<SegmentCategory>() {
                Ok(c) => {
                    set.insert(c);
                }
                Err(e) => self.reject("segment_categories", e),
            }
        }
        set
    }

    fn finish<T>(self, value: T) -> Result<T, ValidationError> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(ValidationError {
                errors: self.errors,
            })
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    NAME_CHARS.contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ============================================================================
// Drafts
// ============================================================================

/// Defaults applied to fields a draft leaves out.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDefaults {
    pub max_episodes: u32,
    pub download_delay_hours: u32,
    pub refresh_interval_hours: u32,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            max_episodes: 10,
            download_delay_hours: 6,
            refresh_interval_hours: 24,
        }
    }
}

/// A channel definition as submitted for creation.
///
/// `name` is derived from `display_name` when omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelDraft {
    pub name: Option<String>,
    pub display_name: String,
    pub url: String,
    pub max_episodes: Option<i64>,
    pub download_delay_hours: Option<i64>,
    pub refresh_interval_hours: Option<i64>,
    pub format: Option<String>,
    pub quality: Option<String>,
    pub segment_categories: Vec<String>,
}

impl ChannelDraft {
    /// Check every field and build the channel record.
    pub fn validate(
        self,
        defaults: &ChannelDefaults,
        created_at: i64,
    ) -> Result<Channel, ValidationError> {
        let mut check = Checker::default();

        let display_name = check.display_name(&self.display_name);
        let name = match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => slugify(&display_name),
        };
        if !is_valid_name(&name) {
            check.reject(
                "name",
                "must be 2 to 64 characters of lowercase letters, digits or underscores",
            );
        }

        let channel = Channel {
            name,
            url: check.url(&self.url),
            max_episodes: check.bounded(
                "max_episodes",
                self.max_episodes,
                MAX_EPISODES_RANGE,
                defaults.max_episodes,
            ),
            download_delay_hours: check.bounded(
                "download_delay_hours",
                self.download_delay_hours,
                DOWNLOAD_DELAY_RANGE,
                defaults.download_delay_hours,
            ),
            refresh_interval_hours: check.bounded(
                "refresh_interval_hours",
                self.refresh_interval_hours,
                REFRESH_INTERVAL_RANGE,
                defaults.refresh_interval_hours,
            ),
            format: check.format(self.format.as_deref(), MediaFormat::Video),
            quality: check.quality(self.quality.as_deref(), Quality::Max),
            segment_categories: check.categories(&self.segment_categories),
            display_name,
            last_refresh_at: None,
            created_at,
        };
        check.finish(channel)
    }
}

/// A partial edit of an existing channel. The name is immutable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelPatch {
    pub display_name: Option<String>,
    pub url: Option<String>,
    pub max_episodes: Option<i64>,
    pub download_delay_hours: Option<i64>,
    pub refresh_interval_hours: Option<i64>,
    pub format: Option<String>,
    pub quality: Option<String>,
    pub segment_categories: Option<Vec<String>>,
}

impl ChannelPatch {
    /// Apply the edit on top of `current`, validating only the changed fields.
    pub fn apply(self, current: &Channel) -> Result<Channel, ValidationError> {
        let mut check = Checker::default();

        let channel = Channel {
            name: current.name.clone(),
            display_name: match self.display_name {
                Some(d) => check.display_name(&d),
                None => current.display_name.clone(),
            },
            url: match self.url {
                Some(u) => check.url(&u),
                None => current.url.clone(),
            },
            max_episodes: check.bounded(
                "max_episodes",
                self.max_episodes,
                MAX_EPISODES_RANGE,
                current.max_episodes,
            ),
            download_delay_hours: check.bounded(
                "download_delay_hours",
                self.download_delay_hours,
                DOWNLOAD_DELAY_RANGE,
                current.download_delay_hours,
            ),
            refresh_interval_hours: check.bounded(
                "refresh_interval_hours",
                self.refresh_interval_hours,
                REFRESH_INTERVAL_RANGE,
                current.refresh_interval_hours,
            ),
            format: check.format(self.format.as_deref(), current.format),
            quality: check.quality(self.quality.as_deref(), current.quality),
            segment_categories: match self.segment_categories {
                Some(c) => check.categories(&c),
                None => current.segment_categories.clone(),
            },
            last_refresh_at: current.last_refresh_at,
            created_at: current.created_at,
        };
        check.finish(channel)
    }
}
