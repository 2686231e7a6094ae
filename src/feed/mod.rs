//! Podcast feed rendering.

mod builder;

pub use builder::{build_feed, enclosure_url, feed_url, mime_type};
