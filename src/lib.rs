//! tubecast: video channels republished as podcast feeds.
//!
//! A [`refresh::Coordinator`] polls configured channels through a
//! [`pipeline::ChannelLister`], hands new videos to a
//! [`pipeline::MediaProcessor`], records episodes in the [`storage`] layer
//! and enforces per-channel retention. [`feed::build_feed`] renders the
//! stored episodes as RSS, and [`api`] serves it all over HTTP.
pub mod api;
pub mod config;
pub mod feed;
pub mod pipeline;
pub mod refresh;
pub mod registry;
pub mod storage;
pub mod util;
