//! Small helpers shared by the registry, the feed builder and the adapters.
//!
//! - **URL validation**: which channel source URLs are accepted
//! - **Text processing**: control-character stripping, slugs, durations

mod text;
mod url_validator;

pub use text::{format_duration, slugify, strip_control_chars};
pub use url_validator::{validate_channel_url, UrlValidationError};
