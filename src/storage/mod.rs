mod channels;
mod episodes;
mod schema;
mod types;

pub use schema::Database;
pub use types::{Channel, Episode, MediaFormat, Quality, SegmentCategory, StoreError};
