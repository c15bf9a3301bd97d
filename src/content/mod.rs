//! Content model: upstream feed entries, slugs and shaped song items.

pub mod entry;
pub mod item;
pub mod slug;
pub mod stanza;

pub use entry::{Entry, Feed};
pub use item::{RelatedSong, SeoMetadata, SnapshotError, SongSnapshot};
pub use slug::{normalize_slug, slugify};
