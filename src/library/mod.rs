//! Manga library model and merge engine
//!
//! A library snapshot is everything one account syncs: manga with chapter
//! read-state, categories, sources and preferences. The merge engine
//! reconciles a device's snapshot against the stored one with
//! last-writer-wins per entity.

mod merge;
mod types;

pub use merge::{later_wins, merge, merge_with_stats, MergeStats, MergeWinner};
pub use types::{
    Category, ChapterEntry, ChapterKey, Epoch, LibrarySnapshot, MangaEntry, Preference,
    SavedSearch, Source, SourcePreferences,
};
