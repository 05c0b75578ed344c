//! Library merge engine
//!
//! Reconciles a client-submitted snapshot against the stored one.
//!
//! - Manga are keyed by URL, chapters by (URL, chapter number).
//! - For a key present on both sides the entry with the strictly later
//!   `last_modified_at` wins; ties keep the server entry.
//! - Chapters are merged with the same rule whichever manga entry won, so a
//!   chapter present on only one side is always kept.
//! - Categories, sources and preferences carry no timestamp: the client
//!   copy overwrites the server copy.
//! - Duplicate keys in either input collapse to a single entry.
//!
//! The merge is pure: no I/O, no clock. Sync timestamps are stamped by the
//! caller.

use std::collections::HashMap;
use std::hash::Hash;

use super::types::{ChapterEntry, ChapterKey, LibrarySnapshot, MangaEntry};

/// Which side an entry was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeWinner {
    Client,
    Server,
}

/// Counters describing what a merge did, used for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Manga only the client had
    pub manga_added: usize,
    /// Manga where the client entry was newer
    pub manga_updated: usize,
    /// Chapters taken from the client (new or newer)
    pub chapters_updated: usize,
    /// Duplicate entries dropped from the inputs
    pub duplicates_collapsed: usize,
}

/// Merge `client` into `server`, returning the reconciled snapshot
pub fn merge(client: &LibrarySnapshot, server: &LibrarySnapshot) -> LibrarySnapshot {
    merge_with_stats(client, server).0
}

/// Same as [`merge`], also reporting what changed
pub fn merge_with_stats(
    client: &LibrarySnapshot,
    server: &LibrarySnapshot,
) -> (LibrarySnapshot, MergeStats) {
    let mut stats = MergeStats::default();

    let manga = merge_manga(&server.manga, &client.manga, &mut stats);

    let merged = LibrarySnapshot {
        manga,
        categories: overwrite_by_key(&server.categories, &client.categories, |c| c.name.clone()),
        sources: overwrite_by_key(&server.sources, &client.sources, |s| s.source_id),
        preferences: overwrite_by_key(&server.preferences, &client.preferences, |p| p.key.clone()),
        source_preferences: overwrite_by_key(
            &server.source_preferences,
            &client.source_preferences,
            |p| p.source_key.clone(),
        ),
        saved_searches: overwrite_by_key(&server.saved_searches, &client.saved_searches, |s| {
            (s.source, s.name.clone())
        }),
        created_at: server.created_at.or(client.created_at),
        updated_at: server.updated_at,
    };

    (merged, stats)
}

/// Pick between two entries sharing a key; `incoming` must be strictly newer
pub fn later_wins(existing_modified: i64, incoming_modified: i64) -> MergeWinner {
    if incoming_modified > existing_modified {
        MergeWinner::Client
    } else {
        MergeWinner::Server
    }
}

fn merge_manga(
    server: &[MangaEntry],
    client: &[MangaEntry],
    stats: &mut MergeStats,
) -> Vec<MangaEntry> {
    let mut merged: Vec<MangaEntry> = Vec::with_capacity(server.len() + client.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in server {
        match index.get(&entry.url) {
            Some(&i) => {
                stats.duplicates_collapsed += 1;
                let existing = std::mem::take(&mut merged[i]);
                let mut ignored = MergeStats::default();
                merged[i] = resolve_manga(existing, entry.clone(), &mut ignored);
            }
            None => {
                index.insert(entry.url.clone(), merged.len());
                merged.push(dedup_chapters(entry.clone(), stats));
            }
        }
    }

    for entry in client {
        match index.get(&entry.url) {
            Some(&i) => {
                let existing = std::mem::take(&mut merged[i]);
                merged[i] = resolve_manga(existing, entry.clone(), stats);
            }
            None => {
                index.insert(entry.url.clone(), merged.len());
                stats.manga_added += 1;
                let entry = dedup_chapters(entry.clone(), stats);
                stats.chapters_updated += entry.chapters.len();
                merged.push(entry);
            }
        }
    }

    merged
}

fn resolve_manga(existing: MangaEntry, incoming: MangaEntry, stats: &mut MergeStats) -> MangaEntry {
    let chapters = merge_chapters(&existing.chapters, &incoming.chapters, stats);

    let mut winner = match later_wins(existing.last_modified_at, incoming.last_modified_at) {
        MergeWinner::Client => {
            stats.manga_updated += 1;
            incoming
        }
        MergeWinner::Server => existing,
    };
    winner.chapters = chapters;
    winner
}

fn dedup_chapters(mut entry: MangaEntry, stats: &mut MergeStats) -> MangaEntry {
    let mut ignored = MergeStats::default();
    let before = entry.chapters.len();
    entry.chapters = merge_chapters(&entry.chapters, &[], &mut ignored);
    stats.duplicates_collapsed += before - entry.chapters.len();
    entry
}

fn merge_chapters(
    existing: &[ChapterEntry],
    incoming: &[ChapterEntry],
    stats: &mut MergeStats,
) -> Vec<ChapterEntry> {
    let mut merged: Vec<ChapterEntry> = Vec::with_capacity(existing.len() + incoming.len());
    let mut index = HashMap::new();

    for chapter in existing {
        upsert_chapter(&mut merged, &mut index, chapter);
    }
    for chapter in incoming {
        if upsert_chapter(&mut merged, &mut index, chapter) {
            stats.chapters_updated += 1;
        }
    }

    merged
}

/// Insert or replace by key; returns true when `chapter` ended up stored
fn upsert_chapter(
    merged: &mut Vec<ChapterEntry>,
    index: &mut HashMap<ChapterKey, usize>,
    chapter: &ChapterEntry,
) -> bool {
    match index.get(&chapter.key()) {
        Some(&i) => match later_wins(merged[i].last_modified_at, chapter.last_modified_at) {
            MergeWinner::Client => {
                merged[i] = chapter.clone();
                true
            }
            MergeWinner::Server => false,
        },
        None => {
            index.insert(chapter.key(), merged.len());
            merged.push(chapter.clone());
            true
        }
    }
}

/// Union by key where later occurrences (client after server) overwrite
/// earlier ones in place; first-seen order is kept.
fn overwrite_by_key<T, K, F>(server: &[T], client: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut merged: Vec<T> = Vec::with_capacity(server.len() + client.len());
    let mut index: HashMap<K, usize> = HashMap::new();

    for item in server.iter().chain(client.iter()) {
        match index.get(&key(item)) {
            Some(&i) => merged[i] = item.clone(),
            None => {
                index.insert(key(item), merged.len());
                merged.push(item.clone());
            }
        }
    }

    merged
}
