//! Library snapshot types
//!
//! Mirrors the backup JSON a reader app uploads: manga with their chapters,
//! categories, sources and preferences. Core fields are typed; any other
//! field the client sends is kept in `extra` so it survives a round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Client-supplied modification time, seconds since the Unix epoch.
pub type Epoch = i64;

/// Full library state of one account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    #[serde(rename = "backupManga", default)]
    pub manga: Vec<MangaEntry>,

    #[serde(rename = "backupCategories", default)]
    pub categories: Vec<Category>,

    #[serde(rename = "backupSources", default)]
    pub sources: Vec<Source>,

    #[serde(rename = "backupPreferences", default)]
    pub preferences: Vec<Preference>,

    #[serde(rename = "backupSourcePreferences", default)]
    pub source_preferences: Vec<SourcePreferences>,

    #[serde(rename = "backupSavedSearches", default)]
    pub saved_searches: Vec<SavedSearch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LibrarySnapshot {
    /// True when the snapshot carries no library content at all
    pub fn is_empty(&self) -> bool {
        self.manga.is_empty()
            && self.categories.is_empty()
            && self.sources.is_empty()
            && self.preferences.is_empty()
            && self.source_preferences.is_empty()
            && self.saved_searches.is_empty()
    }

    /// Look up a manga by URL
    pub fn find_manga(&self, url: &str) -> Option<&MangaEntry> {
        self.manga.iter().find(|m| m.url == url)
    }
}

/// A manga in the library, identified by its URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MangaEntry {
    #[serde(default)]
    pub source: i64,

    pub url: String,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub genre: Vec<String>,

    #[serde(default)]
    pub status: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    #[serde(default)]
    pub date_added: i64,

    #[serde(default)]
    pub favorite: bool,

    /// Category order values this manga belongs to
    #[serde(default)]
    pub categories: Vec<i64>,

    #[serde(default)]
    pub chapters: Vec<ChapterEntry>,

    #[serde(default, deserialize_with = "lenient_epoch")]
    pub last_modified_at: Epoch,

    /// Fields the server does not interpret (tracking, history, flags, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A chapter of a manga, identified by (URL, chapter number)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterEntry {
    pub url: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanlator: Option<String>,

    #[serde(default)]
    pub read: bool,

    #[serde(default)]
    pub bookmark: bool,

    #[serde(default)]
    pub last_page_read: i64,

    #[serde(default)]
    pub date_fetch: i64,

    #[serde(default)]
    pub date_upload: i64,

    #[serde(default)]
    pub chapter_number: f32,

    #[serde(default)]
    pub source_order: i64,

    #[serde(default, deserialize_with = "lenient_epoch")]
    pub last_modified_at: Epoch,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Hashable chapter identity: URL plus the bit pattern of the chapter number
pub type ChapterKey = (String, u32);

impl ChapterEntry {
    pub fn key(&self) -> ChapterKey {
        // -0.0 and 0.0 are the same chapter; every NaN collapses to one key
        let number = if self.chapter_number == 0.0 {
            0.0f32
        } else if self.chapter_number.is_nan() {
            f32::NAN
        } else {
            self.chapter_number
        };
        (self.url.clone(), number.to_bits())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub flags: i64,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default)]
    pub name: String,
    pub source_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePreferences {
    pub source_key: String,
    #[serde(default)]
    pub prefs: Vec<Preference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSearch {
    pub name: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub filter_list: String,
    #[serde(default)]
    pub source: i64,
}

/// Accept integers, floats and numeric strings; anything else reads as 0
fn lenient_epoch<'de, D>(deserializer: D) -> Result<Epoch, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(epoch_from_value(&value))
}

fn epoch_from_value(value: &Value) -> Epoch {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}
