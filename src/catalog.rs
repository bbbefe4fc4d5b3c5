//! Catalog of video items to download.
//!
//! A catalog is either a JSON array of items or a plain list of URLs, one per
//! line. The core never interprets item fields beyond using `url` as the
//! fetch target; `quality` only drives selection and `depth` is carried
//! through to the download unchanged.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors raised while reading a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("cannot read catalog {path}: {source}")]
    Read {
        /// The catalog path.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A JSON catalog is malformed.
    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// An entry does not hold an absolute http(s) URL.
    #[error("invalid URL on entry {index}: {value}")]
    InvalidUrl {
        /// Zero-based entry index (line number for plain lists).
        index: usize,
        /// The offending text.
        value: String,
    },
}

/// One downloadable video item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoItem {
    /// Media URL to fetch.
    pub url: Url,
    /// Quality label of this variant, if the source declares one.
    #[serde(default)]
    pub quality: Option<String>,
    /// Opaque caller metadata.
    #[serde(default)]
    pub depth: u32,
}

impl VideoItem {
    /// Creates an item without quality and depth 0.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            quality: None,
            depth: 0,
        }
    }
}

/// Parses a catalog: a JSON array when the text starts with `[`, otherwise
/// one URL per line with blank lines and `#` comments skipped.
///
/// # Errors
///
/// Returns [`CatalogError`] for malformed JSON or entries that are not
/// absolute http(s) URLs.
pub fn parse_catalog(text: &str) -> Result<Vec<VideoItem>, CatalogError> {
    let trimmed = text.trim_start();
    let items = if trimmed.starts_with('[') {
        let items: Vec<VideoItem> = serde_json::from_str(trimmed)?;
        for (index, item) in items.iter().enumerate() {
            if !is_http(&item.url) {
                return Err(CatalogError::InvalidUrl {
                    index,
                    value: item.url.to_string(),
                });
            }
        }
        items
    } else {
        text.lines()
            .enumerate()
            .map(|(index, line)| (index, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .map(|(index, line)| parse_url(index, line).map(VideoItem::new))
            .collect::<Result<Vec<_>, _>>()?
    };
    debug!(count = items.len(), "parsed catalog");
    Ok(items)
}

/// Reads and parses a catalog file.
///
/// # Errors
///
/// Returns [`CatalogError::Read`] if the file cannot be read, or a parse error.
pub fn load_catalog(path: &Path) -> Result<Vec<VideoItem>, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_catalog(&text)
}

/// Parses one absolute http(s) URL.
///
/// # Errors
///
/// Returns [`CatalogError::InvalidUrl`] for anything else.
pub fn parse_url(index: usize, value: &str) -> Result<Url, CatalogError> {
    Url::parse(value)
        .ok()
        .filter(is_http)
        .ok_or_else(|| CatalogError::InvalidUrl {
            index,
            value: value.to_string(),
        })
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Keeps items matching `preferred` quality (case-insensitive) plus items
/// that declare no quality. Without a preference every item is kept.
#[must_use]
pub fn select_quality(items: Vec<VideoItem>, preferred: Option<&str>) -> Vec<VideoItem> {
    let Some(preferred) = preferred else {
        return items;
    };
    items
        .into_iter()
        .filter(|item| {
            item.quality
                .as_deref()
                .is_none_or(|quality| quality.eq_ignore_ascii_case(preferred))
        })
        .collect()
}
