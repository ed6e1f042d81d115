//! Subscription list formats: decoding uploads and encoding downloads.
//!
//! Clients exchange subscription lists in three formats:
//!
//! - [`ListFormat::Opml`] - OPML outline documents (desktop clients, legacy upload)
//! - [`ListFormat::Txt`] - one feed URL per line
//! - [`ListFormat::Json`] - an array of URL strings or `{url, title, description}` objects
//!
//! [`ListFormat::JsonDetailed`] reads like `json` but always writes the
//! object form, for callers that want titles back.
//!
//! Every parser yields a [`SubscriptionList`]: normalized URLs in input order,
//! duplicates coalesced. Every encoder takes a slice of [`ListEntry`] and
//! renders it back.

mod json;
mod opml;
mod text;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use json::{encode_json, encode_json_detailed, parse_json};
pub use opml::{encode_opml, parse_opml};
pub use text::{encode_text, parse_text};

// ============================================================================
// Error Types
// ============================================================================

/// Input bytes do not decode under the declared format.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Upload is not valid UTF-8.
    #[error("List is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// XML is malformed or not an OPML document.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// JSON is malformed or has the wrong shape.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A JSON element carries no usable feed URL.
    #[error("Entry {index} has no usable feed URL")]
    MissingUrl { index: usize },
}

/// Rendering a list failed. Only reachable through writer failures.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Failed to write OPML: {0}")]
    Xml(String),

    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The format selector was not one of `txt`, `opml`, `json`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unsupported list format: {0}")]
pub struct UnsupportedFormat(pub String);

// ============================================================================
// Format Selector
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFormat {
    Txt,
    Opml,
    Json,
    #[serde(rename = "json-detailed")]
    JsonDetailed,
}

impl ListFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListFormat::Txt => "txt",
            ListFormat::Opml => "opml",
            ListFormat::Json => "json",
            ListFormat::JsonDetailed => "json-detailed",
        }
    }

    /// MIME type the transport layer should send with an encoded list.
    pub fn content_type(&self) -> &'static str {
        match self {
            ListFormat::Txt => "text/plain",
            ListFormat::Opml => "text/xml",
            ListFormat::Json | ListFormat::JsonDetailed => "application/json",
        }
    }
}

impl fmt::Display for ListFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" => Ok(ListFormat::Txt),
            "opml" => Ok(ListFormat::Opml),
            "json" => Ok(ListFormat::Json),
            "json-detailed" => Ok(ListFormat::JsonDetailed),
            _ => Err(UnsupportedFormat(s.to_owned())),
        }
    }
}

// ============================================================================
// Declared Subscription List
// ============================================================================

/// One podcast in a subscription list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Normalized feed URL, never empty.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ListEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
        }
    }
}

/// A declared subscription list: unique normalized URLs in first-seen order.
///
/// When a URL occurs more than once, the later occurrence's title and
/// description replace earlier ones (fields it leaves empty are kept).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionList {
    entries: Vec<ListEntry>,
    positions: HashMap<String, usize>,
}

impl SubscriptionList {
    /// Build a list from entries whose URLs are already normalized.
    ///
    /// Entries with an empty URL are dropped.
    pub fn from_entries(entries: impl IntoIterator<Item = ListEntry>) -> Self {
        let mut coalesced: Vec<ListEntry> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for entry in entries {
            if entry.url.is_empty() {
                continue;
            }
            match positions.get(&entry.url) {
                Some(&pos) => {
                    let existing = &mut coalesced[pos];
                    if entry.title.is_some() {
                        existing.title = entry.title;
                    }
                    if entry.description.is_some() {
                        existing.description = entry.description;
                    }
                }
                None => {
                    positions.insert(entry.url.clone(), coalesced.len());
                    coalesced.push(entry);
                }
            }
        }

        Self {
            entries: coalesced,
            positions,
        }
    }

    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ListEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The declared URL set handed to reconciliation.
    pub fn urls(&self) -> BTreeSet<String> {
        self.entries.iter().map(|e| e.url.clone()).collect()
    }

    pub fn get(&self, url: &str) -> Option<&ListEntry> {
        self.positions.get(url).map(|&pos| &self.entries[pos])
    }
}

/// Decode an uploaded list in the given format.
pub fn parse(format: ListFormat, raw: &[u8]) -> Result<SubscriptionList, ParseError> {
    let content = std::str::from_utf8(raw)?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    match format {
        ListFormat::Opml => parse_opml(content),
        ListFormat::Txt => Ok(parse_text(content)),
        ListFormat::Json | ListFormat::JsonDetailed => parse_json(content),
    }
}

/// Render a list in the given format. `title` is only used by OPML.
pub fn encode(format: ListFormat, title: &str, entries: &[ListEntry]) -> Result<String, EncodeError> {
    match format {
        ListFormat::Opml => encode_opml(title, entries),
        ListFormat::Txt => Ok(encode_text(entries)),
        ListFormat::Json => encode_json(entries),
        ListFormat::JsonDetailed => encode_json_detailed(entries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(url: &str, title: Option<&str>) -> ListEntry {
        ListEntry {
            url: url.to_string(),
            title: title.map(str::to_string),
            description: None,
        }
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("txt".parse::<ListFormat>(), Ok(ListFormat::Txt));
        assert_eq!("OPML".parse::<ListFormat>(), Ok(ListFormat::Opml));
        assert_eq!(" json ".parse::<ListFormat>(), Ok(ListFormat::Json));
        assert_eq!(
            "json-detailed".parse::<ListFormat>(),
            Ok(ListFormat::JsonDetailed)
        );
        assert_eq!(
            "xml".parse::<ListFormat>(),
            Err(UnsupportedFormat("xml".to_string()))
        );
    }

    #[test]
    fn test_coalesce_keeps_first_position() {
        let list = SubscriptionList::from_entries(vec![
            entry("http://a.com/", None),
            entry("http://b.com/", None),
            entry("http://a.com/", None),
        ]);
        let urls: Vec<&str> = list.entries().iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["http://a.com/", "http://b.com/"]);
    }

    #[test]
    fn test_coalesce_last_metadata_wins() {
        let list = SubscriptionList::from_entries(vec![
            entry("http://a.com/", Some("First")),
            entry("http://a.com/", None),
            entry("http://a.com/", Some("Last")),
        ]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.entries()[0].title.as_deref(), Some("Last"));
        assert_eq!(list.get("http://a.com/").and_then(|e| e.title.as_deref()), Some("Last"));
        assert!(list.get("http://b.com/").is_none());
    }

    #[test]
    fn test_empty_urls_dropped() {
        let list = SubscriptionList::from_entries(vec![entry("", Some("x"))]);
        assert!(list.is_empty());
    }

    #[test]
    fn test_parse_rejects_invalid_utf8() {
        let result = parse(ListFormat::Txt, &[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(ParseError::Encoding(_))));
    }

    #[test]
    fn test_parse_strips_bom() {
        let raw = "\u{feff}http://example.com/rss\n".as_bytes();
        let list = parse(ListFormat::Txt, raw).unwrap();
        assert_eq!(list.entries()[0].url, "http://example.com/rss");
    }

    #[test]
    fn test_encode_dispatch() {
        let entries = vec![entry("http://a.com/rss", Some("A"))];
        assert_eq!(
            encode(ListFormat::Txt, "t", &entries).unwrap(),
            "http://a.com/rss"
        );
        assert_eq!(
            encode(ListFormat::Json, "t", &entries).unwrap(),
            r#"["http://a.com/rss"]"#
        );
        assert_eq!(
            encode(ListFormat::JsonDetailed, "t", &entries).unwrap(),
            r#"[{"url":"http://a.com/rss","title":"A","description":""}]"#
        );
        assert!(encode(ListFormat::Opml, "t", &entries)
            .unwrap()
            .contains(r#"xmlUrl="http://a.com/rss""#));
    }
}
