use serde::{Deserialize, Serialize};

use super::{EncodeError, ListEntry, ParseError, SubscriptionList};
use crate::util::{clean_label, clean_text, normalize_url};

/// A JSON list element: a bare URL or an object with metadata.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonElement {
    Url(String),
    Object {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

/// Parses a JSON array of URL strings and/or `{url, title, description}` objects.
///
/// Unlike the text format, every element must carry a usable URL: the first
/// one that does not fails the whole list with [`ParseError::MissingUrl`].
pub fn parse_json(content: &str) -> Result<SubscriptionList, ParseError> {
    let elements: Vec<JsonElement> = serde_json::from_str(content)?;

    let mut entries = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        let (raw_url, title, description) = match element {
            JsonElement::Url(url) => (Some(url), None, None),
            JsonElement::Object {
                url,
                title,
                description,
            } => (url, title, description),
        };

        let url = raw_url.map(|u| normalize_url(&u)).unwrap_or_default();
        if url.is_empty() {
            return Err(ParseError::MissingUrl { index });
        }

        entries.push(ListEntry {
            url,
            title: title.as_deref().and_then(clean_label),
            description: description.as_deref().and_then(clean_text),
        });
    }

    Ok(SubscriptionList::from_entries(entries))
}

/// Renders an array of URL strings, the shape public clients expect.
pub fn encode_json(entries: &[ListEntry]) -> Result<String, EncodeError> {
    let urls: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
    Ok(serde_json::to_string(&urls)?)
}

#[derive(Serialize)]
struct DetailedEntry<'a> {
    url: &'a str,
    title: &'a str,
    description: &'a str,
}

/// Renders an array of `{url, title, description}` objects.
///
/// Missing metadata is emitted as an empty string so consumers see a
/// fixed shape.
pub fn encode_json_detailed(entries: &[ListEntry]) -> Result<String, EncodeError> {
    let detailed: Vec<DetailedEntry<'_>> = entries
        .iter()
        .map(|e| DetailedEntry {
            url: &e.url,
            title: e.title.as_deref().unwrap_or(""),
            description: e.description.as_deref().unwrap_or(""),
        })
        .collect();
    Ok(serde_json::to_string(&detailed)?)
}
