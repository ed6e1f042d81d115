use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::util::fold_case;

/// Display form of the "more tags exist" marker.
pub const MORE_TAGS_MARKER: &str = "...";

/// One entry of a podcast's tag cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TagCloudEntry {
    Tag { tag: String, is_own: bool },
    /// The cloud was truncated to the viewer's own tags.
    More,
}

impl TagCloudEntry {
    pub fn label(&self) -> &str {
        match self {
            TagCloudEntry::Tag { tag, .. } => tag,
            TagCloudEntry::More => MORE_TAGS_MARKER,
        }
    }
}

impl fmt::Display for TagCloudEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Build the tag cloud of a podcast.
///
/// `tags` are `(user_id, tag)` pairs in the order they were applied. Tags
/// that differ only in case are one entry, shown with the first-seen
/// casing; it is marked own when `viewer` applied it in any casing. Entries
/// are ordered by their case-folded text.
///
/// When there are more distinct tags than `cap`, only the viewer's own tags
/// are kept, followed by [`TagCloudEntry::More`].
pub fn build_tag_cloud(tags: &[(i64, String)], viewer: Option<i64>, cap: usize) -> Vec<TagCloudEntry> {
    let mut distinct: BTreeMap<String, (&str, bool)> = BTreeMap::new();
    for (user_id, tag) in tags {
        let own = viewer == Some(*user_id);
        distinct
            .entry(fold_case(tag))
            .and_modify(|(_, is_own)| *is_own |= own)
            .or_insert((tag.as_str(), own));
    }

    let truncated = distinct.len() > cap;
    let mut cloud: Vec<TagCloudEntry> = distinct
        .into_values()
        .filter(|&(_, is_own)| !truncated || is_own)
        .map(|(tag, is_own)| TagCloudEntry::Tag {
            tag: tag.to_owned(),
            is_own,
        })
        .collect();

    if truncated {
        cloud.push(TagCloudEntry::More);
    }
    cloud
}

/// Merge additional tags into an existing list, skipping any whose
/// case-folded form is already present.
pub fn merge_tags(existing: &mut Vec<String>, new_tags: impl IntoIterator<Item = String>) -> bool {
    let mut seen: HashSet<String> = existing.iter().map(|t| fold_case(t)).collect();
    let before = existing.len();
    for tag in new_tags {
        if seen.insert(fold_case(&tag)) {
            existing.push(tag);
        }
    }
    existing.len() != before
}

/// Remove a tag, matching case-insensitively. Returns whether anything was
/// removed.
pub fn remove_tag(existing: &mut Vec<String>, tag: &str) -> bool {
    let key = fold_case(tag);
    let before = existing.len();
    existing.retain(|t| fold_case(t) != key);
    existing.len() != before
}
