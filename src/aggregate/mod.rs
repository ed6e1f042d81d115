//! Shaping of aggregation query results for display.
//!
//! Storage answers the indexed lookups (listener counts, tag rows, history
//! rows); this module turns them into what clients see:
//!
//! - [`build_tag_cloud`] - case-folded, capped tag cloud with a "more" marker
//! - [`merge_history`] - subscription and episode history, newest first
//! - [`PodcastOverview`] - podcast page aggregate

mod history;
mod overview;
mod tags;

pub use history::{merge_history, HistoryEntry};
pub use overview::{summarize_episodes, EpisodeSummary, PodcastOverview, ViewerState};
pub use tags::{build_tag_cloud, merge_tags, remove_tag, TagCloudEntry, MORE_TAGS_MARKER};
