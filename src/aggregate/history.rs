use serde::Serialize;

use crate::storage::{DeviceRef, EpisodeHistoryRow, SubscriptionHistoryRow};

/// One line of a user's history: a subscription change or an episode action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HistoryEntry {
    Subscription(SubscriptionHistoryRow),
    Episode(EpisodeHistoryRow),
}

impl HistoryEntry {
    pub fn timestamp(&self) -> i64 {
        match self {
            HistoryEntry::Subscription(row) => row.timestamp,
            HistoryEntry::Episode(row) => row.timestamp,
        }
    }

    pub fn podcast_id(&self) -> i64 {
        match self {
            HistoryEntry::Subscription(row) => row.podcast_id,
            HistoryEntry::Episode(row) => row.podcast_id,
        }
    }

    /// Device that produced the entry. Episode actions may carry none.
    pub fn device(&self) -> Option<&DeviceRef> {
        match self {
            HistoryEntry::Subscription(row) => Some(&row.device),
            HistoryEntry::Episode(row) => row.device.as_ref(),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            HistoryEntry::Subscription(row) => row.action.as_str(),
            HistoryEntry::Episode(row) => row.action.as_str(),
        }
    }
}

/// Merge two newest-first histories into one, newest first, keeping at most
/// `limit` entries. On equal timestamps subscription changes come first.
pub fn merge_history(
    subscriptions: Vec<SubscriptionHistoryRow>,
    episodes: Vec<EpisodeHistoryRow>,
    limit: usize,
) -> Vec<HistoryEntry> {
    let mut merged: Vec<HistoryEntry> = subscriptions
        .into_iter()
        .map(HistoryEntry::Subscription)
        .chain(episodes.into_iter().map(HistoryEntry::Episode))
        .collect();

    // Stable: each input's own order is kept for equal timestamps
    merged.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    merged.truncate(limit);
    merged
}
