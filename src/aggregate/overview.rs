use std::collections::HashMap;

use serde::Serialize;

use super::history::HistoryEntry;
use super::tags::TagCloudEntry;
use crate::storage::{Device, Episode, EpisodeAction, Podcast};

/// An episode with its listener count and the viewer's latest action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeSummary {
    #[serde(flatten)]
    pub episode: Episode,
    pub listeners: i64,
    pub latest_action: Option<EpisodeAction>,
}

/// Everything shown about one podcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodcastOverview {
    pub podcast: Podcast,
    pub related: Vec<Podcast>,
    pub tags: Vec<TagCloudEntry>,
    pub episodes: Vec<EpisodeSummary>,
    pub max_listeners: i64,
    /// Present when the overview was requested by a known user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ViewerState>,
}

/// The viewer's relationship to the podcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerState {
    pub subscribed_devices: Vec<Device>,
    pub subscribe_targets: Vec<Device>,
    pub public_subscription: bool,
    pub history: Vec<HistoryEntry>,
}

/// Attach listener counts and latest actions to episodes, keeping their
/// order. Also returns the highest listener count (0 when none).
pub fn summarize_episodes(
    episodes: Vec<Episode>,
    listeners: &HashMap<i64, i64>,
    mut latest: HashMap<i64, EpisodeAction>,
) -> (Vec<EpisodeSummary>, i64) {
    let summaries: Vec<EpisodeSummary> = episodes
        .into_iter()
        .map(|episode| EpisodeSummary {
            listeners: listeners.get(&episode.id).copied().unwrap_or(0),
            latest_action: latest.remove(&episode.id),
            episode,
        })
        .collect();
    let max_listeners = summaries.iter().map(|s| s.listeners).max().unwrap_or(0);
    (summaries, max_listeners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EpisodeActionKind;

    fn episode(id: i64) -> Episode {
        Episode {
            id,
            podcast_id: 1,
            url: format!("http://a.com/{id}.mp3"),
            title: None,
            released: Some(id),
        }
    }

    #[test]
    fn test_summarize_episodes() {
        let listeners = HashMap::from([(1, 4), (3, 9)]);
        let latest = HashMap::from([(
            2,
            EpisodeAction {
                id: 7,
                user_id: 1,
                episode_id: 2,
                device_id: None,
                action: EpisodeActionKind::Download,
                timestamp: 5,
            },
        )]);

        let (summaries, max) =
            summarize_episodes(vec![episode(3), episode(2), episode(1)], &listeners, latest);
        assert_eq!(max, 9);
        let counts: Vec<i64> = summaries.iter().map(|s| s.listeners).collect();
        assert_eq!(counts, vec![9, 0, 4]);
        assert_eq!(
            summaries[1].latest_action.as_ref().map(|a| a.action),
            Some(EpisodeActionKind::Download)
        );
    }

    #[test]
    fn test_no_episodes() {
        let (summaries, max) = summarize_episodes(Vec::new(), &HashMap::new(), HashMap::new());
        assert!(summaries.is_empty());
        assert_eq!(max, 0);
    }
}
