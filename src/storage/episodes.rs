use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite};

use super::schema::Database;
use super::types::{
    DatabaseError, DeviceRef, Episode, EpisodeAction, EpisodeActionKind, EpisodeHistoryRow,
    EpisodeHistoryTuple,
};

const EPISODE_COLUMNS: &str = "id, podcast_id, url, title, released";

impl Database {
    // ========================================================================
    // Episode Operations
    // ========================================================================

    /// Insert an episode or update its title/release date, keyed by URL.
    pub async fn upsert_episode(
        &self,
        podcast_id: i64,
        url: &str,
        title: Option<&str>,
        released: Option<i64>,
    ) -> Result<Episode, DatabaseError> {
        let episode = sqlx::query_as::<_, Episode>(&format!(
            r#"
            INSERT INTO episodes (podcast_id, url, title, released)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = COALESCE(excluded.title, episodes.title),
                released = COALESCE(excluded.released, episodes.released)
            RETURNING {EPISODE_COLUMNS}
        "#
        ))
        .bind(podcast_id)
        .bind(url)
        .bind(title)
        .bind(released)
        .fetch_one(&self.pool)
        .await?;
        Ok(episode)
    }

    pub async fn get_episode(&self, id: i64) -> Result<Option<Episode>, DatabaseError> {
        let episode = sqlx::query_as::<_, Episode>(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(episode)
    }

    /// Episodes of a podcast, newest release first.
    pub async fn episodes_for_podcast(&self, podcast_id: i64) -> Result<Vec<Episode>, DatabaseError> {
        let episodes = sqlx::query_as::<_, Episode>(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE podcast_id = ? ORDER BY released DESC, id DESC"
        ))
        .bind(podcast_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(episodes)
    }

    // ========================================================================
    // Episode Action Operations
    // ========================================================================

    /// Append an episode action. Actions are immutable once written.
    pub async fn record_episode_action(
        &self,
        user_id: i64,
        episode_id: i64,
        device_id: Option<i64>,
        action: EpisodeActionKind,
        timestamp: i64,
    ) -> Result<EpisodeAction, DatabaseError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO episode_actions (user_id, episode_id, device_id, action, timestamp)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(user_id)
        .bind(episode_id)
        .bind(device_id)
        .bind(action.as_str())
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(EpisodeAction {
            id,
            user_id,
            episode_id,
            device_id,
            action,
            timestamp,
        })
    }

    /// Number of distinct users whose latest playback-related action on the
    /// episode is `play`. Zero for episodes without actions.
    pub async fn listener_count(&self, episode_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM (
                SELECT action,
                       ROW_NUMBER() OVER (
                           PARTITION BY user_id ORDER BY timestamp DESC, id DESC
                       ) AS rn
                FROM episode_actions
                WHERE episode_id = ? AND action IN ('play', 'stop')
            )
            WHERE rn = 1 AND action = 'play'
        "#,
        )
        .bind(episode_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Listener counts for every episode of a podcast that has at least one
    /// listener.
    pub async fn listener_counts(&self, podcast_id: i64) -> Result<HashMap<i64, i64>, DatabaseError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT episode_id, COUNT(*) FROM (
                SELECT ea.episode_id, ea.action,
                       ROW_NUMBER() OVER (
                           PARTITION BY ea.episode_id, ea.user_id
                           ORDER BY ea.timestamp DESC, ea.id DESC
                       ) AS rn
                FROM episodes e
                JOIN episode_actions ea ON ea.episode_id = e.id
                WHERE e.podcast_id = ? AND ea.action IN ('play', 'stop')
            )
            WHERE rn = 1 AND action = 'play'
            GROUP BY episode_id
        "#,
        )
        .bind(podcast_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// A user's most recent action on each episode of a podcast.
    pub async fn latest_episode_actions(
        &self,
        user_id: i64,
        podcast_id: i64,
    ) -> Result<HashMap<i64, EpisodeAction>, DatabaseError> {
        let rows: Vec<(i64, i64, Option<i64>, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, episode_id, device_id, action, timestamp FROM (
                SELECT ea.id, ea.episode_id, ea.device_id, ea.action, ea.timestamp,
                       ROW_NUMBER() OVER (
                           PARTITION BY ea.episode_id ORDER BY ea.timestamp DESC, ea.id DESC
                       ) AS rn
                FROM episodes e
                JOIN episode_actions ea ON ea.episode_id = e.id
                WHERE e.podcast_id = ? AND ea.user_id = ?
            )
            WHERE rn = 1
        "#,
        )
        .bind(podcast_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, episode_id, device_id, action, timestamp)| {
                Ok((
                    episode_id,
                    EpisodeAction {
                        id,
                        user_id,
                        episode_id,
                        device_id,
                        action: action.parse()?,
                        timestamp,
                    },
                ))
            })
            .collect()
    }

    /// Episode actions of a user, newest first, with episode, podcast and
    /// device details.
    pub async fn episode_history(
        &self,
        user_id: i64,
        podcast_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<EpisodeHistoryRow>, DatabaseError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT ea.id, ea.timestamp, ea.action, p.id, p.url, p.title,
                   e.id, e.url, e.title, d.id, d.uid, d.name
            FROM episode_actions ea
            JOIN episodes e ON e.id = ea.episode_id
            JOIN podcasts p ON p.id = e.podcast_id
            LEFT JOIN devices d ON d.id = ea.device_id
            WHERE ea.user_id = "#,
        );
        builder.push_bind(user_id);
        if let Some(podcast_id) = podcast_id {
            builder.push(" AND e.podcast_id = ");
            builder.push_bind(podcast_id);
        }
        builder.push(" ORDER BY ea.timestamp DESC, ea.id DESC LIMIT ");
        builder.push_bind(limit);

        let rows: Vec<EpisodeHistoryTuple> = builder.build_query_as().fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(
                |(
                    action_id,
                    timestamp,
                    action,
                    podcast_id,
                    podcast_url,
                    podcast_title,
                    episode_id,
                    episode_url,
                    episode_title,
                    device_id,
                    device_uid,
                    device_name,
                )| {
                    let device = match (device_id, device_uid, device_name) {
                        (Some(id), Some(uid), Some(name)) => Some(DeviceRef { id, uid, name }),
                        _ => None,
                    };
                    Ok(EpisodeHistoryRow {
                        action_id,
                        timestamp,
                        action: action.parse()?,
                        podcast_id,
                        podcast_url,
                        podcast_title,
                        episode_id,
                        episode_url,
                        episode_title,
                        device,
                    })
                },
            )
            .collect()
    }
}
