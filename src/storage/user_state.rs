use std::collections::{BTreeMap, BTreeSet};

use super::schema::Database;
use super::types::{DatabaseError, PodcastUserState};

impl Database {
    // ========================================================================
    // Per-user Podcast State
    // ========================================================================

    /// Load a user's state for a podcast, creating the default row on first
    /// access. The returned `revision` must be handed back to
    /// [`Database::save_podcast_state`].
    pub async fn load_podcast_state(
        &self,
        user_id: i64,
        podcast_id: i64,
    ) -> Result<PodcastUserState, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO podcast_user_states (user_id, podcast_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(podcast_id)
        .execute(&mut *tx)
        .await?;

        let (revision, public_subscription): (i64, bool) = sqlx::query_as(
            "SELECT revision, public_subscription FROM podcast_user_states WHERE user_id = ? AND podcast_id = ?",
        )
        .bind(user_id)
        .bind(podcast_id)
        .fetch_one(&mut *tx)
        .await?;

        let tags: Vec<(String,)> = sqlx::query_as(
            "SELECT tag FROM podcast_tags WHERE user_id = ? AND podcast_id = ? ORDER BY id",
        )
        .bind(user_id)
        .bind(podcast_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PodcastUserState {
            user_id,
            podcast_id,
            revision,
            public_subscription,
            tags: tags.into_iter().map(|(t,)| t).collect(),
        })
    }

    /// Write back a modified state.
    ///
    /// Fails with [`DatabaseError::Conflict`] when the stored revision no
    /// longer matches `state.revision`, i.e. another writer saved first.
    /// Returns the new revision.
    pub async fn save_podcast_state(&self, state: &PodcastUserState) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE podcast_user_states
            SET revision = revision + 1, public_subscription = ?
            WHERE user_id = ? AND podcast_id = ? AND revision = ?
        "#,
        )
        .bind(state.public_subscription)
        .bind(state.user_id)
        .bind(state.podcast_id)
        .bind(state.revision)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                user_id = state.user_id,
                podcast_id = state.podcast_id,
                revision = state.revision,
                "Stale podcast state"
            );
            return Err(DatabaseError::Conflict);
        }

        // Diff against the stored rows so surviving tags keep their ids,
        // which order "first seen" across users.
        let stored: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, tag FROM podcast_tags WHERE user_id = ? AND podcast_id = ?",
        )
        .bind(state.user_id)
        .bind(state.podcast_id)
        .fetch_all(&mut *tx)
        .await?;

        for (id, tag) in &stored {
            if !state.tags.contains(tag) {
                sqlx::query("DELETE FROM podcast_tags WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for tag in &state.tags {
            if stored.iter().any(|(_, t)| t == tag) {
                continue;
            }
            sqlx::query(
                "INSERT INTO podcast_tags (user_id, podcast_id, tag) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(state.user_id)
            .bind(state.podcast_id)
            .bind(tag)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(state.revision + 1)
    }

    /// Every tag on a podcast as `(user_id, tag)`, in the order they were
    /// first applied.
    pub async fn podcast_tags(&self, podcast_id: i64) -> Result<Vec<(i64, String)>, DatabaseError> {
        let rows = sqlx::query_as("SELECT user_id, tag FROM podcast_tags WHERE podcast_id = ? ORDER BY id")
            .bind(podcast_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// A user's tags, grouped by podcast.
    pub async fn tags_for_user(
        &self,
        user_id: i64,
    ) -> Result<BTreeMap<i64, BTreeSet<String>>, DatabaseError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT podcast_id, tag FROM podcast_tags WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        let mut tags: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
        for (podcast_id, tag) in rows {
            tags.entry(podcast_id).or_default().insert(tag);
        }
        Ok(tags)
    }
}
