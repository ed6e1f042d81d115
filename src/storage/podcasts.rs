use sqlx::{Sqlite, SqliteConnection};

use super::schema::Database;
use super::types::{is_unique_violation, DatabaseError, Podcast, PodcastMetadata};

const PODCAST_COLUMNS: &str = "id, url, title, description, last_update, group_id";

/// Atomic insert-or-fetch of a podcast by normalized URL.
///
/// Runs on a caller-supplied connection so it can take part in a batch
/// transaction. Two writers racing on the same new URL both end up with the
/// same row: one inserts, the other hits `DO NOTHING` (or, on drivers that
/// surface it, a unique violation) and re-fetches.
pub(crate) async fn get_or_create_podcast_on(
    conn: &mut SqliteConnection,
    url: &str,
    metadata: &PodcastMetadata<'_>,
    now: i64,
) -> Result<i64, DatabaseError> {
    debug_assert!(!url.is_empty(), "podcast key must be a normalized, non-empty URL");

    let inserted: Result<Option<(i64,)>, sqlx::Error> = sqlx::query_as(
        r#"
        INSERT INTO podcasts (url, title, description, last_update)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(url) DO NOTHING
        RETURNING id
    "#,
    )
    .bind(url)
    .bind(metadata.title)
    .bind(metadata.description)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await;

    match inserted {
        Ok(Some((id,))) => {
            tracing::debug!(podcast_id = id, url = %url, "Created podcast");
            return Ok(id);
        }
        Ok(None) => {}
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!(url = %url, "Podcast created concurrently, re-fetching");
        }
        Err(e) => return Err(e.into()),
    }

    let (id,): (i64,) = sqlx::query_as::<Sqlite, (i64,)>("SELECT id FROM podcasts WHERE url = ?")
        .bind(url)
        .fetch_one(&mut *conn)
        .await?;

    // Fill metadata the first reference did not know about
    if metadata.title.is_some() || metadata.description.is_some() {
        sqlx::query(
            r#"
            UPDATE podcasts
            SET title = COALESCE(title, ?), description = COALESCE(description, ?)
            WHERE id = ? AND (title IS NULL OR description IS NULL)
        "#,
        )
        .bind(metadata.title)
        .bind(metadata.description)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(id)
}

impl Database {
    // ========================================================================
    // Podcast Operations
    // ========================================================================

    /// Get or create a podcast by its normalized URL.
    pub async fn get_or_create_podcast(
        &self,
        url: &str,
        metadata: &PodcastMetadata<'_>,
    ) -> Result<Podcast, DatabaseError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.pool.acquire().await?;
        let id = get_or_create_podcast_on(&mut conn, url, metadata, now).await?;
        drop(conn);
        self.get_podcast(id).await?.ok_or_else(|| DatabaseError::Corrupt {
            table: "podcasts",
            detail: format!("podcast {id} vanished after insert"),
        })
    }

    pub async fn get_podcast(&self, id: i64) -> Result<Option<Podcast>, DatabaseError> {
        let podcast = sqlx::query_as::<_, Podcast>(&format!(
            "SELECT {PODCAST_COLUMNS} FROM podcasts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(podcast)
    }

    pub async fn get_podcast_by_url(&self, url: &str) -> Result<Option<Podcast>, DatabaseError> {
        let podcast = sqlx::query_as::<_, Podcast>(&format!(
            "SELECT {PODCAST_COLUMNS} FROM podcasts WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(podcast)
    }

    // ========================================================================
    // Podcast Group Operations
    // ========================================================================

    /// Group podcasts as one show. Members already in another group move.
    pub async fn create_podcast_group(
        &self,
        title: &str,
        podcast_ids: &[i64],
    ) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let (group_id,): (i64,) =
            sqlx::query_as("INSERT INTO podcast_groups (title) VALUES (?) RETURNING id")
                .bind(title)
                .fetch_one(&mut *tx)
                .await?;

        for podcast_id in podcast_ids {
            sqlx::query("UPDATE podcasts SET group_id = ? WHERE id = ?")
                .bind(group_id)
                .bind(podcast_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(group_id)
    }

    /// Other podcasts in the same group, ordered by URL.
    pub async fn related_podcasts(&self, podcast: &Podcast) -> Result<Vec<Podcast>, DatabaseError> {
        let Some(group_id) = podcast.group_id else {
            return Ok(Vec::new());
        };
        let related = sqlx::query_as::<_, Podcast>(&format!(
            "SELECT {PODCAST_COLUMNS} FROM podcasts WHERE group_id = ? AND id != ? ORDER BY url"
        ))
        .bind(group_id)
        .bind(podcast.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(related)
    }
}
