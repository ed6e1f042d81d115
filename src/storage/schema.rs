use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the durable store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `path` may be `:memory:` for an ephemeral store. In-memory databases
    /// use a single pooled connection; shared-cache memory databases report
    /// table locks immediately instead of honouring `busy_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Conflict` if the file is locked by another
    /// writer for longer than the busy timeout, `DatabaseError::Migration`
    /// if schema setup fails.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // SEC-010: Pre-create the database file user-only before the pool opens it
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().map_or(true, |p| p.as_os_str().is_empty() || p.exists()) {
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok(); // If creation fails, SQLite will report the error at connect_with.
            }
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks before
        // returning SQLITE_BUSY, which surfaces as DatabaseError::Conflict.
        let mut options = SqliteConnectOptions::from_str(&url)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);
        if !in_memory {
            // WAL lets readers proceed while one action log transaction writes
            options = options.journal_mode(SqliteJournalMode::Wal);
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| match e {
            DatabaseError::Conflict => DatabaseError::Conflict,
            other => DatabaseError::Migration(other.to_string()),
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Podcasts considered "the same show" across URL changes
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS podcast_groups (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS podcasts (
                id INTEGER PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                title TEXT,
                description TEXT,
                last_update INTEGER,
                group_id INTEGER REFERENCES podcast_groups(id) ON DELETE SET NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_podcasts_group ON podcasts(group_id)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_groups (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                uid TEXT NOT NULL,
                name TEXT NOT NULL,
                device_type TEXT NOT NULL DEFAULT 'unknown',
                sync_group_id INTEGER REFERENCES sync_groups(id) ON DELETE SET NULL,
                UNIQUE(user_id, uid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_devices_sync_group ON devices(sync_group_id)")
            .execute(&mut *tx)
            .await?;

        // Append-only action log: rows are never updated or deleted
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscription_actions (
                id INTEGER PRIMARY KEY,
                podcast_id INTEGER NOT NULL REFERENCES podcasts(id),
                device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
                action TEXT NOT NULL CHECK (action IN ('subscribe', 'unsubscribe')),
                timestamp INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Replay per device: latest action per podcast by (timestamp, id)
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscription_actions_device ON subscription_actions(device_id, podcast_id, timestamp DESC, id DESC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscription_actions_podcast ON subscription_actions(podcast_id, device_id)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY,
                podcast_id INTEGER NOT NULL REFERENCES podcasts(id),
                url TEXT UNIQUE NOT NULL,
                title TEXT,
                released INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodes_podcast_released ON episodes(podcast_id, released DESC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episode_actions (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                episode_id INTEGER NOT NULL REFERENCES episodes(id),
                device_id INTEGER REFERENCES devices(id) ON DELETE SET NULL,
                action TEXT NOT NULL CHECK (action IN ('new', 'download', 'play', 'stop', 'delete')),
                timestamp INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Listener counts: group by user within one episode
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episode_actions_episode ON episode_actions(episode_id, user_id, timestamp DESC, id DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // History: newest-first per user
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episode_actions_user ON episode_actions(user_id, timestamp DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Per-user podcast state; `revision` guards optimistic updates
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS podcast_user_states (
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                podcast_id INTEGER NOT NULL REFERENCES podcasts(id),
                revision INTEGER NOT NULL DEFAULT 0,
                public_subscription INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (user_id, podcast_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS podcast_tags (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                podcast_id INTEGER NOT NULL REFERENCES podcasts(id),
                tag TEXT NOT NULL,
                UNIQUE(user_id, podcast_id, tag)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_podcast_tags_podcast ON podcast_tags(podcast_id, id)")
            .execute(&mut *tx)
            .await?;

        // Commit all migrations atomically
        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_creates_schema() {
        let db = Database::open(":memory:").await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for expected in [
            "devices",
            "episode_actions",
            "episodes",
            "podcast_tags",
            "podcast_user_states",
            "podcasts",
            "subscription_actions",
            "users",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = std::env::temp_dir().join("podsync_schema_test_open");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.db");
        let _ = std::fs::remove_file(&path);

        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        drop(db);
        assert!(path.exists());

        // Re-open runs migrations again without error
        Database::open(path.to_str().unwrap()).await.unwrap();

        std::fs::remove_dir_all(&dir).ok();
    }
}
