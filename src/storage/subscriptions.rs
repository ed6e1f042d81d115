use std::collections::BTreeSet;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, Transaction};

use super::devices::{get_or_create_device_on, scope_device_ids_on};
use super::podcasts::get_or_create_podcast_on;
use super::schema::Database;
use super::types::{
    DatabaseError, Device, DeviceRef, NewDevice, Podcast, PodcastMetadata, SubscriptionAction,
    SubscriptionActionKind, SubscriptionHistoryRow, SubscriptionHistoryTuple,
};

/// Appends one row to the action log. The only write path into
/// `subscription_actions`; rows are never updated afterwards.
async fn append_action_on(
    conn: &mut SqliteConnection,
    podcast_id: i64,
    device_id: i64,
    action: SubscriptionActionKind,
    timestamp: i64,
) -> Result<SubscriptionAction, DatabaseError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO subscription_actions (podcast_id, device_id, action, timestamp)
        VALUES (?, ?, ?, ?)
        RETURNING id
    "#,
    )
    .bind(podcast_id)
    .bind(device_id)
    .bind(action.as_str())
    .bind(timestamp)
    .fetch_one(&mut *conn)
    .await?;

    Ok(SubscriptionAction {
        id,
        podcast_id,
        device_id,
        action,
        timestamp,
    })
}

/// Replays the log over `device_ids`: podcasts whose latest action, ordered
/// by `(timestamp, id)`, is a subscribe.
async fn replay_on(
    conn: &mut SqliteConnection,
    device_ids: &[i64],
) -> Result<Vec<Podcast>, DatabaseError> {
    if device_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT p.id, p.url, p.title, p.description, p.last_update, p.group_id
        FROM (
            SELECT podcast_id, action,
                   ROW_NUMBER() OVER (
                       PARTITION BY podcast_id ORDER BY timestamp DESC, id DESC
                   ) AS rn
            FROM subscription_actions
            WHERE device_id IN ("#,
    );
    let mut separated = builder.separated(", ");
    for id in device_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(
        r#")
        ) latest
        JOIN podcasts p ON p.id = latest.podcast_id
        WHERE latest.rn = 1 AND latest.action = 'subscribe'
        ORDER BY p.url"#,
    );

    let podcasts = builder
        .build_query_as::<Podcast>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(podcasts)
}

/// A write transaction over one device's action log.
///
/// Reads and appends happen inside one `BEGIN IMMEDIATE` transaction, which
/// takes the write lock up front: concurrent writers queue on
/// `busy_timeout` and only surface [`DatabaseError::Conflict`] once it
/// expires. Dropping without [`commit`](Self::commit) rolls back every
/// append.
pub struct ActionLogTx {
    tx: Transaction<'static, Sqlite>,
    device: Device,
    scope: Vec<i64>,
}

impl ActionLogTx {
    /// Effective current subscription set: the log replayed over the
    /// device's sync group (or the device alone).
    pub async fn current(&mut self) -> Result<Vec<Podcast>, DatabaseError> {
        replay_on(&mut self.tx, &self.scope).await
    }

    /// URLs of [`current`](Self::current).
    pub async fn current_urls(&mut self) -> Result<BTreeSet<String>, DatabaseError> {
        Ok(self.current().await?.into_iter().map(|p| p.url).collect())
    }

    /// Append an action for a podcast URL, creating the podcast if needed.
    pub async fn append(
        &mut self,
        url: &str,
        metadata: &PodcastMetadata<'_>,
        action: SubscriptionActionKind,
        timestamp: i64,
    ) -> Result<SubscriptionAction, DatabaseError> {
        let podcast_id = get_or_create_podcast_on(&mut self.tx, url, metadata, timestamp).await?;
        append_action_on(&mut self.tx, podcast_id, self.device.id, action, timestamp).await
    }

    pub async fn commit(self) -> Result<(), DatabaseError> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl Database {
    // ========================================================================
    // Action Log Operations
    // ========================================================================

    /// Open a write transaction over `device`'s action log.
    pub async fn begin_action_log(&self, device: &Device) -> Result<ActionLogTx, DatabaseError> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let scope = scope_device_ids_on(&mut tx, device).await?;
        Ok(ActionLogTx {
            tx,
            device: device.clone(),
            scope,
        })
    }

    /// Record a single subscription action.
    ///
    /// The podcast (by normalized URL) and the device (by uid) are created
    /// if absent. Replaying an identical action is harmless: state is
    /// derived from the latest action only.
    pub async fn record_action(
        &self,
        user_id: i64,
        device: &NewDevice<'_>,
        podcast_url: &str,
        metadata: &PodcastMetadata<'_>,
        action: SubscriptionActionKind,
        timestamp: i64,
    ) -> Result<SubscriptionAction, DatabaseError> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let device = get_or_create_device_on(&mut tx, user_id, device).await?;
        let podcast_id = get_or_create_podcast_on(&mut tx, podcast_url, metadata, timestamp).await?;
        let recorded = append_action_on(&mut tx, podcast_id, device.id, action, timestamp).await?;
        tx.commit().await?;

        tracing::debug!(
            user_id,
            device = %device.uid,
            podcast_id,
            action = %action,
            "Recorded subscription action"
        );
        Ok(recorded)
    }

    /// Current subscription set of exactly one device, ordered by URL.
    pub async fn current_subscriptions(&self, device_id: i64) -> Result<Vec<Podcast>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        replay_on(&mut conn, &[device_id]).await
    }

    /// Subscription set shared by `device`'s sync group, ordered by URL.
    /// Equal to [`current_subscriptions`](Self::current_subscriptions) for
    /// ungrouped devices.
    pub async fn effective_subscriptions(&self, device: &Device) -> Result<Vec<Podcast>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let scope = scope_device_ids_on(&mut conn, device).await?;
        replay_on(&mut conn, &scope).await
    }

    /// Whether `device` (through its sync group) is subscribed to a podcast.
    pub async fn is_effectively_subscribed(
        &self,
        device: &Device,
        podcast_id: i64,
    ) -> Result<bool, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let scope = scope_device_ids_on(&mut conn, device).await?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT action FROM subscription_actions WHERE podcast_id = ",
        );
        builder.push_bind(podcast_id);
        builder.push(" AND device_id IN (");
        let mut separated = builder.separated(", ");
        for id in &scope {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY timestamp DESC, id DESC LIMIT 1");

        let latest: Option<(String,)> = builder.build_query_as().fetch_optional(&mut *conn).await?;
        match latest {
            Some((action,)) => Ok(action.parse::<SubscriptionActionKind>()?
                == SubscriptionActionKind::Subscribe),
            None => Ok(false),
        }
    }

    /// A user's devices currently subscribed to a podcast (per-device log).
    pub async fn subscribed_devices(
        &self,
        user_id: i64,
        podcast_id: i64,
    ) -> Result<Vec<Device>, DatabaseError> {
        let devices = sqlx::query_as::<_, Device>(
            r#"
            SELECT d.id, d.user_id, d.uid, d.name, d.device_type, d.sync_group_id
            FROM devices d
            WHERE d.user_id = ?
              AND (
                SELECT a.action FROM subscription_actions a
                WHERE a.device_id = d.id AND a.podcast_id = ?
                ORDER BY a.timestamp DESC, a.id DESC
                LIMIT 1
              ) = 'subscribe'
            ORDER BY d.uid
        "#,
        )
        .bind(user_id)
        .bind(podcast_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }

    /// The raw log for one device, oldest first.
    pub async fn actions_for_device(
        &self,
        device_id: i64,
    ) -> Result<Vec<SubscriptionAction>, DatabaseError> {
        let rows: Vec<(i64, i64, i64, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, podcast_id, device_id, action, timestamp
            FROM subscription_actions
            WHERE device_id = ?
            ORDER BY timestamp, id
        "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, podcast_id, device_id, action, timestamp)| {
                Ok(SubscriptionAction {
                    id,
                    podcast_id,
                    device_id,
                    action: action.parse()?,
                    timestamp,
                })
            })
            .collect()
    }

    /// Subscription actions across all of a user's devices, newest first.
    pub async fn subscription_history(
        &self,
        user_id: i64,
        podcast_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<SubscriptionHistoryRow>, DatabaseError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT a.id, a.timestamp, a.action, p.id, p.url, p.title, d.id, d.uid, d.name
            FROM devices d
            JOIN subscription_actions a ON a.device_id = d.id
            JOIN podcasts p ON p.id = a.podcast_id
            WHERE d.user_id = "#,
        );
        builder.push_bind(user_id);
        if let Some(podcast_id) = podcast_id {
            builder.push(" AND a.podcast_id = ");
            builder.push_bind(podcast_id);
        }
        builder.push(" ORDER BY a.timestamp DESC, a.id DESC LIMIT ");
        builder.push_bind(limit);

        let rows: Vec<SubscriptionHistoryTuple> =
            builder.build_query_as().fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(
                |(action_id, timestamp, action, podcast_id, podcast_url, podcast_title, device_id, uid, name)| {
                    Ok(SubscriptionHistoryRow {
                        action_id,
                        timestamp,
                        action: action.parse()?,
                        podcast_id,
                        podcast_url,
                        podcast_title,
                        device: DeviceRef {
                            id: device_id,
                            uid,
                            name,
                        },
                    })
                },
            )
            .collect()
    }
}
