use sqlx::{QueryBuilder, SqliteConnection};

use super::schema::Database;
use super::types::{is_unique_violation, DatabaseError, Device, NewDevice};

const DEVICE_COLUMNS: &str = "id, user_id, uid, name, device_type, sync_group_id";

/// Atomic insert-or-fetch of a device by `(user, uid)`.
///
/// `defaults` only apply when the device is created.
pub(crate) async fn get_or_create_device_on(
    conn: &mut SqliteConnection,
    user_id: i64,
    defaults: &NewDevice<'_>,
) -> Result<Device, DatabaseError> {
    let inserted: Result<Option<Device>, sqlx::Error> = sqlx::query_as(&format!(
        r#"
        INSERT INTO devices (user_id, uid, name, device_type)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id, uid) DO NOTHING
        RETURNING {DEVICE_COLUMNS}
    "#
    ))
    .bind(user_id)
    .bind(defaults.uid)
    .bind(defaults.name)
    .bind(defaults.device_type)
    .fetch_optional(&mut *conn)
    .await;

    match inserted {
        Ok(Some(device)) => {
            tracing::info!(user_id, device = %device.uid, "Created device");
            return Ok(device);
        }
        Ok(None) => {}
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!(user_id, device = %defaults.uid, "Device created concurrently, re-fetching");
        }
        Err(e) => return Err(e.into()),
    }

    let device = sqlx::query_as::<_, Device>(&format!(
        "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = ? AND uid = ?"
    ))
    .bind(user_id)
    .bind(defaults.uid)
    .fetch_one(&mut *conn)
    .await?;
    Ok(device)
}

/// Device ids whose actions make up `device`'s effective subscription state:
/// every member of its sync group, or just the device itself.
pub(crate) async fn scope_device_ids_on(
    conn: &mut SqliteConnection,
    device: &Device,
) -> Result<Vec<i64>, DatabaseError> {
    let Some(group_id) = device.sync_group_id else {
        return Ok(vec![device.id]);
    };
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT id FROM devices WHERE sync_group_id = ? ORDER BY id")
            .bind(group_id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

impl Database {
    // ========================================================================
    // Device Operations
    // ========================================================================

    /// Get or create a device for a user; created lazily on first interaction.
    pub async fn get_or_create_device(
        &self,
        user_id: i64,
        defaults: &NewDevice<'_>,
    ) -> Result<Device, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        get_or_create_device_on(&mut conn, user_id, defaults).await
    }

    pub async fn get_device(&self, user_id: i64, uid: &str) -> Result<Option<Device>, DatabaseError> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = ? AND uid = ?"
        ))
        .bind(user_id)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    pub async fn get_device_by_id(&self, id: i64) -> Result<Option<Device>, DatabaseError> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    /// All devices of a user, ordered by uid.
    pub async fn devices_for_user(&self, user_id: i64) -> Result<Vec<Device>, DatabaseError> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = ? ORDER BY uid"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }

    // ========================================================================
    // Sync Group Operations
    // ========================================================================

    /// Merge devices of one user into a single sync group.
    ///
    /// If any of the devices already belongs to a group, the others join
    /// that group; otherwise a new group is created. Devices belonging to a
    /// different user are ignored. Returns the group id.
    pub async fn sync_devices(&self, user_id: i64, device_ids: &[i64]) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT sync_group_id FROM devices WHERE sync_group_id IS NOT NULL AND user_id = ",
        );
        builder.push_bind(user_id);
        builder.push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in device_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY sync_group_id LIMIT 1");
        let existing: Option<(i64,)> = builder.build_query_as().fetch_optional(&mut *tx).await?;

        let group_id = match existing {
            Some((id,)) => id,
            None => {
                let (id,): (i64,) =
                    sqlx::query_as("INSERT INTO sync_groups (user_id) VALUES (?) RETURNING id")
                        .bind(user_id)
                        .fetch_one(&mut *tx)
                        .await?;
                id
            }
        };

        for id in device_ids {
            sqlx::query("UPDATE devices SET sync_group_id = ? WHERE id = ? AND user_id = ?")
                .bind(group_id)
                .bind(id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!(user_id, group_id, devices = device_ids.len(), "Devices synced");
        Ok(group_id)
    }

    /// Remove a device from its sync group. A group left with a single
    /// member is dissolved.
    pub async fn unsync_device(&self, device: &Device) -> Result<(), DatabaseError> {
        let Some(group_id) = device.sync_group_id else {
            return Ok(());
        };
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE devices SET sync_group_id = NULL WHERE id = ?")
            .bind(device.id)
            .execute(&mut *tx)
            .await?;

        let (remaining,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM devices WHERE sync_group_id = ?")
                .bind(group_id)
                .fetch_one(&mut *tx)
                .await?;
        if remaining <= 1 {
            sqlx::query("UPDATE devices SET sync_group_id = NULL WHERE sync_group_id = ?")
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM sync_groups WHERE id = ?")
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Devices sharing `device`'s subscription state, including itself.
    pub async fn sync_group_members(&self, device: &Device) -> Result<Vec<i64>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        scope_device_ids_on(&mut conn, device).await
    }
}
