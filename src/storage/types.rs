use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::lists::ListEntry;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors.
///
/// `Conflict` is transient: a concurrent writer held the lock or changed the
/// row first. Callers retry the whole read-modify-write cycle on it.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Lock contention or an optimistic revision mismatch.
    #[error("Concurrent write conflict")]
    Conflict,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored value no longer matches the schema's vocabulary.
    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[source] sqlx::Error),
}

/// SQLite primary result codes for lock contention.
/// SQLITE_BUSY (5) and SQLITE_LOCKED (6); extended codes keep the low byte.
fn is_lock_code(code: &str) -> bool {
    code.parse::<i32>()
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref().is_some_and(is_lock_code) {
                return DatabaseError::Conflict;
            }
        }

        // Fallback on message text: pool and driver errors do not always
        // carry a result code.
        let error_string = err.to_string().to_lowercase();
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return DatabaseError::Conflict;
        }

        DatabaseError::Other(err)
    }
}

/// True when the sqlx error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

// ============================================================================
// Action Vocabularies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionActionKind {
    Subscribe,
    Unsubscribe,
}

impl SubscriptionActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionActionKind::Subscribe => "subscribe",
            SubscriptionActionKind::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for SubscriptionActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionActionKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(SubscriptionActionKind::Subscribe),
            "unsubscribe" => Ok(SubscriptionActionKind::Unsubscribe),
            other => Err(DatabaseError::Corrupt {
                table: "subscription_actions",
                detail: format!("unknown action '{other}'"),
            }),
        }
    }
}

/// Episode actions reported by clients.
///
/// `Play` and `Stop` are the playback-related kinds: a user whose latest
/// playback-related action on an episode is `Play` counts as a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeActionKind {
    New,
    Download,
    Play,
    Stop,
    Delete,
}

impl EpisodeActionKind {
    pub const PLAYBACK: [EpisodeActionKind; 2] = [EpisodeActionKind::Play, EpisodeActionKind::Stop];

    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeActionKind::New => "new",
            EpisodeActionKind::Download => "download",
            EpisodeActionKind::Play => "play",
            EpisodeActionKind::Stop => "stop",
            EpisodeActionKind::Delete => "delete",
        }
    }
}

impl fmt::Display for EpisodeActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeActionKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(EpisodeActionKind::New),
            "download" => Ok(EpisodeActionKind::Download),
            "play" => Ok(EpisodeActionKind::Play),
            "stop" => Ok(EpisodeActionKind::Stop),
            "delete" => Ok(EpisodeActionKind::Delete),
            other => Err(DatabaseError::Corrupt {
                table: "episode_actions",
                detail: format!("unknown action '{other}'"),
            }),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// A podcast, keyed by its normalized feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Podcast {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Unix milliseconds of the last metadata update.
    pub last_update: Option<i64>,
    pub group_id: Option<i64>,
}

impl Podcast {
    /// Display title, falling back to the feed URL.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

impl From<&Podcast> for ListEntry {
    fn from(podcast: &Podcast) -> Self {
        ListEntry {
            url: podcast.url.clone(),
            title: podcast.title.clone(),
            description: podcast.description.clone(),
        }
    }
}

/// Metadata supplied when a podcast is first referenced.
#[derive(Debug, Clone, Default)]
pub struct PodcastMetadata<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub user_id: i64,
    pub uid: String,
    pub name: String,
    pub device_type: String,
    pub sync_group_id: Option<i64>,
}

/// Defaults used when a device is materialized on first interaction.
#[derive(Debug, Clone)]
pub struct NewDevice<'a> {
    pub uid: &'a str,
    pub name: &'a str,
    pub device_type: &'a str,
}

/// One immutable entry of the subscription action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionAction {
    pub id: i64,
    pub podcast_id: i64,
    pub device_id: i64,
    pub action: SubscriptionActionKind,
    /// Unix milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Episode {
    pub id: i64,
    pub podcast_id: i64,
    pub url: String,
    pub title: Option<String>,
    /// Unix milliseconds of the release date, if known.
    pub released: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeAction {
    pub id: i64,
    pub user_id: i64,
    pub episode_id: i64,
    pub device_id: Option<i64>,
    pub action: EpisodeActionKind,
    pub timestamp: i64,
}

/// Per-user state for one podcast: tags and privacy, guarded by a revision
/// counter for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodcastUserState {
    pub user_id: i64,
    pub podcast_id: i64,
    pub revision: i64,
    pub public_subscription: bool,
    /// Tags in insertion order, original casing.
    pub tags: Vec<String>,
}

/// Device reference carried by history rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRef {
    pub id: i64,
    pub uid: String,
    pub name: String,
}

/// A subscription action joined with its podcast and device, for history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionHistoryRow {
    pub action_id: i64,
    pub timestamp: i64,
    pub action: SubscriptionActionKind,
    pub podcast_id: i64,
    pub podcast_url: String,
    pub podcast_title: Option<String>,
    pub device: DeviceRef,
}

/// An episode action joined with its episode, podcast and device, for history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeHistoryRow {
    pub action_id: i64,
    pub timestamp: i64,
    pub action: EpisodeActionKind,
    pub podcast_id: i64,
    pub podcast_url: String,
    pub podcast_title: Option<String>,
    pub episode_id: i64,
    pub episode_url: String,
    pub episode_title: Option<String>,
    pub device: Option<DeviceRef>,
}

/// Row type for subscription history query
pub(crate) type SubscriptionHistoryTuple = (
    i64,
    i64,
    String,
    i64,
    String,
    Option<String>,
    i64,
    String,
    String,
);

/// Row type for episode history query
pub(crate) type EpisodeHistoryTuple = (
    i64,
    i64,
    String,
    i64,
    String,
    Option<String>,
    i64,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
    Option<String>,
);
