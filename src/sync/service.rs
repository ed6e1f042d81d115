use std::collections::BTreeSet;
use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;

use super::reconcile::reconcile;
use super::retry::retry_on_conflict;
use crate::aggregate::{
    build_tag_cloud, merge_history, merge_tags, remove_tag, summarize_episodes, HistoryEntry,
    PodcastOverview, ViewerState,
};
use crate::auth::Authenticator;
use crate::config::Config;
use crate::error::SyncError;
use crate::lists::{self, ListEntry, ListFormat, SubscriptionList};
use crate::storage::{
    Database, Device, NewDevice, Podcast, PodcastMetadata, SubscriptionActionKind, User,
};
use crate::util::{clean_label, normalize_url};

/// Device type recorded for devices created implicitly.
const UNKNOWN_DEVICE_TYPE: &str = "unknown";

/// Result of applying a declared list to a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub device: String,
    pub subscribed: BTreeSet<String>,
    pub unsubscribed: BTreeSet<String>,
}

/// An encoded subscription list, ready for the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedList {
    pub content_type: &'static str,
    pub body: String,
}

/// The format-agnostic surface of the sync service.
///
/// Every operation is an independent unit of work against the database; no
/// state is kept between calls.
#[derive(Clone)]
pub struct SyncService {
    db: Database,
    auth: Arc<dyn Authenticator>,
    config: Config,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// OPML title of a user's exported list.
fn list_title(user: &User) -> String {
    format!("{}'s subscription list", user.username)
}

impl SyncService {
    pub fn new(db: Database, auth: Arc<dyn Authenticator>, config: Config) -> Self {
        Self { db, auth, config }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn legacy_device(&self) -> NewDevice<'_> {
        NewDevice {
            uid: &self.config.legacy_device_uid,
            name: &self.config.legacy_device_name,
            device_type: UNKNOWN_DEVICE_TYPE,
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Verify credentials, mapping rejection to [`SyncError::AuthFailure`].
    pub async fn authenticate(&self, identifier: &str, secret: &SecretString) -> Result<User, SyncError> {
        match self.auth.authenticate(identifier, secret).await? {
            Some(user) => Ok(user),
            None => {
                tracing::info!(identifier = %identifier, "Authentication failed");
                Err(SyncError::AuthFailure)
            }
        }
    }

    /// Authenticate and require the identity to be `username`; a user may
    /// only touch their own lists.
    async fn authenticate_as(
        &self,
        identifier: &str,
        secret: &SecretString,
        username: &str,
    ) -> Result<User, SyncError> {
        let user = self.authenticate(identifier, secret).await?;
        if user.username != username {
            tracing::warn!(user_id = user.id, requested = %username, "Access to another user's list denied");
            return Err(SyncError::AuthFailure);
        }
        Ok(user)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Reconcile a declared list against the device's effective subscription
    /// set and log the difference.
    ///
    /// The device is created from `defaults` if absent. The read of the
    /// current state and every append share one transaction; on a write
    /// conflict the whole cycle is re-run against fresh state.
    pub async fn apply_list(
        &self,
        user: &User,
        defaults: &NewDevice<'_>,
        list: &SubscriptionList,
    ) -> Result<SyncOutcome, SyncError> {
        let db = &self.db;
        let declared = list.urls();
        let declared = &declared;

        let outcome = retry_on_conflict(self.config.conflict_retries, "apply_list", move || async move {
            let device = db.get_or_create_device(user.id, defaults).await?;
            let mut log = db.begin_action_log(&device).await?;
            let current = log.current_urls().await?;
            let diff = reconcile(declared, &current);
            let now = now_millis();

            for url in &diff.to_subscribe {
                let entry = list.get(url);
                let metadata = PodcastMetadata {
                    title: entry.and_then(|e| e.title.as_deref()),
                    description: entry.and_then(|e| e.description.as_deref()),
                };
                log.append(url, &metadata, SubscriptionActionKind::Subscribe, now)
                    .await?;
            }
            for url in &diff.to_unsubscribe {
                log.append(
                    url,
                    &PodcastMetadata::default(),
                    SubscriptionActionKind::Unsubscribe,
                    now,
                )
                .await?;
            }
            log.commit().await?;

            Ok::<_, SyncError>(SyncOutcome {
                device: device.uid,
                subscribed: diff.to_subscribe,
                unsubscribed: diff.to_unsubscribe,
            })
        })
        .await;

        match &outcome {
            Ok(outcome) => tracing::info!(
                user_id = user.id,
                device = %outcome.device,
                subscribed = outcome.subscribed.len(),
                unsubscribed = outcome.unsubscribed.len(),
                "Applied subscription list"
            ),
            Err(e) => tracing::error!(
                user_id = user.id,
                device = %defaults.uid,
                error = %e,
                "Failed to apply subscription list"
            ),
        }
        outcome
    }

    // ========================================================================
    // Legacy Endpoints
    // ========================================================================

    /// Legacy OPML upload against the legacy device. Any missing field is a
    /// malformed request; credentials are an e-mail address and password.
    #[tracing::instrument(skip_all, fields(email = email.unwrap_or_default()))]
    pub async fn upload_legacy(
        &self,
        email: Option<&str>,
        password: Option<&SecretString>,
        opml: Option<&[u8]>,
    ) -> Result<SyncOutcome, SyncError> {
        let (Some(email), Some(password), Some(opml)) = (email, password, opml) else {
            return Err(SyncError::MalformedRequest(
                "username, password and opml are required".to_string(),
            ));
        };

        let user = self.authenticate_legacy(email, password).await?;
        let list = lists::parse(ListFormat::Opml, opml)?;
        self.apply_list(&user, &self.legacy_device(), &list).await
    }

    /// Legacy download: the legacy device's subscriptions as OPML.
    #[tracing::instrument(skip_all, fields(email = email.unwrap_or_default()))]
    pub async fn get_list_legacy(
        &self,
        email: Option<&str>,
        password: Option<&SecretString>,
    ) -> Result<String, SyncError> {
        let (Some(email), Some(password)) = (email, password) else {
            return Err(SyncError::AuthFailure);
        };
        let user = self.authenticate_legacy(email, password).await?;
        let device = self.db.get_or_create_device(user.id, &self.legacy_device()).await?;
        let podcasts = self.db.current_subscriptions(device.id).await?;

        let entries: Vec<ListEntry> = podcasts.iter().map(ListEntry::from).collect();
        Ok(lists::encode(ListFormat::Opml, &list_title(&user), &entries)?)
    }

    async fn authenticate_legacy(&self, email: &str, password: &SecretString) -> Result<User, SyncError> {
        let user = self.authenticate(email, password).await?;
        if user.email != email {
            return Err(SyncError::AuthFailure);
        }
        Ok(user)
    }

    // ========================================================================
    // Device-scoped List API
    // ========================================================================

    /// Upload a list for a named device in any supported format.
    #[tracing::instrument(skip(self, secret, body), fields(bytes = body.len()))]
    pub async fn upload(
        &self,
        identifier: &str,
        secret: &SecretString,
        username: &str,
        device_uid: &str,
        format: &str,
        body: &[u8],
    ) -> Result<SyncOutcome, SyncError> {
        let format: ListFormat = format.parse()?;
        let user = self.authenticate_as(identifier, secret, username).await?;
        if device_uid.trim().is_empty() {
            return Err(SyncError::MalformedRequest("device id is required".to_string()));
        }
        let list = lists::parse(format, body)?;

        let defaults = NewDevice {
            uid: device_uid,
            name: device_uid,
            device_type: UNKNOWN_DEVICE_TYPE,
        };
        self.apply_list(&user, &defaults, &list).await
    }

    /// Download a device's effective subscription set in the given format.
    #[tracing::instrument(skip(self, secret))]
    pub async fn download(
        &self,
        identifier: &str,
        secret: &SecretString,
        username: &str,
        device_uid: &str,
        format: &str,
    ) -> Result<EncodedList, SyncError> {
        let format: ListFormat = format.parse()?;
        let user = self.authenticate_as(identifier, secret, username).await?;
        let device = self.require_device(&user, device_uid).await?;
        let podcasts = self.db.effective_subscriptions(&device).await?;

        let entries: Vec<ListEntry> = podcasts.iter().map(ListEntry::from).collect();
        Ok(EncodedList {
            content_type: format.content_type(),
            body: lists::encode(format, &list_title(&user), &entries)?,
        })
    }

    async fn require_device(&self, user: &User, uid: &str) -> Result<Device, SyncError> {
        self.db
            .get_device(user.id, uid)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("device '{uid}'")))
    }

    async fn require_podcast(&self, podcast_id: i64) -> Result<Podcast, SyncError> {
        self.db
            .get_podcast(podcast_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("podcast {podcast_id}")))
    }

    // ========================================================================
    // Single Subscriptions
    // ========================================================================

    /// Subscribe one device to a podcast. Returns false when the device was
    /// already (effectively) subscribed.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn subscribe(&self, user: &User, podcast_id: i64, device_uid: &str) -> Result<bool, SyncError> {
        self.set_subscription(user, podcast_id, device_uid, SubscriptionActionKind::Subscribe)
            .await
    }

    /// Unsubscribe one device from a podcast. Returns false when it was not
    /// subscribed.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn unsubscribe(
        &self,
        user: &User,
        podcast_id: i64,
        device_uid: &str,
    ) -> Result<bool, SyncError> {
        self.set_subscription(user, podcast_id, device_uid, SubscriptionActionKind::Unsubscribe)
            .await
    }

    async fn set_subscription(
        &self,
        user: &User,
        podcast_id: i64,
        device_uid: &str,
        action: SubscriptionActionKind,
    ) -> Result<bool, SyncError> {
        let podcast = self.require_podcast(podcast_id).await?;
        let device = self.require_device(user, device_uid).await?;
        let db = &self.db;
        let (podcast, device) = (&podcast, &device);

        let result = retry_on_conflict(self.config.conflict_retries, action.as_str(), move || async move {
            let mut log = db.begin_action_log(device).await?;
            let subscribed = log.current_urls().await?.contains(&podcast.url);
            let wanted = action == SubscriptionActionKind::Subscribe;
            if subscribed == wanted {
                return Ok(false);
            }
            log.append(&podcast.url, &PodcastMetadata::default(), action, now_millis())
                .await?;
            log.commit().await?;
            Ok::<_, SyncError>(true)
        })
        .await;

        if let Err(e) = &result {
            tracing::error!(
                user_id = user.id,
                podcast = %podcast.url,
                device = %device.uid,
                error = %e,
                "Failed to change subscription"
            );
        }
        result
    }

    /// Normalize a raw feed URL and get or create its podcast.
    #[tracing::instrument(skip(self))]
    pub async fn subscribe_url(&self, raw_url: &str) -> Result<Podcast, SyncError> {
        let url = normalize_url(raw_url);
        if url.is_empty() {
            return Err(SyncError::MalformedRequest(format!("not a feed URL: {raw_url}")));
        }
        Ok(self
            .db
            .get_or_create_podcast(&url, &PodcastMetadata::default())
            .await?)
    }

    /// Devices of `user` on which the podcast is not currently subscribed.
    pub async fn subscribe_targets(&self, user: &User, podcast_id: i64) -> Result<Vec<Device>, SyncError> {
        let mut targets = Vec::new();
        for device in self.db.devices_for_user(user.id).await? {
            if !self.db.is_effectively_subscribed(&device, podcast_id).await? {
                targets.push(device);
            }
        }
        Ok(targets)
    }

    // ========================================================================
    // Sync Groups
    // ========================================================================

    /// Join devices into one sync group. Returns the group id.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn sync_devices(&self, user: &User, device_uids: &[&str]) -> Result<i64, SyncError> {
        if device_uids.len() < 2 {
            return Err(SyncError::MalformedRequest(
                "at least two devices are needed to sync".to_string(),
            ));
        }
        let mut ids = Vec::with_capacity(device_uids.len());
        for uid in device_uids {
            ids.push(self.require_device(user, uid).await?.id);
        }
        Ok(self.db.sync_devices(user.id, &ids).await?)
    }

    /// Take a device out of its sync group.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn unsync_device(&self, user: &User, device_uid: &str) -> Result<(), SyncError> {
        let device = self.require_device(user, device_uid).await?;
        Ok(self.db.unsync_device(&device).await?)
    }

    // ========================================================================
    // Per-user Podcast State
    // ========================================================================

    /// Add comma-separated tags to a podcast. Blank entries are ignored and a
    /// tag already present (in any casing) is not added again.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn add_tags(&self, user: &User, podcast_id: i64, tags: &str) -> Result<Vec<String>, SyncError> {
        self.require_podcast(podcast_id).await?;
        let new_tags: Vec<String> = tags.split(',').filter_map(clean_label).collect();
        if new_tags.is_empty() {
            return Err(SyncError::MalformedRequest("no tags given".to_string()));
        }

        let db = &self.db;
        let new_tags = &new_tags;
        retry_on_conflict(self.config.conflict_retries, "add_tags", move || async move {
            let mut state = db.load_podcast_state(user.id, podcast_id).await?;
            if merge_tags(&mut state.tags, new_tags.iter().cloned()) {
                db.save_podcast_state(&state).await?;
            }
            Ok::<_, SyncError>(state.tags)
        })
        .await
    }

    /// Remove a tag (matched case-insensitively) from a podcast.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn remove_tag(&self, user: &User, podcast_id: i64, tag: &str) -> Result<Vec<String>, SyncError> {
        self.require_podcast(podcast_id).await?;
        let Some(tag) = clean_label(tag) else {
            return Err(SyncError::MalformedRequest("no tag given".to_string()));
        };

        let db = &self.db;
        let tag = tag.as_str();
        retry_on_conflict(self.config.conflict_retries, "remove_tag", move || async move {
            let mut state = db.load_podcast_state(user.id, podcast_id).await?;
            if remove_tag(&mut state.tags, tag) {
                db.save_podcast_state(&state).await?;
            }
            Ok::<_, SyncError>(state.tags)
        })
        .await
    }

    /// Set whether the user's subscription to a podcast is public.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn set_public_subscription(
        &self,
        user: &User,
        podcast_id: i64,
        public: bool,
    ) -> Result<(), SyncError> {
        self.require_podcast(podcast_id).await?;
        let db = &self.db;
        retry_on_conflict(self.config.conflict_retries, "set_public_subscription", move || async move {
            let mut state = db.load_podcast_state(user.id, podcast_id).await?;
            if state.public_subscription != public {
                state.public_subscription = public;
                db.save_podcast_state(&state).await?;
            }
            Ok::<_, SyncError>(())
        })
        .await
    }

    // ========================================================================
    // Aggregation
    // ========================================================================

    /// Number of users currently listening to an episode.
    pub async fn listener_count(&self, episode_id: i64) -> Result<i64, SyncError> {
        if self.db.get_episode(episode_id).await?.is_none() {
            return Err(SyncError::NotFound(format!("episode {episode_id}")));
        }
        Ok(self.db.listener_count(episode_id).await?)
    }

    /// A user's subscription and episode history, newest first.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn history(&self, user: &User, podcast_id: Option<i64>) -> Result<Vec<HistoryEntry>, SyncError> {
        let limit = self.config.history_limit;
        let subscriptions = self.db.subscription_history(user.id, podcast_id, limit).await?;
        let episodes = self.db.episode_history(user.id, podcast_id, limit).await?;
        Ok(merge_history(subscriptions, episodes, limit as usize))
    }

    /// Everything known about a podcast, personalized when `viewer` is set.
    #[tracing::instrument(skip(self, viewer), fields(user_id = viewer.map(|u| u.id)))]
    pub async fn podcast_overview(
        &self,
        podcast_id: i64,
        viewer: Option<&User>,
    ) -> Result<PodcastOverview, SyncError> {
        let podcast = self.require_podcast(podcast_id).await?;
        let related = self.db.related_podcasts(&podcast).await?;

        let tag_rows = self.db.podcast_tags(podcast_id).await?;
        let tags = build_tag_cloud(&tag_rows, viewer.map(|u| u.id), self.config.max_tags_on_page);

        let episodes = self.db.episodes_for_podcast(podcast_id).await?;
        let listeners = self.db.listener_counts(podcast_id).await?;
        let latest = match viewer {
            Some(user) => self.db.latest_episode_actions(user.id, podcast_id).await?,
            None => Default::default(),
        };
        let (episodes, max_listeners) = summarize_episodes(episodes, &listeners, latest);

        let viewer = match viewer {
            Some(user) => Some(ViewerState {
                subscribed_devices: self.db.subscribed_devices(user.id, podcast_id).await?,
                subscribe_targets: self.subscribe_targets(user, podcast_id).await?,
                public_subscription: self
                    .db
                    .load_podcast_state(user.id, podcast_id)
                    .await?
                    .public_subscription,
                history: self.history(user, Some(podcast_id)).await?,
            }),
            None => None,
        };

        Ok(PodcastOverview {
            podcast,
            related,
            tags,
            episodes,
            max_listeners,
            viewer,
        })
    }
}
