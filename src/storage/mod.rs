mod devices;
mod episodes;
mod podcasts;
mod schema;
mod subscriptions;
mod types;
mod user_state;
mod users;

pub use schema::Database;
pub use subscriptions::ActionLogTx;
pub use types::{
    DatabaseError, Device, DeviceRef, Episode, EpisodeAction, EpisodeActionKind,
    EpisodeHistoryRow, NewDevice, Podcast, PodcastMetadata, PodcastUserState, SubscriptionAction,
    SubscriptionActionKind, SubscriptionHistoryRow, User,
};
