//! Podcast subscription synchronization.
//!
//! Clients upload the list of feeds they are subscribed to (OPML, plain text
//! or JSON). The service diffs it against the state derived from an
//! append-only subscription action log, appends the difference, and serves
//! the resulting state back in any of the formats along with aggregated
//! listener counts, tags and history.

pub mod aggregate;
pub mod auth;
pub mod config;
pub mod error;
pub mod lists;
pub mod storage;
pub mod sync;
pub mod util;

pub use error::SyncError;
pub use sync::SyncService;
