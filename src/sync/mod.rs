//! Subscription synchronization.
//!
//! [`reconcile`] is the pure diff between a declared list and the stored
//! state. [`SyncService`] wraps it with authentication, list decoding and
//! the action log, re-running each read-modify-write cycle on write
//! conflicts through [`retry_on_conflict`].

mod reconcile;
mod retry;
mod service;

pub use reconcile::{reconcile, SubscriptionDiff};
pub use retry::retry_on_conflict;
pub use service::{EncodedList, SyncOutcome, SyncService};
