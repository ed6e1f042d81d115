use std::future::Future;
use std::time::Duration;

use crate::error::SyncError;

/// Pause between attempts grows linearly: 10ms, 20ms, ...
const BACKOFF_STEP: Duration = Duration::from_millis(10);

/// Run a read-modify-write cycle, re-running it from scratch while it fails
/// with a write conflict.
///
/// `op` must re-read everything it depends on each time it is called. Any
/// error other than a conflict is returned immediately. After
/// `max_attempts` conflicting attempts the result is
/// [`SyncError::WriteConflict`].
pub async fn retry_on_conflict<T, F, Fut>(
    max_attempts: u32,
    operation: &'static str,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Err(SyncError::WriteConflict { .. }) if attempt < max_attempts => {
                let delay = BACKOFF_STEP * attempt;
                tracing::debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Write conflict, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(SyncError::WriteConflict { .. }) => {
                tracing::warn!(operation, attempts = attempt, "Write conflict, giving up");
                return Err(SyncError::WriteConflict { attempts: attempt });
            }
            other => return other,
        }
    }
}
