//! Jittered exponential backoff, shared between the HTTP transport's
//! retry loop and the transaction coordinator's conflict-retry loop so the
//! policy lives in one place rather than being duplicated.
//!
//! Re-exports `exponential_backoff::Backoff` directly rather than wrapping
//! it in a bespoke abstraction.

use std::time::Duration;

use exponential_backoff::Backoff;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE: Duration = Duration::from_millis(100);
pub const DEFAULT_CAP: Duration = Duration::from_secs(2);
pub const DEFAULT_JITTER: f32 = 0.25;

pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Backoff {
    Backoff::new(max_attempts, base, Some(cap))
}

/// Applies up to `±jitter` uniform noise to `base`.
pub fn jitter(base: Duration, jitter: f32) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    base.mul_f32(factor.max(0.0))
}

/// Sleeps for `duration`, returning early with [`Error::Canceled`] if
/// `cancellation` fires first.
pub async fn sleep_cancellable(
    duration: Duration,
    cancellation: &CancellationToken,
) -> Result<(), Error> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancellation.cancelled() => Err(Error::Canceled),
    }
}
