//! Deadline arithmetic that never overflows.

use std::time::Duration;

use tokio::time::Instant;

/// Roughly 30 years; the stand-in for "no deadline".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Instant `timeout` from now, clamped to a far-future instant when the
/// addition would overflow.
#[must_use]
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
