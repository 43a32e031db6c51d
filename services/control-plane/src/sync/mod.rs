//! State-synchronization core.
//!
//! Agents converge on desired state through three stream modes that share one
//! per-region version cursor:
//!
//! - bootstrap: everything that should run, closed by a bookmark
//! - catch-up: change-log entries strictly after a cursor, bounded
//! - watch: per-kind polling that stays open
//!
//! Conversion from rows to instructions lives in [`convert`] and is shared by
//! all three.

pub mod bootstrap;
pub mod catchup;
pub mod convert;
mod error;
mod outbound;
pub mod query;
pub mod registry;
pub mod relay;
pub mod status;
pub mod watch;

use std::time::Duration;

pub use error::SyncError;
pub use outbound::Outbound;
pub use registry::{LiveRegistry, Registration};
pub use relay::LiveRelay;

/// Interval between polls of an idle watch.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_BATCH_SIZE: usize = 100;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Resolves once shutdown has been signalled or the sender is gone.
pub async fn shutdown_signalled(shutdown: &mut tokio::sync::watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Tunables shared by every stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    /// Change-log entries per catch-up batch and rows per watch poll.
    pub batch_size: usize,
    /// Rows per bootstrap page.
    pub page_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_interval_is_one_second() {
        assert_eq!(SyncSettings::default().poll_interval, Duration::from_secs(1));
        assert_eq!(SyncSettings::default().batch_size, 100);
        assert_eq!(SyncSettings::default().page_size, 100);
    }
}
