//! Polling helpers that hold a call open until the provider settles.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::debug;

use super::ScalewayBackend;
use super::error::ApiFailure;
use super::types::{ApiVolume, ZonedId};
use crate::backend::VolumeError;
use crate::volume::Volume;

/// Longest a single call waits, whatever the configured timeout.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_WAIT)).unwrap_or(now)
}

impl ScalewayBackend {
    /// Polls `id` until `done` accepts its state.
    ///
    /// Fails fast when the provider moves the volume to its error state and
    /// with [`VolumeError::Timeout`] once the wait timeout elapses.
    pub(super) async fn wait_for_volume<F>(
        &self,
        id: &ZonedId,
        action: &str,
        done: F,
    ) -> Result<Volume, VolumeError>
    where
        F: Fn(&ApiVolume) -> bool + Sync,
    {
        let volume_id = id.to_string();
        let deadline = deadline_after(self.wait_timeout);

        while Instant::now() <= deadline {
            let volume = self
                .fetch_volume(id)
                .await
                .map_err(|failure| failure.into_volume_error(&volume_id, None))?;
            if done(&volume) {
                return Ok(volume.into_volume());
            }
            if volume.is_failed() {
                return Err(VolumeError::Provider {
                    message: format!("volume {volume_id} entered error state during {action}"),
                });
            }
            debug!(volume_id, action, state = %volume.state, "waiting for volume");
            sleep(self.poll_interval).await;
        }

        Err(VolumeError::Timeout {
            action: action.to_owned(),
            volume_id,
        })
    }

    /// Polls `id` until the API no longer knows it.
    pub(super) async fn wait_until_deleted(&self, id: &ZonedId) -> Result<(), VolumeError> {
        let volume_id = id.to_string();
        let deadline = deadline_after(self.wait_timeout);

        while Instant::now() <= deadline {
            match self.fetch_volume(id).await {
                Err(ApiFailure::VolumeNotFound) => return Ok(()),
                Err(failure) => return Err(failure.into_volume_error(&volume_id, None)),
                Ok(volume) => {
                    debug!(volume_id, state = %volume.state, "waiting for deletion");
                }
            }
            sleep(self.poll_interval).await;
        }

        Err(VolumeError::Timeout {
            action: String::from("delete"),
            volume_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::configured(Duration::from_secs(300), Duration::from_secs(300))]
    #[case::huge(Duration::MAX, MAX_WAIT)]
    fn deadline_is_capped(#[case] timeout: Duration, #[case] expected: Duration) {
        let before = Instant::now();
        let deadline = deadline_after(timeout);
        let waited = deadline.saturating_duration_since(before);
        assert!(waited >= expected, "{waited:?}");
        assert!(waited <= expected + Duration::from_secs(1), "{waited:?}");
    }
}
