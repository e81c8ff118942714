//! Credit usage tracking.

use serde::Deserialize;
use tracing::warn;

use crate::client::ServiceClient;
use crate::error::{Error, Result};
use crate::util::abbreviate_number;

/// Current billing state reported by the service.
///
/// Represents the moment it was fetched; never persisted locally.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct UsageSnapshot {
    /// Credits consumed so far.
    pub used: f64,
    /// Credits available in total.
    pub total: f64,
}

impl UsageSnapshot {
    /// Whether the submit action may be enabled for this snapshot.
    ///
    /// Submission stays blocked while no credits exist or they are spent.
    #[must_use]
    pub fn submit_enabled(&self) -> bool {
        !(self.total == 0.0 || self.used >= self.total)
    }

    /// Render the panel's credits line, e.g. `1.2K/5K used`.
    #[must_use]
    pub fn display(&self) -> String {
        format!(
            "{}/{} used",
            abbreviate_number(self.used),
            abbreviate_number(self.total)
        )
    }
}

/// Tracks the most recent usable snapshot across refreshes.
///
/// A failed refresh keeps the previous snapshot (stale but available) so the
/// panel never loses its credits display over a blip.
#[derive(Debug, Default)]
pub struct UsageTracker {
    snapshot: UsageSnapshot,
}

impl UsageTracker {
    /// The last successfully fetched snapshot, or the zero snapshot before
    /// any fetch succeeded.
    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        self.snapshot
    }

    /// Refresh from the service, logging failures instead of surfacing them.
    pub async fn refresh(&mut self, client: &ServiceClient) {
        if let Err(err) = self.try_refresh(client).await {
            warn!(error = %err, "usage refresh failed, keeping previous snapshot");
        }
    }

    /// Refresh from the service, surfacing failures as
    /// [`Error::UsageFetch`].
    ///
    /// # Errors
    ///
    /// [`Error::UsageFetch`] wrapping whatever the usage call failed with;
    /// the previous snapshot is left unchanged.
    pub async fn try_refresh(&mut self, client: &ServiceClient) -> Result<()> {
        let snapshot = client
            .usage()
            .await
            .map_err(|e| Error::UsageFetch(e.to_string()))?;
        self.snapshot = snapshot;
        Ok(())
    }
}
