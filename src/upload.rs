//! Direct uploads to signed targets, with bounded retry.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Field of a signed target carrying JSON-encoded asset metadata.
pub const ASSET_METADATA_FIELD: &str = "x-pixb-meta-assetdata";

/// One-time signed upload destination issued by the service.
///
/// A target is consumed by value when uploaded, so it can never be reused
/// across two payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTarget {
    /// Destination URL for the direct upload.
    pub url: String,
    /// Server-issued form fields that must accompany the upload verbatim.
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetMetadata {
    file_id: String,
}

impl UploadTarget {
    /// Extract the service-assigned file id from the asset metadata field.
    ///
    /// # Errors
    ///
    /// [`Error::UploadTarget`] when the field is missing, unparsable, or
    /// names an empty file id.
    pub fn asset_file_id(&self) -> Result<String> {
        let raw = self.fields.get(ASSET_METADATA_FIELD).ok_or_else(|| {
            Error::UploadTarget(format!("missing {ASSET_METADATA_FIELD} field"))
        })?;
        let meta: AssetMetadata = serde_json::from_str(raw)
            .map_err(|e| Error::UploadTarget(format!("unparsable asset metadata: {e}")))?;
        if meta.file_id.trim().is_empty() {
            return Err(Error::UploadTarget("asset metadata has empty fileId".to_string()));
        }
        Ok(meta.file_id)
    }
}

/// Binary image data staged for one upload.
#[derive(Debug, Clone)]
pub struct AssetPayload {
    /// Raw image bytes.
    pub bytes: Bytes,
    /// Unique asset name sent to the service.
    pub declared_name: String,
    /// MIME type of the payload.
    pub mime_type: String,
}

impl AssetPayload {
    /// Build a payload from raw bytes, sniffing the MIME type from content.
    ///
    /// Unknown content falls back to `image/jpeg`, which is what the host
    /// hands over for selections.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>, declared_name: impl Into<String>) -> Self {
        let bytes = bytes.into();
        let mime_type = image::guess_format(&bytes)
            .map_or("image/jpeg", |format| format.to_mime_type())
            .to_string();
        Self {
            bytes,
            declared_name: declared_name.into(),
            mime_type,
        }
    }
}

/// Make an asset name collision-proof by appending a fresh UUID v4.
#[must_use]
pub fn unique_asset_name(base: &str) -> String {
    format!("{base}{}", Uuid::new_v4())
}

/// Retry policy for the upload executor.
///
/// The upload step favors eventual success: transient failures are retried
/// with exponential backoff, and the signed target is re-requested after
/// every `refresh_after` consecutive failures since signed URLs expire.
/// After `max_attempts` total failures the upload fails with
/// [`Error::UploadExhausted`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before giving up, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the backoff.
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff after each failure.
    pub backoff_multiplier: f64,
    /// Consecutive failures after which a fresh signed target is requested.
    /// Zero disables refreshing.
    pub refresh_after: u32,
    /// Add random jitter (±30%) to each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            refresh_after: 4,
            jitter: true,
        }
    }
}

/// Executes direct uploads against signed targets.
#[derive(Debug, Clone, Default)]
pub struct Uploader {
    http: reqwest::Client,
}

impl Uploader {
    /// Create an uploader with its own HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload `payload` to `target`, retrying failures per `policy`.
    ///
    /// `refresh` is invoked to obtain a fresh signed target after
    /// `policy.refresh_after` consecutive failures; if the refresh itself
    /// fails, the current target is kept for the next attempt.
    ///
    /// Returns the uploaded asset's file id, parsed from the target's
    /// metadata field, on the first successful attempt.
    ///
    /// # Errors
    ///
    /// [`Error::UploadExhausted`] once `policy.max_attempts` attempts have
    /// failed, or [`Error::UploadTarget`] when a successful upload carries
    /// unusable asset metadata.
    pub async fn upload_with_retry<F, Fut>(
        &self,
        payload: &AssetPayload,
        mut target: UploadTarget,
        policy: &RetryPolicy,
        mut refresh: F,
    ) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<UploadTarget>>,
    {
        let mut attempt = 0u32;
        let mut backoff = policy.initial_backoff;

        loop {
            match self.upload_once(payload, &target).await {
                Ok(()) => return target.asset_file_id(),
                Err(err) => {
                    attempt += 1;
                    if attempt >= policy.max_attempts {
                        warn!(attempts = attempt, error = %err, "upload retry budget exhausted");
                        return Err(Error::UploadExhausted { attempts: attempt });
                    }
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "upload attempt failed, retrying"
                    );

                    // Signed URLs expire; swap in a fresh target periodically.
                    if policy.refresh_after > 0 && attempt % policy.refresh_after == 0 {
                        match refresh().await {
                            Ok(fresh) => target = fresh,
                            Err(refresh_err) => warn!(
                                error = %refresh_err,
                                "signed target refresh failed, keeping current target"
                            ),
                        }
                    }

                    tokio::time::sleep(with_jitter(backoff, policy.jitter)).await;
                    backoff = next_backoff(backoff, policy);
                }
            }
        }
    }

    async fn upload_once(&self, payload: &AssetPayload, target: &UploadTarget) -> Result<()> {
        let mut form = reqwest::multipart::Form::new();
        for (key, value) in &target.fields {
            form = form.text(key.clone(), value.clone());
        }
        // The file part must come after the issued fields.
        let part = reqwest::multipart::Part::stream(payload.bytes.clone())
            .file_name(payload.declared_name.clone())
            .mime_str(&payload.mime_type)?;
        form = form.part("file", part);

        let response = self.http.post(&target.url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(Error::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn with_jitter(base: Duration, jitter: bool) -> Duration {
    if !jitter {
        return base;
    }
    let factor = rand::thread_rng().gen_range(0.7..1.3);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn next_backoff(current: Duration, policy: &RetryPolicy) -> Duration {
    let next = (current.as_millis() as f64 * policy.backoff_multiplier)
        .min(policy.max_backoff.as_millis() as f64);
    Duration::from_millis(next as u64)
}
