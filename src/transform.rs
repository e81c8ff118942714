//! Derived-asset URL construction.
//!
//! URL building is pure: given the same addressing context, file id, and
//! parameters it always renders the same string, and any parameter change
//! changes the result. No network call is involved.

use crate::error::{Error, Result};
use crate::events::FormValues;

/// The watermark-removal transformation applied by the service.
pub const WATERMARK_REMOVAL: &str = "wm.remove";

/// Addressing context for derived-asset URLs on the CDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnAddress {
    base: String,
    cloud_name: String,
    zone: Option<String>,
}

impl CdnAddress {
    /// Address the default zone of `cloud_name` under the CDN `base`.
    #[must_use]
    pub fn new(base: impl Into<String>, cloud_name: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            cloud_name: cloud_name.into(),
            zone: None,
        }
    }

    /// Address a specific zone. The default zone is not spelled out in
    /// URLs, so `"default"` is treated as no zone.
    #[must_use]
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        let zone = zone.into();
        self.zone = if zone.is_empty() || zone == "default" {
            None
        } else {
            Some(zone)
        };
        self
    }

    /// CDN base URL.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }
}

/// Request to apply a named transformation to an uploaded asset.
///
/// Only constructed once an upload has succeeded and the asset's file id is
/// known.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationRequest {
    /// Service-assigned id of the uploaded asset.
    pub asset_file_id: String,
    /// Name of the transformation to apply.
    pub transformation_name: String,
    /// Effect knobs, each independently optional.
    pub parameters: FormValues,
}

impl TransformationRequest {
    /// Watermark-removal request for an uploaded asset.
    #[must_use]
    pub fn watermark_removal(asset_file_id: impl Into<String>, parameters: FormValues) -> Self {
        Self {
            asset_file_id: asset_file_id.into(),
            transformation_name: WATERMARK_REMOVAL.to_string(),
            parameters,
        }
    }
}

/// Render the fully-qualified URL of the transformed asset:
/// `{base}/v2/{cloudName}[/{zone}]/{name}({params})/{fileId}`.
///
/// # Errors
///
/// [`Error::InvalidAssetReference`] when the file id is empty, contains
/// whitespace, or is rooted.
pub fn build_transformed_url(address: &CdnAddress, request: &TransformationRequest) -> Result<String> {
    let file_id = request.asset_file_id.trim();
    if file_id.is_empty()
        || file_id.starts_with('/')
        || file_id.chars().any(char::is_whitespace)
    {
        return Err(Error::InvalidAssetReference(request.asset_file_id.clone()));
    }

    let mut url = format!(
        "{}/v2/{}",
        address.base.trim_end_matches('/'),
        address.cloud_name
    );
    if let Some(zone) = &address.zone {
        url.push('/');
        url.push_str(zone);
    }
    url.push('/');
    url.push_str(&render_transformation(
        &request.transformation_name,
        &request.parameters,
    ));
    url.push('/');
    url.push_str(file_id);
    Ok(url)
}

fn render_transformation(name: &str, params: &FormValues) -> String {
    if params.is_empty() {
        return format!("{name}()");
    }
    let rendered: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{key}:{}", render_value(value)))
        .collect();
    format!("{name}({})", rendered.join(","))
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
