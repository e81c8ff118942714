//! Authenticated client for the remote image service.
//!
//! Construction is inert: no network traffic happens until the first request
//! is issued, so an absent token only surfaces as [`Error::Authentication`]
//! on first use.

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::transform::CdnAddress;
use crate::upload::UploadTarget;
use crate::usage::UsageSnapshot;

/// Default API host of the image service.
pub const DEFAULT_SERVICE_DOMAIN: &str = "https://api.pixelbin.io";

const SIGNED_URL_PATH: &str = "/service/panel/assets/v2.0/upload/signed-url";
const ORG_DETAILS_PATH: &str = "/service/panel/organization/details";
const USAGE_PATH: &str = "/service/panel/billing/usage";

/// Integration-platform identifier reported with every request.
#[must_use]
pub fn default_client_identifier() -> String {
    format!("WatermarkPanel/{} (Figma)", env!("CARGO_PKG_VERSION"))
}

/// A saved API credential: the opaque token plus the service domain it
/// belongs to.
///
/// Set once when the user saves a token and immutable until explicitly
/// replaced or deleted.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Opaque API secret issued by the service console.
    pub token: String,
    /// API host, e.g. `https://api.pixelbin.io`.
    pub domain: String,
    /// Value reported as the integration platform.
    pub client_identifier: String,
}

impl Credential {
    /// Build a credential with the default client identifier.
    #[must_use]
    pub fn new(token: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            domain: domain.into(),
            client_identifier: default_client_identifier(),
        }
    }
}

/// Body of a signed-upload-url request.
///
/// Mirrors the upload details the panel always sends; only `name` varies per
/// upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlRequest {
    /// Unique asset name, already suffixed by the caller.
    pub name: String,
    /// Destination folder inside the organization's storage.
    pub path: String,
    /// Output format of the stored asset.
    pub format: String,
    /// Access level of the stored asset.
    pub access: String,
    /// Whether an existing asset of the same name may be replaced.
    pub overwrite: bool,
    /// Validity of the signed target, in seconds.
    pub expiry: u32,
}

impl Default for SignedUrlRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            format: "jpeg".to_string(),
            access: "public-read".to_string(),
            overwrite: false,
            expiry: 3000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlResponse {
    presigned_url: UploadTarget,
}

/// Organization details reported while validating a token.
#[derive(Debug, Clone, Deserialize)]
pub struct OrgDetails {
    /// The organization itself.
    pub org: OrgInfo,
    /// The app registration the token belongs to.
    pub app: AppInfo,
}

/// Organization-level details.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgInfo {
    /// Cloud name addressing the organization's CDN space.
    pub cloud_name: String,
}

/// App-registration details.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    /// Organization id, used for console links.
    pub org_id: String,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    credits: UsageSnapshot,
}

/// Authenticated service client bound to one [`Credential`].
///
/// Cheap to clone; the underlying HTTP client is shared.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    credential: Credential,
}

impl ServiceClient {
    /// Bind a client to a credential. No network call is made here.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            http: reqwest::Client::new(),
            credential,
        }
    }

    /// The credential this client is bound to.
    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Ask the service for a one-time signed upload target for `name`.
    ///
    /// The caller is responsible for making `name` unique (see
    /// [`crate::upload::unique_asset_name`]); the returned target is valid
    /// for exactly one upload.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] for a missing/rejected token,
    /// [`Error::Network`] for transport failures, [`Error::Api`] for other
    /// non-success responses. None of these are retried at this layer.
    pub async fn create_signed_upload_url(&self, name: &str) -> Result<UploadTarget> {
        let body = SignedUrlRequest {
            name: name.to_string(),
            ..SignedUrlRequest::default()
        };
        let response = self
            .request(Method::POST, SIGNED_URL_PATH)?
            .json(&body)
            .send()
            .await?;
        let response = into_checked(response).await?;
        let parsed: SignedUrlResponse = response.json().await?;
        Ok(parsed.presigned_url)
    }

    /// Fetch the organization details the saved token grants access to.
    ///
    /// Used to validate a token before persisting it.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Self::create_signed_upload_url`].
    pub async fn organization_details(&self) -> Result<OrgDetails> {
        let response = self.request(Method::GET, ORG_DETAILS_PATH)?.send().await?;
        let response = into_checked(response).await?;
        Ok(response.json().await?)
    }

    /// Fetch the current credit usage.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Self::create_signed_upload_url`].
    pub async fn usage(&self) -> Result<UsageSnapshot> {
        let response = self.request(Method::GET, USAGE_PATH)?.send().await?;
        let response = into_checked(response).await?;
        let parsed: UsageResponse = response.json().await?;
        Ok(parsed.credits)
    }

    /// CDN addressing context for this credential's service domain.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the configured domain cannot be parsed.
    pub fn cdn_address(&self, cloud_name: &str) -> Result<CdnAddress> {
        let base = swap_host_prefix(&self.credential.domain, "api.", "cdn.")?;
        Ok(CdnAddress::new(base, cloud_name))
    }

    /// Console page where the organization can buy more credits.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the configured domain cannot be parsed.
    pub fn billing_url(&self, org_id: &str) -> Result<String> {
        let console = swap_host_prefix(&self.credential.domain, "api.", "console.")?;
        Ok(format!(
            "{console}/organization/{org_id}/settings/billing/pricing"
        ))
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        if self.credential.token.trim().is_empty() {
            return Err(Error::Authentication(
                "no API token configured".to_string(),
            ));
        }
        let url = format!("{}{path}", self.credential.domain.trim_end_matches('/'));
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(&self.credential.token)
            .header("x-integration-platform", &self.credential.client_identifier))
    }
}

async fn into_checked(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let detail = if message.is_empty() {
            status.to_string()
        } else {
            message
        };
        return Err(Error::Authentication(detail));
    }
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

/// Derive a sibling host from the API domain: `api.pixelbin.io` with
/// `from = "api."` and `to = "cdn."` becomes `cdn.pixelbin.io`. Hosts
/// without the prefix (local test servers) are kept as-is.
fn swap_host_prefix(domain: &str, from: &str, to: &str) -> Result<String> {
    let parsed = Url::parse(domain).map_err(|e| Error::Config(format!("{domain}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::Config(format!("{domain}: missing host")))?;
    let host = host
        .strip_prefix(from)
        .map_or_else(|| host.to_string(), |rest| format!("{to}{rest}"));
    let mut out = format!("{}://{host}", parsed.scheme());
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{port}"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_is_inert() {
        // A bogus domain must not surface before the first request.
        let client = ServiceClient::new(Credential::new("secret", "not a url"));
        assert_eq!(client.credential().token, "secret");
    }

    #[tokio::test]
    async fn empty_token_fails_before_any_network_call() {
        let client = ServiceClient::new(Credential::new("", "https://api.pixelbin.io"));
        let err = client.usage().await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn cdn_and_console_hosts_derive_from_api_domain() {
        let client = ServiceClient::new(Credential::new("secret", "https://api.pixelbin.io"));
        let address = client.cdn_address("demo").unwrap();
        assert!(address.base().starts_with("https://cdn.pixelbin.io"));

        let billing = client.billing_url("org1").unwrap();
        assert_eq!(
            billing,
            "https://console.pixelbin.io/organization/org1/settings/billing/pricing"
        );
    }

    #[test]
    fn non_api_hosts_are_kept_verbatim() {
        let swapped = swap_host_prefix("http://127.0.0.1:8080", "api.", "cdn.").unwrap();
        assert_eq!(swapped, "http://127.0.0.1:8080");
    }

    #[test]
    fn malformed_domain_is_a_config_error() {
        let client = ServiceClient::new(Credential::new("secret", "not a url"));
        assert!(matches!(
            client.cdn_address("demo"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn client_identifier_names_the_panel() {
        let id = default_client_identifier();
        assert!(id.starts_with("WatermarkPanel/"));
        assert!(id.ends_with("(Figma)"));
    }
}
