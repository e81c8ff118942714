//! Session state and the image-processing run.
//!
//! All mutable panel state lives in one explicit [`Session`] value: the
//! credential and derived client, form values, usage tracker, and the run
//! guard. Components receive it explicitly; there are no ambient globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info};

use crate::client::{Credential, ServiceClient, DEFAULT_SERVICE_DOMAIN};
use crate::error::{Error, Result};
use crate::events::{EventSink, FormValues, HostEvent, PanelEvent};
use crate::transform::{build_transformed_url, TransformationRequest};
use crate::upload::{unique_asset_name, AssetPayload, RetryPolicy, Uploader};
use crate::usage::{UsageSnapshot, UsageTracker};

/// Session-level lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No valid token is saved.
    Unauthenticated,
    /// Token validation is in flight.
    Authenticating,
    /// Authenticated and waiting for work.
    Idle,
    /// An upload (including its retries) is in progress.
    Uploading,
    /// The transform URL is being derived and announced.
    Transforming,
}

/// Single-acquisition guard for one image-processing run.
///
/// Holding a token marks the session busy; dropping it releases the run
/// slot. A second acquisition while one is held fails with
/// [`Error::RunInProgress`].
#[derive(Debug)]
pub struct RunToken {
    flag: Arc<AtomicBool>,
}

impl RunToken {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(Error::RunInProgress);
        }
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for RunToken {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// All mutable panel state for one session.
pub struct Session<S: EventSink> {
    sink: S,
    state: SessionState,
    auth_error: bool,
    domain: String,
    client: Option<ServiceClient>,
    org_id: Option<String>,
    form_values: FormValues,
    usage: UsageTracker,
    uploader: Uploader,
    retry_policy: RetryPolicy,
    run_active: Arc<AtomicBool>,
}

impl<S: EventSink> Session<S> {
    /// Create an unauthenticated session against the default service
    /// domain.
    pub fn new(sink: S) -> Self {
        Self::with_domain(sink, DEFAULT_SERVICE_DOMAIN)
    }

    /// Create an unauthenticated session against a specific service domain.
    pub fn with_domain(sink: S, domain: impl Into<String>) -> Self {
        Self {
            sink,
            state: SessionState::Unauthenticated,
            auth_error: false,
            domain: domain.into(),
            client: None,
            org_id: None,
            form_values: FormValues::new(),
            usage: UsageTracker::default(),
            uploader: Uploader::new(),
            retry_policy: RetryPolicy::default(),
            run_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the last token validation failed.
    #[must_use]
    pub fn auth_error(&self) -> bool {
        self.auth_error
    }

    /// The client derived from the saved credential, if any.
    #[must_use]
    pub fn client(&self) -> Option<&ServiceClient> {
        self.client.as_ref()
    }

    /// The last known usage snapshot.
    #[must_use]
    pub fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    /// Current form parameter values.
    #[must_use]
    pub fn form_values(&self) -> &FormValues {
        &self.form_values
    }

    /// Replace the upload retry policy.
    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry_policy = policy;
    }

    /// Bind a token and domain, deriving an inert authenticated client.
    ///
    /// No network call is made; a bad token surfaces on first use.
    pub fn set_credential(&mut self, token: &str, domain: &str) -> &ServiceClient {
        self.client
            .insert(ServiceClient::new(Credential::new(token, domain)))
    }

    /// Try to reserve the session's single run slot.
    ///
    /// Used internally by [`Self::process_image`] and the token mutations;
    /// exposed so embedders can hold the slot across a larger span.
    ///
    /// # Errors
    ///
    /// [`Error::RunInProgress`] while another token is held.
    pub fn try_begin_run(&self) -> Result<RunToken> {
        RunToken::acquire(&self.run_active)
    }

    /// Validate `token` against the service and announce `SaveToken`.
    ///
    /// Transitions `Unauthenticated → Authenticating → Idle`; on failure the
    /// session returns to `Unauthenticated` with the error flag set and no
    /// credential is stored. A successful validation also refreshes usage.
    ///
    /// # Errors
    ///
    /// [`Error::RunInProgress`] while a run is active, otherwise whatever
    /// the organization endpoint failed with.
    pub async fn save_token(&mut self, token: &str, domain: &str) -> Result<()> {
        let _token = self.try_begin_run()?;

        self.auth_error = false;
        self.state = SessionState::Authenticating;
        self.sink.send(PanelEvent::ToggleLoader { value: true });

        let client = ServiceClient::new(Credential::new(token, domain));
        let outcome = client.organization_details().await;
        self.sink.send(PanelEvent::ToggleLoader { value: false });

        match outcome {
            Ok(details) => {
                self.sink.send(PanelEvent::SaveToken {
                    value: token.to_string(),
                    cloud_name: details.org.cloud_name,
                    org_id: details.app.org_id.clone(),
                });
                self.usage.refresh(&client).await;
                self.org_id = Some(details.app.org_id);
                self.client = Some(client);
                self.domain = domain.to_string();
                self.state = SessionState::Idle;
                Ok(())
            }
            Err(err) => {
                self.auth_error = true;
                self.state = SessionState::Unauthenticated;
                Err(err)
            }
        }
    }

    /// Forget the saved token and drop the cached client.
    ///
    /// A subsequent upload attempt fails with [`Error::Authentication`]
    /// instead of proceeding silently. Usage is reset, which also disables
    /// submit.
    ///
    /// # Errors
    ///
    /// [`Error::RunInProgress`] while a run is active.
    pub fn delete_token(&mut self) -> Result<()> {
        let _token = self.try_begin_run()?;

        self.client = None;
        self.org_id = None;
        self.auth_error = false;
        self.usage = UsageTracker::default();
        self.state = SessionState::Unauthenticated;
        self.sink.send(PanelEvent::DeleteToken);
        Ok(())
    }

    /// Whether the submit action is currently available.
    #[must_use]
    pub fn submit_enabled(&self) -> bool {
        self.usage.snapshot().submit_enabled()
    }

    /// Ask the host to hand over the selected image for processing.
    ///
    /// Sends nothing and returns `false` while credits are missing or
    /// spent.
    pub fn submit(&self) -> bool {
        if !self.submit_enabled() {
            return false;
        }
        self.sink.send(PanelEvent::Transform {
            params: self.form_values.clone(),
        });
        true
    }

    /// Fold saved form values into the parameter map, camelCasing option
    /// names the way the host stores them.
    pub fn apply_saved_form_values(&mut self, saved: &FormValues) {
        for (name, value) in saved {
            self.form_values
                .insert(crate::util::camel_case(name), value.clone());
        }
    }

    /// Clear all form values back to their defaults.
    pub fn reset_form(&mut self) {
        self.form_values.clear();
    }

    /// Point the host at the console's buy-credits page.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] when no token is saved or the organization
    /// is unknown, [`Error::Config`] for an unparsable domain.
    pub fn open_billing(&self) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::Authentication("no token saved".to_string()))?;
        let org_id = self
            .org_id
            .as_deref()
            .ok_or_else(|| Error::Authentication("organization unknown".to_string()))?;
        self.sink.send(PanelEvent::OpenExternalUrl {
            url: client.billing_url(org_id)?,
        });
        Ok(())
    }

    /// One full image-processing run: signed-url request → upload with
    /// retry → transform-URL build → `ReplaceImage` → usage refresh,
    /// strictly in that order.
    ///
    /// The loading indicator is toggled around the whole span. On success
    /// the transformed URL is returned and announced exactly once; on
    /// failure the error is logged, the loader is turned off, and no
    /// `ReplaceImage` is sent.
    ///
    /// # Errors
    ///
    /// [`Error::RunInProgress`] while another run is active,
    /// [`Error::Authentication`] when no token is saved, or whatever the
    /// run itself failed with (see [`Error`]).
    pub async fn process_image(
        &mut self,
        image_bytes: Bytes,
        image_name: &str,
        cloud_name: &str,
    ) -> Result<String> {
        let _token = self.try_begin_run()?;
        let Some(client) = self.client.clone() else {
            return Err(Error::Authentication("no token saved".to_string()));
        };

        self.sink.send(PanelEvent::ToggleLoader { value: true });
        self.state = SessionState::Uploading;

        let result = self
            .run_upload_and_transform(&client, image_bytes, image_name, cloud_name)
            .await;

        self.state = SessionState::Idle;
        self.sink.send(PanelEvent::ToggleLoader { value: false });

        match &result {
            Ok(url) => info!(url = url.as_str(), "image-processing run complete"),
            Err(err) => error!(error = %err, "image-processing run failed"),
        }
        result
    }

    async fn run_upload_and_transform(
        &mut self,
        client: &ServiceClient,
        image_bytes: Bytes,
        image_name: &str,
        cloud_name: &str,
    ) -> Result<String> {
        let payload = AssetPayload::from_bytes(image_bytes, unique_asset_name(image_name));
        let target = client.create_signed_upload_url(&payload.declared_name).await?;

        let refresh_client = client.clone();
        let refresh_name = payload.declared_name.clone();
        let refresh = move || {
            let client = refresh_client.clone();
            let name = refresh_name.clone();
            async move { client.create_signed_upload_url(&name).await }
        };

        let file_id = self
            .uploader
            .upload_with_retry(&payload, target, &self.retry_policy, refresh)
            .await?;

        self.state = SessionState::Transforming;
        let request = TransformationRequest::watermark_removal(file_id, self.form_values.clone());
        let address = client.cdn_address(cloud_name)?;
        let url = build_transformed_url(&address, &request)?;
        self.sink.send(PanelEvent::ReplaceImage { url: url.clone() });

        self.usage.refresh(client).await;
        Ok(url)
    }

    /// Dispatch one inbound host event.
    ///
    /// This is the single consumption point for the host channel; embedders
    /// feed decoded [`HostEvent`] values here in arrival order.
    ///
    /// # Errors
    ///
    /// Errors from the underlying operation, e.g. a failed run for
    /// [`HostEvent::ImageSelected`].
    pub async fn handle_event(&mut self, event: HostEvent) -> Result<()> {
        match event {
            // Session start and loader echoes are presentation-only.
            HostEvent::InitialCall | HostEvent::LoaderToggle { .. } => Ok(()),
            HostEvent::TokenSaved {
                value,
                saved_token,
                saved_form_value,
                org_id,
                ..
            } => {
                if value {
                    if let Some(token) = saved_token {
                        let domain = self.domain.clone();
                        self.set_credential(&token, &domain);
                        self.state = SessionState::Idle;
                    }
                    self.apply_saved_form_values(&saved_form_value);
                    self.org_id = org_id;
                }
                Ok(())
            }
            HostEvent::FormCreated { saved_form_value } => {
                self.apply_saved_form_values(&saved_form_value);
                Ok(())
            }
            HostEvent::ImageSelected {
                token,
                image_bytes,
                image_name,
                saved_cloud_name,
            } => {
                let domain = self.domain.clone();
                self.set_credential(&token, &domain);
                self.process_image(Bytes::from(image_bytes), &image_name, &saved_cloud_name)
                    .await
                    .map(|_url| ())
            }
        }
    }
}
