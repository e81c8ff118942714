//! Typed events crossing the host message channel.
//!
//! The panel core never touches the plugin transport directly. Inbound host
//! messages arrive as [`HostEvent`] values fed to the session dispatch loop;
//! outbound messages leave through an [`EventSink`]. Both sides serialize to
//! the host's plugin-message JSON: a `type` tag plus camelCase fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Form parameter values keyed by camelCase option name.
///
/// An ordered map so derived URLs render parameters deterministically.
pub type FormValues = BTreeMap<String, serde_json::Value>;

/// Inbound events consumed from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    /// Session start; the panel announces itself to the host.
    InitialCall,
    /// The host reports whether a token is saved, and restores session state
    /// if one is.
    TokenSaved {
        /// Whether a token is currently saved.
        value: bool,
        /// Whether the token-entry screen is being edited.
        is_token_editing: bool,
        /// The saved token, present when `value` is true.
        #[serde(default)]
        saved_token: Option<String>,
        /// Form values persisted by the host from the previous session.
        #[serde(default)]
        saved_form_value: FormValues,
        /// Organization id persisted alongside the token.
        #[serde(default)]
        org_id: Option<String>,
    },
    /// The host finished building the parameter form.
    FormCreated {
        /// Form values persisted by the host.
        #[serde(default)]
        saved_form_value: FormValues,
    },
    /// The user picked an image; the host hands over its bytes for
    /// processing.
    ImageSelected {
        /// The saved API token.
        token: String,
        /// Raw bytes of the selected image.
        image_bytes: Vec<u8>,
        /// User-visible name of the selected image.
        image_name: String,
        /// Cloud name saved when the token was validated.
        saved_cloud_name: String,
    },
    /// The host toggled the loading indicator.
    LoaderToggle {
        /// New loader visibility.
        value: bool,
    },
}

/// Outbound events produced for the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PanelEvent {
    /// Persist a validated token together with the organization it belongs
    /// to.
    SaveToken {
        /// The API token to persist.
        value: String,
        /// Cloud name reported by the organization endpoint.
        cloud_name: String,
        /// Organization id reported by the organization endpoint.
        org_id: String,
    },
    /// Forget the saved token.
    DeleteToken,
    /// The user submitted the form; the host should hand over the selected
    /// image.
    Transform {
        /// Current form parameter values.
        params: FormValues,
    },
    /// A processed image is ready; the host should swap it in.
    ReplaceImage {
        /// Fully-qualified URL of the transformed asset.
        url: String,
    },
    /// Show or hide the loading indicator.
    ToggleLoader {
        /// New loader visibility.
        value: bool,
    },
    /// Open a URL in the system browser.
    OpenExternalUrl {
        /// The URL to open.
        url: String,
    },
}

/// Fire-and-forget sink for outbound panel events.
///
/// Implementations must not block and must not await acknowledgement.
pub trait EventSink {
    /// Push one event toward the host.
    fn send(&self, event: PanelEvent);
}

/// Event sink backed by an unbounded channel.
///
/// The receiving half is drained by whatever glue forwards events onto the
/// actual plugin transport.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PanelEvent>,
}

impl ChannelSink {
    /// Create a sink plus the receiver the transport glue drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PanelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&self, event: PanelEvent) {
        // A closed receiver means the host went away; there is nobody left
        // to notify.
        if self.tx.send(event).is_err() {
            tracing::debug!("host channel closed, dropping outbound event");
        }
    }
}
