//! Plugin-panel core for removing image watermarks via the PixelBin API.
//!
//! The panel authenticates with a saved API token, uploads the selected
//! image to a one-time signed destination (retrying transient failures with
//! backoff), applies the watermark-removal transformation, and reports
//! credit usage. Presentation concerns — forms, token screens, styling —
//! stay on the host side of a typed event channel; the core only ever sees
//! [`HostEvent`] values in and emits [`PanelEvent`] values out.
//!
//! # Quick Start
//!
//! ```no_run
//! use pixelbin_watermark_panel::{ChannelSink, Session};
//!
//! # async fn run() -> pixelbin_watermark_panel::Result<()> {
//! let (sink, mut outbound) = ChannelSink::channel();
//! let mut session = Session::new(sink);
//!
//! // Validate and persist the token, then process one image.
//! session.save_token("api-secret", "https://api.pixelbin.io").await?;
//! let image = std::fs::read("photo.jpg").expect("readable image");
//! let url = session
//!     .process_image(image.into(), "photo", "my-cloud")
//!     .await?;
//! println!("transformed: {url}");
//! # Ok(())
//! # }
//! ```
//!
//! # Event-driven use
//!
//! Hosts that speak the plugin message channel decode each inbound message
//! into a [`HostEvent`] and feed it to [`Session::handle_event`], while a
//! separate task drains the [`ChannelSink`] receiver back onto the
//! transport.

#![deny(missing_docs)]

pub mod client;
pub mod error;
pub mod events;
pub mod session;
pub mod transform;
pub mod upload;
pub mod usage;
pub mod util;

pub use client::{
    default_client_identifier, Credential, OrgDetails, ServiceClient, DEFAULT_SERVICE_DOMAIN,
};
pub use error::{Error, Result};
pub use events::{ChannelSink, EventSink, FormValues, HostEvent, PanelEvent};
pub use session::{RunToken, Session, SessionState};
pub use transform::{
    build_transformed_url, CdnAddress, TransformationRequest, WATERMARK_REMOVAL,
};
pub use upload::{
    unique_asset_name, AssetPayload, RetryPolicy, UploadTarget, Uploader, ASSET_METADATA_FIELD,
};
pub use usage::{UsageSnapshot, UsageTracker};
