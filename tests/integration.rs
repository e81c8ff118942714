use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use pixelbin_watermark_panel::{
    Error, EventSink, FormValues, HostEvent, PanelEvent, RetryPolicy, Session, SessionState,
    UsageSnapshot,
};

const SIGNED_URL_PATH: &str = "/service/panel/assets/v2.0/upload/signed-url";
const ORG_DETAILS_PATH: &str = "/service/panel/organization/details";
const USAGE_PATH: &str = "/service/panel/billing/usage";
const UPLOAD_PATH: &str = "/storage/upload";

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<PanelEvent>>>);

impl EventSink for RecordingSink {
    fn send(&self, event: PanelEvent) {
        self.0.lock().unwrap().push(event);
    }
}

impl RecordingSink {
    fn events(&self) -> Vec<PanelEvent> {
        self.0.lock().unwrap().clone()
    }

    fn replace_image_urls(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PanelEvent::ReplaceImage { url } => Some(url),
                _ => None,
            })
            .collect()
    }
}

/// Upload endpoint that fails `failures` times, then accepts.
struct FlakyUpload {
    attempts: AtomicUsize,
    failures: usize,
}

impl FlakyUpload {
    fn new(failures: usize) -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            failures,
        }
    }
}

impl Respond for FlakyUpload {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
            ResponseTemplate::new(500).set_body_string("storage hiccup")
        } else {
            ResponseTemplate::new(204)
        }
    }
}

/// Usage endpoint that answers once, then starts failing.
struct UsageOnce {
    calls: AtomicUsize,
}

impl Respond for UsageOnce {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            usage_response()
        } else {
            ResponseTemplate::new(500).set_body_string("billing outage")
        }
    }
}

fn usage_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "credits": {"used": 1.0, "total": 10.0}
    }))
}

fn org_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "org": {"cloudName": "demo"},
        "app": {"orgId": "org1"}
    }))
}

fn signed_url_response(server_uri: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "presignedUrl": {
            "url": format!("{server_uri}{UPLOAD_PATH}"),
            "fields": {
                "x-pixb-meta-assetdata": r#"{"fileId":"f1"}"#,
                "key": "uploads/f1"
            }
        }
    }))
}

async fn mount_service(server: &MockServer, upload_failures: usize) {
    Mock::given(method("POST"))
        .and(path(SIGNED_URL_PATH))
        .respond_with(signed_url_response(&server.uri()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(FlakyUpload::new(upload_failures))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(ORG_DETAILS_PATH))
        .respond_with(org_response())
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(USAGE_PATH))
        .respond_with(usage_response())
        .mount(server)
        .await;
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 8,
        initial_backoff: Duration::from_millis(2),
        max_backoff: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        refresh_after: 4,
        jitter: false,
    }
}

async fn requests_on(server: &MockServer, on_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == on_path)
        .count()
}

#[tokio::test]
async fn end_to_end_run_uploads_transforms_and_refreshes_usage() {
    let server = MockServer::start().await;
    mount_service(&server, 2).await; // upload fails twice, then succeeds

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink.clone(), server.uri());
    session.set_retry_policy(fast_policy());

    session.save_token("abc123", &server.uri()).await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(sink.events().iter().any(|e| matches!(
        e,
        PanelEvent::SaveToken { value, cloud_name, org_id }
            if value == "abc123" && cloud_name == "demo" && org_id == "org1"
    )));
    assert_eq!(
        session.usage(),
        UsageSnapshot {
            used: 1.0,
            total: 10.0
        }
    );
    assert!(session.submit_enabled());

    let url = session
        .process_image(Bytes::from_static(b"image bytes"), "photo", "demo")
        .await
        .unwrap();
    assert!(url.starts_with(&server.uri()));
    assert!(url.contains("/v2/demo/wm.remove()/f1"));

    // exactly one ReplaceImage, carrying the returned url
    assert_eq!(sink.replace_image_urls(), vec![url]);

    // the requested asset name is the base name plus a random suffix
    let signed_requests: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == SIGNED_URL_PATH)
        .collect();
    assert_eq!(signed_requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&signed_requests[0].body).unwrap();
    let name = body["name"].as_str().unwrap();
    assert!(name.starts_with("photo"));
    assert!(name.len() > "photo".len());

    // authenticated with the bearer token and the panel identifier
    let headers = &signed_requests[0].headers;
    let auth = headers.get("authorization").unwrap().to_str().unwrap();
    assert_eq!(auth, "Bearer abc123");
    let platform = headers
        .get("x-integration-platform")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(platform.starts_with("WatermarkPanel/"));

    // usage refreshed on credential save and once after the run
    assert_eq!(requests_on(&server, USAGE_PATH).await, 2);

    // loader toggled around token validation and around the run
    let loader_events: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, PanelEvent::ToggleLoader { .. }))
        .collect();
    assert_eq!(loader_events.len(), 4);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn five_transient_failures_still_complete_exactly_once() {
    let server = MockServer::start().await;
    mount_service(&server, 5).await;

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink.clone(), server.uri());
    session.set_retry_policy(fast_policy());
    session.save_token("abc123", &server.uri()).await.unwrap();

    let url = session
        .process_image(Bytes::from_static(b"image bytes"), "photo", "demo")
        .await
        .unwrap();

    assert_eq!(requests_on(&server, UPLOAD_PATH).await, 6);
    assert_eq!(sink.replace_image_urls(), vec![url]);
}

#[tokio::test]
async fn upload_exhaustion_surfaces_terminal_error_without_notification() {
    let server = MockServer::start().await;
    mount_service(&server, usize::MAX).await; // never succeeds

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink.clone(), server.uri());
    session.set_retry_policy(RetryPolicy {
        max_attempts: 3,
        ..fast_policy()
    });
    session.save_token("abc123", &server.uri()).await.unwrap();

    let err = session
        .process_image(Bytes::from_static(b"image bytes"), "photo", "demo")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UploadExhausted { attempts: 3 }));

    // no ReplaceImage, and the loader ended switched off
    assert!(sink.replace_image_urls().is_empty());
    let last_loader = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PanelEvent::ToggleLoader { value } => Some(value),
            _ => None,
        })
        .last();
    assert_eq!(last_loader, Some(false));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn fresh_target_is_requested_after_consecutive_failures() {
    let server = MockServer::start().await;
    mount_service(&server, 3).await;

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink, server.uri());
    session.set_retry_policy(RetryPolicy {
        refresh_after: 2,
        ..fast_policy()
    });
    session.save_token("abc123", &server.uri()).await.unwrap();

    session
        .process_image(Bytes::from_static(b"image bytes"), "photo", "demo")
        .await
        .unwrap();

    // one initial signed url plus one refresh after the second failure
    assert_eq!(requests_on(&server, SIGNED_URL_PATH).await, 2);
}

#[tokio::test]
async fn rejected_token_sets_error_state_and_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ORG_DETAILS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&server)
        .await;

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink.clone(), server.uri());

    let err = session.save_token("bad", &server.uri()).await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert!(session.auth_error());
    assert!(session.client().is_none());
    assert!(!sink
        .events()
        .iter()
        .any(|e| matches!(e, PanelEvent::SaveToken { .. })));
}

#[tokio::test]
async fn deleted_token_fails_next_upload_with_authentication() {
    let server = MockServer::start().await;
    mount_service(&server, 0).await;

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink.clone(), server.uri());
    session.save_token("abc123", &server.uri()).await.unwrap();

    session.delete_token().unwrap();
    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert!(sink.events().contains(&PanelEvent::DeleteToken));
    assert!(!session.submit_enabled());

    let err = session
        .process_image(Bytes::from_static(b"image bytes"), "photo", "demo")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert_eq!(requests_on(&server, UPLOAD_PATH).await, 0);
}

#[tokio::test]
async fn second_run_is_rejected_while_one_is_active() {
    let server = MockServer::start().await;
    mount_service(&server, 0).await;

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink.clone(), server.uri());
    session.save_token("abc123", &server.uri()).await.unwrap();

    let held = session.try_begin_run().unwrap();
    let before = sink.events().len();
    let err = session
        .process_image(Bytes::from_static(b"image bytes"), "photo", "demo")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RunInProgress));
    assert_eq!(sink.events().len(), before);

    drop(held);
    session
        .process_image(Bytes::from_static(b"image bytes"), "photo", "demo")
        .await
        .unwrap();
}

#[tokio::test]
async fn host_event_dispatch_drives_a_full_run() {
    let server = MockServer::start().await;
    mount_service(&server, 1).await;

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink.clone(), server.uri());
    session.set_retry_policy(fast_policy());

    session.handle_event(HostEvent::InitialCall).await.unwrap();
    session
        .handle_event(HostEvent::TokenSaved {
            value: true,
            is_token_editing: false,
            saved_token: Some("abc123".to_string()),
            saved_form_value: FormValues::new(),
            org_id: Some("org1".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Idle);

    session
        .handle_event(HostEvent::ImageSelected {
            token: "abc123".to_string(),
            image_bytes: b"image bytes".to_vec(),
            image_name: "photo".to_string(),
            saved_cloud_name: "demo".to_string(),
        })
        .await
        .unwrap();

    let urls = sink.replace_image_urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].contains("/v2/demo/wm.remove()/f1"));
}

#[tokio::test]
async fn buy_credits_link_opens_the_console_billing_page() {
    let server = MockServer::start().await;
    mount_service(&server, 0).await;

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink.clone(), server.uri());
    session.save_token("abc123", &server.uri()).await.unwrap();

    session.open_billing().unwrap();
    let expected = format!(
        "{}/organization/org1/settings/billing/pricing",
        server.uri()
    );
    assert!(sink
        .events()
        .contains(&PanelEvent::OpenExternalUrl { url: expected }));
}

#[tokio::test]
async fn failed_usage_refresh_keeps_previous_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SIGNED_URL_PATH))
        .respond_with(signed_url_response(&server.uri()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(FlakyUpload::new(0))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ORG_DETAILS_PATH))
        .respond_with(org_response())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(USAGE_PATH))
        .respond_with(UsageOnce {
            calls: AtomicUsize::new(0),
        })
        .mount(&server)
        .await;

    let sink = RecordingSink::default();
    let mut session = Session::with_domain(sink, server.uri());
    session.set_retry_policy(fast_policy());
    session.save_token("abc123", &server.uri()).await.unwrap();
    let first = session.usage();
    assert_eq!(
        first,
        UsageSnapshot {
            used: 1.0,
            total: 10.0
        }
    );

    // the refresh after this run fails; the run must still succeed and the
    // snapshot must stay available
    session
        .process_image(Bytes::from_static(b"image bytes"), "photo", "demo")
        .await
        .unwrap();
    assert_eq!(session.usage(), first);
    assert_eq!(requests_on(&server, USAGE_PATH).await, 2);
}
