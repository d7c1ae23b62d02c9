//! End-to-end sessions: a host and a frame joined by in-process channels.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_test::assert_ok;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use hashi::window::globals;
use hashi::{
    connect_pair, ContentWindow, HashiConfig, HashiError, MainClient, SandboxClient,
    SessionStore, StaticContentProvider,
};

fn config() -> HashiConfig {
    let mut config = HashiConfig::default();
    config.mediator.reply_timeout_ms = 2_000;
    config.session.user_id = Some("learner-1".into());
    config.session.user_name = Some("Ada".into());
    config.session.content_id = Some("quiz-7".into());
    config
}

fn provider() -> Arc<StaticContentProvider> {
    Arc::new(
        StaticContentProvider::new()
            .with_node(json!({"id": "abc123", "title": "Frogs", "parent": "root"}))
            .with_node(json!({"id": "def456", "title": "Toads", "parent": "root"})),
    )
}

/// Start a session and wait until the frame has reported ready.
async fn start(sessions: SessionStore) -> (Arc<MainClient>, Arc<SandboxClient>) {
    let config = config();
    let (host_mediator, frame_mediator) = connect_pair(&config.mediator);
    let host = MainClient::with_sessions(host_mediator, config.clone(), provider(), sessions)
        .expect("host starts");
    let frame = SandboxClient::new(frame_mediator, config).expect("frame starts");

    host.ready_check().expect("ready check sent");
    host.wait_until_ready(Duration::from_secs(2))
        .await
        .expect("frame becomes ready");
    (host, frame)
}

/// Poll `condition` until it holds or two seconds pass.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A content request from the frame is answered by the host's provider.
#[tokio::test]
async fn test_content_request_round_trip() {
    let (_host, frame) = start(SessionStore::new()).await;

    let node = assert_ok!(frame.kolibri().get_content_by_id("abc123").await);
    assert_eq!(node["id"], "abc123");
    assert_eq!(node["title"], "Frogs");

    let page = assert_ok!(
        frame
            .kolibri()
            .get_content_by_filter(json!({"parent": "root"}))
            .await
    );
    assert_eq!(page["results"].as_array().unwrap().len(), 2);
    assert_eq!(frame.mediator().pending_count(), 0);
}

/// Provider failures come back as rejections, not timeouts.
#[tokio::test]
async fn test_missing_content_is_rejected() {
    let (_host, frame) = start(SessionStore::new()).await;

    let err = frame
        .kolibri()
        .get_content_by_id("nothing-here")
        .await
        .unwrap_err();
    match err {
        HashiError::Rejected(reason) => {
            assert_eq!(reason, json!("Provider error: No content node nothing-here"))
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

/// Storage written in one session is replayed into the next.
#[tokio::test]
async fn test_state_survives_sessions() {
    let (host, frame) = start(SessionStore::new()).await;

    frame.local_storage().set_item("level", 3).unwrap();
    frame.cookie().set_cookie("seen=yes; path=/; max-age=3600").unwrap();
    frame.session_storage().set_item("scratch", "x").unwrap();

    assert!(
        eventually(|| host.sessions().get(hashi::Namespace::Cookie).is_some()).await,
        "cookie state never reached the host"
    );
    assert!(eventually(|| host.sessions().get(hashi::Namespace::LocalStorage).is_some()).await);
    // Session storage stays in the frame.
    assert!(host
        .sessions()
        .get(hashi::Namespace::SessionStorage)
        .is_none());

    let saved = host.sessions().to_json();
    drop(frame);
    drop(host);

    let (_host, frame) = start(SessionStore::from_json(&saved)).await;
    assert!(eventually(|| frame.local_storage().get_item("level").as_deref() == Some("3")).await);
    assert!(eventually(|| frame.cookie().cookie() == "seen=yes").await);
    assert_eq!(frame.session_storage().get_item("scratch"), None);
}

/// The frame learns the learner and the host clock when the session starts.
#[tokio::test]
async fn test_session_start_syncs_learner_and_clock() {
    let config = config();
    let (host_mediator, frame_mediator) = connect_pair(&config.mediator);
    let host = MainClient::new(host_mediator, config.clone(), provider()).unwrap();
    let frame = SandboxClient::new(frame_mediator, config).unwrap();
    host.clock().advance(chrono::Duration::days(30));

    host.ready_check().unwrap();
    assert_ok!(host.wait_until_ready(Duration::from_secs(2)).await);

    assert!(eventually(|| frame.clock().offset() > chrono::Duration::days(29)).await);
    assert!(eventually(|| frame.scorm().get_value("cmi.core.student_name") == "Ada").await);
    assert_eq!(frame.xapi().actor()["mbox"], "mailto:learner-1@hashi.xapi");
}

/// Completing the activity in the frame shows up as host-side progress.
#[tokio::test]
async fn test_progress_reaches_host() {
    let (host, frame) = start(SessionStore::new()).await;
    assert_eq!(host.progress(), None);

    frame
        .xapi()
        .send_statement(json!({
            "verb": {"id": "http://adlnet.gov/expapi/verbs/completed"},
        }))
        .unwrap();

    assert!(eventually(|| host.progress() == Some(1.0)).await);
    let stored = host.sessions().get(hashi::Namespace::XApi).unwrap();
    assert_eq!(stored["statements"].as_array().unwrap().len(), 1);
}

/// A request nobody answers fails after the configured timeout.
#[tokio::test]
async fn test_unanswered_request_times_out() {
    let mut config = config();
    config.mediator.reply_timeout_ms = 50;
    let (_host_mediator, frame_mediator) = connect_pair(&config.mediator);
    let frame = SandboxClient::new(frame_mediator, config).unwrap();

    let err = frame.kolibri().get_context().await.unwrap_err();
    assert!(matches!(err, HashiError::ReplyTimeout { timeout_ms: 50, .. }));
    assert_eq!(frame.mediator().pending_count(), 0);
}

/// Shutting the frame down cancels requests still in flight.
#[tokio::test]
async fn test_shutdown_cancels_pending_requests() {
    let config = config();
    let (_host_mediator, frame_mediator) = connect_pair(&config.mediator);
    let frame = SandboxClient::new(frame_mediator, config).unwrap();

    let caller = frame.clone();
    let request = tokio::spawn(async move { caller.kolibri().get_version().await });
    assert!(eventually(|| frame.mediator().pending_count() == 1).await);

    frame.shutdown().unwrap();
    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, HashiError::Cancelled));
}

/// An H5P package loaded in the frame is visible to content as
/// `H5PIntegration`, and its statements carry the session learner.
#[tokio::test]
async fn test_h5p_package_in_frame() {
    let (host, frame) = start(SessionStore::new()).await;

    let manifest = json!({
        "title": "Pond life",
        "mainLibrary": "H5P.Blanks",
        "preloadedDependencies": [{"machineName": "H5P.Blanks", "majorVersion": 1, "minorVersion": 14}]
    })
    .to_string();
    let library = json!({
        "machineName": "H5P.Blanks",
        "majorVersion": 1,
        "minorVersion": 14,
        "preloadedJs": [{"path": "js/blanks.js"}],
        "preloadedCss": [{"path": "css/blanks.css"}]
    })
    .to_string();
    let data = zip_of(&[
        ("h5p.json", manifest.as_str()),
        ("content/content.json", r#"{"text": "Frogs live in *ponds*"}"#),
        ("H5P.Blanks-1.14/library.json", library.as_str()),
        ("H5P.Blanks-1.14/js/blanks.js", "H5P.Blanks = function () {};"),
        ("H5P.Blanks-1.14/css/blanks.css", ".h5p-blanks { color: green; }"),
    ]);

    let package = assert_ok!(frame.load_h5p(&data));
    assert_eq!(package.load_order(), vec!["H5P.Blanks 1.14".to_string()]);

    let window = ContentWindow::new();
    frame.iframe_initialize(&window);
    let integration = window
        .get::<Value>(globals::H5P_INTEGRATION)
        .expect("integration installed");
    assert_eq!(
        integration["contents"]["cid-quiz-7"]["library"],
        "H5P.Blanks 1.14"
    );
    let script_url = integration["contents"]["cid-quiz-7"]["scripts"][0]
        .as_str()
        .unwrap();
    assert!(frame.blobs().get(script_url).is_some());

    frame
        .h5p()
        .trigger_xapi(json!({
            "actor": {"mbox": "mailto:someone-else@example.com"},
            "verb": {"id": "http://adlnet.gov/expapi/verbs/passed"},
            "object": {"id": "https://hashi.xapi/content/quiz-7"}
        }))
        .unwrap();
    assert!(eventually(|| host.progress() == Some(1.0)).await);

    let statements = frame
        .xapi()
        .get_statements(&xapi::StatementFilter::default())
        .unwrap();
    assert_eq!(statements[0]["actor"]["mbox"], "mailto:learner-1@hashi.xapi");
}
