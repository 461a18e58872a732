// Integration tests for `Session`: login, queueing, reconnect and events.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

use common::{MockServer, WAIT};
use replink_api::{Error, ErrorKind, Request, Session, SessionConfig, SessionState};

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_config() -> SessionConfig {
    SessionConfig {
        request_timeout: Duration::from_secs(5),
        backoff: vec![Duration::ZERO, Duration::from_millis(50)],
    }
}

/// Teardown causes as `(kind, message)`; `Error` is not `Clone`.
fn disconnects(session: &Session) -> mpsc::UnboundedReceiver<(ErrorKind, String)> {
    let (tx, rx) = mpsc::unbounded_channel();
    session
        .on_disconnect(move |e| {
            let _ = tx.send((e.kind(), e.to_string()));
        })
        .unwrap();
    rx
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn connected(session: &Session) {
    timeout(WAIT, session.wait_connected()).await.unwrap().unwrap();
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_precedes_queued_requests() {
    let mut server = MockServer::start().await;
    let session = Session::start(server.endpoint(), fast_config());

    let (tx, mut replies) = mpsc::unbounded_channel();
    for action in ["listPrinter", "listModels"] {
        let tx = tx.clone();
        session
            .submit(Request::new(action), move |data: Value| {
                let _ = tx.send(data);
            })
            .unwrap();
    }

    let mut peer = server.accept().await;
    let login = peer.expect("login").await;
    assert_eq!(login["callback_id"], 1);
    assert_eq!(session.state(), SessionState::AwaitingLogin);
    peer.respond(&login, json!({ "ok": true })).await;

    let a = peer.expect("listPrinter").await;
    assert_eq!(a["callback_id"], 2);
    peer.respond(&a, json!("A")).await;

    let b = peer.expect("listModels").await;
    assert_eq!(b["callback_id"], 3);
    peer.respond(&b, json!("B")).await;

    assert_eq!(next(&mut replies).await, json!("A"));
    assert_eq!(next(&mut replies).await, json!("B"));
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_rejected_login_tears_down_and_retries() {
    let mut server = MockServer::start().await;
    let session = Session::start(server.endpoint(), fast_config());
    let mut errors = disconnects(&session);

    let mut first = server.accept().await;
    first.expect_login(false).await;

    let (kind, message) = next(&mut errors).await;
    assert_eq!(kind, ErrorKind::NotOk);
    assert!(message.contains("login"));
    assert!(first.is_closed_by_client().await);

    let _second = server.accept_logged_in().await;
    connected(&session).await;
}

#[tokio::test]
async fn test_builder_handlers_see_first_attempt() {
    let mut server = MockServer::start().await;

    let (err_tx, mut errors) = mpsc::unbounded_channel();
    let (login_tx, mut logins) = mpsc::unbounded_channel();
    let (temp_tx, mut temps) = mpsc::unbounded_channel();
    let session = Session::builder(server.endpoint())
        .config(fast_config())
        .on_disconnect(move |e| {
            let _ = err_tx.send(e.kind());
        })
        .on_login(move || {
            let _ = login_tx.send(());
        })
        .subscribe("temp", move |printer, _| {
            let _ = temp_tx.send(printer.to_owned());
        })
        .start();

    let mut first = server.accept().await;
    first.expect_login(false).await;
    assert_eq!(next(&mut errors).await, ErrorKind::NotOk);

    let mut second = server.accept_logged_in().await;
    next(&mut logins).await;
    connected(&session).await;

    second
        .push_events(json!([{ "event": "temp", "printer": "mk3", "data": {} }]))
        .await;
    assert_eq!(next(&mut temps).await, "mk3");
}

#[tokio::test]
async fn test_on_login_fires_after_each_login() {
    let mut server = MockServer::start().await;
    let session = Session::start(server.endpoint(), fast_config());

    let (tx, mut logins) = mpsc::unbounded_channel();
    session
        .on_login(move || {
            let _ = tx.send(());
        })
        .unwrap();

    let first = server.accept_logged_in().await;
    next(&mut logins).await;
    first.close().await;

    let _second = server.accept_logged_in().await;
    next(&mut logins).await;
}

// ── Queue ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_burst_is_sent_one_at_a_time() {
    let mut server = MockServer::start().await;
    let session = Session::start(server.endpoint(), fast_config());
    let mut peer = server.accept_logged_in().await;
    connected(&session).await;

    let (tx, mut replies) = mpsc::unbounded_channel();
    for n in 0..5 {
        let tx = tx.clone();
        session
            .submit(Request::new("listPrinter").with("n", n), move |data: Value| {
                let _ = tx.send(data);
            })
            .unwrap();
    }

    for n in 0..5 {
        let request = peer.expect("listPrinter").await;
        assert_eq!(request["data"]["n"], n);

        let extra = peer.recv_within(Duration::from_millis(100)).await;
        assert!(extra.is_none(), "second request on the wire: {extra:?}");

        peer.respond(&request, json!(n)).await;
        assert_eq!(next(&mut replies).await, json!(n));
    }
}

#[tokio::test]
async fn test_events_with_null_printer_keep_session_up() {
    let mut server = MockServer::start().await;
    let session = Session::start(server.endpoint(), fast_config());
    let mut errors = disconnects(&session);

    let (tx, mut changes) = mpsc::unbounded_channel();
    session
        .subscribe("printerListChanged", move |printer, _| {
            let _ = tx.send(printer.to_owned());
        })
        .unwrap();

    let mut peer = server.accept_logged_in().await;
    connected(&session).await;
    peer.push_events(json!([{ "event": "printerListChanged", "printer": null, "data": [] }]))
        .await;

    assert_eq!(next(&mut changes).await, "");
    assert!(session.is_connected());
    assert!(errors.try_recv().is_err());
}

// ── Reconnect ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_events_survive_reconnects() {
    let mut server = MockServer::start().await;
    let session = Session::start(server.endpoint(), fast_config());

    let (tx, mut temps) = mpsc::unbounded_channel();
    session
        .subscribe("temp", move |printer, data| {
            let _ = tx.send((printer.to_owned(), data.clone()));
        })
        .unwrap();

    for _ in 0..2 {
        let peer = server.accept_logged_in().await;
        connected(&session).await;
        peer.close().await;
    }

    let mut peer = server.accept_logged_in().await;
    connected(&session).await;
    peer.push_events(json!([{ "event": "temp", "printer": "mk3", "data": { "T": 60 } }]))
        .await;

    assert_eq!(next(&mut temps).await, ("mk3".to_owned(), json!({ "T": 60 })));
}

#[tokio::test]
async fn test_in_flight_request_is_lost_queued_request_survives() {
    let mut server = MockServer::start().await;
    let session = Session::start(server.endpoint(), fast_config());
    let mut errors = disconnects(&session);

    let mut peer = server.accept_logged_in().await;
    connected(&session).await;

    let s = session.clone();
    let lost = tokio::spawn(async move { s.request(Request::new("listModels")).await });
    peer.expect("listModels").await;

    let s = session.clone();
    let survivor = tokio::spawn(async move { s.request(Request::new("listPrinter")).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    peer.close().await;

    let lost = timeout(WAIT, lost).await.unwrap().unwrap();
    assert!(matches!(lost, Err(Error::Disconnected)));
    next(&mut errors).await;

    let mut peer = server.accept_logged_in().await;
    let request = peer.expect("listPrinter").await;
    peer.respond(&request, json!([{ "slug": "mk3" }])).await;

    let survivor = timeout(WAIT, survivor).await.unwrap().unwrap();
    assert_eq!(survivor.unwrap(), json!([{ "slug": "mk3" }]));
}

#[tokio::test]
async fn test_timeout_tears_down_session() {
    let mut server = MockServer::start().await;
    let config = SessionConfig {
        request_timeout: Duration::from_millis(100),
        ..fast_config()
    };
    let session = Session::start(server.endpoint(), config);
    let mut errors = disconnects(&session);

    let mut peer = server.accept_logged_in().await;
    connected(&session).await;

    let s = session.clone();
    let pending = tokio::spawn(async move { s.request(Request::new("listPrinter")).await });
    peer.expect("listPrinter").await;

    let (kind, message) = next(&mut errors).await;
    assert_eq!(kind, ErrorKind::Timeout);
    assert!(message.ends_with("after 100ms"), "{message}");
    let pending = timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(matches!(pending, Err(Error::Disconnected)));

    let _peer = server.accept_logged_in().await;
    connected(&session).await;
}

#[tokio::test]
async fn test_backoff_delays_consecutive_failures() {
    let port = {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoint = replink_api::Endpoint::new(
        "127.0.0.1",
        port,
        replink_api::SecretString::from("k".to_owned()),
    );
    let config = SessionConfig {
        request_timeout: Duration::from_secs(5),
        backoff: vec![Duration::ZERO, Duration::from_millis(300)],
    };
    let session = Session::start(endpoint, config);

    let (tx, mut failures) = mpsc::unbounded_channel();
    session
        .on_disconnect(move |_| {
            let _ = tx.send(Instant::now());
        })
        .unwrap();

    let t1 = next(&mut failures).await;
    let t2 = next(&mut failures).await;
    let t3 = next(&mut failures).await;

    assert!(t2 - t1 < Duration::from_millis(250), "first retry is immediate");
    assert!(t3 - t2 >= Duration::from_millis(300), "second retry waits");
    session.shutdown();
}

#[tokio::test]
async fn test_backoff_resets_only_after_login() {
    let mut server = MockServer::start().await;
    let config = SessionConfig {
        request_timeout: Duration::from_secs(5),
        backoff: vec![Duration::ZERO, Duration::from_millis(400)],
    };
    let session = Session::start(server.endpoint(), config);

    let (tx, mut failures) = mpsc::unbounded_channel();
    session
        .on_disconnect(move |_| {
            let _ = tx.send(Instant::now());
        })
        .unwrap();

    // Two refused logins: the handshake alone does not reset the counter.
    let mut peer = server.accept().await;
    peer.expect_login(false).await;
    let failed = next(&mut failures).await;

    let mut peer = server.accept().await;
    assert!(failed.elapsed() < Duration::from_millis(300), "first retry is immediate");
    peer.expect_login(false).await;
    let failed = next(&mut failures).await;

    let peer = server.accept_logged_in().await;
    assert!(failed.elapsed() >= Duration::from_millis(400), "second retry waits");
    connected(&session).await;

    // A successful login starts the schedule over.
    peer.close().await;
    let failed = next(&mut failures).await;
    let _peer = server.accept().await;
    assert!(failed.elapsed() < Duration::from_millis(300), "retry after login is immediate");

    session.shutdown();
}

// ── Actions ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_model_group_helpers() {
    let mut server = MockServer::start().await;
    let session = Session::start(server.endpoint(), fast_config());
    let mut peer = server.accept_logged_in().await;
    connected(&session).await;

    let s = session.clone();
    let groups = tokio::spawn(async move { s.model_groups("mk3").await });
    let request = peer.expect("listModelGroups").await;
    assert_eq!(request["printer"], "mk3");
    peer.respond(&request, json!({ "ok": true, "groupNames": ["#", "calibration"] }))
        .await;
    assert_eq!(
        timeout(WAIT, groups).await.unwrap().unwrap().unwrap(),
        vec!["#".to_owned(), "calibration".to_owned()]
    );

    let s = session.clone();
    let added = tokio::spawn(async move { s.add_model_group("mk3", "calibration").await });
    let request = peer.expect("addModelGroup").await;
    assert_eq!(request["data"], json!({ "groupName": "calibration" }));
    peer.respond(&request, json!({ "ok": false })).await;

    let added = timeout(WAIT, added).await.unwrap().unwrap();
    assert!(matches!(added, Err(Error::NotOk { ref action }) if action == "addModelGroup"));
    // A refused helper call leaves the session up.
    assert!(session.is_connected());

    let s = session.clone();
    let sent = tokio::spawn(async move { s.send_command("mk3", "M105").await });
    let request = peer.expect("send").await;
    assert_eq!(request["data"], json!({ "cmd": "M105" }));
    peer.respond(&request, json!({})).await;
    timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_stops_session() {
    let mut server = MockServer::start().await;
    let session = Session::start(server.endpoint(), fast_config());
    let mut peer = server.accept_logged_in().await;
    connected(&session).await;

    session.shutdown();

    let mut state = session.watch_state();
    timeout(WAIT, state.wait_for(|s| *s == SessionState::Disconnected))
        .await
        .unwrap()
        .ok();
    assert!(peer.is_closed_by_client().await);

    let err = session.request(Request::new("listPrinter")).await.unwrap_err();
    assert!(matches!(err, Error::SessionClosed));
    assert!(matches!(session.wait_connected().await, Err(Error::SessionClosed)));
}
