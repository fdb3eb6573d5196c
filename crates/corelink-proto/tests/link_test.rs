// Integration tests for `Link` against a scripted TCP mock core.

#![allow(clippy::unwrap_used)]

use std::time::{Duration, Instant};

use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use corelink_proto::{
    CoreEndpoint, Credentials, Error, Link, LinkConfig, LinkEvent, LinkId, LinkState,
};

// ── Mock core helpers ───────────────────────────────────────────────

async fn read_record(sock: &mut TcpStream, buf: &mut Vec<u8>) -> Value {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\r') {
            let record: Vec<u8> = buf.drain(..=pos).collect();
            let text = std::str::from_utf8(&record[..pos]).unwrap();
            return serde_json::from_str(text.trim()).unwrap();
        }
        let mut chunk = [0u8; 1024];
        let n = sock.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed while a record was expected");
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn write_record(sock: &mut TcpStream, value: &Value) {
    let mut bytes = serde_json::to_vec(value).unwrap();
    bytes.push(b'\r');
    sock.write_all(&bytes).await.unwrap();
}

fn result_for(request: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
}

fn test_config() -> LinkConfig {
    LinkConfig {
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_millis(100),
        keepalive: Duration::from_secs(30),
    }
}

fn spawn_link(
    port: u16,
    credentials: Option<Credentials>,
    config: LinkConfig,
) -> (Link, mpsc::Receiver<LinkEvent>, CancellationToken) {
    let (events_tx, events_rx) = mpsc::channel(256);
    let cancel = CancellationToken::new();
    let link = Link::spawn(
        LinkId::Primary,
        CoreEndpoint::new("127.0.0.1", port),
        credentials,
        config,
        events_tx,
        cancel.clone(),
    );
    (link, events_rx, cancel)
}

async fn wait_for_state(link: &Link, want: LinkState) {
    let mut states = link.state_stream();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *states.borrow_and_update() == want {
                return;
            }
            states.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want}"));
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn connects_and_answers_calls() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let request = read_record(&mut sock, &mut buf).await;
        assert_eq!(request["method"], "StatusGet");
        write_record(
            &mut sock,
            &result_for(&request, json!({"State": "Active", "DesignName": "Lobby"})),
        )
        .await;
        // Hold the connection until the client goes away.
        let mut sink = [0u8; 64];
        while sock.read(&mut sink).await.unwrap_or(0) > 0 {}
    });

    let (link, _events, cancel) = spawn_link(port, None, test_config());
    wait_for_state(&link, LinkState::Connected).await;

    let result = link.call("StatusGet", Value::Null).await.unwrap();
    assert_eq!(result["State"], "Active");
    assert_eq!(link.in_flight(), 0);

    cancel.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn logon_is_first_on_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();

        let logon = read_record(&mut sock, &mut buf).await;
        assert_eq!(logon["method"], "Logon");
        assert_eq!(logon["params"]["User"], "control");
        assert_eq!(logon["params"]["Password"], "hunter2");
        write_record(&mut sock, &result_for(&logon, json!(true))).await;

        let status = read_record(&mut sock, &mut buf).await;
        assert_eq!(status["method"], "StatusGet");
        write_record(&mut sock, &result_for(&status, json!({"State": "Idle"}))).await;

        let mut sink = [0u8; 64];
        while sock.read(&mut sink).await.unwrap_or(0) > 0 {}
    });

    let credentials = Credentials {
        username: "control".into(),
        password: SecretString::from("hunter2".to_string()),
    };
    let (link, _events, cancel) = spawn_link(port, Some(credentials), test_config());
    wait_for_state(&link, LinkState::Connected).await;

    let result = link.call("StatusGet", Value::Null).await.unwrap();
    assert_eq!(result["State"], "Idle");

    cancel.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_logon_faults_the_link() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { return };
            let mut buf = Vec::new();
            let logon = read_record(&mut sock, &mut buf).await;
            write_record(
                &mut sock,
                &json!({
                    "jsonrpc": "2.0",
                    "id": logon["id"],
                    "error": {"code": 10, "message": "Logon required"},
                }),
            )
            .await;
        }
    });

    let credentials = Credentials {
        username: "control".into(),
        password: SecretString::from("wrong".to_string()),
    };
    let (link, _events, cancel) = spawn_link(port, Some(credentials), test_config());
    wait_for_state(&link, LinkState::Faulted).await;

    // Calls must fail fast while faulted.
    assert!(matches!(link.call("StatusGet", Value::Null).await, Err(Error::NotConnected)));

    cancel.cancel();
}

#[tokio::test]
async fn pending_requests_fail_fast_on_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        // Swallow one request, then drop the socket without replying.
        let _request = read_record(&mut sock, &mut buf).await;
        drop(sock);
    });

    let (link, _events, cancel) = spawn_link(port, None, test_config());
    wait_for_state(&link, LinkState::Connected).await;

    let started = Instant::now();
    let err = link.call("Control.Get", json!(["Gain1"])).await.unwrap_err();
    assert!(matches!(err, Error::LinkLost), "expected LinkLost, got {err:?}");
    // Link-lost beats the 2 s request timeout by a wide margin.
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(link.in_flight(), 0);

    cancel.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn reconnects_after_connection_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        // First connection: drop straight away.
        let (sock, _) = listener.accept().await.unwrap();
        drop(sock);

        // Second connection: behave.
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        loop {
            let request = read_record(&mut sock, &mut buf).await;
            write_record(&mut sock, &result_for(&request, json!(true))).await;
        }
    });

    let (link, _events, cancel) = spawn_link(port, None, test_config());

    // Keep trying until a call lands on the reconnected session.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if link.call("NoOp", Value::Null).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("link never recovered");

    cancel.cancel();
    server.abort();
}

#[tokio::test]
async fn call_fails_fast_with_no_listener() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (link, _events, cancel) = spawn_link(port, None, test_config());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let err = link.call("Control.Set", json!({"Name": "Gain1", "Value": 0})).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    assert!(started.elapsed() < Duration::from_millis(100));

    cancel.cancel();
}

#[tokio::test]
async fn idle_link_sends_keepalive() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let request = read_record(&mut sock, &mut buf).await;
        assert_eq!(request["method"], "NoOp");
        write_record(&mut sock, &result_for(&request, json!(true))).await;
    });

    let config = LinkConfig { keepalive: Duration::from_millis(100), ..test_config() };
    let (link, _events, cancel) = spawn_link(port, None, config);
    wait_for_state(&link, LinkState::Connected).await;

    // The mock asserts the first unprompted record is a NoOp.
    tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();

    cancel.cancel();
}

#[tokio::test]
async fn notifications_reach_the_event_queue() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        write_record(
            &mut sock,
            &json!({
                "jsonrpc": "2.0",
                "method": "EngineStatus",
                "params": {"State": "Standby", "DesignName": "Lobby"},
            }),
        )
        .await;
        let mut sink = [0u8; 64];
        while sock.read(&mut sink).await.unwrap_or(0) > 0 {}
    });

    let (link, mut events, cancel) = spawn_link(port, None, test_config());
    wait_for_state(&link, LinkState::Connected).await;

    let notification = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.expect("event queue closed") {
                LinkEvent::Notification { method, params, .. } => return (method, params),
                LinkEvent::State { .. } => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(notification.0, "EngineStatus");
    assert_eq!(notification.1["State"], "Standby");

    cancel.cancel();
    server.await.unwrap();
}
