use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bounty_programs::ProgramStore;
use bounty_programs::server::{self, ServerState};
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    _runtime: Runtime,
    _dir: TempDir,
}

impl TestServer {
    fn start() -> Self {
        let dir = tempdir().expect("tempdir");
        let store = ProgramStore::open(dir.path().join("data").join("programs.json"))
            .expect("open store");
        let state = Arc::new(ServerState::new(store));

        let runtime = Runtime::new().expect("runtime");
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel::<()>();
        runtime.spawn(server::serve(listener, state, async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            shutdown: Some(tx),
            _runtime: runtime,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Status and JSON body, treating 4xx/5xx as data rather than errors.
fn send(result: Result<ureq::Response, ureq::Error>) -> (u16, Value) {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => panic!("transport error: {err}"),
    };
    let status = response.status();
    let body = response.into_json::<Value>().unwrap_or(Value::Null);
    (status, body)
}

#[test]
fn full_program_lifecycle() {
    let server = TestServer::start();

    let (status, created) = send(ureq::post(&server.url("/api/programs")).send_json(json!({
        "name": "Web Security",
        "description": "desc",
        "bountyRanges": {"low": "$1", "medium": "$2", "high": "$3", "critical": "$4"},
        "markdown": "# x",
        "scope": [{"id": 1, "type": "Web", "target": "example.com", "description": "main site"}]
    })));
    assert_eq!(status, 201);
    assert_eq!(created["status"], "Active");
    assert_eq!(created["reports"], 0);
    assert_eq!(created["bounties"], "$0");
    assert_eq!(created["lastUpdated"], Value::Null);
    assert_eq!(created["scope"][0]["type"], "Web");
    let id = created["id"].as_str().expect("id").to_string();
    let program_url = server.url(&format!("/api/programs/{id}"));

    let (status, fetched) = send(ureq::get(&program_url).call());
    assert_eq!(status, 200);
    assert_eq!(fetched, created);

    let (status, updated) = send(ureq::put(&program_url).send_json(json!({
        "status": "Closed",
        "reports": 99,
        "createdAt": "2000-01-01T00:00:00Z",
        "id": "hijacked"
    })));
    assert_eq!(status, 200);
    assert_eq!(updated["status"], "Closed");
    assert_eq!(updated["reports"], 0);
    assert_eq!(updated["id"], created["id"]);
    assert_eq!(updated["createdAt"], created["createdAt"]);
    assert!(updated["lastUpdated"].is_string());

    let (status, listed) = send(ureq::get(&server.url("/api/programs")).call());
    assert_eq!(status, 200);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, body) = send(ureq::delete(&program_url).call());
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Program deleted successfully");

    let (status, body) = send(ureq::get(&program_url).call());
    assert_eq!(status, 404);
    assert_eq!(body["message"], "Program not found");

    let (status, listed) = send(ureq::get(&server.url("/api/programs")).call());
    assert_eq!(status, 200);
    assert_eq!(listed, json!([]));
}

#[test]
fn delete_of_unknown_program_is_404() {
    let server = TestServer::start();

    let (status, body) = send(ureq::delete(&server.url("/api/programs/nope")).call());

    assert_eq!(status, 404);
    assert_eq!(body, json!({"message": "Program not found"}));
}

#[test]
fn responses_allow_cross_origin_calls() {
    let server = TestServer::start();

    let response = ureq::get(&server.url("/api/health")).call().expect("health");

    assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    assert_eq!(response.content_type(), "application/json");
    let body: Value = response.into_json().expect("json");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["programs"], 0);
}

#[test]
fn parallel_clients_do_not_lose_creates() {
    let server = TestServer::start();
    let url = server.url("/api/programs");

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let url = url.clone();
            std::thread::spawn(move || {
                for i in 0..5 {
                    let (status, _) = send(
                        ureq::post(&url).send_json(json!({"name": format!("w{worker}-{i}")})),
                    );
                    assert_eq!(status, 201);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("client thread");
    }

    let (_, listed) = send(ureq::get(&url).call());
    assert_eq!(listed.as_array().map(Vec::len), Some(20));
}

/// A request that is half-way through its body when shutdown starts still
/// gets its response, and `serve` returns once the connection drains.
#[tokio::test]
async fn shutdown_drains_in_flight_requests() {
    let dir = tempdir().expect("tempdir");
    let store = ProgramStore::open(dir.path().join("programs.json")).expect("open store");
    let state = Arc::new(ServerState::new(store));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel::<()>();
    let server = tokio::spawn(server::serve_with_drain(
        listener,
        Arc::clone(&state),
        async move {
            let _ = rx.await;
        },
        Duration::from_secs(5),
    ));

    let body = r#"{"name": "Drained"}"#;
    let mut stream = TcpStream::connect(addr).await.expect("connect server");
    let head = format!(
        "POST /api/programs HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.expect("write head");
    stream
        .write_all(&body.as_bytes()[..5])
        .await
        .expect("write first chunk");
    tokio::time::sleep(Duration::from_millis(200)).await;

    tx.send(()).expect("signal shutdown");
    tokio::time::sleep(Duration::from_millis(200)).await;
    stream
        .write_all(&body.as_bytes()[5..])
        .await
        .expect("write rest of body");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    assert!(response.starts_with("HTTP/1.1 201"), "{response}");
    assert!(response.contains("\"name\":\"Drained\""), "{response}");

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("serve returns after draining")
        .expect("server task")
        .expect("serve result");
    assert_eq!(state.store.list().len(), 1);
}
