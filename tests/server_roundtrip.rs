use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use studyspace::clock::ManualClock;
use studyspace::config::EngineConfig;
use studyspace::engine::Engine;
use studyspace::model::{HOUR_MS, MINUTE_MS, Ms};
use studyspace::notify::NotifyHub;
use studyspace::server;

/// 2025-05-01 00:00 UTC
const MAY_1: Ms = 1_746_057_600_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server(name: &str) -> (SocketAddr, Arc<Engine>, Arc<ManualClock>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join("studyspace_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    let wal_path = dir.join(name);
    let _ = std::fs::remove_file(&wal_path);
    let clock = Arc::new(ManualClock::new(MAY_1 - 12 * HOUR_MS));
    let engine = Arc::new(
        Engine::new(
            wal_path,
            Arc::new(NotifyHub::new()),
            clock.clone(),
            EngineConfig::default(),
        )
        .unwrap(),
    );

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = server::process_connection(socket, engine).await;
            });
        }
    });

    (addr, engine, clock)
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.framed.send(line.to_string()).await.unwrap();
    }

    async fn next(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a line")
            .expect("connection closed")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Send a request and return its reply, skipping pushed events.
    async fn call(&mut self, request: Value) -> Value {
        self.send_raw(&request.to_string()).await;
        loop {
            let v = self.next().await;
            if v.get("ok").is_some() {
                return v;
            }
        }
    }

    async fn ok(&mut self, request: Value) -> Value {
        let reply = self.call(request).await;
        assert_eq!(reply["ok"], true, "unexpected reply: {reply}");
        reply["data"].clone()
    }

    async fn error_code(&mut self, request: Value) -> String {
        let reply = self.call(request).await;
        assert_eq!(reply["ok"], false, "unexpected reply: {reply}");
        reply["error"]["code"].as_str().unwrap().to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn full_lifecycle_over_tcp() {
    let (addr, _engine, clock) = start_test_server("lifecycle.wal").await;
    let mut c = Client::connect(addr).await;

    let space = c
        .ok(json!({"op":"provision","name":"R1","kind":"self-study","building":"A","floor":1}))
        .await;
    let id = space["id"].as_str().unwrap().to_string();
    assert_eq!(space["occupancy"]["status"], "empty");

    let booked = c
        .ok(json!({"op":"book","space_id":id,"user_id":"u1","slot":"08:00-10:00","date":"2025-05-01"}))
        .await;
    assert_eq!(booked["space"]["occupancy"]["status"], "booked");
    assert_eq!(
        booked["space"]["occupancy"]["check_in_deadline"],
        MAY_1 + 8 * HOUR_MS + 15 * MINUTE_MS
    );
    assert!(booked["message"].as_str().unwrap().contains("08:15"));

    let schedule = c.ok(json!({"op":"schedule","space_id":id,"date":"2025-05-01"})).await;
    assert_eq!(schedule["08:00-10:00"], "booked");
    assert_eq!(schedule["13:00-15:00"], "empty");

    assert_eq!(c.error_code(json!({"op":"check_in","space_id":id,"user_id":"u2"})).await, "not_owner");

    clock.set(MAY_1 + 8 * HOUR_MS + 10 * MINUTE_MS);
    let checked_in = c.ok(json!({"op":"check_in","space_id":id,"user_id":"u1"})).await;
    assert_eq!(checked_in["space"]["occupancy"]["status"], "in-use");

    let claims = c.ok(json!({"op":"my_claims","user_id":"u1"})).await;
    assert_eq!(claims.as_array().unwrap().len(), 1);

    let out = c.ok(json!({"op":"check_out","space_id":id,"user_id":"u1"})).await;
    assert_eq!(out["space"]["occupancy"]["status"], "empty");

    let history = c.ok(json!({"op":"history","user_id":"u1"})).await;
    assert_eq!(history["total"], 1);
    let row = &history["items"][0];
    assert_eq!(row["closed_by"], "checked_out");
    assert!(row["checked_in_at"].is_i64());
    assert!(row["checked_out_at"].is_i64());

    let notes = c.ok(json!({"op":"notifications","user_id":"u1"})).await;
    let notes = notes.as_array().unwrap();
    assert_eq!(notes.len(), 3);
    assert!(notes[0]["message"].as_str().unwrap().contains("rate"));

    let rated = c
        .ok(json!({"op":"rate","space_id":id,"user_id":"u1","score":4,"comment":"quiet"}))
        .await;
    assert_eq!(rated["score"], 4);
    assert_eq!(
        c.error_code(json!({"op":"rate","space_id":id,"user_id":"u1","score":0})).await,
        "limit_exceeded"
    );
    let ratings = c.ok(json!({"op":"ratings","space_id":id})).await;
    assert_eq!(ratings.as_array().unwrap().len(), 1);
    assert_eq!(ratings[0]["comment"], "quiet");

    assert_eq!(c.error_code(json!({"op":"cancel","space_id":id,"user_id":"u1"})).await, "wrong_state");
}

#[tokio::test]
async fn subscribers_receive_pushed_events() {
    let (addr, _engine, _clock) = start_test_server("subscribers.wal").await;
    let mut actor = Client::connect(addr).await;
    let mut watcher = Client::connect(addr).await;

    let topics = watcher
        .ok(json!({"op":"subscribe","topics":["space_status","notifications"]}))
        .await;
    assert_eq!(topics, json!(["space_status", "notifications"]));

    let space = actor
        .ok(json!({"op":"provision","name":"R1","kind":"self-study","building":"A","floor":1}))
        .await;
    let id = space["id"].as_str().unwrap().to_string();
    actor
        .ok(json!({"op":"book","space_id":id,"user_id":"u1","slot":"08:00-10:00","date":"2025-05-01"}))
        .await;

    let provisioned = watcher.next().await;
    assert_eq!(provisioned["event"], "space_updated");
    assert_eq!(provisioned["status"], "empty");

    // Status and notification events arrive through separate topics, so
    // their relative order is not fixed.
    let mut seen = vec![watcher.next().await, watcher.next().await];
    seen.sort_by_key(|v| v["event"].as_str().unwrap().to_string());
    assert_eq!(seen[0]["event"], "notification");
    assert_eq!(seen[0]["user_id"], "u1");
    assert_eq!(seen[1]["event"], "space_updated");
    assert_eq!(seen[1]["space_id"], id.as_str());
    assert_eq!(seen[1]["status"], "booked");
}

#[tokio::test]
async fn search_and_options_over_tcp() {
    let (addr, engine, _clock) = start_test_server("search.wal").await;
    engine.seed_sample_spaces().await.unwrap();
    let mut c = Client::connect(addr).await;

    let options = c.ok(json!({"op":"options"})).await;
    assert_eq!(options["floors"], json!([1, 2, 3, 4, 5]));

    let page = c
        .ok(json!({"op":"search","user_id":"u1","floor":3,"kind":"self-study","limit":2,"page":2}))
        .await;
    assert_eq!(page["total"], 5);
    assert_eq!(page["total_pages"], 3);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);

    assert_eq!(c.error_code(json!({"op":"search","user_id":"u1","page":0})).await, "limit_exceeded");
    assert_eq!(c.ok(json!({"op":"list_spaces"})).await.as_array().unwrap().len(), 40);
}

#[tokio::test]
async fn malformed_input_keeps_connection_open() {
    let (addr, _engine, _clock) = start_test_server("malformed.wal").await;
    let mut c = Client::connect(addr).await;

    c.send_raw("{not json").await;
    let reply = c.next().await;
    assert_eq!(reply["error"]["code"], "bad_request");

    let missing = Ulid::new().to_string();
    assert_eq!(c.error_code(json!({"op":"get_space","space_id":missing})).await, "not_found");
    assert_eq!(
        c.error_code(json!({"op":"book","space_id":missing,"user_id":"u1","slot":"8-9","date":"2025-05-01"}))
            .await,
        "not_found"
    );

    c.send_raw("").await;
    let reply = c.next().await;
    assert_eq!(reply["error"]["code"], "bad_request");

    assert_eq!(c.ok(json!({"op":"list_spaces"})).await, json!([]));
}
