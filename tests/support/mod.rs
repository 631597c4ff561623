#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const TOKEN: &str = "test-token";

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub body: Value,
}

struct PanelData {
    twitch_running: bool,
    discord_running: bool,
    users: BTreeMap<String, (i64, bool)>,
    stats_broken: bool,
}

pub struct MockPanel {
    data: Mutex<PanelData>,
    requests: Mutex<Vec<RecordedRequest>>,
    push: broadcast::Sender<String>,
    push_sessions: Mutex<usize>,
    push_handshakes: Mutex<usize>,
}

/// In-process panel API on an ephemeral port: the HTTP endpoints the client
/// consumes plus a Socket.IO-style websocket at `/socket.io/`.
pub struct TestPanel {
    pub state: Arc<MockPanel>,
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestPanel {
    pub async fn spawn() -> Self {
        let (push, _) = broadcast::channel(64);
        let mut users = BTreeMap::new();
        users.insert("KranikUser".to_string(), (5_400, true));
        users.insert("stream_fan".to_string(), (3_120, true));
        users.insert("lurker42".to_string(), (640, false));
        let state = Arc::new(MockPanel {
            data: Mutex::new(PanelData {
                twitch_running: false,
                discord_running: true,
                users,
                stats_broken: false,
            }),
            requests: Mutex::new(Vec::new()),
            push,
            push_sessions: Mutex::new(0),
            push_handshakes: Mutex::new(0),
        });

        let app = Router::new()
            .route("/api/status", get(status))
            .route("/api/bots/status", get(bots_status))
            .route("/api/stats", get(stats))
            .route("/api/users/ranking", get(ranking))
            .route("/api/leaderboard", get(leaderboard))
            .route("/api/bot/:bot/:action", post(bot_action))
            .route("/api/action", post(combined_action))
            .route("/api/users/points/add", post(add_points))
            .route("/api/users/points/remove", post(remove_points))
            .route("/api/points/clear", post(clear_points))
            .route("/socket.io/", get(socket))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { state, addr, task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("requests").clone()
    }

    pub fn set_stats_broken(&self, broken: bool) {
        self.state.data.lock().expect("data").stats_broken = broken;
    }

    pub fn points_of(&self, username: &str) -> Option<i64> {
        self.state
            .data
            .lock()
            .expect("data")
            .users
            .get(username)
            .map(|(points, _)| *points)
    }

    /// Emits `42["event", data]` to every connected push client.
    pub fn push_event(&self, event: &str, data: Value) -> usize {
        let frame = format!("42{}", json!([event, data]));
        self.state.push.send(frame).unwrap_or(0)
    }

    /// Server-side namespace disconnect of every push client.
    pub fn kick_push_clients(&self) {
        let _ = self.state.push.send("41".to_string());
    }

    pub fn push_sessions(&self) -> usize {
        *self.state.push_sessions.lock().expect("sessions")
    }

    /// Accepted push handshakes since startup.
    pub fn push_handshakes(&self) -> usize {
        *self.state.push_handshakes.lock().expect("handshakes")
    }
}

impl Drop for TestPanel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockPanel {
    fn record(&self, method: &'static str, path: impl Into<String>, body: Value) {
        self.requests.lock().expect("requests").push(RecordedRequest {
            method,
            path: path.into(),
            body,
        });
    }
}

fn authorized(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {}", TOKEN);
    match headers.get("authorization").and_then(|value| value.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        )
            .into_response()),
    }
}

async fn status(State(state): State<Arc<MockPanel>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    state.record("GET", "/api/status", Value::Null);
    let data = state.data.lock().expect("data");
    Json(json!({
        "twitch": data.twitch_running,
        "discord": data.discord_running,
        "timestamp": "2026-10-16T12:00:00"
    }))
    .into_response()
}

fn process(running: bool, pid: u32) -> Value {
    if running {
        json!({"status": "online", "pid": pid, "uptime": "01:02:03"})
    } else {
        json!({"status": "offline", "pid": null, "uptime": "00:00:00"})
    }
}

async fn bots_status(State(state): State<Arc<MockPanel>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    state.record("GET", "/api/bots/status", Value::Null);
    let data = state.data.lock().expect("data");
    Json(json!({
        "twitch": process(data.twitch_running, 1001),
        "discord": process(data.discord_running, 1002),
    }))
    .into_response()
}

async fn stats(State(state): State<Arc<MockPanel>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    state.record("GET", "/api/stats", Value::Null);
    let data = state.data.lock().expect("data");
    if data.stats_broken {
        return Json(json!({"error": "Brak połączenia z bazą danych"})).into_response();
    }
    let total: i64 = data.users.values().map(|(points, _)| *points).sum();
    Json(json!({
        "twitch": {
            "followers": 1234,
            "subscribers": 56,
            "vips": ["ana", "bob"],
            "moderators": 8
        },
        "database": {
            "total_users": data.users.len(),
            "total_points": total,
            "top_user": "KranikUser"
        }
    }))
    .into_response()
}

fn sorted_users(data: &PanelData) -> Vec<(String, i64, bool)> {
    let mut users: Vec<(String, i64, bool)> = data
        .users
        .iter()
        .map(|(name, (points, follower))| (name.clone(), *points, *follower))
        .collect();
    users.sort_by(|a, b| b.1.cmp(&a.1));
    users
}

#[derive(Deserialize)]
struct RankingQuery {
    limit: Option<usize>,
}

async fn ranking(
    State(state): State<Arc<MockPanel>>,
    headers: HeaderMap,
    Query(query): Query<RankingQuery>,
) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    let limit = query.limit.unwrap_or(10);
    state.record("GET", format!("/api/users/ranking?limit={}", limit), Value::Null);
    let data = state.data.lock().expect("data");
    let ranking: Vec<Value> = sorted_users(&data)
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, (username, points, _))| {
            json!({"position": index + 1, "username": username, "points": points, "messages": 7})
        })
        .collect();
    Json(json!({"success": true, "ranking": ranking})).into_response()
}

async fn leaderboard(State(state): State<Arc<MockPanel>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    state.record("GET", "/api/leaderboard", Value::Null);
    let data = state.data.lock().expect("data");
    let rows: Vec<Value> = sorted_users(&data)
        .into_iter()
        .enumerate()
        .map(|(index, (username, points, follower))| {
            json!({
                "rank": index + 1,
                "username": username,
                "points": points,
                "messages": 7,
                "last_seen": "2026-10-15 20:00",
                "is_follower": follower
            })
        })
        .collect();
    Json(rows).into_response()
}

fn control(data: &mut PanelData, bot: &str, action: &str) -> (StatusCode, Value) {
    let (running, label) = match bot {
        "twitch" => (&mut data.twitch_running, "Twitch"),
        "discord" => (&mut data.discord_running, "Discord"),
        _ => return (StatusCode::BAD_REQUEST, json!({"error": "Nieznany bot"})),
    };
    match action {
        "start" if *running => (StatusCode::OK, json!({"error": format!("{} bot już działa", label)})),
        "start" | "restart" => {
            *running = true;
            (StatusCode::OK, json!({"message": format!("{} bot uruchomiony", label)}))
        }
        "stop" => {
            *running = false;
            (StatusCode::OK, json!({"message": format!("{} bot zatrzymany", label)}))
        }
        _ => (StatusCode::BAD_REQUEST, json!({"error": "Nieznana akcja"})),
    }
}

async fn bot_action(
    State(state): State<Arc<MockPanel>>,
    Path((bot, action)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    state.record("POST", format!("/api/bot/{}/{}", bot, action), body);
    let (status, reply) = control(&mut state.data.lock().expect("data"), &bot, &action);
    (status, Json(reply)).into_response()
}

async fn combined_action(
    State(state): State<Arc<MockPanel>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    state.record("POST", "/api/action", body.clone());
    let action = body.get("action").and_then(Value::as_str).unwrap_or_default();
    let (status, reply) = match action.split_once('_') {
        Some((action, bot)) => control(&mut state.data.lock().expect("data"), bot, action),
        None => (StatusCode::BAD_REQUEST, json!({"error": "Nieznana akcja"})),
    };
    (status, Json(reply)).into_response()
}

async fn add_points(
    State(state): State<Arc<MockPanel>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    state.record("POST", "/api/users/points/add", body.clone());
    let username = body["username"].as_str().unwrap_or_default().to_string();
    let points = body["points"].as_i64().unwrap_or_default();
    let mut data = state.data.lock().expect("data");
    match data.users.get_mut(&username) {
        Some((total, _)) => {
            *total += points;
            Json(json!({
                "message": format!("Dodano {} punktów dla {}", points, username),
                "total_points": *total
            }))
            .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Użytkownik {} nie istnieje", username)})),
        )
            .into_response(),
    }
}

async fn remove_points(
    State(state): State<Arc<MockPanel>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    state.record("POST", "/api/users/points/remove", body.clone());
    let username = body["username"].as_str().unwrap_or_default().to_string();
    let clear_all = body["clear_all"].as_bool().unwrap_or(false);
    let points = body["points"].as_i64().unwrap_or_default();
    let mut data = state.data.lock().expect("data");
    match data.users.get_mut(&username) {
        Some((total, _)) => {
            *total = if clear_all { 0 } else { (*total - points).max(0) };
            Json(json!({
                "message": format!("Usunięto punkty użytkownika {}", username),
                "total_points": *total
            }))
            .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Użytkownik {} nie istnieje", username)})),
        )
            .into_response(),
    }
}

async fn clear_points(
    State(state): State<Arc<MockPanel>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = authorized(&headers) {
        return response;
    }
    state.record("POST", "/api/points/clear", body.clone());
    let non_followers = body["type"].as_str() == Some("non_followers");
    let mut data = state.data.lock().expect("data");
    let mut affected = 0u64;
    for (points, follower) in data.users.values_mut() {
        if non_followers && *follower {
            continue;
        }
        *points = 0;
        affected += 1;
    }
    Json(json!({"success": true, "affected": affected})).into_response()
}

async fn socket(
    State(state): State<Arc<MockPanel>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let header_ok = authorized(&headers).is_ok();
    ws.on_upgrade(move |socket| push_session(socket, state, header_ok))
}

async fn push_session(mut socket: WebSocket, state: Arc<MockPanel>, header_ok: bool) {
    let open = json!({"sid": "mock", "upgrades": [], "pingInterval": 25000, "pingTimeout": 20000});
    if socket
        .send(Message::Text(format!("0{}", open)))
        .await
        .is_err()
    {
        return;
    }

    let connect = match socket.recv().await {
        Some(Ok(Message::Text(text))) => text,
        _ => return,
    };
    let token_ok = connect
        .strip_prefix("40")
        .and_then(|auth| serde_json::from_str::<Value>(auth).ok())
        .and_then(|auth| auth["token"].as_str().map(|token| token == TOKEN))
        .unwrap_or(false);
    if !(header_ok || token_ok) {
        let _ = socket
            .send(Message::Text(r#"44{"message":"unauthorized"}"#.to_string()))
            .await;
        return;
    }

    let mut events = state.push.subscribe();
    if socket
        .send(Message::Text(r#"40{"sid":"mock-ns"}"#.to_string()))
        .await
        .is_err()
    {
        return;
    }
    *state.push_sessions.lock().expect("sessions") += 1;
    *state.push_handshakes.lock().expect("handshakes") += 1;
    // a ping right away exercises the client's pong path
    let _ = socket.send(Message::Text("2".to_string())).await;

    loop {
        tokio::select! {
            event = events.recv() => {
                let frame = match event {
                    Ok(frame) => frame,
                    Err(_) => break,
                };
                let closing = frame == "41";
                if socket.send(Message::Text(frame)).await.is_err() || closing {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text == "41" => break,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    *state.push_sessions.lock().expect("sessions") -= 1;
}
