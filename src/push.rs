use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::PushError;
use crate::util::lock;

pub type PushHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Name of the synthetic event every transport raises when its session ends.
pub const DISCONNECT_EVENT: &str = "disconnect";

#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Opens a session. Returns once the server has accepted it; events are
    /// dispatched to registered handlers from then on.
    async fn connect(&self) -> Result<(), PushError>;

    async fn disconnect(&self);

    fn on(&self, event: &str, handler: PushHandler);
}

/// One decoded Engine.IO / Socket.IO text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(Value),
    Noop,
}

pub fn parse_packet(text: &str) -> Option<Packet> {
    let mut chars = text.chars();
    let engine = chars.next()?;
    let rest = chars.as_str();
    match engine {
        '0' => serde_json::from_str(rest).ok().map(Packet::Open),
        '1' => Some(Packet::Close),
        '2' => Some(Packet::Ping),
        '3' => Some(Packet::Pong),
        '4' => parse_socket_packet(rest),
        '6' => Some(Packet::Noop),
        _ => None,
    }
}

fn parse_socket_packet(text: &str) -> Option<Packet> {
    let mut chars = text.chars();
    let kind = chars.next()?;
    let body = strip_namespace(chars.as_str());
    match kind {
        '0' => Some(Packet::Connect(serde_json::from_str(body).ok())),
        '1' => Some(Packet::Disconnect),
        '2' => {
            let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut args: Vec<Value> = serde_json::from_str(body).ok()?;
            if args.is_empty() {
                return None;
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => return None,
            };
            let data = if args.is_empty() {
                Value::Null
            } else {
                args.remove(0)
            };
            Some(Packet::Event { name, data })
        }
        '4' => Some(Packet::ConnectError(
            serde_json::from_str(body).unwrap_or(Value::Null),
        )),
        _ => None,
    }
}

fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(index) => &body[index + 1..],
            None => "",
        }
    } else {
        body
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handlers = Arc<Mutex<HashMap<String, Vec<PushHandler>>>>;

struct Session {
    outbound: mpsc::UnboundedSender<Message>,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Push channel over the panel's Socket.IO websocket endpoint. Only the
/// websocket transport and text frames are spoken.
pub struct SocketIoTransport {
    url: String,
    token: Option<String>,
    handshake_timeout: Duration,
    handlers: Handlers,
    session: Mutex<Option<Session>>,
}

impl SocketIoTransport {
    pub fn new(url: impl Into<String>, token: Option<String>, handshake_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            token: token.filter(|token| !token.trim().is_empty()),
            handshake_timeout,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            session: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .map(|session| session.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn handshake(&self) -> Result<WsStream, PushError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| PushError::InvalidUrl(err.to_string()))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|err| PushError::InvalidUrl(format!("invalid credential: {}", err)))?;
            request.headers_mut().insert("authorization", value);
        }

        let (mut ws, _) = connect_async(request)
            .await
            .map_err(|err| PushError::Connect(err.to_string()))?;

        let open = next_packet(&mut ws).await?;
        if !matches!(open, Packet::Open(_)) {
            return Err(PushError::Handshake(format!("expected open packet, got {:?}", open)));
        }

        let connect = match &self.token {
            Some(token) => format!("40{}", serde_json::json!({ "token": token })),
            None => "40".to_string(),
        };
        ws.send(Message::Text(connect))
            .await
            .map_err(|err| PushError::Handshake(err.to_string()))?;

        loop {
            match next_packet(&mut ws).await? {
                Packet::Connect(_) => return Ok(ws),
                Packet::ConnectError(reason) => {
                    return Err(PushError::Handshake(format!("connection refused: {}", reason)))
                }
                Packet::Ping => {
                    ws.send(Message::Text("3".to_string()))
                        .await
                        .map_err(|err| PushError::Handshake(err.to_string()))?;
                }
                Packet::Close | Packet::Disconnect => {
                    return Err(PushError::Handshake("closed during handshake".to_string()))
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl PushTransport for SocketIoTransport {
    async fn connect(&self) -> Result<(), PushError> {
        if self.is_connected() {
            return Ok(());
        }
        let ws = tokio::time::timeout(self.handshake_timeout, self.handshake())
            .await
            .map_err(|_| {
                PushError::Handshake(format!(
                    "no answer within {}ms",
                    self.handshake_timeout.as_millis()
                ))
            })??;
        info!(url = %self.url, "push channel connected");

        let (sink, stream) = ws.split();
        let (outbound, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_session(
            sink,
            stream,
            rx,
            Arc::clone(&alive),
            Arc::clone(&self.handlers),
        ));
        let session = Session {
            outbound,
            alive,
            task,
        };
        if let Some(prev) = lock(&self.session).replace(session) {
            prev.task.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let session = lock(&self.session).take();
        if let Some(session) = session {
            let _ = session.outbound.send(Message::Text("41".to_string()));
            let _ = session.outbound.send(Message::Close(None));
            debug!("push channel disconnect requested");
        }
    }

    fn on(&self, event: &str, handler: PushHandler) {
        lock(&self.handlers)
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }
}

async fn next_packet(ws: &mut WsStream) -> Result<Packet, PushError> {
    loop {
        let message = match ws.next().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => return Err(PushError::Handshake(err.to_string())),
            None => return Err(PushError::Handshake("stream ended".to_string())),
        };
        match message {
            Message::Text(text) => match parse_packet(&text) {
                Some(packet) => return Ok(packet),
                None => debug!(frame = %text, "ignoring unknown frame"),
            },
            Message::Close(_) => return Ok(Packet::Close),
            _ => {}
        }
    }
}

pub(crate) fn dispatch(handlers: &Handlers, event: &str, data: Value) {
    let registered = lock(handlers).get(event).cloned().unwrap_or_default();
    for handler in registered {
        handler(data.clone());
    }
}

async fn run_session(
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    alive: Arc<AtomicBool>,
    handlers: Handlers,
) {
    let reason = loop {
        tokio::select! {
            queued = outbound.recv() => {
                let message = match queued {
                    Some(message) => message,
                    None => break "client disconnect",
                };
                let closing = matches!(message, Message::Close(_));
                if let Err(err) = sink.send(message).await {
                    warn!(?err, "push send failed");
                    break "send failed";
                }
                if closing {
                    break "client disconnect";
                }
            }
            message = stream.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        warn!(?err, "push stream error");
                        break "transport error";
                    }
                    None => break "transport close",
                };
                match message {
                    Message::Text(text) => match parse_packet(&text) {
                        Some(Packet::Ping) => {
                            if let Err(err) = sink.send(Message::Text("3".to_string())).await {
                                warn!(?err, "failed to answer push ping");
                                break "send failed";
                            }
                        }
                        Some(Packet::Event { name, data }) => dispatch(&handlers, &name, data),
                        Some(Packet::Disconnect) => break "server disconnect",
                        Some(Packet::Close) => break "transport close",
                        _ => {}
                    },
                    Message::Ping(payload) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break "send failed";
                        }
                    }
                    Message::Close(_) => break "transport close",
                    _ => {}
                }
            }
        }
    };

    // cleared before handlers run so a reconnect from a handler is not a no-op
    alive.store(false, Ordering::SeqCst);
    info!(reason, "push channel closed");
    dispatch(&handlers, DISCONNECT_EVENT, Value::String(reason.to_string()));
}
