//! Lazily (re)connected WebSocket feed shared by the venue adapters.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::errors::FetchError;

/// Default time without any inbound frame before the feed is considered dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Application-level keepalive sent as a text frame.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    pub interval: Duration,
    pub payload: String,
}

/// Connection settings for one feed.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub url: String,
    /// Text frames sent right after connecting.
    pub subscribe: Vec<String>,
    pub heartbeat: Option<Heartbeat>,
    pub idle_timeout: Duration,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscribe: Vec::new(),
            heartbeat: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_subscription(mut self, message: impl Into<String>) -> Self {
        self.subscribe.push(message.into());
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, payload: impl Into<String>) -> Self {
        self.heartbeat = Some(Heartbeat {
            interval,
            payload: payload.into(),
        });
        self
    }
}

struct Session {
    socket: Socket,
    last_message: Instant,
    last_ping: Instant,
}

/// A single WebSocket subscription.
///
/// The socket is opened on the first read and dropped on any error, so the
/// next read reconnects. Retry pacing belongs to the caller.
pub struct LiveFeed {
    config: FeedConfig,
    session: Mutex<Option<Session>>,
}

impl LiveFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<Session, FetchError> {
        debug!("Connecting to {}", self.config.url);
        let (mut socket, _response) = connect_async(self.config.url.as_str()).await?;
        for message in &self.config.subscribe {
            socket.send(Message::Text(message.clone().into())).await?;
        }
        info!("WebSocket connected: {}", self.config.url);
        let now = Instant::now();
        Ok(Session {
            socket,
            last_message: now,
            last_ping: now,
        })
    }

    /// Next text frame from the feed, connecting first if needed.
    pub async fn next_text(&self) -> Result<String, FetchError> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let result = match guard.as_mut() {
            Some(session) => self.read_text(session).await,
            None => Err(FetchError::NotConnected),
        };
        if result.is_err() {
            *guard = None;
        }
        result
    }

    async fn read_text(&self, session: &mut Session) -> Result<String, FetchError> {
        loop {
            let idle_deadline = session.last_message + self.config.idle_timeout;
            let wake = match &self.config.heartbeat {
                Some(hb) => (session.last_ping + hb.interval).min(idle_deadline),
                None => idle_deadline,
            };

            let frame = match tokio::time::timeout_at(wake, session.socket.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    if Instant::now() >= idle_deadline {
                        return Err(FetchError::Timeout(format!(
                            "no message from {} for {}s",
                            self.config.url,
                            self.config.idle_timeout.as_secs()
                        )));
                    }
                    if let Some(hb) = &self.config.heartbeat {
                        session
                            .socket
                            .send(Message::Text(hb.payload.clone().into()))
                            .await?;
                    }
                    session.last_ping = Instant::now();
                    continue;
                }
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(FetchError::ConnectionClosed(format!(
                        "{} ended the stream",
                        self.config.url
                    )))
                }
            };
            session.last_message = Instant::now();

            match message {
                Message::Text(text) => return Ok(text.to_string()),
                Message::Binary(bytes) => {
                    if let Ok(text) = String::from_utf8(bytes.to_vec()) {
                        return Ok(text);
                    }
                }
                Message::Ping(payload) => {
                    session.socket.send(Message::Pong(payload)).await?;
                }
                Message::Close(frame) => {
                    let detail = frame
                        .map(|cf| format!("code={:?} reason={}", cf.code, cf.reason))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(FetchError::ConnectionClosed(detail));
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    /// Close the socket if one is open.
    pub async fn close(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            let _ = session.socket.close(None).await;
            debug!("WebSocket closed: {}", self.config.url);
        }
    }
}
