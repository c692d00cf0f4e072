//! # WebSocket Connector
//!
//! Forwards entity position and status updates as `model.update`
//! messages over a long-lived socket.
//!
//! While the socket is down, updates collect in a [`PendingBuffer`] that
//! holds only the latest value per entity and kind. A successful
//! (re)connect replays the buffer before any new traffic goes out.
//! Reconnects back off with the consecutive failure count and stop for
//! good once [`ReconnectPolicy::max_failures`] is reached; only an
//! explicit [`Connector::connect`] starts them again.

mod backoff;
mod buffer;
mod message;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use geotrack_domain::{EntityEvent, NotificationKind, SimulatorEvent};
use geotrack_simulator::Vehicle;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::SendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{Span, debug, error, info, warn};
use uuid::Uuid;

use crate::connector::{Attachments, Connector};
use crate::error::{ConnectorError, Result};

pub use backoff::ReconnectPolicy;
pub use buffer::{PendingBuffer, SlotKind};
pub use message::{
    DEFAULT_MODEL, InboundMessage, OutboundMessage, UPDATE_COMMAND, UpdateData, parse_inbound,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = (Uuid, SlotKind, OutboundMessage);

/// Connection settings, read from a connector's `data` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Credential sent as `?token=` and as a bearer `Authorization` header.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Model name written into every update.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

const fn default_auto_reconnect() -> bool {
    true
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            auto_reconnect: true,
            model: default_model(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub const fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Handshake request carrying the credential.
    pub fn request(&self) -> Result<Request> {
        let mut url = reqwest::Url::parse(&self.url)
            .map_err(|err| ConnectorError::InvalidUrl(format!("{}: {err}", self.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConnectorError::InvalidUrl(format!(
                "{}: expected a ws:// or wss:// url",
                self.url
            )));
        }
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }

        let mut request = url.as_str().into_client_request()?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                ConnectorError::InvalidUrl("token is not a valid header value".to_string())
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

struct ConnectionTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

#[derive(Default)]
struct Shared {
    outbound: Option<UnboundedSender<Pending>>,
    buffer: PendingBuffer,
    error_count: u32,
    auto_reconnect: bool,
    discarded: u64,
    task: Option<ConnectionTask>,
}

struct Inner {
    id: String,
    config: WebSocketConfig,
    shared: Mutex<Shared>,
    span: Span,
}

/// Connector that streams updates to a WebSocket endpoint.
pub struct WebSocketConnector {
    inner: Arc<Inner>,
    attachments: Attachments,
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("id", &self.inner.id)
            .field("url", &self.inner.config.url)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl WebSocketConnector {
    pub fn new(id: impl Into<String>, config: WebSocketConfig) -> Self {
        let id = id.into();
        let span = tracing::info_span!(
            "connector",
            component = "WebSocketConnector",
            connector_id = %id
        );
        Self {
            inner: Arc::new(Inner {
                id,
                shared: Mutex::new(Shared {
                    auto_reconnect: config.auto_reconnect,
                    ..Shared::default()
                }),
                config,
                span,
            }),
            attachments: Attachments::new(),
        }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared().outbound.is_some()
    }

    /// Consecutive failed or lost connections since the last success.
    pub fn error_count(&self) -> u32 {
        self.inner.shared().error_count
    }

    pub fn auto_reconnect(&self) -> bool {
        self.inner.shared().auto_reconnect
    }

    /// Updates waiting for the next connection.
    pub fn pending(&self) -> usize {
        self.inner.shared().buffer.len()
    }

    /// Inbound frames dropped because they could not be parsed.
    pub fn discarded(&self) -> u64 {
        self.inner.shared().discarded
    }
}

impl Drop for WebSocketConnector {
    fn drop(&mut self) {
        if let Some(task) = self.inner.shared().task.take() {
            let _ = task.shutdown.send(true);
            task.handle.abort();
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn id(&self) -> &str {
        &self.inner.id
    }

    /// Open the socket.
    ///
    /// The first attempt runs inline and its outcome is returned. With
    /// auto-reconnect enabled a failed first attempt still leaves the
    /// reconnect loop running in the background.
    async fn connect(&self) -> Result<()> {
        self.inner.config.request()?;
        {
            let mut shared = self.inner.shared();
            if shared.task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
                debug!(parent: &self.inner.span, "Connection already running");
                return Ok(());
            }
            shared.error_count = 0;
            shared.auto_reconnect = self.inner.config.auto_reconnect;
        }

        info!(parent: &self.inner.span, url = %self.inner.config.url, "Connecting");
        let (connection, result) = match self.inner.open().await {
            Ok(ws) => (Some((ws, self.inner.on_open())), Ok(())),
            Err(err) => {
                self.inner.on_failure(&err);
                (None, Err(err))
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.inner).run(connection, shutdown_rx));
        self.inner.shared().task = Some(ConnectionTask { handle, shutdown });
        result
    }

    async fn disconnect(&self) -> Result<()> {
        let task = {
            let mut shared = self.inner.shared();
            shared.auto_reconnect = false;
            shared.outbound = None;
            shared.task.take()
        };

        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            let abort = task.handle.abort_handle();
            if tokio::time::timeout(CLOSE_TIMEOUT, task.handle).await.is_err() {
                warn!(parent: &self.inner.span, "Connection task did not stop in time, aborting");
                abort.abort();
            }
        }
        info!(parent: &self.inner.span, pending = self.pending(), "Disconnected");
        Ok(())
    }

    fn attach(&self, vehicle: &Vehicle) -> bool {
        let entity_id = vehicle.id();
        let attached = self.attachments.insert_with(entity_id, || {
            [NotificationKind::Position, NotificationKind::Status]
                .into_iter()
                .map(|kind| {
                    let weak = Arc::downgrade(&self.inner);
                    vehicle.events().subscribe(kind, move |event| {
                        if let Some(inner) = weak.upgrade() {
                            inner.forward(event);
                        }
                    })
                })
                .collect()
        });
        if attached {
            self.inner.shared().buffer.register(entity_id);
            info!(parent: &self.inner.span, entity_id = %entity_id, "Attached entity");
        }
        attached
    }

    fn detach(&self, entity_id: Uuid) -> bool {
        let detached = self.attachments.remove(entity_id);
        if detached {
            self.inner.shared().buffer.remove(entity_id);
            info!(parent: &self.inner.span, entity_id = %entity_id, "Detached entity");
        }
        detached
    }

    fn attached(&self) -> Vec<Uuid> {
        self.attachments.ids()
    }
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `event` now if the socket is up, otherwise buffer it.
    fn forward(&self, event: &EntityEvent) {
        let entity_id = event.entity_id;
        let (kind, message) = match &event.event {
            SimulatorEvent::Position(position) => (
                SlotKind::Position,
                OutboundMessage::position(&self.config.model, entity_id, position),
            ),
            SimulatorEvent::Status(status) => (
                SlotKind::Status,
                OutboundMessage::status(&self.config.model, entity_id, *status),
            ),
            _ => return,
        };

        let mut shared = self.shared();
        let item = match &shared.outbound {
            Some(tx) => match tx.send((entity_id, kind, message)) {
                Ok(()) => return,
                Err(SendError(item)) => item,
            },
            None => (entity_id, kind, message),
        };
        shared.outbound = None;
        let (entity_id, kind, message) = item;
        let superseded = shared.buffer.put(entity_id, kind, message);
        drop(shared);

        debug!(
            parent: &self.span,
            entity_id = %entity_id,
            kind = ?kind,
            superseded,
            "Buffered update while disconnected"
        );
    }

    async fn open(&self) -> Result<WsStream> {
        let request = self.config.request()?;
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| ConnectorError::ConnectTimeout(CONNECT_TIMEOUT))??;
        Ok(ws)
    }

    /// Install a fresh outbound channel with the buffer replayed into it,
    /// so buffered updates go out ahead of anything sent afterwards.
    fn on_open(&self) -> UnboundedReceiver<Pending> {
        let (tx, rx) = mpsc::unbounded_channel();
        let flushed = {
            let mut shared = self.shared();
            shared.error_count = 0;
            let pending = shared.buffer.drain();
            let flushed = pending.len();
            for item in pending {
                let _ = tx.send(item);
            }
            shared.outbound = Some(tx);
            flushed
        };
        info!(parent: &self.span, url = %self.config.url, flushed, "Connected");
        rx
    }

    fn on_failure(&self, err: &ConnectorError) {
        let error_count = {
            let mut shared = self.shared();
            shared.error_count += 1;
            shared.error_count
        };
        warn!(parent: &self.span, error = %err, error_count, "Connection attempt failed");
    }

    /// Return untransmitted updates to the buffer after the socket went away.
    fn on_lost(&self, leftover: Vec<Pending>) {
        let restored = leftover.len();
        let (reconnecting, error_count) = {
            let mut shared = self.shared();
            shared.outbound = None;
            // Leftovers are oldest first; the newest per slot must win.
            for (entity_id, kind, message) in leftover.into_iter().rev() {
                shared.buffer.restore(entity_id, kind, message);
            }
            if shared.auto_reconnect {
                shared.error_count += 1;
            }
            (shared.auto_reconnect, shared.error_count)
        };
        if reconnecting {
            warn!(parent: &self.span, restored, error_count, "Connection lost");
        } else {
            info!(parent: &self.span, restored, "Connection closed");
        }
    }

    fn on_inbound(&self, text: &str) {
        match parse_inbound(text) {
            Ok(message) => {
                debug!(parent: &self.span, command = %message.command, "Inbound message");
            }
            Err(err) => {
                self.shared().discarded += 1;
                warn!(parent: &self.span, error = %err, "Discarding malformed inbound message");
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        mut connection: Option<(WsStream, UnboundedReceiver<Pending>)>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if let Some((ws, rx)) = connection.take() {
                let leftover = self.pump(ws, rx, &mut shutdown).await;
                self.on_lost(leftover);
            }

            let (error_count, auto_reconnect) = {
                let shared = self.shared();
                (shared.error_count, shared.auto_reconnect)
            };
            if *shutdown.borrow() || !auto_reconnect {
                break;
            }
            if self.config.reconnect.exhausted(error_count) {
                self.shared().auto_reconnect = false;
                error!(
                    parent: &self.span,
                    error_count,
                    "Too many consecutive failures, auto-reconnect disabled"
                );
                break;
            }

            let delay = self.config.reconnect.delay(error_count);
            info!(
                parent: &self.span,
                error_count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }

            let attempt = tokio::select! {
                attempt = self.open() => attempt,
                _ = shutdown.changed() => break,
            };
            match attempt {
                Ok(ws) => connection = Some((ws, self.on_open())),
                Err(err) => self.on_failure(&err),
            }
        }
        debug!(parent: &self.span, "Connection task finished");
    }

    /// Move updates from `rx` onto the socket and read inbound frames
    /// until either side goes away. Returns the updates that were not
    /// transmitted.
    async fn pump(
        &self,
        ws: WsStream,
        mut rx: UnboundedReceiver<Pending>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Vec<Pending> {
        let (mut sink, mut source) = ws.split();
        let mut leftover = Vec::new();
        let mut closing = false;

        loop {
            tokio::select! {
                item = rx.recv() => {
                    let Some(item) = item else {
                        closing = true;
                        break;
                    };
                    let text = match item.2.to_json() {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(parent: &self.span, entity_id = %item.0, error = %err, "Dropping unserializable update");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        warn!(parent: &self.span, error = %err, "Send failed");
                        leftover.push(item);
                        break;
                    }
                }
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_inbound(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(parent: &self.span, "Server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(parent: &self.span, error = %err, "Read failed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    closing = true;
                    break;
                }
            }
        }

        if closing && tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
            debug!(parent: &self.span, "Close handshake timed out");
        }

        rx.close();
        while let Ok(item) = rx.try_recv() {
            leftover.push(item);
        }
        leftover
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use geotrack_domain::{Position, UnitStatus};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as ServerRequest, Response as ServerResponse,
    };
    use tokio_tungstenite::{accept_async, accept_hdr_async};

    fn fast_policy(max_failures: u32, base_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_failures,
        }
    }

    async fn local_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (tcp, _) = listener.accept().await.unwrap();
        accept_async(tcp).await.unwrap()
    }

    async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("no frame within 5s")
                .expect("stream ended")
                .expect("frame error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 5s");
    }

    #[test]
    fn test_request_carries_token() {
        let config = WebSocketConfig::new("ws://localhost:9000/socket").with_token("s3cret");
        let request = config.request().unwrap();

        assert_eq!(request.uri().query(), Some("token=s3cret"));
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer s3cret");
    }

    #[test]
    fn test_request_rejects_non_socket_urls() {
        assert!(matches!(
            WebSocketConfig::new("http://localhost").request(),
            Err(ConnectorError::InvalidUrl(_))
        ));
        assert!(matches!(
            WebSocketConfig::new("not a url").request(),
            Err(ConnectorError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: WebSocketConfig =
            serde_json::from_value(json!({"url": "ws://localhost:1"})).unwrap();
        assert!(config.auto_reconnect);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn test_attach_is_idempotent_and_detach_drops_buffer() {
        let connector = WebSocketConnector::new("ws", WebSocketConfig::new("ws://localhost:1"));
        let vehicle = Vehicle::new(Uuid::new_v4());

        assert!(connector.attach(&vehicle));
        assert!(!connector.attach(&vehicle));
        vehicle.set_position(Position::new(1.0, 1.0));
        vehicle.set_position(Position::new(2.0, 2.0));
        vehicle.set_status(UnitStatus::Responding);
        assert_eq!(connector.pending(), 2);

        assert!(connector.detach(vehicle.id()));
        assert_eq!(connector.pending(), 0);
        vehicle.set_position(Position::new(3.0, 3.0));
        assert_eq!(connector.pending(), 0);
        assert!(connector.attached().is_empty());
    }

    #[tokio::test]
    async fn test_flushes_latest_buffered_values_on_connect() {
        let (listener, url) = local_listener().await;
        let connector = WebSocketConnector::new("ws", WebSocketConfig::new(url));
        let vehicle = Vehicle::new(Uuid::new_v4());
        connector.attach(&vehicle);

        vehicle.set_position(Position::new(1.0, 1.0));
        vehicle.set_position(Position::new(2.0, 2.0));
        vehicle.set_status(UnitStatus::Responding);

        let (connected, mut ws) = tokio::join!(connector.connect(), accept(&listener));
        connected.unwrap();
        assert!(connector.is_connected());
        assert_eq!(connector.pending(), 0);

        let first = next_json(&mut ws).await;
        let second = next_json(&mut ws).await;
        assert_eq!(first["command"], "model.update");
        assert_eq!(first["model"], DEFAULT_MODEL);
        assert_eq!(first["id"], vehicle.id().to_string());
        assert_eq!(first["data"], json!({"latitude": 2.0, "longitude": 2.0}));
        assert_eq!(second["data"], json!({"unit_status": 3}));

        vehicle.set_position(Position::new(3.0, 3.0));
        let live = next_json(&mut ws).await;
        assert_eq!(live["data"], json!({"latitude": 3.0, "longitude": 3.0}));

        connector.disconnect().await.unwrap();
        assert!(!connector.is_connected());
        assert!(!connector.auto_reconnect());
    }

    #[tokio::test]
    async fn test_malformed_inbound_keeps_connection_open() {
        let (listener, url) = local_listener().await;
        let connector = WebSocketConnector::new("ws", WebSocketConfig::new(url));
        let vehicle = Vehicle::new(Uuid::new_v4());
        connector.attach(&vehicle);

        let (connected, mut ws) = tokio::join!(connector.connect(), accept(&listener));
        connected.unwrap();

        ws.send(Message::Text("{not json".to_string())).await.unwrap();
        ws.send(Message::Text(r#"{"data": 1}"#.to_string())).await.unwrap();
        ws.send(Message::Text(r#"{"command": "model.ack"}"#.to_string()))
            .await
            .unwrap();
        wait_until(|| connector.discarded() == 2).await;
        assert!(connector.is_connected());

        vehicle.set_status(UnitStatus::OnScene);
        let message = next_json(&mut ws).await;
        assert_eq!(message["data"], json!({"unit_status": 4}));

        connector.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_sends_token() {
        let (listener, url) = local_listener().await;
        let config = WebSocketConfig::new(url).with_token("abc");
        let connector = WebSocketConnector::new("ws", config);

        let (seen_tx, seen_rx) = oneshot::channel();
        let server = async move {
            let (tcp, _) = listener.accept().await.unwrap();
            accept_hdr_async(tcp, move |req: &ServerRequest, resp: ServerResponse| {
                let query = req.uri().query().unwrap_or_default().to_string();
                let auth = req.headers()[AUTHORIZATION].to_str().unwrap().to_string();
                let _ = seen_tx.send((query, auth));
                Ok::<_, ErrorResponse>(resp)
            })
            .await
            .unwrap()
        };

        let (connected, _ws) = tokio::join!(connector.connect(), server);
        connected.unwrap();
        let (query, auth) = seen_rx.await.unwrap();
        assert_eq!(query, "token=abc");
        assert_eq!(auth, "Bearer abc");

        connector.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_and_flushes_after_loss() {
        let (listener, url) = local_listener().await;
        let config = WebSocketConfig::new(url).with_reconnect(fast_policy(5, 200));
        let connector = WebSocketConnector::new("ws", config);
        let vehicle = Vehicle::new(Uuid::new_v4());
        connector.attach(&vehicle);

        let (connected, mut ws) = tokio::join!(connector.connect(), accept(&listener));
        connected.unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        wait_until(|| !connector.is_connected()).await;
        assert_eq!(connector.error_count(), 1);
        assert!(connector.auto_reconnect());

        vehicle.set_position(Position::new(4.0, 4.0));
        vehicle.set_position(Position::new(5.0, 5.0));
        assert_eq!(connector.pending(), 1);

        let mut ws = accept(&listener).await;
        let flushed = next_json(&mut ws).await;
        assert_eq!(flushed["data"], json!({"latitude": 5.0, "longitude": 5.0}));
        wait_until(|| connector.is_connected()).await;
        assert_eq!(connector.error_count(), 0);
        assert_eq!(connector.pending(), 0);

        connector.disconnect().await.unwrap();
    }

    #[test]
    fn test_lost_connection_restores_newest_leftover() {
        let connector = WebSocketConnector::new("ws", WebSocketConfig::new("ws://localhost:1"));
        let (a, b) = (Vehicle::new(Uuid::new_v4()), Vehicle::new(Uuid::new_v4()));
        connector.attach(&a);
        connector.attach(&b);
        let position = |id, lat| {
            OutboundMessage::position(DEFAULT_MODEL, id, &Position::new(lat, lat).at(Utc::now()))
        };
        let responding = |id| OutboundMessage::status(DEFAULT_MODEL, id, UnitStatus::Responding);

        // Buffered after the drop, so newer than anything left in the channel.
        b.set_position(Position::new(9.0, 9.0));

        connector.inner.on_lost(vec![
            (a.id(), SlotKind::Position, position(a.id(), 1.0)),
            (a.id(), SlotKind::Status, responding(a.id())),
            (b.id(), SlotKind::Position, position(b.id(), 3.0)),
            (a.id(), SlotKind::Position, position(a.id(), 2.0)),
        ]);

        let drained = connector.inner.shared().buffer.drain();
        assert_eq!(
            drained,
            vec![
                (a.id(), SlotKind::Position, position(a.id(), 2.0)),
                (a.id(), SlotKind::Status, responding(a.id())),
                (b.id(), SlotKind::Position, position(b.id(), 9.0)),
            ]
        );
        assert_eq!(connector.error_count(), 1);
    }

    #[tokio::test]
    async fn test_updates_queued_when_connection_drops_flush_latest() {
        let (listener, url) = local_listener().await;
        let connector = WebSocketConnector::new("ws", WebSocketConfig::new(url));
        let vehicle = Vehicle::new(Uuid::new_v4());
        connector.attach(&vehicle);

        // Live outbound channel whose socket dies before these go out.
        let (tx, mut rx) = mpsc::unbounded_channel();
        connector.inner.shared().outbound = Some(tx);
        vehicle.set_position(Position::new(1.0, 1.0));
        vehicle.set_status(UnitStatus::Responding);
        vehicle.set_position(Position::new(2.0, 2.0));
        assert_eq!(connector.pending(), 0);

        rx.close();
        let mut leftover = Vec::new();
        while let Ok(item) = rx.try_recv() {
            leftover.push(item);
        }
        assert_eq!(leftover.len(), 3);
        vehicle.set_status(UnitStatus::OnScene);
        connector.inner.on_lost(leftover);
        assert!(!connector.is_connected());
        assert_eq!(connector.pending(), 2);

        let (connected, mut ws) = tokio::join!(connector.connect(), accept(&listener));
        connected.unwrap();
        let first = next_json(&mut ws).await;
        let second = next_json(&mut ws).await;
        assert_eq!(first["data"], json!({"latitude": 2.0, "longitude": 2.0}));
        assert_eq!(second["data"], json!({"unit_status": 4}));

        vehicle.set_position(Position::new(3.0, 3.0));
        let live = next_json(&mut ws).await;
        assert_eq!(live["data"], json!({"latitude": 3.0, "longitude": 3.0}));

        connector.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_failures() {
        let (listener, url) = local_listener().await;
        drop(listener);
        let config = WebSocketConfig::new(url).with_reconnect(fast_policy(3, 5));
        let connector = WebSocketConnector::new("ws", config);

        assert!(connector.connect().await.is_err());
        wait_until(|| !connector.auto_reconnect()).await;
        assert_eq!(connector.error_count(), 3);
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_no_reconnect_when_disabled() {
        let (listener, url) = local_listener().await;
        drop(listener);
        let mut config = WebSocketConfig::new(url);
        config.auto_reconnect = false;
        let connector = WebSocketConnector::new("ws", config);

        assert!(connector.connect().await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.error_count(), 1);
        assert!(!connector.auto_reconnect());
    }
}
