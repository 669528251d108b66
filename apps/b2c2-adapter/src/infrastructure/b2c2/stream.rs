//! B2C2 Quote Stream Client
//!
//! Owns the single WebSocket connection to B2C2's streaming endpoint and
//! implements the subscription protocol on top of it: typed requests
//! correlated to asynchronous acknowledgements by tag, per-instrument
//! exclusivity, request deadlines, and dispatch of unsolicited price
//! frames to the installed per-instrument handlers.
//!
//! # Connection lifecycle
//!
//! `connect()` opens the connection (bearer token on the handshake
//! request) and spawns exactly one receive loop for its lifetime. There
//! is no reconnection: a transport failure terminates the loop, the
//! session is closed, and every outstanding request is failed. A new
//! session requires an explicit `disconnect()` / `connect()` pair.
//!
//! # Protocol
//!
//! Messages are single JSON objects; see
//! [`messages`](super::messages) for the wire format.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::codec::JsonCodec;
use super::messages::{
    PriceMessage, StreamMessage, SubscribeAckMessage, SubscribeRequest, UnsubscribeAckMessage,
    UnsubscribeRequest,
};
use crate::application::ports::{SubscribeError, SubscriptionGateway, UnsubscribeError};
use crate::domain::subscription::{
    Completion, Levels, PriceHandler, RequestKind, SubscriptionRegistry,
};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors establishing or tearing down the streaming session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The URL or authorization header could not be constructed.
    #[error("invalid stream request: {0}")]
    InvalidRequest(String),

    /// The WebSocket handshake failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// `connect()` was called on an already-open session.
    #[error("session is already connected")]
    AlreadyConnected,
}

/// Why a request frame could not be written.
enum SendError {
    Closed,
    Write(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Clone)]
pub struct StreamClientConfig {
    /// WebSocket URL of the quote stream.
    pub url: String,
    /// API token, sent as `Authorization: Token <token>`.
    pub token: String,
    /// Deadline for each subscribe/unsubscribe acknowledgement.
    pub request_timeout: Duration,
}

impl StreamClientConfig {
    /// Create a new configuration with the default request deadline.
    #[must_use]
    pub fn new(url: String, token: String) -> Self {
        Self {
            url,
            token,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Debug for StreamClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClientConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// The B2C2 streaming session and subscription protocol.
///
/// One instance per process is meaningful; it is shared via `Arc` between
/// the application layer (requests) and its own receive loop (dispatch).
pub struct StreamClient {
    config: StreamClientConfig,
    codec: JsonCodec,
    registry: Arc<SubscriptionRegistry>,
    writer: Mutex<Option<WsSink>>,
    connected: AtomicBool,
    shutdown: CancellationToken,
    session_cancel: parking_lot::Mutex<Option<CancellationToken>>,
}

impl StreamClient {
    /// Create a new stream client.
    #[must_use]
    pub fn new(
        config: StreamClientConfig,
        registry: Arc<SubscriptionRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            registry,
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown,
            session_cancel: parking_lot::Mutex::new(None),
        }
    }

    /// The subscription registry backing this session.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Open the connection and start the receive loop.
    ///
    /// # Errors
    ///
    /// Fails fatally if the handshake does not result in an open
    /// connection, or if the session is already connected.
    pub async fn connect(self: Arc<Self>) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        if writer.is_some() {
            return Err(SessionError::AlreadyConnected);
        }

        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.token))
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        tracing::info!(url = %self.config.url, "Connecting to quote stream");
        let (ws_stream, response) = tokio_tungstenite::connect_async(request).await?;
        tracing::info!(status = %response.status(), "Quote stream connected");

        let (write, read) = ws_stream.split();
        *writer = Some(write);
        drop(writer);

        self.connected.store(true, Ordering::SeqCst);
        metrics::set_session_connected(true);

        let cancel = self.shutdown.child_token();
        *self.session_cancel.lock() = Some(cancel.clone());
        tokio::spawn(Arc::clone(&self).receive_loop(read, cancel));

        Ok(())
    }

    /// Close the session: send a normal-closure frame if the connection
    /// is open, then clear all registry state. A full reset, not a pause.
    pub async fn disconnect(&self) {
        if let Some(cancel) = self.session_cancel.lock().take() {
            cancel.cancel();
        }

        let mut writer = self.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            let _ = sink.close().await;
        }
        drop(writer);

        self.teardown("disconnect requested");
    }

    /// Whether the session is currently open.
    #[must_use]
    pub fn session_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Receive Loop
    // =========================================================================

    /// Read complete messages until cancellation or transport failure.
    ///
    /// Decode failures are logged and the loop continues; a read failure
    /// terminates the loop and the session is considered closed.
    async fn receive_loop(self: Arc<Self>, mut read: WsSource, cancel: CancellationToken) {
        let reason = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    break "session cancelled";
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let mut writer = self.writer.lock().await;
                            if let Some(sink) = writer.as_mut() {
                                let _ = sink.send(Message::Pong(data)).await;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Server sent close frame");
                            break "server closed the connection";
                        }
                        Some(Ok(_)) => {
                            // Binary and pong frames are not part of the protocol.
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Quote stream read failed");
                            break "transport failure";
                        }
                        None => {
                            tracing::info!("Quote stream ended");
                            break "stream ended";
                        }
                    }
                }
            }
        };

        self.writer.lock().await.take();
        self.teardown(reason);
    }

    /// Mark the session closed and fail all outstanding state.
    fn teardown(&self, reason: &str) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let (pending, active) = self.registry.clear();
        if was_connected || pending > 0 || active > 0 {
            tracing::info!(reason, pending, active, "Session closed; registry cleared");
        }
        metrics::set_session_connected(false);
        metrics::set_active_subscriptions(0.0);
    }

    /// Decode one inbound frame and dispatch it.
    async fn handle_frame(&self, text: &str) {
        match self.codec.decode(text) {
            StreamMessage::TradableInstruments(announcement) => {
                tracing::debug!(
                    instruments = announcement.tradable_instruments.len(),
                    "Connection announcement received"
                );
                metrics::record_message_received(metrics::MessageType::Announcement);
            }
            StreamMessage::SubscribeAck(ack) => {
                metrics::record_message_received(metrics::MessageType::SubscribeAck);
                self.handle_subscribe_ack(ack);
            }
            StreamMessage::UnsubscribeAck(ack) => {
                metrics::record_message_received(metrics::MessageType::UnsubscribeAck);
                self.handle_unsubscribe_ack(ack);
            }
            StreamMessage::Price(price) => {
                metrics::record_message_received(metrics::MessageType::Price);
                self.dispatch_price(price).await;
            }
            StreamMessage::Unrecognized { reason } => {
                tracing::warn!(reason = %reason, "Dropping unrecognized frame");
                metrics::record_unrecognized_frame();
            }
        }
    }

    fn handle_subscribe_ack(&self, ack: SubscribeAckMessage) {
        let Some(instrument) = ack.instrument else {
            tracing::warn!("Subscribe acknowledgement without instrument; dropping");
            return;
        };
        let tag = ack.tag.unwrap_or_default();

        let completion = self.registry.complete(
            &instrument,
            RequestKind::Subscribe,
            &tag,
            ack.success,
            ack.error_message,
        );
        self.log_completion("subscribe", &instrument, &tag, completion);
    }

    fn handle_unsubscribe_ack(&self, ack: UnsubscribeAckMessage) {
        let Some(instrument) = ack.instrument else {
            tracing::warn!("Unsubscribe acknowledgement without instrument; dropping");
            return;
        };
        let tag = ack.tag.unwrap_or_default();

        let completion = self.registry.complete(
            &instrument,
            RequestKind::Unsubscribe,
            &tag,
            ack.success,
            ack.error_message,
        );
        self.log_completion("unsubscribe", &instrument, &tag, completion);
    }

    fn log_completion(&self, kind: &str, instrument: &str, tag: &str, completion: Completion) {
        match completion {
            Completion::Accepted => {
                tracing::info!(instrument, kind, "Request acknowledged");
                metrics::set_active_subscriptions(self.registry.active_count() as f64);
            }
            Completion::Rejected => {
                tracing::warn!(instrument, kind, "Request rejected by venue");
            }
            Completion::TagMismatch => {
                tracing::warn!(instrument, kind, tag, "Acknowledgement tag mismatch");
            }
            Completion::NoPending => {
                tracing::warn!(
                    instrument,
                    kind,
                    tag,
                    "Acknowledgement without a pending request; dropping"
                );
            }
        }
    }

    /// Route a price frame to its installed handler.
    ///
    /// An update for an instrument with no active subscription (e.g. a
    /// race between an in-flight unsubscribe and an already-queued frame)
    /// is dropped with a log.
    async fn dispatch_price(&self, price: PriceMessage) {
        let Some(handler) = self.registry.handler_for(&price.instrument) else {
            tracing::debug!(
                instrument = %price.instrument,
                "Price update without active subscription; dropping"
            );
            return;
        };

        let update = price.to_update();
        if let Err(e) = handler.on_price_update(update).await {
            tracing::error!(
                instrument = %price.instrument,
                error = %e,
                "Price handler failed"
            );
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    async fn send_frame(&self, frame: String) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(SendError::Closed);
        };
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(|e| SendError::Write(e.to_string()))
    }
}

#[async_trait]
impl SubscriptionGateway for StreamClient {
    async fn subscribe(
        &self,
        instrument: &str,
        levels: Levels,
        handler: Arc<dyn PriceHandler>,
    ) -> Result<(), SubscribeError> {
        if instrument.is_empty() {
            return Err(SubscribeError::EmptyInstrument);
        }
        if !self.session_open() {
            return Err(SubscribeError::SessionClosed);
        }

        let tag = Uuid::new_v4().to_string();
        let mut rx = self.registry.begin_subscribe(instrument, &tag, handler)?;

        let request = SubscribeRequest::new(instrument, levels.to_vec(), &tag);
        let frame = match self.codec.encode(&request) {
            Ok(frame) => frame,
            Err(e) => {
                self.registry.abandon(instrument, &tag);
                return Err(SubscribeError::Transport(e.to_string()));
            }
        };

        tracing::debug!(instrument, tag = %tag, levels = ?request.levels, "Sending subscribe");
        if let Err(e) = self.send_frame(frame).await {
            self.registry.abandon(instrument, &tag);
            return Err(match e {
                SendError::Closed => SubscribeError::SessionClosed,
                SendError::Write(msg) => SubscribeError::Transport(msg),
            });
        }

        match tokio::time::timeout(self.config.request_timeout, &mut rx).await {
            Ok(Ok(result)) => result.map_err(SubscribeError::from),
            Ok(Err(_)) => Err(SubscribeError::SessionClosed),
            Err(_) => {
                if self.registry.abandon(instrument, &tag) {
                    tracing::warn!(instrument, tag = %tag, "Subscribe timed out");
                    Err(SubscribeError::Timeout)
                } else {
                    // The acknowledgement settled the request just as the
                    // deadline fired; its result is already in the cell.
                    match rx.try_recv() {
                        Ok(result) => result.map_err(SubscribeError::from),
                        Err(_) => Err(SubscribeError::Timeout),
                    }
                }
            }
        }
    }

    async fn unsubscribe(&self, instrument: &str) -> Result<(), UnsubscribeError> {
        if !self.session_open() {
            return Err(UnsubscribeError::SessionClosed);
        }

        let tag = Uuid::new_v4().to_string();
        let mut rx = self.registry.begin_unsubscribe(instrument, &tag)?;

        let request = UnsubscribeRequest::new(instrument, &tag);
        let frame = match self.codec.encode(&request) {
            Ok(frame) => frame,
            Err(e) => {
                self.registry.abandon(instrument, &tag);
                return Err(UnsubscribeError::Transport(e.to_string()));
            }
        };

        tracing::debug!(instrument, tag = %tag, "Sending unsubscribe");
        if let Err(e) = self.send_frame(frame).await {
            self.registry.abandon(instrument, &tag);
            return Err(match e {
                SendError::Closed => UnsubscribeError::SessionClosed,
                SendError::Write(msg) => UnsubscribeError::Transport(msg),
            });
        }

        match tokio::time::timeout(self.config.request_timeout, &mut rx).await {
            Ok(Ok(result)) => result.map_err(UnsubscribeError::from),
            Ok(Err(_)) => Err(UnsubscribeError::SessionClosed),
            Err(_) => {
                if self.registry.abandon(instrument, &tag) {
                    tracing::warn!(instrument, tag = %tag, "Unsubscribe timed out");
                    Err(UnsubscribeError::Timeout)
                } else {
                    match rx.try_recv() {
                        Ok(result) => result.map_err(UnsubscribeError::from),
                        Err(_) => Err(UnsubscribeError::Timeout),
                    }
                }
            }
        }
    }

    fn active_instruments(&self) -> Vec<String> {
        self.registry.active_instruments()
    }

    fn is_connected(&self) -> bool {
        self.session_open()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orderbook::PriceUpdate;
    use crate::domain::subscription::HandlerError;

    struct NopHandler;

    #[async_trait]
    impl PriceHandler for NopHandler {
        async fn on_price_update(&self, _update: PriceUpdate) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn client() -> Arc<StreamClient> {
        Arc::new(StreamClient::new(
            StreamClientConfig::new("ws://localhost:1".to_string(), "secret".to_string()),
            Arc::new(SubscriptionRegistry::new()),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn config_debug_redacts_token() {
        let config = StreamClientConfig::new("wss://example".to_string(), "secret".to_string());
        let debug = format!("{config:?}");

        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn subscribe_without_session_fails_closed() {
        let client = client();
        let levels = Levels::new(vec![1]).unwrap();

        let err = client
            .subscribe("BTCUSD.SPOT", levels, Arc::new(NopHandler))
            .await
            .unwrap_err();

        assert_eq!(err, SubscribeError::SessionClosed);
        assert_eq!(client.registry().pending_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_empty_instrument_fails_validation() {
        let client = client();
        let levels = Levels::new(vec![1]).unwrap();

        let err = client
            .subscribe("", levels, Arc::new(NopHandler))
            .await
            .unwrap_err();

        assert_eq!(err, SubscribeError::EmptyInstrument);
    }

    #[tokio::test]
    async fn unsubscribe_without_session_fails_closed() {
        let client = client();

        let err = client.unsubscribe("BTCUSD.SPOT").await.unwrap_err();

        assert_eq!(err, UnsubscribeError::SessionClosed);
    }

    #[tokio::test]
    async fn disconnect_without_session_is_a_full_reset() {
        let client = client();
        client.disconnect().await;

        assert!(!client.session_open());
        assert!(client.active_instruments().is_empty());
    }
}
