//! Management channel session.
//!
//! A session owns one full-duplex typed-message connection to a management
//! endpoint. The receive handlers and the close signal are assembled into a
//! [`SessionBindings`] value before the channel connects, so a handler can
//! never miss a message that arrives right after the handshake. Inbound
//! frames are routed by content type on a background dispatch task; replies
//! are matched to their requests through a pending-reply table keyed by
//! sequence number.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::error::{ChannelError, Result};
use crate::wire::{self, Envelope};

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

type HandlerFn = Box<dyn Fn(Envelope) + Send + Sync + 'static>;

/// The complete set of receive handlers for a session. Built up front and
/// handed to [`ChannelSession::connect`] atomically.
#[derive(Default)]
pub struct SessionBindings {
    handlers: HashMap<i32, HandlerFn>,
}

impl SessionBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler for one content type. At most one handler per content
    /// type; the last registration wins. Handlers run on the dispatch task
    /// and must not block; anything that needs the foreground control flow
    /// goes through a bounded queue.
    pub fn on_content_type<F>(mut self, content_type: i32, handler: F) -> Self
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.handlers.insert(content_type, Box::new(handler));
        self
    }

    /// Bind a handler that decodes messages of `content_type` as `D` and
    /// forwards them into a bounded queue. Messages that fail to decode or
    /// that arrive while the queue is full are dropped with a log entry.
    pub fn typed_detail_channel<D>(self, content_type: i32, tx: mpsc::Sender<D>) -> Self
    where
        D: DeserializeOwned + Send + 'static,
    {
        self.on_content_type(content_type, move |envelope| {
            match wire::decode_body::<D>(&envelope.body) {
                Ok(detail) => {
                    if let Err(err) = tx.try_send(detail) {
                        warn!(
                            "detail queue rejected message of type {content_type}: {err}"
                        );
                    }
                }
                Err(err) => {
                    warn!("failed to decode detail message of type {content_type}: {err}")
                }
            }
        })
    }
}

/// Write half of a framed transport.
#[async_trait]
pub trait TransportWriter: Send + 'static {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()>;
    async fn shutdown(&mut self);
}

/// Read half of a framed transport.
#[async_trait]
pub trait TransportReader: Send + 'static {
    /// The next inbound frame, or `None` once the peer has closed.
    async fn next_frame(&mut self) -> Result<Option<Bytes>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

pub struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        self.sink
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))
    }

    async fn shutdown(&mut self) {
        let _ = self.sink.close().await;
    }
}

#[async_trait]
impl TransportReader for WsReader {
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Binary(data)) => return Ok(Some(Bytes::from(data))),
                Ok(Message::Close(_)) => return Ok(None),
                // ping/pong and other keepalives are handled by the library
                Ok(_) => continue,
                Err(err) => return Err(ChannelError::Transport(err.to_string())),
            }
        }
        Ok(None)
    }
}

/// One open management channel. Single-owner, single-use: created per CLI
/// invocation and discarded when the invocation finishes.
pub struct ChannelSession {
    next_sequence: AtomicU32,
    pending: Arc<DashMap<u32, oneshot::Sender<Envelope>>>,
    outbound: mpsc::Sender<Envelope>,
    shutdown_tx: watch::Sender<bool>,
    close_rx: watch::Receiver<bool>,
    request_timeout: Duration,
}

impl ChannelSession {
    /// Connect to the management endpoint and start the session. The
    /// bindings are in place before the first frame is read.
    pub async fn connect(config: &SessionConfig, bindings: SessionBindings) -> Result<Self> {
        let connect = connect_async(config.endpoint.as_str());
        let (stream, _response) = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| {
                ChannelError::Connect(format!("timed out connecting to {}", config.endpoint))
            })?
            .map_err(|err| ChannelError::Connect(format!("{}: {}", config.endpoint, err)))?;
        info!("management channel connected to {}", config.endpoint);

        let (sink, stream) = stream.split();
        Ok(Self::start(
            WsWriter { sink },
            WsReader { stream },
            bindings,
            config.request_timeout,
        ))
    }

    /// Wire a session onto an already established transport.
    pub fn start<W, R>(
        mut writer: W,
        mut reader: R,
        bindings: SessionBindings,
        request_timeout: Duration,
    ) -> Self
    where
        W: TransportWriter,
        R: TransportReader,
    {
        let pending: Arc<DashMap<u32, oneshot::Sender<Envelope>>> = Arc::new(DashMap::new());
        let (close_tx, close_rx) = watch::channel(false);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(16);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = outbound_rx.recv() => match maybe {
                        Some(envelope) => {
                            if let Err(err) = writer.send_frame(envelope.encode()).await {
                                error!("failed to send frame: {err}");
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => break,
                }
            }
            writer.shutdown().await;
        });

        let dispatch_pending = pending.clone();
        tokio::spawn(async move {
            let handlers = bindings.handlers;
            loop {
                match reader.next_frame().await {
                    Ok(Some(frame)) => {
                        let envelope = match Envelope::decode(frame) {
                            Ok(envelope) => envelope,
                            Err(err) => {
                                warn!("dropping undecodable frame: {err}");
                                continue;
                            }
                        };
                        if let Some(reply_for) = envelope.reply_for {
                            match dispatch_pending.remove(&reply_for) {
                                Some((_, reply_tx)) => {
                                    let _ = reply_tx.send(envelope);
                                }
                                None => debug!("reply for unknown request {reply_for}"),
                            }
                        } else if let Some(handler) = handlers.get(&envelope.content_type) {
                            handler(envelope);
                        } else {
                            debug!("no handler bound for content type {}", envelope.content_type);
                        }
                    }
                    Ok(None) => {
                        info!("management channel closed by peer");
                        break;
                    }
                    Err(err) => {
                        warn!("management channel read failed: {err}");
                        break;
                    }
                }
            }
            // Fires the close signal exactly once; bound handlers (and with
            // them any detail queues) are dropped here as well.
            let _ = close_tx.send(true);
            dispatch_pending.clear();
        });

        Self {
            next_sequence: AtomicU32::new(1),
            pending,
            outbound: outbound_tx,
            shutdown_tx,
            close_rx,
            request_timeout,
        }
    }

    /// Default per-request timeout carried over from the session config.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// A watch that flips to true exactly once, when the peer closes the
    /// transport or a read error forces closure.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.close_rx.borrow()
    }

    /// Send one request and await its reply within `timeout`. One
    /// outstanding request per invocation; concurrent validations require
    /// separate sessions.
    pub(crate) async fn send_request(
        &self,
        content_type: i32,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Envelope> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(sequence, reply_tx);

        let envelope = Envelope {
            content_type,
            sequence,
            reply_for: None,
            body,
        };
        if self.outbound.send(envelope).await.is_err() {
            self.pending.remove(&sequence);
            return Err(ChannelError::Closed);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.pending.remove(&sequence);
                Err(ChannelError::Timeout(timeout))
            }
        }
    }

    /// Close the session. Idempotent; safe to call after the peer has
    /// already closed.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub struct MemWriter {
        tx: Option<mpsc::Sender<Bytes>>,
    }

    pub struct MemReader {
        rx: mpsc::Receiver<Bytes>,
    }

    #[async_trait]
    impl TransportWriter for MemWriter {
        async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
            match &self.tx {
                Some(tx) => tx.send(frame).await.map_err(|_| ChannelError::Closed),
                None => Err(ChannelError::Closed),
            }
        }

        async fn shutdown(&mut self) {
            self.tx = None;
        }
    }

    #[async_trait]
    impl TransportReader for MemReader {
        async fn next_frame(&mut self) -> Result<Option<Bytes>> {
            Ok(self.rx.recv().await)
        }
    }

    /// Two connected in-memory transport halves: (client, server).
    pub fn transport_pair() -> ((MemWriter, MemReader), (MemWriter, MemReader)) {
        let (client_tx, server_rx) = mpsc::channel(16);
        let (server_tx, client_rx) = mpsc::channel(16);
        (
            (MemWriter { tx: Some(client_tx) }, MemReader { rx: client_rx }),
            (MemWriter { tx: Some(server_tx) }, MemReader { rx: server_rx }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::transport_pair;
    use super::*;
    use crate::messages::{ComponentType, ComponentValidationDetail};

    fn detail_body(id: &str) -> Bytes {
        wire::encode_body(&ComponentValidationDetail {
            component_type: ComponentType::Router,
            component_id: id.to_string(),
            component_name: format!("router-{id}"),
            validate_success: true,
            errors: vec![],
        })
        .expect("encode")
    }

    #[tokio::test]
    async fn test_typed_details_are_routed() {
        let ((cw, cr), (mut sw, _sr)) = transport_pair();

        let (detail_tx, mut detail_rx) = mpsc::channel::<ComponentValidationDetail>(8);
        let bindings =
            SessionBindings::new().typed_detail_channel(wire::ROUTER_DATA_MODEL_DETAILS, detail_tx);
        let _session = ChannelSession::start(cw, cr, bindings, Duration::from_secs(1));

        let envelope = Envelope::new(wire::ROUTER_DATA_MODEL_DETAILS, detail_body("r7"));
        sw.send_frame(envelope.encode()).await.expect("send");

        let detail = detail_rx.recv().await.expect("detail");
        assert_eq!(detail.component_id, "r7");
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let ((cw, cr), (mut sw, _sr)) = transport_pair();

        let (first_tx, mut first_rx) = mpsc::channel::<ComponentValidationDetail>(8);
        let (second_tx, mut second_rx) = mpsc::channel::<ComponentValidationDetail>(8);
        let bindings = SessionBindings::new()
            .typed_detail_channel(wire::ROUTER_DATA_MODEL_DETAILS, first_tx)
            .typed_detail_channel(wire::ROUTER_DATA_MODEL_DETAILS, second_tx);
        let _session = ChannelSession::start(cw, cr, bindings, Duration::from_secs(1));

        let envelope = Envelope::new(wire::ROUTER_DATA_MODEL_DETAILS, detail_body("r1"));
        sw.send_frame(envelope.encode()).await.expect("send");

        assert!(second_rx.recv().await.is_some());
        // the replaced handler's queue was dropped with the registration
        assert!(first_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_signal_fires_on_peer_close() {
        let ((cw, cr), (mut sw, _sr)) = transport_pair();
        let session =
            ChannelSession::start(cw, cr, SessionBindings::new(), Duration::from_secs(1));

        assert!(!session.is_closed());
        sw.shutdown().await;

        let mut close = session.close_signal();
        close.wait_for(|closed| *closed).await.expect("close signal");
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_request_reply_correlation() {
        let ((cw, cr), (mut sw, mut sr)) = transport_pair();
        let session =
            ChannelSession::start(cw, cr, SessionBindings::new(), Duration::from_secs(1));

        let server = tokio::spawn(async move {
            let frame = sr.next_frame().await.expect("read").expect("frame");
            let request = Envelope::decode(frame).expect("decode");
            assert_eq!(request.content_type, wire::VALIDATE_ROUTER_LINKS_REQUEST);
            let body = wire::encode_body(&crate::messages::ValidateResponse {
                success: true,
                message: String::new(),
                component_count: 4,
            })
            .expect("encode");
            let reply =
                Envelope::reply_to(request.sequence, wire::VALIDATE_ROUTER_LINKS_RESPONSE, body);
            sw.send_frame(reply.encode()).await.expect("reply");
        });

        let reply = session
            .send_request(
                wire::VALIDATE_ROUTER_LINKS_REQUEST,
                Bytes::from_static(b"{\"filter\":\"\"}"),
                Duration::from_secs(1),
            )
            .await
            .expect("reply");
        assert_eq!(reply.content_type, wire::VALIDATE_ROUTER_LINKS_RESPONSE);
        server.await.expect("server");
    }

    #[tokio::test]
    async fn test_request_times_out_without_reply() {
        let ((cw, cr), (_sw, _sr)) = transport_pair();
        let session =
            ChannelSession::start(cw, cr, SessionBindings::new(), Duration::from_secs(1));

        let err = session
            .send_request(
                wire::VALIDATE_TERMINATORS_REQUEST,
                Bytes::from_static(b"{}"),
                Duration::from_millis(50),
            )
            .await
            .expect_err("must time out");
        assert!(matches!(err, ChannelError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let ((cw, cr), (_sw, _sr)) = transport_pair();
        let session =
            ChannelSession::start(cw, cr, SessionBindings::new(), Duration::from_secs(1));
        session.close();
        session.close();
    }
}
