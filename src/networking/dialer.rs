use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DialerConfig;
use crate::error::RpcError;
use crate::networking::message::{Request, Response};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// Client side of the transport: one socket, synchronous calls correlated
/// by request id, and a stream of everything the node pushes on its own.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<()>;
    fn is_connected(&self) -> bool;
    /// Send `request` and wait for the response with the same id.
    async fn call(&self, request: &Request) -> Result<Response>;
    /// Next server pushed event; None once the socket is gone.
    async fn next_event(&self) -> Option<Response>;
    async fn close(&self) -> Result<()>;
}

struct Session {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingCalls,
    connected: Arc<AtomicBool>,
    token: CancellationToken,
}

///
/// `Dialer` over tokio-tungstenite. Every `dial` starts a reader and a
/// writer task; responses are matched to waiting calls by request id and
/// id 0 responses go to the event queue. If nobody drains the event queue
/// it fills up and further events are dropped.
///
pub struct WebsocketDialer {
    config: DialerConfig,
    session: Mutex<Option<Session>>,
    events: tokio::sync::Mutex<Option<mpsc::Receiver<Response>>>,
}

impl WebsocketDialer {
    pub fn new(config: DialerConfig) -> Self {
        WebsocketDialer {
            config,
            session: Mutex::new(None),
            events: tokio::sync::Mutex::new(None),
        }
    }

    fn stop_session(&self) {
        if let Some(session) = self.session.lock().take() {
            session.connected.store(false, Ordering::SeqCst);
            session.token.cancel();
        }
    }
}

impl Default for WebsocketDialer {
    fn default() -> Self {
        WebsocketDialer::new(DialerConfig::default())
    }
}

#[async_trait]
impl Dialer for WebsocketDialer {
    async fn dial(&self, url: &str) -> Result<()> {
        let url = url::Url::parse(url).map_err(|err| RpcError::Config(err.to_string()))?;
        self.stop_session();

        let (ws_stream, _) = connect_async(url.clone()).await?;
        let (write_sink, read_stream) = ws_stream.split();
        info!(%url, "connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let token = CancellationToken::new();

        *self.events.lock().await = Some(events_rx);

        tokio::spawn(read_responses(
            read_stream,
            pending.clone(),
            events_tx,
            connected.clone(),
            token.clone(),
        ));
        tokio::spawn(write_requests(write_sink, outbound_rx, token.clone()));

        *self.session.lock() = Some(Session {
            outbound: outbound_tx,
            pending,
            connected,
            token,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn call(&self, request: &Request) -> Result<Response> {
        let request_id = request.payload.request_id;
        let text = String::from_utf8(request.to_bytes()?)
            .map_err(|err| RpcError::Encode(err.to_string()))?;

        let (response_tx, response_rx) = oneshot::channel();
        let pending = {
            let session = self.session.lock();
            let session = match session.as_ref() {
                Some(session) if session.connected.load(Ordering::SeqCst) => session,
                _ => return Err(RpcError::NotConnected),
            };
            session.pending.lock().insert(request_id, response_tx);
            if session.outbound.send(Message::Text(text)).is_err() {
                session.pending.lock().remove(&request_id);
                return Err(RpcError::ConnectionClosed);
            }
            session.pending.clone()
        };

        match timeout(self.config.call_timeout, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                pending.lock().remove(&request_id);
                Err(RpcError::Timeout(self.config.call_timeout.as_millis() as u64))
            }
        }
    }

    async fn next_event(&self) -> Option<Response> {
        let mut events = self.events.lock().await;
        match events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    async fn close(&self) -> Result<()> {
        self.stop_session();
        Ok(())
    }
}

async fn read_responses(
    mut read_stream: SplitStream<WsStream>,
    pending: PendingCalls,
    events: mpsc::Sender<Response>,
    connected: Arc<AtomicBool>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = read_stream.next() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                warn!("error reading from node: {}", err);
                break;
            }
            None => break,
        };
        let bytes = match message {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(frame) => {
                debug!("node closed the connection: {:?}", frame);
                break;
            }
            _ => continue,
        };
        let response = match Response::from_slice(&bytes) {
            Ok(response) => response,
            Err(err) => {
                warn!("dropping undecodable response: {}", err);
                continue;
            }
        };

        if response.is_notification() {
            if let Err(err) = events.try_send(response) {
                warn!("dropping event: {}", err);
            }
            continue;
        }
        let waiting = pending.lock().remove(&response.payload.request_id);
        match waiting {
            Some(waiting) => {
                let _ = waiting.send(response);
            }
            None => debug!(
                request_id = response.payload.request_id,
                "response for a request we don't know about"
            ),
        }
    }
    connected.store(false, Ordering::SeqCst);
    token.cancel();
    // waiting calls see their sender dropped and fail with ConnectionClosed
    pending.lock().clear();
}

async fn write_requests(
    mut write_sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if let Err(err) = write_sink.send(message).await {
            error!("error writing to node: {}", err);
            break;
        }
    }
    token.cancel();
    let _ = write_sink.send(Message::Close(None)).await;
    let _ = write_sink.close().await;
}
