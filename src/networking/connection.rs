use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, event, warn, Level};

use crate::config::ConnectionConfig;
use crate::error::RpcError;
use crate::networking::transport::{Frame, FrameSink, FrameStream};
use crate::Result;

/// What the hub and the router need from a live socket.
#[async_trait]
pub trait Connection: Send + Sync {
    fn connection_id(&self) -> &str;
    /// empty until the connection authenticates
    fn user_id(&self) -> String;
    fn set_user_id(&self, user_id: &str);
    /// Queue bytes for the peer, giving up after the write timeout.
    async fn write_raw_response(&self, message: Vec<u8>);
}

///
/// A server side websocket connection.
///
/// `serve` runs a reader, a writer and a close watcher against the socket.
/// Inbound frames land in a bounded queue drained by `read_request`, and
/// outbound messages go through a bounded queue filled by
/// `write_raw_response`. A peer that leaves its outbound queue full for
/// longer than the write timeout is disconnected.
///
pub struct WsConnection {
    connection_id: String,
    user_id: RwLock<String>,
    config: ConnectionConfig,
    serving: AtomicBool,
    socket: Mutex<Option<(FrameStream, FrameSink)>>,
    inbound_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    close_tx: mpsc::Sender<()>,
    close_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl WsConnection {
    pub fn new(
        connection_id: String,
        user_id: String,
        stream: FrameStream,
        sink: FrameSink,
        config: ConnectionConfig,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity);
        let (close_tx, close_rx) = mpsc::channel(1);
        WsConnection {
            connection_id,
            user_id: RwLock::new(user_id),
            config,
            serving: AtomicBool::new(false),
            socket: Mutex::new(Some((stream, sink))),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            close_tx,
            close_rx: Mutex::new(Some(close_rx)),
        }
    }

    /// Next non-empty inbound message, or None once the reader has stopped.
    pub async fn read_request(&self) -> Option<Vec<u8>> {
        self.inbound_rx.lock().await.recv().await
    }

    ///
    /// Spawn the connection workers under a child of `parent` and return
    /// immediately. `on_done` receives the outcome once reader and writer
    /// have both stopped: Ok for an orderly close or cancellation, the
    /// transport error for an abnormal one. Calling it a second time is a
    /// no-op that reports Ok straight away.
    ///
    pub fn serve<F>(&self, parent: &CancellationToken, on_done: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        if self.serving.swap(true, Ordering::SeqCst) {
            on_done(Ok(()));
            return;
        }
        let socket = self.socket.lock().take();
        let inbound_tx = self.inbound_tx.lock().take();
        let outbound_rx = self.outbound_rx.lock().take();
        let close_rx = self.close_rx.lock().take();
        let (stream, sink, inbound_tx, outbound_rx, close_rx) =
            match (socket, inbound_tx, outbound_rx, close_rx) {
                (Some((stream, sink)), Some(inbound_tx), Some(outbound_rx), Some(close_rx)) => {
                    (stream, sink, inbound_tx, outbound_rx, close_rx)
                }
                _ => {
                    on_done(Ok(()));
                    return;
                }
            };

        let token = parent.child_token();
        let reader = tokio::spawn(read_frames(
            self.connection_id.clone(),
            stream,
            inbound_tx,
            token.clone(),
        ));
        let writer = tokio::spawn(write_frames(
            self.connection_id.clone(),
            sink,
            outbound_rx,
            token.clone(),
            self.config.write_timeout,
        ));
        tokio::spawn(watch_close(self.connection_id.clone(), close_rx, token.clone()));

        tokio::spawn(async move {
            let (read_result, write_result) = tokio::join!(reader, writer);
            token.cancel();
            let read_result =
                read_result.unwrap_or_else(|err| Err(RpcError::Socket(err.to_string())));
            let write_result =
                write_result.unwrap_or_else(|err| Err(RpcError::Socket(err.to_string())));
            on_done(read_result.and(write_result));
        });
    }

    #[cfg(test)]
    pub(crate) fn take_outbound(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.outbound_rx.lock().take()
    }

    #[cfg(test)]
    pub(crate) fn pending_close_signals(&self) -> usize {
        let mut close_rx = self.close_rx.lock();
        let mut count = 0;
        if let Some(close_rx) = close_rx.as_mut() {
            while close_rx.try_recv().is_ok() {
                count += 1;
            }
        }
        count
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn user_id(&self) -> String {
        self.user_id.read().clone()
    }

    fn set_user_id(&self, user_id: &str) {
        *self.user_id.write() = user_id.to_string();
    }

    async fn write_raw_response(&self, message: Vec<u8>) {
        match timeout(self.config.write_timeout, self.outbound_tx.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!(connection_id = %self.connection_id, "outbound queue closed, dropping message");
            }
            Err(_) => {
                warn!(
                    connection_id = %self.connection_id,
                    "outbound queue stalled for {:?}, closing connection",
                    self.config.write_timeout
                );
                // one pending signal is enough, later ones are dropped
                let _ = self.close_tx.try_send(());
            }
        }
    }
}

async fn read_frames(
    connection_id: String,
    mut stream: FrameStream,
    inbound: mpsc::Sender<Vec<u8>>,
    token: CancellationToken,
) -> Result<()> {
    let result = loop {
        let next = tokio::select! {
            _ = token.cancelled() => break Ok(()),
            next = stream.next() => next,
        };
        match next {
            None => break Ok(()),
            Some(Ok(Frame::Data(bytes))) => {
                if bytes.is_empty() {
                    continue;
                }
                tokio::select! {
                    _ = token.cancelled() => break Ok(()),
                    sent = inbound.send(bytes) => {
                        if sent.is_err() {
                            break Ok(());
                        }
                    }
                }
            }
            Some(Ok(Frame::Control)) => continue,
            Some(Ok(frame @ Frame::Close(_))) => {
                if frame.is_normal_close() {
                    break Ok(());
                }
                event!(Level::WARN, %connection_id, "unexpected close: {:?}", frame);
                break Err(RpcError::AbnormalClosure(format!("{:?}", frame)));
            }
            Some(Err(err)) => {
                event!(Level::ERROR, %connection_id, "error reading from socket: {}", err);
                break Err(RpcError::AbnormalClosure(err.to_string()));
            }
        }
    };
    // dropping `inbound` closes the request queue for the processing loop
    drop(inbound);
    token.cancel();
    result
}

async fn write_frames(
    connection_id: String,
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    token: CancellationToken,
    close_timeout: Duration,
) -> Result<()> {
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if message.is_empty() {
            continue;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            fed = sink.feed(message) => {
                if let Err(err) = fed {
                    error!(%connection_id, "error getting next writer: {}", err);
                    continue;
                }
            }
        }
        tokio::select! {
            _ = token.cancelled() => break,
            flushed = sink.flush() => {
                if let Err(err) = flushed {
                    error!(%connection_id, "error writing to socket: {}", err);
                }
            }
        }
    }
    match timeout(close_timeout, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(%connection_id, "error closing socket: {}", err),
        Err(_) => debug!(%connection_id, "timed out closing socket"),
    }
    Ok(())
}

async fn watch_close(connection_id: String, mut close: mpsc::Receiver<()>, token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = close.recv() => {
            event!(Level::INFO, %connection_id, "close requested, shutting connection down");
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utilities::{memory_socket, stalled_socket};
    use std::time::Instant;
    use tokio::sync::oneshot;

    fn done_channel() -> (
        impl FnOnce(Result<()>) + Send + 'static,
        oneshot::Receiver<Result<()>>,
    ) {
        let (tx, rx) = oneshot::channel();
        (
            move |result| {
                let _ = tx.send(result);
            },
            rx,
        )
    }

    #[tokio::test]
    async fn reads_and_writes_test() {
        let (stream, sink, mut peer) = memory_socket();
        let conn = WsConnection::new(
            String::from("c1"),
            String::new(),
            stream,
            sink,
            ConnectionConfig::default(),
        );
        let token = CancellationToken::new();
        let (on_done, done) = done_channel();
        conn.serve(&token, on_done);

        peer.send_data(b"[]");
        assert_eq!(conn.read_request().await, Some(b"[]".to_vec()));

        conn.write_raw_response(b"reply".to_vec()).await;
        assert_eq!(peer.next_message().await, Some(b"reply".to_vec()));

        token.cancel();
        assert_eq!(done.await.unwrap(), Ok(()));
        // the socket is closed once the writer stops
        assert_eq!(peer.next_message().await, None);
    }

    #[tokio::test]
    async fn empty_frames_are_dropped_test() {
        let (stream, sink, mut peer) = memory_socket();
        let conn = WsConnection::new(
            String::from("c1"),
            String::new(),
            stream,
            sink,
            ConnectionConfig::default(),
        );
        let token = CancellationToken::new();
        let (on_done, _done) = done_channel();
        conn.serve(&token, on_done);

        peer.send_data(b"");
        peer.send_frame(Frame::Control);
        peer.send_data(b"second");
        assert_eq!(conn.read_request().await, Some(b"second".to_vec()));

        conn.write_raw_response(vec![]).await;
        conn.write_raw_response(b"x".to_vec()).await;
        assert_eq!(peer.next_message().await, Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn normal_close_test() {
        let (stream, sink, mut peer) = memory_socket();
        let conn = WsConnection::new(
            String::from("c1"),
            String::new(),
            stream,
            sink,
            ConnectionConfig::default(),
        );
        let (on_done, done) = done_channel();
        conn.serve(&CancellationToken::new(), on_done);

        peer.send_frame(Frame::Close(Some(1000)));
        assert_eq!(done.await.unwrap(), Ok(()));
        assert_eq!(conn.read_request().await, None);
        assert_eq!(peer.next_message().await, None);
    }

    #[tokio::test]
    async fn abnormal_close_test() {
        let (stream, sink, peer) = memory_socket();
        let conn = WsConnection::new(
            String::from("c1"),
            String::new(),
            stream,
            sink,
            ConnectionConfig::default(),
        );
        let (on_done, done) = done_channel();
        conn.serve(&CancellationToken::new(), on_done);

        peer.send_frame(Frame::Close(Some(1006)));
        assert!(matches!(
            done.await.unwrap(),
            Err(RpcError::AbnormalClosure(_))
        ));

        let (stream, sink, peer) = memory_socket();
        let conn = WsConnection::new(
            String::from("c2"),
            String::new(),
            stream,
            sink,
            ConnectionConfig::default(),
        );
        let (on_done, done) = done_channel();
        conn.serve(&CancellationToken::new(), on_done);
        peer.send_error(RpcError::Socket(String::from("reset by peer")));
        assert!(matches!(
            done.await.unwrap(),
            Err(RpcError::AbnormalClosure(_))
        ));
    }

    #[tokio::test]
    async fn serve_is_idempotent_test() {
        let (stream, sink, _peer) = memory_socket();
        let conn = WsConnection::new(
            String::from("c1"),
            String::new(),
            stream,
            sink,
            ConnectionConfig::default(),
        );
        let token = CancellationToken::new();
        let (first, mut first_done) = done_channel();
        conn.serve(&token, first);

        let (second, second_done) = done_channel();
        conn.serve(&token, second);
        assert_eq!(second_done.await.unwrap(), Ok(()));
        assert!(first_done.try_recv().is_err());

        token.cancel();
        assert_eq!(first_done.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn stalled_write_times_out_and_signals_close_once_test() {
        let (stream, sink, _peer) = memory_socket();
        let config = ConnectionConfig {
            queue_capacity: 2,
            write_timeout: Duration::from_millis(100),
        };
        // never served, so nothing drains the outbound queue
        let conn = WsConnection::new(String::from("c1"), String::new(), stream, sink, config);

        conn.write_raw_response(b"1".to_vec()).await;
        conn.write_raw_response(b"2".to_vec()).await;
        assert_eq!(conn.pending_close_signals(), 0);

        let started = Instant::now();
        conn.write_raw_response(b"3".to_vec()).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(1000));

        conn.write_raw_response(b"4".to_vec()).await;
        conn.write_raw_response(b"5".to_vec()).await;
        assert_eq!(conn.pending_close_signals(), 1);

        let mut outbound = conn.take_outbound().unwrap();
        assert_eq!(outbound.recv().await, Some(b"1".to_vec()));
        assert_eq!(outbound.recv().await, Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn unresponsive_peer_is_disconnected_test() {
        let (stream, sink, _peer) = stalled_socket();
        let config = ConnectionConfig {
            queue_capacity: 1,
            write_timeout: Duration::from_millis(50),
        };
        let conn = WsConnection::new(String::from("c1"), String::new(), stream, sink, config);
        let (on_done, done) = done_channel();
        conn.serve(&CancellationToken::new(), on_done);

        for i in 0..8u8 {
            conn.write_raw_response(vec![i]).await;
        }
        let result = tokio::time::timeout(Duration::from_secs(2), done)
            .await
            .expect("connection should close")
            .unwrap();
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn user_id_test() {
        let (stream, sink, _peer) = memory_socket();
        let conn = WsConnection::new(
            String::from("c1"),
            String::new(),
            stream,
            sink,
            ConnectionConfig::default(),
        );
        assert_eq!(conn.connection_id(), "c1");
        assert_eq!(conn.user_id(), "");
        conn.set_user_id("0xabc");
        assert_eq!(conn.user_id(), "0xabc");
    }
}
