use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::RpcError;
use crate::networking::connection::Connection;
use crate::networking::dialer::Dialer;
use crate::networking::message::{Request, Response};
use crate::Result;

/// Connection that records every write.
pub struct MockConnection {
    connection_id: String,
    user_id: RwLock<String>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockConnection {
    pub fn new(connection_id: &str, user_id: &str) -> Arc<MockConnection> {
        Arc::new(MockConnection {
            connection_id: connection_id.to_string(),
            user_id: RwLock::new(user_id.to_string()),
            sent: Mutex::new(vec![]),
        })
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
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
        self.sent.lock().push(message);
    }
}

type Responder = Box<dyn Fn(&Request) -> Result<Response> + Send + Sync>;

/// Dialer answering calls from a closure, with events pushed by the test.
pub struct MockDialer {
    responder: Responder,
    requests: Mutex<Vec<Request>>,
    connected: AtomicBool,
    events_tx: Mutex<Option<mpsc::UnboundedSender<Response>>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Response>>,
}

impl MockDialer {
    pub fn new(responder: impl Fn(&Request) -> Result<Response> + Send + Sync + 'static) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        MockDialer {
            responder: Box::new(responder),
            requests: Mutex::new(vec![]),
            connected: AtomicBool::new(true),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: tokio::sync::Mutex::new(events_rx),
        }
    }

    /// Every request `call` received, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn push_event(&self, event: Response) {
        if let Some(events_tx) = self.events_tx.lock().as_ref() {
            let _ = events_tx.send(event);
        }
    }

    /// `next_event` returns None once the queued events are drained.
    pub fn close_events(&self) {
        self.events_tx.lock().take();
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, _url: &str) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn call(&self, request: &Request) -> Result<Response> {
        if !self.is_connected() {
            return Err(RpcError::NotConnected);
        }
        self.requests.lock().push(request.clone());
        (self.responder)(request)
    }

    async fn next_event(&self) -> Option<Response> {
        self.events_rx.lock().await.recv().await
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.close_events();
        Ok(())
    }
}
