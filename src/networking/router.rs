use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, event, info, warn, Level};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::crypto::Signer;
use crate::error::RpcError;
use crate::networking::connection::{Connection, WsConnection};
use crate::networking::context::{Context, Handler, SessionStore, DEFAULT_ERROR_MESSAGE};
use crate::networking::hub::ConnectionHub;
use crate::networking::message::{Params, Payload, Request, Response, NOTIFICATION_REQUEST_ID};
use crate::networking::transport::{FrameSink, FrameStream};
use crate::Result;

pub const ROOT_GROUP: &str = "root";
pub const INVALID_MESSAGE_FORMAT: &str = "invalid message format";

pub type ConnectHook = Arc<dyn Fn(SendResponse) + Send + Sync>;
pub type DisconnectHook = Arc<dyn Fn(&str, Option<&RpcError>) + Send + Sync>;
pub type MessageSentHook = Arc<dyn Fn() + Send + Sync>;
pub type AuthenticatedHook = Arc<dyn Fn(&str, SendResponse) + Send + Sync>;

/// Sign `payload` with `signer` and encode it as a response envelope.
pub fn encode_signed_response(signer: &dyn Signer, payload: Payload) -> Result<Vec<u8>> {
    let signature = signer.sign(&payload.to_bytes()?)?;
    Response::new(payload, vec![signature]).to_bytes()
}

/// Pushes signed notifications down one particular connection.
#[derive(Clone)]
pub struct SendResponse {
    connection: Arc<dyn Connection>,
    signer: Arc<dyn Signer>,
}

impl SendResponse {
    pub fn new(connection: Arc<dyn Connection>, signer: Arc<dyn Signer>) -> Self {
        SendResponse { connection, signer }
    }

    pub fn connection_id(&self) -> &str {
        self.connection.connection_id()
    }

    pub async fn send(&self, method: &str, params: Params) {
        let payload = Payload::new(NOTIFICATION_REQUEST_ID, method, params);
        match encode_signed_response(self.signer.as_ref(), payload) {
            Ok(bytes) => self.connection.write_raw_response(bytes).await,
            Err(err) => error!(method, "failed to sign notification: {}", err),
        }
    }
}

///
/// The registration side of the node. Routes, middleware and lifecycle
/// hooks are all set up here at boot; `build` then freezes them into a
/// `Node` that serves connections.
///
/// A route is the list of group ids from the root down to the method, so
/// resolving a method walks that list and concatenates each group's
/// middleware before the leaf handler.
///
pub struct Router {
    signer: Arc<dyn Signer>,
    config: ConnectionConfig,
    handler_chain: HashMap<String, Vec<Arc<dyn Handler>>>,
    routes: HashMap<String, Vec<String>>,
    on_connect: Vec<ConnectHook>,
    on_disconnect: Vec<DisconnectHook>,
    on_message_sent: Vec<MessageSentHook>,
    on_authenticated: Vec<AuthenticatedHook>,
}

impl Router {
    pub fn new(signer: Arc<dyn Signer>, config: ConnectionConfig) -> Self {
        let mut handler_chain = HashMap::new();
        handler_chain.insert(ROOT_GROUP.to_string(), vec![]);
        Router {
            signer,
            config,
            handler_chain,
            routes: HashMap::new(),
            on_connect: vec![],
            on_disconnect: vec![],
            on_message_sent: vec![],
            on_authenticated: vec![],
        }
    }

    /// Register a method on the root group.
    pub fn handle(&mut self, method: &str, handler: Arc<dyn Handler>) {
        self.register_route(&[], ROOT_GROUP, method, handler);
    }

    /// Append middleware to the root group; it runs for every method.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Handler>) {
        self.register_middleware(ROOT_GROUP, middleware);
    }

    pub fn new_group(&mut self, name: &str) -> HandlerGroup<'_> {
        self.create_group(&[], ROOT_GROUP, name)
    }

    pub fn on_connect(&mut self, hook: impl Fn(SendResponse) + Send + Sync + 'static) {
        self.on_connect.push(Arc::new(hook));
    }

    pub fn on_disconnect(
        &mut self,
        hook: impl Fn(&str, Option<&RpcError>) + Send + Sync + 'static,
    ) {
        self.on_disconnect.push(Arc::new(hook));
    }

    pub fn on_message_sent(&mut self, hook: impl Fn() + Send + Sync + 'static) {
        self.on_message_sent.push(Arc::new(hook));
    }

    pub fn on_authenticated(&mut self, hook: impl Fn(&str, SendResponse) + Send + Sync + 'static) {
        self.on_authenticated.push(Arc::new(hook));
    }

    /// Every registered method name, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.routes.keys().cloned().collect();
        methods.sort();
        methods
    }

    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    /// Freeze the routing tables into a node ready to accept connections.
    pub fn build(self) -> Arc<Node> {
        Arc::new(Node {
            signer: self.signer,
            config: self.config,
            handler_chain: self.handler_chain,
            routes: self.routes,
            on_connect: self.on_connect,
            on_disconnect: self.on_disconnect,
            on_message_sent: self.on_message_sent,
            on_authenticated: self.on_authenticated,
            hub: ConnectionHub::new(),
            shutdown: CancellationToken::new(),
        })
    }

    fn register_route(
        &mut self,
        prefix: &[String],
        group_id: &str,
        method: &str,
        handler: Arc<dyn Handler>,
    ) {
        assert!(!method.is_empty(), "method name cannot be empty");
        assert!(
            !self.handler_chain.contains_key(method),
            "method {} is already registered",
            method
        );
        let mut route = prefix.to_vec();
        route.push(group_id.to_string());
        route.push(method.to_string());
        self.handler_chain.insert(method.to_string(), vec![handler]);
        self.routes.insert(method.to_string(), route);
    }

    fn register_middleware(&mut self, group_id: &str, middleware: Arc<dyn Handler>) {
        self.handler_chain
            .entry(group_id.to_string())
            .or_default()
            .push(middleware);
    }

    fn create_group(&mut self, prefix: &[String], parent_id: &str, name: &str) -> HandlerGroup<'_> {
        assert!(!name.is_empty(), "group name cannot be empty");
        let group_id = format!("{}/{}", parent_id, name);
        assert!(
            !self.routes.contains_key(&group_id),
            "group {} clashes with a method name",
            group_id
        );
        self.handler_chain.entry(group_id.clone()).or_default();
        let mut route_prefix = prefix.to_vec();
        route_prefix.push(parent_id.to_string());
        HandlerGroup {
            router: self,
            group_id,
            route_prefix,
        }
    }
}

/// A nested bundle of middleware. Methods and middleware registered here
/// compose with everything registered on the ancestor groups.
pub struct HandlerGroup<'a> {
    router: &'a mut Router,
    group_id: String,
    route_prefix: Vec<String>,
}

impl<'a> HandlerGroup<'a> {
    pub fn handle(&mut self, method: &str, handler: Arc<dyn Handler>) {
        self.router
            .register_route(&self.route_prefix, &self.group_id, method, handler);
    }

    pub fn use_middleware(&mut self, middleware: Arc<dyn Handler>) {
        self.router.register_middleware(&self.group_id, middleware);
    }

    pub fn new_group(&mut self, name: &str) -> HandlerGroup<'_> {
        let prefix = self.route_prefix.clone();
        let parent_id = self.group_id.clone();
        self.router.create_group(&prefix, &parent_id, name)
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}

///
/// The serving side of the router: accepts connections, runs one request
/// loop per connection and keeps the hub in sync with who is logged in.
///
/// Requests on one connection are handled strictly one after the other, so
/// responses go out in request order. Different connections run in
/// parallel.
///
pub struct Node {
    signer: Arc<dyn Signer>,
    config: ConnectionConfig,
    handler_chain: HashMap<String, Vec<Arc<dyn Handler>>>,
    routes: HashMap<String, Vec<String>>,
    on_connect: Vec<ConnectHook>,
    on_disconnect: Vec<DisconnectHook>,
    on_message_sent: Vec<MessageSentHook>,
    on_authenticated: Vec<AuthenticatedHook>,
    hub: ConnectionHub,
    shutdown: CancellationToken,
}

impl Node {
    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    pub fn address(&self) -> String {
        self.signer.address()
    }

    /// Cancelling this token shuts every connection down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.routes.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Push a signed, unsolicited message to every connection of `user_id`.
    pub async fn notify(&self, user_id: &str, method: &str, params: Params) -> Result<()> {
        let payload = Payload::new(NOTIFICATION_REQUEST_ID, method, params);
        let bytes = encode_signed_response(self.signer.as_ref(), payload)?;
        self.hub.publish(user_id, bytes).await;
        Ok(())
    }

    /// Entry point for a freshly upgraded socket.
    pub async fn handle_socket(self: Arc<Self>, stream: FrameStream, sink: FrameSink) {
        let connection = Arc::new(WsConnection::new(
            Uuid::new_v4().to_string(),
            String::new(),
            stream,
            sink,
            self.config,
        ));
        self.handle_connection(connection).await;
    }

    ///
    /// Register the connection, run its socket workers next to the request
    /// loop until either of them stops, then deregister it. Whichever side
    /// finishes first cancels the other.
    ///
    pub async fn handle_connection(self: Arc<Self>, connection: Arc<WsConnection>) {
        let connection_id = connection.connection_id().to_string();
        if let Err(err) = self.hub.add(connection.clone()) {
            error!(%connection_id, "failed to register connection: {}", err);
            return;
        }
        info!(%connection_id, "connection opened");

        let send = SendResponse::new(connection.clone(), self.signer.clone());
        for hook in &self.on_connect {
            hook(send.clone());
        }

        let token = self.shutdown.child_token();
        let (done_tx, done_rx) = oneshot::channel();
        connection.serve(&token, move |result| {
            let _ = done_tx.send(result);
        });

        let storage = Arc::new(SessionStore::new());
        let serve_done = async {
            let result = done_rx.await.unwrap_or(Ok(()));
            token.cancel();
            result
        };
        let processing_done = async {
            self.process_requests(&connection, &storage, &token).await;
            token.cancel();
        };
        let (result, ()) = tokio::join!(serve_done, processing_done);

        let user_id = connection.user_id();
        self.hub.remove(&connection_id);
        match &result {
            Ok(()) => info!(%connection_id, %user_id, "connection closed"),
            Err(err) => warn!(%connection_id, %user_id, "connection closed: {}", err),
        }
        for hook in &self.on_disconnect {
            hook(&user_id, result.as_ref().err());
        }
    }

    async fn process_requests(
        &self,
        connection: &Arc<WsConnection>,
        storage: &Arc<SessionStore>,
        token: &CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = token.cancelled() => break,
                message = connection.read_request() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.process_message(connection, storage, token, &message)
                .await;
        }
    }

    async fn process_message(
        &self,
        connection: &Arc<WsConnection>,
        storage: &Arc<SessionStore>,
        token: &CancellationToken,
        message: &[u8],
    ) {
        let request = match Request::from_slice(message) {
            Ok(request) => request,
            Err(err) => {
                debug!(connection_id = %connection.connection_id(), "undecodable frame: {}", err);
                self.send_payload(connection, Payload::error(0, INVALID_MESSAGE_FORMAT))
                    .await;
                return;
            }
        };
        let request_id = request.payload.request_id;

        let handlers = match self.resolve(&request.payload.method) {
            Ok(handlers) => handlers,
            Err(err) => {
                self.send_payload(connection, Payload::error(request_id, &err.to_string()))
                    .await;
                return;
            }
        };

        let user_id = connection.user_id();
        let mut ctx = Context::new(
            token.clone(),
            user_id.clone(),
            self.signer.clone(),
            request,
            handlers,
            storage.clone(),
        );
        ctx.next().await;

        let payload = match ctx.take_response() {
            Some(payload) => payload,
            None => {
                warn!(method = %ctx.method(), "handler chain produced no response");
                Payload::error(request_id, DEFAULT_ERROR_MESSAGE)
            }
        };
        self.send_payload(connection, payload).await;

        if ctx.user_id != user_id {
            self.authenticate(connection, &ctx.user_id);
        }
    }

    fn authenticate(&self, connection: &Arc<WsConnection>, user_id: &str) {
        if let Err(err) = self.hub.reauthenticate(connection.connection_id(), user_id) {
            error!(connection_id = %connection.connection_id(), "failed to reauthenticate: {}", err);
            return;
        }
        event!(Level::INFO, connection_id = %connection.connection_id(), %user_id, "connection authenticated");
        let send = SendResponse::new(connection.clone(), self.signer.clone());
        for hook in &self.on_authenticated {
            hook(user_id, send.clone());
        }
    }

    /// Flatten the route of `method` into one handler chain.
    fn resolve(&self, method: &str) -> Result<Vec<Arc<dyn Handler>>> {
        let route = self
            .routes
            .get(method)
            .filter(|route| !route.is_empty())
            .ok_or_else(|| RpcError::UnknownMethod(method.to_string()))?;

        let mut handlers = vec![];
        for group_id in route {
            match self.handler_chain.get(group_id) {
                Some(group_handlers) => handlers.extend(group_handlers.iter().cloned()),
                None => {
                    error!(%method, %group_id, "route references a group with no handlers");
                    return Err(RpcError::UnknownMethod(method.to_string()));
                }
            }
        }
        Ok(handlers)
    }

    async fn send_payload(&self, connection: &Arc<WsConnection>, payload: Payload) {
        match encode_signed_response(self.signer.as_ref(), payload) {
            Ok(bytes) => {
                connection.write_raw_response(bytes).await;
                for hook in &self.on_message_sent {
                    hook();
                }
            }
            Err(err) => error!("failed to sign response: {}", err),
        }
    }
}
