use parking_lot::RwLock;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crypto::{Signature, Signer};
use crate::error::RpcError;
use crate::networking::dialer::Dialer;
use crate::networking::events::{EventHandler, EventKind};
use crate::networking::message::{Params, Payload, Request, Response};
use crate::networking::message_types::auth::{
    AuthChallenge, AuthRequest, AuthVerify, AuthVerifyResult, SessionPolicy,
    AUTH_CHALLENGE_METHOD, AUTH_REQUEST_METHOD, AUTH_VERIFY_METHOD, GET_SESSION_METHOD,
};
use crate::networking::message_types::broker_config::{BrokerConfig, GET_CONFIG_METHOD};
use crate::networking::message_types::notifications::{
    AppSessionUpdateNotification, BalanceUpdateNotification, ChannelUpdateNotification,
    TransferNotification,
};
use crate::networking::message_types::{PING_METHOD, PONG_METHOD};
use crate::Result;

/// Random id for an outgoing call. Never 0, that id is reserved for events.
pub fn generate_request_id() -> u64 {
    rand::thread_rng().gen_range(1..=u64::MAX)
}

///
/// Typed client for a node. Every call is signed by all of `signers`, in
/// order; most methods need one signer, quorum methods need more.
///
pub struct Client<D: Dialer> {
    dialer: D,
    signers: Vec<Arc<dyn Signer>>,
    event_handlers: RwLock<HashMap<EventKind, EventHandler>>,
}

impl<D: Dialer> Client<D> {
    pub fn new(dialer: D, signers: Vec<Arc<dyn Signer>>) -> Self {
        Client {
            dialer,
            signers,
            event_handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    pub fn signers(&self) -> &[Arc<dyn Signer>] {
        &self.signers
    }

    ///
    /// Sign and send a request, returning the raw response. An error
    /// carried in the response params comes back as `RpcError::Remote`
    /// before anything looks at the rest of the response.
    ///
    pub async fn call(&self, method: &str, params: Params) -> Result<Response> {
        let payload = Payload::new(generate_request_id(), method, params);
        let bytes = payload.to_bytes()?;
        let signatures = self
            .signers
            .iter()
            .map(|signer| signer.sign(&bytes))
            .collect::<Result<Vec<Signature>>>()?;

        let response = self.dialer.call(&Request::new(payload, signatures)).await?;
        if let Some(err) = response.payload.params.error() {
            return Err(err);
        }
        Ok(response)
    }

    async fn call_expecting<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Params,
        expected: &str,
    ) -> Result<T> {
        let response = self.call(method, params).await?;
        if response.payload.method != expected {
            return Err(RpcError::UnexpectedMethod {
                expected: expected.to_string(),
                got: response.payload.method,
            });
        }
        response.payload.params.translate()
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self.call(PING_METHOD, Params::new()).await?;
        if response.payload.method != PONG_METHOD {
            return Err(RpcError::UnexpectedMethod {
                expected: PONG_METHOD.to_string(),
                got: response.payload.method,
            });
        }
        Ok(())
    }

    pub async fn get_config(&self) -> Result<BrokerConfig> {
        self.call_expecting(GET_CONFIG_METHOD, Params::new(), GET_CONFIG_METHOD)
            .await
    }

    pub async fn auth_request(&self, address: &str, scope: Option<&str>) -> Result<AuthChallenge> {
        let params = Params::from_value(&AuthRequest {
            address: address.to_string(),
            scope: scope.map(String::from),
        })?;
        self.call_expecting(AUTH_REQUEST_METHOD, params, AUTH_CHALLENGE_METHOD)
            .await
    }

    pub async fn auth_verify(&self, challenge: &str) -> Result<AuthVerifyResult> {
        let params = Params::from_value(&AuthVerify {
            challenge: challenge.to_string(),
        })?;
        self.call_expecting(AUTH_VERIFY_METHOD, params, AUTH_VERIFY_METHOD)
            .await
    }

    pub async fn get_session(&self) -> Result<SessionPolicy> {
        self.call_expecting(GET_SESSION_METHOD, Params::new(), GET_SESSION_METHOD)
            .await
    }

    /// Challenge login as the first signer.
    pub async fn login(&self) -> Result<AuthVerifyResult> {
        let signer = self
            .signers
            .first()
            .ok_or_else(|| RpcError::Config(String::from("login needs a signer")))?;
        let challenge = self.auth_request(&signer.address(), None).await?;
        self.auth_verify(&challenge.challenge_message).await
    }

    //
    // events, one handler per kind; registering again replaces the old one
    //
    pub fn handle_balance_update_event(
        &self,
        callback: impl Fn(BalanceUpdateNotification, Vec<Signature>) + Send + Sync + 'static,
    ) {
        self.set_event_handler(EventHandler::BalanceUpdate(Arc::new(callback)));
    }

    pub fn handle_channel_update_event(
        &self,
        callback: impl Fn(ChannelUpdateNotification, Vec<Signature>) + Send + Sync + 'static,
    ) {
        self.set_event_handler(EventHandler::ChannelUpdate(Arc::new(callback)));
    }

    pub fn handle_transfer_event(
        &self,
        callback: impl Fn(TransferNotification, Vec<Signature>) + Send + Sync + 'static,
    ) {
        self.set_event_handler(EventHandler::Transfer(Arc::new(callback)));
    }

    pub fn handle_app_session_update_event(
        &self,
        callback: impl Fn(AppSessionUpdateNotification, Vec<Signature>) + Send + Sync + 'static,
    ) {
        self.set_event_handler(EventHandler::AppSessionUpdate(Arc::new(callback)));
    }

    fn set_event_handler(&self, handler: EventHandler) {
        self.event_handlers.write().insert(handler.kind(), handler);
    }

    ///
    /// Dispatch events to the registered handlers until `token` is
    /// cancelled or the dialer runs out of events. Unknown methods and
    /// events that fail to decode are logged and dropped.
    ///
    pub async fn listen_events(&self, token: &CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return,
                event = self.dialer.next_event() => event,
            };
            let event = match event {
                Some(event) => event,
                None => {
                    debug!("event source closed");
                    return;
                }
            };
            let kind = match EventKind::from_method(&event.payload.method) {
                Some(kind) => kind,
                None => {
                    warn!(method = %event.payload.method, "unknown event");
                    continue;
                }
            };
            let handler = self.event_handlers.read().get(&kind).cloned();
            match handler {
                Some(handler) => {
                    if let Err(err) = handler.dispatch(event) {
                        warn!(%kind, "failed to decode event: {}", err);
                    }
                }
                None => debug!(%kind, "no handler registered"),
            }
        }
    }
}
