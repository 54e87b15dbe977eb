use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::crypto::{public_key_from_address, recover_address};
use crate::error::RpcError;
use crate::networking::context::{handler, Context, Handler, StorageKey};
use crate::networking::message::Params;
use crate::networking::message_types::auth::{
    AuthChallenge, AuthRequest, AuthVerify, AuthVerifyResult, SessionPolicy,
    AUTH_CHALLENGE_METHOD, AUTH_REQUEST_METHOD, AUTH_VERIFY_METHOD, DEFAULT_SCOPE,
    GET_SESSION_METHOD,
};
use crate::networking::message_types::broker_config::{BrokerConfig, GET_CONFIG_METHOD};
use crate::networking::message_types::{PING_METHOD, PONG_METHOD};
use crate::networking::router::Router;
use crate::time::create_timestamp;

/// how long an issued challenge can be answered
pub const CHALLENGE_TTL_MS: u64 = 60_000;
pub const SESSION_TTL_MS: u64 = 24 * 60 * 60 * 1000;

pub const PRIVATE_GROUP: &str = "private";

#[derive(Debug, Clone)]
struct PendingChallenge {
    challenge: String,
    address: String,
    scope: String,
    created_at: u64,
}

const PENDING_CHALLENGE: StorageKey<PendingChallenge> = StorageKey::new("pending_challenge");
pub const SESSION_POLICY: StorageKey<SessionPolicy> = StorageKey::new("session_policy");

///
/// Register the built-in methods. Call it after the application's own
/// methods so that `get_config` lists them too.
///
/// ```text
/// root
///  ├─ ping
///  ├─ auth_request
///  ├─ auth_verify
///  ├─ get_config
///  └─ private (require_auth)
///      └─ get_session
/// ```
///
pub fn register_handlers(router: &mut Router) {
    router.handle(PING_METHOD, handler(ping));
    router.handle(AUTH_REQUEST_METHOD, handler(auth_request));
    router.handle(AUTH_VERIFY_METHOD, handler(auth_verify));
    {
        let mut private = router.new_group(PRIVATE_GROUP);
        private.use_middleware(handler(require_auth));
        private.handle(GET_SESSION_METHOD, handler(get_session));
    }

    let mut methods = router.methods();
    methods.push(GET_CONFIG_METHOD.to_string());
    methods.sort();
    let config = BrokerConfig {
        broker_address: router.signer().address(),
        methods,
    };
    router.handle(GET_CONFIG_METHOD, get_config(config));
}

fn respond<T: Serialize>(ctx: &mut Context, method: &str, value: &T) {
    match Params::from_value(value) {
        Ok(params) => ctx.succeed(method, params),
        Err(err) => ctx.fail(Some(&err), "failed to encode response"),
    }
}

fn reject(ctx: &mut Context, message: &str) {
    ctx.fail(Some(&RpcError::client(message)), "");
}

fn ping(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        ctx.succeed(PONG_METHOD, Params::new());
    })
}

fn get_config(config: BrokerConfig) -> Arc<dyn Handler> {
    handler(move |ctx| {
        let config = config.clone();
        Box::pin(async move {
            respond(ctx, GET_CONFIG_METHOD, &config);
        })
    })
}

/// Issue a fresh challenge for `address`; a newer request replaces any
/// challenge still pending on this connection.
fn auth_request(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let request: AuthRequest = match ctx.params().translate() {
            Ok(request) => request,
            Err(err) => {
                debug!("bad auth_request params: {}", err);
                return reject(ctx, "invalid auth request");
            }
        };
        if public_key_from_address(&request.address).is_err() {
            return reject(ctx, "invalid address");
        }

        let pending = PendingChallenge {
            challenge: Uuid::new_v4().to_string(),
            address: request.address,
            scope: request.scope.unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            created_at: create_timestamp(),
        };
        let challenge = AuthChallenge {
            challenge_message: pending.challenge.clone(),
        };
        ctx.storage().set(&PENDING_CHALLENGE, pending);
        respond(ctx, AUTH_CHALLENGE_METHOD, &challenge);
    })
}

///
/// Complete a login. The request must echo the pending challenge within
/// `CHALLENGE_TTL_MS` and its first signature must recover to the address
/// the challenge was issued for. Success logs the connection in as that
/// address.
///
fn auth_verify(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let verify: AuthVerify = match ctx.params().translate() {
            Ok(verify) => verify,
            Err(_) => return reject(ctx, "invalid auth verify request"),
        };
        let pending = match ctx.storage().get(&PENDING_CHALLENGE) {
            Some(pending) => pending,
            None => return reject(ctx, "no pending challenge"),
        };

        let now = create_timestamp();
        if now.saturating_sub(pending.created_at) > CHALLENGE_TTL_MS {
            ctx.storage().remove(&PENDING_CHALLENGE);
            return reject(ctx, "challenge expired");
        }
        if pending.challenge != verify.challenge {
            return reject(ctx, "invalid challenge");
        }

        let signature = match ctx.request.signatures.first() {
            Some(signature) => signature.clone(),
            None => return reject(ctx, "missing signature"),
        };
        let signer = match ctx
            .request
            .payload
            .to_bytes()
            .and_then(|bytes| recover_address(&bytes, &signature))
        {
            Ok(signer) => signer,
            Err(err) => return ctx.fail(Some(&err), "invalid signature"),
        };
        if !signer.eq_ignore_ascii_case(&pending.address) {
            return reject(ctx, "invalid signature");
        }

        ctx.storage().remove(&PENDING_CHALLENGE);
        ctx.storage().set(
            &SESSION_POLICY,
            SessionPolicy {
                address: pending.address.clone(),
                scope: pending.scope,
                authenticated_at: now,
                expires_at: now + SESSION_TTL_MS,
            },
        );
        info!(address = %pending.address, "authenticated");
        ctx.user_id = pending.address.clone();
        respond(
            ctx,
            AUTH_VERIFY_METHOD,
            &AuthVerifyResult {
                address: pending.address,
                success: true,
            },
        );
    })
}

fn require_auth(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if ctx.user_id.is_empty() {
            return reject(ctx, "authentication required");
        }
        if let Some(policy) = ctx.storage().get(&SESSION_POLICY) {
            if policy.is_expired(create_timestamp()) {
                return reject(ctx, "session expired");
            }
        }
        ctx.next().await;
    })
}

fn get_session(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        match ctx.storage().get(&SESSION_POLICY) {
            Some(policy) => respond(ctx, GET_SESSION_METHOD, &policy),
            None => reject(ctx, "no active session"),
        }
    })
}
