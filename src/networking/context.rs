use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::crypto::Signer;
use crate::error::RpcError;
use crate::networking::message::{Params, Payload, Request};

/// sent when a handler fails without a client safe error or a fallback
pub const DEFAULT_ERROR_MESSAGE: &str = "an error occurred";

/// A link in a handler chain. Middleware calls `ctx.next().await` to run the
/// rest of the chain; leaves usually don't.
pub trait Handler: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        (self)(ctx)
    }
}

/// Wrap a function or closure as a shareable handler.
pub fn handler<F>(f: F) -> Arc<dyn Handler>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Typed name for a value kept in a `SessionStore`.
pub struct StorageKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StorageKey<T> {
    pub const fn new(name: &'static str) -> Self {
        StorageKey {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

///
/// Key/value state that outlives a single request: one store per
/// connection, shared by every request on it and dropped with it.
///
#[derive(Default)]
pub struct SessionStore {
    entries: RwLock<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore::default()
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &StorageKey<T>) -> Option<T> {
        self.entries
            .read()
            .get(key.name)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: &StorageKey<T>, value: T) {
        self.entries.write().insert(key.name, Box::new(value));
    }

    pub fn remove<T: Send + Sync + 'static>(&self, key: &StorageKey<T>) -> Option<T> {
        let mut entries = self.entries.write();
        match entries.remove(key.name) {
            Some(value) => match value.downcast::<T>() {
                Ok(value) => Some(*value),
                Err(value) => {
                    // wrong type under this name, leave it alone
                    entries.insert(key.name, value);
                    None
                }
            },
            None => None,
        }
    }

    pub fn contains<T>(&self, key: &StorageKey<T>) -> bool {
        self.entries.read().contains_key(key.name)
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        f.debug_set().entries(entries.keys()).finish()
    }
}

///
/// Everything a handler chain sees while serving one request.
///
/// The response is last-write-wins: nothing stops a later handler from
/// overwriting what an earlier one set, so middleware running after
/// `next()` should check `has_response` first.
///
pub struct Context {
    token: CancellationToken,
    /// identity of the caller, empty until authenticated; a handler that
    /// changes it logs the connection in as the new user
    pub user_id: String,
    signer: Arc<dyn Signer>,
    pub request: Request,
    response: Option<Payload>,
    handlers: VecDeque<Arc<dyn Handler>>,
    storage: Arc<SessionStore>,
}

impl Context {
    pub fn new(
        token: CancellationToken,
        user_id: String,
        signer: Arc<dyn Signer>,
        request: Request,
        handlers: Vec<Arc<dyn Handler>>,
        storage: Arc<SessionStore>,
    ) -> Self {
        Context {
            token,
            user_id,
            signer,
            request,
            response: None,
            handlers: handlers.into(),
            storage,
        }
    }

    /// Run the next handler in the chain, if any is left.
    pub async fn next(&mut self) {
        if let Some(handler) = self.handlers.pop_front() {
            handler.call(self).await;
        }
    }

    pub fn succeed(&mut self, method: &str, params: Params) {
        self.response = Some(Payload::new(self.request_id(), method, params));
    }

    ///
    /// Answer with an error. Only `RpcError::Client` messages reach the
    /// caller as-is; anything else is replaced by `fallback`, or by a
    /// generic message when `fallback` is empty.
    ///
    pub fn fail(&mut self, err: Option<&RpcError>, fallback: &str) {
        let message = match err {
            Some(err) if err.is_client_safe() => err.to_string(),
            _ if !fallback.is_empty() => fallback.to_string(),
            _ => DEFAULT_ERROR_MESSAGE.to_string(),
        };
        self.response = Some(Payload::error(self.request_id(), &message));
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn response(&self) -> Option<&Payload> {
        self.response.as_ref()
    }

    pub fn take_response(&mut self) -> Option<Payload> {
        self.response.take()
    }

    pub fn request_id(&self) -> u64 {
        self.request.payload.request_id
    }

    pub fn method(&self) -> &str {
        &self.request.payload.method
    }

    pub fn params(&self) -> &Params {
        &self.request.payload.params
    }

    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    pub fn storage(&self) -> &Arc<SessionStore> {
        &self.storage
    }

    /// cancelled when the connection goes away
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
