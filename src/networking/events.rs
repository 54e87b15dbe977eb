use std::fmt;
use std::sync::Arc;

use crate::crypto::Signature;
use crate::networking::message::Response;
use crate::networking::message_types::notifications::{
    AppSessionUpdateNotification, BalanceUpdateNotification, ChannelUpdateNotification,
    TransferNotification,
};
use crate::Result;

/// The server pushed events a client knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BalanceUpdate,
    ChannelUpdate,
    Transfer,
    AppSessionUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::BalanceUpdate,
        EventKind::ChannelUpdate,
        EventKind::Transfer,
        EventKind::AppSessionUpdate,
    ];

    /// method name on the wire
    pub fn method(&self) -> &'static str {
        match self {
            EventKind::BalanceUpdate => "bu",
            EventKind::ChannelUpdate => "cu",
            EventKind::Transfer => "tr",
            EventKind::AppSessionUpdate => "asu",
        }
    }

    pub fn from_method(method: &str) -> Option<EventKind> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.method() == method)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

pub type EventCallback<T> = Arc<dyn Fn(T, Vec<Signature>) + Send + Sync>;

///
/// A registered event callback together with the type its params decode
/// into. The callback also receives the event's signatures so it can check
/// who sent it before trusting the contents.
///
#[derive(Clone)]
pub enum EventHandler {
    BalanceUpdate(EventCallback<BalanceUpdateNotification>),
    ChannelUpdate(EventCallback<ChannelUpdateNotification>),
    Transfer(EventCallback<TransferNotification>),
    AppSessionUpdate(EventCallback<AppSessionUpdateNotification>),
}

impl EventHandler {
    pub fn kind(&self) -> EventKind {
        match self {
            EventHandler::BalanceUpdate(_) => EventKind::BalanceUpdate,
            EventHandler::ChannelUpdate(_) => EventKind::ChannelUpdate,
            EventHandler::Transfer(_) => EventKind::Transfer,
            EventHandler::AppSessionUpdate(_) => EventKind::AppSessionUpdate,
        }
    }

    /// Decode the event params and hand them to the callback. Nothing is
    /// called when decoding fails.
    pub fn dispatch(&self, event: Response) -> Result<()> {
        let Response {
            payload,
            signatures,
        } = event;
        match self {
            EventHandler::BalanceUpdate(callback) => callback(payload.params.translate()?, signatures),
            EventHandler::ChannelUpdate(callback) => callback(payload.params.translate()?, signatures),
            EventHandler::Transfer(callback) => callback(payload.params.translate()?, signatures),
            EventHandler::AppSessionUpdate(callback) => {
                callback(payload.params.translate()?, signatures)
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHandler({})", self.kind())
    }
}
