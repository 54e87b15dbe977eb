use thiserror::Error;

/// Every failure the transport, router and client can report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    //
    // transport
    //
    #[error("connection closed abnormally: {0}")]
    AbnormalClosure(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("not connected")]
    NotConnected,
    #[error("timed out after {0}ms")]
    Timeout(u64),

    //
    // decoding
    //
    #[error("invalid payload: expected 4 elements, got {0}")]
    PayloadArity(usize),
    #[error("invalid payload: element {index} ({name}) {reason}")]
    PayloadElement {
        index: usize,
        name: &'static str,
        reason: &'static str,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),

    //
    // routing and handlers
    //
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    /// A handler failure whose message is safe to show the caller.
    #[error("{0}")]
    Client(String),

    //
    // client side
    //
    /// The peer answered with `{"error": ...}` in its params.
    #[error("{0}")]
    Remote(String),
    #[error("unexpected response method: expected {expected}, got {got}")]
    UnexpectedMethod { expected: String, got: String },

    //
    // registry
    //
    #[error("connection with id {0} already exists")]
    DuplicateConnection(String),
    #[error("connection with id {0} not found")]
    UnknownConnection(String),

    //
    // crypto and setup
    //
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl RpcError {
    /// Shorthand for a handler error that may be forwarded verbatim.
    pub fn client(message: impl Into<String>) -> Self {
        RpcError::Client(message.into())
    }

    pub fn is_client_safe(&self) -> bool {
        matches!(self, RpcError::Client(_))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Decode(err.to_string())
    }
}

impl From<secp256k1::Error> for RpcError {
    fn from(err: secp256k1::Error) -> Self {
        RpcError::Crypto(err.to_string())
    }
}

impl From<config::ConfigError> for RpcError {
    fn from(err: config::ConfigError) -> Self {
        RpcError::Config(err.to_string())
    }
}

impl From<warp::Error> for RpcError {
    fn from(err: warp::Error) -> Self {
        RpcError::Socket(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RpcError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RpcError::Socket(err.to_string())
    }
}
