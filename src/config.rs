use serde::Deserialize;
use std::time::Duration;

use crate::Result;

pub const ENV_PREFIX: &str = "SIGNED_RPC";

/// Everything the node and the cli read from the config file and the
/// environment. Missing keys fall back to the defaults below.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub rpc: RpcSettings,
    pub node: NodeSettings,
    pub client: ClientSettings,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RpcSettings {
    pub host: [u8; 4],
    pub port: u16,
    /// websocket upgrade path, without slashes
    pub path: String,
    pub write_timeout_ms: u64,
    pub queue_capacity: usize,
}

impl Default for RpcSettings {
    fn default() -> Self {
        RpcSettings {
            host: [127, 0, 0, 1],
            port: 8000,
            path: String::from("ws"),
            write_timeout_ms: 5000,
            queue_capacity: 10,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct NodeSettings {
    /// hex encoded secp256k1 secret, a fresh key is generated when absent
    pub private_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ClientSettings {
    pub call_timeout_ms: u64,
    pub event_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            call_timeout_ms: 10_000,
            event_buffer: 100,
        }
    }
}

impl Settings {
    /// Layer the optional config file `config_name` (any extension the
    /// config crate understands) under environment variables such as
    /// `SIGNED_RPC_RPC__PORT`.
    pub fn load(config_name: &str) -> Result<Settings> {
        let mut settings = config::Config::default();
        settings
            .merge(config::File::with_name(config_name).required(false))?
            .merge(config::Environment::with_prefix(ENV_PREFIX).separator("__"))?;
        Ok(settings.try_into::<Settings>()?)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            queue_capacity: self.rpc.queue_capacity.max(1),
            write_timeout: Duration::from_millis(self.rpc.write_timeout_ms),
        }
    }

    pub fn dialer_config(&self) -> DialerConfig {
        DialerConfig {
            call_timeout: Duration::from_millis(self.client.call_timeout_ms),
            event_buffer: self.client.event_buffer.max(1),
        }
    }
}

/// Per-connection queue sizing and the send deadline after which a slow
/// peer is disconnected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionConfig {
    pub queue_capacity: usize,
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            queue_capacity: 10,
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DialerConfig {
    pub call_timeout: Duration,
    pub event_buffer: usize,
}

impl Default for DialerConfig {
    fn default() -> Self {
        DialerConfig {
            call_timeout: Duration::from_secs(10),
            event_buffer: 100,
        }
    }
}
