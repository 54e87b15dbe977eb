use serde::{Deserialize, Serialize};

pub const GET_CONFIG_METHOD: &str = "get_config";

/// What a client learns about the node before doing anything else.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BrokerConfig {
    /// address the node signs every response with
    pub broker_address: String,
    pub methods: Vec<String>,
}
