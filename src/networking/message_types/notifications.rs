//!
//! Bodies of the events the node pushes with request id 0. Amounts travel
//! as decimal strings so no precision is lost on either side.
//!

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Balance {
    pub asset: String,
    pub amount: String,
}

/// `bu`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BalanceUpdateNotification {
    pub balance_updates: Vec<Balance>,
}

/// `cu`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ChannelUpdateNotification {
    pub channel_id: String,
    pub participant: String,
    pub status: String,
    pub token: String,
    pub amount: String,
    pub chain_id: u64,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub updated_at: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: u64,
    pub tx_type: String,
    pub from_account: String,
    pub to_account: String,
    pub asset: String,
    pub amount: String,
    #[serde(default)]
    pub created_at: u64,
}

/// `tr`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TransferNotification {
    pub transactions: Vec<Transaction>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParticipantAllocation {
    pub participant: String,
    pub asset: String,
    pub amount: String,
}

/// `asu`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AppSessionUpdateNotification {
    pub app_session_id: String,
    pub status: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub session_data: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub participant_allocations: Vec<ParticipantAllocation>,
}
