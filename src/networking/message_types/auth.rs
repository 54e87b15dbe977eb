use serde::{Deserialize, Serialize};

pub const AUTH_REQUEST_METHOD: &str = "auth_request";
pub const AUTH_CHALLENGE_METHOD: &str = "auth_challenge";
pub const AUTH_VERIFY_METHOD: &str = "auth_verify";
pub const GET_SESSION_METHOD: &str = "get_session";

pub const DEFAULT_SCOPE: &str = "all";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthChallenge {
    pub challenge_message: String,
}

///
/// Answer to a challenge. The request carrying it must be signed by the
/// key behind the address given in `auth_request`.
///
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthVerify {
    pub challenge: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthVerifyResult {
    pub address: String,
    pub success: bool,
}

/// Recorded on the connection at login and returned by `get_session`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    pub address: String,
    pub scope: String,
    pub authenticated_at: u64,
    pub expires_at: u64,
}

impl SessionPolicy {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}
