use std::fmt;
use std::str::FromStr;

use secp256k1::recovery::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SECP256K1};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RpcError;
use crate::Result;

pub type RpcHash = [u8; 32];

/// length of a serialized recoverable signature, r || s || v
pub const SIGNATURE_SIZE: usize = 65;

/// Anything able to put its name on a payload. The node signs every
/// response with one; clients attach one signature per co-signer.
pub trait Signer: Send + Sync {
    fn sign(&self, data: &[u8]) -> Result<Signature>;
    /// Identity the signatures recover to, `0x`-prefixed.
    fn address(&self) -> String;
}

pub fn hash(data: &[u8]) -> RpcHash {
    *blake3::hash(data).as_bytes()
}

/// A signature as carried on the wire: raw bytes, `0x` hex in JSON.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl FromStr for Signature {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| RpcError::Decode(String::from("signature must be 0x-prefixed")))?;
        let bytes = hex::decode(stripped)
            .map_err(|err| RpcError::Decode(format!("invalid signature hex: {}", err)))?;
        Ok(Signature(bytes))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_str(&s).map_err(de::Error::custom)
    }
}

pub fn address_from_public_key(public_key: &PublicKey) -> String {
    format!("0x{}", hex::encode(public_key.serialize()))
}

/// Parse a `0x` address back into the public key it names.
pub fn public_key_from_address(address: &str) -> Result<PublicKey> {
    let stripped = address
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::Crypto(String::from("address must be 0x-prefixed")))?;
    let bytes =
        hex::decode(stripped).map_err(|err| RpcError::Crypto(format!("invalid address: {}", err)))?;
    Ok(PublicKey::from_slice(&bytes)?)
}

/// Recover the address that produced `signature` over `data`.
pub fn recover_address(data: &[u8], signature: &Signature) -> Result<String> {
    let bytes = signature.as_bytes();
    if bytes.len() != SIGNATURE_SIZE {
        return Err(RpcError::Crypto(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_SIZE,
            bytes.len()
        )));
    }
    let recovery_id = RecoveryId::from_i32(bytes[64] as i32)?;
    let recoverable = RecoverableSignature::from_compact(&bytes[..64], recovery_id)?;
    let message = Message::from_slice(&hash(data))?;
    let public_key = SECP256K1.recover(&message, &recoverable)?;
    Ok(address_from_public_key(&public_key))
}

/// True when `signature` over `data` was produced by `address`.
pub fn verify_signature(data: &[u8], signature: &Signature, address: &str) -> bool {
    match recover_address(data, signature) {
        Ok(recovered) => recovered.eq_ignore_ascii_case(address),
        Err(_) => false,
    }
}
