use rand::RngCore;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use std::fmt;

use crate::crypto::{address_from_public_key, hash, Signature, Signer, SIGNATURE_SIZE};
use crate::error::RpcError;
use crate::Result;

/// An secp256k1 keypair for signing and verifying messages
#[derive(Debug, PartialEq)]
pub struct Keypair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Keypair {
    /// Create and return a keypair with a randomly generated private key.
    pub fn new() -> Keypair {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 32];
        loop {
            // the odd 32 byte string is outside the curve order, draw again
            rng.fill_bytes(&mut bytes);
            if let Ok(keypair) = Keypair::from_secret_slice(&bytes) {
                return keypair;
            }
        }
    }

    /// Create and return a keypair with  the given u8 array as the private key
    pub fn from_secret_slice(slice: &[u8]) -> Result<Keypair> {
        let secret_key = SecretKey::from_slice(slice)?;
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);

        Ok(Keypair {
            secret_key,
            public_key,
        })
    }

    /// Create and return a keypair with the given hex string as the private key.
    /// A leading `0x` is accepted.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Keypair> {
        let secret_hex = secret_hex.strip_prefix("0x").unwrap_or(secret_hex);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret_hex, &mut bytes as &mut [u8])
            .map_err(|err| RpcError::Crypto(format!("invalid private key hex: {}", err)))?;
        Keypair::from_secret_slice(&bytes)
    }

    /// Get the public key of the keypair in `0x` hex (i.e. address) format
    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// Hash and sign message bytes, producing r || s || v
    pub fn sign_message(&self, message_bytes: &[u8]) -> Result<Signature> {
        let msg = Message::from_slice(&hash(message_bytes))?;
        let (recovery_id, compact) = SECP256K1
            .sign_recoverable(&msg, &self.secret_key)
            .serialize_compact();
        let mut bytes = Vec::with_capacity(SIGNATURE_SIZE);
        bytes.extend_from_slice(&compact);
        bytes.push(recovery_id.to_i32() as u8);
        Ok(Signature::new(bytes))
    }
}

impl Default for Keypair {
    fn default() -> Self {
        Keypair::new()
    }
}

impl Signer for Keypair {
    fn sign(&self, data: &[u8]) -> Result<Signature> {
        self.sign_message(data)
    }

    fn address(&self) -> String {
        Keypair::address(self)
    }
}

impl fmt::Display for Keypair {
    /// formats a Keypair without leaking the private key
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address:{}", self.address())
    }
}
