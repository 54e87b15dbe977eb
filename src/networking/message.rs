use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::crypto::{recover_address, Signature};
use crate::error::RpcError;
use crate::time::create_timestamp;
use crate::Result;

pub const ERROR_METHOD: &str = "error";
pub const ERROR_KEY: &str = "error";

/// request id carried by server initiated notifications
pub const NOTIFICATION_REQUEST_ID: u64 = 0;

/// Method parameters, decoded lazily into whatever the handler asks for.
///
/// Keys are kept sorted so that a decoded payload re-encodes to the exact
/// bytes its sender signed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Params(BTreeMap::new())
    }

    /// Build params from any value serializing to a JSON object. `null`
    /// (e.g. `()` or `None`) becomes an empty mapping.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Params> {
        match serde_json::to_value(value).map_err(|err| RpcError::Encode(err.to_string()))? {
            Value::Object(map) => Ok(Params(map.into_iter().collect())),
            Value::Null => Ok(Params::new()),
            other => Err(RpcError::Encode(format!(
                "params must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// `{"error": message}`
    pub fn from_error(message: &str) -> Params {
        let mut params = Params::new();
        params.insert(ERROR_KEY, Value::String(message.to_string()));
        params
    }

    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        self.0.insert(key.to_string(), value)
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode the mapping into a concrete structure.
    pub fn translate<T: DeserializeOwned>(&self) -> Result<T> {
        let object: serde_json::Map<String, Value> = self
            .0
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|err| RpcError::Decode(err.to_string()))
    }

    /// The error embedded under `"error"`, if it holds a string. Any other
    /// shape is treated as no error at all.
    pub fn error(&self) -> Option<RpcError> {
        match self.0.get(ERROR_KEY) {
            Some(Value::String(message)) => Some(RpcError::Remote(message.clone())),
            _ => None,
        }
    }
}

/// The signed unit of the protocol, encoded on the wire as
/// `[request_id, method, params, timestamp]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub request_id: u64,
    pub method: String,
    pub params: Params,
    /// ms since epoch, stamped at construction
    pub timestamp: u64,
}

impl Payload {
    pub fn new(request_id: u64, method: &str, params: Params) -> Self {
        Payload {
            request_id,
            method: method.to_string(),
            params,
            timestamp: create_timestamp(),
        }
    }

    pub fn error(request_id: u64, message: &str) -> Self {
        Payload::new(request_id, ERROR_METHOD, Params::from_error(message))
    }

    /// Canonical encoding, the bytes every signature covers.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| RpcError::Encode(err.to_string()))
    }

    /// Strict decoding of the 4 element array form.
    pub fn from_value(value: Value) -> Result<Payload> {
        let elements = match value {
            Value::Array(elements) => elements,
            other => {
                return Err(RpcError::Decode(format!(
                    "invalid payload: expected an array, got {}",
                    json_type_name(&other)
                )))
            }
        };
        if elements.len() != 4 {
            return Err(RpcError::PayloadArity(elements.len()));
        }
        let mut elements = elements.into_iter();

        let request_id = elements
            .next()
            .and_then(|value| value.as_u64())
            .ok_or(RpcError::PayloadElement {
                index: 0,
                name: "request id",
                reason: "must be an unsigned integer",
            })?;
        let method = match elements.next() {
            Some(Value::String(method)) => method,
            _ => {
                return Err(RpcError::PayloadElement {
                    index: 1,
                    name: "method",
                    reason: "must be a string",
                })
            }
        };
        let params = match elements.next() {
            Some(Value::Object(map)) => Params(map.into_iter().collect()),
            _ => {
                return Err(RpcError::PayloadElement {
                    index: 2,
                    name: "params",
                    reason: "must be an object",
                })
            }
        };
        let timestamp = elements
            .next()
            .and_then(|value| value.as_u64())
            .ok_or(RpcError::PayloadElement {
                index: 3,
                name: "timestamp",
                reason: "must be an unsigned integer",
            })?;

        Ok(Payload {
            request_id,
            method,
            params,
            timestamp,
        })
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(4)?;
        tuple.serialize_element(&self.request_id)?;
        tuple.serialize_element(&self.method)?;
        tuple.serialize_element(&self.params)?;
        tuple.serialize_element(&self.timestamp)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Payload::from_value(value).map_err(de::Error::custom)
    }
}

/// A signed call, `{"req": [...], "sig": [...]}`. More than one signature
/// when the method needs several co-signers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "req")]
    pub payload: Payload,
    #[serde(rename = "sig", default)]
    pub signatures: Vec<Signature>,
}

impl Request {
    pub fn new(payload: Payload, signatures: Vec<Signature>) -> Self {
        Request {
            payload,
            signatures,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Request> {
        serde_json::from_slice(bytes).map_err(|err| RpcError::Decode(err.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| RpcError::Encode(err.to_string()))
    }

    /// Addresses of every co-signer, in signature order.
    pub fn signers(&self) -> Result<Vec<String>> {
        let bytes = self.payload.to_bytes()?;
        self.signatures
            .iter()
            .map(|signature| recover_address(&bytes, signature))
            .collect()
    }
}

/// A signed reply or notification, `{"res": [...], "sig": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "res")]
    pub payload: Payload,
    #[serde(rename = "sig", default)]
    pub signatures: Vec<Signature>,
}

impl Response {
    pub fn new(payload: Payload, signatures: Vec<Signature>) -> Self {
        Response {
            payload,
            signatures,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Response> {
        serde_json::from_slice(bytes).map_err(|err| RpcError::Decode(err.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| RpcError::Encode(err.to_string()))
    }

    pub fn is_notification(&self) -> bool {
        self.payload.request_id == NOTIFICATION_REQUEST_ID
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::Keypair;
    use serde_json::json;

    #[test]
    fn payload_round_trip_test() {
        let before = create_timestamp();
        let params = Params::from_value(&json!({"asset": "usdc", "amount": "10"})).unwrap();
        let payload = Payload::new(42, "transfer", params.clone());

        let bytes = payload.to_bytes().unwrap();
        let decoded: Payload = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.method, "transfer");
        assert_eq!(decoded.params, params);
        assert!(decoded.timestamp >= before);
        assert!(decoded.timestamp <= create_timestamp());
    }

    #[test]
    fn payload_wire_shape_test() {
        let mut payload = Payload::new(7, "ping", Params::new());
        payload.timestamp = 1000;
        assert_eq!(
            String::from_utf8(payload.to_bytes().unwrap()).unwrap(),
            r#"[7,"ping",{},1000]"#
        );
    }

    #[test]
    fn payload_arity_test() {
        for value in [
            json!([]),
            json!([1, "ping", {}]),
            json!([1, "ping", {}, 5, 6]),
        ] {
            let len = value.as_array().unwrap().len();
            assert_eq!(Payload::from_value(value), Err(RpcError::PayloadArity(len)));
        }
        assert!(Payload::from_value(json!({"id": 1})).is_err());
    }

    #[test]
    fn payload_element_types_test() {
        let cases = vec![
            (json!(["1", "ping", {}, 5]), 0),
            (json!([-1, "ping", {}, 5]), 0),
            (json!([1, 2, {}, 5]), 1),
            (json!([1, "ping", [], 5]), 2),
            (json!([1, "ping", "{}", 5]), 2),
            (json!([1, "ping", {}, "5"]), 3),
        ];
        for (value, bad_index) in cases {
            match Payload::from_value(value) {
                Err(RpcError::PayloadElement { index, .. }) => assert_eq!(index, bad_index),
                other => panic!("expected element error, got {:?}", other),
            }
        }
        let err = serde_json::from_str::<Payload>(r#"[1, 2, {}, 5]"#).unwrap_err();
        assert!(err.to_string().contains("element 1"));
    }

    #[test]
    fn params_error_test() {
        assert_eq!(
            Params::from_error("boom").error(),
            Some(RpcError::Remote(String::from("boom")))
        );
        assert_eq!(Params::new().error(), None);
        let numeric = Params::new().with(ERROR_KEY, json!(12));
        assert_eq!(numeric.error(), None);
        let nested = Params::new().with(ERROR_KEY, json!({"message": "boom"}));
        assert_eq!(nested.error(), None);
    }

    #[test]
    fn params_translate_test() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Transfer {
            destination: String,
            amount: u64,
        }
        let params = Params::from_value(&json!({"destination": "0xabc", "amount": 5})).unwrap();
        let transfer: Transfer = params.translate().unwrap();
        assert_eq!(
            transfer,
            Transfer {
                destination: String::from("0xabc"),
                amount: 5
            }
        );

        let generic: BTreeMap<String, Value> = params.translate().unwrap();
        assert_eq!(generic.len(), 2);

        let wrong = Params::new().with("destination", json!(5));
        assert!(matches!(
            wrong.translate::<Transfer>(),
            Err(RpcError::Decode(_))
        ));
        assert!(Params::from_value(&json!([1, 2])).is_err());
        assert!(Params::from_value(&()).unwrap().is_empty());
    }

    #[test]
    fn request_envelope_test() {
        let keypair = Keypair::new();
        let cosigner = Keypair::new();
        let payload = Payload::new(3, "create_app_session", Params::new());
        let bytes = payload.to_bytes().unwrap();
        let request = Request::new(
            payload,
            vec![
                keypair.sign_message(&bytes).unwrap(),
                cosigner.sign_message(&bytes).unwrap(),
            ],
        );

        let wire: Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();
        assert!(wire["req"].is_array());
        assert!(wire["sig"][0].as_str().unwrap().starts_with("0x"));

        let decoded = Request::from_slice(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(
            decoded.signers().unwrap(),
            vec![keypair.address(), cosigner.address()]
        );
    }

    #[test]
    fn float_params_keep_their_signature_test() {
        use rand::Rng;
        let keypair = Keypair::new();
        let mut amounts = vec![0.1, 0.10004940000000001, 1e-7, 123456.789, f64::MAX];
        let mut rng = rand::thread_rng();
        amounts.extend((0..500).map(|_| rng.gen::<f64>() * 1000.0));

        for amount in amounts {
            let payload = Payload::new(9, "transfer", Params::new().with("amount", json!(amount)));
            let signature = keypair.sign_message(&payload.to_bytes().unwrap()).unwrap();
            let wire = Request::new(payload, vec![signature]).to_bytes().unwrap();

            let decoded = Request::from_slice(&wire).unwrap();
            assert_eq!(
                decoded.signers().unwrap(),
                vec![keypair.address()],
                "amount {}",
                amount
            );
        }
    }

    #[test]
    fn unsigned_request_test() {
        let request = Request::from_slice(br#"{"req":[1,"ping",{},5]}"#).unwrap();
        assert!(request.signatures.is_empty());
        assert!(Request::from_slice(br#"{"req":[1,"ping",{}]}"#).is_err());
    }
}
