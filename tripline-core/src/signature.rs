//! Gateway signature codec.
//!
//! Both directions sign a canonical `key=value&key=value` string built from
//! key-sorted fields with HMAC-SHA256 over the shared checksum key. Outbound
//! payment-link requests sign exactly five fields; inbound webhooks sign the
//! whole `data` object, where nested arrays/objects are JSON-encoded with their
//! own keys sorted.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::{CoreError, CoreResult};

type HmacSha256 = Hmac<Sha256>;

/// The five fields an outbound payment-link request commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLinkFields {
    pub amount: i64,
    pub order_code: i64,
    pub description: String,
    pub return_url: String,
    pub cancel_url: String,
}

impl PaymentLinkFields {
    fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("amount".into(), Value::from(self.amount));
        map.insert("cancelUrl".into(), Value::from(self.cancel_url.as_str()));
        map.insert("description".into(), Value::from(self.description.as_str()));
        map.insert("orderCode".into(), Value::from(self.order_code));
        map.insert("returnUrl".into(), Value::from(self.return_url.as_str()));
        map
    }
}

/// Result of checking an inbound webhook. `data` is returned whatever the
/// outcome so callers can log mismatches; it must not be acted on unless `ok`.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub ok: bool,
    pub data: Value,
}

/// Sign an outbound payment-link request. Returns the lowercase hex digest.
pub fn sign(fields: &PaymentLinkFields, secret: &str) -> CoreResult<String> {
    sign_data(&fields.to_map(), secret)
}

/// Sign an arbitrary `data` object the way the gateway signs webhooks.
pub fn sign_data(data: &Map<String, Value>, secret: &str) -> CoreResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::SignatureError(e.to_string()))?;
    mac.update(canonical_string(data).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook body of the form `{"data": {...}, "signature": "..."}`.
/// The legacy `sig` key is accepted when `signature` is absent.
pub fn verify(payload: &Value, secret: &str) -> Verification {
    let data = payload.get("data").cloned().unwrap_or(Value::Null);

    let provided = payload
        .get("signature")
        .or_else(|| payload.get("sig"))
        .and_then(Value::as_str);

    let ok = match (data.as_object(), provided) {
        (Some(fields), Some(signature)) => verify_data(fields, signature, secret),
        _ => false,
    };

    Verification { ok, data }
}

/// Constant-time check of `signature` against the HMAC of `data`.
pub fn verify_data(data: &Map<String, Value>, signature: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical_string(data).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// `key=value` pairs joined by `&`, keys in byte order.
pub fn canonical_string(data: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort();

    keys.into_iter()
        .map(|key| format!("{}={}", key, stringify(&data[key.as_str()])))
        .collect::<Vec<_>>()
        .join("&")
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        // serde_json never escapes non-ASCII or '/', which is what the gateway expects
        Value::Array(_) | Value::Object(_) => sort_keys(value).to_string(),
    }
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
