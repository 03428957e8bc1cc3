//! Gateway message authentication.
//!
//! Every signed message exchanged with the gateway is an ordered list of
//! fields, rendered in canonical string form, joined with `;` and
//! authenticated with HMAC-MD5 under the merchant secret (lowercase hex).

use hmac::{Hmac, Mac};
use md5::Md5;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacMd5 = Hmac<Md5>;

pub const FIELD_DELIMITER: &str = ";";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid merchant key: {0}")]
    InvalidKey(String),
}

/// One field of a signed message, already in canonical string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureField(String);

impl SignatureField {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical text of a JSON scalar: strings verbatim, integral numbers
    /// without a fractional part, `null` as empty.
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self(canonical_json(value))
    }
}

impl From<&str> for SignatureField {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SignatureField {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&String> for SignatureField {
    fn from(value: &String) -> Self {
        Self(value.clone())
    }
}

impl From<Decimal> for SignatureField {
    fn from(value: Decimal) -> Self {
        Self(value.normalize().to_string())
    }
}

impl From<i64> for SignatureField {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<u32> for SignatureField {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

pub fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;

    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
                    Some(f) => f.to_string(),
                    None => n.to_string(),
                }
            }
        }
        other => other.to_string(),
    }
}

/// Field order of the inbound service-callback signature.
///
/// Exactly one scheme is active per deployment; it is part of the integration
/// contract with the gateway and is never guessed at verification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CallbackSignatureScheme {
    /// `merchantAccount;orderReference;amount;currency;authCode;cardPan;transactionStatus;reasonCode`
    #[default]
    #[serde(rename = "wayforpay-v1")]
    WayForPayV1,
    /// `orderReference;transactionStatus;processingDate`
    #[serde(rename = "reference-status-date")]
    ReferenceStatusDate,
}

impl CallbackSignatureScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackSignatureScheme::WayForPayV1 => "wayforpay-v1",
            CallbackSignatureScheme::ReferenceStatusDate => "reference-status-date",
        }
    }

    /// Names of the notification fields covered by the signature, in order.
    pub fn field_names(&self) -> &'static [&'static str] {
        match self {
            CallbackSignatureScheme::WayForPayV1 => &[
                "merchantAccount",
                "orderReference",
                "amount",
                "currency",
                "authCode",
                "cardPan",
                "transactionStatus",
                "reasonCode",
            ],
            CallbackSignatureScheme::ReferenceStatusDate => {
                &["orderReference", "transactionStatus", "processingDate"]
            }
        }
    }

    /// Collect the signed fields from a notification. Absent fields sign as empty.
    pub fn signed_fields<'a, F>(&self, lookup: F) -> Vec<SignatureField>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        self.field_names()
            .iter()
            .map(|name| SignatureField::from(lookup(name).unwrap_or_default()))
            .collect()
    }
}

impl fmt::Display for CallbackSignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackSignatureScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "wayforpay-v1" => Ok(CallbackSignatureScheme::WayForPayV1),
            "reference-status-date" => Ok(CallbackSignatureScheme::ReferenceStatusDate),
            other => Err(format!(
                "unknown callback signature scheme '{}' (expected wayforpay-v1 or reference-status-date)",
                other
            )),
        }
    }
}

#[derive(Clone)]
pub struct SignatureEngine {
    secret: Secret<String>,
}

impl SignatureEngine {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    /// The exact string that gets authenticated.
    pub fn message(fields: &[SignatureField]) -> String {
        fields
            .iter()
            .map(SignatureField::as_str)
            .collect::<Vec<_>>()
            .join(FIELD_DELIMITER)
    }

    pub fn sign(&self, fields: &[SignatureField]) -> Result<String, SignatureError> {
        let mut mac = HmacMd5::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        mac.update(Self::message(fields).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex digest received from the gateway.
    pub fn verify(&self, fields: &[SignatureField], candidate: &str) -> Result<bool, SignatureError> {
        let expected = self.sign(fields)?;
        let candidate = candidate.trim().to_ascii_lowercase();

        if expected.len() != candidate.len() {
            return Ok(false);
        }

        Ok(expected.as_bytes().ct_eq(candidate.as_bytes()).into())
    }
}
