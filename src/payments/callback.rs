use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::ProviderStatus;
use crate::payments::momo::describe_reason;

pub const SIGNATURE_HEADER: &str = "X-Callback-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Body the provider posts to the callback URL once a collection settles.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomoCallback {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    pub status: ProviderStatus,
    #[serde(default)]
    pub financial_transaction_id: Option<String>,
    #[serde(default)]
    pub reason: Option<JsonValue>,
}

impl MomoCallback {
    /// Our reference for the payment. `externalId` is set from it when the
    /// collection is requested, so it wins over the provider's own field.
    pub fn reference(&self) -> Option<&str> {
        self.external_id
            .as_deref()
            .or(self.reference_id.as_deref())
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    pub fn reason_text(&self) -> Option<String> {
        self.reason.clone().map(describe_reason)
    }
}

/// Hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign(payload: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_signature(payload: &[u8], secret: &str, signature: &str) -> bool {
    let Some(expected) = sign(payload, secret) else {
        return false;
    };
    let given = signature.trim().to_ascii_lowercase();
    expected.len() == given.len() && bool::from(expected.as_bytes().ct_eq(given.as_bytes()))
}
