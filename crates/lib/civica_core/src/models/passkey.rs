//! Passkey (WebAuthn public-key credential) records.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored passkey credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasskeyCredential {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Authenticator-assigned credential identifier (raw bytes, unique).
    pub credential_id: Vec<u8>,
    /// COSE-encoded public key, opaque to this crate.
    pub public_key: Vec<u8>,
    /// Last accepted signature counter.
    pub sign_count: u32,
    /// Transport hints reported at registration (`usb`, `nfc`, `ble`, `internal`, `hybrid`).
    pub transports: Vec<String>,
    pub nickname: Option<String>,
    /// Sticky: once a counter regression is seen this never goes back to `false`.
    pub cloned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl PasskeyCredential {
    /// Base64url form of the credential id, as WebAuthn clients exchange it.
    pub fn credential_id_b64(&self) -> String {
        encode_credential_id(&self.credential_id)
    }
}

/// Input to passkey registration.
#[derive(Debug, Clone)]
pub struct NewPasskey {
    pub owner_id: Uuid,
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    pub transports: Vec<String>,
    pub nickname: Option<String>,
}

/// Base64url (no padding) encoding used in logs and by WebAuthn clients.
pub fn encode_credential_id(id: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_id_encodes_url_safe_without_padding() {
        assert_eq!(encode_credential_id(&[0xfb, 0xff]), "-_8");
    }
}
