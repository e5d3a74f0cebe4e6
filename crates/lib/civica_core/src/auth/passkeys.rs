//! Passkey credential management and signature-counter clone detection.
//!
//! Ceremony cryptography (challenge/response verification) is done by the
//! caller; this module persists credentials and owns the counter policy.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::AuthError;
use crate::context::RequestContext;
use crate::models::passkey::{NewPasskey, PasskeyCredential, encode_credential_id};
use crate::store::CredentialStore;
use crate::uuid::uuidv7;

/// Attempts at the counter compare-and-set before giving up under contention.
const COUNTER_CAS_ATTEMPTS: usize = 5;

/// Longest accepted nickname, in characters.
const MAX_NICKNAME_LEN: usize = 64;

/// What a presented counter means relative to the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterCheck {
    /// Strictly greater: accept and store.
    Advanced,
    /// Equal or lower: the authenticator may have been cloned.
    Regressed,
}

/// Counter policy: genuine authenticators strictly increase on every use.
pub fn check_counter(stored: u32, presented: u32) -> CounterCheck {
    if presented > stored {
        CounterCheck::Advanced
    } else {
        CounterCheck::Regressed
    }
}

#[derive(Clone)]
pub struct PasskeyManager {
    store: Arc<dyn CredentialStore>,
}

impl PasskeyManager {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Persist a credential produced by a verified registration ceremony.
    pub async fn register(
        &self,
        ctx: &RequestContext,
        new: NewPasskey,
    ) -> Result<PasskeyCredential, AuthError> {
        if new.credential_id.is_empty() {
            return Err(AuthError::Validation("credential id must not be empty".into()));
        }
        if new.public_key.is_empty() {
            return Err(AuthError::Validation("public key must not be empty".into()));
        }
        let nickname = normalize_nickname(new.nickname.as_deref())?;

        let now = Utc::now();
        let credential = PasskeyCredential {
            id: uuidv7(),
            owner_id: new.owner_id,
            credential_id: new.credential_id,
            public_key: new.public_key,
            sign_count: new.sign_count,
            transports: new.transports,
            nickname,
            cloned: false,
            created_at: now,
            updated_at: now,
            last_used_at: None,
        };
        ctx.run(self.store.insert_passkey(&credential)).await??;

        info!(
            owner_id = %credential.owner_id,
            credential = %credential.credential_id_b64(),
            "passkey registered"
        );
        Ok(credential)
    }

    pub async fn find_by_credential_id(
        &self,
        ctx: &RequestContext,
        credential_id: &[u8],
    ) -> Result<PasskeyCredential, AuthError> {
        ctx.run(self.store.get_passkey(credential_id))
            .await??
            .ok_or_else(|| AuthError::NotFound("passkey credential".into()))
    }

    pub async fn list_for_owner(
        &self,
        ctx: &RequestContext,
        owner_id: Uuid,
    ) -> Result<Vec<PasskeyCredential>, AuthError> {
        Ok(ctx.run(self.store.list_passkeys(owner_id)).await??)
    }

    /// Record the counter from a verified assertion.
    ///
    /// A regression persists `cloned = true` (leaving the stored counter as it
    /// was) and returns [`AuthError::ClonedCredential`]; rejecting the login is
    /// the ceremony handler's decision. An advance stores the new counter and
    /// keeps any earlier `cloned` mark.
    pub async fn update_counter(
        &self,
        ctx: &RequestContext,
        credential_id: &[u8],
        presented: u32,
    ) -> Result<PasskeyCredential, AuthError> {
        for _ in 0..COUNTER_CAS_ATTEMPTS {
            let current = self.find_by_credential_id(ctx, credential_id).await?;
            let check = check_counter(current.sign_count, presented);
            let (sign_count, cloned, used_at) = match check {
                CounterCheck::Advanced => (presented, false, Some(Utc::now())),
                CounterCheck::Regressed => (current.sign_count, true, None),
            };

            let updated = ctx
                .run(self.store.compare_and_set_passkey_counter(
                    credential_id,
                    current.sign_count,
                    sign_count,
                    cloned,
                    used_at,
                ))
                .await??;

            match (updated, check) {
                (Some(cred), CounterCheck::Advanced) => return Ok(cred),
                (Some(cred), CounterCheck::Regressed) => {
                    warn!(
                        owner_id = %cred.owner_id,
                        credential = %cred.credential_id_b64(),
                        stored = current.sign_count,
                        presented,
                        "passkey counter regression, credential marked cloned"
                    );
                    return Err(AuthError::ClonedCredential);
                }
                // Counter moved between read and write; re-evaluate against the new value.
                (None, _) => continue,
            }
        }
        Err(AuthError::Conflict(format!(
            "passkey {} counter update contended",
            encode_credential_id(credential_id)
        )))
    }

    pub async fn rename(
        &self,
        ctx: &RequestContext,
        owner_id: Uuid,
        credential_id: &[u8],
        nickname: Option<&str>,
    ) -> Result<PasskeyCredential, AuthError> {
        let nickname = normalize_nickname(nickname)?;
        ctx.run(
            self.store
                .rename_passkey(owner_id, credential_id, nickname.as_deref()),
        )
        .await??
        .ok_or_else(|| AuthError::NotFound("passkey credential".into()))
    }

    /// Delete a credential owned by `owner_id`. Returns whether anything was removed.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        owner_id: Uuid,
        credential_id: &[u8],
    ) -> Result<bool, AuthError> {
        let removed = ctx
            .run(self.store.delete_passkey(owner_id, credential_id))
            .await??;
        if removed {
            info!(%owner_id, credential = %encode_credential_id(credential_id), "passkey deleted");
        }
        Ok(removed)
    }
}

fn normalize_nickname(nickname: Option<&str>) -> Result<Option<String>, AuthError> {
    let Some(trimmed) = nickname.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_NICKNAME_LEN {
        return Err(AuthError::Validation(format!(
            "nickname longer than {MAX_NICKNAME_LEN} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}
