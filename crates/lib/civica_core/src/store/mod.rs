//! Durable credential store.
//!
//! [`CredentialStore`] is the capability interface the session and passkey
//! managers depend on. It lists exactly the persistence operations they need,
//! so the core never touches backend-specific types. Two backends ship:
//! [`postgres::PgCredentialStore`] for production and
//! [`memory::MemoryCredentialStore`] for tests and local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{Audience, Identity, IdentityKind, RefreshTokenRecord, RoleGrant};
use crate::models::passkey::PasskeyCredential;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    // -- identities ---------------------------------------------------------

    /// Look up an identity by (already normalized) email.
    async fn get_identity_by_email(
        &self,
        kind: IdentityKind,
        email: &str,
    ) -> StoreResult<Option<Identity>>;

    async fn get_identity_by_id(&self, kind: IdentityKind, id: Uuid)
    -> StoreResult<Option<Identity>>;

    /// Update display name and email. Fails with `NotFound` for unknown ids and
    /// `Conflict` when the email belongs to another identity of the same kind.
    async fn update_profile(
        &self,
        kind: IdentityKind,
        id: Uuid,
        name: &str,
        email: &str,
    ) -> StoreResult<Identity>;

    // -- role inputs ----------------------------------------------------------

    async fn list_role_grants(&self, staff_id: Uuid) -> StoreResult<Vec<RoleGrant>>;

    async fn has_teaching_assignment(&self, staff_id: Uuid) -> StoreResult<bool>;

    // -- refresh tokens -------------------------------------------------------

    /// Insert a new record. Fails with `Conflict` if the hash already exists.
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()>;

    /// Insert `record` and revoke every other non-revoked record for the same
    /// (subject, audience) as one atomic unit. Returns the hashes that were revoked.
    ///
    /// The default runs the two steps back to back; durable backends override it
    /// with a single transaction.
    async fn insert_exclusive_refresh_token(
        &self,
        record: &RefreshTokenRecord,
    ) -> StoreResult<Vec<String>> {
        self.insert_refresh_token(record).await?;
        self.invalidate_other_refresh_tokens(record.subject_id, record.audience, &record.token_hash)
            .await
    }

    async fn get_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Flip `revoked` from false to true. Returns `true` only for the caller
    /// that performed the transition; an absent or already revoked record
    /// yields `false`.
    async fn revoke_refresh_token(&self, token_hash: &str) -> StoreResult<bool>;

    /// Revoke every non-revoked record for (subject, audience) except `except_hash`.
    /// Returns the revoked hashes.
    async fn invalidate_other_refresh_tokens(
        &self,
        subject_id: Uuid,
        audience: Audience,
        except_hash: &str,
    ) -> StoreResult<Vec<String>>;

    /// Revoke every non-revoked record for (subject, audience). Returns the revoked hashes.
    async fn revoke_all_refresh_tokens(
        &self,
        subject_id: Uuid,
        audience: Audience,
    ) -> StoreResult<Vec<String>>;

    /// Delete records that expired before `cutoff`. Returns the number deleted.
    async fn purge_expired_refresh_tokens(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    // -- passkeys -------------------------------------------------------------

    /// Fails with `Conflict` if the credential id is already registered.
    async fn insert_passkey(&self, credential: &PasskeyCredential) -> StoreResult<()>;

    async fn get_passkey(&self, credential_id: &[u8]) -> StoreResult<Option<PasskeyCredential>>;

    async fn list_passkeys(&self, owner_id: Uuid) -> StoreResult<Vec<PasskeyCredential>>;

    /// Compare-and-set the signature counter.
    ///
    /// Applies only if the stored counter still equals `expected`; then stores
    /// `sign_count`, ORs `cloned` into the stored flag, and stamps
    /// `last_used_at` when `used_at` is given. Returns `None` when the
    /// credential is missing or the counter moved underneath the caller.
    async fn compare_and_set_passkey_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        sign_count: u32,
        cloned: bool,
        used_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PasskeyCredential>>;

    /// Set or clear the nickname of a credential owned by `owner_id`.
    async fn rename_passkey(
        &self,
        owner_id: Uuid,
        credential_id: &[u8],
        nickname: Option<&str>,
    ) -> StoreResult<Option<PasskeyCredential>>;

    /// Delete a credential owned by `owner_id`. Returns whether a row was removed.
    async fn delete_passkey(&self, owner_id: Uuid, credential_id: &[u8]) -> StoreResult<bool>;

    fn backend_name(&self) -> &'static str;
}
