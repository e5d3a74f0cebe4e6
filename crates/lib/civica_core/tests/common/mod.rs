//! Shared fixtures: in-memory store and cache wired into a `SessionManager`.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civica_core::auth::AuthError;
use civica_core::auth::jwt::Hs256Signer;
use civica_core::auth::password::PasswordVerifier;
use civica_core::auth::session::SessionManager;
use civica_core::auth::tokens::TokenIssuer;
use civica_core::cache::memory::MemoryKvCache;
use civica_core::cache::{CacheError, CacheResult, KvCache, RevocationCache};
use civica_core::config::SessionConfig;
use civica_core::models::auth::{Audience, Identity, IdentityKind, RefreshTokenRecord, RoleGrant};
use civica_core::models::passkey::PasskeyCredential;
use civica_core::store::{CredentialStore, StoreError, StoreResult};
use civica_core::store::memory::MemoryCredentialStore;
use civica_core::uuid::uuidv7;
use uuid::Uuid;

pub const PASSWORD: &str = "correct horse battery staple";
pub const SECRET: &str = "test-secret";

/// Stored hashes look like `plain:<password>`; anything else is "malformed".
pub struct PlainVerifier;

impl PasswordVerifier for PlainVerifier {
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        hash.strip_prefix("plain:")
            .map(|expected| expected == password)
            .ok_or_else(|| AuthError::Internal("malformed password hash".into()))
    }

    fn dummy_hash(&self) -> &str {
        "plain:\u{0}never-a-password"
    }
}

/// `PlainVerifier` that counts every comparison it performs.
#[derive(Default)]
pub struct CountingVerifier {
    pub calls: AtomicUsize,
}

impl CountingVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PasswordVerifier for CountingVerifier {
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PlainVerifier.verify(password, hash)
    }

    fn dummy_hash(&self) -> &str {
        PlainVerifier.dummy_hash()
    }
}

/// Memory store whose refresh-token operations fail while `down` is set.
pub struct OutageStore {
    pub inner: Arc<MemoryCredentialStore>,
    pub down: AtomicBool,
}

impl OutageStore {
    pub fn new(inner: Arc<MemoryCredentialStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Db(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for OutageStore {
    async fn get_identity_by_email(
        &self,
        kind: IdentityKind,
        email: &str,
    ) -> StoreResult<Option<Identity>> {
        self.inner.get_identity_by_email(kind, email).await
    }

    async fn get_identity_by_id(&self, kind: IdentityKind, id: Uuid) -> StoreResult<Option<Identity>> {
        self.inner.get_identity_by_id(kind, id).await
    }

    async fn update_profile(
        &self,
        kind: IdentityKind,
        id: Uuid,
        name: &str,
        email: &str,
    ) -> StoreResult<Identity> {
        self.inner.update_profile(kind, id, name, email).await
    }

    async fn list_role_grants(&self, staff_id: Uuid) -> StoreResult<Vec<RoleGrant>> {
        self.inner.list_role_grants(staff_id).await
    }

    async fn has_teaching_assignment(&self, staff_id: Uuid) -> StoreResult<bool> {
        self.inner.has_teaching_assignment(staff_id).await
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.insert_refresh_token(record).await
    }

    async fn insert_exclusive_refresh_token(
        &self,
        record: &RefreshTokenRecord,
    ) -> StoreResult<Vec<String>> {
        self.check()?;
        self.inner.insert_exclusive_refresh_token(record).await
    }

    async fn get_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        self.check()?;
        self.inner.get_refresh_token_by_hash(token_hash).await
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.revoke_refresh_token(token_hash).await
    }

    async fn invalidate_other_refresh_tokens(
        &self,
        subject_id: Uuid,
        audience: Audience,
        except_hash: &str,
    ) -> StoreResult<Vec<String>> {
        self.check()?;
        self.inner
            .invalidate_other_refresh_tokens(subject_id, audience, except_hash)
            .await
    }

    async fn revoke_all_refresh_tokens(
        &self,
        subject_id: Uuid,
        audience: Audience,
    ) -> StoreResult<Vec<String>> {
        self.check()?;
        self.inner.revoke_all_refresh_tokens(subject_id, audience).await
    }

    async fn purge_expired_refresh_tokens(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.check()?;
        self.inner.purge_expired_refresh_tokens(cutoff).await
    }

    async fn insert_passkey(&self, credential: &PasskeyCredential) -> StoreResult<()> {
        self.inner.insert_passkey(credential).await
    }

    async fn get_passkey(&self, credential_id: &[u8]) -> StoreResult<Option<PasskeyCredential>> {
        self.inner.get_passkey(credential_id).await
    }

    async fn list_passkeys(&self, owner_id: Uuid) -> StoreResult<Vec<PasskeyCredential>> {
        self.inner.list_passkeys(owner_id).await
    }

    async fn compare_and_set_passkey_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        sign_count: u32,
        cloned: bool,
        used_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PasskeyCredential>> {
        self.inner
            .compare_and_set_passkey_counter(credential_id, expected, sign_count, cloned, used_at)
            .await
    }

    async fn rename_passkey(
        &self,
        owner_id: Uuid,
        credential_id: &[u8],
        nickname: Option<&str>,
    ) -> StoreResult<Option<PasskeyCredential>> {
        self.inner.rename_passkey(owner_id, credential_id, nickname).await
    }

    async fn delete_passkey(&self, owner_id: Uuid, credential_id: &[u8]) -> StoreResult<bool> {
        self.inner.delete_passkey(owner_id, credential_id).await
    }

    fn backend_name(&self) -> &'static str {
        "outage"
    }
}

/// Cache backend that is always down.
pub struct DownCache;

#[async_trait]
impl KvCache for DownCache {
    async fn set(&self, _key: &str, _value: &str, _ttl: std::time::Duration) -> CacheResult<()> {
        Err(CacheError::Connection("connection refused".into()))
    }

    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Connection("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::Connection("connection refused".into()))
    }

    fn backend_name(&self) -> &'static str {
        "down"
    }
}

pub struct Harness {
    pub store: Arc<MemoryCredentialStore>,
    pub kv: Arc<MemoryKvCache>,
    pub sessions: SessionManager,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryCredentialStore::new());
    let kv = Arc::new(MemoryKvCache::new());
    let sessions = manager(store.clone(), kv.clone());
    Harness {
        store,
        kv,
        sessions,
    }
}

pub fn manager(store: Arc<dyn CredentialStore>, kv: Arc<dyn KvCache>) -> SessionManager {
    manager_with(store, kv, Arc::new(PlainVerifier))
}

pub fn manager_with(
    store: Arc<dyn CredentialStore>,
    kv: Arc<dyn KvCache>,
    passwords: Arc<dyn PasswordVerifier>,
) -> SessionManager {
    let config = SessionConfig::with_secret(SECRET);
    let signer = Hs256Signer::new(SECRET.as_bytes(), config.issuer.clone()).expect("signer");
    let issuer = TokenIssuer::new(Arc::new(signer), config.issuer.clone(), config.access_ttl);
    SessionManager::new(
        store,
        RevocationCache::new(kv),
        issuer,
        passwords,
        config,
    )
}

pub fn identity(kind: IdentityKind, email: &str) -> Identity {
    Identity {
        id: uuidv7(),
        kind,
        name: "Maria da Silva".to_string(),
        email: email.to_string(),
        password_hash: Some(format!("plain:{PASSWORD}")),
        active: true,
        created_at: Utc::now(),
    }
}

/// Provision a staff member holding `roles` in one secretaria.
pub async fn staff(store: &MemoryCredentialStore, email: &str, roles: &[&str]) -> Uuid {
    let staff = identity(IdentityKind::Staff, email);
    let id = staff.id;
    store.insert_identity(staff).await.expect("insert staff");
    let secretaria = uuidv7();
    for role in roles {
        store.grant_role(id, secretaria, role).await;
    }
    id
}

pub async fn citizen(store: &MemoryCredentialStore, email: &str) -> Uuid {
    let citizen = identity(IdentityKind::Citizen, email);
    let id = citizen.id;
    store.insert_identity(citizen).await.expect("insert citizen");
    id
}
