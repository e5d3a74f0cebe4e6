//! In-memory implementation of [`CredentialStore`].
//!
//! All state lives behind a single `tokio::sync::RwLock`, so every operation,
//! including the multi-record ones, is atomic with respect to the others.
//! Not durable: state is lost on drop. Used by the test-suite and for local
//! runs without Postgres. Provisioning helpers (`insert_identity`,
//! `grant_role`, ...) stand in for the external administration tooling.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CredentialStore, StoreError, StoreResult};
use crate::models::auth::{Audience, Identity, IdentityKind, RefreshTokenRecord, RoleGrant};
use crate::models::passkey::PasskeyCredential;

#[derive(Debug, Default)]
struct Inner {
    staff: HashMap<Uuid, Identity>,
    citizens: HashMap<Uuid, Identity>,
    grants: Vec<RoleGrant>,
    teaching: HashSet<Uuid>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    passkeys: HashMap<Vec<u8>, PasskeyCredential>,
}

impl Inner {
    fn identities(&self, kind: IdentityKind) -> &HashMap<Uuid, Identity> {
        match kind {
            IdentityKind::Staff => &self.staff,
            IdentityKind::Citizen => &self.citizens,
        }
    }

    fn identities_mut(&mut self, kind: IdentityKind) -> &mut HashMap<Uuid, Identity> {
        match kind {
            IdentityKind::Staff => &mut self.staff,
            IdentityKind::Citizen => &mut self.citizens,
        }
    }

    fn revoke_where(&mut self, pred: impl Fn(&RefreshTokenRecord) -> bool) -> Vec<String> {
        let mut revoked = Vec::new();
        for record in self.refresh_tokens.values_mut() {
            if !record.revoked && pred(record) {
                record.revoked = true;
                revoked.push(record.token_hash.clone());
            }
        }
        revoked
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Inner>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision an identity. Fails with `Conflict` on a duplicate email within the kind.
    pub async fn insert_identity(&self, identity: Identity) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let table = inner.identities_mut(identity.kind);
        if table
            .values()
            .any(|i| i.id != identity.id && i.email == identity.email)
        {
            return Err(StoreError::Conflict(format!(
                "email '{}' already registered",
                identity.email
            )));
        }
        table.insert(identity.id, identity);
        Ok(())
    }

    pub async fn set_active(&self, kind: IdentityKind, id: Uuid, active: bool) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let identity = inner
            .identities_mut(kind)
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("identity {id}")))?;
        identity.active = active;
        Ok(())
    }

    pub async fn grant_role(&self, staff_id: Uuid, secretaria_id: Uuid, role: &str) {
        self.inner.write().await.grants.push(RoleGrant {
            staff_id,
            secretaria_id,
            role: role.to_string(),
        });
    }

    pub async fn revoke_grants(&self, staff_id: Uuid) {
        self.inner
            .write()
            .await
            .grants
            .retain(|g| g.staff_id != staff_id);
    }

    pub async fn assign_teaching(&self, staff_id: Uuid) {
        self.inner.write().await.teaching.insert(staff_id);
    }

    /// All refresh records for (subject, audience), oldest first.
    pub async fn refresh_tokens_for(
        &self,
        subject_id: Uuid,
        audience: Audience,
    ) -> Vec<RefreshTokenRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner
            .refresh_tokens
            .values()
            .filter(|r| r.subject_id == subject_id && r.audience == audience)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_identity_by_email(
        &self,
        kind: IdentityKind,
        email: &str,
    ) -> StoreResult<Option<Identity>> {
        let inner = self.inner.read().await;
        Ok(inner
            .identities(kind)
            .values()
            .find(|i| i.email == email)
            .cloned())
    }

    async fn get_identity_by_id(
        &self,
        kind: IdentityKind,
        id: Uuid,
    ) -> StoreResult<Option<Identity>> {
        Ok(self.inner.read().await.identities(kind).get(&id).cloned())
    }

    async fn update_profile(
        &self,
        kind: IdentityKind,
        id: Uuid,
        name: &str,
        email: &str,
    ) -> StoreResult<Identity> {
        let mut inner = self.inner.write().await;
        let table = inner.identities_mut(kind);
        if table.values().any(|i| i.id != id && i.email == email) {
            return Err(StoreError::Conflict(format!(
                "email '{email}' already registered"
            )));
        }
        let identity = table
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("identity {id}")))?;
        identity.name = name.to_string();
        identity.email = email.to_string();
        Ok(identity.clone())
    }

    async fn list_role_grants(&self, staff_id: Uuid) -> StoreResult<Vec<RoleGrant>> {
        let inner = self.inner.read().await;
        Ok(inner
            .grants
            .iter()
            .filter(|g| g.staff_id == staff_id)
            .cloned()
            .collect())
    }

    async fn has_teaching_assignment(&self, staff_id: Uuid) -> StoreResult<bool> {
        Ok(self.inner.read().await.teaching.contains(&staff_id))
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.refresh_tokens.contains_key(&record.token_hash) {
            return Err(StoreError::Conflict("refresh token hash already exists".into()));
        }
        inner
            .refresh_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn insert_exclusive_refresh_token(
        &self,
        record: &RefreshTokenRecord,
    ) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.write().await;
        if inner.refresh_tokens.contains_key(&record.token_hash) {
            return Err(StoreError::Conflict("refresh token hash already exists".into()));
        }
        let revoked = inner.revoke_where(|r| {
            r.subject_id == record.subject_id && r.audience == record.audience
        });
        inner
            .refresh_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(revoked)
    }

    async fn get_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(self.inner.read().await.refresh_tokens.get(token_hash).cloned())
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.refresh_tokens.get_mut(token_hash) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_other_refresh_tokens(
        &self,
        subject_id: Uuid,
        audience: Audience,
        except_hash: &str,
    ) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.write().await;
        Ok(inner.revoke_where(|r| {
            r.subject_id == subject_id && r.audience == audience && r.token_hash != except_hash
        }))
    }

    async fn revoke_all_refresh_tokens(
        &self,
        subject_id: Uuid,
        audience: Audience,
    ) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.write().await;
        Ok(inner.revoke_where(|r| r.subject_id == subject_id && r.audience == audience))
    }

    async fn purge_expired_refresh_tokens(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.refresh_tokens.len();
        inner.refresh_tokens.retain(|_, r| r.expires_at >= cutoff);
        Ok((before - inner.refresh_tokens.len()) as u64)
    }

    async fn insert_passkey(&self, credential: &PasskeyCredential) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.passkeys.contains_key(&credential.credential_id) {
            return Err(StoreError::Conflict(format!(
                "passkey {} already registered",
                credential.credential_id_b64()
            )));
        }
        inner
            .passkeys
            .insert(credential.credential_id.clone(), credential.clone());
        Ok(())
    }

    async fn get_passkey(&self, credential_id: &[u8]) -> StoreResult<Option<PasskeyCredential>> {
        Ok(self.inner.read().await.passkeys.get(credential_id).cloned())
    }

    async fn list_passkeys(&self, owner_id: Uuid) -> StoreResult<Vec<PasskeyCredential>> {
        let inner = self.inner.read().await;
        let mut creds: Vec<_> = inner
            .passkeys
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        creds.sort_by_key(|c| c.created_at);
        Ok(creds)
    }

    async fn compare_and_set_passkey_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        sign_count: u32,
        cloned: bool,
        used_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PasskeyCredential>> {
        let mut inner = self.inner.write().await;
        let Some(cred) = inner.passkeys.get_mut(credential_id) else {
            return Ok(None);
        };
        if cred.sign_count != expected {
            return Ok(None);
        }
        cred.sign_count = sign_count;
        cred.cloned |= cloned;
        cred.updated_at = Utc::now();
        if used_at.is_some() {
            cred.last_used_at = used_at;
        }
        Ok(Some(cred.clone()))
    }

    async fn rename_passkey(
        &self,
        owner_id: Uuid,
        credential_id: &[u8],
        nickname: Option<&str>,
    ) -> StoreResult<Option<PasskeyCredential>> {
        let mut inner = self.inner.write().await;
        match inner.passkeys.get_mut(credential_id) {
            Some(cred) if cred.owner_id == owner_id => {
                cred.nickname = nickname.map(str::to_string);
                cred.updated_at = Utc::now();
                Ok(Some(cred.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_passkey(&self, owner_id: Uuid, credential_id: &[u8]) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let owned = inner
            .passkeys
            .get(credential_id)
            .is_some_and(|c| c.owner_id == owner_id);
        if owned {
            inner.passkeys.remove(credential_id);
        }
        Ok(owned)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
