//! Session lifecycle — login, refresh rotation, logout.
//!
//! Refresh records move ISSUED → ACTIVE → ROTATED | REVOKED | EXPIRED. The
//! durable store is the authority; the revocation cache mirrors "active" and
//! doubles as the race gate for rotation:
//!
//! 1. read-only checks (record, revoked, expiry, audience, cache marker,
//!    identity, roles);
//! 2. atomically consume the cache marker; only one concurrent caller can;
//! 3. persist the new record;
//! 4. revoke the old record with a `revoked = false` conditional update;
//!    losing that update means a concurrent logout won, so the new record is
//!    revoked again;
//! 5. mark the new hash active in the cache.
//!
//! A crash or cancellation anywhere after step 2 leaves the old token dead and
//! at worst an orphaned new record that nobody holds and that expires on its own.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::jwt::Hs256Signer;
use super::password::{BcryptVerifier, PasswordVerifier};
use super::roles::RoleResolver;
use super::tokens::{TokenIssuer, hash_token};
use super::{AuthError, hash_prefix};
use crate::cache::{KvCache, RevocationCache};
use crate::config::SessionConfig;
use crate::context::RequestContext;
use crate::models::auth::{
    AccessClaims, Audience, Identity, IssuedSession, LoginCredentials, Profile,
    RefreshTokenRecord, Role,
};
use crate::store::CredentialStore;
use crate::uuid::uuidv7;

/// Orchestrates token issuance, rotation and revocation for both audiences.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    cache: RevocationCache,
    issuer: TokenIssuer,
    passwords: Arc<dyn PasswordVerifier>,
    roles: RoleResolver,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: RevocationCache,
        issuer: TokenIssuer,
        passwords: Arc<dyn PasswordVerifier>,
        config: SessionConfig,
    ) -> Self {
        let roles = RoleResolver::new(Arc::clone(&store));
        debug!(
            store = store.backend_name(),
            cache = cache.backend_name(),
            "session manager ready"
        );
        Self {
            store,
            cache,
            issuer,
            passwords,
            roles,
            config,
        }
    }

    /// Wire up the shipped primitives: HS256 signing and bcrypt verification.
    pub fn from_config(
        store: Arc<dyn CredentialStore>,
        kv: Arc<dyn KvCache>,
        config: SessionConfig,
    ) -> Result<Self, AuthError> {
        let signer = Hs256Signer::new(config.jwt_secret.as_bytes(), config.issuer.clone())?;
        let issuer = TokenIssuer::new(Arc::new(signer), config.issuer.clone(), config.access_ttl);
        Ok(Self::new(
            store,
            RevocationCache::new(kv),
            issuer,
            Arc::new(BcryptVerifier),
            config,
        ))
    }

    /// Authenticate with email + password and start a new session chain,
    /// invalidating every other live refresh token of the same subject and audience.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        credentials: &LoginCredentials,
    ) -> Result<IssuedSession, AuthError> {
        self.login_inner(ctx, audience, credentials)
            .await
            .inspect_err(|e| log_internal("login", audience, e))
    }

    /// Exchange a refresh token for a new token pair. Each raw token works once.
    pub async fn refresh(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        raw_token: &str,
    ) -> Result<IssuedSession, AuthError> {
        self.refresh_inner(ctx, audience, raw_token)
            .await
            .inspect_err(|e| log_internal("refresh", audience, e))
    }

    /// Revoke one refresh token. Idempotent: unknown or already revoked tokens succeed.
    pub async fn logout(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        raw_token: &str,
    ) -> Result<(), AuthError> {
        self.logout_inner(ctx, audience, raw_token)
            .await
            .inspect_err(|e| log_internal("logout", audience, e))
    }

    /// Revoke every live session of `subject` under `audience`. Returns how many were revoked.
    pub async fn logout_all(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        subject: Uuid,
    ) -> Result<usize, AuthError> {
        self.logout_all_inner(ctx, audience, subject)
            .await
            .inspect_err(|e| log_internal("logout_all", audience, e))
    }

    /// Current profile and freshly derived roles.
    pub async fn get_profile(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        subject: Uuid,
    ) -> Result<(Profile, Vec<Role>), AuthError> {
        self.get_profile_inner(ctx, audience, subject)
            .await
            .inspect_err(|e| log_internal("get_profile", audience, e))
    }

    /// Change display name and email.
    pub async fn update_profile(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        subject: Uuid,
        name: &str,
        email: &str,
    ) -> Result<Profile, AuthError> {
        let name = name.trim();
        let email = normalize_email(email);
        if name.is_empty() {
            return Err(AuthError::Validation("name must not be empty".into()));
        }
        if !is_plausible_email(&email) {
            return Err(AuthError::Validation("invalid email".into()));
        }
        ctx.run(
            self.store
                .update_profile(audience.identity_kind(), subject, name, &email),
        )
        .await?
        .map_err(AuthError::from)
        .map(|identity| {
            info!(%subject, %audience, "profile updated");
            identity.profile()
        })
        .inspect_err(|e| log_internal("update_profile", audience, e))
    }

    /// Delete refresh records that expired more than `older_than` ago.
    pub async fn purge_expired(
        &self,
        ctx: &RequestContext,
        older_than: Duration,
    ) -> Result<u64, AuthError> {
        let cutoff = Utc::now() - older_than;
        let purged = ctx
            .run(self.store.purge_expired_refresh_tokens(cutoff))
            .await??;
        info!(purged, %cutoff, "expired refresh tokens purged");
        Ok(purged)
    }

    /// Verify a bearer access token presented to `audience`.
    pub fn verify_access_token(&self, token: &str, audience: Audience) -> Option<AccessClaims> {
        self.issuer.verify_access_token(token, audience)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    async fn login_inner(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        credentials: &LoginCredentials,
    ) -> Result<IssuedSession, AuthError> {
        let email = normalize_email(&credentials.email);
        if email.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let identity = ctx
            .run(
                self.store
                    .get_identity_by_email(audience.identity_kind(), &email),
            )
            .await??;
        let Some(identity) = identity else {
            self.equalize_timing(&credentials.password);
            return Err(AuthError::InvalidCredentials);
        };

        // External-login-only citizens have no password to check.
        let Some(password_hash) = identity.password_hash.as_deref() else {
            self.equalize_timing(&credentials.password);
            return Err(AuthError::InvalidCredentials);
        };
        let matches = self
            .passwords
            .verify(&credentials.password, password_hash)
            .unwrap_or_else(|e| {
                error!(subject = %identity.id, %audience, error = %e, "stored password hash unusable");
                false
            });
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }
        if !identity.active {
            info!(subject = %identity.id, %audience, "login refused: account disabled");
            return Err(AuthError::AccountDisabled);
        }

        let roles = self.eligible_roles(ctx, audience, identity.id).await?;
        let now = Utc::now();
        let (access_token, access_expires_at) =
            self.issuer
                .issue_access_token(identity.id, audience, &roles, now)?;
        let (refresh_token, token_hash) = self.issuer.issue_refresh_token();
        let record = self.new_record(identity.id, audience, token_hash);

        let superseded = ctx
            .run(self.store.insert_exclusive_refresh_token(&record))
            .await??;
        ctx.run(
            self.cache
                .mark_active(audience, &record.token_hash, record.expires_at, now),
        )
        .await??;
        self.forget_cached(ctx, audience, &superseded).await;

        info!(
            subject = %identity.id,
            %audience,
            token = hash_prefix(&record.token_hash),
            superseded = superseded.len(),
            "session started"
        );

        Ok(IssuedSession {
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at: record.expires_at,
            profile: identity.profile(),
            roles,
        })
    }

    async fn refresh_inner(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        raw_token: &str,
    ) -> Result<IssuedSession, AuthError> {
        if raw_token.is_empty() {
            return Err(AuthError::RefreshInvalid);
        }
        let old_hash = hash_token(raw_token);
        let now = Utc::now();

        let record = ctx
            .run(self.store.get_refresh_token_by_hash(&old_hash))
            .await??
            .ok_or_else(|| rejected(audience, &old_hash, "unknown token"))?;
        if record.revoked {
            return Err(rejected(audience, &old_hash, "revoked"));
        }
        if record.is_expired(now) {
            return Err(rejected(audience, &old_hash, "expired"));
        }
        if record.audience != audience {
            return Err(rejected(audience, &old_hash, "audience mismatch"));
        }
        if !ctx.run(self.cache.is_active(audience, &old_hash)).await?? {
            return Err(rejected(audience, &old_hash, "not active in cache"));
        }

        let identity = ctx
            .run(
                self.store
                    .get_identity_by_id(audience.identity_kind(), record.subject_id),
            )
            .await??
            .ok_or_else(|| rejected(audience, &old_hash, "subject no longer exists"))?;
        if !identity.active {
            return Err(AuthError::AccountDisabled);
        }
        // Grants may have changed since the session started.
        let roles = self.eligible_roles(ctx, audience, identity.id).await?;

        if !ctx.run(self.cache.take(audience, &old_hash)).await?? {
            return Err(rejected(audience, &old_hash, "lost rotation race"));
        }

        let (access_token, access_expires_at) =
            self.issuer
                .issue_access_token(identity.id, audience, &roles, now)?;
        let (refresh_token, new_hash) = self.issuer.issue_refresh_token();
        let new_record = self.new_record(identity.id, audience, new_hash);

        ctx.run(self.store.insert_refresh_token(&new_record))
            .await??;
        if !ctx.run(self.store.revoke_refresh_token(&old_hash)).await?? {
            ctx.run(self.store.revoke_refresh_token(&new_record.token_hash))
                .await??;
            return Err(rejected(audience, &old_hash, "revoked during rotation"));
        }
        ctx.run(
            self.cache
                .mark_active(audience, &new_record.token_hash, new_record.expires_at, now),
        )
        .await??;

        info!(
            subject = %identity.id,
            %audience,
            rotated = hash_prefix(&old_hash),
            token = hash_prefix(&new_record.token_hash),
            "session refreshed"
        );

        Ok(IssuedSession {
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at: new_record.expires_at,
            profile: identity.profile(),
            roles,
        })
    }

    async fn logout_all_inner(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        subject: Uuid,
    ) -> Result<usize, AuthError> {
        let revoked = ctx
            .run(self.store.revoke_all_refresh_tokens(subject, audience))
            .await??;
        self.forget_cached(ctx, audience, &revoked).await;
        info!(%subject, %audience, count = revoked.len(), "all sessions revoked");
        Ok(revoked.len())
    }

    async fn get_profile_inner(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        subject: Uuid,
    ) -> Result<(Profile, Vec<Role>), AuthError> {
        let identity = self.load_identity(ctx, audience, subject).await?;
        if !identity.active {
            return Err(AuthError::AccountDisabled);
        }
        let roles = self.eligible_roles(ctx, audience, subject).await?;
        Ok((identity.profile(), roles))
    }

    async fn logout_inner(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        raw_token: &str,
    ) -> Result<(), AuthError> {
        let token_hash = hash_token(raw_token);

        // Cache first: once the marker is gone the token cannot refresh, even if
        // the durable revoke below fails.
        if let Err(e) = ctx.run(self.cache.remove(audience, &token_hash)).await? {
            warn!(%audience, token = hash_prefix(&token_hash), error = %e, "cache delete failed on logout");
        }

        let record = ctx
            .run(self.store.get_refresh_token_by_hash(&token_hash))
            .await??;
        if let Some(record) = record
            && record.audience == audience
            && ctx.run(self.store.revoke_refresh_token(&token_hash)).await??
        {
            info!(
                subject = %record.subject_id,
                %audience,
                token = hash_prefix(&token_hash),
                "session revoked"
            );
        }
        Ok(())
    }

    /// Spend one hash comparison on a path that has no stored hash, so an
    /// unknown email costs as much as a wrong password.
    fn equalize_timing(&self, password: &str) {
        let _ = self
            .passwords
            .verify(password, self.passwords.dummy_hash());
    }

    async fn load_identity(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        subject: Uuid,
    ) -> Result<Identity, AuthError> {
        ctx.run(
            self.store
                .get_identity_by_id(audience.identity_kind(), subject),
        )
        .await??
        .ok_or_else(|| AuthError::NotFound(format!("identity {subject}")))
    }

    /// Resolve roles and refuse an empty set.
    async fn eligible_roles(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        subject: Uuid,
    ) -> Result<Vec<Role>, AuthError> {
        let roles = self.roles.resolve(ctx, audience, subject).await?;
        if roles.is_empty() {
            info!(%subject, %audience, "no eligible roles");
            return Err(AuthError::NoEligibleRoles);
        }
        Ok(roles)
    }

    fn new_record(&self, subject: Uuid, audience: Audience, token_hash: String) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            id: uuidv7(),
            subject_id: subject,
            audience,
            token_hash,
            expires_at: now + self.config.refresh_ttl(audience),
            created_at: now,
            revoked: false,
        }
    }

    /// Best-effort removal of cache markers for already revoked hashes.
    async fn forget_cached(&self, ctx: &RequestContext, audience: Audience, hashes: &[String]) {
        for token_hash in hashes {
            match ctx.run(self.cache.remove(audience, token_hash)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(%audience, token = hash_prefix(token_hash), error = %e, "stale cache marker left behind");
                }
                Err(_) => return,
            }
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

/// Log why a refresh was refused and collapse it to the single external signal.
fn rejected(audience: Audience, token_hash: &str, reason: &'static str) -> AuthError {
    warn!(%audience, token = hash_prefix(token_hash), reason, "refresh rejected");
    AuthError::RefreshInvalid
}

/// Internal failures get logged with detail here; the caller only sees a generic error.
fn log_internal(op: &'static str, audience: Audience, err: &AuthError) {
    match err {
        AuthError::Store(e) => error!(op, %audience, error = %e, "credential store failure"),
        AuthError::Cache(e) => error!(op, %audience, error = %e, "revocation cache failure"),
        AuthError::TokenError(msg) | AuthError::Internal(msg) => {
            error!(op, %audience, error = %msg, "session operation failed")
        }
        AuthError::Interrupted(why) => warn!(op, %audience, %why, "session operation interrupted"),
        _ => {}
    }
}
