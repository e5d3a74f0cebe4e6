//! PostgreSQL implementation of [`CredentialStore`].
//!
//! Multi-row mutations (`insert_exclusive_refresh_token`) run inside one
//! transaction holding a per-(subject, audience) advisory lock, so concurrent
//! logins of one subject serialize instead of each missing the other's
//! uncommitted row under READ COMMITTED; single-statement updates rely on row-level atomicity plus a
//! `revoked = FALSE` / `sign_count = $expected` predicate whose affected-row
//! count decides concurrent races.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{CredentialStore, StoreError, StoreResult};
use crate::models::auth::{Audience, Identity, IdentityKind, RefreshTokenRecord, RoleGrant};
use crate::models::passkey::PasskeyCredential;

type IdentityRow = (Uuid, String, String, Option<String>, bool, DateTime<Utc>);

type RefreshRow = (
    Uuid,
    Uuid,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    bool,
);

type PasskeyRow = (
    Uuid,
    Uuid,
    Vec<u8>,
    Vec<u8>,
    i64,
    Vec<String>,
    Option<String>,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const REFRESH_COLUMNS: &str =
    "id, subject_id, audience, token_hash, expires_at, created_at, revoked";

const PASSKEY_COLUMNS: &str = "id, owner_id, credential_id, public_key, sign_count, transports, \
     nickname, cloned, created_at, updated_at, last_used_at";

fn identity_table(kind: IdentityKind) -> &'static str {
    match kind {
        IdentityKind::Staff => "staff_users",
        IdentityKind::Citizen => "citizens",
    }
}

fn identity_from_row(kind: IdentityKind, row: IdentityRow) -> Identity {
    let (id, name, email, password_hash, active, created_at) = row;
    Identity {
        id,
        kind,
        name,
        email,
        password_hash,
        active,
        created_at,
    }
}

fn refresh_from_row(row: RefreshRow) -> StoreResult<RefreshTokenRecord> {
    let (id, subject_id, audience, token_hash, expires_at, created_at, revoked) = row;
    let audience = audience
        .parse::<Audience>()
        .map_err(|e| StoreError::Corrupt(format!("refresh_tokens.audience: {e}")))?;
    Ok(RefreshTokenRecord {
        id,
        subject_id,
        audience,
        token_hash,
        expires_at,
        created_at,
        revoked,
    })
}

fn passkey_from_row(row: PasskeyRow) -> StoreResult<PasskeyCredential> {
    let (
        id,
        owner_id,
        credential_id,
        public_key,
        sign_count,
        transports,
        nickname,
        cloned,
        created_at,
        updated_at,
        last_used_at,
    ) = row;
    let sign_count = u32::try_from(sign_count)
        .map_err(|_| StoreError::Corrupt(format!("passkey sign_count {sign_count} out of range")))?;
    Ok(PasskeyCredential {
        id,
        owner_id,
        credential_id,
        public_key,
        sign_count,
        transports,
        nickname,
        cloned,
        created_at,
        updated_at,
        last_used_at,
    })
}

/// Map unique-constraint violations to `Conflict`, everything else to `Db`.
fn conflict_or_db(e: sqlx::Error, what: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("{what} already exists"))
        }
        _ => StoreError::Db(e),
    }
}

#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get_identity_by_email(
        &self,
        kind: IdentityKind,
        email: &str,
    ) -> StoreResult<Option<Identity>> {
        let sql = format!(
            "SELECT id, name, email, password_hash, active, created_at FROM {} WHERE email = $1",
            identity_table(kind)
        );
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| identity_from_row(kind, r)))
    }

    async fn get_identity_by_id(
        &self,
        kind: IdentityKind,
        id: Uuid,
    ) -> StoreResult<Option<Identity>> {
        let sql = format!(
            "SELECT id, name, email, password_hash, active, created_at FROM {} WHERE id = $1",
            identity_table(kind)
        );
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| identity_from_row(kind, r)))
    }

    async fn update_profile(
        &self,
        kind: IdentityKind,
        id: Uuid,
        name: &str,
        email: &str,
    ) -> StoreResult<Identity> {
        let sql = format!(
            "UPDATE {} SET name = $2, email = $3 WHERE id = $1 \
             RETURNING id, name, email, password_hash, active, created_at",
            identity_table(kind)
        );
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(id)
            .bind(name)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| conflict_or_db(e, "email"))?;
        row.map(|r| identity_from_row(kind, r))
            .ok_or_else(|| StoreError::NotFound(format!("identity {id}")))
    }

    async fn list_role_grants(&self, staff_id: Uuid) -> StoreResult<Vec<RoleGrant>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String)>(
            "SELECT staff_id, secretaria_id, role FROM staff_role_grants WHERE staff_id = $1",
        )
        .bind(staff_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(staff_id, secretaria_id, role)| RoleGrant {
                staff_id,
                secretaria_id,
                role,
            })
            .collect())
    }

    async fn has_teaching_assignment(&self, staff_id: Uuid) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM class_teachers WHERE staff_id = $1)",
        )
        .bind(staff_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens \
             (id, subject_id, audience, token_hash, expires_at, created_at, revoked) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(record.subject_id)
        .bind(record.audience.as_str())
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(record.revoked)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, "refresh token hash"))?;
        Ok(())
    }

    async fn insert_exclusive_refresh_token(
        &self,
        record: &RefreshTokenRecord,
    ) -> StoreResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        // Released at commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!(
                "refresh:{}:{}",
                record.subject_id,
                record.audience.as_str()
            ))
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO refresh_tokens \
             (id, subject_id, audience, token_hash, expires_at, created_at, revoked) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(record.subject_id)
        .bind(record.audience.as_str())
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(record.revoked)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or_db(e, "refresh token hash"))?;

        let revoked = sqlx::query_scalar::<_, String>(
            "UPDATE refresh_tokens SET revoked = TRUE \
             WHERE subject_id = $1 AND audience = $2 AND token_hash <> $3 AND revoked = FALSE \
             RETURNING token_hash",
        )
        .bind(record.subject_id)
        .bind(record.audience.as_str())
        .bind(&record.token_hash)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(revoked)
    }

    async fn get_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        let sql = format!("SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        let row = sqlx::query_as::<_, RefreshRow>(&sql)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(refresh_from_row).transpose()
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE \
             WHERE token_hash = $1 AND revoked = FALSE",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn invalidate_other_refresh_tokens(
        &self,
        subject_id: Uuid,
        audience: Audience,
        except_hash: &str,
    ) -> StoreResult<Vec<String>> {
        let revoked = sqlx::query_scalar::<_, String>(
            "UPDATE refresh_tokens SET revoked = TRUE \
             WHERE subject_id = $1 AND audience = $2 AND token_hash <> $3 AND revoked = FALSE \
             RETURNING token_hash",
        )
        .bind(subject_id)
        .bind(audience.as_str())
        .bind(except_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(revoked)
    }

    async fn revoke_all_refresh_tokens(
        &self,
        subject_id: Uuid,
        audience: Audience,
    ) -> StoreResult<Vec<String>> {
        let revoked = sqlx::query_scalar::<_, String>(
            "UPDATE refresh_tokens SET revoked = TRUE \
             WHERE subject_id = $1 AND audience = $2 AND revoked = FALSE \
             RETURNING token_hash",
        )
        .bind(subject_id)
        .bind(audience.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(revoked)
    }

    async fn purge_expired_refresh_tokens(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_passkey(&self, credential: &PasskeyCredential) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO passkey_credentials \
             (id, owner_id, credential_id, public_key, sign_count, transports, nickname, \
              cloned, created_at, updated_at, last_used_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(credential.id)
        .bind(credential.owner_id)
        .bind(&credential.credential_id)
        .bind(&credential.public_key)
        .bind(i64::from(credential.sign_count))
        .bind(&credential.transports)
        .bind(credential.nickname.as_deref())
        .bind(credential.cloned)
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .bind(credential.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, "passkey credential id"))?;
        Ok(())
    }

    async fn get_passkey(&self, credential_id: &[u8]) -> StoreResult<Option<PasskeyCredential>> {
        let sql =
            format!("SELECT {PASSKEY_COLUMNS} FROM passkey_credentials WHERE credential_id = $1");
        let row = sqlx::query_as::<_, PasskeyRow>(&sql)
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(passkey_from_row).transpose()
    }

    async fn list_passkeys(&self, owner_id: Uuid) -> StoreResult<Vec<PasskeyCredential>> {
        let sql = format!(
            "SELECT {PASSKEY_COLUMNS} FROM passkey_credentials \
             WHERE owner_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, PasskeyRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(passkey_from_row).collect()
    }

    async fn compare_and_set_passkey_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        sign_count: u32,
        cloned: bool,
        used_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PasskeyCredential>> {
        let sql = format!(
            "UPDATE passkey_credentials \
             SET sign_count = $3, cloned = cloned OR $4, \
                 last_used_at = COALESCE($5, last_used_at), updated_at = now() \
             WHERE credential_id = $1 AND sign_count = $2 \
             RETURNING {PASSKEY_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PasskeyRow>(&sql)
            .bind(credential_id)
            .bind(i64::from(expected))
            .bind(i64::from(sign_count))
            .bind(cloned)
            .bind(used_at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(passkey_from_row).transpose()
    }

    async fn rename_passkey(
        &self,
        owner_id: Uuid,
        credential_id: &[u8],
        nickname: Option<&str>,
    ) -> StoreResult<Option<PasskeyCredential>> {
        let sql = format!(
            "UPDATE passkey_credentials SET nickname = $3, updated_at = now() \
             WHERE owner_id = $1 AND credential_id = $2 \
             RETURNING {PASSKEY_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PasskeyRow>(&sql)
            .bind(owner_id)
            .bind(credential_id)
            .bind(nickname)
            .fetch_optional(&self.pool)
            .await?;
        row.map(passkey_from_row).transpose()
    }

    async fn delete_passkey(&self, owner_id: Uuid, credential_id: &[u8]) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM passkey_credentials WHERE owner_id = $1 AND credential_id = $2",
        )
        .bind(owner_id)
        .bind(credential_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
