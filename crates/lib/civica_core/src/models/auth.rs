//! Authentication domain models.
//!
//! These are internal domain models; the HTTP layer owns its own response
//! envelopes and maps from these.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Independent trust domain a session belongs to.
///
/// A token issued for one audience is never honoured by the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    /// Internal staff (secretaria employees, teachers, school management).
    Backoffice,
    /// Citizens using the public portal.
    Citizen,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backoffice => "backoffice",
            Self::Citizen => "citizen",
        }
    }

    /// Identity table this audience authenticates against.
    pub fn identity_kind(&self) -> IdentityKind {
        match self {
            Self::Backoffice => IdentityKind::Staff,
            Self::Citizen => IdentityKind::Citizen,
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backoffice" => Ok(Self::Backoffice),
            "citizen" => Ok(Self::Citizen),
            other => Err(format!("unknown audience '{other}'")),
        }
    }
}

/// Which identity table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Staff,
    Citizen,
}

/// Authorization role label.
///
/// Grants carry exactly one of these; unknown labels never reach a role set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Gestor,
    Secretario,
    Diretor,
    Coordenador,
    Professor,
    Atendente,
    Cidadao,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Gestor => "GESTOR",
            Self::Secretario => "SECRETARIO",
            Self::Diretor => "DIRETOR",
            Self::Coordenador => "COORDENADOR",
            Self::Professor => "PROFESSOR",
            Self::Atendente => "ATENDENTE",
            Self::Cidadao => "CIDADAO",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Parses a grant label, ignoring surrounding whitespace and case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "GESTOR" => Ok(Self::Gestor),
            "SECRETARIO" => Ok(Self::Secretario),
            "DIRETOR" => Ok(Self::Diretor),
            "COORDENADOR" => Ok(Self::Coordenador),
            "PROFESSOR" => Ok(Self::Professor),
            "ATENDENTE" => Ok(Self::Atendente),
            "CIDADAO" => Ok(Self::Cidadao),
            other => Err(format!("unknown role label '{other}'")),
        }
    }
}

/// Staff or citizen identity record.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub kind: IdentityKind,
    pub name: String,
    pub email: String,
    /// `None` for citizens that only sign in through external methods.
    pub password_hash: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Public view of an identity, safe to hand to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub kind: IdentityKind,
    pub name: String,
    pub email: String,
}

/// Staff role within one organizational unit ("secretaria").
///
/// The label is kept raw as stored; normalization happens in the role resolver.
#[derive(Debug, Clone)]
pub struct RoleGrant {
    pub staff_id: Uuid,
    pub secretaria_id: Uuid,
    pub role: String,
}

/// Refresh token record stored in the database. Only the hash is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub audience: Audience,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Not revoked and not past expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject — identity ID (standard JWT `sub` claim).
    pub sub: String,
    /// Audience tag (`backoffice` or `citizen`).
    pub aud: String,
    /// Effective roles at issue time.
    pub roles: Vec<Role>,
    /// Issuer.
    pub iss: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

/// Email + password pair submitted at login.
#[derive(Clone, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of a successful login or refresh.
///
/// `refresh_token` is the raw value; it is returned exactly once and never stored.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub profile: Profile,
    pub roles: Vec<Role>,
}
