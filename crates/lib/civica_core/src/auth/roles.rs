//! Effective role resolution — relational grants + teaching assignment → role set.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::AuthError;
use crate::context::RequestContext;
use crate::models::auth::{Audience, Role, RoleGrant};
use crate::store::CredentialStore;

/// Computes role sets fresh on every call; nothing is cached between calls.
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn CredentialStore>,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Effective roles for `subject` under `audience`, sorted. May be empty;
    /// callers refuse to issue a session for an empty set.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        audience: Audience,
        subject: Uuid,
    ) -> Result<Vec<Role>, AuthError> {
        let roles = match audience {
            Audience::Citizen => citizen_roles(),
            Audience::Backoffice => {
                let grants = ctx.run(self.store.list_role_grants(subject)).await??;
                let teaches = ctx
                    .run(self.store.has_teaching_assignment(subject))
                    .await??;
                staff_roles(&grants, teaches)
            }
        };
        Ok(roles.into_iter().collect())
    }
}

/// Citizens always get exactly `{CIDADAO}`.
pub fn citizen_roles() -> BTreeSet<Role> {
    BTreeSet::from([Role::Cidadao])
}

/// Staff role set from grants plus the teaching flag.
pub fn staff_roles(grants: &[RoleGrant], teaches: bool) -> BTreeSet<Role> {
    let mut roles = BTreeSet::new();
    for grant in grants {
        match grant.role.parse::<Role>() {
            // Scoping record only; carries no authorization by itself.
            Ok(Role::Atendente) => {}
            Ok(role) => {
                roles.insert(role);
            }
            Err(e) => {
                warn!(staff_id = %grant.staff_id, secretaria_id = %grant.secretaria_id, "ignoring grant: {e}");
            }
        }
    }
    if teaches {
        roles.insert(Role::Professor);
    }
    apply_overrides(roles)
}

/// Business override: a teacher is never also an attendant.
pub fn apply_overrides(mut roles: BTreeSet<Role>) -> BTreeSet<Role> {
    if roles.contains(&Role::Professor) {
        roles.remove(&Role::Atendente);
    }
    roles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(role: &str) -> RoleGrant {
        RoleGrant {
            staff_id: Uuid::nil(),
            secretaria_id: Uuid::now_v7(),
            role: role.to_string(),
        }
    }

    #[test]
    fn attendant_grant_alone_yields_no_roles() {
        assert!(staff_roles(&[grant("ATENDENTE")], false).is_empty());
    }

    #[test]
    fn labels_are_trimmed_and_uppercased() {
        let roles = staff_roles(&[grant("  diretor "), grant("Coordenador")], false);
        assert_eq!(roles, BTreeSet::from([Role::Diretor, Role::Coordenador]));
    }

    #[test]
    fn teaching_assignment_injects_professor() {
        let roles = staff_roles(&[], true);
        assert_eq!(roles, BTreeSet::from([Role::Professor]));
    }

    #[test]
    fn attendant_plus_teaching_is_professor_plus_other_grants() {
        let roles = staff_roles(
            &[grant("ATENDENTE"), grant("SECRETARIO"), grant("atendente")],
            true,
        );
        assert_eq!(roles, BTreeSet::from([Role::Professor, Role::Secretario]));
        assert!(!roles.contains(&Role::Atendente));
    }

    #[test]
    fn duplicate_grants_collapse() {
        let roles = staff_roles(&[grant("GESTOR"), grant("gestor"), grant("PROFESSOR")], true);
        assert_eq!(roles, BTreeSet::from([Role::Gestor, Role::Professor]));
    }

    #[test]
    fn unknown_labels_are_ignored() {
        let roles = staff_roles(&[grant("JANITOR"), grant("ADMIN")], false);
        assert_eq!(roles, BTreeSet::from([Role::Admin]));
    }

    #[test]
    fn override_removes_attendant_when_professor_present() {
        let set = BTreeSet::from([Role::Atendente, Role::Professor, Role::Diretor]);
        assert_eq!(
            apply_overrides(set),
            BTreeSet::from([Role::Professor, Role::Diretor])
        );
    }

    #[test]
    fn override_keeps_attendant_without_professor() {
        let set = BTreeSet::from([Role::Atendente, Role::Diretor]);
        assert_eq!(apply_overrides(set.clone()), set);
    }

    #[test]
    fn citizens_are_always_cidadao() {
        assert_eq!(citizen_roles(), BTreeSet::from([Role::Cidadao]));
    }
}
