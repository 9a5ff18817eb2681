//! Invite role grants.

use gatehouse_access::{InviteKey, Tenant};
use gatehouse_core::UserId;
use gatehouse_rbac::{RbacError, RbacService};

/// Grants the roles carried by a bound invite.
///
/// The company-level grant must succeed and is the aggregate result.
/// Tenant grants are best-effort: a failure on one tenant is logged and
/// must not prevent grants on the others.
pub async fn grant_invite_roles(
    rbac: &dyn RbacService,
    user_id: UserId,
    invite: &InviteKey,
    tenants: &[Tenant],
) -> Result<(), RbacError> {
    rbac.add_user_role(invite.company_id.as_uuid(), user_id, &invite.role)
        .await?;

    for tenant in tenants {
        let Some(role) = invite.tenant_roles.get(&tenant.id) else {
            continue;
        };
        if let Err(e) = rbac.add_user_role(tenant.id.as_uuid(), user_id, role).await {
            tracing::error!(
                tenant = %tenant.id,
                error = %e,
                "failed to grant tenant role for invite"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use gatehouse_access::{InviteKeyType, MEMBER_ROLE, TenantRoles};
    use gatehouse_core::{CompanyId, TenantId};
    use gatehouse_rbac::{Membership, RbacGroup, RbacUser};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records grants; fails `add_user_role` for the configured group IDs.
    #[derive(Default)]
    struct RecordingRbac {
        grants: Mutex<Vec<(Uuid, String)>>,
        fail_groups: Vec<Uuid>,
    }

    #[async_trait]
    impl RbacService for RecordingRbac {
        async fn get_user(&self, user_id: UserId) -> Result<RbacUser, RbacError> {
            Ok(RbacUser { id: user_id })
        }

        async fn get_group(&self, group_id: Uuid) -> Result<RbacGroup, RbacError> {
            Ok(RbacGroup { id: group_id })
        }

        async fn add_user_role(
            &self,
            group_id: Uuid,
            user_id: UserId,
            role: &str,
        ) -> Result<Membership, RbacError> {
            if self.fail_groups.contains(&group_id) {
                return Err(RbacError::RequestFailed {
                    details: "injected failure".to_string(),
                });
            }
            self.grants
                .lock()
                .expect("lock")
                .push((group_id, role.to_string()));
            Ok(Membership {
                group_id,
                user_id,
                role: role.to_string(),
            })
        }

        async fn remove_user(&self, _group_id: Uuid, _user_id: UserId) -> Result<(), RbacError> {
            Ok(())
        }
    }

    fn invite_with_tenants(company_id: CompanyId, tenant_ids: &[TenantId]) -> InviteKey {
        let mut tenant_roles = TenantRoles::new();
        for id in tenant_ids {
            tenant_roles.insert(*id, MEMBER_ROLE.to_string());
        }
        InviteKey::new(
            InviteKeyType::ExistingCompany,
            "key",
            Utc::now() + Duration::days(1),
            company_id,
            MEMBER_ROLE,
            tenant_roles,
            "invitee@example.com",
        )
    }

    fn tenant(id: TenantId, company_id: CompanyId) -> Tenant {
        Tenant {
            id,
            company_id,
            tenant_url: format!("https://{id}.tenant.example.com"),
        }
    }

    #[tokio::test]
    async fn grants_company_and_tenant_roles() {
        let company = CompanyId::new();
        let tenant_id = TenantId::new();
        let invite = invite_with_tenants(company, &[tenant_id]);
        let tenants = vec![tenant(tenant_id, company)];
        let rbac = RecordingRbac::default();

        grant_invite_roles(&rbac, UserId::new(), &invite, &tenants)
            .await
            .expect("grant");

        let grants = rbac.grants.lock().expect("lock");
        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0].0, company.as_uuid());
        assert_eq!(grants[1].0, tenant_id.as_uuid());
    }

    #[tokio::test]
    async fn tenants_without_invite_role_are_skipped() {
        let company = CompanyId::new();
        let granted = TenantId::new();
        let ungranted = TenantId::new();
        let invite = invite_with_tenants(company, &[granted]);
        let tenants = vec![tenant(granted, company), tenant(ungranted, company)];
        let rbac = RecordingRbac::default();

        grant_invite_roles(&rbac, UserId::new(), &invite, &tenants)
            .await
            .expect("grant");

        let grants = rbac.grants.lock().expect("lock");
        assert!(grants.iter().all(|(id, _)| *id != ungranted.as_uuid()));
    }

    #[tokio::test]
    async fn company_failure_is_the_aggregate_error() {
        let company = CompanyId::new();
        let invite = invite_with_tenants(company, &[]);
        let rbac = RecordingRbac {
            fail_groups: vec![company.as_uuid()],
            ..Default::default()
        };

        let err = grant_invite_roles(&rbac, UserId::new(), &invite, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::RequestFailed { .. }));
    }

    #[tokio::test]
    async fn tenant_failure_does_not_block_other_grants() {
        let company = CompanyId::new();
        let failing = TenantId::new();
        let healthy = TenantId::new();
        let invite = invite_with_tenants(company, &[failing, healthy]);
        let tenants = vec![tenant(failing, company), tenant(healthy, company)];
        let rbac = RecordingRbac {
            fail_groups: vec![failing.as_uuid()],
            ..Default::default()
        };

        grant_invite_roles(&rbac, UserId::new(), &invite, &tenants)
            .await
            .expect("company grant succeeds");

        let grants = rbac.grants.lock().expect("lock");
        assert!(grants.iter().any(|(id, _)| *id == company.as_uuid()));
        assert!(grants.iter().any(|(id, _)| *id == healthy.as_uuid()));
        assert!(grants.iter().all(|(id, _)| *id != failing.as_uuid()));
    }
}
