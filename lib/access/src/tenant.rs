//! Tenant records consumed by the console.
//!
//! The console reads tenants to check token issuers, to resolve the URL a
//! login exchange should go through, and to enumerate a company's tenants
//! when granting invite roles. Provisioning owns the records; nothing here
//! writes them.

use gatehouse_core::{CompanyId, TenantId};
use serde::{Deserialize, Serialize};

/// A tenant of the platform, as read from company configuration storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub company_id: CompanyId,
    /// Canonical tenant URL, which is also the issuer of tokens minted by
    /// logins through this tenant.
    pub tenant_url: String,
}

impl Tenant {
    /// Returns the region-local variant of the tenant URL.
    #[must_use]
    pub fn regional_url(&self, region: &str, eks: bool) -> String {
        regional_tenant_url(&self.tenant_url, region, eks)
    }
}

/// Rewrites a canonical tenant URL to its region-local variant.
///
/// Canonical tenant hosts contain a `.tenant.` label; the regional variant
/// replaces it with `.tenant-<region>.`, or `.tenant-<region>-eks.` for
/// Kubernetes ingress. URLs without the label are returned unchanged.
#[must_use]
pub fn regional_tenant_url(tenant_url: &str, region: &str, eks: bool) -> String {
    let replacement = if eks {
        format!(".tenant-{region}-eks.")
    } else {
        format!(".tenant-{region}.")
    };
    tenant_url.replacen(".tenant.", &replacement, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regional_url_rewrites_tenant_label() {
        assert_eq!(
            regional_tenant_url("https://acme.tenant.example.com", "aws-us-east-1", false),
            "https://acme.tenant-aws-us-east-1.example.com"
        );
    }

    #[test]
    fn regional_url_eks_variant() {
        assert_eq!(
            regional_tenant_url("https://acme.tenant.example.com", "aws-us-east-1", true),
            "https://acme.tenant-aws-us-east-1-eks.example.com"
        );
    }

    #[test]
    fn url_without_label_unchanged() {
        assert_eq!(
            regional_tenant_url("https://acme.example.com", "aws-us-east-1", false),
            "https://acme.example.com"
        );
    }
}
