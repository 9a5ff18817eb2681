//! HTTP client for the RBAC service.

use crate::error::RbacError;
use crate::types::{Membership, RbacGroup, RbacUser};
use async_trait::async_trait;
use gatehouse_core::UserId;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

/// The group/user/role operations the console needs from the RBAC service.
///
/// The console only grants and revokes memberships; policy evaluation lives
/// entirely in the service.
#[async_trait]
pub trait RbacService: Send + Sync {
    /// Looks up a user by ID.
    async fn get_user(&self, user_id: UserId) -> Result<RbacUser, RbacError>;

    /// Looks up a group by ID.
    async fn get_group(&self, group_id: Uuid) -> Result<RbacGroup, RbacError>;

    /// Adds a user to a group with the given role, upserting any existing
    /// membership.
    async fn add_user_role(
        &self,
        group_id: Uuid,
        user_id: UserId,
        role: &str,
    ) -> Result<Membership, RbacError>;

    /// Removes a user from a group.
    async fn remove_user(&self, group_id: Uuid, user_id: UserId) -> Result<(), RbacError>;
}

/// RBAC service client speaking the service's HTTP API.
///
/// Authenticates with a bearer-style header minted from the tenant's M2M
/// secret; no user session is involved.
#[derive(Clone)]
pub struct HttpRbacClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
}

#[derive(Serialize)]
struct AddMemberRequest<'a> {
    user_id: UserId,
    role: &'a str,
}

impl HttpRbacClient {
    /// Creates a new RBAC client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The RBAC service base URL (normally the tenant URL)
    /// * `auth_header` - The Authorization header value for M2M calls
    #[must_use]
    pub fn new(base_url: String, auth_header: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check_status(
        response: reqwest::Response,
        entity: &str,
    ) -> Result<reqwest::Response, RbacError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(RbacError::NotFound {
                entity: entity.to_string(),
            }),
            status => Err(RbacError::RequestFailed {
                details: format!("unexpected status {status}"),
            }),
        }
    }
}

#[async_trait]
impl RbacService for HttpRbacClient {
    #[instrument(skip(self))]
    async fn get_user(&self, user_id: UserId) -> Result<RbacUser, RbacError> {
        let response = self
            .http
            .get(self.url(&format!("/authz/users/{user_id}")))
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .send()
            .await
            .map_err(|e| RbacError::ConnectionFailed {
                details: e.to_string(),
            })?;

        let response = Self::check_status(response, "user").await?;
        response
            .json()
            .await
            .map_err(|e| RbacError::RequestFailed {
                details: e.to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn get_group(&self, group_id: Uuid) -> Result<RbacGroup, RbacError> {
        let response = self
            .http
            .get(self.url(&format!("/authz/groups/{group_id}")))
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .send()
            .await
            .map_err(|e| RbacError::ConnectionFailed {
                details: e.to_string(),
            })?;

        let response = Self::check_status(response, "group").await?;
        response
            .json()
            .await
            .map_err(|e| RbacError::RequestFailed {
                details: e.to_string(),
            })
    }

    #[instrument(skip(self), fields(group = %group_id, role))]
    async fn add_user_role(
        &self,
        group_id: Uuid,
        user_id: UserId,
        role: &str,
    ) -> Result<Membership, RbacError> {
        let response = self
            .http
            .post(self.url(&format!("/authz/groups/{group_id}/members")))
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .json(&AddMemberRequest { user_id, role })
            .send()
            .await
            .map_err(|e| RbacError::ConnectionFailed {
                details: e.to_string(),
            })?;

        Self::check_status(response, "group").await?;
        debug!("membership written");
        Ok(Membership {
            group_id,
            user_id,
            role: role.to_string(),
        })
    }

    #[instrument(skip(self), fields(group = %group_id))]
    async fn remove_user(&self, group_id: Uuid, user_id: UserId) -> Result<(), RbacError> {
        let response = self
            .http
            .delete(self.url(&format!("/authz/groups/{group_id}/members/{user_id}")))
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .send()
            .await
            .map_err(|e| RbacError::ConnectionFailed {
                details: e.to_string(),
            })?;

        Self::check_status(response, "membership").await?;
        debug!("membership removed");
        Ok(())
    }
}
