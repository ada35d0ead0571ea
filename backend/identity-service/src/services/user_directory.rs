/// User directory lookup
///
/// The sign-in flow resolves an email address to a user profile through the
/// user service. Production traffic goes over gRPC; tests substitute a mock.
use crate::error::{IdentityError, Result};
use crate::grpc::{GetUserByEmailRequest, GetUserResponseStatus, UserServiceClient};
use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

/// Identity fields copied into issued tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub name: String,
    pub username: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when no user owns `email`
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserProfile>>;
}

pub struct GrpcUserDirectory {
    client: UserServiceClient,
}

impl GrpcUserDirectory {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: UserServiceClient::new(channel),
        }
    }

    /// Build a lazily connecting client; the first call dials the user service
    pub fn connect_lazy(addr: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Endpoint::from_shared(addr.to_string())
            .map_err(|e| IdentityError::UserDirectory(format!("Invalid user service address: {}", e)))?
            .timeout(timeout)
            .connect_timeout(timeout);
        Ok(Self::new(endpoint.connect_lazy()))
    }
}

#[async_trait]
impl UserDirectory for GrpcUserDirectory {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        let mut client = self.client.clone();
        let response = client
            .get_user_by_email(GetUserByEmailRequest {
                email: email.to_string(),
            })
            .await
            .map_err(|status| {
                tracing::error!(code = ?status.code(), "user service lookup failed");
                IdentityError::UserDirectory(status.message().to_string())
            })?
            .into_inner();

        match response.status() {
            GetUserResponseStatus::Success => {}
            GetUserResponseStatus::NotFound => return Ok(None),
            GetUserResponseStatus::Failed => {
                return Err(IdentityError::UserDirectory(
                    "user service reported failure".to_string(),
                ))
            }
            GetUserResponseStatus::Unspecified => {
                return Err(IdentityError::UserDirectory(format!(
                    "unexpected user service status {}",
                    response.status
                )))
            }
        }

        let user_id = Uuid::parse_str(&response.user_id).map_err(|e| {
            IdentityError::UserDirectory(format!("user service returned invalid user id: {}", e))
        })?;

        Ok(Some(UserProfile {
            user_id,
            name: response.name.unwrap_or_default(),
            username: response.username.unwrap_or_default(),
        }))
    }
}
