//! Connection authentication

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

/// Credentials presented by a connecting client
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub connection_id: Uuid,
    pub credentials: Credentials,
}

/// Decides whether a new connection may see state and emit events.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> bool;
}

/// Accepts every connection
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(&self, _request: &AuthRequest) -> bool {
        true
    }
}

/// Accepts exactly one username/password pair.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticCredentials {
    async fn authenticate(&self, request: &AuthRequest) -> bool {
        request.credentials.username.as_deref() == Some(self.username.as_str())
            && request.credentials.password.as_deref() == Some(self.password.as_str())
    }
}
