//! Cloud API interface (identity, block storage, images).
//!
//! - [`OpenStackRest`] talks to Keystone v3, Cinder v3 and Glance v2 over HTTP
//! - [`crate::sim::SimulatedCloud`] answers from the simulated world
//!
//! Every call after [`CloudBackend::authenticate`] carries the [`Token`] it was
//! issued, which also holds the service catalog used to find endpoints.

mod openstack;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openstack::OpenStackRest;

/// Cloud API errors.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("{operation} failed: {status} - {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no {0} endpoint in the service catalog")]
    MissingEndpoint(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
}

impl CloudError {
    /// Returns true if the error means the credentials or token were refused.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Api { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}

/// Password credentials scoped to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub project: String,
    pub user_domain: String,
    pub project_domain: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "openstack".to_string(),
            project: "admin".to_string(),
            user_domain: "admin_domain".to_string(),
            project_domain: "admin_domain".to_string(),
        }
    }
}

/// One public endpoint from the service catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEndpoint {
    pub service_type: String,
    pub url: String,
}

/// An issued, project-scoped token.
#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub user_id: String,
    pub project_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// Identity endpoint the token was obtained from.
    pub identity_url: String,
    pub catalog: Vec<CatalogEndpoint>,
}

impl Token {
    /// First catalog URL whose service type is in `types`, trailing slash removed.
    pub fn endpoint(&self, types: &[&str]) -> Result<&str, CloudError> {
        types
            .iter()
            .find_map(|wanted| {
                self.catalog
                    .iter()
                    .find(|e| e.service_type == *wanted)
                    .map(|e| e.url.trim_end_matches('/'))
            })
            .ok_or_else(|| CloudError::MissingEndpoint(types.join("/")))
    }
}

/// Domain, project, user or role reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRef {
    pub id: String,
    pub name: String,
}

/// Parameters of a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub domain_id: String,
    pub password: String,
    pub default_project_id: Option<String>,
    pub email: Option<String>,
}

/// A block-storage volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub status: String,
    pub size_gb: u32,
}

/// An image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// Cloud operations the harness needs.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Exchange password credentials for a project-scoped token.
    async fn authenticate(&self, identity_url: &str, credentials: &Credentials) -> Result<Token, CloudError>;

    async fn find_domain(&self, token: &Token, name: &str) -> Result<Option<IdentityRef>, CloudError>;

    async fn create_domain(&self, token: &Token, name: &str, description: &str) -> Result<IdentityRef, CloudError>;

    /// Find a project by name in any domain.
    async fn find_project(&self, token: &Token, name: &str) -> Result<Option<IdentityRef>, CloudError>;

    async fn create_project(
        &self,
        token: &Token,
        domain_id: &str,
        name: &str,
        description: &str,
    ) -> Result<IdentityRef, CloudError>;

    async fn find_user(&self, token: &Token, domain_id: &str, name: &str) -> Result<Option<IdentityRef>, CloudError>;

    async fn create_user(&self, token: &Token, user: &NewUser) -> Result<IdentityRef, CloudError>;

    async fn find_role(&self, token: &Token, name: &str) -> Result<Option<IdentityRef>, CloudError>;

    async fn grant_project_role(
        &self,
        token: &Token,
        role_id: &str,
        user_id: &str,
        project_id: &str,
    ) -> Result<(), CloudError>;

    async fn create_volume(&self, token: &Token, name: &str, size_gb: u32) -> Result<Volume, CloudError>;

    /// `None` once the volume is gone.
    async fn get_volume(&self, token: &Token, id: &str) -> Result<Option<Volume>, CloudError>;

    async fn delete_volume(&self, token: &Token, id: &str) -> Result<(), CloudError>;

    async fn create_image(
        &self,
        token: &Token,
        name: &str,
        disk_format: &str,
        container_format: &str,
    ) -> Result<Image, CloudError>;

    async fn upload_image(&self, token: &Token, id: &str, data: Vec<u8>) -> Result<(), CloudError>;

    /// `None` once the image is gone.
    async fn get_image(&self, token: &Token, id: &str) -> Result<Option<Image>, CloudError>;

    async fn delete_image(&self, token: &Token, id: &str) -> Result<(), CloudError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_endpoint_lookup() {
        let token = Token {
            value: "t".to_string(),
            user_id: "u".to_string(),
            project_id: "p".to_string(),
            expires_at: None,
            identity_url: "http://10.5.0.3:5000/v3".to_string(),
            catalog: vec![
                CatalogEndpoint {
                    service_type: "volumev2".to_string(),
                    url: "http://10.5.0.4:8776/v2/p".to_string(),
                },
                CatalogEndpoint {
                    service_type: "image".to_string(),
                    url: "http://10.5.0.5:9292/".to_string(),
                },
            ],
        };

        assert_eq!(
            token.endpoint(&["volumev3", "volumev2"]).unwrap(),
            "http://10.5.0.4:8776/v2/p"
        );
        assert_eq!(token.endpoint(&["image"]).unwrap(), "http://10.5.0.5:9292");
        assert!(matches!(
            token.endpoint(&["compute"]),
            Err(CloudError::MissingEndpoint(_))
        ));
    }

    #[test]
    fn test_auth_classification() {
        assert!(CloudError::Unauthorized("bad password".to_string()).is_auth());
        assert!(CloudError::Api {
            operation: "create project".to_string(),
            status: 403,
            body: String::new()
        }
        .is_auth());
        assert!(!CloudError::Malformed("x".to_string()).is_auth());
    }
}
