//! Admin sessions and synthetic principals.
//!
//! [`authenticate`] finds the identity endpoint of a converged cluster and
//! logs in as the admin. From the resulting [`AdminSession`] the harness gets
//! volume, image and identity clients, and creates a lower-privilege
//! principal ([`AdminSession::ensure_principal`]) that scoped checks use.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use verity_poll::{poll, PollError, PollPolicy, Probe};

use crate::cloud::{CloudBackend, CloudError, Credentials, IdentityRef, Image, NewUser, Token, Volume};
use crate::cluster::ConvergedCluster;
use crate::error::{HarnessError, Result};

/// How to reach and log into the identity service.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Explicit identity URL; derived from the identity unit when unset.
    pub identity_url: Option<String>,
    pub identity_service: String,
    pub identity_port: u16,
    pub admin: Credentials,
    /// Wait for volumes and images to change state.
    pub resource_wait: PollPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            identity_url: None,
            identity_service: "keystone".to_string(),
            identity_port: 5000,
            admin: Credentials::default(),
            resource_wait: PollPolicy::default(),
        }
    }
}

/// The synthetic principal scoped checks run as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrincipalSpec {
    pub domain: String,
    pub project: String,
    pub user: String,
    pub password: String,
    pub role: String,
    pub email: String,
}

impl Default for PrincipalSpec {
    fn default() -> Self {
        Self {
            domain: "demoDomain".to_string(),
            project: "demoProject".to_string(),
            user: "demoUser".to_string(),
            password: "password".to_string(),
            role: "Admin".to_string(),
            email: "demov3@demo.com".to_string(),
        }
    }
}

impl PrincipalSpec {
    fn credentials(&self) -> Credentials {
        Credentials {
            username: self.user.clone(),
            password: self.password.clone(),
            project: self.project.clone(),
            user_domain: self.domain.clone(),
            project_domain: self.domain.clone(),
        }
    }
}

fn auth_error(context: &str, err: CloudError) -> HarnessError {
    HarnessError::Auth(format!("{}: {}", context, err))
}

/// Identity URL of the cluster's identity service.
fn identity_url(cluster: &ConvergedCluster, settings: &SessionSettings) -> Result<String> {
    if let Some(url) = &settings.identity_url {
        return Ok(url.trim_end_matches('/').to_string());
    }
    let unit = cluster
        .units_of(&settings.identity_service)
        .first()
        .ok_or_else(|| HarnessError::Auth(format!("no {} unit to authenticate against", settings.identity_service)))?;
    let address = unit
        .public_address()
        .ok_or_else(|| HarnessError::Auth(format!("{} has no public address", unit)))?;
    Ok(format!("http://{}:{}/v3", address, settings.identity_port))
}

/// Log into the cluster's identity service as the admin.
pub async fn authenticate(
    cluster: &ConvergedCluster,
    backend: Arc<dyn CloudBackend>,
    settings: &SessionSettings,
) -> Result<AdminSession> {
    let url = identity_url(cluster, settings)?;
    info!(identity_url = %url, user = %settings.admin.username, "Authenticating admin");

    let token = backend
        .authenticate(&url, &settings.admin)
        .await
        .map_err(|e| auth_error("admin login", e))?;
    debug!(project_id = %token.project_id, "Admin token issued");

    Ok(AdminSession {
        scope: Scope {
            backend,
            token,
            policy: settings.resource_wait,
        },
    })
}

/// A token and the backend it is valid for.
#[derive(Clone)]
struct Scope {
    backend: Arc<dyn CloudBackend>,
    token: Token,
    policy: PollPolicy,
}

/// Session with admin privileges.
#[derive(Clone)]
pub struct AdminSession {
    scope: Scope,
}

impl AdminSession {
    pub fn token(&self) -> &Token {
        &self.scope.token
    }

    pub fn volumes(&self) -> VolumeClient<'_> {
        VolumeClient { scope: &self.scope }
    }

    pub fn images(&self) -> ImageClient<'_> {
        ImageClient { scope: &self.scope }
    }

    pub fn identity(&self) -> IdentityClient<'_> {
        IdentityClient { scope: &self.scope }
    }

    /// Create (or reuse) the principal's domain, project, user and role grant,
    /// then log in as it.
    pub async fn ensure_principal(&self, spec: &PrincipalSpec) -> Result<ScopedSession> {
        let identity = self.identity();

        let domain = match identity.find_domain(&spec.domain).await? {
            Some(domain) => domain,
            None => {
                info!(domain = %spec.domain, "Creating domain");
                identity.create_domain(&spec.domain, "demo").await?
            }
        };

        let project = match identity.find_project(&spec.project).await? {
            Some(project) => {
                debug!(project = %spec.project, "Project already exists");
                project
            }
            None => {
                info!(project = %spec.project, domain = %domain.name, "Creating project");
                identity.create_project(&domain.id, &spec.project, "demo").await?
            }
        };

        let user = match identity.find_user(&domain.id, &spec.user).await? {
            Some(user) => user,
            None => {
                info!(user = %spec.user, domain = %domain.name, "Creating user");
                identity
                    .create_user(&NewUser {
                        name: spec.user.clone(),
                        domain_id: domain.id.clone(),
                        password: spec.password.clone(),
                        default_project_id: Some(project.id.clone()),
                        email: Some(spec.email.clone()),
                    })
                    .await?
            }
        };

        let role = identity
            .find_role(&spec.role)
            .await?
            .ok_or_else(|| HarnessError::Auth(format!("role '{}' does not exist", spec.role)))?;
        identity.grant(&role.id, &user.id, &project.id).await?;

        let token = self
            .scope
            .backend
            .authenticate(&self.scope.token.identity_url, &spec.credentials())
            .await
            .map_err(|e| auth_error(&format!("login as {}", spec.user), e))?;
        info!(user = %spec.user, project = %spec.project, "Principal session ready");

        Ok(ScopedSession {
            project,
            scope: Scope {
                backend: self.scope.backend.clone(),
                token,
                policy: self.scope.policy,
            },
        })
    }
}

impl std::fmt::Debug for AdminSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSession")
            .field("user_id", &self.scope.token.user_id)
            .field("project_id", &self.scope.token.project_id)
            .finish_non_exhaustive()
    }
}

/// Session of a synthetic principal, scoped to its own project.
#[derive(Clone)]
pub struct ScopedSession {
    project: IdentityRef,
    scope: Scope,
}

impl ScopedSession {
    pub fn token(&self) -> &Token {
        &self.scope.token
    }

    /// Project the principal was created in.
    pub fn project(&self) -> &IdentityRef {
        &self.project
    }

    pub fn volumes(&self) -> VolumeClient<'_> {
        VolumeClient { scope: &self.scope }
    }
}

impl std::fmt::Debug for ScopedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSession")
            .field("project", &self.project)
            .field("user_id", &self.scope.token.user_id)
            .finish_non_exhaustive()
    }
}

/// Block-storage operations.
pub struct VolumeClient<'a> {
    scope: &'a Scope,
}

impl VolumeClient<'_> {
    /// Create a volume and wait until it is `available`.
    pub async fn create(&self, name: &str, size_gb: u32) -> Result<Volume> {
        let scope = self.scope;
        let volume = scope.backend.create_volume(&scope.token, name, size_gb).await?;
        info!(volume = %volume.id, name, size_gb, "Created volume");

        let id = volume.id.as_str();
        let what = format!("volume {} available", name);
        let result = poll(&what, scope.policy, move |_| async move {
            match scope.backend.get_volume(&scope.token, id).await? {
                Some(v) if v.status == "available" => Ok(Probe::Ready(v)),
                Some(v) if v.status == "error" => Err(CloudError::Malformed(format!("volume {} went to error", v.id))),
                Some(v) => Ok(Probe::pending(format!("status is {}", v.status))),
                None => Err(CloudError::NotFound {
                    kind: "volume",
                    name: id.to_string(),
                }),
            }
        })
        .await;
        resolve(result)
    }

    /// Delete a volume and wait until it is gone.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let scope = self.scope;
        scope.backend.delete_volume(&scope.token, id).await?;
        info!(volume = %id, "Deleting volume");

        let what = format!("volume {} deleted", id);
        let result = poll(&what, scope.policy, move |_| async move {
            Ok::<_, CloudError>(match scope.backend.get_volume(&scope.token, id).await? {
                None => Probe::Ready(()),
                Some(v) => Probe::pending(format!("status is {}", v.status)),
            })
        })
        .await;
        resolve(result)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Volume>> {
        Ok(self.scope.backend.get_volume(&self.scope.token, id).await?)
    }
}

/// Image operations.
pub struct ImageClient<'a> {
    scope: &'a Scope,
}

impl ImageClient<'_> {
    /// Register an image, upload its payload and wait until it is `active`.
    pub async fn create(
        &self,
        name: &str,
        disk_format: &str,
        container_format: &str,
        data: Vec<u8>,
    ) -> Result<Image> {
        let scope = self.scope;
        let image = scope
            .backend
            .create_image(&scope.token, name, disk_format, container_format)
            .await?;
        let size = data.len();
        scope.backend.upload_image(&scope.token, &image.id, data).await?;
        info!(image = %image.id, name, bytes = size, "Uploaded image");

        let id = image.id.as_str();
        let what = format!("image {} active", name);
        let result = poll(&what, scope.policy, move |_| async move {
            match scope.backend.get_image(&scope.token, id).await? {
                Some(i) if i.status == "active" => Ok(Probe::Ready(i)),
                Some(i) if i.status == "killed" => Err(CloudError::Malformed(format!("image {} was killed", i.id))),
                Some(i) => Ok(Probe::pending(format!("status is {}", i.status))),
                None => Err(CloudError::NotFound {
                    kind: "image",
                    name: id.to_string(),
                }),
            }
        })
        .await;
        resolve(result)
    }

    /// Delete an image and wait until it is gone.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let scope = self.scope;
        scope.backend.delete_image(&scope.token, id).await?;
        info!(image = %id, "Deleting image");

        let what = format!("image {} deleted", id);
        let result = poll(&what, scope.policy, move |_| async move {
            Ok::<_, CloudError>(match scope.backend.get_image(&scope.token, id).await? {
                None => Probe::Ready(()),
                Some(i) => Probe::pending(format!("status is {}", i.status)),
            })
        })
        .await;
        resolve(result)
    }
}

/// Identity administration.
pub struct IdentityClient<'a> {
    scope: &'a Scope,
}

impl IdentityClient<'_> {
    pub async fn find_domain(&self, name: &str) -> Result<Option<IdentityRef>> {
        Ok(self.scope.backend.find_domain(&self.scope.token, name).await?)
    }

    pub async fn create_domain(&self, name: &str, description: &str) -> Result<IdentityRef> {
        Ok(self
            .scope
            .backend
            .create_domain(&self.scope.token, name, description)
            .await?)
    }

    pub async fn find_project(&self, name: &str) -> Result<Option<IdentityRef>> {
        Ok(self.scope.backend.find_project(&self.scope.token, name).await?)
    }

    pub async fn create_project(&self, domain_id: &str, name: &str, description: &str) -> Result<IdentityRef> {
        Ok(self
            .scope
            .backend
            .create_project(&self.scope.token, domain_id, name, description)
            .await?)
    }

    pub async fn find_user(&self, domain_id: &str, name: &str) -> Result<Option<IdentityRef>> {
        Ok(self.scope.backend.find_user(&self.scope.token, domain_id, name).await?)
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<IdentityRef> {
        Ok(self.scope.backend.create_user(&self.scope.token, user).await?)
    }

    pub async fn find_role(&self, name: &str) -> Result<Option<IdentityRef>> {
        Ok(self.scope.backend.find_role(&self.scope.token, name).await?)
    }

    pub async fn grant(&self, role_id: &str, user_id: &str, project_id: &str) -> Result<()> {
        Ok(self
            .scope
            .backend
            .grant_project_role(&self.scope.token, role_id, user_id, project_id)
            .await?)
    }
}

/// Map a resource wait onto harness errors.
fn resolve<T>(result: std::result::Result<T, PollError<CloudError>>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(PollError::Aborted { source, .. }) => Err(source.into()),
        Err(PollError::Exhausted {
            what, attempts, elapsed, last,
        }) => Err(HarnessError::Provisioning(format!(
            "gave up waiting for {} after {} attempts ({:?}): {}",
            what, attempts, elapsed, last
        ))),
    }
}
