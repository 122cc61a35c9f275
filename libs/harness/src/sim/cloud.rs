//! Simulated identity, block-storage and image services.
//!
//! Volumes and images live in the Ceph pools of the same world: a volume that
//! becomes available adds RBD objects to `cinder-ceph`, an uploaded image adds
//! objects to `glance`, and deletion gives them back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::state::{SimResource, SimState, SimUser};
use crate::cloud::{
    CatalogEndpoint, CloudBackend, CloudError, Credentials, IdentityRef, Image, NewUser, Token,
    Volume,
};

const VOLUME_POOL: &str = "cinder-ceph";
const IMAGE_POOL: &str = "glance";

/// Header, id and directory objects of a thin-provisioned RBD volume.
const VOLUME_OBJECTS: i64 = 3;
const VOLUME_KB: i64 = 64;
/// RBD object size of uploaded images.
const OBJECT_KB: u64 = 4096;

pub(crate) const ADMIN_ROLE: &str = "Admin";
pub(crate) const MEMBER_ROLE: &str = "Member";

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Create the admin domain, project, user and roles.
pub(crate) fn seed_admin(state: &mut SimState, credentials: &Credentials) {
    let identity = &mut state.identity;

    let user_domain = new_id();
    identity
        .domains
        .insert(user_domain.clone(), credentials.user_domain.clone());
    let project_domain = if credentials.project_domain == credentials.user_domain {
        user_domain.clone()
    } else {
        let id = new_id();
        identity
            .domains
            .insert(id.clone(), credentials.project_domain.clone());
        id
    };

    let project = new_id();
    identity
        .projects
        .insert(project.clone(), (credentials.project.clone(), project_domain));

    let user = new_id();
    identity.users.insert(
        user.clone(),
        SimUser {
            name: credentials.username.clone(),
            domain_id: user_domain,
            password: credentials.password.clone(),
            default_project_id: Some(project.clone()),
        },
    );

    let admin_role = new_id();
    identity.roles.insert(admin_role.clone(), ADMIN_ROLE.to_string());
    identity.roles.insert(new_id(), MEMBER_ROLE.to_string());
    identity.grants.insert((admin_role, user, project));
}

/// [`CloudBackend`] answering from a [`SimState`].
#[derive(Clone)]
pub struct SimulatedCloud {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCloud {
    pub(crate) fn new(state: Arc<Mutex<SimState>>) -> Self {
        Self { state }
    }
}

impl std::fmt::Debug for SimulatedCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedCloud").finish_non_exhaustive()
    }
}

fn check_token(state: &SimState, token: &Token) -> Result<(), CloudError> {
    if state.identity.tokens.contains_key(&token.value) {
        Ok(())
    } else {
        Err(CloudError::Unauthorized("token is not valid".to_string()))
    }
}

fn conflict(operation: &str, name: &str) -> CloudError {
    CloudError::Api {
        operation: operation.to_string(),
        status: 409,
        body: format!("'{}' already exists", name),
    }
}

fn domain_named(state: &SimState, name: &str) -> Option<String> {
    state
        .identity
        .domains
        .iter()
        .find(|(_, n)| n.as_str() == name)
        .map(|(id, _)| id.clone())
}

/// Advance a pending resource and return whether it just finished.
fn advance(resource: &mut SimResource) -> bool {
    if resource.remaining == 0 {
        return false;
    }
    resource.remaining -= 1;
    resource.remaining == 0
}

fn volume_view(id: &str, resource: &SimResource) -> Volume {
    Volume {
        id: id.to_string(),
        name: resource.name.clone(),
        status: resource.status.clone(),
        size_gb: (resource.size_kb / (1024 * 1024)) as u32,
    }
}

fn image_view(id: &str, resource: &SimResource) -> Image {
    Image {
        id: id.to_string(),
        name: resource.name.clone(),
        status: resource.status.clone(),
    }
}

#[async_trait]
impl CloudBackend for SimulatedCloud {
    async fn authenticate(&self, identity_url: &str, credentials: &Credentials) -> Result<Token, CloudError> {
        let mut state = self.state.lock().await;
        let now = state.tick();
        let identity = &state.identity;

        let refused = || CloudError::Unauthorized("The request you have made requires authentication.".to_string());

        let user_domain = domain_named(&state, &credentials.user_domain).ok_or_else(refused)?;
        let (user_id, _) = identity
            .users
            .iter()
            .find(|(_, u)| u.name == credentials.username && u.domain_id == user_domain)
            .ok_or_else(refused)?;
        if identity.users[user_id].password != credentials.password {
            return Err(refused());
        }

        let project_domain = domain_named(&state, &credentials.project_domain).ok_or_else(refused)?;
        let (project_id, _) = identity
            .projects
            .iter()
            .find(|(_, (name, domain))| *name == credentials.project && *domain == project_domain)
            .ok_or_else(refused)?;

        let scoped = identity
            .grants
            .iter()
            .any(|(_, u, p)| u == user_id && p == project_id);
        if !scoped {
            return Err(refused());
        }

        let (user_id, project_id) = (user_id.clone(), project_id.clone());
        let value = new_id();
        state
            .identity
            .tokens
            .insert(value.clone(), (user_id.clone(), project_id.clone()));
        debug!(user = %credentials.username, project = %credentials.project, "[SIM] Issued token");

        Ok(Token {
            value,
            catalog: vec![
                CatalogEndpoint {
                    service_type: "identity".to_string(),
                    url: identity_url.to_string(),
                },
                CatalogEndpoint {
                    service_type: "volumev3".to_string(),
                    url: format!("http://cinder.sim:8776/v3/{}", project_id),
                },
                CatalogEndpoint {
                    service_type: "image".to_string(),
                    url: "http://glance.sim:9292".to_string(),
                },
            ],
            user_id,
            project_id,
            expires_at: Some(now + ChronoDuration::hours(1)),
            identity_url: identity_url.to_string(),
        })
    }

    async fn find_domain(&self, token: &Token, name: &str) -> Result<Option<IdentityRef>, CloudError> {
        let state = self.state.lock().await;
        check_token(&state, token)?;
        Ok(domain_named(&state, name).map(|id| IdentityRef {
            id,
            name: name.to_string(),
        }))
    }

    async fn create_domain(&self, token: &Token, name: &str, _description: &str) -> Result<IdentityRef, CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        if domain_named(&state, name).is_some() {
            return Err(conflict("create domain", name));
        }
        let id = new_id();
        state.identity.domains.insert(id.clone(), name.to_string());
        Ok(IdentityRef {
            id,
            name: name.to_string(),
        })
    }

    async fn find_project(&self, token: &Token, name: &str) -> Result<Option<IdentityRef>, CloudError> {
        let state = self.state.lock().await;
        check_token(&state, token)?;
        Ok(state
            .identity
            .projects
            .iter()
            .find(|(_, (n, _))| n == name)
            .map(|(id, (n, _))| IdentityRef {
                id: id.clone(),
                name: n.clone(),
            }))
    }

    async fn create_project(
        &self,
        token: &Token,
        domain_id: &str,
        name: &str,
        _description: &str,
    ) -> Result<IdentityRef, CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        if !state.identity.domains.contains_key(domain_id) {
            return Err(CloudError::NotFound {
                kind: "domain",
                name: domain_id.to_string(),
            });
        }
        let taken = state
            .identity
            .projects
            .values()
            .any(|(n, d)| n == name && d == domain_id);
        if taken {
            return Err(conflict("create project", name));
        }
        let id = new_id();
        state
            .identity
            .projects
            .insert(id.clone(), (name.to_string(), domain_id.to_string()));
        Ok(IdentityRef {
            id,
            name: name.to_string(),
        })
    }

    async fn find_user(&self, token: &Token, domain_id: &str, name: &str) -> Result<Option<IdentityRef>, CloudError> {
        let state = self.state.lock().await;
        check_token(&state, token)?;
        Ok(state
            .identity
            .users
            .iter()
            .find(|(_, u)| u.name == name && u.domain_id == domain_id)
            .map(|(id, u)| IdentityRef {
                id: id.clone(),
                name: u.name.clone(),
            }))
    }

    async fn create_user(&self, token: &Token, user: &NewUser) -> Result<IdentityRef, CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        if !state.identity.domains.contains_key(&user.domain_id) {
            return Err(CloudError::NotFound {
                kind: "domain",
                name: user.domain_id.clone(),
            });
        }
        let taken = state
            .identity
            .users
            .values()
            .any(|u| u.name == user.name && u.domain_id == user.domain_id);
        if taken {
            return Err(conflict("create user", &user.name));
        }
        let id = new_id();
        state.identity.users.insert(
            id.clone(),
            SimUser {
                name: user.name.clone(),
                domain_id: user.domain_id.clone(),
                password: user.password.clone(),
                default_project_id: user.default_project_id.clone(),
            },
        );
        Ok(IdentityRef {
            id,
            name: user.name.clone(),
        })
    }

    async fn find_role(&self, token: &Token, name: &str) -> Result<Option<IdentityRef>, CloudError> {
        let state = self.state.lock().await;
        check_token(&state, token)?;
        Ok(state
            .identity
            .roles
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(id, n)| IdentityRef {
                id: id.clone(),
                name: n.clone(),
            }))
    }

    async fn grant_project_role(
        &self,
        token: &Token,
        role_id: &str,
        user_id: &str,
        project_id: &str,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        let identity = &mut state.identity;
        for (kind, id, known) in [
            ("role", role_id, identity.roles.contains_key(role_id)),
            ("user", user_id, identity.users.contains_key(user_id)),
            ("project", project_id, identity.projects.contains_key(project_id)),
        ] {
            if !known {
                return Err(CloudError::NotFound {
                    kind,
                    name: id.to_string(),
                });
            }
        }
        identity
            .grants
            .insert((role_id.to_string(), user_id.to_string(), project_id.to_string()));
        Ok(())
    }

    async fn create_volume(&self, token: &Token, name: &str, size_gb: u32) -> Result<Volume, CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        let id = Uuid::new_v4().to_string();
        let resource = SimResource {
            name: name.to_string(),
            status: "creating".to_string(),
            size_kb: u64::from(size_gb) * 1024 * 1024,
            remaining: state.timing.resource_polls.max(1),
        };
        let view = volume_view(&id, &resource);
        state.volumes.insert(id, resource);
        Ok(view)
    }

    async fn get_volume(&self, token: &Token, id: &str) -> Result<Option<Volume>, CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        let Some(resource) = state.volumes.get_mut(id) else {
            return Ok(None);
        };
        if !advance(resource) {
            return Ok(Some(volume_view(id, resource)));
        }

        match resource.status.as_str() {
            "creating" => {
                resource.status = "available".to_string();
                let view = volume_view(id, resource);
                state.adjust_pool(VOLUME_POOL, VOLUME_OBJECTS, VOLUME_KB);
                Ok(Some(view))
            }
            "deleting" => {
                state.volumes.remove(id);
                state.adjust_pool(VOLUME_POOL, -VOLUME_OBJECTS, -VOLUME_KB);
                Ok(None)
            }
            _ => Ok(Some(volume_view(id, resource))),
        }
    }

    async fn delete_volume(&self, token: &Token, id: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        let polls = state.timing.resource_polls.max(1);
        let resource = state.volumes.get_mut(id).ok_or_else(|| CloudError::NotFound {
            kind: "volume",
            name: id.to_string(),
        })?;
        if resource.status == "creating" {
            return Err(CloudError::Api {
                operation: "delete volume".to_string(),
                status: 400,
                body: "Volume status must be available or error".to_string(),
            });
        }
        resource.status = "deleting".to_string();
        resource.remaining = polls;
        Ok(())
    }

    async fn create_image(
        &self,
        token: &Token,
        name: &str,
        _disk_format: &str,
        _container_format: &str,
    ) -> Result<Image, CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        let id = Uuid::new_v4().to_string();
        let resource = SimResource {
            name: name.to_string(),
            status: "queued".to_string(),
            size_kb: 0,
            remaining: 0,
        };
        let view = image_view(&id, &resource);
        state.images.insert(id, resource);
        Ok(view)
    }

    async fn upload_image(&self, token: &Token, id: &str, data: Vec<u8>) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        let resource = state.images.get_mut(id).ok_or_else(|| CloudError::NotFound {
            kind: "image",
            name: id.to_string(),
        })?;
        let kb = (data.len() as u64).div_ceil(1024);
        resource.status = "active".to_string();
        resource.size_kb = kb;

        // One header object plus data objects.
        let objects = 1 + kb.div_ceil(OBJECT_KB);
        state.adjust_pool(IMAGE_POOL, objects as i64, kb as i64);
        Ok(())
    }

    async fn get_image(&self, token: &Token, id: &str) -> Result<Option<Image>, CloudError> {
        let state = self.state.lock().await;
        check_token(&state, token)?;
        Ok(state.images.get(id).map(|r| image_view(id, r)))
    }

    async fn delete_image(&self, token: &Token, id: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        check_token(&state, token)?;
        let resource = state.images.remove(id).ok_or_else(|| CloudError::NotFound {
            kind: "image",
            name: id.to_string(),
        })?;
        if resource.status == "active" {
            let objects = 1 + resource.size_kb.div_ceil(OBJECT_KB);
            state.adjust_pool(IMAGE_POOL, -(objects as i64), -(resource.size_kb as i64));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimTiming, Simulation};

    const KEYSTONE: &str = "http://10.5.0.3:5000/v3";

    fn simulation() -> Simulation {
        Simulation::builder()
            .timing(SimTiming::default())
            .admin(Credentials::default())
            .build()
    }

    #[tokio::test]
    async fn test_admin_authenticates() {
        let sim = simulation();
        let cloud = sim.cloud();

        let token = cloud.authenticate(KEYSTONE, &Credentials::default()).await.unwrap();
        assert_eq!(token.identity_url, KEYSTONE);
        assert!(token.endpoint(&["volumev3"]).is_ok());

        let wrong = Credentials {
            password: "nope".to_string(),
            ..Credentials::default()
        };
        let err = cloud.authenticate(KEYSTONE, &wrong).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_user_without_grant_cannot_scope() {
        let sim = simulation();
        let cloud = sim.cloud();
        let admin = cloud.authenticate(KEYSTONE, &Credentials::default()).await.unwrap();

        let domain = cloud.create_domain(&admin, "demoDomain", "").await.unwrap();
        let project = cloud
            .create_project(&admin, &domain.id, "demoProject", "")
            .await
            .unwrap();
        let user = cloud
            .create_user(
                &admin,
                &NewUser {
                    name: "demoUser".to_string(),
                    domain_id: domain.id.clone(),
                    password: "password".to_string(),
                    default_project_id: Some(project.id.clone()),
                    email: None,
                },
            )
            .await
            .unwrap();

        let demo = Credentials {
            username: "demoUser".to_string(),
            password: "password".to_string(),
            project: "demoProject".to_string(),
            user_domain: "demoDomain".to_string(),
            project_domain: "demoDomain".to_string(),
        };
        assert!(cloud.authenticate(KEYSTONE, &demo).await.is_err());

        let member = cloud.find_role(&admin, "member").await.unwrap().unwrap();
        cloud
            .grant_project_role(&admin, &member.id, &user.id, &project.id)
            .await
            .unwrap();
        assert!(cloud.authenticate(KEYSTONE, &demo).await.is_ok());

        let err = cloud
            .create_domain(&admin, "demoDomain", "")
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Api { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_volume_lifecycle_moves_pool_usage() {
        let sim = simulation();
        sim.mutate(|s| {
            s.create_pool(VOLUME_POOL);
        })
        .await;
        let cloud = sim.cloud();
        let token = cloud.authenticate(KEYSTONE, &Credentials::default()).await.unwrap();

        let volume = cloud.create_volume(&token, "demo-vol", 1).await.unwrap();
        assert_eq!(volume.status, "creating");
        let ready = cloud.get_volume(&token, &volume.id).await.unwrap().unwrap();
        assert_eq!(ready.status, "available");
        assert_eq!(ready.size_gb, 1);
        let objects = sim.mutate(|s| s.pools[VOLUME_POOL].objects).await;
        assert_eq!(objects, 3);

        cloud.delete_volume(&token, &volume.id).await.unwrap();
        assert!(cloud.get_volume(&token, &volume.id).await.unwrap().is_none());
        let objects = sim.mutate(|s| s.pools[VOLUME_POOL].objects).await;
        assert_eq!(objects, 0);
    }

    #[tokio::test]
    async fn test_image_upload_and_delete() {
        let sim = simulation();
        sim.mutate(|s| {
            s.create_pool(IMAGE_POOL);
        })
        .await;
        let cloud = sim.cloud();
        let token = cloud.authenticate(KEYSTONE, &Credentials::default()).await.unwrap();

        let image = cloud.create_image(&token, "cirros", "qcow2", "bare").await.unwrap();
        assert_eq!(image.status, "queued");
        cloud.upload_image(&token, &image.id, vec![0u8; 10 * 1024]).await.unwrap();
        let active = cloud.get_image(&token, &image.id).await.unwrap().unwrap();
        assert_eq!(active.status, "active");
        let kb = sim.mutate(|s| s.pools[IMAGE_POOL].kb_used).await;
        assert_eq!(kb, 10);

        cloud.delete_image(&token, &image.id).await.unwrap();
        assert!(cloud.get_image(&token, &image.id).await.unwrap().is_none());
        let pool = sim.mutate(|s| s.pools[IMAGE_POOL].clone()).await;
        assert_eq!((pool.objects, pool.kb_used), (0, 0));
    }

    #[tokio::test]
    async fn test_forged_token_is_refused() {
        let sim = simulation();
        let cloud = sim.cloud();
        let mut token = cloud.authenticate(KEYSTONE, &Credentials::default()).await.unwrap();
        token.value = "forged".to_string();
        let err = cloud.find_project(&token, "admin").await.unwrap_err();
        assert!(err.is_auth());
    }
}
