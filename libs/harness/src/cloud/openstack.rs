//! REST backend for Keystone v3, Cinder v3 and Glance v2.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{
    CatalogEndpoint, CloudBackend, CloudError, Credentials, IdentityRef, Image, NewUser, Token,
    Volume,
};

const AUTH_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const VOLUME_TYPES: &[&str] = &["volumev3", "block-storage", "volumev2"];
const IMAGE_TYPES: &[&str] = &["image"];

/// HTTP client for the cloud APIs.
#[derive(Debug, Clone)]
pub struct OpenStackRest {
    client: reqwest::Client,
    /// Catalog interface to use (`public`, `internal` or `admin`).
    interface: String,
}

impl OpenStackRest {
    pub fn new(timeout: Duration) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            interface: "public".to_string(),
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    fn request(&self, method: Method, url: String, token: &Token) -> RequestBuilder {
        self.client.request(method, url).header(AUTH_HEADER, &token.value)
    }

    fn identity(token: &Token, path: &str) -> String {
        format!("{}{}", token.identity_url.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(&self, operation: &str, request: RequestBuilder) -> Result<T, CloudError> {
        let response = request.send().await?;
        let response = check(operation, response).await?;
        response
            .json()
            .await
            .map_err(|e| CloudError::Malformed(format!("{}: {}", operation, e)))
    }

    async fn send_empty(&self, operation: &str, request: RequestBuilder) -> Result<(), CloudError> {
        let response = request.send().await?;
        check(operation, response).await?;
        Ok(())
    }

    /// GET that maps 404 to `None`.
    async fn fetch<T: DeserializeOwned>(&self, operation: &str, request: RequestBuilder) -> Result<Option<T>, CloudError> {
        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(operation, response).await?;
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| CloudError::Malformed(format!("{}: {}", operation, e)))
    }
}

async fn check(operation: &str, response: Response) -> Result<Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(CloudError::Unauthorized(format!("{}: {}", operation, body)));
    }
    Err(CloudError::Api {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    token: TokenInfo,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    expires_at: Option<DateTime<Utc>>,
    user: IdOnly,
    project: Option<IdOnly>,
    #[serde(default)]
    catalog: Vec<CatalogService>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CatalogService {
    #[serde(rename = "type")]
    service_type: String,
    endpoints: Vec<RawEndpoint>,
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    interface: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    id: String,
    name: String,
}

impl From<RawRef> for IdentityRef {
    fn from(raw: RawRef) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Domains {
    domains: Vec<RawRef>,
}

#[derive(Debug, Deserialize)]
struct DomainBody {
    domain: RawRef,
}

#[derive(Debug, Deserialize)]
struct Projects {
    projects: Vec<RawRef>,
}

#[derive(Debug, Deserialize)]
struct ProjectBody {
    project: RawRef,
}

#[derive(Debug, Deserialize)]
struct Users {
    users: Vec<RawRef>,
}

#[derive(Debug, Deserialize)]
struct UserBody {
    user: RawRef,
}

#[derive(Debug, Deserialize)]
struct Roles {
    roles: Vec<RawRef>,
}

#[derive(Debug, Deserialize)]
struct RawVolume {
    id: String,
    #[serde(default)]
    name: Option<String>,
    status: String,
    size: u32,
}

#[derive(Debug, Deserialize)]
struct VolumeBody {
    volume: RawVolume,
}

impl From<RawVolume> for Volume {
    fn from(raw: RawVolume) -> Self {
        Self {
            id: raw.id,
            name: raw.name.unwrap_or_default(),
            status: raw.status,
            size_gb: raw.size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawImage {
    id: String,
    #[serde(default)]
    name: Option<String>,
    status: String,
}

impl From<RawImage> for Image {
    fn from(raw: RawImage) -> Self {
        Self {
            id: raw.id,
            name: raw.name.unwrap_or_default(),
            status: raw.status,
        }
    }
}

#[async_trait]
impl CloudBackend for OpenStackRest {
    async fn authenticate(&self, identity_url: &str, credentials: &Credentials) -> Result<Token, CloudError> {
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": credentials.username,
                            "domain": { "name": credentials.user_domain },
                            "password": credentials.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": credentials.project,
                        "domain": { "name": credentials.project_domain },
                    }
                }
            }
        });

        let url = format!("{}/auth/tokens", identity_url.trim_end_matches('/'));
        debug!(url = %url, user = %credentials.username, "Requesting token");
        let response = self.client.post(&url).json(&body).send().await?;
        let response = check("authenticate", response).await?;

        let value = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CloudError::Malformed(format!("missing {} header", SUBJECT_TOKEN_HEADER)))?;
        let parsed: TokenBody = response
            .json()
            .await
            .map_err(|e| CloudError::Malformed(format!("token body: {}", e)))?;
        let info = parsed.token;

        let project_id = info
            .project
            .map(|p| p.id)
            .ok_or_else(|| CloudError::Malformed("token is not project-scoped".to_string()))?;
        let catalog = info
            .catalog
            .into_iter()
            .filter_map(|service| {
                service
                    .endpoints
                    .into_iter()
                    .find(|e| e.interface == self.interface)
                    .map(|e| CatalogEndpoint {
                        service_type: service.service_type,
                        url: e.url,
                    })
            })
            .collect();

        info!(user = %credentials.username, project = %credentials.project, "Authenticated");
        Ok(Token {
            value,
            user_id: info.user.id,
            project_id,
            expires_at: info.expires_at,
            identity_url: identity_url.trim_end_matches('/').to_string(),
            catalog,
        })
    }

    async fn find_domain(&self, token: &Token, name: &str) -> Result<Option<IdentityRef>, CloudError> {
        let request = self
            .request(Method::GET, Self::identity(token, "/domains"), token)
            .query(&[("name", name)]);
        let found: Domains = self.send("list domains", request).await?;
        Ok(found.domains.into_iter().next().map(Into::into))
    }

    async fn create_domain(&self, token: &Token, name: &str, description: &str) -> Result<IdentityRef, CloudError> {
        let request = self
            .request(Method::POST, Self::identity(token, "/domains"), token)
            .json(&json!({ "domain": { "name": name, "description": description, "enabled": true } }));
        let created: DomainBody = self.send("create domain", request).await?;
        info!(domain = %name, "Created domain");
        Ok(created.domain.into())
    }

    async fn find_project(&self, token: &Token, name: &str) -> Result<Option<IdentityRef>, CloudError> {
        let request = self
            .request(Method::GET, Self::identity(token, "/projects"), token)
            .query(&[("name", name)]);
        let found: Projects = self.send("list projects", request).await?;
        Ok(found.projects.into_iter().next().map(Into::into))
    }

    async fn create_project(
        &self,
        token: &Token,
        domain_id: &str,
        name: &str,
        description: &str,
    ) -> Result<IdentityRef, CloudError> {
        let request = self
            .request(Method::POST, Self::identity(token, "/projects"), token)
            .json(&json!({
                "project": {
                    "name": name,
                    "domain_id": domain_id,
                    "description": description,
                    "enabled": true,
                }
            }));
        let created: ProjectBody = self.send("create project", request).await?;
        info!(project = %name, "Created project");
        Ok(created.project.into())
    }

    async fn find_user(&self, token: &Token, domain_id: &str, name: &str) -> Result<Option<IdentityRef>, CloudError> {
        let request = self
            .request(Method::GET, Self::identity(token, "/users"), token)
            .query(&[("name", name), ("domain_id", domain_id)]);
        let found: Users = self.send("list users", request).await?;
        Ok(found.users.into_iter().next().map(Into::into))
    }

    async fn create_user(&self, token: &Token, user: &NewUser) -> Result<IdentityRef, CloudError> {
        let request = self
            .request(Method::POST, Self::identity(token, "/users"), token)
            .json(&json!({
                "user": {
                    "name": user.name,
                    "domain_id": user.domain_id,
                    "password": user.password,
                    "default_project_id": user.default_project_id,
                    "email": user.email,
                    "enabled": true,
                }
            }));
        let created: UserBody = self.send("create user", request).await?;
        info!(user = %user.name, "Created user");
        Ok(created.user.into())
    }

    async fn find_role(&self, token: &Token, name: &str) -> Result<Option<IdentityRef>, CloudError> {
        // Role names differ in case between deployments ("Admin" vs "admin").
        let request = self.request(Method::GET, Self::identity(token, "/roles"), token);
        let found: Roles = self.send("list roles", request).await?;
        Ok(found
            .roles
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(Into::into))
    }

    async fn grant_project_role(
        &self,
        token: &Token,
        role_id: &str,
        user_id: &str,
        project_id: &str,
    ) -> Result<(), CloudError> {
        let path = format!("/projects/{}/users/{}/roles/{}", project_id, user_id, role_id);
        let request = self.request(Method::PUT, Self::identity(token, &path), token);
        self.send_empty("grant role", request).await
    }

    async fn create_volume(&self, token: &Token, name: &str, size_gb: u32) -> Result<Volume, CloudError> {
        let url = format!("{}/volumes", token.endpoint(VOLUME_TYPES)?);
        let request = self
            .request(Method::POST, url, token)
            .json(&json!({ "volume": { "name": name, "size": size_gb } }));
        let created: VolumeBody = self.send("create volume", request).await?;
        info!(volume = %created.volume.id, size_gb, "Created volume");
        Ok(created.volume.into())
    }

    async fn get_volume(&self, token: &Token, id: &str) -> Result<Option<Volume>, CloudError> {
        let url = format!("{}/volumes/{}", token.endpoint(VOLUME_TYPES)?, id);
        let found: Option<VolumeBody> = self.fetch("get volume", self.request(Method::GET, url, token)).await?;
        Ok(found.map(|body| body.volume.into()))
    }

    async fn delete_volume(&self, token: &Token, id: &str) -> Result<(), CloudError> {
        let url = format!("{}/volumes/{}", token.endpoint(VOLUME_TYPES)?, id);
        self.send_empty("delete volume", self.request(Method::DELETE, url, token))
            .await
    }

    async fn create_image(
        &self,
        token: &Token,
        name: &str,
        disk_format: &str,
        container_format: &str,
    ) -> Result<Image, CloudError> {
        let url = format!("{}/v2/images", token.endpoint(IMAGE_TYPES)?);
        let request = self.request(Method::POST, url, token).json(&json!({
            "name": name,
            "disk_format": disk_format,
            "container_format": container_format,
            "visibility": "public",
        }));
        let created: RawImage = self.send("create image", request).await?;
        info!(image = %created.id, name, "Created image");
        Ok(created.into())
    }

    async fn upload_image(&self, token: &Token, id: &str, data: Vec<u8>) -> Result<(), CloudError> {
        let url = format!("{}/v2/images/{}/file", token.endpoint(IMAGE_TYPES)?, id);
        let bytes = data.len();
        let request = self
            .request(Method::PUT, url, token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data);
        self.send_empty("upload image", request).await?;
        debug!(image = %id, bytes, "Uploaded image data");
        Ok(())
    }

    async fn get_image(&self, token: &Token, id: &str) -> Result<Option<Image>, CloudError> {
        let url = format!("{}/v2/images/{}", token.endpoint(IMAGE_TYPES)?, id);
        let found: Option<RawImage> = self.fetch("get image", self.request(Method::GET, url, token)).await?;
        Ok(found.map(Into::into))
    }

    async fn delete_image(&self, token: &Token, id: &str) -> Result<(), CloudError> {
        let url = format!("{}/v2/images/{}", token.endpoint(IMAGE_TYPES)?, id);
        self.send_empty("delete image", self.request(Method::DELETE, url, token))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_response(server: &MockServer) -> ResponseTemplate {
        ResponseTemplate::new(201)
            .insert_header(SUBJECT_TOKEN_HEADER, "gAAAA-token")
            .set_body_json(json!({
                "token": {
                    "expires_at": "2030-01-01T00:00:00.000000Z",
                    "user": { "id": "u-1", "name": "admin" },
                    "project": { "id": "p-1", "name": "admin" },
                    "catalog": [
                        {
                            "type": "volumev3",
                            "endpoints": [
                                { "interface": "admin", "url": "http://admin.invalid" },
                                { "interface": "public", "url": format!("{}/volume/v3/p-1", server.uri()) }
                            ]
                        },
                        {
                            "type": "image",
                            "endpoints": [
                                { "interface": "public", "url": format!("{}/image", server.uri()) }
                            ]
                        }
                    ]
                }
            }))
    }

    async fn authenticated(server: &MockServer) -> (OpenStackRest, Token) {
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(token_response(server))
            .mount(server)
            .await;
        let client = OpenStackRest::new(Duration::from_secs(5));
        let token = client
            .authenticate(&format!("{}/v3", server.uri()), &Credentials::default())
            .await
            .unwrap();
        (client, token)
    }

    #[tokio::test]
    async fn test_authenticate_reads_subject_token_and_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .and(body_partial_json(json!({
                "auth": { "scope": { "project": { "name": "admin", "domain": { "name": "admin_domain" } } } }
            })))
            .respond_with(token_response(&server))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenStackRest::new(Duration::from_secs(5));
        let token = client
            .authenticate(&format!("{}/v3/", server.uri()), &Credentials::default())
            .await
            .unwrap();

        assert_eq!(token.value, "gAAAA-token");
        assert_eq!(token.project_id, "p-1");
        assert_eq!(token.identity_url, format!("{}/v3", server.uri()));
        assert_eq!(
            token.endpoint(VOLUME_TYPES).unwrap(),
            format!("{}/volume/v3/p-1", server.uri())
        );
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(ResponseTemplate::new(401).set_body_string("The request you have made requires authentication."))
            .mount(&server)
            .await;

        let client = OpenStackRest::new(Duration::from_secs(5));
        let err = client
            .authenticate(&format!("{}/v3", server.uri()), &Credentials::default())
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_find_project_and_role() {
        let server = MockServer::start().await;
        let (client, token) = authenticated(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/projects"))
            .and(query_param("name", "demoProject"))
            .and(header(AUTH_HEADER, "gAAAA-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "projects": [] })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/roles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "roles": [{ "id": "r-1", "name": "member" }, { "id": "r-2", "name": "admin" }]
            })))
            .mount(&server)
            .await;

        assert!(client.find_project(&token, "demoProject").await.unwrap().is_none());
        let role = client.find_role(&token, "Admin").await.unwrap().unwrap();
        assert_eq!(role.id, "r-2");
    }

    #[tokio::test]
    async fn test_volume_requests_use_catalog_endpoint() {
        let server = MockServer::start().await;
        let (client, token) = authenticated(&server).await;

        Mock::given(method("POST"))
            .and(path("/volume/v3/p-1/volumes"))
            .and(body_partial_json(json!({ "volume": { "size": 1 } })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "volume": { "id": "v-1", "name": "demo-vol", "status": "creating", "size": 1 }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/volume/v3/p-1/volumes/v-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let volume = client.create_volume(&token, "demo-vol", 1).await.unwrap();
        assert_eq!(volume.status, "creating");
        assert!(client.get_volume(&token, "v-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_image_upload_error_surfaces_status() {
        let server = MockServer::start().await;
        let (client, token) = authenticated(&server).await;

        Mock::given(method("PUT"))
            .and(path("/image/v2/images/i-1/file"))
            .and(header("content-type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
            .mount(&server)
            .await;

        let err = client.upload_image(&token, "i-1", vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, CloudError::Api { status: 413, .. }));
    }
}
