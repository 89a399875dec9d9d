//! Boundary to the IBM Cloud APIs: toolchains, tools, Tekton pipelines,
//! resource groups and the GRIT git service.

use std::time::Duration;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use crate::catalog::TARGET_REGIONS;
use crate::error::MigrationError;
use crate::validate::RepoPath;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ResourceDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "location")]
    pub region: String,
    #[serde(default)]
    pub resource_group_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub crn: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolBinding {
    pub id: String,
    pub tool_type_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl ToolBinding {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.tool_type_id)
    }

    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDefinition {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineProperty {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineTrigger {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PipelineProperty>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineGraph {
    pub id: String,
    #[serde(default)]
    pub definitions: Vec<PipelineDefinition>,
    #[serde(default)]
    pub properties: Vec<PipelineProperty>,
    #[serde(default)]
    pub triggers: Vec<PipelineTrigger>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Region(String),
    ResourceGroup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    User,
    Group,
}

impl OwnerKind {
    pub fn other(self) -> Self {
        match self {
            OwnerKind::User => OwnerKind::Group,
            OwnerKind::Group => OwnerKind::User,
        }
    }
}

#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn get_resource(&self, id: &str, region: &str) -> Result<ResourceDescriptor, MigrationError>;
    async fn list_tool_bindings(&self, resource_id: &str, region: &str) -> Result<Vec<ToolBinding>, MigrationError>;
    async fn get_pipeline_graph(&self, tool_id: &str, region: &str) -> Result<PipelineGraph, MigrationError>;
    async fn find_by_name(&self, name: &str, scope: &Scope) -> Result<Vec<ResourceDescriptor>, MigrationError>;
    async fn resolve_resource_group(&self, name_or_id: &str) -> Result<ResourceGroup, MigrationError>;
    /// Fails with [`MigrationError::AuthRequired`] when the user has not authorized the provider yet.
    async fn get_repo_oauth_token(&self, region: &str, provider_id: &str) -> Result<String, MigrationError>;
    async fn check_repo_exists(&self, region: &str, owner_kind: OwnerKind, path: &RepoPath) -> Result<bool, MigrationError>;
}

const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";
const RESOURCE_GROUPS_URL: &str = "https://resource-controller.cloud.ibm.com/v2/resource_groups";
const MAX_ATTEMPTS: u32 = 4;

fn devops_api(region: &str) -> String {
    format!("https://api.{}.devops.cloud.ibm.com", region)
}

/// `CloudClient` over the public REST APIs, authenticated with an API key.
pub struct HttpCloudClient {
    client: reqwest::Client,
    api_key: String,
    token: Mutex<Option<String>>,
    grit_tokens: Mutex<Vec<(String, String)>>,
}

impl HttpCloudClient {
    pub fn new(api_key: String) -> Result<Self, MigrationError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cd-migrate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| MigrationError::external("Failed to build HTTP client", e))?;
        Ok(Self { client, api_key, token: Mutex::new(None), grit_tokens: Mutex::new(Vec::new()) })
    }

    async fn bearer(&self) -> Result<String, MigrationError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let res = self
            .client
            .post(IAM_TOKEN_URL)
            .form(&[("grant_type", "urn:ibm:params:oauth:grant-type:apikey"), ("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| MigrationError::external("IAM token request failed", e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(MigrationError::external("IAM token request failed", format!("{} {}", status, body)));
        }
        let body = res.text().await.map_err(|e| MigrationError::external("IAM token response", e))?;
        let token: TokenResponse = decode("IAM token response", &body)?;
        *cached = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    /// GET with exponential backoff on 429 and 5xx. `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)], token: &str) -> Result<Option<T>, MigrationError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .get(url)
                .query(query)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| MigrationError::external(format!("GET {}", url), e))?;

            let status = res.status();
            if status.as_u16() == 404 {
                return Ok(None);
            }
            if (status.as_u16() == 429 || status.is_server_error()) && attempt < MAX_ATTEMPTS {
                let wait = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                tracing::debug!(%url, %status, ?wait, "retrying request");
                tokio::time::sleep(wait).await;
                continue;
            }
            let body = res.text().await.map_err(|e| MigrationError::external(format!("GET {}", url), e))?;
            if !status.is_success() {
                return Err(MigrationError::external(format!("GET {}", url), format!("{} {}", status, body)));
            }
            return decode(url, &body).map(Some);
        }
    }

    async fn api_get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<Option<T>, MigrationError> {
        let token = self.bearer().await?;
        self.get_json(url, query, &token).await
    }

    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroup>, MigrationError> {
        #[derive(Deserialize)]
        struct Groups {
            resources: Vec<ResourceGroup>,
        }
        let groups: Option<Groups> = self.api_get(RESOURCE_GROUPS_URL, &[]).await?;
        Ok(groups.map(|g| g.resources).unwrap_or_default())
    }

    async fn list_toolchains(&self, region: &str, resource_group_id: &str, name: &str) -> Result<Vec<ResourceDescriptor>, MigrationError> {
        #[derive(Deserialize)]
        struct Toolchains {
            #[serde(default)]
            toolchains: Vec<ResourceDescriptor>,
        }
        let url = format!("{}/toolchain/v2/toolchains", devops_api(region));
        let query = [("resource_group_id", resource_group_id.to_string()), ("name", name.to_string()), ("limit", "200".to_string())];
        let list: Option<Toolchains> = self.api_get(&url, &query).await?;
        Ok(list
            .map(|l| l.toolchains)
            .unwrap_or_default()
            .into_iter()
            .map(|mut t| {
                if t.region.is_empty() {
                    t.region = region.to_string();
                }
                t
            })
            .collect())
    }
}

fn decode<T: DeserializeOwned>(context: &str, body: &str) -> Result<T, MigrationError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| {
        let path = e.path().to_string();
        MigrationError::external(format!("Unexpected response from {}", context), format!("at '{}': {}", path, e.into_inner()))
    })
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    async fn get_resource(&self, id: &str, region: &str) -> Result<ResourceDescriptor, MigrationError> {
        let url = format!("{}/toolchain/v2/toolchains/{}", devops_api(region), id);
        let mut toolchain: ResourceDescriptor = self
            .api_get(&url, &[])
            .await?
            .ok_or_else(|| MigrationError::external("Toolchain lookup", format!("toolchain {} not found in {}", id, region)))?;
        if toolchain.region.is_empty() {
            toolchain.region = region.to_string();
        }
        Ok(toolchain)
    }

    async fn list_tool_bindings(&self, resource_id: &str, region: &str) -> Result<Vec<ToolBinding>, MigrationError> {
        #[derive(Deserialize)]
        struct Next {
            start: Option<String>,
        }
        #[derive(Deserialize)]
        struct Tools {
            #[serde(default)]
            tools: Vec<ToolBinding>,
            next: Option<Next>,
        }

        let url = format!("{}/toolchain/v2/toolchains/{}/tools", devops_api(region), resource_id);
        let mut tools = Vec::new();
        let mut start: Option<String> = None;
        loop {
            let mut query = vec![("limit", "150".to_string())];
            if let Some(s) = &start {
                query.push(("start", s.clone()));
            }
            let page: Tools = self
                .api_get(&url, &query)
                .await?
                .ok_or_else(|| MigrationError::external("Tool listing", format!("toolchain {} not found", resource_id)))?;
            tools.extend(page.tools);
            match page.next.and_then(|n| n.start) {
                Some(next) => start = Some(next),
                None => break,
            }
        }
        Ok(tools)
    }

    async fn get_pipeline_graph(&self, tool_id: &str, region: &str) -> Result<PipelineGraph, MigrationError> {
        let url = format!("{}/pipeline/v2/tekton_pipelines/{}", devops_api(region), tool_id);
        self.api_get(&url, &[])
            .await?
            .ok_or_else(|| MigrationError::external("Pipeline lookup", format!("tekton pipeline {} not found", tool_id)))
    }

    async fn find_by_name(&self, name: &str, scope: &Scope) -> Result<Vec<ResourceDescriptor>, MigrationError> {
        let mut found = Vec::new();
        match scope {
            Scope::Region(region) => {
                for group in self.list_resource_groups().await? {
                    found.extend(self.list_toolchains(region, &group.id, name).await?);
                }
            }
            Scope::ResourceGroup(group_id) => {
                for region in TARGET_REGIONS {
                    found.extend(self.list_toolchains(region, group_id, name).await?);
                }
            }
        }
        found.retain(|t| t.name == name);
        Ok(found)
    }

    async fn resolve_resource_group(&self, name_or_id: &str) -> Result<ResourceGroup, MigrationError> {
        self.list_resource_groups()
            .await?
            .into_iter()
            .find(|g| g.id == name_or_id || g.name == name_or_id)
            .ok_or_else(|| MigrationError::external("Resource group lookup", format!("no resource group named '{}'", name_or_id)))
    }

    async fn get_repo_oauth_token(&self, region: &str, provider_id: &str) -> Result<String, MigrationError> {
        {
            let cached = self.grit_tokens.lock().await;
            if let Some((_, token)) = cached.iter().find(|(r, _)| r == region) {
                return Ok(token.clone());
            }
        }

        #[derive(Deserialize)]
        struct GitToken {
            access_token: Option<String>,
            #[serde(rename = "authorizationURI")]
            authorization_uri: Option<String>,
        }

        let bearer = self.bearer().await?;
        let url = format!("https://otc-github-consolidated-broker.{}.devops.cloud.ibm.com/api/v1/tokens", region);
        let res = self
            .client
            .get(&url)
            .query(&[("free", "true"), ("git_id", provider_id)])
            .bearer_auth(&bearer)
            .send()
            .await
            .map_err(|e| MigrationError::external("Git token request failed", e))?;
        let status = res.status();
        let body = res.text().await.map_err(|e| MigrationError::external("Git token request failed", e))?;
        let parsed: GitToken = decode("git token broker", &body)?;

        match (parsed.access_token, parsed.authorization_uri) {
            (Some(token), _) if status.is_success() => {
                self.grit_tokens.lock().await.push((region.to_string(), token.clone()));
                Ok(token)
            }
            (_, Some(authorize_url)) => Err(MigrationError::AuthRequired { authorize_url }),
            _ => Err(MigrationError::external("Git token request failed", format!("{} {}", status, body))),
        }
    }

    async fn check_repo_exists(&self, region: &str, owner_kind: OwnerKind, path: &RepoPath) -> Result<bool, MigrationError> {
        #[derive(Deserialize)]
        struct Project {
            path: String,
        }

        let token = self.get_repo_oauth_token(region, "hostedgit").await?;
        let namespace: String = url::form_urlencoded::byte_serialize(path.namespace.as_bytes()).collect();
        let owner = match owner_kind {
            OwnerKind::Group => "groups",
            OwnerKind::User => "users",
        };
        let url = format!("https://{}.git.cloud.ibm.com/api/v4/{}/{}/projects", region, owner, namespace);
        let query = [("search", path.project.clone()), ("simple", "true".to_string())];
        let projects: Option<Vec<Project>> = self.get_json(&url, &query, &token).await?;
        Ok(projects
            .unwrap_or_default()
            .iter()
            .any(|p| p.path.eq_ignore_ascii_case(&path.project)))
    }
}
