//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use async_trait::async_trait;
use crate::cloud::{
    CloudClient, OwnerKind, PipelineDefinition, PipelineGraph, PipelineProperty, PipelineTrigger, ResourceDescriptor,
    ResourceGroup, Scope, ToolBinding,
};
use crate::error::MigrationError;
use crate::iac::IaCRunner;
use crate::prompt::Prompter;
use crate::validate::RepoPath;

pub const TOOLCHAIN_ID: &str = "3f1c2a4e-9b7d-4c21-8e5f-0a1b2c3d4e5f";
pub const RESOURCE_GROUP_ID: &str = "rg-0001";

#[derive(Default)]
pub struct FakeCloud {
    toolchain: Option<ResourceDescriptor>,
    tools: Vec<ToolBinding>,
    pipelines: Vec<PipelineGraph>,
    existing: Vec<ResourceDescriptor>,
    resource_groups: Vec<ResourceGroup>,
    group_repos: HashSet<String>,
    user_repos: HashSet<String>,
    failing_repos: HashSet<String>,
    authorize_url: Option<String>,
    repo_checks: Mutex<Vec<(OwnerKind, String)>>,
}

impl FakeCloud {
    /// A source toolchain in `ca-tor`, resource group [`RESOURCE_GROUP_ID`].
    pub fn with_toolchain(name: &str) -> Self {
        Self {
            toolchain: Some(ResourceDescriptor {
                id: TOOLCHAIN_ID.to_string(),
                name: name.to_string(),
                region: "ca-tor".to_string(),
                resource_group_id: RESOURCE_GROUP_ID.to_string(),
                ..Default::default()
            }),
            resource_groups: vec![ResourceGroup { id: RESOURCE_GROUP_ID.to_string(), name: "default".to_string() }],
            ..Default::default()
        }
    }

    pub fn with_tool(mut self, tool: ToolBinding) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_pipeline(mut self, graph: PipelineGraph) -> Self {
        self.pipelines.push(graph);
        self
    }

    /// A toolchain that `find_by_name` reports as already present.
    pub fn with_existing(mut self, id: &str, name: &str, region: &str, resource_group_id: &str) -> Self {
        self.existing.push(ResourceDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            region: region.to_string(),
            resource_group_id: resource_group_id.to_string(),
            ..Default::default()
        });
        self
    }

    pub fn with_resource_group(mut self, id: &str, name: &str) -> Self {
        self.resource_groups.push(ResourceGroup { id: id.to_string(), name: name.to_string() });
        self
    }

    pub fn with_group_repo(mut self, url: &str) -> Self {
        self.group_repos.insert(url.to_string());
        self
    }

    pub fn with_user_repo(mut self, url: &str) -> Self {
        self.user_repos.insert(url.to_string());
        self
    }

    /// Existence checks for `url` fail with an API error.
    pub fn with_failing_repo(mut self, url: &str) -> Self {
        self.failing_repos.insert(url.to_string());
        self
    }

    pub fn requiring_auth(mut self, authorize_url: &str) -> Self {
        self.authorize_url = Some(authorize_url.to_string());
        self
    }

    pub fn repo_checks(&self) -> Vec<(OwnerKind, String)> {
        self.repo_checks.lock().unwrap().clone()
    }
}

fn not_found(what: &str, id: &str) -> MigrationError {
    MigrationError::external(format!("GET {}", what), format!("'{}' not found", id))
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn get_resource(&self, id: &str, _region: &str) -> Result<ResourceDescriptor, MigrationError> {
        self.toolchain.clone().filter(|t| t.id == id).ok_or_else(|| not_found("toolchain", id))
    }

    async fn list_tool_bindings(&self, _resource_id: &str, _region: &str) -> Result<Vec<ToolBinding>, MigrationError> {
        Ok(self.tools.clone())
    }

    async fn get_pipeline_graph(&self, tool_id: &str, _region: &str) -> Result<PipelineGraph, MigrationError> {
        self.pipelines.iter().find(|p| p.id == tool_id).cloned().ok_or_else(|| not_found("pipeline", tool_id))
    }

    async fn find_by_name(&self, name: &str, scope: &Scope) -> Result<Vec<ResourceDescriptor>, MigrationError> {
        Ok(self
            .existing
            .iter()
            .filter(|d| d.name == name)
            .filter(|d| match scope {
                Scope::Region(r) => &d.region == r,
                Scope::ResourceGroup(g) => &d.resource_group_id == g,
            })
            .cloned()
            .collect())
    }

    async fn resolve_resource_group(&self, name_or_id: &str) -> Result<ResourceGroup, MigrationError> {
        self.resource_groups
            .iter()
            .find(|g| g.id == name_or_id || g.name == name_or_id)
            .cloned()
            .ok_or_else(|| not_found("resource group", name_or_id))
    }

    async fn get_repo_oauth_token(&self, _region: &str, _provider_id: &str) -> Result<String, MigrationError> {
        match &self.authorize_url {
            Some(url) => Err(MigrationError::AuthRequired { authorize_url: url.clone() }),
            None => Ok("token".to_string()),
        }
    }

    async fn check_repo_exists(&self, region: &str, owner_kind: OwnerKind, path: &RepoPath) -> Result<bool, MigrationError> {
        self.get_repo_oauth_token(region, "hostedgit").await?;
        self.repo_checks.lock().unwrap().push((owner_kind, path.path()));
        let url = path.full_url(region);
        if self.failing_repos.contains(&url) {
            return Err(MigrationError::external("GRIT lookup", "500 Internal Server Error"));
        }
        let repos = match owner_kind {
            OwnerKind::Group => &self.group_repos,
            OwnerKind::User => &self.user_repos,
        };
        Ok(repos.contains(&url))
    }
}

pub fn tool(id: &str, kind: &str, name: &str) -> ToolBinding {
    ToolBinding {
        id: id.to_string(),
        tool_type_id: kind.to_string(),
        name: Some(name.to_string()),
        parameters: serde_json::Map::new(),
    }
}

impl ToolBinding {
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        self
    }
}

/// One definition, no pipeline properties, `triggers` triggers named
/// `trigger-N` with `props` properties `prop-M` each.
pub fn pipeline_graph(id: &str, triggers: usize, props: usize) -> PipelineGraph {
    PipelineGraph {
        id: id.to_string(),
        definitions: vec![PipelineDefinition { id: "def-0".to_string() }],
        properties: Vec::new(),
        triggers: (0..triggers)
            .map(|t| PipelineTrigger {
                id: format!("trigger-{}", t),
                name: format!("trigger {}", t),
                properties: (0..props)
                    .map(|p| PipelineProperty { name: format!("prop-{}", p) })
                    .collect(),
            })
            .collect(),
    }
}

/// Answers prompts from a script. Running out of text answers is an error;
/// confirmations fall back to the prompt's default.
#[derive(Default)]
pub struct ScriptedPrompter {
    texts: Mutex<VecDeque<String>>,
    confirms: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn with_texts<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { texts: Mutex::new(answers.into_iter().map(Into::into).collect()), ..Default::default() }
    }

    pub fn with_confirms(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.confirms.lock().unwrap().extend(answers);
        self
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn text(&self, prompt: &str, _help: Option<&str>) -> Result<String, MigrationError> {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.texts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| MigrationError::external("Prompt failed", format!("no scripted answer for '{}'", prompt)))
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, MigrationError> {
        self.asked.lock().unwrap().push(prompt.to_string());
        Ok(self.confirms.lock().unwrap().pop_front().unwrap_or(default))
    }
}

/// `plan` writes the configured text to the requested file; everything else
/// returns canned values. Every call is recorded by name.
#[derive(Default)]
pub struct FakeRunner {
    generated: String,
    added: usize,
    state: Vec<String>,
    outputs: BTreeMap<String, serde_json::Value>,
    failing_apply: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn generating(config: &str) -> Self {
        Self { generated: config.to_string(), ..Default::default() }
    }

    pub fn adding(mut self, added: usize) -> Self {
        self.added = added;
        self
    }

    pub fn with_state(mut self, addresses: &[&str]) -> Self {
        self.state = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_output(mut self, name: &str, value: &str) -> Self {
        self.outputs.insert(name.to_string(), serde_json::Value::String(value.to_string()));
        self
    }

    pub fn failing_apply(mut self) -> Self {
        self.failing_apply = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl IaCRunner for FakeRunner {
    async fn init(&self, _dir: &Path) -> Result<(), MigrationError> {
        self.record("init");
        Ok(())
    }

    async fn plan_with_config_generation(&self, dir: &Path, out_file: &str) -> Result<String, MigrationError> {
        self.record("plan");
        fs::write(dir.join(out_file), &self.generated).map_err(|e| MigrationError::io("Failed to write generated config", e))?;
        Ok(self.generated.clone())
    }

    async fn apply(&self, _dir: &Path, _target: Option<&str>) -> Result<usize, MigrationError> {
        self.record("apply");
        if self.failing_apply {
            return Err(MigrationError::external("terraform apply failed", "Error: 403 Forbidden"));
        }
        Ok(self.added)
    }

    async fn list_state(&self, _dir: &Path) -> Result<Vec<String>, MigrationError> {
        self.record("state");
        Ok(self.state.clone())
    }

    async fn read_outputs(&self, _dir: &Path) -> Result<BTreeMap<String, serde_json::Value>, MigrationError> {
        self.record("output");
        Ok(self.outputs.clone())
    }
}
