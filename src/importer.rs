//! Snapshot of a live toolchain: walks toolchain -> tools -> Tekton pipeline
//! graph, names every node, and has the IaC runner generate draft
//! configuration for the resulting import blocks.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use futures::future::join_all;
use crate::catalog::{
    tool_resource_type, DEFINITION_TYPE, LEGACY_GIT_KIND, LEGACY_GIT_TYPE, PIPELINE_TOOL_TYPE, PROPERTY_TYPE,
    TEKTON_PIPELINE_TYPE, TOOLCHAIN_TYPE, TRIGGER_PROPERTY_TYPE, TRIGGER_TYPE,
};
use crate::cloud::{CloudClient, PipelineGraph, ResourceDescriptor, ToolBinding};
use crate::codec::{self, DeclarativeCodec, HclCodec};
use crate::document::{AttributeMap, IntermediateDocument, Value};
use crate::error::{MigrationError, ResourceFailure};
use crate::iac::IaCRunner;
use crate::names::NameGenerator;
use crate::rewriter::LEGACY_TOOL_ID_FIELD;

pub const PROVIDER_FILE: &str = "provider.tf";
pub const IMPORT_FILE: &str = "import.tf";
pub const GENERATED_FILE: &str = "generated.tf";

/// Binds a live id to the local name it gets in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDirective {
    pub external_id: String,
    pub local_name: String,
    pub resource_type: String,
}

impl ImportDirective {
    fn new(resource_type: &str, local_name: &str, external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            local_name: local_name.to_string(),
            resource_type: resource_type.to_string(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.local_name)
    }
}

/// The resource that owns a live id, and the attribute that exposes the id
/// once the resource is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub resource_type: String,
    pub local_name: String,
    pub output_field: String,
}

/// Live id -> owning resources. A Tekton pipeline shares its id with the
/// pipeline tool, so one id may have several owners of different types.
#[derive(Debug, Clone, Default)]
pub struct IdIndex {
    entries: HashMap<String, Vec<IndexEntry>>,
}

impl IdIndex {
    pub fn insert(&mut self, external_id: &str, resource_type: &str, local_name: &str, output_field: &str) {
        self.entries.entry(external_id.to_string()).or_default().push(IndexEntry {
            resource_type: resource_type.to_string(),
            local_name: local_name.to_string(),
            output_field: output_field.to_string(),
        });
    }

    /// First owner of `external_id` whose type passes `accept`.
    pub fn resolve(&self, external_id: &str, accept: impl Fn(&str) -> bool) -> Option<&IndexEntry> {
        self.entries.get(external_id)?.iter().find(|e| accept(&e.resource_type))
    }

    /// Points every entry owned by `old_type.old_name` at a new resource.
    pub fn retarget(&mut self, old_type: &str, old_name: &str, new_type: &str, new_name: &str, new_field: &str) {
        for entry in self.entries.values_mut().flatten() {
            if entry.resource_type == old_type && entry.local_name == old_name {
                entry.resource_type = new_type.to_string();
                entry.local_name = new_name.to_string();
                entry.output_field = new_field.to_string();
            }
        }
    }
}

/// Everything learned about the live toolchain.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub toolchain: ResourceDescriptor,
    pub toolchain_name: String,
    /// Parent-before-child order.
    pub directives: Vec<ImportDirective>,
    pub index: IdIndex,
    /// Resources with no import support, built from live data instead.
    pub synthesized: IntermediateDocument,
    pub skipped: Vec<ResourceFailure>,
}

impl Snapshot {
    /// Resources the draft is expected to contain.
    pub fn planned(&self) -> usize {
        self.directives.len() + self.synthesized.len()
    }
}

/// Reads the toolchain graph and assigns local names.
pub async fn collect(
    cloud: &dyn CloudClient,
    toolchain_id: &str,
    region: &str,
    names: &mut NameGenerator,
) -> Result<Snapshot, MigrationError> {
    let toolchain = cloud.get_resource(toolchain_id, region).await?;
    let mut snapshot = Snapshot::default();

    let tc_name = names.generate(&toolchain.name);
    snapshot.directives.push(ImportDirective::new(TOOLCHAIN_TYPE, &tc_name, &toolchain.id));
    snapshot.index.insert(&toolchain.id, TOOLCHAIN_TYPE, &tc_name, "id");
    snapshot.toolchain_name = tc_name.clone();

    let tools = cloud.list_tool_bindings(&toolchain.id, region).await?;
    tracing::info!(toolchain = %toolchain.name, tools = tools.len(), "read toolchain");

    let mut tekton: Vec<(&ToolBinding, String)> = Vec::new();
    for tool in &tools {
        if tool.tool_type_id == LEGACY_GIT_KIND {
            let name = names.generate(tool.display_name());
            let draft = legacy_draft(tool, &toolchain.id);
            if snapshot.synthesized.insert(LEGACY_GIT_TYPE, &name, draft).is_ok() {
                snapshot.index.insert(&tool.id, LEGACY_GIT_TYPE, &name, "tool_id");
            }
            continue;
        }

        let Some(resource_type) = tool_resource_type(&tool.tool_type_id) else {
            tracing::warn!(tool = %tool.display_name(), kind = %tool.tool_type_id, "tool type cannot be migrated, skipping");
            snapshot.skipped.push(ResourceFailure::new(
                format!("{} ({})", tool.display_name(), tool.id),
                format!("unsupported tool type '{}'", tool.tool_type_id),
            ));
            continue;
        };

        let name = names.generate(tool.display_name());
        snapshot
            .directives
            .push(ImportDirective::new(&resource_type, &name, format!("{}/{}", toolchain.id, tool.id)));
        snapshot.index.insert(&tool.id, &resource_type, &name, "tool_id");

        if resource_type == PIPELINE_TOOL_TYPE {
            if tool.parameter_str("type") == Some("tekton") {
                tekton.push((tool, name));
            } else {
                tracing::warn!(tool = %tool.display_name(), "classic pipeline, only the tool binding is migrated");
            }
        }
    }

    // Pipeline graphs are independent of each other, fetch them together.
    let graphs = join_all(tekton.iter().map(|(tool, _)| cloud.get_pipeline_graph(&tool.id, region))).await;
    for ((tool, name), graph) in tekton.iter().zip(graphs) {
        match graph {
            Ok(graph) => add_pipeline(&mut snapshot, &graph, name, names),
            Err(e) => {
                tracing::warn!(pipeline = %tool.display_name(), error = %e, "could not read pipeline");
                snapshot.skipped.push(ResourceFailure::new(format!("{}.{}", TEKTON_PIPELINE_TYPE, name), e));
            }
        }
    }

    snapshot.toolchain = toolchain;
    Ok(snapshot)
}

fn add_pipeline(snapshot: &mut Snapshot, graph: &PipelineGraph, pipeline_name: &str, names: &mut NameGenerator) {
    let p = &graph.id;
    snapshot.directives.push(ImportDirective::new(TEKTON_PIPELINE_TYPE, pipeline_name, p));
    snapshot.index.insert(p, TEKTON_PIPELINE_TYPE, pipeline_name, "pipeline_id");

    for def in &graph.definitions {
        let name = names.generate("definition");
        snapshot.directives.push(ImportDirective::new(DEFINITION_TYPE, &name, format!("{}/{}", p, def.id)));
        snapshot.index.insert(&def.id, DEFINITION_TYPE, &name, "definition_id");
    }
    for prop in &graph.properties {
        let name = names.generate(&prop.name);
        snapshot.directives.push(ImportDirective::new(PROPERTY_TYPE, &name, format!("{}/{}", p, prop.name)));
    }
    for trigger in &graph.triggers {
        let name = names.generate(&trigger.name);
        snapshot.directives.push(ImportDirective::new(TRIGGER_TYPE, &name, format!("{}/{}", p, trigger.id)));
        snapshot.index.insert(&trigger.id, TRIGGER_TYPE, &name, "trigger_id");
        for prop in &trigger.properties {
            let prop_name = names.generate(&prop.name);
            snapshot.directives.push(ImportDirective::new(
                TRIGGER_PROPERTY_TYPE,
                &prop_name,
                format!("{}/{}/{}", p, trigger.id, prop.name),
            ));
        }
    }
}

/// The provider has no import for legacy git integrations, so their draft is
/// built from the live parameters.
fn legacy_draft(tool: &ToolBinding, toolchain_id: &str) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    attrs.insert("toolchain_id", Value::string(toolchain_id));
    attrs.insert(LEGACY_TOOL_ID_FIELD, Value::string(tool.id.clone()));
    if let Some(name) = tool.name.as_deref().filter(|n| !n.is_empty()) {
        attrs.insert("name", Value::string(name));
    }
    let parameters = Value::from(serde_json::Value::Object(tool.parameters.clone()));
    if let Some(map) = parameters.as_block() {
        attrs.insert("parameters", Value::Block(map.clone()));
    }
    attrs
}

/// Writes `provider.tf` and `import.tf` into the working directory.
pub fn write_import_files(dir: &Path, snapshot: &Snapshot, region: &str, provider_version: &str) -> Result<(), MigrationError> {
    let provider = codec::provider_file(region, provider_version)?;
    let variables = codec::variables_file()?;
    write(dir, PROVIDER_FILE, &format!("{}\n{}", provider, variables))?;

    let imports = codec::import_file(snapshot.directives.iter().map(|d| (d.address(), d.external_id.as_str())))?;
    write(dir, IMPORT_FILE, &imports)
}

/// Runs config generation in `dir` and parses the result. Synthesized
/// resources are merged in.
pub async fn generate_draft(runner: &dyn IaCRunner, dir: &Path, snapshot: &Snapshot) -> Result<IntermediateDocument, MigrationError> {
    runner.init(dir).await?;
    let raw = runner.plan_with_config_generation(dir, GENERATED_FILE).await?;
    let mut draft = HclCodec.parse(GENERATED_FILE, &raw)?;

    for clash in draft.merge(snapshot.synthesized.clone()) {
        tracing::warn!(resource = %clash, "synthesized resource clashes with generated configuration");
    }
    if draft.len() < snapshot.planned() {
        tracing::warn!(planned = snapshot.planned(), generated = draft.len(), "some imported resources are missing from the draft");
    }
    Ok(draft)
}

fn write(dir: &Path, file: &str, content: &str) -> Result<(), MigrationError> {
    let path = dir.join(file);
    fs::write(&path, content).map_err(|e| MigrationError::io(format!("Failed to write '{}'", path.display()), e))
}
