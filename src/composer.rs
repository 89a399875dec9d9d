//! Turns the generated draft into the files written for the target region.
//!
//! The passes run in a fixed order over a normalized document: legacy git
//! conversion, foreign key rewiring, toolchain overrides, trigger disabling,
//! dependency edges, GRIT URL remediation, integration property rewiring and
//! finally secret remediation. Every pass checks the current value before
//! touching it, so running the whole sequence on already rewritten input
//! leaves it unchanged.

use std::fs;
use std::path::{Path, PathBuf};
use crate::catalog::{
    is_secret_reference, is_tool_type, secret_fields, CONSOLIDATED_GIT_TYPE, DEFINITION_TYPE, FILE_TYPE_PREFIX, GRIT_TYPE,
    LEGACY_GIT_TYPE, PIPELINE_TOOL_TYPE, PROPERTY_TYPE, TEKTON_PIPELINE_TYPE, TOOLCHAIN_TYPE, TRIGGER_PROPERTY_TYPE,
    TRIGGER_TYPE,
};
use crate::cloud::CloudClient;
use crate::codec::{self, DeclarativeCodec};
use crate::document::{IntermediateDocument, Value};
use crate::error::{MigrationError, ResourceFailure, ValidationError};
use crate::grit::{rewrite_source_urls, GritRemediator, GritUrlMapping};
use crate::importer::IdIndex;
use crate::names::NameGenerator;
use crate::prompt::Prompter;
use crate::rewriter::{apply_rules, convert_legacy_integrations, LegacyConversion, RewriteRule};

pub const COMPACT_FILE_STEM: &str = "resources";
pub const PROVIDER_FILE: &str = "provider.tf";
pub const VARIABLES_FILE: &str = "variables.tf";
pub const OUTPUTS_FILE: &str = "outputs.tf";

const FOREIGN_KEYS: &[&str] = &["toolchain_id", "pipeline_id", "trigger_id", "worker.id", "source.properties.tool.id"];
const TOOL_REFERENCE_FIELD: &str = "source.properties.tool.id";

/// A secret-bearing field whose live value could not be carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonSecretRef {
    pub resource_name: String,
    pub property_name: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub name: String,
    pub contents: String,
}

#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    pub source_region: String,
    pub target_region: String,
    pub new_name: Option<String>,
    pub tags: Vec<String>,
    pub resource_group_id: Option<String>,
    pub disable_triggers: bool,
    pub compact: bool,
    pub interactive: bool,
    pub provider_version: String,
}

#[derive(Debug, Default)]
pub struct Composition {
    pub document: IntermediateDocument,
    /// GRIT integrations first.
    pub files: Vec<OutputFile>,
    pub non_secret_refs: Vec<NonSecretRef>,
    pub failures: Vec<ResourceFailure>,
    pub unapplied: Vec<RewriteRule>,
    pub converted_integrations: usize,
    pub moved_repositories: usize,
}

pub struct ExportComposer<'a> {
    pub cloud: &'a dyn CloudClient,
    pub prompter: &'a dyn Prompter,
    pub codec: &'a dyn DeclarativeCodec,
    pub mapping: Option<&'a GritUrlMapping>,
    pub options: &'a ComposeOptions,
}

impl<'a> ExportComposer<'a> {
    pub async fn compose(
        &self,
        mut doc: IntermediateDocument,
        index: &mut IdIndex,
        conversion: &mut LegacyConversion,
        toolchain_name: &str,
        names: &mut NameGenerator,
    ) -> Result<Composition, MigrationError> {
        let opts = self.options;
        let mut composition = Composition::default();

        doc.normalize();

        let fresh = convert_legacy_integrations(&mut doc, names);
        for (old, new) in &fresh.by_local_name {
            index.retarget(LEGACY_GIT_TYPE, old, CONSOLIDATED_GIT_TYPE, new, "tool_id");
        }
        composition.converted_integrations = fresh.synthesized.len();
        conversion.absorb(fresh);
        let conversion = &*conversion;

        let rules = foreign_key_rules(&doc, index);
        let mut unapplied = apply_rules(&mut doc, &rules);
        unapplied.extend(apply_rules(&mut doc, &toolchain_override_rules(toolchain_name, opts)));
        if opts.disable_triggers {
            let rules = trigger_disable_rules(&doc);
            unapplied.extend(apply_rules(&mut doc, &rules));
        }
        let rules = dependency_edge_rules(&doc, conversion);
        unapplied.extend(apply_rules(&mut doc, &rules));

        let grit = GritRemediator::new(
            self.cloud,
            self.prompter,
            self.mapping,
            &opts.source_region,
            &opts.target_region,
            opts.interactive,
        )
        .run(&mut doc)
        .await?;
        let moved = rewrite_source_urls(&mut doc, &grit, index);
        tracing::debug!(repositories = grit.moved.len(), source_urls = moved, "GRIT remediation done");
        composition.moved_repositories = grit.moved.len();
        composition.failures.extend(grit.failures);

        let rules = integration_property_rules(&doc, index);
        unapplied.extend(apply_rules(&mut doc, &rules));

        let extension = self.codec.extension();
        composition.non_secret_refs = remediate_secrets(&mut doc, conversion, |t| file_name_for(t, opts.compact, extension));
        composition.files = render_files(&doc, self.codec, opts, toolchain_name)?;
        composition.unapplied = unapplied;
        composition.document = doc;
        Ok(composition)
    }
}

fn is_toolchain(t: &str) -> bool {
    t == TOOLCHAIN_TYPE
}

fn is_pipeline_tool(t: &str) -> bool {
    t == PIPELINE_TOOL_TYPE
}

fn is_tekton_pipeline(t: &str) -> bool {
    t == TEKTON_PIPELINE_TYPE
}

fn is_trigger(t: &str) -> bool {
    t == TRIGGER_TYPE
}

/// Which owner types a foreign key on `resource_type` may point at.
fn owner_filter(resource_type: &str, field: &str) -> fn(&str) -> bool {
    match field {
        "toolchain_id" => is_toolchain,
        "pipeline_id" if resource_type == TEKTON_PIPELINE_TYPE => is_pipeline_tool,
        "pipeline_id" => is_tekton_pipeline,
        "trigger_id" => is_trigger,
        _ => is_tool_type,
    }
}

/// Literal live ids in foreign key fields become references to the owner's
/// output attribute.
pub fn foreign_key_rules(doc: &IntermediateDocument, index: &IdIndex) -> Vec<RewriteRule> {
    let mut rules = Vec::new();
    for resource_type in doc.resource_types() {
        for (name, attrs) in doc.resources_of(resource_type) {
            for field in FOREIGN_KEYS {
                let Some(id) = attrs.get_str(field) else { continue };
                let Some(owner) = index.resolve(id, owner_filter(resource_type, field)) else { continue };
                if owner.resource_type == *resource_type && owner.local_name == *name {
                    continue;
                }
                rules.push(RewriteRule::ReferenceInjection {
                    resource_type: resource_type.clone(),
                    target_name: name.clone(),
                    field: field.to_string(),
                    referenced_type: owner.resource_type.clone(),
                    referenced_name: owner.local_name.clone(),
                    referenced_field: Some(owner.output_field.clone()),
                });
            }
        }
    }
    rules
}

/// Operator requested name, tags and resource group for the toolchain.
pub fn toolchain_override_rules(toolchain_name: &str, opts: &ComposeOptions) -> Vec<RewriteRule> {
    let over = |field: &str, value: Value| RewriteRule::PropertyOverride {
        resource_type: TOOLCHAIN_TYPE.to_string(),
        target_name: Some(toolchain_name.to_string()),
        field: field.to_string(),
        value,
    };
    let mut rules = Vec::new();
    if let Some(name) = &opts.new_name {
        rules.push(over("name", Value::string(name.clone())));
    }
    if !opts.tags.is_empty() {
        rules.push(over("tags", Value::List(opts.tags.iter().cloned().map(Value::String).collect())));
    }
    if let Some(rg) = &opts.resource_group_id {
        rules.push(over("resource_group_id", Value::string(rg.clone())));
    }
    rules
}

/// Disables every trigger that fires on its own. Manual triggers stay as they are.
pub fn trigger_disable_rules(doc: &IntermediateDocument) -> Vec<RewriteRule> {
    doc.resources_of(TRIGGER_TYPE)
        .filter(|(_, attrs)| attrs.get_str("type") != Some("manual"))
        .filter(|(_, attrs)| attrs.get("enabled") != Some(&Value::Bool(false)))
        .map(|(name, _)| RewriteRule::PropertyOverride {
            resource_type: TRIGGER_TYPE.to_string(),
            target_name: Some(name.clone()),
            field: "enabled".to_string(),
            value: Value::Bool(false),
        })
        .collect()
}

/// `depends_on` edges from definitions and triggers to the consolidated git
/// integration they clone from. Existing edges are never replaced.
pub fn dependency_edge_rules(doc: &IntermediateDocument, conversion: &LegacyConversion) -> Vec<RewriteRule> {
    if conversion.is_empty() {
        return Vec::new();
    }
    let mut rules = Vec::new();
    for resource_type in [DEFINITION_TYPE, TRIGGER_TYPE] {
        for (name, attrs) in doc.resources_of(resource_type) {
            let has_edge = match attrs.get("depends_on") {
                Some(Value::List(items)) => !items.is_empty(),
                Some(v) => !v.is_null(),
                None => false,
            };
            if has_edge {
                continue;
            }
            let owner = match attrs.get_optional(TOOL_REFERENCE_FIELD) {
                Some(Value::Reference(r)) => conversion.owner_of_reference(r),
                Some(Value::String(id)) => conversion.by_tool_id.get(id).map(String::as_str),
                _ => None,
            };
            if let Some(owner) = owner {
                rules.push(RewriteRule::depends_on(resource_type, name, CONSOLIDATED_GIT_TYPE, owner));
            }
        }
    }
    rules
}

/// Integration-typed pipeline properties hold a tool id as their value.
pub fn integration_property_rules(doc: &IntermediateDocument, index: &IdIndex) -> Vec<RewriteRule> {
    let mut rules = Vec::new();
    for resource_type in [PROPERTY_TYPE, TRIGGER_PROPERTY_TYPE] {
        for (name, attrs) in doc.resources_of(resource_type) {
            if attrs.get_str("type") != Some("integration") {
                continue;
            }
            let Some(owner) = attrs.get_str("value").and_then(|id| index.resolve(id, is_tool_type)) else {
                continue;
            };
            rules.push(RewriteRule::ReferenceInjection {
                resource_type: resource_type.to_string(),
                target_name: name.clone(),
                field: "value".to_string(),
                referenced_type: owner.resource_type.clone(),
                referenced_name: owner.local_name.clone(),
                referenced_field: Some(owner.output_field.clone()),
            });
        }
    }
    rules
}

/// Blanks secret-bearing fields that do not hold a vault reference and
/// records each one. The PAT of a converted legacy integration is kept.
pub fn remediate_secrets(
    doc: &mut IntermediateDocument,
    conversion: &LegacyConversion,
    file_for: impl Fn(&str) -> String,
) -> Vec<NonSecretRef> {
    let mut refs = Vec::new();
    let types: Vec<String> = doc.resource_types().cloned().collect();
    for resource_type in types {
        let is_property = resource_type == PROPERTY_TYPE || resource_type == TRIGGER_PROPERTY_TYPE;
        for (name, attrs) in doc.resources_of_mut(&resource_type) {
            let mut fields: Vec<&str> = secret_fields(&resource_type).to_vec();
            if is_property && attrs.get_str("type") == Some("secure") {
                fields.push("value");
            }
            for field in fields {
                if resource_type == CONSOLIDATED_GIT_TYPE && field == "parameters.api_token" && conversion.is_synthesized(name) {
                    continue;
                }
                let Some(value) = attrs.get_str(field) else { continue };
                if value.is_empty() || is_secret_reference(value) {
                    continue;
                }
                attrs.set(field, Value::string(""));
                refs.push(NonSecretRef {
                    resource_name: format!("{}.{}", resource_type, name),
                    property_name: field.to_string(),
                    file_name: file_for(&resource_type),
                });
            }
        }
    }
    refs
}

/// `toolchain_tool_hostedgit.tf` for split output, `resources.tf` for compact.
pub fn file_name_for(resource_type: &str, compact: bool, extension: &str) -> String {
    if compact {
        return format!("{}.{}", COMPACT_FILE_STEM, extension);
    }
    let stem = resource_type.strip_prefix(FILE_TYPE_PREFIX).unwrap_or(resource_type);
    format!("{}.{}", stem, extension)
}

fn file_rank(resource_type: &str) -> u8 {
    match resource_type {
        GRIT_TYPE => 0,
        CONSOLIDATED_GIT_TYPE => 1,
        _ => 2,
    }
}

pub fn render_files(
    doc: &IntermediateDocument,
    codec: &dyn DeclarativeCodec,
    opts: &ComposeOptions,
    toolchain_name: &str,
) -> Result<Vec<OutputFile>, MigrationError> {
    let mut files = Vec::new();
    if opts.compact {
        files.push(OutputFile {
            name: file_name_for("", true, codec.extension()),
            contents: codec.serialize(doc)?,
        });
    } else {
        let mut parts = doc.clone().split_by_type();
        parts.sort_by(|(a, _), (b, _)| file_rank(a).cmp(&file_rank(b)).then_with(|| a.cmp(b)));
        for (resource_type, part) in parts {
            files.push(OutputFile {
                name: file_name_for(&resource_type, false, codec.extension()),
                contents: codec.serialize(&part)?,
            });
        }
    }

    files.push(OutputFile {
        name: PROVIDER_FILE.to_string(),
        contents: codec::provider_file(&opts.target_region, &opts.provider_version)?,
    });
    files.push(OutputFile { name: VARIABLES_FILE.to_string(), contents: codec::variables_file()? });
    files.push(OutputFile {
        name: OUTPUTS_FILE.to_string(),
        contents: codec::outputs_file(&format!("{}.{}", TOOLCHAIN_TYPE, toolchain_name))?,
    });
    Ok(files)
}

/// Makes sure `dir` holds nothing from an earlier run before files are
/// written and applied there. A non-empty directory is refused unless
/// `overwrite` is set, in which case its contents are removed.
pub fn prepare_output_dir(dir: &Path, overwrite: bool) -> Result<(), MigrationError> {
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(MigrationError::io(format!("Failed to read '{}'", dir.display()), e)),
    };
    if entries.next().is_none() {
        return Ok(());
    }
    if !overwrite {
        return Err(ValidationError::new(
            "output directory",
            &dir.display().to_string(),
            "not empty, pass --overwrite to replace its contents or choose another --output-dir",
        )
        .into());
    }
    tracing::info!(dir = %dir.display(), "removing previous output");
    fs::remove_dir_all(dir).map_err(|e| MigrationError::io(format!("Failed to clear '{}'", dir.display()), e))
}

/// Writes `files` into `dir`, creating it when needed.
pub fn write_files(dir: &Path, files: &[OutputFile]) -> Result<Vec<PathBuf>, MigrationError> {
    fs::create_dir_all(dir).map_err(|e| MigrationError::io(format!("Failed to create '{}'", dir.display()), e))?;
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let path = dir.join(&file.name);
        fs::write(&path, &file.contents).map_err(|e| MigrationError::io(format!("Failed to write '{}'", path.display()), e))?;
        written.push(path);
    }
    Ok(written)
}
