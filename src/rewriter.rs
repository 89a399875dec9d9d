//! Rule-driven rewriting of an [`IntermediateDocument`] and the conversion of
//! legacy git integrations into the consolidated integration type.

use std::collections::{HashMap, HashSet};
use url::Url;
use crate::catalog::{CONSOLIDATED_GIT_TYPE, LEGACY_GIT_TYPE};
use crate::document::{AttributeMap, IntermediateDocument, Value};
use crate::names::NameGenerator;

/// Attribute carrying the live tool id on a synthesized legacy draft resource.
pub const LEGACY_TOOL_ID_FIELD: &str = "tool_id";

const LEGACY_GIT_ID: &str = "integrated";

#[derive(Debug, Clone, PartialEq)]
pub enum RewriteRule {
    /// Assigns `value` to `field`. List fields are appended to, skipping values
    /// already present. `target_name: None` targets every resource of the type.
    PropertyOverride {
        resource_type: String,
        target_name: Option<String>,
        field: String,
        value: Value,
    },
    /// Overwrites `field` with a reference to another resource. Without a
    /// `referenced_field` the value is a `depends_on` style list.
    ReferenceInjection {
        resource_type: String,
        target_name: String,
        field: String,
        referenced_type: String,
        referenced_name: String,
        referenced_field: Option<String>,
    },
    UrlRegionRewrite {
        resource_types: Vec<String>,
        field: String,
        source_region: String,
        target_region: String,
    },
}

impl RewriteRule {
    pub fn depends_on(resource_type: &str, target_name: &str, referenced_type: &str, referenced_name: &str) -> Self {
        RewriteRule::ReferenceInjection {
            resource_type: resource_type.to_string(),
            target_name: target_name.to_string(),
            field: "depends_on".to_string(),
            referenced_type: referenced_type.to_string(),
            referenced_name: referenced_name.to_string(),
            referenced_field: None,
        }
    }
}

/// Applies `rules` in order. Returns the rules that matched no resource.
pub fn apply_rules(doc: &mut IntermediateDocument, rules: &[RewriteRule]) -> Vec<RewriteRule> {
    let mut unapplied = Vec::new();
    for rule in rules {
        let applied = match rule {
            RewriteRule::PropertyOverride { resource_type, target_name, field, value } => {
                let mut hit = false;
                for (name, attrs) in doc.resources_of_mut(resource_type) {
                    if target_name.as_deref().map_or(true, |t| t == name.as_str()) {
                        override_field(attrs, field, value.clone());
                        hit = true;
                    }
                }
                hit
            }
            RewriteRule::ReferenceInjection { resource_type, target_name, field, referenced_type, referenced_name, referenced_field } => {
                match doc.get_mut(resource_type, target_name) {
                    Some(attrs) => {
                        let value = match referenced_field {
                            Some(f) => Value::reference(referenced_type, referenced_name, f),
                            None => Value::List(vec![Value::resource_reference(referenced_type, referenced_name)]),
                        };
                        attrs.set(field, value);
                        true
                    }
                    None => false,
                }
            }
            RewriteRule::UrlRegionRewrite { resource_types, field, source_region, target_region } => {
                let mut hit = false;
                for resource_type in resource_types {
                    for (_, attrs) in doc.resources_of_mut(resource_type) {
                        let rewritten = attrs
                            .get_str(field)
                            .and_then(|current| url_region_rewrite(current, source_region, target_region));
                        if let Some(url) = rewritten {
                            attrs.set(field, Value::String(url));
                            hit = true;
                        }
                    }
                }
                hit
            }
        };
        if !applied {
            tracing::debug!(?rule, "rewrite rule matched nothing");
            unapplied.push(rule.clone());
        }
    }
    unapplied
}

fn override_field(attrs: &mut AttributeMap, field: &str, value: Value) {
    if let Some(Value::List(existing)) = attrs.get_mut_optional(field) {
        let additions = match value {
            Value::List(items) => items,
            single => vec![single],
        };
        for item in additions {
            if !existing.contains(&item) {
                existing.push(item);
            }
        }
        return;
    }
    attrs.set(field, value);
}

/// Replaces the host label equal to `source_region` with `target_region`.
/// `None` when the value is not a URL or no label matches.
pub fn url_region_rewrite(value: &str, source_region: &str, target_region: &str) -> Option<String> {
    let mut url = Url::parse(value.trim()).ok()?;
    let host = url.host_str()?;
    let mut matched = false;
    let labels: Vec<&str> = host
        .split('.')
        .map(|label| {
            if label == source_region {
                matched = true;
                target_region
            } else {
                label
            }
        })
        .collect();
    if !matched {
        return None;
    }
    url.set_host(Some(&labels.join("."))).ok()?;
    Some(url.to_string())
}

/// Outcome of [`convert_legacy_integrations`].
#[derive(Debug, Default, Clone)]
pub struct LegacyConversion {
    /// Live tool id of the legacy integration -> consolidated local name.
    pub by_tool_id: HashMap<String, String>,
    /// Legacy local name -> consolidated local name.
    pub by_local_name: HashMap<String, String>,
    /// Consolidated resources created here. Their PAT is carried over as is.
    pub synthesized: HashSet<String>,
}

impl LegacyConversion {
    pub fn is_empty(&self) -> bool {
        self.synthesized.is_empty()
    }

    /// Folds the result of a later conversion run into this one.
    pub fn absorb(&mut self, other: LegacyConversion) {
        self.by_tool_id.extend(other.by_tool_id);
        self.by_local_name.extend(other.by_local_name);
        self.synthesized.extend(other.synthesized);
    }

    pub fn is_synthesized(&self, local_name: &str) -> bool {
        self.synthesized.contains(local_name)
    }

    /// Reference string prefix of a synthesized resource, e.g.
    /// `ibm_cd_toolchain_tool_githubconsolidated.repo_ab12.`
    pub fn owner_of_reference(&self, reference: &str) -> Option<&str> {
        let rest = reference.strip_prefix(CONSOLIDATED_GIT_TYPE)?.strip_prefix('.')?;
        let name = rest.split('.').next()?;
        self.synthesized.get(name).map(String::as_str)
    }
}

/// Replaces every legacy git integration with a consolidated one under a
/// freshly generated local name. Safe to run on an already converted document.
pub fn convert_legacy_integrations(doc: &mut IntermediateDocument, names: &mut NameGenerator) -> LegacyConversion {
    let mut conversion = LegacyConversion::default();
    let Some(legacy) = doc.remove_type(LEGACY_GIT_TYPE) else {
        return conversion;
    };

    let existing: Vec<String> = doc.resource_types().flat_map(|t| doc.names_of(t)).collect();
    for name in &existing {
        names.reserve(name);
    }

    for (old_name, attrs) in legacy {
        let human = attrs.get_str("name").unwrap_or("github");
        let new_name = names.generate(human);
        let consolidated = consolidate(&attrs);

        if doc.insert(CONSOLIDATED_GIT_TYPE, &new_name, consolidated).is_err() {
            tracing::warn!(name = %new_name, "consolidated git integration name already taken, skipping");
            continue;
        }
        if let Some(tool_id) = attrs.get_str(LEGACY_TOOL_ID_FIELD) {
            conversion.by_tool_id.insert(tool_id.to_string(), new_name.clone());
        }
        tracing::info!(from = %old_name, to = %new_name, "converted legacy git integration");
        conversion.by_local_name.insert(old_name, new_name.clone());
        conversion.synthesized.insert(new_name);
    }
    conversion
}

fn consolidate(legacy: &AttributeMap) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    for key in ["toolchain_id", "name"] {
        if let Some(v) = legacy.get(key) {
            attrs.insert(key, v.clone());
        }
    }

    attrs.set("initialization.type", Value::string("link"));
    attrs.set("initialization.git_id", Value::string(LEGACY_GIT_ID));
    if let Some(repo) = legacy.get_optional("parameters.repo_url") {
        attrs.set("initialization.repo_url", repo.clone());
    }
    if let Some(owner) = legacy.get_optional("parameters.owner_id") {
        attrs.set("initialization.owner_id", owner.clone());
    }

    attrs.set("parameters.git_id", Value::string(LEGACY_GIT_ID));
    for flag in ["enable_traceability", "has_issues"] {
        if let Some(v) = legacy.get_optional(&format!("parameters.{}", flag)) {
            attrs.set(&format!("parameters.{}", flag), v.clone());
        }
    }

    let is_pat = legacy.get_str("parameters.auth_type") == Some("pat");
    if is_pat {
        attrs.set("parameters.auth_type", Value::string("pat"));
        if let Some(token) = legacy.get_optional("parameters.api_token") {
            attrs.set("parameters.api_token", token.clone());
        }
    } else {
        attrs.set("parameters.auth_type", Value::string("oauth"));
    }
    attrs
}
