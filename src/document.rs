//! In-memory form of a set of declarative resource files.
//!
//! A document maps resource type to local name to an [`AttributeMap`]. Nested
//! blocks are kept apart from plain attribute values: a block that occurs once
//! is a [`Value::Block`], a block type that repeats is a
//! [`Value::RepeatedBlock`]. Lookups through nested blocks go through
//! [`AttributeMap::get_optional`], which reports absence instead of failing.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(hcl::Number),
    String(String),
    /// An expression evaluated at apply time, e.g. `ibm_cd_toolchain.tc_ab12.id`.
    Reference(String),
    List(Vec<Value>),
    /// An attribute whose value is an object literal (`x = { ... }`).
    Object(AttributeMap),
    Block(AttributeMap),
    RepeatedBlock(Vec<AttributeMap>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// `resource_type.local_name.field`
    pub fn reference(resource_type: &str, local_name: &str, field: &str) -> Self {
        Value::Reference(format!("{}.{}.{}", resource_type, local_name, field))
    }

    /// `resource_type.local_name`, the form `depends_on` entries take.
    pub fn resource_reference(resource_type: &str, local_name: &str) -> Self {
        Value::Reference(format!("{}.{}", resource_type, local_name))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&AttributeMap> {
        match self {
            Value::Block(map) | Value::Object(map) => Some(map),
            Value::RepeatedBlock(items) if items.len() == 1 => items.first(),
            _ => None,
        }
    }

    fn as_block_mut(&mut self) -> Option<&mut AttributeMap> {
        match self {
            Value::Block(map) | Value::Object(map) => Some(map),
            Value::RepeatedBlock(items) if items.len() == 1 => items.first_mut(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn normalize(&mut self) {
        match self {
            Value::RepeatedBlock(items) if items.len() == 1 => {
                let mut single = items.pop().unwrap_or_default();
                single.normalize();
                *self = Value::Block(single);
            }
            Value::RepeatedBlock(items) => items.iter_mut().for_each(AttributeMap::normalize),
            Value::Block(map) | Value::Object(map) => map.normalize(),
            Value::List(items) => items.iter_mut().for_each(Value::normalize),
            _ => {}
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Number(hcl::Number::from(i))
                } else if let Some(u) = n.as_u64() {
                    Value::Number(hcl::Number::from(u))
                } else {
                    n.as_f64().and_then(hcl::Number::from_f64).map(Value::Number).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                let mut attrs = AttributeMap::new();
                for (k, v) in map {
                    attrs.insert(k, Value::from(v));
                }
                Value::Object(attrs)
            }
        }
    }
}

/// Ordered attribute name to value mapping for one resource or nested block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    entries: hcl::Map<String, Value>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Looks up a dotted path such as `source.properties.url`. Nested blocks,
    /// objects and single-element repeated blocks are traversed.
    pub fn get_optional(&self, path: &str) -> Option<&Value> {
        match path.split_once('.') {
            None => self.entries.get(path),
            Some((head, tail)) => self.entries.get(head)?.as_block()?.get_optional(tail),
        }
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get_optional(path).and_then(Value::as_str)
    }

    pub fn get_mut_optional(&mut self, path: &str) -> Option<&mut Value> {
        match path.split_once('.') {
            None => self.entries.get_mut(path),
            Some((head, tail)) => self.entries.get_mut(head)?.as_block_mut()?.get_mut_optional(tail),
        }
    }

    /// Assigns `value` at a dotted path, creating intermediate blocks when missing.
    pub fn set(&mut self, path: &str, value: Value) {
        match path.split_once('.') {
            None => {
                self.entries.insert(path.to_string(), value);
            }
            Some((head, tail)) => {
                let child = self
                    .entries
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Block(AttributeMap::new()));
                if child.as_block_mut().is_none() {
                    *child = Value::Block(AttributeMap::new());
                }
                if let Some(map) = child.as_block_mut() {
                    map.set(tail, value);
                }
            }
        }
    }

    /// Collapses single-element repeated blocks into plain blocks, then drops
    /// null attributes at every depth.
    pub fn normalize(&mut self) {
        for value in self.entries.values_mut() {
            value.normalize();
        }
        self.entries.retain(|_, v| !v.is_null());
    }
}

impl FromIterator<(String, Value)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

/// resource type -> local name -> attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntermediateDocument {
    resources: BTreeMap<String, BTreeMap<String, AttributeMap>>,
}

impl IntermediateDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &String> {
        self.resources.keys()
    }

    pub fn resources_of(&self, resource_type: &str) -> impl Iterator<Item = (&String, &AttributeMap)> {
        self.resources.get(resource_type).into_iter().flat_map(|m| m.iter())
    }

    pub fn resources_of_mut(&mut self, resource_type: &str) -> impl Iterator<Item = (&String, &mut AttributeMap)> {
        self.resources.get_mut(resource_type).into_iter().flat_map(|m| m.iter_mut())
    }

    pub fn names_of(&self, resource_type: &str) -> Vec<String> {
        self.resources_of(resource_type).map(|(n, _)| n.clone()).collect()
    }

    pub fn get(&self, resource_type: &str, name: &str) -> Option<&AttributeMap> {
        self.resources.get(resource_type)?.get(name)
    }

    pub fn get_mut(&mut self, resource_type: &str, name: &str) -> Option<&mut AttributeMap> {
        self.resources.get_mut(resource_type)?.get_mut(name)
    }

    /// Inserts a resource. Local names are unique per type, so inserting over
    /// an existing name is refused and the attributes are handed back.
    pub fn insert(&mut self, resource_type: &str, name: &str, attrs: AttributeMap) -> Result<(), AttributeMap> {
        let by_name = self.resources.entry(resource_type.to_string()).or_default();
        if by_name.contains_key(name) {
            return Err(attrs);
        }
        by_name.insert(name.to_string(), attrs);
        Ok(())
    }

    pub fn remove_type(&mut self, resource_type: &str) -> Option<BTreeMap<String, AttributeMap>> {
        self.resources.remove(resource_type)
    }

    /// Number of resources across all types.
    pub fn len(&self) -> usize {
        self.resources.values().map(BTreeMap::len).sum()
    }

    pub fn normalize(&mut self) {
        for by_name in self.resources.values_mut() {
            for attrs in by_name.values_mut() {
                attrs.normalize();
            }
        }
    }

    /// Moves every resource of `other` into `self`. Name clashes are returned
    /// as `type.name` addresses and left out.
    pub fn merge(&mut self, other: IntermediateDocument) -> Vec<String> {
        let mut clashes = Vec::new();
        for (resource_type, by_name) in other.resources {
            for (name, attrs) in by_name {
                if self.insert(&resource_type, &name, attrs).is_err() {
                    clashes.push(format!("{}.{}", resource_type, name));
                }
            }
        }
        clashes
    }

    /// Splits the document into one document per resource type.
    pub fn split_by_type(self) -> Vec<(String, IntermediateDocument)> {
        self.resources
            .into_iter()
            .map(|(resource_type, by_name)| {
                let mut single = IntermediateDocument::new();
                single.resources.insert(resource_type.clone(), by_name);
                (resource_type, single)
            })
            .collect()
    }
}

impl fmt::Display for IntermediateDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (resource_type, by_name) in &self.resources {
            writeln!(f, "{}: {}", resource_type, by_name.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> AttributeMap {
        let mut props = AttributeMap::new();
        props.insert("url", Value::string("https://ca-tor.git.cloud.ibm.com/team/proj.git"));
        props.insert("branch", Value::Null);
        let mut source = AttributeMap::new();
        source.insert("type", Value::string("git"));
        source.insert("properties", Value::RepeatedBlock(vec![props]));
        let mut attrs = AttributeMap::new();
        attrs.insert("name", Value::string("on-push"));
        attrs.insert("source", Value::RepeatedBlock(vec![source]));
        attrs.insert("cron", Value::Null);
        attrs
    }

    #[test]
    fn normalize_collapses_and_strips() {
        let mut attrs = trigger();
        attrs.normalize();
        assert!(attrs.get("cron").is_none());
        assert!(matches!(attrs.get("source"), Some(Value::Block(_))));
        assert!(matches!(attrs.get_optional("source.properties"), Some(Value::Block(_))));
        assert!(attrs.get_optional("source.properties.branch").is_none());
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut doc = IntermediateDocument::new();
        doc.insert("ibm_cd_tekton_pipeline_trigger", "t1", trigger()).unwrap();
        let mut repeated = AttributeMap::new();
        repeated.insert("rule", Value::RepeatedBlock(vec![AttributeMap::new(), AttributeMap::new()]));
        doc.insert("ibm_cd_toolchain", "tc", repeated).unwrap();

        doc.normalize();
        let once = doc.clone();
        doc.normalize();
        assert_eq!(doc, once);
    }

    #[test]
    fn get_optional_reports_absence() {
        let attrs = trigger();
        assert_eq!(
            attrs.get_str("source.properties.url"),
            Some("https://ca-tor.git.cloud.ibm.com/team/proj.git")
        );
        assert!(attrs.get_optional("source.missing.url").is_none());
        assert!(attrs.get_optional("name.nested").is_none());
        assert!(attrs.get_optional("").is_none());
    }

    #[test]
    fn set_creates_intermediate_blocks() {
        let mut attrs = AttributeMap::new();
        attrs.set("worker.id", Value::reference("ibm_cd_toolchain_tool_privateworker", "w", "tool_id"));
        assert_eq!(
            attrs.get_optional("worker.id"),
            Some(&Value::Reference("ibm_cd_toolchain_tool_privateworker.w.tool_id".into()))
        );
    }

    #[test]
    fn insert_refuses_duplicate_local_names() {
        let mut doc = IntermediateDocument::new();
        doc.insert("ibm_cd_toolchain", "tc", AttributeMap::new()).unwrap();
        assert!(doc.insert("ibm_cd_toolchain", "tc", AttributeMap::new()).is_err());
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn json_parameters_become_objects() {
        let v = Value::from(serde_json::json!({"owner_id": "me", "enable_traceability": true, "n": 3}));
        let map = v.as_block().unwrap();
        assert_eq!(map.get_str("owner_id"), Some("me"));
        assert_eq!(map.get("enable_traceability"), Some(&Value::Bool(true)));
    }
}
