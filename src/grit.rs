//! GRIT (IBM hosted git) repository URL handling: the operator supplied
//! old-to-new URL mapping file, its validation, and the remediation pass that
//! points every GRIT integration at a repository in the target region.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use futures::future::join_all;
use crate::catalog::{DEFINITION_TYPE, GRIT_TYPE, TRIGGER_TYPE};
use crate::cloud::{CloudClient, OwnerKind};
use crate::document::{AttributeMap, IntermediateDocument, Value};
use crate::error::{MigrationError, ResourceFailure};
use crate::importer::IdIndex;
use crate::prompt::Prompter;
use crate::rewriter::url_region_rewrite;
use crate::validate::{grit_url_prefix, validate_repo_url, RepoPath};

const REPO_URL_FIELDS: &[&str] = &["initialization.repo_url", "parameters.repo_url"];
const SOURCE_URL_FIELD: &str = "source.properties.url";
const SOURCE_TOOL_FIELD: &str = "source.properties.tool.id";

/// Old repository URL -> new repository URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GritUrlMapping {
    source: String,
    entries: BTreeMap<String, String>,
}

impl GritUrlMapping {
    /// Reads a JSON (`.json`) or YAML object of `old: new` pairs.
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let content = fs::read_to_string(path)
            .map_err(|e| MigrationError::io(format!("Failed to read mapping file '{}'", path.display()), e))?;
        let source = path.display().to_string();
        let is_json = path.extension().map_or(false, |e| e.eq_ignore_ascii_case("json"));
        let entries: BTreeMap<String, String> = if is_json {
            serde_json::from_str(&content).map_err(|e| MigrationError::Codec { file: source.clone(), message: e.to_string() })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| MigrationError::Codec { file: source.clone(), message: e.to_string() })?
        };
        Ok(Self::from_entries(source, entries))
    }

    pub fn from_entries(source: impl Into<String>, entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            source: source.into(),
            entries: entries.into_iter().map(|(k, v)| (k.trim().to_string(), v.trim().to_string())).collect(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn get(&self, old_url: &str) -> Option<&str> {
        self.entries.get(old_url).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    /// Target URLs claimed by more than one old URL, with the old URLs.
    pub fn duplicate_targets(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut by_target: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (old, new) in &self.entries {
            by_target.entry(new.as_str()).or_default().push(old.as_str());
        }
        by_target.retain(|_, olds| olds.len() > 1);
        by_target
    }

    /// Number of entries whose target was already claimed by an earlier entry.
    pub fn excess_duplicates(&self) -> usize {
        self.duplicate_targets().values().map(|olds| olds.len() - 1).sum()
    }
}

/// Checks `path` under a group namespace first, then under a user namespace.
pub async fn repo_exists(cloud: &dyn CloudClient, region: &str, path: &RepoPath) -> Result<bool, MigrationError> {
    let first = OwnerKind::Group;
    match cloud.check_repo_exists(region, first, path).await {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(e @ MigrationError::AuthRequired { .. }) => return Err(e),
        Err(e) => tracing::debug!(path = %path.path(), error = %e, "group lookup failed, trying user namespace"),
    }
    cloud.check_repo_exists(region, first.other(), path).await
}

/// Validates a mapping file: targets must be unique, every entry must be a
/// well-formed GRIT URL for its region, and every target must exist.
/// Existence checks run concurrently and all of them complete before the
/// result is reported.
pub async fn validate_mapping(
    mapping: &GritUrlMapping,
    source_region: &str,
    target_region: &str,
    cloud: &dyn CloudClient,
    max_reported: usize,
) -> Result<(), MigrationError> {
    let duplicates = mapping.duplicate_targets();
    if !duplicates.is_empty() {
        for (target, olds) in duplicates.iter().take(max_reported) {
            tracing::error!(url = %target, sources = ?olds, "several repositories map to the same target");
        }
        return Err(MigrationError::Conflict {
            message: format!("'{}' maps several repositories to the same target URL", mapping.source()),
            count: mapping.excess_duplicates(),
        });
    }

    let mut failures: Vec<String> = Vec::new();
    let mut to_check: Vec<(String, RepoPath)> = Vec::new();
    for (old, new) in mapping.iter() {
        if let Err(e) = validate_repo_url(old, source_region, true) {
            failures.push(e.to_string());
            continue;
        }
        match validate_repo_url(new, target_region, true) {
            Ok(path) => to_check.push((new.clone(), path)),
            Err(e) => failures.push(e.to_string()),
        }
    }

    let checks = to_check.iter().map(|(_, path)| repo_exists(cloud, target_region, path));
    let results = join_all(checks).await;
    for ((url, _), result) in to_check.iter().zip(results) {
        match result {
            Ok(true) => {}
            Ok(false) => failures.push(format!("repository {} does not exist", url)),
            Err(e @ MigrationError::AuthRequired { .. }) => return Err(e),
            Err(e) => failures.push(format!("could not check {}: {}", url, e)),
        }
    }

    if failures.is_empty() {
        tracing::info!(entries = mapping.len(), "mapping file is valid");
        return Ok(());
    }
    for failure in failures.iter().take(max_reported) {
        tracing::error!("{}", failure);
    }
    if failures.len() > max_reported {
        tracing::error!("... and {} more", failures.len() - max_reported);
    }
    Err(MigrationError::InvalidMapping { file: mapping.source().to_string(), count: failures.len() })
}

/// One GRIT integration's repository change.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryMove {
    pub old_url: String,
    pub new_url: String,
}

/// Result of [`GritRemediator::run`].
#[derive(Debug, Default)]
pub struct GritOutcome {
    /// GRIT local name -> move, for every integration retargeted in this run.
    pub moved: BTreeMap<String, RepositoryMove>,
    /// Source-region URL -> number of GRIT integrations that used it.
    pub source_url_owners: HashMap<String, usize>,
    pub failures: Vec<ResourceFailure>,
}

/// Retargets the repository URL of every GRIT integration. Mapping entries
/// win, then the region-rewritten URL if that repository exists, then the
/// operator's answer. Per-resource problems are collected, not raised.
pub struct GritRemediator<'a> {
    cloud: &'a dyn CloudClient,
    prompter: &'a dyn Prompter,
    mapping: Option<&'a GritUrlMapping>,
    source_region: &'a str,
    target_region: &'a str,
    interactive: bool,
    claimed: HashSet<String>,
    outcome: GritOutcome,
}

enum Resolution {
    Replace(String),
    Keep(String),
}

impl<'a> GritRemediator<'a> {
    pub fn new(
        cloud: &'a dyn CloudClient,
        prompter: &'a dyn Prompter,
        mapping: Option<&'a GritUrlMapping>,
        source_region: &'a str,
        target_region: &'a str,
        interactive: bool,
    ) -> Self {
        Self {
            cloud,
            prompter,
            mapping,
            source_region,
            target_region,
            interactive,
            claimed: HashSet::new(),
            outcome: GritOutcome::default(),
        }
    }

    /// Only [`MigrationError::Cancelled`] and [`MigrationError::AuthRequired`]
    /// abort the pass.
    pub async fn run(mut self, doc: &mut IntermediateDocument) -> Result<GritOutcome, MigrationError> {
        // URLs that already point at the target region are claimed up front so
        // a second pass cannot hand them out again.
        let target_prefix = grit_url_prefix(self.target_region);
        for (_, attrs) in doc.resources_of(GRIT_TYPE) {
            if let Some(url) = repo_url(attrs) {
                if url.starts_with(&target_prefix) {
                    self.claimed.insert(url.to_string());
                }
            }
        }

        for name in doc.names_of(GRIT_TYPE) {
            let Some(old_url) = doc.get(GRIT_TYPE, &name).and_then(repo_url).map(String::from) else {
                continue;
            };
            if old_url.starts_with(&target_prefix) {
                continue;
            }
            *self.outcome.source_url_owners.entry(old_url.clone()).or_default() += 1;
            let address = format!("{}.{}", GRIT_TYPE, name);

            match self.resolve(&address, &old_url).await {
                Ok(Resolution::Replace(new_url)) => {
                    if let Some(attrs) = doc.get_mut(GRIT_TYPE, &name) {
                        for field in REPO_URL_FIELDS {
                            if attrs.get_optional(field).is_some() {
                                attrs.set(field, Value::string(new_url.clone()));
                            }
                        }
                    }
                    tracing::info!(resource = %address, from = %old_url, to = %new_url, "repository URL rewritten");
                    self.outcome.moved.insert(name.clone(), RepositoryMove { old_url, new_url });
                }
                Ok(Resolution::Keep(reason)) => {
                    self.outcome.failures.push(ResourceFailure::new(address, reason));
                }
                Err(e @ (MigrationError::Cancelled | MigrationError::AuthRequired { .. })) => return Err(e),
                Err(e) => {
                    tracing::warn!(resource = %address, error = %e, "repository URL left unchanged");
                    self.outcome.failures.push(ResourceFailure::new(address, e));
                }
            }
        }
        Ok(self.outcome)
    }

    async fn resolve(&mut self, address: &str, old_url: &str) -> Result<Resolution, MigrationError> {
        if let Some(mapped) = self.mapping.and_then(|m| m.get(old_url)) {
            let mapped = mapped.to_string();
            validate_repo_url(&mapped, self.target_region, true)?;
            if !self.claim(&mapped) {
                return Err(MigrationError::Conflict {
                    message: format!("{} is already used by another integration", mapped),
                    count: 1,
                });
            }
            return Ok(Resolution::Replace(mapped));
        }

        if let Some(candidate) = url_region_rewrite(old_url, self.source_region, self.target_region) {
            let path = validate_repo_url(&candidate, self.target_region, true)?;
            let exists = repo_exists(self.cloud, self.target_region, &path).await?;
            if exists && self.claim(&candidate) {
                return Ok(Resolution::Replace(candidate));
            }
            tracing::debug!(resource = %address, candidate = %candidate, exists, "region-rewritten repository not usable");
        }

        if !self.interactive {
            return Ok(Resolution::Keep(format!("no repository found for {} in {}", old_url, self.target_region)));
        }
        self.ask(address, old_url)
    }

    fn ask(&mut self, address: &str, old_url: &str) -> Result<Resolution, MigrationError> {
        let prompt = format!("Repository in {} for {} ({})", self.target_region, address, old_url);
        loop {
            let answer = self.prompter.text(&prompt, Some("<namespace>/<project>, leave empty to keep the current URL"))?;
            if answer.is_empty() {
                return Ok(Resolution::Keep("left unchanged by operator".to_string()));
            }
            let path = match validate_repo_url(&answer, self.target_region, false) {
                Ok(p) => p,
                Err(e) => {
                    println!("⚠️  {}", e);
                    continue;
                }
            };
            let url = path.full_url(self.target_region);
            if self.claim(&url) {
                return Ok(Resolution::Replace(url));
            }
            println!("⚠️  {} is already used by another integration", url);
        }
    }

    /// Check-and-insert in one step: true when `url` was not claimed before.
    fn claim(&mut self, url: &str) -> bool {
        self.claimed.insert(url.to_string())
    }
}

fn repo_url(attrs: &AttributeMap) -> Option<&str> {
    REPO_URL_FIELDS.iter().find_map(|f| attrs.get_str(f))
}

/// Points pipeline definitions and triggers at the new URL of the GRIT
/// integration they clone from. The integration is found through
/// `source.properties.tool.id`, either a reference or a live id in `index`.
/// Unbound sources fall back to URL matching when exactly one integration
/// used that URL. Returns the number of fields rewritten.
pub fn rewrite_source_urls(doc: &mut IntermediateDocument, outcome: &GritOutcome, index: &IdIndex) -> usize {
    if outcome.moved.is_empty() {
        return 0;
    }
    let by_old_url: HashMap<&str, &str> = outcome
        .moved
        .values()
        .filter(|m| outcome.source_url_owners.get(&m.old_url) == Some(&1))
        .map(|m| (m.old_url.as_str(), m.new_url.as_str()))
        .collect();
    let mut rewritten = 0;
    for resource_type in [DEFINITION_TYPE, TRIGGER_TYPE] {
        for (_, attrs) in doc.resources_of_mut(resource_type) {
            let Some(current) = attrs.get_str(SOURCE_URL_FIELD) else { continue };
            let replacement = match bound_integration(attrs, index) {
                Some(owner) => outcome.moved.get(&owner).filter(|m| m.old_url == current).map(|m| m.new_url.clone()),
                None => by_old_url.get(current).map(|u| u.to_string()),
            };
            if let Some(url) = replacement {
                attrs.set(SOURCE_URL_FIELD, Value::String(url));
                rewritten += 1;
            }
        }
    }
    rewritten
}

/// Local name of the GRIT integration a definition or trigger is bound to.
fn bound_integration(attrs: &AttributeMap, index: &IdIndex) -> Option<String> {
    match attrs.get_optional(SOURCE_TOOL_FIELD)? {
        Value::Reference(r) => {
            let rest = r.strip_prefix(GRIT_TYPE)?.strip_prefix('.')?;
            rest.split('.').next().map(String::from)
        }
        Value::String(id) => index.resolve(id, |t| t == GRIT_TYPE).map(|e| e.local_name.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCloud, ScriptedPrompter};

    const OLD: &str = "https://ca-tor.git.cloud.ibm.com/team/proj.git";
    const NEW: &str = "https://eu-gb.git.cloud.ibm.com/team/proj.git";

    fn grit_doc(urls: &[(&str, &str)]) -> IntermediateDocument {
        let mut doc = IntermediateDocument::new();
        for (name, url) in urls {
            let mut attrs = AttributeMap::new();
            attrs.set("initialization.repo_url", Value::string(*url));
            attrs.set("parameters.repo_url", Value::string(*url));
            doc.insert(GRIT_TYPE, name, attrs).unwrap();
        }
        doc
    }

    fn url_of<'d>(doc: &'d IntermediateDocument, name: &str) -> Option<&'d str> {
        doc.get(GRIT_TYPE, name).and_then(|a| a.get_str("parameters.repo_url"))
    }

    #[test]
    fn duplicate_targets_count_beyond_the_first() {
        let target = "https://eu-gb.git.cloud.ibm.com/a/b.git";
        let mapping = GritUrlMapping::from_entries(
            "map.yaml",
            [
                ("https://ca-tor.git.cloud.ibm.com/a/b.git".to_string(), target.to_string()),
                ("https://ca-tor.git.cloud.ibm.com/c/d.git".to_string(), target.to_string()),
                ("https://ca-tor.git.cloud.ibm.com/e/f.git".to_string(), "https://eu-gb.git.cloud.ibm.com/e/f.git".to_string()),
            ],
        );
        assert_eq!(mapping.excess_duplicates(), 1);
        assert_eq!(mapping.duplicate_targets().get(target).map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn two_entries_with_one_target_fail_with_count_one() {
        let target = "https://eu-gb.git.cloud.ibm.com/a/b.git";
        let mapping = GritUrlMapping::from_entries(
            "map.yaml",
            [
                ("https://ca-tor.git.cloud.ibm.com/a/b.git".to_string(), target.to_string()),
                ("https://ca-tor.git.cloud.ibm.com/x/y.git".to_string(), target.to_string()),
            ],
        );
        let cloud = FakeCloud::default().with_group_repo(target);
        let err = validate_mapping(&mapping, "ca-tor", "eu-gb", &cloud, 5).await.unwrap_err();
        assert!(matches!(err, MigrationError::Conflict { count: 1, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn all_bad_entries_are_counted() {
        let mapping = GritUrlMapping::from_entries(
            "map.json",
            [
                ("https://ca-tor.git.cloud.ibm.com/a/b.git".to_string(), "https://eu-gb.git.cloud.ibm.com/a/b.git".to_string()),
                ("https://ca-tor.git.cloud.ibm.com/c/d.git".to_string(), "https://eu-gb.git.cloud.ibm.com/c/d.git".to_string()),
                ("not a url".to_string(), "https://eu-gb.git.cloud.ibm.com/e/f.git".to_string()),
                ("https://ca-tor.git.cloud.ibm.com/g/h.git".to_string(), "https://eu-gb.git.cloud.ibm.com/g/h.git".to_string()),
            ],
        );
        let cloud = FakeCloud::default()
            .with_group_repo("https://eu-gb.git.cloud.ibm.com/a/b.git")
            .with_user_repo("https://eu-gb.git.cloud.ibm.com/g/h.git");
        let err = validate_mapping(&mapping, "ca-tor", "eu-gb", &cloud, 1).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMapping { count: 2, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn valid_mapping_passes() {
        let mapping = GritUrlMapping::from_entries("m.yaml", [(OLD.to_string(), NEW.to_string())]);
        let cloud = FakeCloud::default().with_user_repo(NEW);
        validate_mapping(&mapping, "ca-tor", "eu-gb", &cloud, 5).await.unwrap();
    }

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("map.yaml");
        fs::write(&yaml, format!("\"{}\": \"{}\"\n", OLD, NEW)).unwrap();
        let json = dir.path().join("map.json");
        fs::write(&json, format!("{{\"{}\": \"{}\"}}", OLD, NEW)).unwrap();

        assert_eq!(GritUrlMapping::load(&yaml).unwrap().get(OLD), Some(NEW));
        assert_eq!(GritUrlMapping::load(&json).unwrap().get(OLD), Some(NEW));
    }

    #[tokio::test]
    async fn existing_region_rewrite_is_accepted_and_recorded() {
        let mut doc = grit_doc(&[("repo_ab12", OLD)]);
        let cloud = FakeCloud::default().with_group_repo(NEW);
        let prompter = ScriptedPrompter::default();

        let outcome = GritRemediator::new(&cloud, &prompter, None, "ca-tor", "eu-gb", true)
            .run(&mut doc)
            .await
            .unwrap();

        assert_eq!(url_of(&doc, "repo_ab12"), Some(NEW));
        assert_eq!(doc.get(GRIT_TYPE, "repo_ab12").unwrap().get_str("initialization.repo_url"), Some(NEW));
        assert_eq!(
            outcome.moved.get("repo_ab12"),
            Some(&RepositoryMove { old_url: OLD.to_string(), new_url: NEW.to_string() })
        );
        assert!(outcome.failures.is_empty());
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn user_namespace_is_tried_after_group() {
        let mut doc = grit_doc(&[("repo_ab12", OLD)]);
        let cloud = FakeCloud::default().with_user_repo(NEW);
        let prompter = ScriptedPrompter::default();
        GritRemediator::new(&cloud, &prompter, None, "ca-tor", "eu-gb", true).run(&mut doc).await.unwrap();
        assert_eq!(url_of(&doc, "repo_ab12"), Some(NEW));
        assert_eq!(cloud.repo_checks(), vec![(OwnerKind::Group, "team/proj".to_string()), (OwnerKind::User, "team/proj".to_string())]);
    }

    #[tokio::test]
    async fn mapping_entries_take_precedence() {
        let mapped = "https://eu-gb.git.cloud.ibm.com/elsewhere/proj.git";
        let mut doc = grit_doc(&[("repo_ab12", OLD)]);
        let mapping = GritUrlMapping::from_entries("m.yaml", [(OLD.to_string(), mapped.to_string())]);
        let cloud = FakeCloud::default().with_group_repo(NEW);
        let prompter = ScriptedPrompter::default();

        let outcome = GritRemediator::new(&cloud, &prompter, Some(&mapping), "ca-tor", "eu-gb", true)
            .run(&mut doc)
            .await
            .unwrap();
        assert_eq!(url_of(&doc, "repo_ab12"), Some(mapped));
        assert!(cloud.repo_checks().is_empty());
        assert_eq!(outcome.moved.len(), 1);
    }

    #[tokio::test]
    async fn second_claim_on_the_same_target_falls_back_to_the_operator() {
        // Two integrations in the source region point at the same repository.
        let mut doc = grit_doc(&[("a_0001", OLD), ("b_0002", OLD)]);
        let cloud = FakeCloud::default().with_group_repo(NEW);
        let prompter = ScriptedPrompter::with_texts(["bad//path", "team/proj", "team/proj-copy"]);

        let outcome = GritRemediator::new(&cloud, &prompter, None, "ca-tor", "eu-gb", true)
            .run(&mut doc)
            .await
            .unwrap();

        assert_eq!(url_of(&doc, "a_0001"), Some(NEW));
        assert_eq!(url_of(&doc, "b_0002"), Some("https://eu-gb.git.cloud.ibm.com/team/proj-copy.git"));
        assert_eq!(prompter.asked().len(), 3);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn failures_are_collected_and_later_resources_still_processed() {
        let other_old = "https://ca-tor.git.cloud.ibm.com/team/other.git";
        let other_new = "https://eu-gb.git.cloud.ibm.com/team/other.git";
        let mut doc = grit_doc(&[("a_0001", OLD), ("b_0002", other_old)]);
        let cloud = FakeCloud::default().with_group_repo(other_new).with_failing_repo(NEW);
        let prompter = ScriptedPrompter::default();

        let outcome = GritRemediator::new(&cloud, &prompter, None, "ca-tor", "eu-gb", false)
            .run(&mut doc)
            .await
            .unwrap();

        assert_eq!(url_of(&doc, "a_0001"), Some(OLD));
        assert_eq!(url_of(&doc, "b_0002"), Some(other_new));
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].resource.ends_with("a_0001"));
    }

    #[tokio::test]
    async fn empty_answer_keeps_the_url() {
        let mut doc = grit_doc(&[("a_0001", OLD)]);
        let cloud = FakeCloud::default();
        let prompter = ScriptedPrompter::with_texts([""]);
        let outcome = GritRemediator::new(&cloud, &prompter, None, "ca-tor", "eu-gb", true)
            .run(&mut doc)
            .await
            .unwrap();
        assert_eq!(url_of(&doc, "a_0001"), Some(OLD));
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.moved.is_empty());
    }

    #[tokio::test]
    async fn auth_required_aborts_the_pass() {
        let mut doc = grit_doc(&[("a_0001", OLD)]);
        let cloud = FakeCloud::default().requiring_auth("https://cloud.ibm.com/authorize");
        let prompter = ScriptedPrompter::default();
        let err = GritRemediator::new(&cloud, &prompter, None, "ca-tor", "eu-gb", true)
            .run(&mut doc)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::AuthRequired { .. }));
    }

    #[tokio::test]
    async fn already_migrated_urls_are_left_alone() {
        let mut doc = grit_doc(&[("a_0001", NEW)]);
        let cloud = FakeCloud::default();
        let prompter = ScriptedPrompter::default();
        let outcome = GritRemediator::new(&cloud, &prompter, None, "ca-tor", "eu-gb", true)
            .run(&mut doc)
            .await
            .unwrap();
        assert!(outcome.moved.is_empty() && outcome.failures.is_empty());
        assert!(cloud.repo_checks().is_empty());
    }

    fn source(doc: &mut IntermediateDocument, resource_type: &str, name: &str, url: &str, tool: Option<Value>) {
        let mut attrs = AttributeMap::new();
        attrs.set(SOURCE_URL_FIELD, Value::string(url));
        if let Some(tool) = tool {
            attrs.set(SOURCE_TOOL_FIELD, tool);
        }
        doc.insert(resource_type, name, attrs).unwrap();
    }

    fn source_url<'d>(doc: &'d IntermediateDocument, resource_type: &str, name: &str) -> Option<&'d str> {
        doc.get(resource_type, name).and_then(|a| a.get_str(SOURCE_URL_FIELD))
    }

    #[test]
    fn unbound_source_urls_follow_a_unique_move() {
        let mut doc = IntermediateDocument::new();
        source(&mut doc, DEFINITION_TYPE, "d", OLD, None);
        source(&mut doc, TRIGGER_TYPE, "t", "https://github.com/x/y", None);

        let outcome = GritOutcome {
            moved: BTreeMap::from([(
                "a_0001".to_string(),
                RepositoryMove { old_url: OLD.to_string(), new_url: NEW.to_string() },
            )]),
            source_url_owners: HashMap::from([(OLD.to_string(), 1)]),
            failures: Vec::new(),
        };
        assert_eq!(rewrite_source_urls(&mut doc, &outcome, &IdIndex::default()), 1);
        assert_eq!(source_url(&doc, DEFINITION_TYPE, "d"), Some(NEW));
        assert_eq!(source_url(&doc, TRIGGER_TYPE, "t"), Some("https://github.com/x/y"));
    }

    #[tokio::test]
    async fn integrations_sharing_a_url_keep_their_own_sources() {
        let copy = "https://eu-gb.git.cloud.ibm.com/team/proj-copy.git";
        let mut doc = grit_doc(&[("a_0001", OLD), ("b_0002", OLD)]);
        source(&mut doc, DEFINITION_TYPE, "def_a", OLD, Some(Value::reference(GRIT_TYPE, "a_0001", "tool_id")));
        source(&mut doc, TRIGGER_TYPE, "trig_b", OLD, Some(Value::string("live-b")));
        source(&mut doc, TRIGGER_TYPE, "trig_free", OLD, None);
        let mut index = IdIndex::default();
        index.insert("live-b", GRIT_TYPE, "b_0002", "tool_id");

        let cloud = FakeCloud::default().with_group_repo(NEW);
        let prompter = ScriptedPrompter::with_texts(["team/proj-copy"]);
        let outcome = GritRemediator::new(&cloud, &prompter, None, "ca-tor", "eu-gb", true)
            .run(&mut doc)
            .await
            .unwrap();

        assert_eq!(outcome.moved.len(), 2);
        assert_eq!(outcome.source_url_owners.get(OLD), Some(&2));
        assert_eq!(rewrite_source_urls(&mut doc, &outcome, &index), 2);
        assert_eq!(source_url(&doc, DEFINITION_TYPE, "def_a"), url_of(&doc, "a_0001"));
        assert_eq!(source_url(&doc, DEFINITION_TYPE, "def_a"), Some(NEW));
        assert_eq!(source_url(&doc, TRIGGER_TYPE, "trig_b"), Some(copy));
        // Two integrations used the URL, so an unbound trigger cannot be placed.
        assert_eq!(source_url(&doc, TRIGGER_TYPE, "trig_free"), Some(OLD));
    }
}
