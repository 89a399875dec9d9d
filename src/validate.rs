use std::sync::OnceLock;
use regex::Regex;
use crate::catalog::{GRIT_HOST_SUFFIX, RESERVED_NAMESPACE_NAMES, RESERVED_PROJECT_NAMES};
use crate::error::ValidationError;

const MAX_NAME_LEN: usize = 128;
const MAX_TAG_LEN: usize = 128;

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
            .expect("static id pattern")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9 _.\-]{1,126}(?::[A-Za-z0-9 _.\-]{1,126})?$").expect("static tag pattern")
    })
}

fn consecutive_special_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-._/]{2,}").expect("static special-char pattern"))
}

fn is_plain_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | ' ')
}

/// Toolchain, tool and pipeline ids are version-4 UUIDs.
pub fn validate_id(s: &str) -> Result<String, ValidationError> {
    let trimmed = s.trim();
    if !id_regex().is_match(trimmed) {
        return Err(ValidationError::new("id", trimmed, "expected a 36 character version 4 UUID"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_name(s: &str) -> Result<String, ValidationError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("name", trimmed, "must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::new("name", trimmed, format!("must be at most {} characters", MAX_NAME_LEN)));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(is_plain_name_char(*c) || (!c.is_ascii() && !c.is_control())))
    {
        return Err(ValidationError::new(
            "name",
            trimmed,
            format!("character '{}' is not allowed, use letters, digits, spaces or -._", bad),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn validate_tag(s: &str) -> Result<String, ValidationError> {
    let trimmed = s.trim();
    if trimmed.chars().count() > MAX_TAG_LEN {
        return Err(ValidationError::new("tag", trimmed, format!("must be at most {} characters", MAX_TAG_LEN)));
    }
    if !tag_regex().is_match(trimmed) {
        return Err(ValidationError::new(
            "tag",
            trimmed,
            "use letters, digits, spaces or -._, with at most one ':' between two non-empty parts",
        ));
    }
    Ok(trimmed.to_string())
}

/// A GRIT repository location split into namespace and project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoPath {
    pub namespace: String,
    pub project: String,
}

impl RepoPath {
    pub fn path(&self) -> String {
        format!("{}/{}", self.namespace, self.project)
    }

    pub fn full_url(&self, region: &str) -> String {
        format!("{}{}.git", grit_url_prefix(region), self.path())
    }
}

pub fn grit_url_prefix(region: &str) -> String {
    format!("https://{}.{}/", region, GRIT_HOST_SUFFIX)
}

/// Syntactic check of a GRIT repository. With `require_full_url` the input must
/// be `https://{region}.git.cloud.ibm.com/<namespace>/<project>.git`, otherwise
/// it is the bare `<namespace>/<project>` path.
pub fn validate_repo_url(url: &str, region: &str, require_full_url: bool) -> Result<RepoPath, ValidationError> {
    let trimmed = url.trim();
    let mut rest = trimmed;

    if require_full_url {
        let prefix = grit_url_prefix(region);
        rest = rest.strip_prefix(prefix.as_str()).ok_or_else(|| {
            ValidationError::new("repository URL", trimmed, format!("must start with {}", prefix))
        })?;
        rest = rest
            .strip_suffix(".git")
            .ok_or_else(|| ValidationError::new("repository URL", trimmed, "must end with .git"))?;
    }

    let (namespace, project) = rest
        .rsplit_once('/')
        .ok_or_else(|| ValidationError::new("repository URL", trimmed, "expected <namespace>/<project>"))?;

    check_segment(trimmed, "namespace", namespace)?;
    check_segment(trimmed, "project", project)?;

    for part in namespace.split('/') {
        if RESERVED_NAMESPACE_NAMES.contains(&part.to_lowercase().as_str()) {
            return Err(ValidationError::new("repository URL", trimmed, format!("'{}' is a reserved namespace name", part)));
        }
    }
    if RESERVED_PROJECT_NAMES.contains(&project.to_lowercase().as_str()) {
        return Err(ValidationError::new("repository URL", trimmed, format!("'{}' is a reserved project name", project)));
    }
    if project.ends_with(".git") || project.ends_with(".atom") {
        return Err(ValidationError::new("repository URL", trimmed, "project name must not end in .git or .atom"));
    }

    Ok(RepoPath { namespace: namespace.to_string(), project: project.to_string() })
}

fn check_segment(full: &str, what: &str, segment: &str) -> Result<(), ValidationError> {
    let starts_ok = segment.chars().next().map_or(false, |c| c.is_ascii_alphanumeric());
    let ends_ok = segment.chars().last().map_or(false, |c| c.is_ascii_alphanumeric());
    if !starts_ok || !ends_ok {
        return Err(ValidationError::new(
            "repository URL",
            full,
            format!("{} '{}' must start and end with a letter or digit", what, segment),
        ));
    }
    if let Some(bad) = segment.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/'))) {
        return Err(ValidationError::new("repository URL", full, format!("{} contains '{}'", what, bad)));
    }
    if consecutive_special_regex().is_match(segment) {
        return Err(ValidationError::new(
            "repository URL",
            full,
            format!("{} '{}' contains consecutive special characters", what, segment),
        ));
    }
    Ok(())
}
