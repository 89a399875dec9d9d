//! Static knowledge about IBM Cloud Continuous Delivery resources: resource
//! type names, supported tool kinds, secret-bearing fields and regions.

use std::sync::OnceLock;
use regex::Regex;

pub const TOOLCHAIN_TYPE: &str = "ibm_cd_toolchain";
pub const TOOL_TYPE_PREFIX: &str = "ibm_cd_toolchain_tool_";
pub const PIPELINE_TOOL_TYPE: &str = "ibm_cd_toolchain_tool_pipeline";
pub const TEKTON_PIPELINE_TYPE: &str = "ibm_cd_tekton_pipeline";
pub const DEFINITION_TYPE: &str = "ibm_cd_tekton_pipeline_definition";
pub const PROPERTY_TYPE: &str = "ibm_cd_tekton_pipeline_property";
pub const TRIGGER_TYPE: &str = "ibm_cd_tekton_pipeline_trigger";
pub const TRIGGER_PROPERTY_TYPE: &str = "ibm_cd_tekton_pipeline_trigger_property";

pub const GRIT_TYPE: &str = "ibm_cd_toolchain_tool_hostedgit";
pub const CONSOLIDATED_GIT_TYPE: &str = "ibm_cd_toolchain_tool_githubconsolidated";
pub const LEGACY_GIT_TYPE: &str = "ibm_cd_toolchain_tool_githubintegrated";
pub const LEGACY_GIT_KIND: &str = "github_integrated";

/// Prefix stripped from resource types when naming split output files.
pub const FILE_TYPE_PREFIX: &str = "ibm_cd_";

pub const GRIT_HOST_SUFFIX: &str = "git.cloud.ibm.com";

pub const TARGET_REGIONS: &[&str] = &[
    "au-syd", "br-sao", "ca-mon", "ca-tor", "eu-de", "eu-es", "eu-gb",
    "jp-osa", "jp-tok", "us-east", "us-south",
];

/// Live `tool_type_id` values that have an IaC resource, with the resource
/// type suffix the provider uses for them.
const SUPPORTED_TOOLS: &[(&str, &str)] = &[
    ("appconfig", "appconfig"),
    ("artifactory", "artifactory"),
    ("bitbucketgit", "bitbucketgit"),
    ("private_worker", "privateworker"),
    ("draservicebroker", "devopsinsights"),
    ("eventnotifications", "eventnotifications"),
    ("githubconsolidated", "githubconsolidated"),
    ("gitlab", "gitlab"),
    ("hashicorpvault", "hashicorpvault"),
    ("hostedgit", "hostedgit"),
    ("jenkins", "jenkins"),
    ("jira", "jira"),
    ("keyprotect", "keyprotect"),
    ("nexus", "nexus"),
    ("customtool", "custom"),
    ("pagerduty", "pagerduty"),
    ("saucelabs", "saucelabs"),
    ("secretsmanager", "secretsmanager"),
    ("security_compliance", "securitycompliance"),
    ("slack", "slack"),
    ("sonarqube", "sonarqube"),
    ("pipeline", "pipeline"),
];

pub fn tool_resource_type(tool_type_id: &str) -> Option<String> {
    SUPPORTED_TOOLS
        .iter()
        .find(|(kind, _)| *kind == tool_type_id)
        .map(|(_, suffix)| format!("{}{}", TOOL_TYPE_PREFIX, suffix))
}

pub fn is_tool_type(resource_type: &str) -> bool {
    resource_type.starts_with(TOOL_TYPE_PREFIX)
}

/// Secret-bearing attribute paths per resource type.
pub fn secret_fields(resource_type: &str) -> &'static [&'static str] {
    match resource_type {
        "ibm_cd_toolchain_tool_artifactory" => &["parameters.token"],
        "ibm_cd_toolchain_tool_bitbucketgit" | "ibm_cd_toolchain_tool_gitlab" | CONSOLIDATED_GIT_TYPE | GRIT_TYPE => {
            &["parameters.api_token"]
        }
        "ibm_cd_toolchain_tool_hashicorpvault" => &["parameters.token", "parameters.role_id", "parameters.secret_id", "parameters.password"],
        "ibm_cd_toolchain_tool_jenkins" => &["parameters.api_token"],
        "ibm_cd_toolchain_tool_jira" => &["parameters.api_token"],
        "ibm_cd_toolchain_tool_nexus" => &["parameters.token"],
        "ibm_cd_toolchain_tool_pagerduty" => &["parameters.service_key"],
        "ibm_cd_toolchain_tool_privateworker" => &["parameters.worker_queue_credentials"],
        "ibm_cd_toolchain_tool_saucelabs" => &["parameters.key"],
        "ibm_cd_toolchain_tool_securitycompliance" => &["parameters.api_key"],
        "ibm_cd_toolchain_tool_slack" => &["parameters.webhook"],
        "ibm_cd_toolchain_tool_sonarqube" => &["parameters.user_password"],
        TRIGGER_TYPE => &["secret.value"],
        _ => &[],
    }
}

/// True when `value` points into a vault instead of carrying plaintext.
pub fn is_secret_reference(value: &str) -> bool {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"^\{vault::[^}]+\}$",
            r"^ref://[^\s]+$",
            r"^crn:v1:[a-z-]+:[a-z-]+:secrets-manager:[a-z0-9-]+:[^\s]+$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    });
    let trimmed = value.trim();
    patterns.iter().any(|re| re.is_match(trimmed))
}

pub fn is_valid_region(region: &str) -> bool {
    TARGET_REGIONS.contains(&region)
}

/// Path segments GRIT reserves for its own routes. A project may not use them.
pub const RESERVED_PROJECT_NAMES: &[&str] = &[
    "-", "badges", "blame", "blob", "builds", "commits", "create", "create_dir", "edit",
    "environments", "files", "find_file", "new", "preview", "raw", "refs", "tree",
    "update", "wikis",
];

/// Path segments GRIT reserves at namespace level.
pub const RESERVED_NAMESPACE_NAMES: &[&str] = &[
    "-", ".well-known", "404.html", "422.html", "500.html", "502.html", "503.html",
    "admin", "api", "apple-touch-icon.png", "assets", "dashboard", "deploy.html",
    "explore", "favicon.ico", "favicon.png", "files", "groups", "health_check", "help",
    "import", "jwt", "login", "oauth", "profile", "projects", "public", "robots.txt",
    "s", "search", "sitemap", "sitemap.xml", "sitemap.xml.gz", "slash-command-logo.png",
    "snippets", "unsubscribes", "uploads", "users", "v2",
];
