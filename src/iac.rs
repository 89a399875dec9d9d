//! Driving the `terraform`/`tofu` binary.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Output;
use std::sync::OnceLock;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use crate::error::MigrationError;

#[async_trait]
pub trait IaCRunner: Send + Sync {
    async fn init(&self, dir: &Path) -> Result<(), MigrationError>;
    /// Plans the import blocks in `dir`, writing generated configuration to
    /// `out_file` and returning its contents. A failing plan is tolerated as
    /// long as the file was written.
    async fn plan_with_config_generation(&self, dir: &Path, out_file: &str) -> Result<String, MigrationError>;
    /// Returns the number of resources added.
    async fn apply(&self, dir: &Path, target: Option<&str>) -> Result<usize, MigrationError>;
    async fn list_state(&self, dir: &Path) -> Result<Vec<String>, MigrationError>;
    async fn read_outputs(&self, dir: &Path) -> Result<BTreeMap<String, serde_json::Value>, MigrationError>;
}

/// Runs the configured binary. Credentials travel in `env`, never through
/// this process's own environment.
pub struct TerraformCli {
    tool: String,
    env: BTreeMap<String, String>,
}

impl TerraformCli {
    pub fn new(tool: impl Into<String>, env: BTreeMap<String, String>) -> Self {
        Self { tool: tool.into(), env }
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<Output, MigrationError> {
        tracing::debug!(tool = %self.tool, ?args, dir = %dir.display(), "running");
        Command::new(&self.tool)
            .args(args)
            .current_dir(dir)
            .envs(&self.env)
            .env("TF_IN_AUTOMATION", "1")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MigrationError::io(format!("Failed to execute {}", self.tool), e))
    }

    fn failure(&self, command: &str, output: &Output) -> MigrationError {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        MigrationError::external(format!("{} {} failed", self.tool, command), detail.trim())
    }
}

#[async_trait]
impl IaCRunner for TerraformCli {
    async fn init(&self, dir: &Path) -> Result<(), MigrationError> {
        let output = self.run(dir, &["init", "-input=false", "-no-color"]).await?;
        if !output.status.success() {
            return Err(self.failure("init", &output));
        }
        Ok(())
    }

    async fn plan_with_config_generation(&self, dir: &Path, out_file: &str) -> Result<String, MigrationError> {
        let flag = format!("-generate-config-out={}", out_file);
        let output = self.run(dir, &["plan", "-input=false", "-no-color", flag.as_str()]).await?;
        let generated = dir.join(out_file);

        if !output.status.success() {
            if !generated.exists() {
                return Err(self.failure("plan", &output));
            }
            // Empty trigger/pipeline ids in generated config make plan fail
            // even though the file is complete.
            tracing::warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "plan reported errors after generating configuration, continuing"
            );
        }
        tokio::fs::read_to_string(&generated)
            .await
            .map_err(|e| MigrationError::io(format!("Failed to read '{}'", generated.display()), e))
    }

    async fn apply(&self, dir: &Path, target: Option<&str>) -> Result<usize, MigrationError> {
        let target_flag = target.map(|t| format!("-target={}", t));
        let mut args = vec!["apply", "-auto-approve", "-input=false", "-no-color"];
        if let Some(flag) = &target_flag {
            args.push(flag.as_str());
        }
        let output = self.run(dir, &args).await?;
        if !output.status.success() {
            return Err(self.failure("apply", &output));
        }
        Ok(parse_added_count(&String::from_utf8_lossy(&output.stdout)).unwrap_or(0))
    }

    async fn list_state(&self, dir: &Path) -> Result<Vec<String>, MigrationError> {
        let output = self.run(dir, &["state", "list"]).await?;
        if !output.status.success() {
            return Err(self.failure("state list", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn read_outputs(&self, dir: &Path) -> Result<BTreeMap<String, serde_json::Value>, MigrationError> {
        let output = self.run(dir, &["output", "-json"]).await?;
        if !output.status.success() {
            return Err(self.failure("output", &output));
        }
        parse_outputs(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Reads `N` from the `Resources: N added, ...` summary line.
pub fn parse_added_count(stdout: &str) -> Option<usize> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"Resources: (\d+) added").expect("static apply summary pattern"));
    re.captures_iter(stdout).last()?.get(1)?.as_str().parse().ok()
}

pub fn parse_outputs(json: &str) -> Result<BTreeMap<String, serde_json::Value>, MigrationError> {
    #[derive(Deserialize)]
    struct OutputValue {
        value: serde_json::Value,
    }
    if json.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, OutputValue> = serde_json::from_str(json).map_err(|e| MigrationError::Codec {
        file: "output -json".to_string(),
        message: e.to_string(),
    })?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.value)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_count_comes_from_the_summary_line() {
        let stdout = "ibm_cd_toolchain.tc_ab12: Creating...\n\nApply complete! Resources: 14 added, 0 changed, 0 destroyed.\n";
        assert_eq!(parse_added_count(stdout), Some(14));
        assert_eq!(parse_added_count("No changes."), None);
    }

    #[test]
    fn outputs_are_unwrapped() {
        let json = r#"{"toolchain_id": {"sensitive": false, "type": "string", "value": "9b2f"}}"#;
        let outputs = parse_outputs(json).unwrap();
        assert_eq!(outputs.get("toolchain_id"), Some(&serde_json::json!("9b2f")));
        assert!(parse_outputs("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = TerraformCli::new("cd-migrate-no-such-binary", BTreeMap::new());
        assert!(matches!(cli.init(dir.path()).await, Err(MigrationError::Io { .. })));
    }
}
