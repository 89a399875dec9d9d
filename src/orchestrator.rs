//! Runs a migration end to end: Setup, SnapshotImport, ExportCompose and
//! Apply, strictly in that order. Whatever happens, Cleanup runs last.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use crate::catalog::is_valid_region;
use crate::cloud::{CloudClient, ResourceDescriptor, Scope};
use crate::codec::HclCodec;
use crate::composer::{prepare_output_dir, write_files, ComposeOptions, ExportComposer, NonSecretRef};
use crate::config::ToolConfig;
use crate::error::{MigrationError, ResourceFailure, ValidationError};
use crate::grit::{validate_mapping, GritUrlMapping};
use crate::iac::IaCRunner;
use crate::importer;
use crate::names::NameGenerator;
use crate::prompt::Prompter;
use crate::rewriter::LegacyConversion;
use crate::validate::{validate_id, validate_name, validate_tag};

const MAX_COPY_ATTEMPTS: usize = 20;
const TOOLCHAIN_ID_OUTPUT: &str = "toolchain_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    SnapshotImport,
    ExportCompose,
    Apply,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Setup => "setup",
            Stage::SnapshotImport => "snapshot import",
            Stage::ExportCompose => "export",
            Stage::Apply => "apply",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

/// One `migrate` invocation. Settings shared across runs live in [`ToolConfig`].
#[derive(Debug, Clone, Default)]
pub struct MigrateRequest {
    pub toolchain_id: String,
    pub source_region: String,
    pub target_region: String,
    pub resource_group: Option<String>,
    pub new_name: Option<String>,
    pub tags: Vec<String>,
    pub grit_mapping: Option<PathBuf>,
    /// Stop after the output files are written.
    pub dry_run: bool,
    /// Answer every prompt with its default and synthesize names instead of asking.
    pub assume_yes: bool,
    /// Replace whatever an earlier run left in the output directory.
    pub overwrite: bool,
}

#[derive(Debug, Default)]
pub struct MigrationSummary {
    pub toolchain_name: String,
    pub target_region: String,
    pub output_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub planned: usize,
    /// `None` when the run stopped before apply.
    pub created: Option<usize>,
    pub in_state: usize,
    pub new_toolchain_id: Option<String>,
    pub failures: Vec<ResourceFailure>,
    pub skipped: Vec<ResourceFailure>,
    pub non_secret_refs: Vec<NonSecretRef>,
}

/// What Setup settled on before anything is read from the source toolchain graph.
#[derive(Debug)]
pub struct Plan {
    pub source: ResourceDescriptor,
    pub name: String,
    pub rename: bool,
    pub tags: Vec<String>,
    pub resource_group_id: Option<String>,
    pub mapping: Option<GritUrlMapping>,
}

#[derive(Debug, PartialEq, Eq)]
enum Collision {
    None,
    RegionOnly,
    GroupOnly,
    /// Toolchains with the name in the target region and resource group.
    Both(usize),
}

pub struct Orchestrator<'a> {
    pub cloud: &'a dyn CloudClient,
    pub runner: &'a dyn IaCRunner,
    pub prompter: &'a dyn Prompter,
    pub config: &'a ToolConfig,
}

impl<'a> Orchestrator<'a> {
    pub async fn run(&self, request: &MigrateRequest) -> Result<MigrationSummary, MigrationError> {
        let root = self.config.work_root();
        std::fs::create_dir_all(&root)
            .map_err(|e| MigrationError::io(format!("Failed to create '{}'", root.display()), e))?;
        let workdir = tempfile::Builder::new()
            .prefix("cd-migrate-")
            .tempdir_in(&root)
            .map_err(|e| MigrationError::io("Failed to create working directory", e))?;
        tracing::debug!(dir = %workdir.path().display(), "working directory");

        let result = tokio::select! {
            result = self.run_stages(request, workdir.path()) => result,
            Ok(()) = tokio::signal::ctrl_c() => Err(MigrationError::Cancelled),
        };
        self.cleanup(workdir);
        result
    }

    async fn run_stages(&self, request: &MigrateRequest, workdir: &Path) -> Result<MigrationSummary, MigrationError> {
        let output_dir = PathBuf::from(&self.config.output_dir);
        prepare_output_dir(&output_dir, request.overwrite).inspect_err(|e| failed(Stage::Setup, e))?;
        let plan = self.setup(request).await.inspect_err(|e| failed(Stage::Setup, e))?;

        println!("Reading toolchain '{}' in {}...", plan.source.name, request.source_region);
        let mut names = NameGenerator::new(self.config.name_seed);
        let mut snapshot = importer::collect(self.cloud, &request.toolchain_id, &request.source_region, &mut names)
            .await
            .inspect_err(|e| failed(Stage::SnapshotImport, e))?;
        importer::write_import_files(workdir, &snapshot, &request.source_region, &self.config.provider_version)
            .inspect_err(|e| failed(Stage::SnapshotImport, e))?;
        println!("Generating configuration for {} resources...", snapshot.planned());
        let draft = importer::generate_draft(self.runner, workdir, &snapshot)
            .await
            .inspect_err(|e| failed(Stage::SnapshotImport, e))?;

        let options = ComposeOptions {
            source_region: request.source_region.clone(),
            target_region: request.target_region.clone(),
            new_name: plan.rename.then(|| plan.name.clone()),
            tags: plan.tags.clone(),
            resource_group_id: plan.resource_group_id.clone(),
            disable_triggers: self.config.disable_triggers,
            compact: self.config.compact,
            interactive: !request.assume_yes,
            provider_version: self.config.provider_version.clone(),
        };
        let composer = ExportComposer {
            cloud: self.cloud,
            prompter: self.prompter,
            codec: &HclCodec,
            mapping: plan.mapping.as_ref(),
            options: &options,
        };
        let mut conversion = LegacyConversion::default();
        let composition = composer
            .compose(draft, &mut snapshot.index, &mut conversion, &snapshot.toolchain_name, &mut names)
            .await
            .inspect_err(|e| failed(Stage::ExportCompose, e))?;
        let files = write_files(&output_dir, &composition.files).inspect_err(|e| failed(Stage::ExportCompose, e))?;
        println!("Wrote {} files to {}", files.len(), output_dir.display());

        let mut summary = MigrationSummary {
            toolchain_name: plan.name,
            target_region: request.target_region.clone(),
            output_dir,
            files,
            planned: composition.document.len(),
            failures: composition.failures,
            skipped: snapshot.skipped,
            non_secret_refs: composition.non_secret_refs,
            ..Default::default()
        };
        if request.dry_run {
            return Ok(summary);
        }

        self.apply(&mut summary).await.inspect_err(|e| failed(Stage::Apply, e))?;
        Ok(summary)
    }

    /// Validates the request, settles the target name and loads the GRIT mapping.
    pub async fn setup(&self, request: &MigrateRequest) -> Result<Plan, MigrationError> {
        validate_id(&request.toolchain_id)?;
        for region in [&request.source_region, &request.target_region] {
            if !is_valid_region(region) {
                return Err(ValidationError::new("region", region, "not a Continuous Delivery region").into());
            }
        }
        let requested_name = request.new_name.as_deref().map(validate_name).transpose()?;
        let mut tags = request.tags.iter().map(|t| validate_tag(t)).collect::<Result<Vec<_>, _>>()?;

        let resource_group_id = match &request.resource_group {
            Some(rg) => Some(self.cloud.resolve_resource_group(rg).await?.id),
            None => None,
        };
        if request.source_region == request.target_region && resource_group_id.is_none() {
            return Err(ValidationError::new(
                "target region",
                &request.target_region,
                "same as the source region, pass a resource group to move within a region",
            )
            .into());
        }

        let source = self.cloud.get_resource(&request.toolchain_id, &request.source_region).await?;
        let target_group = resource_group_id.clone().unwrap_or_else(|| source.resource_group_id.clone());
        let original = requested_name.clone().unwrap_or_else(|| source.name.clone());

        let name = self.settle_name(request, &original, &target_group, &mut tags).await?;
        let rename = requested_name.is_some() || name != source.name;

        let mapping = match &request.grit_mapping {
            Some(path) => {
                let mapping = GritUrlMapping::load(path)?;
                validate_mapping(
                    &mapping,
                    &request.source_region,
                    &request.target_region,
                    self.cloud,
                    self.config.max_reported_failures,
                )
                .await?;
                println!("GRIT mapping '{}' is valid ({} entries)", mapping.source(), mapping.len());
                Some(mapping)
            }
            None => None,
        };

        Ok(Plan { source, name, rename, tags, resource_group_id, mapping })
    }

    /// A name clash in both the target region and resource group blocks the
    /// run until a free name is found. A clash in only one scope is a warning.
    async fn settle_name(
        &self,
        request: &MigrateRequest,
        original: &str,
        target_group: &str,
        tags: &mut Vec<String>,
    ) -> Result<String, MigrationError> {
        let region = &request.target_region;
        let mut name = original.to_string();
        let mut attempts = 0;
        loop {
            match self.collision(&name, region, target_group).await? {
                Collision::None => return Ok(name),
                Collision::Both(count) => {
                    println!(
                        "⚠️  A toolchain named '{}' already exists in {} and resource group {}",
                        name, region, target_group
                    );
                    attempts += 1;
                    if request.assume_yes {
                        if attempts > MAX_COPY_ATTEMPTS {
                            return Err(MigrationError::Conflict {
                                message: format!("no free name found for '{}' in {}", original, region),
                                count,
                            });
                        }
                        name = validate_name(&copy_name(original, attempts))?;
                        println!("   Using '{}' instead", name);
                        continue;
                    }
                    let answer = self.prompter.text("New toolchain name", Some("leave empty to abort"))?;
                    if answer.is_empty() {
                        return Err(MigrationError::Conflict {
                            message: format!("toolchain '{}' already exists in {}", name, region),
                            count,
                        });
                    }
                    match validate_name(&answer) {
                        Ok(n) => name = n,
                        Err(e) => println!("⚠️  {}", e),
                    }
                }
                soft => {
                    let scope = if soft == Collision::RegionOnly {
                        format!("region {}", region)
                    } else {
                        format!("resource group {}", target_group)
                    };
                    println!("⚠️  A toolchain named '{}' already exists in {}", name, scope);
                    let tag = format!("migrated-from-{}", request.source_region);
                    if !tags.contains(&tag) {
                        let add = request.assume_yes
                            || self.prompter.confirm(&format!("Add tag '{}' to tell them apart?", tag), true)?;
                        if add {
                            tags.push(validate_tag(&tag)?);
                        }
                    }
                    return Ok(name);
                }
            }
        }
    }

    async fn collision(&self, name: &str, region: &str, group: &str) -> Result<Collision, MigrationError> {
        let in_region = self.cloud.find_by_name(name, &Scope::Region(region.to_string())).await?;
        let in_group = if group.is_empty() {
            Vec::new()
        } else {
            self.cloud.find_by_name(name, &Scope::ResourceGroup(group.to_string())).await?
        };
        let both = in_region.iter().filter(|r| in_group.iter().any(|g| g.id == r.id)).count();
        Ok(if both > 0 {
            Collision::Both(both)
        } else if !in_region.is_empty() {
            Collision::RegionOnly
        } else if !in_group.is_empty() {
            Collision::GroupOnly
        } else {
            Collision::None
        })
    }

    async fn apply(&self, summary: &mut MigrationSummary) -> Result<(), MigrationError> {
        let dir = summary.output_dir.clone();
        println!("Creating {} resources in {}...", summary.planned, summary.target_region);
        self.runner.init(&dir).await?;
        let created = self.runner.apply(&dir, None).await?;
        let state = self.runner.list_state(&dir).await?;
        if state.len() < summary.planned {
            tracing::warn!(planned = summary.planned, in_state = state.len(), "not every planned resource is in state");
        }
        let outputs = self.runner.read_outputs(&dir).await?;

        summary.created = Some(created);
        summary.in_state = state.len();
        summary.new_toolchain_id = outputs.get(TOOLCHAIN_ID_OUTPUT).and_then(|v| v.as_str()).map(String::from);
        Ok(())
    }

    fn cleanup(&self, workdir: tempfile::TempDir) {
        if self.config.keep_temp {
            let kept = workdir.keep();
            println!("Working directory kept at {}", kept.display());
        } else if let Err(e) = workdir.close() {
            failed(Stage::Cleanup, &MigrationError::io("Failed to remove working directory", e));
        }
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}

fn failed(stage: Stage, err: &MigrationError) {
    tracing::error!(%stage, error = %err, "stage failed");
}

fn copy_name(base: &str, attempt: usize) -> String {
    if attempt == 1 {
        format!("{}-copy", base)
    } else {
        format!("{}-copy-{}", base, attempt)
    }
}

pub fn print_summary(summary: &MigrationSummary) {
    println!();
    println!("Toolchain '{}' -> {}", summary.toolchain_name, summary.target_region);
    match summary.created {
        Some(created) => println!("Resources: {} planned, {} created, {} in state", summary.planned, created, summary.in_state),
        None => println!("Resources: {} planned (dry run, nothing applied)", summary.planned),
    }
    if let Some(id) = &summary.new_toolchain_id {
        println!("New toolchain id: {}", id);
    }
    println!("Configuration: {}", summary.output_dir.display());

    if summary.failures.is_empty() && summary.skipped.is_empty() && summary.non_secret_refs.is_empty() {
        println!("✅ No warnings.");
        return;
    }
    println!("\n⚠️  Review before using the new toolchain:");
    println!("{:-<80}", "");
    for failure in &summary.failures {
        println!("  {:<48} {}", failure.resource, failure.reason);
    }
    for skipped in &summary.skipped {
        println!("  {:<48} skipped: {}", skipped.resource, skipped.reason);
    }
    for secret in &summary.non_secret_refs {
        println!(
            "  {:<48} secret '{}' must be set again ({})",
            secret.resource_name, secret.property_name, secret.file_name
        );
    }
    println!("{:-<80}", "");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TOOLCHAIN_TYPE;
    use crate::test_support::{FakeCloud, FakeRunner, ScriptedPrompter, RESOURCE_GROUP_ID, TOOLCHAIN_ID};

    fn request() -> MigrateRequest {
        MigrateRequest {
            toolchain_id: TOOLCHAIN_ID.to_string(),
            source_region: "ca-tor".to_string(),
            target_region: "eu-gb".to_string(),
            ..Default::default()
        }
    }

    fn config(root: &Path) -> ToolConfig {
        ToolConfig {
            work_root: Some(root.join("work").to_string_lossy().into_owned()),
            output_dir: root.join("out").to_string_lossy().into_owned(),
            name_seed: Some(7),
            ..Default::default()
        }
    }

    fn draft() -> String {
        let name = NameGenerator::new(Some(7)).generate("my toolchain");
        format!(
            "resource \"{}\" \"{}\" {{\n  name = \"my toolchain\"\n  resource_group_id = \"{}\"\n}}\n",
            TOOLCHAIN_TYPE, name, RESOURCE_GROUP_ID
        )
    }

    async fn setup(cloud: &FakeCloud, prompter: &ScriptedPrompter, request: &MigrateRequest) -> Result<Plan, MigrationError> {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let runner = FakeRunner::default();
        Orchestrator { cloud, runner: &runner, prompter, config: &config }.setup(request).await
    }

    #[tokio::test]
    async fn clash_in_region_and_group_synthesizes_a_copy_name() {
        let cloud = FakeCloud::with_toolchain("my toolchain")
            .with_existing("aaaaaaaa-0000-4000-8000-000000000001", "my toolchain", "eu-gb", RESOURCE_GROUP_ID)
            .with_existing("aaaaaaaa-0000-4000-8000-000000000002", "my toolchain-copy", "eu-gb", RESOURCE_GROUP_ID);
        let prompter = ScriptedPrompter::default();
        let plan = setup(&cloud, &prompter, &MigrateRequest { assume_yes: true, ..request() }).await.unwrap();

        assert_eq!(plan.name, "my toolchain-copy-2");
        assert!(plan.rename);
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn clash_in_region_and_group_asks_for_a_name() {
        let cloud = FakeCloud::with_toolchain("my toolchain").with_existing(
            "aaaaaaaa-0000-4000-8000-000000000001",
            "my toolchain",
            "eu-gb",
            RESOURCE_GROUP_ID,
        );
        let prompter = ScriptedPrompter::with_texts(["bad name!", "team toolchain"]);
        let plan = setup(&cloud, &prompter, &request()).await.unwrap();

        assert_eq!(plan.name, "team toolchain");
        assert_eq!(prompter.asked().len(), 2);
    }

    #[tokio::test]
    async fn declining_to_rename_is_a_conflict() {
        let cloud = FakeCloud::with_toolchain("my toolchain").with_existing(
            "aaaaaaaa-0000-4000-8000-000000000001",
            "my toolchain",
            "eu-gb",
            RESOURCE_GROUP_ID,
        );
        let prompter = ScriptedPrompter::with_texts([""]);
        let err = setup(&cloud, &prompter, &request()).await.unwrap_err();
        assert!(matches!(err, MigrationError::Conflict { count: 1, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn clash_in_one_scope_only_warns_and_suggests_a_tag() {
        let cloud = FakeCloud::with_toolchain("my toolchain").with_existing(
            "aaaaaaaa-0000-4000-8000-000000000001",
            "my toolchain",
            "eu-gb",
            "rg-other",
        );
        let prompter = ScriptedPrompter::default().with_confirms([true]);
        let plan = setup(&cloud, &prompter, &request()).await.unwrap();

        assert_eq!(plan.name, "my toolchain");
        assert!(!plan.rename);
        assert_eq!(plan.tags, vec!["migrated-from-ca-tor".to_string()]);
    }

    #[tokio::test]
    async fn bad_input_fails_before_any_lookup() {
        let cloud = FakeCloud::with_toolchain("my toolchain");
        let prompter = ScriptedPrompter::default();
        let bad_id = MigrateRequest { toolchain_id: "not-a-uuid".to_string(), ..request() };
        assert!(matches!(setup(&cloud, &prompter, &bad_id).await, Err(MigrationError::Validation(_))));

        let same_region = MigrateRequest { target_region: "ca-tor".to_string(), ..request() };
        assert!(matches!(setup(&cloud, &prompter, &same_region).await, Err(MigrationError::Validation(_))));
    }

    #[tokio::test]
    async fn dry_run_writes_files_and_skips_apply() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let cloud = FakeCloud::with_toolchain("my toolchain");
        let runner = FakeRunner::generating(&draft());
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator { cloud: &cloud, runner: &runner, prompter: &prompter, config: &config };

        let summary = orchestrator.run(&MigrateRequest { dry_run: true, ..request() }).await.unwrap();

        assert_eq!(summary.created, None);
        assert_eq!(summary.planned, 1);
        assert!(dir.path().join("out").join("toolchain.tf").exists());
        assert!(dir.path().join("out").join("outputs.tf").exists());
        assert_eq!(runner.calls(), vec!["init".to_string(), "plan".to_string()]);
    }

    #[tokio::test]
    async fn applied_run_reports_created_resources() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let cloud = FakeCloud::with_toolchain("my toolchain");
        let runner = FakeRunner::generating(&draft())
            .adding(1)
            .with_state(&["ibm_cd_toolchain.my_toolchain_abcd"])
            .with_output(TOOLCHAIN_ID_OUTPUT, "new-id");
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator { cloud: &cloud, runner: &runner, prompter: &prompter, config: &config };

        let summary = orchestrator.run(&request()).await.unwrap();

        assert_eq!(summary.created, Some(1));
        assert_eq!(summary.in_state, 1);
        assert_eq!(summary.new_toolchain_id.as_deref(), Some("new-id"));
        assert!(runner.calls().contains(&"apply".to_string()));
    }

    #[tokio::test]
    async fn failed_stage_still_removes_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let cloud = FakeCloud::with_toolchain("my toolchain");
        let runner = FakeRunner::generating(&draft()).failing_apply();
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator { cloud: &cloud, runner: &runner, prompter: &prompter, config: &config };

        let err = orchestrator.run(&request()).await.unwrap_err();
        assert!(matches!(err, MigrationError::ExternalTool { .. }));
        let leftovers = std::fs::read_dir(dir.path().join("work")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn keep_temp_preserves_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolConfig { keep_temp: true, ..config(dir.path()) };
        let cloud = FakeCloud::with_toolchain("my toolchain");
        let runner = FakeRunner::generating(&draft());
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator { cloud: &cloud, runner: &runner, prompter: &prompter, config: &config };

        orchestrator.run(&MigrateRequest { dry_run: true, ..request() }).await.unwrap();
        let kept: Vec<_> = std::fs::read_dir(dir.path().join("work")).unwrap().collect();
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn leftovers_in_the_output_directory_block_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("resources.tf"), "# earlier compact run").unwrap();
        std::fs::write(out.join("terraform.tfstate"), "{}").unwrap();
        let cloud = FakeCloud::with_toolchain("my toolchain");
        let runner = FakeRunner::generating(&draft()).adding(1);
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator { cloud: &cloud, runner: &runner, prompter: &prompter, config: &config };

        let err = orchestrator.run(&request()).await.unwrap_err();
        assert!(matches!(err, MigrationError::Validation(_)), "{:?}", err);
        assert!(runner.calls().is_empty());
        assert!(out.join("terraform.tfstate").exists());

        orchestrator.run(&MigrateRequest { overwrite: true, ..request() }).await.unwrap();
        let mut left: Vec<String> =
            std::fs::read_dir(&out).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
        left.sort();
        assert!(left.contains(&"toolchain.tf".to_string()));
        assert!(!left.contains(&"resources.tf".to_string()));
        assert!(!left.contains(&"terraform.tfstate".to_string()));
    }

    #[test]
    fn copy_names_count_up() {
        assert_eq!(copy_name("tc", 1), "tc-copy");
        assert_eq!(copy_name("tc", 3), "tc-copy-3");
    }
}
