mod catalog;
mod cloud;
mod codec;
mod composer;
mod config;
mod document;
mod error;
mod grit;
mod iac;
mod importer;
mod names;
mod orchestrator;
mod prompt;
mod rewriter;
mod validate;
#[cfg(test)]
mod test_support;

use std::collections::BTreeMap;
use std::path::PathBuf;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell as CompletionShell;
use tracing_subscriber::EnvFilter;
use crate::cloud::HttpCloudClient;
use crate::config::{ToolConfig, DEFAULT_CONFIG_FILE};
use crate::error::MigrationError;
use crate::grit::{validate_mapping, GritUrlMapping};
use crate::iac::TerraformCli;
use crate::orchestrator::{print_summary, MigrateRequest, Orchestrator};
use crate::prompt::InquirePrompter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to tool config file (default: ./cd-migrate.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging and full error details
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a toolchain to another region or resource group
    Migrate(MigrateArgs),
    /// Check a GRIT URL mapping file without migrating anything
    ValidateMapping {
        /// YAML or JSON file mapping source repository URLs to target URLs
        file: PathBuf,
        #[arg(long)]
        source_region: String,
        #[arg(long)]
        target_region: String,
    },
    /// Generate shell completion script
    Completion {
        /// Shell to generate completions for: bash, zsh, fish, powershell
        shell: String,
        /// Install the completion script to the default location for the shell
        #[arg(long)]
        install: bool,
    },
}

#[derive(Args)]
struct MigrateArgs {
    /// Id of the toolchain to copy
    #[arg(long)]
    toolchain_id: String,
    #[arg(long)]
    source_region: String,
    #[arg(long)]
    target_region: String,
    /// Target resource group name or id (default: the source toolchain's group)
    #[arg(long)]
    resource_group: Option<String>,
    /// Name of the new toolchain
    #[arg(long)]
    name: Option<String>,
    /// Tag for the new toolchain, may be repeated
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// YAML or JSON file mapping source GRIT repository URLs to target URLs
    #[arg(long)]
    grit_mapping: Option<PathBuf>,
    /// Write all resources into one file
    #[arg(long)]
    compact: bool,
    /// Keep the working directory after the run
    #[arg(long)]
    keep_temp: bool,
    /// Leave non-manual triggers enabled
    #[arg(long)]
    keep_triggers: bool,
    /// Write the configuration but do not apply it
    #[arg(long)]
    dry_run: bool,
    /// Do not prompt; synthesize names and keep unresolved repository URLs
    #[arg(long, short = 'y')]
    yes: bool,
    /// Replace the contents of a non-empty output directory
    #[arg(long)]
    overwrite: bool,
    /// Seed for generated local names
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// terraform or tofu
    #[arg(long)]
    tf_tool: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    println!("cd-migrate v{} (built {})", env!("CARGO_PKG_VERSION"), env!("BUILD_DATE"));

    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        println!();
        return Ok(());
    };

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = ToolConfig::load(&config_path)?;

    let result = match command {
        Commands::Migrate(args) => run_migrate(args, config).await,
        Commands::ValidateMapping { file, source_region, target_region } => {
            run_validate_mapping(&file, &source_region, &target_region, &config).await
        }
        Commands::Completion { shell, install } => run_completion(&shell, install),
    };

    if let Err(e) = result {
        report(&e, cli.verbose);
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report(err: &MigrationError, verbose: bool) {
    match err {
        MigrationError::AuthRequired { authorize_url } => {
            eprintln!("❌ GRIT needs your authorization before repositories can be checked.");
            eprintln!("   Open {} in a browser, then run the migration again.", authorize_url);
        }
        MigrationError::Cancelled => eprintln!("Cancelled."),
        other if verbose => eprintln!("❌ {:?}", other),
        other => eprintln!("❌ {}", other),
    }
}

async fn run_migrate(args: MigrateArgs, mut config: ToolConfig) -> Result<(), MigrationError> {
    config.compact |= args.compact;
    config.keep_temp |= args.keep_temp;
    if args.keep_triggers {
        config.disable_triggers = false;
    }
    if let Some(seed) = args.seed {
        config.name_seed = Some(seed);
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(tool) = args.tf_tool {
        config.tf_tool = tool;
    }

    let api_key = config.api_key()?;
    let cloud = HttpCloudClient::new(api_key.clone())?;
    let mut env = BTreeMap::new();
    env.insert(format!("TF_VAR_{}", codec::API_KEY_VARIABLE), api_key);
    let runner = TerraformCli::new(config.tf_tool.clone(), env);

    let request = MigrateRequest {
        toolchain_id: args.toolchain_id,
        source_region: args.source_region,
        target_region: args.target_region,
        resource_group: args.resource_group,
        new_name: args.name,
        tags: args.tags,
        grit_mapping: args.grit_mapping,
        dry_run: args.dry_run,
        assume_yes: args.yes,
        overwrite: args.overwrite,
    };
    let orchestrator = Orchestrator { cloud: &cloud, runner: &runner, prompter: &InquirePrompter, config: &config };
    let summary = orchestrator.run(&request).await?;
    print_summary(&summary);
    Ok(())
}

async fn run_validate_mapping(
    file: &std::path::Path,
    source_region: &str,
    target_region: &str,
    config: &ToolConfig,
) -> Result<(), MigrationError> {
    let mapping = GritUrlMapping::load(file)?;
    let cloud = HttpCloudClient::new(config.api_key()?)?;
    validate_mapping(&mapping, source_region, target_region, &cloud, config.max_reported_failures).await?;
    println!("✅ '{}' is valid ({} entries)", mapping.source(), mapping.len());
    Ok(())
}

fn run_completion(shell_str: &str, install: bool) -> Result<(), MigrationError> {
    use clap_complete::{generate, Shell};
    use std::str::FromStr;

    let shell = Shell::from_str(shell_str).map_err(|_| {
        MigrationError::external("Completion", format!("unknown shell '{}', use bash, zsh, fish or powershell", shell_str))
    })?;

    let mut cmd = Cli::command();
    let bin_name = "cd-migrate";

    if install {
        let (path, post_install_msg) = completion_install_path(shell)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MigrationError::io(format!("Failed to create '{}'", parent.display()), e))?;
        }
        let mut file = std::fs::File::create(&path)
            .map_err(|e| MigrationError::io(format!("Failed to create '{}'", path.display()), e))?;
        generate(shell, &mut cmd, bin_name, &mut file);
        println!("Completion script installed to: {}", path.display());
        if let Some(msg) = post_install_msg {
            println!("{}", msg);
        }
    } else {
        generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
    }
    Ok(())
}

fn completion_install_path(shell: CompletionShell) -> Result<(PathBuf, Option<String>), MigrationError> {
    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
    let (path, msg) = match shell {
        CompletionShell::Bash => (
            PathBuf::from(format!("{}/.local/share/bash-completion/completions/cd-migrate", home)),
            Some("Make sure bash-completion is installed and sourced in ~/.bashrc".to_string()),
        ),
        CompletionShell::Zsh => (
            PathBuf::from(format!("{}/.zsh/completions/_cd-migrate", home)),
            Some("Add ~/.zsh/completions to fpath in ~/.zshrc:\n  fpath=(~/.zsh/completions $fpath)\n  autoload -Uz compinit && compinit".to_string()),
        ),
        CompletionShell::Fish => (PathBuf::from(format!("{}/.config/fish/completions/cd-migrate.fish", home)), None),
        CompletionShell::PowerShell => {
            let profile = std::env::var("USERPROFILE").unwrap_or_else(|_| home.clone());
            (
                PathBuf::from(format!(r"{}\Documents\PowerShell\Completions\cd-migrate.ps1", profile)),
                Some("Add to your $PROFILE:\n  . \"$env:USERPROFILE\\Documents\\PowerShell\\Completions\\cd-migrate.ps1\"".to_string()),
            )
        }
        other => return Err(MigrationError::external("Completion", format!("unsupported shell: {:?}", other))),
    };
    Ok((path, msg))
}
