use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const BIN: &str = "cd-migrate";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for cd-migrate", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the release binary and copy it into <prefix>/bin
    Install {
        #[arg(long, default_value = "/usr/local")]
        prefix: PathBuf,
        /// Copy without sudo, for prefixes the current user can write to
        #[arg(long)]
        no_sudo: bool,
    },
    /// Run the unit tests with debug logging from the crate
    Test,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = workspace_root()?;

    match cli.command {
        Commands::Install { prefix, no_sudo } => install(&root, &prefix, no_sudo),
        Commands::Test => cargo(&root, &["test", "--workspace"], &[("RUST_LOG", "cd_migrate=debug")]),
    }
}

fn workspace_root() -> Result<PathBuf> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").context("CARGO_MANIFEST_DIR not set")?;
    Path::new(&manifest_dir)
        .parent()
        .map(Path::to_path_buf)
        .context("Failed to find workspace root")
}

fn cargo(root: &Path, args: &[&str], envs: &[(&str, &str)]) -> Result<()> {
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let status = Command::new(&cargo)
        .args(args)
        .envs(envs.iter().copied())
        .current_dir(root)
        .status()
        .with_context(|| format!("Failed to run cargo {}", args.join(" ")))?;
    if !status.success() {
        anyhow::bail!("cargo {} failed", args.join(" "));
    }
    Ok(())
}

fn install(root: &Path, prefix: &Path, no_sudo: bool) -> Result<()> {
    println!("Building release binary...");
    cargo(root, &["build", "--release", "--bin", BIN], &[])?;

    let source = root.join("target").join("release").join(BIN);
    let bin_dir = prefix.join("bin");
    println!("Installing to {}...", bin_dir.display());

    let mut command = if no_sudo {
        Command::new("cp")
    } else {
        let mut sudo = Command::new("sudo");
        sudo.arg("cp");
        sudo
    };
    let status = command
        .arg(&source)
        .arg(&bin_dir)
        .status()
        .context("Failed to copy the binary")?;
    if !status.success() {
        anyhow::bail!("Installation failed");
    }

    println!("Installed {} to {}", BIN, bin_dir.display());
    Ok(())
}
