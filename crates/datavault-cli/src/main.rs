//! Datavault command-line interface for provisioning and mounting the
//! host's encrypted data volume.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use datavault_core::{
    config::{bootstrap_template, DatavaultConfig, DEFAULT_CONFIG_PATH},
    logging, mounts,
    workflow::{self, WorkflowLevel, WorkflowReport},
};
use datavault_luks::SystemVolumeProvider;
use datavault_provider::VolumeProvider;
use rpassword::prompt_password;
use schemars::schema_for;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "datavault",
    version,
    about = "Provision and mount the encrypted data volume for a host."
)]
struct Cli {
    /// Path to the datavault configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a fresh encrypted volume or attach an existing one.
    Setup {
        /// Provide the passphrase directly instead of prompting.
        #[arg(long)]
        passphrase: Option<String>,
    },

    /// Report mount and container state without touching the device.
    Status,

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Path to the configuration file to validate.
        #[arg(short = 'f', long, default_value = DEFAULT_CONFIG_PATH)]
        file: PathBuf,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },

    /// Emit the bootstrap configuration template.
    Template,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

/// Dispatch to the requested subcommand; the sole termination point for
/// every failure is `main`'s handler above.
fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();

    match cli.command {
        Commands::Setup { passphrase } => setup(&cli.config, passphrase),
        Commands::Status => status(&cli.config),
        Commands::Validate { file, schema } => validate(&file, schema),
        Commands::Template => {
            print!("{}", bootstrap_template());
            Ok(())
        }
    }
}

fn load_cli_config(path: &Path) -> Result<DatavaultConfig> {
    let config = DatavaultConfig::load_or_bootstrap(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if config.path != path {
        println!(
            "Using bootstrap configuration at {}.",
            config.path.display()
        );
    }

    Ok(config)
}

fn setup(config_path: &Path, passphrase: Option<String>) -> Result<()> {
    let config = load_cli_config(config_path)?;
    let issues = config.validate();
    if !issues.is_empty() {
        bail!(
            "configuration at {} has {} issue(s):\n  {}",
            config.path.display(),
            issues.len(),
            issues.join("\n  ")
        );
    }

    let provider = SystemVolumeProvider::from_config(&config)?;

    // Read a full line without echo; a passphrase may contain spaces.
    let passphrase = Zeroizing::new(
        match passphrase {
            Some(provided) => provided,
            None => prompt_password("Enter passphrase: ")
                .context("failed to read passphrase")?,
        }
        .into_bytes(),
    );
    if passphrase.is_empty() {
        bail!("passphrase cannot be empty");
    }

    let report = workflow::provision(&config, &provider, &passphrase)?;
    print_report(&report);
    Ok(())
}

fn status(config_path: &Path) -> Result<()> {
    let config = load_cli_config(config_path)?;
    let provider = SystemVolumeProvider::from_config(&config)?;

    let device = config.device_path();
    let container = if provider.is_luks(&device)? {
        "LUKS container present"
    } else {
        "no LUKS container"
    };
    println!("device {}: {container}", device.display());

    let mount_point = config.mount_point();
    let mounted = if mounts::mount_point_active(&mount_point)? {
        "mounted"
    } else {
        "not mounted"
    };
    println!("mount point {}: {mounted}", mount_point.display());

    Ok(())
}

fn validate(file: &Path, schema: bool) -> Result<()> {
    if schema {
        let schema = schema_for!(DatavaultConfig);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let config = DatavaultConfig::load(file)
        .with_context(|| format!("failed to load configuration from {}", file.display()))?;

    let issues = config.validate();
    if issues.is_empty() {
        println!("{} is valid.", file.display());
        return Ok(());
    }

    for issue in &issues {
        eprintln!("- {issue}");
    }
    bail!("{} validation issue(s) found in {}", issues.len(), file.display());
}

fn print_report(report: &WorkflowReport) {
    println!("{}", report.title);
    for event in &report.events {
        let glyph = match event.level {
            WorkflowLevel::Info => "·",
            WorkflowLevel::Success => "✔",
            WorkflowLevel::Warn => "!",
        };
        println!("  {glyph} {}", event.message);
    }
}
