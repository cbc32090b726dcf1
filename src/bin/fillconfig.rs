use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use fluxfill_config::{
    generate_config, load_config, save_config, to_yaml, validate_config, Template,
};

#[derive(Parser)]
#[command(name = "fillconfig")]
#[command(version)]
#[command(about = "Validate, inspect, and generate Flux.1-Fill LoRA training configs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a config and run every validation check
    Validate {
        /// Path to the training config YAML
        config: PathBuf,

        /// Also check that a non-glob dataset path exists on this machine
        #[arg(long)]
        check_paths: bool,
    },

    /// Print the normalized document with defaults filled in
    Show {
        /// Path to the training config YAML
        config: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },

    /// Write a starter config
    Init {
        /// Where to write the new config
        output: PathBuf,

        /// Which starter document to generate
        #[arg(long, value_enum, default_value_t = TemplateArg::Minimal)]
        template: TemplateArg,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TemplateArg {
    Minimal,
    Fill,
}

impl From<TemplateArg> for Template {
    fn from(arg: TemplateArg) -> Self {
        match arg {
            TemplateArg::Minimal => Template::Minimal,
            TemplateArg::Fill => Template::Fill,
        }
    }
}

fn main() -> Result<()> {
    fluxfill_config::logging::init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate {
            config,
            check_paths,
        } => run_validate(&config, check_paths),
        Commands::Show { config, format } => run_show(&config, format),
        Commands::Init {
            output,
            template,
            force,
        } => run_init(&output, template.into(), force),
    }
}

fn run_validate(path: &Path, check_paths: bool) -> Result<()> {
    let config = load_config(path)?;
    let report = validate_config(&config)
        .with_context(|| format!("{} failed validation", path.display()))?;

    for warning in &report.warnings {
        warn!("{warning}");
    }

    if check_paths {
        check_dataset_path(&config.train.dataset.path)?;
    }

    println!("Config OK: {}", path.display());
    println!("  model: {} ({})", config.flux_path, config.dtype);
    println!("  optimizer: {}", config.train.optimizer.type_);
    println!(
        "  effective batch size: {}",
        config.train.effective_batch_size()
    );
    if config.train.max_steps > 0 {
        println!("  max steps: {}", config.train.max_steps);
    }
    Ok(())
}

fn check_dataset_path(path: &str) -> Result<()> {
    // Shard globs usually resolve on the training host, not here.
    if path.contains(['*', '?', '[']) {
        info!("dataset path is a glob, skipping existence check: {path}");
        return Ok(());
    }
    if !Path::new(path).exists() {
        bail!("dataset path does not exist: {path}");
    }
    Ok(())
}

fn run_show(path: &Path, format: Format) -> Result<()> {
    let config = load_config(path)?;
    let report = validate_config(&config)
        .with_context(|| format!("{} failed validation", path.display()))?;

    for warning in &report.warnings {
        warn!("{warning}");
    }

    let rendered = match format {
        Format::Yaml => to_yaml(&config)?,
        Format::Json => serde_json::to_string_pretty(&config)?,
    };
    println!("{rendered}");
    Ok(())
}

fn run_init(output: &Path, template: Template, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    let config = generate_config(template);
    save_config(&config, output)?;

    println!("Wrote {}", output.display());
    Ok(())
}
