//! pkgloader CLI - load Go packages and print struct layouts.
//!
//! Usage:
//!   pkgloader ./pkg/server:Options              # fields of server.Options
//!   pkgloader --tags integration ./a:A ./b:B    # several structs, extra tags
//!   pkgloader --config pkgloader.toml ./x:X     # settings from a TOML file
//!
//! Prints one JSON document with an entry per `<dir>:<Type>` argument.

use anyhow::{bail, Context, Result};
use clap::Parser;
use pkgloader::graph::Keyed;
use pkgloader::{FieldDescriptor, Loader, LoaderConfig, LogLevel};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter; wins over `--log-level`.
const LOG_ENV: &str = "PKGLOADER_LOG";

#[derive(Parser)]
#[command(name = "pkgloader")]
#[command(about = "pkgloader - concurrent loader for Go package graphs", long_about = None)]
struct Cli {
    /// Directory relative `<dir>` arguments are resolved against
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Diagnostic verbosity (overrides the config file)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Extra build tags, comma separated
    #[arg(short, long, value_delimiter = ',')]
    tags: Vec<String>,

    /// Structs to describe, as `<dir>:<Type>`
    #[arg(required = true)]
    targets: Vec<String>,
}

#[derive(Serialize)]
struct StructReport {
    source: PathBuf,
    #[serde(rename = "type")]
    type_name: String,
    file: String,
    fields: Vec<FieldDescriptor>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn parse_target(target: &str) -> Result<(PathBuf, String)> {
    let Some((dir, type_name)) = target.rsplit_once(':') else {
        bail!("expected <dir>:<Type>, got '{}'", target);
    };
    if dir.is_empty() || type_name.is_empty() {
        bail!("expected <dir>:<Type>, got '{}'", target);
    }
    Ok((PathBuf::from(dir), type_name.to_string()))
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.build.tags.extend(cli.tags);
    init_tracing(config.log_level);

    let targets = cli
        .targets
        .iter()
        .map(|t| parse_target(t))
        .collect::<Result<Vec<_>>>()?;

    let loader = Loader::new(config)?;
    let mut reports = Vec::with_capacity(targets.len());
    for (dir, type_name) in targets {
        let source = cli.root.join(dir);
        loader
            .load_directory(&source)
            .with_context(|| format!("failed to load {}", source.display()))?;
        loader.wait();

        let unit = loader.find_unit(&source)?;
        let fields = loader.struct_fields(&source, &type_name)?;
        let file = unit
            .find_declaration(&type_name)
            .map(|d| d.file)
            .unwrap_or_default();
        reports.push(StructReport {
            source: unit.path().to_path_buf(),
            type_name,
            file,
            fields,
        });
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
