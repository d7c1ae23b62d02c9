//! hashi: inspect content packages and xAPI statements offline.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};

use hashi::package::{BlobRegistry, BloomPackage, H5pPackage};
use hashi::HashiConfig;
use xapi::SchemaKind;

#[derive(Parser)]
#[command(name = "hashi")]
#[command(about = "Sandbox bridge tooling for hosted learning content")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a statement, or an array of statements, and print the
    /// cleaned result
    Validate {
        /// JSON file holding the statement(s)
        path: PathBuf,
    },

    /// Print the library load order of an H5P package
    H5p {
        /// The .h5p file
        path: PathBuf,
    },

    /// Print the entry page of a Bloom book
    Bloom {
        /// The .bloompub or .bloomd file
        path: PathBuf,
    },

    /// Print the effective configuration as YAML
    Config {
        /// Configuration file to load; defaults are printed without one
        #[arg(short, long, env = "HASHI_CONFIG")]
        file: Option<PathBuf>,
    },
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let input: Value = serde_json::from_str(&text).context("parsing statement JSON")?;
    let statements = match input {
        Value::Array(items) => items,
        single => vec![single],
    };

    let mut cleaned = Vec::with_capacity(statements.len());
    for (i, statement) in statements.into_iter().enumerate() {
        let result = SchemaKind::Statement
            .clean_with_warnings(statement)
            .with_context(|| format!("statement {i} is invalid"))?;
        for warning in &result.warnings {
            warn!(statement = i, "{}", warning);
        }
        cleaned.push(result.value);
    }

    let output = if cleaned.len() == 1 {
        cleaned.remove(0)
    } else {
        Value::Array(cleaned)
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("hashi=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => validate(&path)?,
        Command::H5p { path } => {
            let data = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let package = H5pPackage::from_zip(&data, &BlobRegistry::new())?;
            info!(title = %package.manifest().title, "Resolved H5P package");
            for library in package.load_order() {
                println!("{library}");
            }
        }
        Command::Bloom { path } => {
            let data = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let book = BloomPackage::from_zip(&data, &BlobRegistry::new())?;
            println!("{}", book.entry());
        }
        Command::Config { file } => {
            let config = match file {
                Some(file) => {
                    let yaml = std::fs::read_to_string(&file)
                        .with_context(|| format!("reading {}", file.display()))?;
                    HashiConfig::from_yaml(&yaml)?
                }
                None => HashiConfig::default(),
            };
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}
