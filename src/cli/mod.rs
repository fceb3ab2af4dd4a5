//! CLI command definitions for tracer-config
//!
//! Resolves the tracer configuration for the current environment and prints
//! it, the origin of a single key, diagnostics, or the supported settings.

pub mod report;

use crate::format::OutputFormat;
use crate::sources::options::TracerOptions;
use crate::sources::remote::RemotePayload;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Tracer configuration resolver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Programmatic tracer options (YAML or JSON file)
    #[arg(long, global = true, value_name = "FILE")]
    pub options: Option<PathBuf>,

    /// Remote configuration payload to apply (JSON file)
    #[arg(long, global = true, value_name = "FILE")]
    pub remote: Option<PathBuf>,

    /// Output format: text (default), json, or yaml
    #[arg(short, long, default_value = "text", global = true, value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective configuration with origins (default)
    Show {
        /// Only keys with a value
        #[arg(long)]
        set_only: bool,

        /// Print nested objects instead of dotted keys (json/yaml only)
        #[arg(long)]
        nested: bool,
    },

    /// Print where the value of one key comes from
    Origin {
        /// Internal dotted key, e.g. `appsec.enabled`
        key: String,
    },

    /// Report OpenTelemetry conflicts, deprecated or unknown variables and
    /// stable-config problems
    Check,

    /// List supported settings
    Keys,
}

/// Read tracer options from a YAML (or JSON) file.
pub fn load_options(path: &Path) -> Result<TracerOptions> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read options file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse options file: {}", path.display()))
}

/// Read a remote configuration payload from a JSON file.
pub fn load_remote(path: &Path) -> Result<RemotePayload> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read remote payload: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse remote payload: {}", path.display()))
}
