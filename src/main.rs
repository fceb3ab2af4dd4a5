//! tracer-config
//!
//! Prints the tracer configuration resolved from the current environment,
//! stable-config files, an options file and an optional remote payload.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracer_config::cli::report::{check_report, key_rows, setting_rows};
use tracer_config::cli::{Cli, Command, load_options, load_remote};
use tracer_config::format::{
    OutputFormat, format_check_text, format_keys_text, format_origin_text, format_settings_text,
    to_structured,
};
use tracer_config::logging::{self, LogTarget};
use tracer_config::sources::options::TracerOptions;
use tracer_config::telemetry::LogSink;
use tracer_config::{Engine, EffectiveConfig};
use tracing::{debug, info};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let options = match &cli.options {
        Some(path) => load_options(path)?,
        None => TracerOptions::default(),
    };

    let engine = Engine::builder()
        .sink(Arc::new(LogSink))
        .build()
        .context("Failed to load the configuration registry")?;
    let mut effective = engine
        .configure(options)
        .context("Failed to resolve configuration")?;
    info!(keys = effective.len(), "Configuration resolved");

    if let Some(path) = &cli.remote {
        let payload = load_remote(path)?;
        effective = engine
            .set_remote_config(Some(&payload))
            .context("Failed to apply remote configuration")?;
        debug!("Applied remote payload from {}", path.display());
    }

    let output = match cli.command.unwrap_or(Command::Show {
        set_only: false,
        nested: false,
    }) {
        Command::Show { set_only, nested } => show(&effective, cli.format, set_only, nested)?,
        Command::Origin { key } => {
            let origin = engine.get_origin(&key)?;
            match cli.format {
                OutputFormat::Text => format_origin_text(&key, origin),
                format => to_structured(
                    &serde_json::json!({ "key": key, "origin": origin }),
                    format,
                )?,
            }
        }
        Command::Check => {
            let report = check_report(&engine);
            match cli.format {
                OutputFormat::Text => format_check_text(&report),
                format => to_structured(&report, format)?,
            }
        }
        Command::Keys => {
            let rows = key_rows(engine.registry());
            match cli.format {
                OutputFormat::Text => format_keys_text(&rows),
                format => to_structured(&rows, format)?,
            }
        }
    };

    print!("{}", output);
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn show(
    effective: &EffectiveConfig,
    format: OutputFormat,
    set_only: bool,
    nested: bool,
) -> Result<String> {
    if nested && format != OutputFormat::Text {
        return to_structured(&effective.to_nested(), format);
    }
    let rows = setting_rows(effective, set_only);
    match format {
        OutputFormat::Text => Ok(format_settings_text(&rows)),
        format => to_structured(&rows, format),
    }
}
