//! Output formatting for the command-line tool: plain text, JSON and YAML.

use crate::cli::report::{CheckReport, KeyRow, SettingRow};
use crate::sources::Origin;
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            _ => Err(format!(
                "Invalid format '{}'. Valid options: text, json, yaml",
                s
            )),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
        }
    }
}

/// Serialize for the structured formats. Text falls back to pretty JSON.
pub fn to_structured<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Json | OutputFormat::Text => serde_json::to_string_pretty(value)?,
    })
}

/// Compact single-line rendering of a value.
fn inline(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Settings as aligned `key  value  (origin)` lines.
pub fn format_settings_text(rows: &[SettingRow]) -> String {
    let width = rows.iter().map(|row| row.key.len()).max().unwrap_or(0);
    let mut out = String::new();
    for row in rows {
        out.push_str(&format!(
            "{:width$}  {}  ({})\n",
            row.key,
            inline(&row.value),
            row.origin,
            width = width
        ));
    }
    out
}

pub fn format_origin_text(key: &str, origin: Origin) -> String {
    format!("{}: {}\n", key, origin)
}

pub fn format_keys_text(rows: &[KeyRow]) -> String {
    let width = rows.iter().map(|row| row.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for row in rows {
        out.push_str(&format!(
            "{:width$}  {}",
            row.name,
            row.key.as_deref().unwrap_or("-"),
            width = width
        ));
        if !row.aliases.is_empty() {
            out.push_str(&format!("  aliases: {}", row.aliases.join(", ")));
        }
        if row.deprecated {
            out.push_str("  [deprecated]");
        }
        out.push('\n');
    }
    out
}

pub fn format_check_text(report: &CheckReport) -> String {
    if report.is_clean() {
        return "No configuration problems found.\n".to_string();
    }

    let mut out = String::new();
    if !report.otel.is_empty() {
        out.push_str("## OpenTelemetry\n");
        for event in &report.otel {
            out.push_str(&format!("- {} [{}]\n", event.name, event.tags.join(", ")));
        }
    }
    if !report.deprecated.is_empty() {
        out.push_str("## Deprecated\n");
        for message in &report.deprecated {
            out.push_str(&format!("- {}\n", message));
        }
    }
    if !report.unsupported.is_empty() {
        out.push_str("## Unsupported\n");
        for name in &report.unsupported {
            out.push_str(&format!("- {}\n", name));
        }
    }
    if !report.stable_warnings.is_empty() {
        out.push_str("## Stable configuration\n");
        for warning in &report.stable_warnings {
            out.push_str(&format!("- {}\n", warning));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::CounterEvent;
    use serde_json::json;

    #[test]
    fn test_parse_format() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("yml".parse::<OutputFormat>(), Ok(OutputFormat::Yaml));
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default().to_string(), "text");
    }

    #[test]
    fn test_settings_text_aligned() {
        let rows = vec![
            SettingRow {
                key: "env".into(),
                value: json!("prod"),
                origin: Origin::EnvVar,
            },
            SettingRow {
                key: "sampleRate".into(),
                value: Value::Null,
                origin: Origin::Default,
            },
        ];
        let text = format_settings_text(&rows);
        assert_eq!(text, "env         prod  (env_var)\nsampleRate  -  (default)\n");
    }

    #[test]
    fn test_structured_yaml() {
        let out = to_structured(&json!({"service": "api"}), OutputFormat::Yaml).unwrap();
        assert_eq!(out.trim(), "service: api");
    }

    #[test]
    fn test_check_text_sections() {
        let report = CheckReport {
            otel: vec![CounterEvent::otel("otel.env.invalid", None, "OTEL_LOG_LEVEL")],
            unsupported: vec!["DD_FOO".into()],
            ..Default::default()
        };
        let text = format_check_text(&report);
        assert!(text.contains("## OpenTelemetry"));
        assert!(text.contains("- DD_FOO"));
        assert!(!text.contains("## Deprecated"));
        assert_eq!(format_check_text(&CheckReport::default()), "No configuration problems found.\n");
    }
}
