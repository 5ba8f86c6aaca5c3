//! Shared output formatting for CLI commands

use anyhow::{Context, Result};
use serde::Serialize;
use std::str::FromStr;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => anyhow::bail!("Unsupported output format: '{}'. Use 'json' or 'yaml'.", s),
        }
    }
}

/// Print data in the specified format
pub fn print_output<T: Serialize>(data: &T, format: OutputFormat) -> Result<()> {
    println!("{}", render(data, format)?);
    Ok(())
}

fn render<T: Serialize>(data: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(data).context("Failed to serialize to JSON"),
        OutputFormat::Yaml => serde_yaml::to_string(data).context("Failed to serialize to YAML"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("YAML".parse::<OutputFormat>().unwrap(), OutputFormat::Yaml);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_render_flat_map() {
        let params: BTreeMap<&str, &str> = [("endpoint", "https://vault:8200"), ("token", "hvs.x")].into();
        let json = render(&params, OutputFormat::Json).unwrap();
        assert!(json.contains("\"endpoint\": \"https://vault:8200\""));

        let yaml = render(&params, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("token: hvs.x"));
    }
}
