//! Command-line argument parsing and launch configuration.
//!
//! This module handles CLI argument parsing using clap, and applies
//! launch-time overrides to engine settings.

use crate::settings::EngineSettings;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// CLI arguments for study-engine
#[derive(Parser, Debug, Clone)]
#[command(
    name = "study-engine",
    about = "Parameterized flashcard generation with sandboxed graph rendering"
)]
pub struct CliArgs {
    /// Config file to load instead of ~/.study-engine/config.json
    #[arg(long, global = true, value_name = "PATH", env = "STUDY_ENGINE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Generation attempts before a parameter spec is reported as exhausted
    #[arg(long, global = true, value_name = "INT", env = "STUDY_ENGINE_MAX_RETRIES")]
    pub max_retries: Option<usize>,
    /// Default decimal places for float variables
    #[arg(long, global = true, value_name = "INT", env = "STUDY_ENGINE_PRECISION")]
    pub precision: Option<u32>,
    /// Graph code timeout in seconds
    #[arg(long, global = true, value_name = "SECONDS", env = "STUDY_ENGINE_GRAPH_TIMEOUT")]
    pub graph_timeout: Option<f64>,
    /// Enable/disable graph rendering for presented cards
    #[arg(
        long,
        global = true,
        value_name = "BOOL",
        env = "STUDY_ENGINE_ENABLE_GRAPHS",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub enable_graphs: Option<bool>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build a parameterized card from a spec and two templates
    Card {
        /// Parameter spec (inline JSON or @path/to/json)
        #[arg(long, value_name = "JSON_OR_@FILE")]
        spec: String,
        /// Question template (string or @path/to/file)
        #[arg(long, value_name = "TEMPLATE_OR_@FILE")]
        question: String,
        /// Answer template (string or @path/to/file)
        #[arg(long, value_name = "TEMPLATE_OR_@FILE")]
        answer: String,
        /// Seed for reproducible draws
        #[arg(long, value_name = "INT")]
        seed: Option<u64>,
        /// Graph code rendered with the same values (string or @path/to/file)
        #[arg(long, value_name = "CODE_OR_@FILE")]
        graph_code: Option<String>,
        /// Figure overrides (inline JSON or @path/to/json)
        #[arg(long, value_name = "JSON_OR_@FILE", requires = "graph_code")]
        graph_config: Option<String>,
    },
    /// Present a flashcard record the way a study session would
    Present {
        /// Flashcard record (inline JSON or @path/to/json)
        #[arg(value_name = "JSON_OR_@FILE")]
        record: String,
        #[arg(long, value_name = "INT")]
        seed: Option<u64>,
    },
    /// Run graph code and print the resulting figure
    Plot {
        /// Graph code (string or @path/to/file)
        #[arg(value_name = "CODE_OR_@FILE")]
        code: String,
        /// Values spliced into {name} markers (inline JSON object or @path/to/json)
        #[arg(long, value_name = "JSON_OR_@FILE")]
        values: Option<String>,
        #[arg(long, value_name = "JSON_OR_@FILE")]
        graph_config: Option<String>,
    },
    /// Print the starting code and config for a graph type
    Template {
        #[arg(value_name = "TYPE", default_value = "function")]
        graph_type: String,
    },
    /// Run one sandboxed program from stdin (spawned by the engine itself)
    #[command(name = "sandbox-worker", hide = true)]
    SandboxWorker,
}

/// Read a value either inline or from a @path reference
pub fn read_value_or_file(raw: &str) -> Result<String, String> {
    if let Some(path) = raw.strip_prefix('@') {
        let contents = fs::read_to_string(Path::new(path))
            .map_err(|e| format!("Failed to read {}: {}", path, e))?;
        Ok(contents)
    } else {
        Ok(raw.to_string())
    }
}

/// Parse a JSON value from either inline JSON or a @path reference
pub fn parse_json_or_file<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let data = read_value_or_file(raw)?;
    serde_json::from_str(&data).map_err(|e| format!("Failed to parse JSON: {}", e))
}

/// Apply launch-time overrides on top of loaded settings
pub fn apply_cli_overrides(args: &CliArgs, settings: &mut EngineSettings) {
    if let Some(max_retries) = args.max_retries {
        let capped = max_retries.max(1);
        if capped != max_retries {
            tracing::warn!("[Launch] max_retries must be at least 1, using {}", capped);
        }
        settings.max_retries = capped;
    }
    if let Some(precision) = args.precision {
        settings.default_precision = precision;
    }
    if let Some(seconds) = args.graph_timeout {
        if seconds.is_finite() && seconds > 0.0 {
            settings.graph_timeout_secs = seconds;
        } else {
            tracing::warn!("[Launch] Ignoring invalid graph timeout {}", seconds);
        }
    }
    if let Some(v) = args.enable_graphs {
        settings.enable_graph_generation = v;
    }

    tracing::debug!(
        "[Launch] Settings: max_retries={}, precision={}, graph_timeout={}s, graphs={}",
        settings.max_retries,
        settings.default_precision,
        settings.graph_timeout_secs,
        settings.enable_graph_generation
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("study-engine").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_read_value_or_file() {
        assert_eq!(read_value_or_file("{a} + {b}").unwrap(), "{a} + {b}");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "plt.plot([1, 2])").unwrap();
        let reference = format!("@{}", file.path().display());
        assert_eq!(read_value_or_file(&reference).unwrap(), "plt.plot([1, 2])");

        assert!(read_value_or_file("@/definitely/not/here.txt").is_err());
    }

    #[test]
    fn test_parse_json_or_file() {
        let values: serde_json::Value = parse_json_or_file(r#"{"a": 3}"#).unwrap();
        assert_eq!(values["a"], 3);
        let err = parse_json_or_file::<serde_json::Value>("{oops").unwrap_err();
        assert!(err.starts_with("Failed to parse JSON"));
    }

    #[test]
    fn test_card_subcommand() {
        let args = parse(&[
            "card",
            "--spec",
            "{}",
            "--question",
            "Q",
            "--answer",
            "A",
            "--seed",
            "4",
            "--max-retries",
            "5",
        ]);
        assert_eq!(args.max_retries, Some(5));
        match args.command {
            Command::Card { seed, graph_code, .. } => {
                assert_eq!(seed, Some(4));
                assert!(graph_code.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_graph_config_requires_code() {
        let result = CliArgs::try_parse_from([
            "study-engine",
            "card",
            "--spec",
            "{}",
            "--question",
            "Q",
            "--answer",
            "A",
            "--graph-config",
            "{}",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_worker_subcommand_name() {
        let args = parse(&[crate::graph::WORKER_SUBCOMMAND]);
        assert!(matches!(args.command, Command::SandboxWorker));
    }

    #[test]
    fn test_apply_cli_overrides() {
        let args = parse(&[
            "--max-retries",
            "0",
            "--precision",
            "4",
            "--graph-timeout",
            "1.5",
            "--enable-graphs",
            "off",
            "template",
        ]);
        let mut settings = EngineSettings::default();
        apply_cli_overrides(&args, &mut settings);
        assert_eq!(settings.max_retries, 1);
        assert_eq!(settings.default_precision, 4);
        assert_eq!(settings.graph_timeout_secs, 1.5);
        assert!(!settings.enable_graph_generation);
    }

    #[test]
    fn test_invalid_timeout_override_is_ignored() {
        let args = parse(&["--graph-timeout=-2", "template"]);
        let mut settings = EngineSettings::default();
        apply_cli_overrides(&args, &mut settings);
        assert_eq!(settings.graph_timeout_secs, 3.0);
    }
}
