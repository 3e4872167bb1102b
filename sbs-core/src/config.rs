//! Configuration file handling for sbs-relay.
//!
//! Reads `~/.sbs-relay/config.yaml` (or an explicit path) with ingest port,
//! output listener, prediction cadence, and filter tuning. Command-line
//! flags override whatever the file sets.

use std::path::{Path, PathBuf};

use crate::kalman::FilterParams;
use crate::types::{RelayError, Result};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ingest: IngestConfig,
    pub output: OutputConfig,
    pub predictor: PredictorConfig,
    pub filter: FilterParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictorConfig {
    pub interval_ms: u64,
    /// Drop tracks silent for longer than this many seconds. `None` keeps
    /// every track for the life of the process.
    pub track_ttl: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ingest: IngestConfig { port: 6666 },
            output: OutputConfig {
                host: "0.0.0.0".into(),
                port: 30103,
            },
            predictor: PredictorConfig {
                interval_ms: 100,
                track_ttl: None,
            },
            filter: FilterParams::default(),
        }
    }
}

/// Get the config directory path (`~/.sbs-relay/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".sbs-relay")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load the default config file.
///
/// Returns default config if the file doesn't exist.
pub fn load_config() -> Result<Config> {
    let path = config_file();
    if !path.exists() {
        return Ok(Config::default());
    }
    load_config_from(&path)
}

/// Load a config file that must exist.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RelayError::Config(format!("{}: {e}", path.display())))?;
    parse_config(&text).map_err(|e| match e {
        RelayError::Config(msg) => RelayError::Config(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Parse simple YAML-like config text.
///
/// Unknown sections and keys are ignored; malformed values are errors.
pub fn parse_config(text: &str) -> Result<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for (lineno, line) in text.lines().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }
        let Some(section) = current_section.as_deref() else {
            continue;
        };

        let at = |e: String| RelayError::Config(format!("line {}: {key}: {e}", lineno + 1));
        match (section, key) {
            ("ingest", "port") => config.ingest.port = parse_num(val).map_err(at)?,
            ("output", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.output.host = v;
                }
            }
            ("output", "port") => config.output.port = parse_num(val).map_err(at)?,
            ("predictor", "interval_ms") => {
                let ms: u64 = parse_num(val).map_err(at)?;
                if ms == 0 {
                    return Err(at("must be greater than zero".into()));
                }
                config.predictor.interval_ms = ms;
            }
            ("predictor", "track_ttl") => {
                config.predictor.track_ttl = if is_null(val) {
                    None
                } else {
                    Some(parse_num(val).map_err(at)?)
                };
            }
            ("filter", "initial_variance") => {
                config.filter.initial_variance = parse_num(val).map_err(at)?
            }
            ("filter", "process_noise") => {
                config.filter.process_noise = parse_num(val).map_err(at)?
            }
            ("filter", "measurement_noise") => {
                config.filter.measurement_noise = parse_num(val).map_err(at)?
            }
            _ => {}
        }
    }

    Ok(config)
}

fn is_null(val: &str) -> bool {
    val == "null" || val == "~" || val.is_empty()
}

fn parse_string_value(val: &str) -> Option<String> {
    if is_null(val) {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_num<T: std::str::FromStr>(val: &str) -> std::result::Result<T, String>
where
    T::Err: std::fmt::Display,
{
    val.parse::<T>().map_err(|e| format!("invalid value '{val}': {e}"))
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# sbs-relay configuration".to_string(), String::new()];

    lines.push("ingest:".into());
    lines.push(format!("  port: {}", config.ingest.port));
    lines.push(String::new());

    lines.push("output:".into());
    lines.push(format!("  host: \"{}\"", config.output.host));
    lines.push(format!("  port: {}", config.output.port));
    lines.push(String::new());

    lines.push("predictor:".into());
    lines.push(format!("  interval_ms: {}", config.predictor.interval_ms));
    match config.predictor.track_ttl {
        Some(v) => lines.push(format!("  track_ttl: {v}")),
        None => lines.push("  track_ttl: null".into()),
    }
    lines.push(String::new());

    lines.push("filter:".into());
    lines.push(format!("  initial_variance: {}", config.filter.initial_variance));
    lines.push(format!("  process_noise: {}", config.filter.process_noise));
    lines.push(format!("  measurement_noise: {}", config.filter.measurement_noise));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
