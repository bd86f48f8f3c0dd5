//! Configuration loading and environment parsing.

use super::validation::validate_config_security;
use super::Config;
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Prefix for per-field overrides, e.g. `PEERLINK__RELAY__HEARTBEAT_INTERVAL_SECS=15`.
pub const ENV_OVERRIDE_PREFIX: &str = "PEERLINK__";

/// Load configuration with the following precedence (highest first):
/// 1) `PEERLINK_CONFIG_JSON` env var containing raw JSON
/// 2) If `PEERLINK_CONFIG_STDIN=true/1`, read JSON from stdin
/// 3) File pointed to by `PEERLINK_CONFIG_PATH`
/// 4) config.json in the current working directory
/// 5) config.json next to the executable
/// 6) Defaults compiled into the binary
///
/// `PEERLINK__`-prefixed variables are applied last, using `__` as the
/// nesting separator. Read and parse failures are reported on stderr and the
/// offending source is skipped.
///
/// Validation problems are reported but not returned; `main` re-runs
/// [`validate_config_security`] and fails hard.
#[must_use]
pub fn load() -> Config {
    let defaults = Config::default();
    let mut merged = serde_json::to_value(&defaults).unwrap_or_else(|_| Value::Object(Map::new()));

    // Sources are merged lowest precedence first so later merges win.
    if let Ok(exe_path) = env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            merge_file_source(&mut merged, &exe_dir.join("config.json"));
        }
    }

    merge_file_source(&mut merged, Path::new("config.json"));

    if let Ok(path) = env::var("PEERLINK_CONFIG_PATH") {
        merge_file_source(&mut merged, &PathBuf::from(path));
    }

    if env::var("PEERLINK_CONFIG_STDIN").is_ok_and(|val| env_var_truthy(&val)) {
        let mut buf = String::new();
        match std::io::stdin().read_to_string(&mut buf) {
            Ok(_) => {
                if let Some(value) = parse_json_document(&buf, "stdin") {
                    merge_values(&mut merged, value);
                }
            }
            Err(e) => eprintln!("Failed to read config from stdin: {e}"),
        }
    }

    if let Ok(json) = env::var("PEERLINK_CONFIG_JSON") {
        if let Some(value) = parse_json_document(&json, "PEERLINK_CONFIG_JSON") {
            merge_values(&mut merged, value);
        }
    }

    apply_env_overrides(&mut merged, env::vars());

    let config = match serde_json::from_value::<Config>(merged) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to deserialize config; using defaults: {e}");
            defaults
        }
    };

    if let Err(e) = validate_config_security(&config) {
        eprintln!("Configuration validation error: {e}");
    }

    config
}

/// Builds a config from a JSON document layered over the defaults, then
/// applies the given `PEERLINK__` overrides.
pub fn load_from_str<I>(json: &str, overrides: I) -> anyhow::Result<Config>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut merged = serde_json::to_value(Config::default())?;
    if !json.trim().is_empty() {
        merge_values(&mut merged, serde_json::from_str(json)?);
    }
    apply_env_overrides(&mut merged, overrides);
    Ok(serde_json::from_value(merged)?)
}

fn parse_json_document(raw: &str, label: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }

    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            eprintln!("Failed to parse config from {label}: {err}");
            None
        }
    }
}

fn merge_file_source(target: &mut Value, path: &Path) {
    if path.as_os_str().is_empty() || !path.exists() {
        return;
    }

    match fs::read_to_string(path) {
        Ok(contents) => {
            let label = format!("file {}", path.display());
            if let Some(value) = parse_json_document(&contents, &label) {
                merge_values(target, value);
            }
        }
        Err(err) => eprintln!("Failed to read config from {}: {err}", path.display()),
    }
}

fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides<I>(root: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, raw_value) in vars {
        let Some(stripped) = key.strip_prefix(ENV_OVERRIDE_PREFIX) else {
            continue;
        };

        let path: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();

        if path.is_empty() {
            continue;
        }

        set_nested_value(root, &path, parse_env_value(&raw_value));
    }
}

fn env_var_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Comma-separated values become arrays; everything else is parsed as a
/// JSON scalar, falling back to a plain string.
fn parse_env_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.contains(',') {
        return Value::Array(trimmed.split(',').map(|s| parse_scalar(s.trim())).collect());
    }
    parse_scalar(trimmed)
}

fn parse_scalar(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn set_nested_value(target: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *target = value;
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };

    if rest.is_empty() {
        map.insert(head.clone(), value);
    } else {
        let child = map
            .entry(head.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        set_nested_value(child, rest, value);
    }
}
