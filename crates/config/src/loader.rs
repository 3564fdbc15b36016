use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::ParleyConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parley.toml", "parley.yaml", "parley.yml", "parley.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ParleyConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./parley.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/parley/parley.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ParleyConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load() -> ParleyConfig {
    let mut config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                ParleyConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        ParleyConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

/// Apply `PARLEY_*` environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: &mut ParleyConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut ParleyConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(path) = non_empty("PARLEY_AGENT_CLI") {
        config.agent.cli_path = Some(PathBuf::from(path));
    }
    if let Some(path) = non_empty("PARLEY_DATABASE_PATH") {
        config.storage.database_path = Some(PathBuf::from(path));
    }
    if let Some(dir) = non_empty("PARLEY_PROFILES_DIR") {
        config.profiles.dir = PathBuf::from(dir);
    }
    if let Some(name) = non_empty("PARLEY_DEFAULT_PROFILE") {
        config.profiles.default = Some(name);
    }
    if let Some(raw) = non_empty("PARLEY_RATE_PER_MINUTE") {
        match raw.parse() {
            Ok(n) => config.rate_limit.per_minute = n,
            Err(e) => warn!(value = %raw, error = %e, "ignoring invalid PARLEY_RATE_PER_MINUTE"),
        }
    }
    if let Some(raw) = non_empty("PARLEY_RATE_PER_HOUR") {
        match raw.parse() {
            Ok(n) => config.rate_limit.per_hour = n,
            Err(e) => warn!(value = %raw, error = %e, "ignoring invalid PARLEY_RATE_PER_HOUR"),
        }
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/parley/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "parley").map(|d| d.config_dir().to_path_buf())
}

/// Returns the user data directory, falling back to `./.parley`.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "parley")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".parley"))
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parley.toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ParleyConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
