//! Configuration loading, env substitution, and agent profiles.
//!
//! Config files: `parley.toml`, `parley.yaml`, `parley.yml` or `parley.json`,
//! searched in `./` then `~/.config/parley/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in all string
//! values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod profile;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_or_default_config_path,
        load_config,
    },
    profile::{AgentProfile, ProfileRegistry, load_profile},
    schema::{
        AgentCliConfig, AttachmentsConfig, OutputConfig, ParleyConfig, ProfilesConfig,
        RateLimitConfig, StorageConfig,
    },
};
