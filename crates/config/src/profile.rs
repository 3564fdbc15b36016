//! Agent profiles.
//!
//! A profile is a directory containing `agent.yaml` and, optionally,
//! `system_prompt.txt`:
//!
//! ```text
//! agents/
//!   market-analyst/
//!     agent.yaml          # name, workspace, allowed_tools, system_prompt
//!     system_prompt.txt   # wins over the yaml `system_prompt` field
//!     workspace/          # default working directory for the agent
//! ```

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use {
    serde::Deserialize,
    tracing::{debug, info, warn},
};

use crate::error::{Context, Error, Result};

const MANIFEST_FILE: &str = "agent.yaml";
const PROMPT_FILE: &str = "system_prompt.txt";

/// Separator between the shared base prompt and a profile's own prompt.
fn prompt_separator() -> String {
    "=".repeat(60)
}

/// A fully resolved agent profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    /// Overrides the globally configured tool list when set.
    pub allowed_tools: Option<Vec<String>>,
    /// Directory the agent runs in and where attachments are saved.
    pub workspace: PathBuf,
    /// The profile directory itself.
    pub root: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileManifest {
    name: Option<String>,
    description: Option<String>,
    system_prompt: Option<String>,
    workspace: Option<PathBuf>,
    allowed_tools: Option<Vec<String>>,
}

/// Load one profile directory.
///
/// The workspace is resolved from the manifest `workspace` field (relative
/// paths are taken from the profile directory), then
/// `$PARLEY_WORKSPACE_ROOT/<name>/workspace`, then `<profile>/workspace`.
/// The workspace directory is created if missing.
pub fn load_profile(dir: &Path, base_prompt: Option<&str>) -> Result<AgentProfile> {
    let workspace_root = std::env::var_os("PARLEY_WORKSPACE_ROOT")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    load_profile_with(dir, base_prompt, workspace_root.as_deref())
}

pub(crate) fn load_profile_with(
    dir: &Path,
    base_prompt: Option<&str>,
    workspace_root: Option<&Path>,
) -> Result<AgentProfile> {
    if !dir.is_dir() {
        return Err(Error::invalid_profile(dir, "not a directory"));
    }
    let root = dir.canonicalize()?;

    let manifest_path = root.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(Error::invalid_profile(&root, "agent.yaml not found"));
    }
    let raw = fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    let manifest: ProfileManifest = if raw.trim().is_empty() {
        ProfileManifest::default()
    } else {
        serde_yaml::from_str(&raw)?
    };

    let name = manifest
        .name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| root.file_name().map(|n| n.to_string_lossy().into_owned()))
        .ok_or_else(|| Error::invalid_profile(&root, "profile has no name"))?;

    let prompt_path = root.join(PROMPT_FILE);
    let own_prompt = if prompt_path.exists() {
        fs::read_to_string(&prompt_path)
            .with_context(|| format!("failed to read {}", prompt_path.display()))?
    } else if let Some(prompt) = manifest.system_prompt {
        prompt
    } else {
        return Err(Error::invalid_profile(
            &root,
            "neither system_prompt.txt nor a system_prompt field is present",
        ));
    };

    let system_prompt = match base_prompt.map(str::trim).filter(|b| !b.is_empty()) {
        Some(base) => format!("{base}\n\n{}\n\n{}", prompt_separator(), own_prompt.trim()),
        None => own_prompt,
    };

    let workspace = match (manifest.workspace, workspace_root) {
        (Some(ws), _) if ws.is_absolute() => ws,
        (Some(ws), _) => root.join(ws),
        (None, Some(ws_root)) => ws_root.join(&name).join("workspace"),
        (None, None) => root.join("workspace"),
    };
    fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;

    debug!(profile = %name, workspace = %workspace.display(), "loaded agent profile");

    Ok(AgentProfile {
        name,
        description: manifest.description,
        system_prompt,
        allowed_tools: manifest.allowed_tools,
        workspace,
        root,
    })
}

/// All profiles discovered under one directory, keyed by profile name.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, AgentProfile>,
    default: Option<String>,
}

impl ProfileRegistry {
    /// Scan `dir` for profile sub-directories. Directories that fail to load
    /// are skipped with a warning.
    pub fn discover(dir: &Path, base_prompt: Option<&str>, default: Option<String>) -> Self {
        let mut profiles = BTreeMap::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read profiles directory");
                return Self { profiles, default };
            },
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.join(MANIFEST_FILE).exists() {
                continue;
            }
            match load_profile(&path, base_prompt) {
                Ok(profile) => {
                    profiles.insert(profile.name.clone(), profile);
                },
                Err(e) => warn!(dir = %path.display(), error = %e, "skipping agent profile"),
            }
        }

        info!(count = profiles.len(), dir = %dir.display(), "discovered agent profiles");
        Self { profiles, default }
    }

    /// Build a registry from already-loaded profiles.
    pub fn from_profiles(
        profiles: impl IntoIterator<Item = AgentProfile>,
        default: Option<String>,
    ) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            default,
        }
    }

    pub fn get(&self, name: &str) -> Result<&AgentProfile> {
        self.profiles
            .get(name)
            .ok_or_else(|| Error::profile_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Configured default if it exists, otherwise the first profile by name.
    pub fn default_name(&self) -> Option<&str> {
        if let Some(name) = self.default.as_deref()
            && self.profiles.contains_key(name)
        {
            return Some(name);
        }
        self.profiles.keys().next().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
