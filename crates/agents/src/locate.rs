//! Finding the agent CLI binary.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {tokio::process::Command, tracing::debug};

use crate::error::{Error, Result};

const CLI_NAME: &str = "claude";
const ENV_VAR: &str = "PARLEY_AGENT_CLI";

/// Locate the agent CLI.
///
/// Search order: `$PARLEY_AGENT_CLI`, `claude` on `$PATH`, then the usual
/// install locations.
pub fn locate_agent_cli() -> Option<PathBuf> {
    let home = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf());
    locate_with(
        std::env::var_os(ENV_VAR),
        which::which(CLI_NAME).ok(),
        home.as_deref(),
        Path::is_file,
    )
}

fn install_candidates(home: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = home {
        candidates.push(home.join(".local/bin").join(CLI_NAME));
        candidates.push(home.join(".claude/local").join(CLI_NAME));
    }
    candidates.push(PathBuf::from("/usr/local/bin").join(CLI_NAME));
    candidates.push(PathBuf::from("/usr/bin").join(CLI_NAME));
    candidates.push(PathBuf::from("/opt/homebrew/bin").join(CLI_NAME));
    if let Some(home) = home {
        candidates.push(home.join(".npm-global/bin").join(CLI_NAME));
    }
    candidates
}

fn locate_with(
    env_value: Option<OsString>,
    on_path: Option<PathBuf>,
    home: Option<&Path>,
    is_file: impl Fn(&Path) -> bool,
) -> Option<PathBuf> {
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        let path = PathBuf::from(value);
        if is_file(&path) {
            debug!(path = %path.display(), "agent CLI from {ENV_VAR}");
            return Some(path);
        }
        debug!(path = %path.display(), "{ENV_VAR} does not point at a file, ignoring");
    }

    if let Some(path) = on_path {
        debug!(path = %path.display(), "agent CLI from PATH");
        return Some(path);
    }

    install_candidates(home).into_iter().find(|p| is_file(p))
}

/// Run `<cli> --version` and return its trimmed output.
pub async fn cli_version(program: &Path) -> Result<String> {
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| Error::timeout("--version did not return within 10s"))?
    .map_err(|source| Error::Spawn {
        program: program.to_path_buf(),
        source,
    })?;

    if !output.status.success() {
        return Err(Error::transport(format!(
            "--version exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
