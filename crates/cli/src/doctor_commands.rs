//! `parley doctor`: health check for config, agent CLI, profiles and storage.
//!
//! Prints a structured report with `[ok]`, `[warn]`, `[fail]`, `[skip]`, or
//! `[info]` per item and exits non-zero when anything failed.

use std::path::Path;

use {
    anyhow::Result,
    parley_agents::{cli_version, locate_agent_cli},
    parley_config::{ParleyConfig, ProfileRegistry},
    parley_sessions::{SessionStore, SqliteSessionStore},
};

// ── ANSI helpers ────────────────────────────────────────────────────────────

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
    Skip,
    Info,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Info => "info",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Ok => GREEN,
            Self::Warn => YELLOW,
            Self::Fail => RED,
            Self::Skip => DIM,
            Self::Info => CYAN,
        }
    }
}

struct CheckItem {
    status: Status,
    message: String,
}

struct Section {
    title: String,
    items: Vec<CheckItem>,
}

impl Section {
    fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push(CheckItem {
            status,
            message: message.into(),
        });
    }

    fn has(&self, status: Status) -> bool {
        self.items.iter().any(|i| i.status == status)
    }
}

fn print_report(sections: &[Section]) -> (usize, usize) {
    let mut errors = 0usize;
    let mut warnings = 0usize;

    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for item in &section.items {
            let color = item.status.color();
            let label = item.status.label();
            eprintln!("  [{color}{label}{RESET}]  {}", item.message);
            match item.status {
                Status::Fail => errors += 1,
                Status::Warn => warnings += 1,
                _ => {},
            }
        }
        eprintln!();
    }

    (errors, warnings)
}

// ── Entry point ─────────────────────────────────────────────────────────────

pub async fn handle_doctor(
    config: &ParleyConfig,
    config_path: Option<&Path>,
    data_dir: &Path,
    database_path: &Path,
) -> Result<()> {
    eprintln!("{BOLD}parley doctor{RESET}");
    eprintln!("{BOLD}============={RESET}\n");

    let sections = vec![
        check_config(config, config_path),
        check_agent_cli(config).await,
        check_profiles(config),
        check_directories(data_dir),
        check_database(database_path).await,
    ];

    let (errors, warnings) = print_report(&sections);
    eprintln!("{BOLD}Summary:{RESET} {errors} error(s), {warnings} warning(s)");

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

// ── Config ──────────────────────────────────────────────────────────────────

fn check_config(config: &ParleyConfig, config_path: Option<&Path>) -> Section {
    let mut section = Section::new("Config");

    match config_path {
        Some(path) => match parley_config::load_config(path) {
            Ok(_) => section.push(Status::Ok, format!("Loaded {}", path.display())),
            Err(e) => section.push(Status::Fail, format!("{}: {e:#}", path.display())),
        },
        None => section.push(Status::Info, "No config file found (using defaults)"),
    }

    let limits = config.rate_limit;
    if limits.per_minute == 0 || limits.per_hour == 0 {
        section.push(Status::Fail, "Rate limits must be greater than zero");
    } else if limits.per_hour < limits.per_minute {
        section.push(
            Status::Warn,
            format!(
                "per_hour ({}) is below per_minute ({}); the hourly cap always wins",
                limits.per_hour, limits.per_minute
            ),
        );
    } else {
        section.push(
            Status::Ok,
            format!(
                "Rate limits: {}/minute, {}/hour per actor",
                limits.per_minute, limits.per_hour
            ),
        );
    }

    if config.output.max_message_len == 0 {
        section.push(Status::Fail, "output.max_message_len must be positive");
    }
    if config.agent.max_turns == 0 {
        section.push(Status::Fail, "agent.max_turns must be positive");
    }

    section
}

// ── Agent CLI ───────────────────────────────────────────────────────────────

async fn check_agent_cli(config: &ParleyConfig) -> Section {
    let mut section = Section::new("Agent CLI");

    let program = match &config.agent.cli_path {
        Some(path) if path.is_file() => path.clone(),
        Some(path) => {
            section.push(
                Status::Fail,
                format!("Configured agent CLI not found: {}", path.display()),
            );
            return section;
        },
        None => match locate_agent_cli() {
            Some(path) => path,
            None => {
                section.push(
                    Status::Fail,
                    "Agent CLI not found (set agent.cli_path or PARLEY_AGENT_CLI)",
                );
                return section;
            },
        },
    };

    match cli_version(&program).await {
        Ok(version) => section.push(Status::Ok, format!("{} ({version})", program.display())),
        Err(e) => section.push(
            Status::Warn,
            format!("{} found but --version failed: {e}", program.display()),
        ),
    }
    section.push(
        Status::Info,
        format!(
            "max_turns={}, timeout={}s",
            config.agent.max_turns, config.agent.timeout_secs
        ),
    );
    section
}

// ── Profiles ────────────────────────────────────────────────────────────────

fn check_profiles(config: &ParleyConfig) -> Section {
    let dir = &config.profiles.dir;
    let mut section = Section::new(format!("Profiles ({})", dir.display()));

    if !dir.is_dir() {
        section.push(Status::Fail, "Profiles directory does not exist");
        return section;
    }

    let registry = ProfileRegistry::discover(
        dir,
        config.profiles.base_system_prompt.as_deref(),
        config.profiles.default.clone(),
    );
    if registry.is_empty() {
        section.push(Status::Fail, "No valid profiles found");
        return section;
    }

    for profile in registry.iter() {
        let tools = profile
            .allowed_tools
            .as_ref()
            .map_or_else(|| "default tools".to_string(), |t| t.join(", "));
        section.push(
            Status::Ok,
            format!(
                "{} → {} [{tools}]",
                profile.name,
                profile.workspace.display()
            ),
        );
    }

    match (&config.profiles.default, registry.default_name()) {
        (Some(wanted), _) if !registry.contains(wanted) => {
            section.push(
                Status::Warn,
                format!("Default profile '{wanted}' not found; falling back to the first profile"),
            );
        },
        (_, Some(name)) => section.push(Status::Info, format!("Default profile: {name}")),
        (_, None) => {},
    }

    section
}

// ── Directories ─────────────────────────────────────────────────────────────

fn check_directories(data_dir: &Path) -> Section {
    let mut section = Section::new("Directories");

    if !data_dir.is_dir() {
        section.push(
            Status::Info,
            format!(
                "Data directory will be created on first run: {}",
                data_dir.display()
            ),
        );
        return section;
    }

    let marker = data_dir.join(".parley-doctor-write-check");
    match std::fs::write(&marker, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
            section.push(
                Status::Ok,
                format!("Data directory writable: {}", data_dir.display()),
            );
        },
        Err(e) => {
            section.push(Status::Fail, format!("Data directory is not writable: {e}"));
        },
    }
    section
}

// ── Database ────────────────────────────────────────────────────────────────

async fn check_database(database_path: &Path) -> Section {
    let mut section = Section::new("Database");

    if !database_path.exists() {
        section.push(
            Status::Skip,
            format!(
                "{} not found (created on first run)",
                database_path.display()
            ),
        );
        return section;
    }

    match SqliteSessionStore::open(database_path).await {
        Ok(store) => match store.stats().await {
            Ok(stats) => section.push(
                Status::Ok,
                format!(
                    "{} session(s), {} active, {} turn(s), {} tool call(s)",
                    stats.total_sessions,
                    stats.active_sessions,
                    stats.total_turns,
                    stats.total_tool_invocations
                ),
            ),
            Err(e) => section.push(Status::Fail, format!("Database query failed: {e}")),
        },
        Err(e) => section.push(Status::Fail, format!("Cannot open database: {e}")),
    }
    section
}
