//! `parley profiles`: show discovered agent profiles.

use {
    clap::Subcommand,
    parley_config::{ParleyConfig, ProfileRegistry},
};

#[derive(Subcommand)]
pub enum ProfileAction {
    /// List profiles and their workspaces.
    List,
    /// Print a profile's resolved system prompt.
    Show { name: String },
}

pub fn handle_profiles(action: ProfileAction, config: &ParleyConfig) -> anyhow::Result<()> {
    let registry = ProfileRegistry::discover(
        &config.profiles.dir,
        config.profiles.base_system_prompt.as_deref(),
        config.profiles.default.clone(),
    );

    match action {
        ProfileAction::List => {
            if registry.is_empty() {
                println!("No profiles found in {}.", config.profiles.dir.display());
                return Ok(());
            }
            let default = registry.default_name();
            for profile in registry.iter() {
                let marker = if Some(profile.name.as_str()) == default {
                    " (default)"
                } else {
                    ""
                };
                println!("  {}{marker}", profile.name);
                if let Some(description) = &profile.description {
                    println!("      {description}");
                }
                println!("      workspace: {}", profile.workspace.display());
                if let Some(tools) = &profile.allowed_tools {
                    println!("      tools: {}", tools.join(", "));
                }
            }
        },
        ProfileAction::Show { name } => {
            let profile = registry.get(&name)?;
            println!("{}", profile.system_prompt);
        },
    }
    Ok(())
}
