//! `toolweave config`: configuration management commands.

use clap::Subcommand;
use toolweave_config::{AppConfig, ConfigError, ToolErrorPolicy};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration as TOML
    Default,
    /// Print the config file path
    Path,
    /// Check the configuration and report warnings
    Validate,
}

pub fn run(config: Result<AppConfig, ConfigError>, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => show(config?),
        ConfigAction::Default => {
            println!("{}", AppConfig::default_toml());
            Ok(())
        }
        ConfigAction::Path => {
            println!("{}", AppConfig::config_dir().join("config.toml").display());
            Ok(())
        }
        ConfigAction::Validate => validate(config),
    }
}

fn show(config: AppConfig) -> anyhow::Result<()> {
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn validate(config: Result<AppConfig, ConfigError>) -> anyhow::Result<()> {
    println!("Validating configuration...");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    let orchestrator = &config.orchestrator;
    println!();
    println!("   Max steps:    {}", orchestrator.max_steps);
    println!("   Retries:      {}", orchestrator.max_retries);
    println!("   Tool errors:  {:?}", orchestrator.tool_error_policy);
    println!("   Final step:   {:?}", orchestrator.final_step_tools);
    match &orchestrator.active_tools {
        Some(tools) => println!("   Active tools: {}", tools.join(", ")),
        None => println!("   Active tools: all"),
    }
    println!("   Frame buffer: {}", config.stream.frame_buffer);

    Ok(())
}

/// Settings that load fine but are probably not what was meant.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    let orchestrator = &config.orchestrator;

    if orchestrator.max_steps == 1 {
        warnings.push("max_steps = 1: tool results never reach the model");
    }
    if orchestrator
        .active_tools
        .as_ref()
        .is_some_and(|tools| tools.is_empty())
    {
        warnings.push("active_tools is empty: every tool call will fail as unknown");
    }
    if orchestrator.tool_error_policy == ToolErrorPolicy::Propagate {
        warnings.push("tool_error_policy = propagate: one failing tool ends the whole run");
    }
    if !orchestrator.close_data_on_finish {
        warnings.push("close_data_on_finish = false: callers must close the side-channel");
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn defaults_have_no_warnings() {
        assert!(warnings(&AppConfig::default()).is_empty());
    }

    #[test]
    fn empty_active_tools_warns() {
        let mut config = AppConfig::default();
        config.orchestrator.active_tools = Some(Vec::new());
        config.orchestrator.max_steps = 1;
        assert_eq!(warnings(&config).len(), 2);
    }
}
