//! Configuration management command
//!
//! Provides CLI interface to view and edit system configuration.

use crate::system_config::{self, SystemConfig};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use quiesce_core::KeyPolicyKind;

fn list_value(values: &[String]) -> String {
    format!("[{}]", values.join(", "))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// List all configuration values
pub async fn run_list() -> Result<()> {
    let config = system_config::load()?;
    let config_path = system_config::config_file_path()
        .context("Could not determine config file path")?;

    println!("{}", "System Configuration".bold());
    println!("{}: {}\n", "Location".dimmed(), config_path.display().dimmed());

    println!("{}", "[coalescer]".yellow());
    println!(
        "  {} = {} {}",
        "debounce_ms".cyan(),
        config.coalescer.debounce_ms,
        format!("({:?})", config.coalescer.window()).dimmed()
    );
    println!(
        "  {} = {} {}",
        "max_wait_ms".cyan(),
        config.coalescer.max_wait_ms,
        if config.coalescer.max_wait_ms == config.coalescer.debounce_ms {
            "(fixed window)".dimmed().to_string()
        } else {
            format!("({:?})", config.coalescer.max_wait()).dimmed().to_string()
        }
    );
    println!("  {} = {}", "key_policy".cyan(), config.coalescer.key_policy);

    println!("\n{}", "[watch]".yellow());
    println!("  {} = {}", "use_gitignore".cyan(), config.watch.use_gitignore);
    println!("  {} = {}", "use_quiesceignore".cyan(), config.watch.use_quiesceignore);
    println!(
        "  {} = {}",
        "additional_patterns".cyan(),
        list_value(&config.watch.additional_patterns)
    );
    println!(
        "  {} = {}",
        "project_manifests".cyan(),
        list_value(&config.watch.project_manifests)
    );

    println!("\n{}", "[log]".yellow());
    println!("  {} = {}", "filter".cyan(), config.log.filter);

    println!("\n{}", "Valid Ranges:".bold());
    println!("  debounce_ms: 1-60,000");
    println!("  max_wait_ms: debounce_ms-600,000");
    println!("  key_policy: subject | subject-and-kind");

    Ok(())
}

fn get_value(config: &SystemConfig, key: &str) -> Result<String> {
    let value = match key {
        "coalescer.debounce_ms" => config.coalescer.debounce_ms.to_string(),
        "coalescer.max_wait_ms" => config.coalescer.max_wait_ms.to_string(),
        "coalescer.key_policy" => config.coalescer.key_policy.to_string(),
        "watch.use_gitignore" => config.watch.use_gitignore.to_string(),
        "watch.use_quiesceignore" => config.watch.use_quiesceignore.to_string(),
        "watch.additional_patterns" => config.watch.additional_patterns.join(","),
        "watch.project_manifests" => config.watch.project_manifests.join(","),
        "log.filter" => config.log.filter.clone(),
        _ => anyhow::bail!(
            "Unknown config key: {}. Use 'quiesce config list' to see available keys.",
            key
        ),
    };
    Ok(value)
}

fn set_value(config: &mut SystemConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "coalescer.debounce_ms" => {
            config.coalescer.debounce_ms = value
                .parse()
                .context("Invalid value: must be a positive integer")?;
        }
        "coalescer.max_wait_ms" => {
            config.coalescer.max_wait_ms = value
                .parse()
                .context("Invalid value: must be a positive integer")?;
        }
        "coalescer.key_policy" => {
            config.coalescer.key_policy = value
                .parse::<KeyPolicyKind>()
                .map_err(anyhow::Error::msg)?;
        }
        "watch.use_gitignore" => {
            config.watch.use_gitignore = value
                .parse()
                .context("Invalid value: must be 'true' or 'false'")?;
        }
        "watch.use_quiesceignore" => {
            config.watch.use_quiesceignore = value
                .parse()
                .context("Invalid value: must be 'true' or 'false'")?;
        }
        "watch.additional_patterns" => config.watch.additional_patterns = parse_list(value),
        "watch.project_manifests" => config.watch.project_manifests = parse_list(value),
        "log.filter" => config.log.filter = value.to_string(),
        _ => anyhow::bail!(
            "Unknown config key: {}. Use 'quiesce config list' to see available keys.",
            key
        ),
    }
    Ok(())
}

/// Get a single configuration value
pub async fn run_get(key: &str) -> Result<()> {
    let config = system_config::load()?;
    println!("{}", get_value(&config, key)?);
    Ok(())
}

/// Set a configuration value
pub async fn run_set(key: &str, value: &str) -> Result<()> {
    let mut config = system_config::load()?;
    set_value(&mut config, key, value)?;

    // Validate before saving
    config.validate().context("Invalid configuration value")?;

    system_config::save(&config)?;

    println!("{} {} = {}", "✓".green(), key.cyan(), value);
    println!(
        "{}",
        "Note: Restart running watchers for changes to take effect".yellow()
    );

    Ok(())
}

/// Show the config file path and optionally create it
pub async fn run_path(create: bool) -> Result<()> {
    let config_path = system_config::config_file_path()
        .context("Could not determine config file path")?;

    if create && system_config::init_if_missing()? {
        println!("{} Created config file at: {}", "✓".green(), config_path.display());
    } else if config_path.exists() {
        println!("{}", config_path.display());
    } else {
        println!("{}", config_path.display());
        println!("{}", "File does not exist. Use --create to create it.".yellow());
    }

    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", system_config::example_config());
    Ok(())
}
