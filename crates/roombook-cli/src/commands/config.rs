//! Configuration commands.

use crate::config::RoombookConfig;
use crate::error::{CliError, CliResult};

/// Dump the current configuration to stdout.
pub fn dump(config: &RoombookConfig) -> CliResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| CliError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", RoombookConfig::default_path().display());
    println!("{}", toml_str);
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &RoombookConfig) -> CliResult<()> {
    config.validate()?;
    if config.api.base_url.is_none() {
        println!("warning: api.base_url is not set; only `config` commands will work.");
    }
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration and store paths.
pub fn path(config: &RoombookConfig) -> CliResult<()> {
    println!("config: {}", RoombookConfig::default_path().display());
    println!("store:  {}", config.store_path().display());
    Ok(())
}
