//! Configuration loading
//!
//! Embedded defaults, then optional files, then the environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let environment = std::env::var("CONVEYOR_ENV").unwrap_or_else(|_| "development".to_string());
    build(
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            // CONVEYOR_LLM__PROVIDER: single `_` after the prefix, `__` between keys
            .add_source(
                Environment::with_prefix("CONVEYOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            ),
    )
}

/// Load embedded defaults overlaid with one TOML document
pub fn load_from_str(overrides: &str) -> Result<AppConfig> {
    build(
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(overrides, FileFormat::Toml)),
    )
}

fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<AppConfig> {
    builder
        .build()
        .context("Failed to build configuration")?
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
