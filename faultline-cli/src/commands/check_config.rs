//! Validate and print configuration.

use anyhow::{Context, Result};
use faultline_core::HarnessConfig;

/// Run the check-config command.
pub fn run(config: &HarnessConfig) -> Result<()> {
    config.validate().context("Configuration is invalid")?;
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;

    println!("=== faultline configuration ===");
    println!();
    println!("{}", rendered);
    Ok(())
}
