use anyhow::{Context, Result};
use dcmigrate_core::provisioning::ProvisioningConfig;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub fn render(path: &Path) -> Result<()> {
    let rendered = render_file(path)?;
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

fn render_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ProvisioningConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {} as a provisioning config", path.display()))?;
    Ok(config.serialize())
}
