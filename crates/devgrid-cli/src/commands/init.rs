use std::path::Path;

use anyhow::{Context, bail};

use devgrid_core::DevgridConfig;
use devgrid_core::config::CONFIG_FILE_NAME;

pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    let output = path.join(CONFIG_FILE_NAME);
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let installer_dir = std::fs::canonicalize(path)
        .with_context(|| format!("installer directory {} not found", path.display()))?;
    let config = DevgridConfig::scaffold(&installer_dir);
    std::fs::write(&output, config.to_toml_string()?)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("✓ Generated {}", output.display());
    Ok(())
}
