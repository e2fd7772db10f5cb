use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use volt_core::VoltConfig;

/// Write a default configuration file.
#[derive(Parser)]
pub struct InitCommand {
    /// Where to write the file.
    #[arg(short, long, default_value = "volt.toml")]
    pub path: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn execute(self) -> Result<()> {
        write_default_config(&self.path, self.force)?;
        println!("Wrote {}", self.path.display());
        Ok(())
    }
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let content = VoltConfig::default().to_toml()?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
