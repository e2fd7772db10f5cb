use std::path::Path;

use anyhow::Result;
use clap::Parser;

use volt_core::VoltConfig;

use crate::logging;
use crate::runtime::Volt;

/// Join the cluster and run until interrupted.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path. Defaults apply if it does not exist.
    #[arg(short, long, default_value = "volt.toml")]
    pub config: String,

    /// Listen address for the status server (overrides config).
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Member tags, comma separated (overrides config).
    #[arg(short, long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Log at debug level.
    #[arg(long)]
    pub debug: bool,
}

impl RunCommand {
    pub async fn execute(self) -> Result<()> {
        let found = Path::new(&self.config).exists();
        let config = self.load_config(found)?;

        logging::init(&config.observability.logging, self.debug)?;

        if found {
            tracing::info!("Loaded configuration from {}", self.config);
        } else {
            tracing::warn!("{} not found, using defaults", self.config);
        }

        Volt::new(config).run().await
    }

    fn load_config(&self, found: bool) -> Result<VoltConfig> {
        let mut config = if found {
            VoltConfig::from_file(&self.config)?
        } else {
            VoltConfig::default()
        };

        if let Some(listen) = &self.listen {
            config.node.listen_address = listen.clone();
        }
        if !self.tags.is_empty() {
            config.node.tags = self.tags.clone();
        }
        Ok(config)
    }
}
