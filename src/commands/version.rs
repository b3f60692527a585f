use anyhow::{anyhow, Result};
use tracing::info;

use super::start_manager;

/// Command to launch a worker and print the version it reports
pub struct VersionCommand;

impl VersionCommand {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self) -> Result<()> {
        let manager = start_manager(false).await?;
        if !manager.process_isolation() {
            return Err(anyhow!("Process isolation is disabled; there is no worker to ask"));
        }

        let (instance, _events) = manager.acquire_scan().await?;
        let version = instance.version().await;
        instance.dispose().await;

        match version {
            Some(version) => {
                info!("Worker is ready");
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                println!("worker {}", version.trim());
                Ok(())
            }
            None => Err(anyhow!("The worker did not report a version")),
        }
    }
}

impl Default for VersionCommand {
    fn default() -> Self {
        Self::new()
    }
}
