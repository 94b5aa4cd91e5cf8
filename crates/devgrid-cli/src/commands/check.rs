use std::path::Path;
use std::time::Duration;

use anyhow::bail;

use devgrid_cluster::{DevgridError, check_prerequisites};
use devgrid_core::DevgridConfig;
use devgrid_exec::TokioRunner;

pub async fn check(config_path: Option<&Path>) -> anyhow::Result<()> {
    let (config, _) = DevgridConfig::load(config_path)?;
    let runner = TokioRunner::new().with_timeout(Some(Duration::from_secs(10)));

    match check_prerequisites(&config, &runner).await {
        Ok(()) => {
            println!(
                "✓ {} ({}) and {} ({}) are installed",
                config.discovery.display_name,
                config.discovery.binary,
                config.scheduler.display_name,
                config.scheduler.binary
            );
            Ok(())
        }
        Err(DevgridError::MissingDependency { message, .. }) => bail!("{message}"),
        Err(err) => Err(err.into()),
    }
}
