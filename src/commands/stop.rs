use anyhow::Result;
use tracing::info;

use super::common::{build_backend, load_tutorial};
use crate::cli::StopArgs;
use crate::settings::Settings;

pub async fn cmd_stop(args: StopArgs, settings: &Settings, user: &str) -> Result<()> {
    let tutorial = load_tutorial(&args.tutorial.repo, &args.tutorial.tutorial).await?;
    let backend = build_backend(args.tutorial.backend, settings, user).await?;
    info!(
        tutorial = %tutorial.name,
        backend = backend.name(),
        "stopping tutorial"
    );
    backend.stop(&tutorial).await?;
    info!(tutorial = %tutorial.name, "tutorial stopped");
    Ok(())
}
