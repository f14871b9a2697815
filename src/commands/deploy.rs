use anyhow::Result;
use tracing::info;

use super::common::{build_backend, load_tutorial, parse_envars};
use crate::backend::DeployOptions;
use crate::cli::DeployArgs;
use crate::settings::Settings;

pub async fn cmd_deploy(args: DeployArgs, settings: &Settings, user: &str) -> Result<()> {
    let envars = parse_envars(&args.env)?;
    let tutorial = load_tutorial(&args.tutorial.repo, &args.tutorial.tutorial).await?;
    // Fail before anything is provisioned if a required variable is missing
    tutorial.check_envars(&envars)?;

    let backend = build_backend(args.tutorial.backend, settings, user).await?;
    info!(
        tutorial = %tutorial.name,
        backend = backend.name(),
        "deploying tutorial"
    );

    let options = DeployOptions {
        headless: args.headless,
    };
    let deployment = backend.deploy(&tutorial, &envars, &options).await?;
    match deployment.endpoint {
        Some(url) => println!("{}", url),
        None => info!("deployment finished without an endpoint"),
    }
    Ok(())
}
