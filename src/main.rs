use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tutorbox::backend::current_user;
use tutorbox::cli::{self, Commands};
use tutorbox::commands;
use tutorbox::settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Only use colors when outputting to a TTY (not when piped to file)
    let use_color = atty::is(atty::Stream::Stdout);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(true)
        .with_ansi(use_color)
        .init();

    let settings_file = cli.settings_file.as_deref().map(Path::new);
    let mut settings = match Settings::load(settings_file) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.update_params(&cli.config) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
    let user = current_user();

    let result = match cli.cmd {
        Commands::Deploy(args) => commands::cmd_deploy(args, &settings, &user).await,
        Commands::Stop(args) => commands::cmd_stop(args, &settings, &user).await,
        Commands::List(args) => commands::cmd_list(args).await,
        Commands::Show(args) => commands::cmd_show(args).await,
        Commands::Test(args) => commands::cmd_test(args, &settings, &user).await,
        Commands::Instances(args) => commands::cmd_instances(args, &settings, &user).await,
        Commands::Config(args) => commands::cmd_config(args, &mut settings, settings_file),
    };

    if let Err(e) = &result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }

    result
}
