use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{ConfigArgs, ConfigCommands};
use crate::settings::Settings;

/// `config get` prints one value; `config set` updates the tree and
/// writes it back to the settings file (the user file unless an
/// explicit `--settings-file` was given).
pub fn cmd_config(
    args: ConfigArgs,
    settings: &mut Settings,
    settings_file: Option<&Path>,
) -> Result<()> {
    match args.cmd {
        ConfigCommands::Get { key } => {
            let value = settings
                .get(&key)
                .with_context(|| format!("settings key {} is not set", key))?;
            print!("{}", serde_yaml_ng::to_string(value)?);
            Ok(())
        }
        ConfigCommands::Set { pairs } => {
            settings.update_params(&pairs)?;
            let path = settings_path(settings_file)?;
            settings.save(&path)?;
            info!(path = %path.display(), "saved settings");
            Ok(())
        }
    }
}

fn settings_path(settings_file: Option<&Path>) -> Result<PathBuf> {
    match settings_file {
        Some(path) => Ok(path.to_path_buf()),
        None => Settings::user_settings_file().context("cannot determine the home directory"),
    }
}
