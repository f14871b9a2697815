use clap::{Args, Parser, Subcommand};

use crate::backend::BackendKind;

#[derive(Parser, Debug)]
#[command(name = "tutorbox", version, about = "Deploy containerized tutorials locally or to a cloud")]
pub struct Cli {
    /// Settings file (defaults to ~/.tutorbox/settings.yml)
    #[arg(long, global = true)]
    pub settings_file: Option<String>,

    /// Override a settings value for this invocation, e.g.
    /// aws.region=us-west-2 (repeatable)
    #[arg(long = "config", global = true)]
    pub config: Vec<String>,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a tutorial from a repository
    Deploy(DeployArgs),
    /// Tear down a deployed tutorial and everything created for it
    Stop(StopArgs),
    /// List tutorial names in a repository
    List(ListArgs),
    /// Show tutorial metadata as JSON
    Show(ShowArgs),
    /// Deploy headless, wait for readiness, then tear down (CI helper)
    Test(TestArgs),
    /// List instances known to a backend
    Instances(InstancesArgs),
    /// Read or persist settings values
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct TutorialArgs {
    /// Repository the tutorial lives in, e.g. org/repo
    pub repo: String,

    /// Tutorial name, e.g. "Flux Tutorial: Intro"
    pub tutorial: String,

    /// Backend to use (defaults to settings default_backend)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub tutorial: TutorialArgs,

    /// Environment var KEY=VALUE; values may contain commas (repeatable)
    #[arg(long)]
    pub env: Vec<String>,

    /// Run detached instead of attaching the container's stdio
    /// (local backends; cloud deploys are always detached)
    #[arg(long)]
    pub headless: bool,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    #[command(flatten)]
    pub tutorial: TutorialArgs,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Repository to list, e.g. org/repo
    pub repo: String,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Repository to show, e.g. org/repo
    pub repo: String,

    /// Limit output to one tutorial
    pub tutorial: Option<String>,

    /// Write JSON here instead of stdout
    #[arg(long)]
    pub outfile: Option<String>,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    #[command(flatten)]
    pub tutorial: TutorialArgs,

    /// Environment var KEY=VALUE; values may contain commas (repeatable)
    #[arg(long)]
    pub env: Vec<String>,

    /// Extra settle time after the endpoint reports ready
    #[arg(long, default_value_t = 0)]
    pub sleep_seconds: u64,

    /// HTTP status treated as success
    #[arg(long, default_value_t = 200)]
    pub http_code: u16,
}

#[derive(Args, Debug)]
pub struct InstancesArgs {
    /// Backend to query (defaults to settings default_backend)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print a settings value by dotted path, e.g. aws.region
    Get { key: String },
    /// Set key=value pairs and persist them to the settings file
    Set { pairs: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_env_values_keep_commas() {
        let cli = Cli::try_parse_from([
            "tutorbox",
            "deploy",
            "org/repo",
            "Some Tutorial",
            "--env",
            "LIST=a,b,c",
            "--env",
            "TOKEN=secret",
        ])
        .unwrap();
        let Commands::Deploy(args) = cli.cmd else {
            panic!("expected deploy");
        };
        assert_eq!(args.env, vec!["LIST=a,b,c", "TOKEN=secret"]);
    }

    #[test]
    fn test_config_set_parses_pairs() {
        let cli = Cli::try_parse_from(["tutorbox", "config", "set", "aws.region=us-west-2"])
            .unwrap();
        let Commands::Config(args) = cli.cmd else {
            panic!("expected config");
        };
        assert!(matches!(
            args.cmd,
            ConfigCommands::Set { ref pairs } if pairs == &["aws.region=us-west-2"]
        ));
    }
}
