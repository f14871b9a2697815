pub mod args;

pub use args::{
    Cli, Commands, ConfigArgs, ConfigCommands, DeployArgs, InstancesArgs, ListArgs, ShowArgs,
    StopArgs, TestArgs, TutorialArgs,
};
