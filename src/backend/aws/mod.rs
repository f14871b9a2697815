pub mod api;
pub mod cli;
pub mod client;

pub use api::{Ec2Api, Ec2Instance, Route, RouteTable, RunInstanceRequest, SecurityGroup, TUTORIAL_TAG};
pub use cli::AwsCli;
pub use client::AwsBackend;
