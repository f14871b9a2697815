pub mod api;
pub mod cli;
pub mod client;

pub use api::{GceApi, GceInstance, InsertInstanceRequest};
pub use cli::GcloudCli;
pub use client::GoogleBackend;
