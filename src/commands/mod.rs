pub mod common;
mod config;
mod deploy;
mod instances;
mod list;
mod show;
mod stop;
mod test;

pub use config::cmd_config;
pub use deploy::cmd_deploy;
pub use instances::cmd_instances;
pub use list::cmd_list;
pub use show::cmd_show;
pub use stop::cmd_stop;
pub use test::cmd_test;
