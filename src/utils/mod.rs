pub mod config;
pub mod env;
pub mod logger;
pub(crate) mod seedscan_toml;

pub use config::*;
pub use env::{env_db_path, env_remote, env_value};
pub use logger::{Colors, setup_logging};
