//! CLI engine: argument parsing, command handlers, profile storage and progress display

pub mod arg_parser;
pub mod cli;
pub mod db_ops;
pub mod progress;

// Re-export commonly used items
pub use arg_parser::{Cli, Commands, CommonArgs};
pub use cli::handle_run;
pub use db_ops::{ProfileStore, open_db, open_db_in_memory};
