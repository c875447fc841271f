pub mod cli;
pub mod load_config;
pub mod store_client;

pub use cli::{run, Cli, Commands};
