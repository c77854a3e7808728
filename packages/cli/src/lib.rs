// ABOUTME: Library half of the coderun binary: configuration, logging and component wiring
// ABOUTME: Kept separate from the clap front end so it can be exercised from tests

pub mod app;
pub mod config;
pub mod logging;

pub use app::App;
pub use config::{Config, ConfigError};
