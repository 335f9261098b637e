use std::io;
use thiserror::Error;

use crate::config::ConfigError;
use crate::telemetry::logging::InitError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(#[from] InitError),
    #[error("terminal runtime error: {0}")]
    Runtime(String),
}
