//! Error types and result aliases.

use std::path::PathBuf;

use thiserror::Error;

use crate::summary::BuildSummary;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error in {context}: {error}")]
    Toml {
        error: toml::de::Error,
        context: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Node not found: {name}. Available nodes: {available}")]
    NodeNotFound { name: String, available: String },

    #[error("Duplicate node name: {name} (declared in {first} and {second})")]
    DuplicateNode {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Invalid node name: {0}")]
    InvalidNodeName(String),

    #[error("Invalid version '{version}' for {node}: {message}")]
    InvalidVersion {
        node: String,
        version: String,
        message: String,
    },

    #[error("Circular dependency detected: {0}. Use 'weave graph' to inspect dependencies.")]
    CircularDependency(String),

    #[error("Config file not found: {0}. Expected 'weave.toml' in node directory.")]
    ConfigNotFound(PathBuf),

    #[error("Invalid command for {node}: {message}")]
    InvalidCommand { node: String, message: String },

    #[error("Checksum error for {node}: {message}")]
    Checksum { node: String, message: String },

    #[error("Failed to spawn {phase} for {node}: {message}")]
    Spawn {
        node: String,
        phase: String,
        message: String,
    },

    #[error("Compilation failed for {node}: {message}")]
    Compilation { node: String, message: String },

    #[error("Build failed for: {}", .0.failed_names().join(", "))]
    BuildFailed(Box<BuildSummary>),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Toml {
            error,
            context: "weave.toml".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
