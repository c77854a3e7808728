// ABOUTME: Provider trait for sandbox container backends used by the runner
// ABOUTME: Defines the create/attach/start/wait/kill/remove lifecycle of one sandbox

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod docker;

pub use docker::DockerProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Provider not available: {0}")]
    NotAvailable(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Container configuration for a single sandboxed run.
///
/// Only the resource ceilings travel with the config. Network isolation,
/// the read-only root filesystem and privilege restrictions are applied by
/// every provider unconditionally.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub command: Vec<String>,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stream: StreamType,
    pub data: Vec<u8>,
}

/// Stream of output from an attached container. Closed when the container's
/// output ends.
pub struct OutputStream {
    pub receiver: mpsc::Receiver<OutputChunk>,
}

/// Backend capable of hosting sandboxes
#[async_trait]
pub trait Provider: Send + Sync {
    /// Check if the backend is reachable
    async fn is_available(&self) -> Result<bool>;

    /// Pull an image unless it is already present
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    /// Attach to the container's stdout/stderr. Must be called before start
    /// so no early output is lost.
    async fn attach_output(&self, container_id: &str) -> Result<OutputStream>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Resolve with the exit code once the container stops running
    async fn wait_container(&self, container_id: &str) -> Result<i64>;

    /// Send SIGKILL to the container
    async fn kill_container(&self, container_id: &str) -> Result<()>;

    /// Remove a container, killing it first when `force` is set
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;
}
