// ABOUTME: Docker provider implementation for single-run code sandboxes
// ABOUTME: Uses bollard to create hardened, network-less containers and stream their output

use super::{
    ContainerConfig, OutputChunk, OutputStream, Provider, ProviderError, Result, StreamType,
};
use async_trait::async_trait;
use bollard::{
    container::{
        AttachContainerOptions, Config, CreateContainerOptions, KillContainerOptions, LogOutput,
        RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
    },
    image::CreateImageOptions,
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Buffered chunks between the Docker stream and the runner
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

pub struct DockerProvider {
    client: Docker,
    label_prefix: String,
    /// Images known to be present locally
    image_cache: Arc<RwLock<HashMap<String, chrono::DateTime<chrono::Utc>>>>,
    /// Timeout for image pull operations (default: 10 minutes)
    pull_timeout: Duration,
}

impl DockerProvider {
    /// Create a new Docker provider with default pull timeout (10 minutes)
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(Duration::from_secs(600))
    }

    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self::with_client_and_timeout(client, timeout))
    }

    pub fn with_client_and_timeout(client: Docker, timeout: Duration) -> Self {
        Self {
            client,
            label_prefix: "coderun.sandbox".to_string(),
            image_cache: Arc::new(RwLock::new(HashMap::new())),
            pull_timeout: timeout,
        }
    }

    /// Convert our config to a hardened bollard config
    fn to_bollard_config(&self, config: &ContainerConfig) -> Config<String> {
        let mut labels = config.labels.clone();
        labels.insert(format!("{}.managed", self.label_prefix), "true".to_string());
        labels.insert(format!("{}.name", self.label_prefix), config.name.clone());

        let host_config = bollard::models::HostConfig {
            memory: Some(config.memory_bytes),
            // Equal to memory: no swap on top of the ceiling
            memory_swap: Some(config.memory_bytes),
            nano_cpus: Some(config.nano_cpus),
            pids_limit: Some(config.pids_limit),
            network_mode: Some("none".to_string()),
            readonly_rootfs: Some(true),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            cap_drop: Some(vec!["ALL".to_string()]),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                "rw,noexec,nosuid,size=16m".to_string(),
            )])),
            auto_remove: Some(false),
            ..Default::default()
        };

        Config {
            image: Some(config.image.clone()),
            cmd: Some(config.command.clone()),
            user: Some("65534:65534".to_string()),
            labels: Some(labels),
            network_disabled: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            attach_stdin: Some(false),
            open_stdin: Some(false),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ProviderError::ImageError(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(
            "Pulling image: {} (timeout: {:?})",
            image, self.pull_timeout
        );

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(error) = info.error {
                            return Err(ProviderError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                        if let Some(status) = &info.status {
                            debug!("Pull status: {}", status);
                        }
                    }
                    Err(e) => {
                        return Err(ProviderError::ImageError(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }
}

#[async_trait]
impl Provider for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_cache.read().await.contains_key(image) {
            return Ok(());
        }

        if !self.image_exists(image).await? {
            self.pull_image(image).await?;
        }

        self.image_cache
            .write()
            .await
            .insert(image.to_string(), chrono::Utc::now());
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        debug!("Creating container: {}", config.name);

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), self.to_bollard_config(config))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        for warning in &container.warnings {
            warn!("Docker warning for {}: {}", config.name, warning);
        }

        Ok(container.id)
    }

    async fn attach_output(&self, container_id: &str) -> Result<OutputStream> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };

        let attached = self
            .client
            .attach_container(container_id, Some(options))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let id = container_id.to_string();

        tokio::spawn(async move {
            let mut output = attached.output;
            while let Some(result) = output.next().await {
                let (stream, message) = match result {
                    Ok(LogOutput::StdOut { message }) => (StreamType::Stdout, message),
                    Ok(LogOutput::StdErr { message }) => (StreamType::Stderr, message),
                    Ok(LogOutput::Console { message }) => (StreamType::Stdout, message),
                    Ok(LogOutput::StdIn { .. }) => continue,
                    Err(e) => {
                        debug!("Output stream for {} ended with error: {}", id, e);
                        break;
                    }
                };

                let chunk = OutputChunk {
                    timestamp: chrono::Utc::now(),
                    stream,
                    data: message.to_vec(),
                };

                if tx.send(chunk).await.is_err() {
                    break; // Runner stopped reading
                }
            }
        });

        Ok(OutputStream { receiver: rx })
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.client.wait_container(container_id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(ProviderError::ContainerError(e.to_string())),
            None => Err(ProviderError::ContainerError(format!(
                "Wait stream for {} closed without a status",
                container_id
            ))),
        }
    }

    async fn kill_container(&self, container_id: &str) -> Result<()> {
        self.client
            .kill_container(container_id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        match self.client.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already gone
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(ProviderError::ContainerError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> DockerProvider {
        // Connecting is lazy, so this works without a running daemon
        let client = Docker::connect_with_local_defaults().expect("docker client");
        DockerProvider::with_client_and_timeout(client, Duration::from_secs(5))
    }

    #[test]
    fn test_bollard_config_is_hardened() {
        let config = ContainerConfig {
            image: "python:3.11-alpine".to_string(),
            name: "coderun-test".to_string(),
            command: vec!["python".to_string(), "-c".to_string(), "print(1)".to_string()],
            memory_bytes: 128 * 1024 * 1024,
            nano_cpus: 500_000_000,
            pids_limit: 50,
            labels: HashMap::new(),
        };

        let bollard_config = provider().to_bollard_config(&config);
        let host = bollard_config.host_config.expect("host config");

        assert_eq!(bollard_config.network_disabled, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(50));
        assert_eq!(
            host.security_opt,
            Some(vec!["no-new-privileges:true".to_string()])
        );
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            bollard_config
                .labels
                .expect("labels")
                .get("coderun.sandbox.managed")
                .map(String::as_str),
            Some("true")
        );
    }
}
