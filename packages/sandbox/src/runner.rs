// ABOUTME: Runs one code snippet in a fresh sandbox under timeout and output-cap supervision
// ABOUTME: Races natural exit against the deadline and the cap, then always removes the container

use crate::language::Language;
use crate::output::{CappedBuffer, TERMINATION_MARKER};
use crate::providers::{ContainerConfig, OutputChunk, OutputStream, Provider, StreamType};
use crate::settings::SandboxSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Exit code reported for runs that were forcibly terminated
pub const FORCED_EXIT_CODE: i32 = 124;

/// Exit code reported when no program ran to completion
pub const FAILURE_EXIT_CODE: i32 = 1;

const REMOVE_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox backend unavailable: {0}")]
    Unavailable(String),
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The program exited on its own
    Exited,
    /// Killed because the wall-clock timeout fired
    TimedOut,
    /// Killed because stdout or stderr grew past the cap
    OutputLimitExceeded,
    /// Rejected before spawning anything
    UnsupportedLanguage,
    /// The backend failed to create, start or supervise the sandbox
    BackendError,
}

impl Termination {
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::TimedOut | Self::OutputLimitExceeded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
    pub termination: Termination,
}

impl RunOutput {
    fn unsupported_language(language: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Unsupported language: {}", language),
            exit_code: FAILURE_EXIT_CODE,
            execution_time_ms: 0,
            termination: Termination::UnsupportedLanguage,
        }
    }

    fn backend_error(message: String, stdout: String, stderr: String, elapsed: Duration) -> Self {
        Self {
            stdout,
            stderr: if stderr.is_empty() { message } else { stderr },
            exit_code: FAILURE_EXIT_CODE,
            execution_time_ms: elapsed.as_millis() as u64,
            termination: Termination::BackendError,
        }
    }

    fn forced(
        stdout: CappedBuffer,
        stderr: CappedBuffer,
        elapsed: Duration,
        termination: Termination,
    ) -> Self {
        let mut stderr = stderr.into_string();
        stderr.push_str(TERMINATION_MARKER);
        Self {
            stdout: stdout.into_string(),
            stderr,
            exit_code: FORCED_EXIT_CODE,
            execution_time_ms: elapsed.as_millis() as u64,
            termination,
        }
    }
}

/// Anything able to execute a snippet and report its outcome.
///
/// Program failures are data in [`RunOutput`]; `Err` is reserved for a
/// backend that cannot be reached at all.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, source_code: &str, language: &str) -> Result<RunOutput, SandboxError>;
}

pub struct SandboxRunner {
    provider: Arc<dyn Provider>,
    settings: SandboxSettings,
}

enum Ended {
    Exited(crate::providers::Result<i64>),
    TimedOut,
    OutputLimit,
}

impl SandboxRunner {
    pub fn new(provider: Arc<dyn Provider>, settings: SandboxSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Make sure every language image is present locally before any job is
    /// claimed. Returns how many images are ready; a failed pull is retried
    /// by the next run that needs the image.
    pub async fn pull_images(&self) -> usize {
        let mut ready = 0;
        for language in Language::ALL {
            match self.provider.ensure_image(language.image()).await {
                Ok(()) => {
                    debug!("Image {} ready for {}", language.image(), language.as_str());
                    ready += 1;
                }
                Err(e) => warn!("Failed to pull image {}: {}", language.image(), e),
            }
        }
        info!("{}/{} sandbox images ready", ready, Language::ALL.len());
        ready
    }

    fn container_config(&self, language: Language, source_code: &str) -> ContainerConfig {
        ContainerConfig {
            image: language.image().to_string(),
            name: format!("coderun-exec-{}", uuid::Uuid::new_v4().simple()),
            command: language.command(source_code),
            memory_bytes: self.settings.memory_bytes(),
            nano_cpus: self.settings.nano_cpus(),
            pids_limit: self.settings.pids_limit,
            labels: HashMap::from([(
                "coderun.sandbox.language".to_string(),
                language.as_str().to_string(),
            )]),
        }
    }

    /// Attach, start and watch a created container until it ends one way or another
    async fn supervise(&self, container_id: &str, created_at: Instant) -> RunOutput {
        let mut output = match self.provider.attach_output(container_id).await {
            Ok(output) => output,
            Err(e) => {
                return RunOutput::backend_error(
                    e.to_string(),
                    String::new(),
                    String::new(),
                    created_at.elapsed(),
                )
            }
        };

        if let Err(e) = self.provider.start_container(container_id).await {
            return RunOutput::backend_error(
                e.to_string(),
                String::new(),
                String::new(),
                created_at.elapsed(),
            );
        }

        let spawned_at = Instant::now();
        let mut stdout = CappedBuffer::new(self.settings.max_output_bytes);
        let mut stderr = CappedBuffer::new(self.settings.max_output_bytes);

        let deadline = tokio::time::sleep(self.settings.timeout);
        tokio::pin!(deadline);
        let wait = self.provider.wait_container(container_id);
        tokio::pin!(wait);
        let mut output_open = true;

        let ended = loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break Ended::TimedOut,
                chunk = output.receiver.recv(), if output_open => match chunk {
                    Some(chunk) => {
                        if collect(&chunk, &mut stdout, &mut stderr) {
                            break Ended::OutputLimit;
                        }
                    }
                    None => output_open = false,
                },
                status = &mut wait => break Ended::Exited(status),
            }
        };

        match ended {
            Ended::Exited(Ok(code)) => {
                if output_open && self.drain(&mut output, &mut stdout, &mut stderr).await {
                    return self
                        .terminate(
                            container_id,
                            stdout,
                            stderr,
                            spawned_at,
                            Termination::OutputLimitExceeded,
                        )
                        .await;
                }
                debug!("Container {} exited with code {}", container_id, code);
                RunOutput {
                    stdout: stdout.into_string(),
                    stderr: stderr.into_string(),
                    exit_code: code as i32,
                    execution_time_ms: spawned_at.elapsed().as_millis() as u64,
                    termination: Termination::Exited,
                }
            }
            Ended::Exited(Err(e)) => {
                warn!("Lost track of container {}: {}", container_id, e);
                RunOutput::backend_error(
                    e.to_string(),
                    stdout.into_string(),
                    stderr.into_string(),
                    spawned_at.elapsed(),
                )
            }
            Ended::TimedOut => {
                info!(
                    "Container {} exceeded timeout of {:?}",
                    container_id, self.settings.timeout
                );
                self.terminate(container_id, stdout, stderr, spawned_at, Termination::TimedOut)
                    .await
            }
            Ended::OutputLimit => {
                info!(
                    "Container {} exceeded output cap of {} bytes",
                    container_id, self.settings.max_output_bytes
                );
                self.terminate(
                    container_id,
                    stdout,
                    stderr,
                    spawned_at,
                    Termination::OutputLimitExceeded,
                )
                .await
            }
        }
    }

    /// Read output that was still in flight when the exit status arrived.
    /// Returns `true` if the cap was exceeded while draining.
    async fn drain(
        &self,
        output: &mut OutputStream,
        stdout: &mut CappedBuffer,
        stderr: &mut CappedBuffer,
    ) -> bool {
        let drain = async {
            while let Some(chunk) = output.receiver.recv().await {
                if collect(&chunk, stdout, stderr) {
                    return true;
                }
            }
            false
        };

        match tokio::time::timeout(self.settings.drain_timeout, drain).await {
            Ok(exceeded) => exceeded,
            Err(_) => {
                debug!("Gave up draining output after {:?}", self.settings.drain_timeout);
                false
            }
        }
    }

    async fn terminate(
        &self,
        container_id: &str,
        stdout: CappedBuffer,
        stderr: CappedBuffer,
        spawned_at: Instant,
        termination: Termination,
    ) -> RunOutput {
        let elapsed = spawned_at.elapsed();
        // The process may have exited on its own in the meantime
        if let Err(e) = self.provider.kill_container(container_id).await {
            debug!("Kill of container {} was a no-op: {}", container_id, e);
        }
        RunOutput::forced(stdout, stderr, elapsed, termination)
    }
}

#[async_trait]
impl CodeRunner for SandboxRunner {
    async fn run(&self, source_code: &str, language: &str) -> Result<RunOutput, SandboxError> {
        let Some(language) = Language::parse(language) else {
            warn!("Rejecting run for unsupported language: {}", language);
            return Ok(RunOutput::unsupported_language(language));
        };

        match self.provider.is_available().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(SandboxError::Unavailable(
                    "backend did not answer ping".to_string(),
                ))
            }
            Err(e) => return Err(SandboxError::Unavailable(e.to_string())),
        }

        let created_at = Instant::now();

        if let Err(e) = self.provider.ensure_image(language.image()).await {
            return Ok(RunOutput::backend_error(
                e.to_string(),
                String::new(),
                String::new(),
                created_at.elapsed(),
            ));
        }

        let config = self.container_config(language, source_code);
        let container_id = match self.provider.create_container(&config).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to create sandbox {}: {}", config.name, e);
                // A half-created container may still hold the name
                remove_container(self.provider.as_ref(), &config.name).await;
                return Ok(RunOutput::backend_error(
                    e.to_string(),
                    String::new(),
                    String::new(),
                    created_at.elapsed(),
                ));
            }
        };

        let guard = ContainerGuard::new(self.provider.clone(), container_id.clone());
        let output = self.supervise(&container_id, created_at).await;
        guard.release().await;

        Ok(output)
    }
}

fn collect(chunk: &OutputChunk, stdout: &mut CappedBuffer, stderr: &mut CappedBuffer) -> bool {
    match chunk.stream {
        StreamType::Stdout => stdout.push(&chunk.data),
        StreamType::Stderr => stderr.push(&chunk.data),
    }
}

async fn remove_container(provider: &dyn Provider, container_id: &str) {
    for attempt in 1..=REMOVE_ATTEMPTS {
        match provider.remove_container(container_id, true).await {
            Ok(()) => {
                debug!("Removed container {}", container_id);
                return;
            }
            Err(e) if attempt < REMOVE_ATTEMPTS => {
                debug!(
                    "Remove of container {} failed (attempt {}): {}",
                    container_id, attempt, e
                );
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            }
            Err(e) => {
                warn!(
                    "Giving up removing container {} after {} attempts: {}",
                    container_id, REMOVE_ATTEMPTS, e
                );
            }
        }
    }
}

/// Owns a created container until it has been force-removed.
///
/// `release` removes it on the normal path. If the owning future is dropped
/// first, `Drop` hands the removal to the runtime.
struct ContainerGuard {
    provider: Arc<dyn Provider>,
    container_id: Option<String>,
}

impl ContainerGuard {
    fn new(provider: Arc<dyn Provider>, container_id: String) -> Self {
        Self {
            provider,
            container_id: Some(container_id),
        }
    }

    async fn release(mut self) {
        if let Some(container_id) = self.container_id.take() {
            remove_container(self.provider.as_ref(), &container_id).await;
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(container_id) = self.container_id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let provider = self.provider.clone();
                handle.spawn(async move {
                    remove_container(provider.as_ref(), &container_id).await;
                });
            }
            Err(_) => warn!(
                "No runtime to remove abandoned container {}; it must be cleaned up manually",
                container_id
            ),
        }
    }
}
