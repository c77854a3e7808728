// ABOUTME: Resource ceilings, timeout and output cap applied to every sandboxed run
// ABOUTME: Deploy-time constants; isolation switches are not part of these settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MEMORY_MB: u64 = 128;
pub const DEFAULT_CPUS: f64 = 0.5;
pub const DEFAULT_PIDS_LIMIT: i64 = 50;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// How long to keep reading output after the process has exited
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: i64,
    pub timeout: Duration,
    /// Per-stream cap, in bytes
    pub max_output_bytes: usize,
    pub drain_timeout: Duration,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            memory_mb: DEFAULT_MEMORY_MB,
            cpus: DEFAULT_CPUS,
            pids_limit: DEFAULT_PIDS_LIMIT,
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl SandboxSettings {
    pub fn memory_bytes(&self) -> i64 {
        // Saturate rather than wrap on absurd values
        (self.memory_mb as i64).saturating_mul(1024 * 1024)
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpus * 1_000_000_000.0) as i64
    }
}
