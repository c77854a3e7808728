// ABOUTME: Sandboxed execution of untrusted Python and JavaScript snippets
// ABOUTME: One disposable, network-less container per run, with timeout and output-cap supervision

pub mod language;
pub mod output;
pub mod providers;
pub mod runner;
pub mod settings;

pub use language::Language;
pub use output::TERMINATION_MARKER;
pub use providers::{DockerProvider, Provider as SandboxProvider, ProviderError};
pub use runner::{
    CodeRunner, RunOutput, SandboxError, SandboxRunner, Termination, FAILURE_EXIT_CODE,
    FORCED_EXIT_CODE,
};
pub use settings::SandboxSettings;
