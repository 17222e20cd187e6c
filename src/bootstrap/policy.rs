use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How startup is driven.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapMode {
    /// Redeploy and start serving before `start` returns.
    Inline,
    /// Run startup on a spawned task, which also marks the process down when the server stops.
    #[default]
    Background,
    /// Only enter `initializing`. Used by tests that drive `start` themselves.
    InitializeOnly,
}

/// What to do when applications are still failing to redeploy at the deadline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedeployFailurePolicy {
    /// Terminate the process with a non-zero exit code.
    #[default]
    Exit,
    /// Keep running without ever serving.
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapPolicy {
    pub max_duration_ms: u64,
    pub sleep_when_failing_ms: u64,
    pub parallelism: usize,
    pub server_start_timeout_ms: u64,
    pub mode: BootstrapMode,
    pub on_redeploy_failure: RedeployFailurePolicy,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            max_duration_ms: 2 * 60 * 60_000,
            sleep_when_failing_ms: 10_000,
            parallelism: 8,
            server_start_timeout_ms: 10_000,
            mode: BootstrapMode::default(),
            on_redeploy_failure: RedeployFailurePolicy::default(),
        }
    }
}

impl BootstrapPolicy {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn sleep_when_failing(&self) -> Duration {
        Duration::from_millis(self.sleep_when_failing_ms)
    }

    pub fn server_start_timeout(&self) -> Duration {
        Duration::from_millis(self.server_start_timeout_ms)
    }

    pub fn with_mode(mut self, mode: BootstrapMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_failure_policy(mut self, policy: RedeployFailurePolicy) -> Self {
        self.on_redeploy_failure = policy;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_sleep_when_failing(mut self, duration: Duration) -> Self {
        self.sleep_when_failing_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_server_start_timeout(mut self, duration: Duration) -> Self {
        self.server_start_timeout_ms = duration.as_millis() as u64;
        self
    }
}
