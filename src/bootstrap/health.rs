use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Initializing,
    Up,
    Down,
}

impl ServiceStatus {
    pub fn value(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Process health as seen by load balancers: a status plus whether to be in rotation.
#[derive(Debug)]
pub struct HealthState {
    status: watch::Sender<ServiceStatus>,
    in_rotation: AtomicBool,
}

impl HealthState {
    /// Starts out initializing and out of rotation.
    pub fn new() -> Self {
        let (status, _) = watch::channel(ServiceStatus::Initializing);
        Self {
            status,
            in_rotation: AtomicBool::new(false),
        }
    }

    pub fn initializing(&self) {
        self.set(ServiceStatus::Initializing, false);
    }

    pub fn up(&self) {
        self.set(ServiceStatus::Up, true);
    }

    pub fn down(&self) {
        self.set(ServiceStatus::Down, false);
    }

    pub fn status(&self) -> ServiceStatus {
        *self.status.borrow()
    }

    pub fn in_rotation(&self) -> bool {
        self.in_rotation.load(Ordering::SeqCst)
    }

    /// Receives every status change from now on.
    pub fn subscribe(&self) -> watch::Receiver<ServiceStatus> {
        self.status.subscribe()
    }

    fn set(&self, status: ServiceStatus, in_rotation: bool) {
        self.in_rotation.store(in_rotation, Ordering::SeqCst);
        self.status.send_replace(status);
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
