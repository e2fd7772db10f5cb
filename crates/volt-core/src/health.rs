use std::sync::RwLock;

use serde::Serialize;

/// Message reported while healthy.
pub const HEALTHY_MESSAGE: &str = "OK";

/// Point-in-time health reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub message: String,
}

/// Process-wide health flag shared with the status endpoint.
#[derive(Debug)]
pub struct Health {
    inner: RwLock<HealthStatus>,
}

impl Health {
    /// Create a healthy state.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HealthStatus {
                ok: true,
                message: HEALTHY_MESSAGE.to_string(),
            }),
        }
    }

    /// Overwrite the health state.
    pub fn write(&self, ok: bool, message: impl Into<String>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.ok = ok;
        inner.message = message.into();
    }

    /// Mark healthy.
    pub fn set_healthy(&self) {
        self.write(true, HEALTHY_MESSAGE);
    }

    /// Read the current state.
    pub fn read(&self) -> HealthStatus {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_ok(&self) -> bool {
        self.read().ok
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new()
    }
}
