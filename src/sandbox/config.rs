//! Configuration for the container runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Image used when a job request does not name one.
pub const DEFAULT_IMAGE: &str = "alpine:latest";

/// Relative CPU weight for a full core (`cpu_limit = 1.0`).
pub const CPU_SHARES_BASE: f64 = 1024.0;

/// Configuration for the Docker runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum time to wait for an image pull.
    pub pull_timeout: Duration,
    /// Maximum time to wait for a log tail to finish.
    pub log_timeout: Duration,
    /// Label attached to every container this runtime creates.
    pub container_label: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pull_timeout: Duration::from_secs(60),
            log_timeout: Duration::from_secs(10),
            container_label: "shellbox.job".to_string(),
        }
    }
}

/// Per-job resource limits. A value of zero means "no limit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory cap in megabytes.
    #[serde(default)]
    pub memory_limit_mb: u64,
    /// CPU cap as a fraction of one core.
    #[serde(default)]
    pub cpu_limit: f64,
}

impl ResourceLimits {
    /// Create limits from a memory cap in MB and a CPU fraction.
    pub fn new(memory_limit_mb: u64, cpu_limit: f64) -> Self {
        Self {
            memory_limit_mb,
            cpu_limit,
        }
    }

    /// Limits that apply no constraint at all.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Check that the CPU fraction is a finite, non-negative number.
    pub fn validate(&self) -> Result<(), String> {
        if !self.cpu_limit.is_finite() || self.cpu_limit < 0.0 {
            return Err(format!(
                "cpu_limit must be a non-negative number, got {}",
                self.cpu_limit
            ));
        }
        Ok(())
    }

    /// Memory cap in bytes, or `None` when unlimited.
    pub fn memory_bytes(&self) -> Option<i64> {
        if self.memory_limit_mb == 0 {
            return None;
        }
        let bytes = self.memory_limit_mb.saturating_mul(1024 * 1024);
        Some(i64::try_from(bytes).unwrap_or(i64::MAX))
    }

    /// Relative CPU shares, or `None` when unlimited.
    pub fn cpu_shares(&self) -> Option<i64> {
        if self.cpu_limit.is_nan() || self.cpu_limit <= 0.0 {
            return None;
        }
        // Docker rejects shares below 2.
        Some(((self.cpu_limit * CPU_SHARES_BASE) as i64).max(2))
    }
}

/// Resolve the image to run, falling back to [`DEFAULT_IMAGE`].
pub fn effective_image(image: &str) -> &str {
    if image.trim().is_empty() {
        DEFAULT_IMAGE
    } else {
        image
    }
}
