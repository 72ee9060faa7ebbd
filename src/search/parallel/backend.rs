//! Execution backends and accelerator probing.

use serde::Serialize;

/// What a worker's computation unit runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// General-purpose thread
    Cpu,
    /// Specialized parallel hardware
    Accelerator,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Cpu => write!(f, "cpu"),
            Backend::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Result of probing for accelerator support
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceleratorSupport {
    Available,
    Unavailable { reason: String },
}

/// Capability check run once by the pool during `init`
pub trait AcceleratorProbe: Send + Sync {
    fn probe(&self) -> AcceleratorSupport;
}

/// Probe for builds without any accelerator backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccelerator;

impl AcceleratorProbe for NoAccelerator {
    fn probe(&self) -> AcceleratorSupport {
        AcceleratorSupport::Unavailable {
            reason: "no accelerator backend available in this build".into(),
        }
    }
}

/// Probe that always reports a fixed answer.
#[derive(Debug, Clone)]
pub struct FixedProbe(pub AcceleratorSupport);

impl AcceleratorProbe for FixedProbe {
    fn probe(&self) -> AcceleratorSupport {
        self.0.clone()
    }
}
