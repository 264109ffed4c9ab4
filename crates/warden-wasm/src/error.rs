//! Skill fault classification and WASM host errors.

use thiserror::Error;

/// Machine-readable fault reason codes.
///
/// The classification is deterministic: a given failure condition
/// always maps to the same code (see [`FaultReason::classify`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReason {
    /// Loading the module would exceed the aggregate memory budget.
    HostMemoryExhausted,
    /// No module is loaded under the requested name.
    ModuleNotFound,
    /// The invocation hit its wall-clock deadline (or was canceled).
    Timeout,
    /// The guest exceeded its memory cap.
    MemoryExceeded,
    /// The module exports none of the known entry points.
    NoExport,
    /// Any other guest failure (trap, bad module, host error).
    Fault,
    /// The module is quarantined after repeated faults.
    Quarantined,
}

impl FaultReason {
    /// The stable reason code string.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::HostMemoryExhausted => "WASM_HOST_MEMORY_EXHAUSTED",
            Self::ModuleNotFound => "WASM_MODULE_NOT_FOUND",
            Self::Timeout => "WASM_TIMEOUT",
            Self::MemoryExceeded => "WASM_MEMORY_EXCEEDED",
            Self::NoExport => "WASM_NO_EXPORT",
            Self::Fault => "WASM_FAULT",
            Self::Quarantined => "WASM_QUARANTINED",
        }
    }

    /// Classify a guest error message.
    ///
    /// Timeouts and cancellation are normally detected structurally by
    /// the host; this covers errors surfaced by the runtime itself.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("timeout")
            || lower.contains("deadline")
            || lower.contains("exit-on-close")
        {
            Self::Timeout
        } else if lower.contains("cancel") {
            Self::Timeout
        } else if lower.contains("memory") || lower.contains("oom") {
            Self::MemoryExceeded
        } else {
            Self::Fault
        }
    }

    /// Whether this reason counts against the module's persistent
    /// fault counter. Denials (not-found, quarantined, admission
    /// failures) do not.
    #[must_use]
    pub fn counts_as_fault(self) -> bool {
        matches!(self, Self::Timeout | Self::MemoryExceeded | Self::Fault | Self::NoExport)
    }
}

impl std::fmt::Display for FaultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A structured skill failure.
#[derive(Debug, Clone, Error)]
#[error("{reason}: module {module}: {detail}")]
pub struct SkillFault {
    /// Reason code.
    pub reason: FaultReason,
    /// The module involved.
    pub module: String,
    /// Free-text detail.
    pub detail: String,
}

impl SkillFault {
    /// Build a fault.
    #[must_use]
    pub fn new(reason: FaultReason, module: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            reason,
            module: module.into(),
            detail: detail.into(),
        }
    }
}

/// Errors from the WASM host.
#[derive(Debug, Error)]
pub enum WasmError {
    /// A classified guest/module failure.
    #[error(transparent)]
    Fault(#[from] SkillFault),

    /// The persistence layer failed.
    #[error("store error: {0}")]
    Store(#[from] warden_store::StoreError),

    /// The module binary could not be parsed.
    #[error("invalid module {module}: {detail}")]
    InvalidModule {
        /// The module being loaded.
        module: String,
        /// Parser detail.
        detail: String,
    },
}

/// Result type for WASM host operations.
pub type WasmResult<T> = Result<T, WasmError>;
