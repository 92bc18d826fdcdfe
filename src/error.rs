//! Crate-wide error types.

use thiserror::Error;

pub type PerfscopeResult<T> = Result<T, PerfscopeError>;

#[derive(Debug, Error)]
pub enum PerfscopeError {
    #[error("invalid parameter {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("process with pid {0} does not exist")]
    ProcessNotFound(u32),

    #[error("sampling tool {tool:?} is not available on this system")]
    ToolNotAvailable { tool: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{phase} timed out after {seconds} seconds")]
    Timeout { phase: &'static str, seconds: u64 },

    #[error("{phase} failed: {stderr}")]
    ToolExecution { phase: &'static str, stderr: String },

    #[error("record capacity exhausted: {limit} profiling sessions already running")]
    ResourceExhausted { limit: usize },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PerfscopeError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    /// Faults that must reach the caller instead of becoming a failed response.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Json(_) | Self::Toml(_) | Self::Config(_)
        )
    }

    /// Stable machine-readable kind, used in JSON error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::ProcessNotFound(_) => "process_not_found",
            Self::ToolNotAvailable { .. } => "tool_not_available",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Timeout { .. } => "timeout",
            Self::ToolExecution { .. } => "tool_execution_error",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Parse(_) => "parse_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Toml(_) => "toml_error",
        }
    }

    pub fn help(&self) -> Option<&'static str> {
        match self {
            Self::ToolNotAvailable { .. } => Some(
                "Install perf with: apt-get install linux-tools-generic (Ubuntu/Debian) or yum install perf (RHEL/CentOS)",
            ),
            Self::PermissionDenied(_) => Some(
                "Run as root, grant CAP_PERFMON, or lower /proc/sys/kernel/perf_event_paranoid (e.g. sysctl kernel.perf_event_paranoid=1)",
            ),
            Self::ResourceExhausted { .. } => {
                Some("Retry once a running profiling session has finished")
            }
            Self::Timeout { .. } => {
                Some("Retry with a shorter duration or raise record_grace_secs in perfscope.toml")
            }
            _ => None,
        }
    }
}
