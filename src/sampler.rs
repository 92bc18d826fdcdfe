//! `perf` record/script invocation.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    ArtifactHandle, Invocation, PerfscopeError, PerfscopeResult, ProcessRunner, ProfileRequest,
    RunOutcome,
};

pub const RECORD_PHASE: &str = "perf record";
pub const TRANSLATE_PHASE: &str = "perf script";
pub const SUMMARY_PHASE: &str = "perf report";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "operation not permitted",
    "perf_event_paranoid",
    "no permission",
    "access to performance monitoring",
];

const MISSING_PROCESS_MARKERS: &[&str] = &[
    "no such process",
    "doesn't exist",
    "does not exist",
    "couldn't find",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProbe {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Clone)]
pub struct Sampler {
    tool: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").field("tool", &self.tool).finish()
    }
}

impl Sampler {
    pub fn new(tool: PathBuf, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { tool, runner }
    }

    /// Resolves the configured tool to an executable path without running it.
    pub fn locate(&self) -> PerfscopeResult<PathBuf> {
        locate_tool(&self.tool).ok_or_else(|| PerfscopeError::ToolNotAvailable {
            tool: self.tool.display().to_string(),
        })
    }

    /// Samples the target for the requested duration, writing `perf.data` into the artifact dir.
    pub fn record(
        &self,
        tool: &Path,
        request: &ProfileRequest,
        artifacts: &ArtifactHandle,
        timeout: Duration,
    ) -> PerfscopeResult<()> {
        let trace = artifacts.trace_path();
        let args = vec![
            "record".to_string(),
            "-F".to_string(),
            request.frequency_hz().to_string(),
            "-p".to_string(),
            request.pid().to_string(),
            "-g".to_string(),
            "-e".to_string(),
            request.event().to_string(),
            "-o".to_string(),
            trace.display().to_string(),
            "--".to_string(),
            "sleep".to_string(),
            request.duration_secs().to_string(),
        ];
        self.run_phase(
            RECORD_PHASE,
            Invocation::new(tool, args, timeout),
            Some(request.pid()),
        )?;
        if !trace.is_file() {
            return Err(PerfscopeError::ToolExecution {
                phase: RECORD_PHASE,
                stderr: format!("no trace written to {}", trace.display()),
            });
        }
        tracing::info!(
            "recorded pid {} for {}s at {}Hz ({})",
            request.pid(),
            request.duration_secs(),
            request.frequency_hz(),
            request.event()
        );
        Ok(())
    }

    /// Renders the recorded trace as a textual stack report.
    pub fn translate(
        &self,
        tool: &Path,
        artifacts: &ArtifactHandle,
        timeout: Duration,
    ) -> PerfscopeResult<String> {
        let args = vec![
            "script".to_string(),
            "-i".to_string(),
            artifacts.trace_path().display().to_string(),
        ];
        let report = self.run_phase(TRANSLATE_PHASE, Invocation::new(tool, args, timeout), None)?;
        tracing::info!("translated trace ({} bytes of report)", report.len());
        Ok(report)
    }

    /// Best-effort `perf report --stdio` overview; any failure yields `None`.
    pub fn summary(
        &self,
        tool: &Path,
        artifacts: &ArtifactHandle,
        timeout: Duration,
    ) -> Option<String> {
        let args = vec![
            "report".to_string(),
            "-i".to_string(),
            artifacts.trace_path().display().to_string(),
            "--stdio".to_string(),
            "--no-children".to_string(),
        ];
        match self.run_phase(SUMMARY_PHASE, Invocation::new(tool, args, timeout), None) {
            Ok(out) => Some(out),
            Err(err) => {
                tracing::debug!("skipping report summary: {err}");
                None
            }
        }
    }

    pub fn probe(&self) -> ToolProbe {
        let tool = self.tool.display().to_string();
        let Ok(path) = self.locate() else {
            return ToolProbe {
                tool,
                path: None,
                available: false,
                version: None,
            };
        };
        let inv = Invocation::new(&path, vec!["--version".to_string()], PROBE_TIMEOUT);
        let version = match self.runner.run(&inv) {
            Ok(RunOutcome::Exited {
                code: Some(0),
                stdout,
                ..
            }) => Some(stdout.trim().to_string()),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!("probe of {} failed: {err}", path.display());
                None
            }
        };
        ToolProbe {
            tool,
            path: Some(path.display().to_string()),
            available: version.is_some(),
            version,
        }
    }

    /// `target` is the profiled pid, when the phase attaches to one.
    fn run_phase(
        &self,
        phase: &'static str,
        invocation: Invocation,
        target: Option<u32>,
    ) -> PerfscopeResult<String> {
        let outcome = self.runner.run(&invocation).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                PerfscopeError::ToolNotAvailable {
                    tool: invocation.program.display().to_string(),
                }
            }
            _ => PerfscopeError::ToolExecution {
                phase,
                stderr: format!("failed to spawn {}: {err}", invocation.command_line()),
            },
        })?;

        match outcome {
            RunOutcome::Exited {
                code: Some(0),
                stdout,
                ..
            } => Ok(stdout),
            RunOutcome::Exited { code, stderr, .. } => {
                tracing::debug!("{phase} exited with {code:?}: {}", stderr.trim());
                Err(classify_failure(phase, &stderr, target))
            }
            RunOutcome::TimedOut => Err(PerfscopeError::Timeout {
                phase,
                seconds: invocation.timeout.as_secs(),
            }),
        }
    }
}

fn classify_failure(phase: &'static str, stderr: &str, target: Option<u32>) -> PerfscopeError {
    let lower = stderr.to_ascii_lowercase();
    if PERMISSION_MARKERS.iter().any(|m| lower.contains(m)) {
        return PerfscopeError::PermissionDenied(stderr.trim().to_string());
    }
    if let Some(pid) = target
        && MISSING_PROCESS_MARKERS.iter().any(|m| lower.contains(m))
    {
        return PerfscopeError::ProcessNotFound(pid);
    }
    PerfscopeError::ToolExecution {
        phase,
        stderr: stderr.trim().to_string(),
    }
}

/// Finds `tool` either as an explicit path or on `PATH`.
pub fn locate_tool(tool: &Path) -> Option<PathBuf> {
    if tool.components().count() > 1 || tool.is_absolute() {
        return tool.is_file().then(|| tool.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}
