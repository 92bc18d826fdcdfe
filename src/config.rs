//! `perfscope.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{DEFAULT_CAPTURE_LIMIT, SamplingEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Sampling tool binary, either a bare name looked up on `PATH` or a path.
    #[serde(default = "default_tool")]
    pub tool: PathBuf,

    /// Directory under which per-request artifact directories are created.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,

    /// Event recorded when a request does not name one.
    #[serde(default = "default_event")]
    pub default_event: SamplingEvent,

    /// Upper bound on simultaneously running record-phase subprocesses.
    #[serde(default = "default_max_concurrent_records")]
    pub max_concurrent_records: usize,

    /// How long a request may wait for a record slot; zero fails fast.
    #[serde(default)]
    pub record_queue_wait_ms: u64,

    #[serde(default = "default_record_grace_secs")]
    pub record_grace_secs: u64,

    #[serde(default = "default_translate_timeout_secs")]
    pub translate_timeout_secs: u64,

    /// Number of ranked functions to report; unset reports all.
    #[serde(default)]
    pub top_functions: Option<usize>,

    #[serde(default = "default_true")]
    pub include_raw_report: bool,

    #[serde(default = "default_raw_report_limit")]
    pub raw_report_limit: usize,

    /// Run `perf report --stdio` after translation and attach its output.
    #[serde(default)]
    pub report_summary: bool,

    #[serde(default = "default_report_summary_limit")]
    pub report_summary_limit: usize,

    /// Bytes kept from each output stream of a perf subprocess.
    #[serde(default = "default_capture_limit")]
    pub capture_limit_bytes: usize,
}

fn default_tool() -> PathBuf {
    PathBuf::from("perf")
}

fn default_artifact_root() -> PathBuf {
    std::env::temp_dir()
}

fn default_event() -> SamplingEvent {
    SamplingEvent::CpuClock
}

fn default_max_concurrent_records() -> usize {
    2
}

fn default_record_grace_secs() -> u64 {
    5
}

fn default_translate_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_raw_report_limit() -> usize {
    10_000
}

fn default_report_summary_limit() -> usize {
    5_000
}

fn default_capture_limit() -> usize {
    DEFAULT_CAPTURE_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            artifact_root: default_artifact_root(),
            default_event: default_event(),
            max_concurrent_records: default_max_concurrent_records(),
            record_queue_wait_ms: 0,
            record_grace_secs: default_record_grace_secs(),
            translate_timeout_secs: default_translate_timeout_secs(),
            top_functions: None,
            include_raw_report: default_true(),
            raw_report_limit: default_raw_report_limit(),
            report_summary: false,
            report_summary_limit: default_report_summary_limit(),
            capture_limit_bytes: default_capture_limit(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn record_queue_wait(&self) -> Duration {
        Duration::from_millis(self.record_queue_wait_ms)
    }

    pub fn record_timeout(&self, duration_secs: u64) -> Duration {
        Duration::from_secs(duration_secs.saturating_add(self.record_grace_secs))
    }

    pub fn translate_timeout(&self) -> Duration {
        Duration::from_secs(self.translate_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("perfscope-missing-{}.toml", uuid::Uuid::new_v4()));
        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.tool, PathBuf::from("perf"));
        assert_eq!(cfg.max_concurrent_records, 2);
        assert_eq!(cfg.record_queue_wait_ms, 0);
        assert_eq!(cfg.default_event, SamplingEvent::CpuClock);
        assert!(cfg.include_raw_report);
        assert!(cfg.top_functions.is_none());
    }

    #[test]
    fn toml_overrides_merge_with_defaults() {
        let cfg: Config = toml::from_str(
            "tool = \"/usr/local/bin/perf\"\nmax_concurrent_records = 4\ndefault_event = \"cycles\"\ntop_functions = 20\n",
        )
        .expect("config");
        assert_eq!(cfg.tool, PathBuf::from("/usr/local/bin/perf"));
        assert_eq!(cfg.max_concurrent_records, 4);
        assert_eq!(cfg.default_event, SamplingEvent::Cycles);
        assert_eq!(cfg.top_functions, Some(20));
        assert_eq!(cfg.record_grace_secs, 5);
        assert_eq!(cfg.capture_limit_bytes, DEFAULT_CAPTURE_LIMIT);
    }

    #[test]
    fn invalid_config_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("perfscope-bad-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "max_concurrent_records = \"lots\"").expect("write config");
        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.max_concurrent_records, 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn record_timeout_adds_grace() {
        let cfg = Config::default();
        assert_eq!(cfg.record_timeout(10), Duration::from_secs(15));
    }
}
