//! One profiling request end to end: validate, record, translate, analyse.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

use std::sync::Arc;

use crate::{
    ArtifactManager, Config, FlameGraphLine, PerfscopeError, PerfscopeResult, ProcessLookup,
    ProcessRunner, ProcfsLookup, ProfileRequest, RawProfileRequest, RecordGate, Sample,
    SamplingEvent, Sampler, Statistics, SystemRunner, ToolProbe, aggregate, fold_samples,
    parse_report, validate_request,
};

/// Statistics and flame data derived from one textual report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportAnalysis {
    pub statistics: Statistics,
    pub flame_graph_data: Vec<FlameGraphLine>,
    pub skipped_blocks: usize,
    #[serde(skip)]
    pub samples: Vec<Sample>,
}

pub fn analyze_report(report: &str, top_k: Option<usize>) -> PerfscopeResult<ReportAnalysis> {
    let parsed = parse_report(report)?;
    Ok(ReportAnalysis {
        statistics: aggregate(&parsed.samples, top_k),
        flame_graph_data: fold_samples(&parsed.samples),
        skipped_blocks: parsed.skipped_blocks,
        samples: parsed.samples,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileResult {
    pub request: ProfileRequest,
    pub timestamp: String,
    pub analysis: ReportAnalysis,
    pub raw_stack_traces: Option<String>,
    pub raw_report_truncated: bool,
    pub raw_report_digest: String,
    pub report_summary: Option<String>,
}

/// Wire shape handed back to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub pid: i64,
    pub duration: i64,
    pub frequency: i64,
    pub event: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flame_graph_data: Vec<FlameGraphLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_stack_traces: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub raw_report_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_report_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_summary: Option<String>,
    #[serde(default)]
    pub skipped_blocks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl ProfileResponse {
    pub fn from_result(result: ProfileResult) -> Self {
        let req = &result.request;
        Self {
            success: true,
            pid: i64::from(req.pid()),
            duration: req.duration_secs() as i64,
            frequency: i64::from(req.frequency_hz()),
            event: req.event().to_string(),
            timestamp: result.timestamp,
            statistics: Some(result.analysis.statistics),
            flame_graph_data: result.analysis.flame_graph_data,
            raw_stack_traces: result.raw_stack_traces,
            raw_report_truncated: result.raw_report_truncated,
            raw_report_digest: Some(result.raw_report_digest),
            report_summary: result.report_summary,
            skipped_blocks: result.analysis.skipped_blocks,
            error: None,
            error_code: None,
            help: None,
        }
    }

    pub fn failure(raw: &RawProfileRequest, err: &PerfscopeError, default_event: SamplingEvent) -> Self {
        Self {
            success: false,
            pid: raw.pid,
            duration: raw.duration,
            frequency: raw.frequency,
            event: raw
                .event
                .clone()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| default_event.to_string()),
            timestamp: now_timestamp(),
            statistics: None,
            flame_graph_data: Vec::new(),
            raw_stack_traces: None,
            raw_report_truncated: false,
            raw_report_digest: None,
            report_summary: None,
            skipped_blocks: 0,
            error: Some(err.to_string()),
            error_code: Some(err.code().to_string()),
            help: err.help().map(str::to_string),
        }
    }
}

/// Drives profiling requests; share one instance per process so the record gate is global.
pub struct Profiler {
    config: Config,
    lookup: Arc<dyn ProcessLookup>,
    sampler: Sampler,
    artifacts: ArtifactManager,
    gate: RecordGate,
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("config", &self.config)
            .field("sampler", &self.sampler)
            .field("gate", &self.gate)
            .finish()
    }
}

impl Profiler {
    pub fn new(
        config: Config,
        lookup: Arc<dyn ProcessLookup>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            sampler: Sampler::new(config.tool.clone(), runner),
            artifacts: ArtifactManager::new(config.artifact_root.clone()),
            gate: RecordGate::new(config.max_concurrent_records),
            lookup,
            config,
        }
    }

    /// Profiler backed by `/proc` and real subprocesses.
    pub fn system(config: Config) -> Self {
        let runner = SystemRunner::new(config.capture_limit_bytes);
        Self::new(config, Arc::new(ProcfsLookup::new()), Arc::new(runner))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn probe(&self) -> ToolProbe {
        self.sampler.probe()
    }

    /// Runs one request. Domain failures come back as `success: false`;
    /// only fatal faults such as an unwritable artifact root are `Err`.
    pub fn profile(&self, raw: &RawProfileRequest) -> PerfscopeResult<ProfileResponse> {
        match self.run(raw) {
            Ok(result) => Ok(ProfileResponse::from_result(result)),
            Err(err) if err.is_fatal() => {
                tracing::error!("profiling pid {} aborted: {err}", raw.pid);
                Err(err)
            }
            Err(err) => {
                tracing::warn!("profiling pid {} failed: {err}", raw.pid);
                Ok(ProfileResponse::failure(raw, &err, self.config.default_event))
            }
        }
    }

    pub fn run(&self, raw: &RawProfileRequest) -> PerfscopeResult<ProfileResult> {
        let request = validate_request(raw, self.lookup.as_ref(), &self.config)?;
        let tool = self.sampler.locate()?;

        let (report, report_summary) = self.artifacts.scoped(|handle| {
            {
                let _permit = self.gate.acquire(self.config.record_queue_wait())?;
                self.sampler
                    .record(
                        &tool,
                        &request,
                        handle,
                        self.config.record_timeout(request.duration_secs()),
                    )
                    .map_err(|err| self.refine_record_error(err, request.pid()))?;
            }
            let report = self
                .sampler
                .translate(&tool, handle, self.config.translate_timeout())?;
            let summary = if self.config.report_summary {
                self.sampler
                    .summary(&tool, handle, self.config.translate_timeout())
                    .map(|s| truncate_at_char_boundary(&s, self.config.report_summary_limit).0.to_string())
            } else {
                None
            };
            Ok((report, summary))
        })?;

        let analysis = analyze_report(&report, self.config.top_functions)?;
        tracing::info!(
            "pid {}: {} samples, {} distinct stacks",
            request.pid(),
            analysis.statistics.total_samples,
            analysis.flame_graph_data.len()
        );

        let (raw_stack_traces, raw_report_truncated) = if self.config.include_raw_report {
            let (text, truncated) = truncate_at_char_boundary(&report, self.config.raw_report_limit);
            (Some(text.to_string()), truncated)
        } else {
            (None, false)
        };

        Ok(ProfileResult {
            request,
            timestamp: now_timestamp(),
            analysis,
            raw_stack_traces,
            raw_report_truncated,
            raw_report_digest: blake3::hash(report.as_bytes()).to_hex().to_string(),
            report_summary,
        })
    }

    // A generic record failure against a target that has since exited is reported as such.
    fn refine_record_error(&self, err: PerfscopeError, pid: u32) -> PerfscopeError {
        match err {
            PerfscopeError::ToolExecution { .. } if !self.lookup.is_running(pid) => {
                PerfscopeError::ProcessNotFound(pid)
            }
            other => other,
        }
    }
}

pub fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_default()
}

/// Cuts `s` to at most `limit` bytes without splitting a character.
pub fn truncate_at_char_boundary(s: &str, limit: usize) -> (&str, bool) {
    if s.len() <= limit {
        return (s, false);
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    (&s[..end], true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_at_char_boundary("abc", 10), ("abc", false));
        assert_eq!(truncate_at_char_boundary("abcdef", 3), ("abc", true));
        // 'é' is two bytes; cutting inside it backs off to the previous boundary.
        assert_eq!(truncate_at_char_boundary("aé", 2), ("a", true));
        assert_eq!(truncate_at_char_boundary("abc", 0), ("", true));
    }

    #[test]
    fn timestamp_shape() {
        let ts = now_timestamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
    }

    #[test]
    fn analyze_report_scenario() {
        let report = "cmdA 100 10.0\n  [addr] foo\n  [addr] bar\n\ncmdA 100 11.0\n  [addr] foo\n  [addr] bar";
        let analysis = analyze_report(report, None).expect("analysis");
        assert_eq!(analysis.statistics.total_samples, 2);
        assert_eq!(analysis.statistics.top_functions[0].function, "foo");
        assert_eq!(analysis.statistics.top_functions[0].overhead_percent, 100.0);
        assert_eq!(analysis.flame_graph_data.len(), 1);
        assert_eq!(analysis.flame_graph_data[0].stack, "cmdA;bar;foo");
        assert_eq!(analysis.flame_graph_data[0].count, 2);
        assert_eq!(analysis.samples.len(), 2);
    }

    #[test]
    fn failure_response_echoes_raw_request() {
        let mut raw = RawProfileRequest::new(12);
        raw.duration = 301;
        let err = PerfscopeError::invalid("duration", "too long");
        let resp = ProfileResponse::failure(&raw, &err, SamplingEvent::CpuClock);
        assert!(!resp.success);
        assert_eq!(resp.duration, 301);
        assert_eq!(resp.event, "cpu-clock");
        assert_eq!(resp.error_code.as_deref(), Some("invalid_parameter"));
        let json = serde_json::to_value(&resp).expect("json");
        assert!(json.get("statistics").is_none());
        assert!(json["error"].as_str().is_some_and(|e| e.contains("duration")));
    }

    #[test]
    fn tool_not_available_carries_install_help() {
        let err = PerfscopeError::ToolNotAvailable {
            tool: "perf".to_string(),
        };
        let resp = ProfileResponse::failure(&RawProfileRequest::new(1), &err, SamplingEvent::Cycles);
        assert!(resp.help.as_deref().is_some_and(|h| h.contains("linux-tools")));
        assert_eq!(resp.event, "cycles");
    }
}
