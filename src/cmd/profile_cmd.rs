//! Profiler commands (`perfscope profile|parse|env`).

use clap::Subcommand;
use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{
    Config, FlameGraphLine, PerfscopeResult, Profiler, RawProfileRequest, SamplingEvent,
    analyze_report, to_folded_text, to_speedscope,
};

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// Sample a running process with perf and report its hotspots.
    Profile {
        #[arg(long)]
        pid: i64,
        /// Seconds to sample for (1-300).
        #[arg(long, default_value_t = 10)]
        duration: i64,
        /// Sampling frequency in Hz (1-10000).
        #[arg(long, default_value_t = 99)]
        frequency: i64,
        /// Event to sample on; defaults to `default_event` from the config.
        #[arg(long)]
        event: Option<SamplingEvent>,
        /// Limit the ranked function list.
        #[arg(long)]
        top: Option<usize>,
        /// Leave the raw perf script output out of the result.
        #[arg(long)]
        no_raw: bool,
        #[arg(long)]
        flame_out: Option<PathBuf>,
        #[arg(long, default_value = "folded")]
        flame_format: FlameFormat,
    },
    /// Analyse a saved `perf script` report without running perf.
    Parse {
        #[arg(value_name = "REPORT")]
        report: PathBuf,
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        flame_out: Option<PathBuf>,
        #[arg(long, default_value = "folded")]
        flame_format: FlameFormat,
    },
    /// Show sampling tool availability and the effective configuration.
    Env,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlameFormat {
    Folded,
    Speedscope,
}

impl clap::ValueEnum for FlameFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Folded, Self::Speedscope]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Folded => clap::builder::PossibleValue::new("folded"),
            Self::Speedscope => clap::builder::PossibleValue::new("speedscope"),
        })
    }
}

pub fn profile_command(config: &Config, command: &ProfileCommand) -> PerfscopeResult<serde_json::Value> {
    match command {
        ProfileCommand::Profile {
            pid,
            duration,
            frequency,
            event,
            top,
            no_raw,
            flame_out,
            flame_format,
        } => {
            let mut config = config.clone();
            if top.is_some() {
                config.top_functions = *top;
            }
            if *no_raw {
                config.include_raw_report = false;
            }
            let raw = RawProfileRequest {
                pid: *pid,
                duration: *duration,
                frequency: *frequency,
                event: event.map(|e| e.to_string()),
            };
            let response = Profiler::system(config).profile(&raw)?;
            if response.success
                && let Some(path) = flame_out
            {
                write_flame(path, *flame_format, &format!("pid {pid}"), &response.flame_graph_data)?;
            }
            Ok(serde_json::to_value(response)?)
        }
        ProfileCommand::Parse {
            report,
            top,
            flame_out,
            flame_format,
        } => {
            let bytes = std::fs::read(report)?;
            let text = String::from_utf8_lossy(&bytes);
            let analysis = analyze_report(&text, top.or(config.top_functions))?;
            if let Some(path) = flame_out {
                write_flame(
                    path,
                    *flame_format,
                    &report.display().to_string(),
                    &analysis.flame_graph_data,
                )?;
            }
            Ok(serde_json::json!({
                "report": report.display().to_string(),
                "raw_report_digest": blake3::hash(&bytes).to_hex().to_string(),
                "statistics": analysis.statistics,
                "flame_graph_data": analysis.flame_graph_data,
                "skipped_blocks": analysis.skipped_blocks,
            }))
        }
        ProfileCommand::Env => {
            let profiler = Profiler::system(config.clone());
            Ok(serde_json::json!({
                "tool": profiler.probe(),
                "events": SamplingEvent::ALL.map(|e| e.as_str()),
                "config": config,
            }))
        }
    }
}

fn write_flame(
    path: &Path,
    format: FlameFormat,
    name: &str,
    lines: &[FlameGraphLine],
) -> PerfscopeResult<()> {
    match format {
        FlameFormat::Folded => write_text(path, &to_folded_text(lines)),
        FlameFormat::Speedscope => write_json(path, &to_speedscope(name, lines)),
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> PerfscopeResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

fn write_text(path: &Path, value: &str) -> PerfscopeResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("perfscope-cmd-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("workspace");
        dir
    }

    const REPORT: &str = "cmdA 100 10.0\n  [addr] foo\n  [addr] bar\n\ncmdA 100 11.0\n  [addr] foo\n  [addr] bar";

    #[test]
    fn parse_writes_folded_flame_file() {
        let ws = temp_workspace("parse-folded");
        let report = ws.join("perf.script.txt");
        std::fs::write(&report, REPORT).expect("report");
        let out_file = ws.join("out").join("stacks.folded");
        let cmd = ProfileCommand::Parse {
            report: report.clone(),
            top: None,
            flame_out: Some(out_file.clone()),
            flame_format: FlameFormat::Folded,
        };
        let out = profile_command(&Config::default(), &cmd).expect("parse");
        assert_eq!(out["statistics"]["total_samples"], serde_json::json!(2));
        assert_eq!(out["statistics"]["top_functions"][0]["function"], serde_json::json!("foo"));
        assert_eq!(
            std::fs::read_to_string(&out_file).expect("folded"),
            "cmdA;bar;foo 2"
        );
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn parse_writes_speedscope() {
        let ws = temp_workspace("parse-speedscope");
        let report = ws.join("perf.script.txt");
        std::fs::write(&report, REPORT).expect("report");
        let out_file = ws.join("profile.speedscope.json");
        let cmd = ProfileCommand::Parse {
            report,
            top: Some(1),
            flame_out: Some(out_file.clone()),
            flame_format: FlameFormat::Speedscope,
        };
        profile_command(&Config::default(), &cmd).expect("parse");
        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&out_file).expect("read")).expect("json");
        assert_eq!(doc["exporter"], serde_json::json!("perfscope"));
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn parse_missing_report_is_io_error() {
        let cmd = ProfileCommand::Parse {
            report: PathBuf::from("/nonexistent/perfscope/report.txt"),
            top: None,
            flame_out: None,
            flame_format: FlameFormat::Folded,
        };
        let err = profile_command(&Config::default(), &cmd).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn env_reports_missing_tool() {
        let cfg = Config {
            tool: PathBuf::from("/nonexistent/perfscope/perf"),
            ..Config::default()
        };
        let out = profile_command(&cfg, &ProfileCommand::Env).expect("env");
        assert_eq!(out["tool"]["available"], serde_json::json!(false));
        assert_eq!(out["events"].as_array().map(|e| e.len()), Some(4));
    }

    #[test]
    fn profile_out_of_range_duration_fails_without_running_perf() {
        let cfg = Config {
            tool: PathBuf::from("/nonexistent/perfscope/perf"),
            ..Config::default()
        };
        let cmd = ProfileCommand::Profile {
            pid: i64::from(std::process::id()),
            duration: 301,
            frequency: 99,
            event: None,
            top: None,
            no_raw: false,
            flame_out: None,
            flame_format: FlameFormat::Folded,
        };
        let out = profile_command(&cfg, &cmd).expect("profile");
        assert_eq!(out["success"], serde_json::json!(false));
        assert_eq!(out["error_code"], serde_json::json!("invalid_parameter"));
    }
}
