use anyhow::Result;
use perfscope::{Config, FlameGraphLine, ProfileResponse, Statistics, ToolProbe};
use serde::Deserialize;
use serde_json::Value;

const HOTSPOT_ROWS: usize = 15;
const STACK_ROWS: usize = 5;

#[derive(Debug, Clone, Copy)]
enum Tone {
    Good,
    Bad,
    Title,
    Label,
    Notice,
}

impl Tone {
    fn ansi(self) -> &'static str {
        match self {
            Self::Good => "32;1",
            Self::Bad => "31;1",
            Self::Title => "36;1",
            Self::Label => "90",
            Self::Notice => "33",
        }
    }
}

#[derive(Deserialize)]
struct ReportView {
    report: String,
    raw_report_digest: String,
    statistics: Statistics,
    flame_graph_data: Vec<FlameGraphLine>,
    skipped_blocks: usize,
}

#[derive(Deserialize)]
struct EnvView {
    tool: ToolProbe,
    events: Vec<String>,
    config: Config,
}

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_profile(&self, resp: &ProfileResponse) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(resp)?);
            return Ok(());
        }

        let (status, tone) = if resp.success {
            ("OK", Tone::Good)
        } else {
            ("FAIL", Tone::Bad)
        };
        let mut out = format!(
            "{} pid {} {}\n",
            self.paint("perfscope", Tone::Title),
            resp.pid,
            self.paint(status, tone)
        );
        self.field(
            &mut out,
            "sampling",
            &format!("{}s @ {}Hz ({})", resp.duration, resp.frequency, resp.event),
        );
        self.field(&mut out, "at", &resp.timestamp);

        if let Some(stats) = &resp.statistics {
            self.hotspots(&mut out, stats, resp.flame_graph_data.len(), resp.skipped_blocks);
        }
        if let Some(digest) = &resp.raw_report_digest {
            let note = if resp.raw_report_truncated { " (raw text truncated)" } else { "" };
            self.field(&mut out, "report", &format!("{digest}{note}"));
        }
        if let Some(err) = &resp.error {
            let code = resp.error_code.as_deref().unwrap_or("error");
            out.push_str(&format!("{} [{code}] {err}\n", self.paint("error", Tone::Bad)));
        }
        if let Some(help) = &resp.help {
            out.push_str(&format!("{} {help}\n", self.paint("help", Tone::Notice)));
        }

        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_report(&self, value: &Value) -> Result<()> {
        if self.json {
            println!("{value}");
            return Ok(());
        }

        println!("{}", self.render_report(value)?);
        Ok(())
    }

    fn render_report(&self, value: &Value) -> Result<String> {
        let view: ReportView = serde_json::from_value(value.clone())?;
        let mut out = format!("{} {}\n", self.paint("report", Tone::Title), view.report);
        self.field(&mut out, "digest", &view.raw_report_digest);
        self.hotspots(
            &mut out,
            &view.statistics,
            view.flame_graph_data.len(),
            view.skipped_blocks,
        );
        if !view.flame_graph_data.is_empty() {
            out.push_str(&format!("{}\n", self.paint("heaviest stacks", Tone::Notice)));
            for line in view.flame_graph_data.iter().take(STACK_ROWS) {
                out.push_str(&format!("  {:>8}  {}\n", line.count, line.stack));
            }
        }
        Ok(out.trim_end().to_string())
    }

    pub fn print_env(&self, value: &Value) -> Result<()> {
        if self.json {
            println!("{value}");
            return Ok(());
        }

        println!("{}", self.render_env(value)?);
        Ok(())
    }

    fn render_env(&self, value: &Value) -> Result<String> {
        let view: EnvView = serde_json::from_value(value.clone())?;
        let (state, tone) = if view.tool.available {
            ("available", Tone::Good)
        } else {
            ("missing", Tone::Bad)
        };
        let mut out = format!(
            "{} {} {}\n",
            self.paint("tool", Tone::Title),
            view.tool.tool,
            self.paint(state, tone)
        );
        if let Some(path) = &view.tool.path {
            self.field(&mut out, "path", path);
        }
        if let Some(version) = &view.tool.version {
            self.field(&mut out, "version", version);
        }
        self.field(&mut out, "events", &view.events.join(", "));

        let cfg = &view.config;
        self.field(&mut out, "default event", cfg.default_event.as_str());
        self.field(&mut out, "artifacts", &cfg.artifact_root.display().to_string());
        self.field(
            &mut out,
            "record slots",
            &format!("{} (wait {}ms)", cfg.max_concurrent_records, cfg.record_queue_wait_ms),
        );
        self.field(
            &mut out,
            "timeouts",
            &format!(
                "record +{}s grace, translate {}s",
                cfg.record_grace_secs, cfg.translate_timeout_secs
            ),
        );
        Ok(out.trim_end().to_string())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "success": false,
                "error_code": "fatal",
                "error": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.paint("fatal", Tone::Bad));
    }

    fn hotspots(&self, out: &mut String, stats: &Statistics, stacks: usize, skipped: usize) {
        self.field(
            out,
            "samples",
            &format!(
                "{} ({stacks} stacks, {skipped} skipped blocks)",
                stats.total_samples
            ),
        );
        if stats.top_functions.is_empty() {
            return;
        }
        out.push_str(&format!("{}\n", self.paint("hotspots", Tone::Notice)));
        for f in stats.top_functions.iter().take(HOTSPOT_ROWS) {
            out.push_str(&format!(
                "  {:>6.2}%  {:>8}  {:<16} {}\n",
                f.overhead_percent, f.samples, f.command, f.function
            ));
        }
        let hidden = stats.top_functions.len().saturating_sub(HOTSPOT_ROWS);
        if hidden > 0 {
            out.push_str(&format!("  ... {hidden} more (use --json for all)\n"));
        }
    }

    fn field(&self, out: &mut String, label: &str, value: &str) {
        out.push_str(&format!("{} {value}\n", self.paint(label, Tone::Label)));
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{}m{text}\x1b[0m", tone.ansi())
    }
}
