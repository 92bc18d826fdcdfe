//! Bounded subprocess execution.

use std::path::PathBuf;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn command_line(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The child exited on its own; `code` is `None` when it died from a signal.
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The wall-clock bound elapsed and the child was killed.
    TimedOut,
}

impl RunOutcome {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Exited {
            code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Runs one external command with captured output and a hard time limit.
///
/// Spawn failures come back as `Err`, so callers can tell a missing binary
/// apart from a command that ran and failed.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> std::io::Result<RunOutcome>;
}

/// Per-stream capture bound used when the config does not set one.
pub const DEFAULT_CAPTURE_LIMIT: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct SystemRunner {
    capture_limit: usize,
}

impl SystemRunner {
    /// Keeps at most `capture_limit` bytes of each stream; the rest is read and discarded.
    pub fn new(capture_limit: usize) -> Self {
        Self { capture_limit }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_LIMIT)
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> std::io::Result<RunOutcome> {
        tracing::debug!("spawning: {}", invocation.command_line());
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe.
        let stdout = child.stdout.take().map(|r| drain(r, self.capture_limit));
        let stderr = child.stderr.take().map(|r| drain(r, self.capture_limit));

        // After a kill, grandchildren may still hold the pipes open; leave the readers detached.
        let Some(status) = wait_bounded(&mut child, invocation.timeout)? else {
            return Ok(RunOutcome::TimedOut);
        };
        Ok(RunOutcome::Exited {
            code: status.code(),
            stdout: join(stdout),
            stderr: join(stderr),
        })
    }
}

/// The parts of a running child the wait loop needs.
trait Reapable {
    fn poll(&mut self) -> std::io::Result<Option<ExitStatus>>;
    fn kill_and_reap(&mut self);
}

impl Reapable for Child {
    fn poll(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.try_wait()
    }

    fn kill_and_reap(&mut self) {
        let _ = self.kill();
        let _ = self.wait();
    }
}

/// Polls until the child exits or `timeout` elapses. The child is killed and
/// reaped on timeout and on a failed status poll; `None` means it timed out.
fn wait_bounded(child: &mut impl Reapable, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        match child.poll() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if start.elapsed() >= timeout => {
                child.kill_and_reap();
                return Ok(None);
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(err) => {
                tracing::warn!("lost track of child process: {err}");
                child.kill_and_reap();
                return Err(err);
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R, limit: usize) -> JoinHandle<String> {
    std::thread::spawn(move || capture(&mut reader, limit))
}

// Output past `limit` is consumed so the child never blocks, then cut back to the last full line.
fn capture(reader: &mut impl Read, limit: usize) -> String {
    let mut buf = Vec::new();
    let _ = reader.by_ref().take(limit as u64).read_to_end(&mut buf);
    let dropped = std::io::copy(reader, &mut std::io::sink()).unwrap_or(0);
    if dropped > 0 {
        if let Some(end) = buf.iter().rposition(|&b| b == b'\n') {
            buf.truncate(end + 1);
        }
        tracing::warn!(
            "captured output cut to {} bytes, {dropped} further bytes discarded",
            buf.len()
        );
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
