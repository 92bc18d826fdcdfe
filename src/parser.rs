//! Parser for `perf script` stack reports.
//!
//! A report is a sequence of blocks separated by blank lines. Each block has
//! an unindented header (`comm pid[/tid] [cpu] timestamp: period event:`)
//! followed by indented frame lines, innermost frame first:
//!
//! ```text
//! python3 12345/12345 [002] 81234.567890:   10101010 cpu-clock:
//! 	    7f3a91c2d0e4 _PyEval_EvalFrameDefault+0x1a4 (/usr/lib/libpython3.11.so)
//! 	    55d0c1a0f10b main+0x2b (/usr/bin/python3.11)
//! ```
//!
//! Malformed blocks are skipped and counted; they never abort the parse.

use serde::{Deserialize, Serialize};

use crate::{PerfscopeError, PerfscopeResult};

/// Name given to frames the tool could not symbolise.
pub const UNRESOLVED_SYMBOL: &str = "[unknown]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub command: String,
    pub pid: u32,
    /// Tool-native timestamp, kept verbatim.
    pub timestamp: String,
    /// Innermost (leaf) frame first.
    pub frames: Vec<String>,
}

impl Sample {
    pub fn leaf(&self) -> Option<&str> {
        self.frames.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReport {
    pub samples: Vec<Sample>,
    /// Blocks seen, well-formed or not.
    pub blocks: usize,
    pub skipped_blocks: usize,
}

enum State {
    AwaitingHeader,
    /// `None` while discarding the frames of a block whose header was rejected.
    Accumulating(Option<Sample>),
}

#[derive(Default)]
struct Parser {
    out: ParsedReport,
}

impl Parser {
    fn open_block(&mut self, header: &str) -> State {
        self.out.blocks += 1;
        match parse_header(header) {
            Some(sample) => State::Accumulating(Some(sample)),
            None => {
                self.out.skipped_blocks += 1;
                tracing::debug!("skipping block with malformed header: {header:?}");
                State::Accumulating(None)
            }
        }
    }

    fn close_block(&mut self, state: State) -> State {
        if let State::Accumulating(Some(sample)) = state {
            self.out.samples.push(sample);
        }
        State::AwaitingHeader
    }

    fn feed(&mut self, state: State, line: &str) -> State {
        if line.trim().is_empty() {
            return self.close_block(state);
        }
        match state {
            State::AwaitingHeader if line.trim_start().starts_with('#') => State::AwaitingHeader,
            State::AwaitingHeader if is_indented(line) => {
                self.out.blocks += 1;
                self.out.skipped_blocks += 1;
                tracing::debug!("skipping frames without a header: {line:?}");
                State::Accumulating(None)
            }
            State::AwaitingHeader => self.open_block(line),
            State::Accumulating(mut current) if is_indented(line) => {
                if let Some(sample) = current.as_mut() {
                    sample.frames.push(parse_frame(line));
                }
                State::Accumulating(current)
            }
            // A header directly after frames starts the next block.
            state @ State::Accumulating(_) => {
                self.close_block(state);
                self.open_block(line)
            }
        }
    }
}

/// Splits a report into samples.
///
/// Fails only when the report contained blocks and every one of them was malformed.
pub fn parse_report(report: &str) -> PerfscopeResult<ParsedReport> {
    let mut parser = Parser::default();
    let mut state = State::AwaitingHeader;
    for line in report.lines() {
        state = parser.feed(state, line);
    }
    parser.close_block(state);

    let out = parser.out;
    if out.samples.is_empty() && out.skipped_blocks > 0 {
        return Err(PerfscopeError::Parse(format!(
            "none of the {} blocks in the report had a recognisable header",
            out.blocks
        )));
    }
    if out.skipped_blocks > 0 {
        tracing::warn!(
            "skipped {} of {} malformed report blocks",
            out.skipped_blocks,
            out.blocks
        );
    }
    Ok(out)
}

fn is_indented(line: &str) -> bool {
    line.starts_with([' ', '\t'])
}

// The pid is the token right before the timestamp, ignoring `[cpu]` columns; command names may
// contain numeric words of their own.
fn parse_header(line: &str) -> Option<Sample> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    (1..tokens.len()).find_map(|pid_idx| {
        let pid = parse_pid(tokens[pid_idx])?;
        let timestamp = tokens[pid_idx + 1..]
            .iter()
            .find(|t| !t.starts_with('['))
            .and_then(|t| parse_timestamp(t))?;
        Some(Sample {
            command: tokens[..pid_idx].join(" "),
            pid,
            timestamp,
            frames: Vec::new(),
        })
    })
}

// `pid` or `pid/tid`.
fn parse_pid(token: &str) -> Option<u32> {
    let (pid, tid) = match token.split_once('/') {
        Some((pid, tid)) => (pid, Some(tid)),
        None => (token, None),
    };
    if let Some(tid) = tid
        && !is_decimal(tid)
    {
        return None;
    }
    if !is_decimal(pid) {
        return None;
    }
    pid.parse().ok()
}

// `secs.usecs`, `secs.usecs:` or `secs:`; a bare integer is a pid or part of the command.
fn parse_timestamp(token: &str) -> Option<String> {
    let ts = token.trim_end_matches(':');
    let looks_numeric = ts.chars().any(|c| c.is_ascii_digit())
        && ts.chars().all(|c| c.is_ascii_digit() || c == '.')
        && (ts.contains('.') || ts.len() < token.len());
    looks_numeric.then(|| ts.to_string())
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Reduces a frame line to its symbol.
pub fn parse_frame(line: &str) -> String {
    let mut rest = strip_module(line.trim());

    if let Some((first, tail)) = split_first_token(rest)
        && (is_address(first) || (first.starts_with('[') && first.ends_with(']') && !tail.is_empty()))
    {
        rest = tail;
    } else if is_address(rest) {
        rest = "";
    }

    let symbol = strip_offset(rest.trim());
    if symbol.is_empty() || symbol == UNRESOLVED_SYMBOL {
        UNRESOLVED_SYMBOL.to_string()
    } else {
        symbol.to_string()
    }
}

fn split_first_token(s: &str) -> Option<(&str, &str)> {
    let (first, tail) = s.split_once(char::is_whitespace)?;
    Some((first, tail.trim_start()))
}

// Drops a trailing ` (module)` annotation; parentheses glued to the symbol (C++ signatures) stay.
fn strip_module(s: &str) -> &str {
    if !s.ends_with(')') {
        return s;
    }
    let mut depth = 0usize;
    for (idx, ch) in s.char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' => {
                depth -= 1;
                if depth == 0 {
                    let head = &s[..idx];
                    return if head.is_empty() {
                        ""
                    } else if head.ends_with(char::is_whitespace) {
                        head.trim_end()
                    } else {
                        s
                    };
                }
            }
            _ => {}
        }
    }
    s
}

fn strip_offset(symbol: &str) -> &str {
    match symbol.rfind("+0x") {
        Some(pos) if pos > 0 && symbol[pos + 3..].bytes().all(|b| b.is_ascii_hexdigit()) => {
            &symbol[..pos]
        }
        _ => symbol,
    }
}

// Short all-hex words such as `add` or `cafe` are treated as symbols, not addresses.
fn is_address(token: &str) -> bool {
    let (prefixed, digits) = match token.strip_prefix("0x") {
        Some(d) => (true, d),
        None => (false, token),
    };
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_hexdigit())
        && (prefixed || digits.len() >= 8 || digits.bytes().any(|b| b.is_ascii_digit()))
}
