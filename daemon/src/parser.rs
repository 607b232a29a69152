//! Trace line parsing
//!
//! Turns one raw text line from the tracing subsystem into a
//! [`TraceEvent`]. Two grammars are accepted:
//!
//! - **pipe**: lines read straight from `trace_pipe`
//!   `<comm-pid> <cpu> <flags> <sec>.<usec>: <function>: dev=... skbaddr=...`
//! - **report**: lines produced by `trace-cmd report`
//!   `<comm>-<pid> <cpu> <sec>.<usec>: <function>: dev=... skbaddr=... len=...`
//!
//! A line that does not fit the grammar yields `None`. Missing fields are
//! never an error since not all events carry all fields.

use std::str::FromStr;

use trace_common::{Timestamp, TraceEvent};

/// Which producer generated the trace lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// Raw `trace_pipe` output
    Pipe,
    /// `trace-cmd report` output
    Report,
}

impl LineFormat {
    /// Parse a line with this format's grammar
    pub fn parse(&self, line: &str) -> Option<TraceEvent> {
        match self {
            LineFormat::Pipe => parse_pipe_line(line),
            LineFormat::Report => parse_report_line(line),
        }
    }
}

impl FromStr for LineFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pipe" | "trace_pipe" => Ok(LineFormat::Pipe),
            "report" | "trace-cmd" => Ok(LineFormat::Report),
            _ => Err(format!("Unsupported line format: {}. Use pipe or report", s)),
        }
    }
}

/// Parse a `trace_pipe` line
pub fn parse_pipe_line(line: &str) -> Option<TraceEvent> {
    let mut cur = Cursor::new(line);

    cur.token()?; // command and pid
    cur.token()?; // cpu
    cur.token()?; // flags
    let timestamp = cur.timestamp()?;
    let function = cur.function_name()?;

    // Assume events come from the net subsystem and carry these fields
    let device = cur.field("dev").map(str::to_string);
    let skbaddr = cur.field("skbaddr").map(str::to_string);

    Some(TraceEvent {
        timestamp,
        function: function.to_string(),
        device,
        skbaddr,
        length: None,
        pid: None,
    })
}

/// Parse a `trace-cmd report` line
pub fn parse_report_line(line: &str) -> Option<TraceEvent> {
    let mut cur = Cursor::new(line);

    let pid = cur.token().and_then(parse_pid);
    cur.token()?; // cpu
    let timestamp = cur.timestamp()?;
    let function = cur.function_name()?;

    let mut event = TraceEvent {
        timestamp,
        function: function.to_string(),
        pid,
        ..Default::default()
    };

    if function.starts_with("net") || function.starts_with("napi") {
        event.device = cur.field("dev").map(str::to_string);
        event.skbaddr = cur.field("skbaddr").map(str::to_string);
        event.length = cur.field("len").and_then(|v| leading_int(v, 10));
    } else if function.starts_with("sys_exit") {
        // Return value is printed in hex after the separator
        event.length = cur.rest.get(1..).and_then(|s| leading_int(s.trim_start(), 16));
    }

    // Other events would only correlate by pid, which is not supported here
    Some(event)
}

/// Extract the pid from a `comm-pid` token
///
/// The command name may itself contain dashes, so the last one wins.
fn parse_pid(token: &str) -> Option<i32> {
    let (_, pid) = token.rsplit_once('-')?;
    pid.parse().ok()
}

/// Parse a leading integer in the given radix
///
/// Accepts an optional sign and, for base 16, an optional `0x` prefix.
/// Hex values wider than `i64` wrap so that kernel-printed negative
/// return codes come back negative.
fn leading_int(s: &str, radix: u32) -> Option<i64> {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let s = if radix == 16 {
        s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
    } else {
        s
    };

    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_digit(radix))
        .map_or(s.len(), |(i, _)| i);
    if end == 0 {
        return None;
    }

    let value = u64::from_str_radix(&s[..end], radix).ok()? as i64;
    Some(if negative { value.wrapping_neg() } else { value })
}

/// Forward-only scanner over one line
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            rest: line.trim_end_matches(['\n', '\r']),
        }
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    /// Next whitespace-delimited token
    fn token(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        if self.rest.is_empty() {
            return None;
        }
        let end = self.rest.find(char::is_whitespace).unwrap_or(self.rest.len());
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(token)
    }

    fn unsigned(&mut self) -> Option<u64> {
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        if end == 0 {
            return None;
        }
        let value = self.rest[..end].parse().ok()?;
        self.rest = &self.rest[end..];
        Some(value)
    }

    fn expect(&mut self, c: char) -> Option<()> {
        self.rest = self.rest.strip_prefix(c)?;
        Some(())
    }

    /// `<sec>.<usec>:`
    fn timestamp(&mut self) -> Option<Timestamp> {
        self.skip_whitespace();
        let secs = self.unsigned()?;
        self.expect('.')?;
        let micros = self.unsigned()?;
        self.expect(':')?;
        Some(Timestamp::new(secs, micros))
    }

    /// Function name terminated by `:` or `(`; the terminator is consumed
    fn function_name(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let end = self.rest.find([':', '(']).unwrap_or(self.rest.len());
        let name = self.rest[..end].trim_end();
        self.rest = self.rest.get(end + 1..).unwrap_or("");
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Value of `key=value`, searched forward from the cursor
    ///
    /// The key must start a token. On a miss the cursor does not move so
    /// later fields can still be found. An empty value counts as absent.
    fn field(&mut self, key: &str) -> Option<&'a str> {
        let rest = self.rest;
        let bytes = rest.as_bytes();

        for (idx, _) in rest.match_indices(key) {
            let at_token_start = idx == 0 || bytes[idx - 1].is_ascii_whitespace();
            let after = &rest[idx + key.len()..];
            let Some(value_start) = after.strip_prefix('=') else {
                continue;
            };
            if !at_token_start {
                continue;
            }

            let len = value_start
                .find(char::is_whitespace)
                .unwrap_or(value_start.len());
            let value = &value_start[..len];
            self.rest = &value_start[len..];
            return if value.is_empty() { None } else { Some(value) };
        }

        None
    }
}
