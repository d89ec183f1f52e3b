//! Line codec for the Tor control protocol.
//!
//! Commands go out as `NAME arg1 arg2\n`. Replies come back as one or more
//! lines of the form `NNN-payload` (mid), `NNN+keyword=` followed by a data
//! block closed by a lone `.` (data), and a final `NNN payload` (end).

use onionpay_common::config::control::STATUS_OK;
use std::fmt;

/// Placeholder printed instead of secret arguments.
///
/// Fixed length so the real secret length is not leaked to logs.
const MASK: &str = "********";

/// A control command ready to be written to the wire
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Arg>,
}

#[derive(Clone, PartialEq, Eq)]
struct Arg {
    value: String,
    secret: bool,
    quoted: bool,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: false,
            quoted: false,
        });
        self
    }

    /// Argument that is written verbatim but masked when displayed
    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: true,
            quoted: false,
        });
        self
    }

    /// Secret argument sent as a quoted string, e.g. a control password
    pub fn quoted_secret(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: true,
            quoted: true,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize to the wire format, newline terminated
    pub fn encode(&self) -> Result<String, CodecError> {
        let mut line = String::with_capacity(64);
        check_token(&self.name)?;
        line.push_str(&self.name);

        for arg in &self.args {
            check_token(&arg.value)?;
            line.push(' ');
            if arg.quoted {
                line.push_str(&quote(&arg.value));
            } else {
                line.push_str(&arg.value);
            }
        }

        line.push('\n');
        Ok(line)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            match (arg.secret, arg.quoted) {
                (true, true) => write!(f, " \"{}\"", MASK)?,
                (true, false) => write!(f, " {}", MASK)?,
                (false, _) => write!(f, " {}", arg.value)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self)
    }
}

fn check_token(value: &str) -> Result<(), CodecError> {
    if value.contains(['\r', '\n']) {
        return Err(CodecError::InvalidArgument(
            "argument contains a line break".to_string(),
        ));
    }
    Ok(())
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// One logical line of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    pub payload: String,
    /// Lines of a `NNN+` data block, empty for ordinary lines
    pub data: Vec<String>,
}

/// A complete reply to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    status: u16,
    lines: Vec<ReplyLine>,
    raw: String,
}

impl Reply {
    /// Status code of the terminal line
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// All lines, terminal line last
    pub fn lines(&self) -> &[ReplyLine] {
        &self.lines
    }

    /// Reply text as received, lines joined with CRLF
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Payload of the terminal line, e.g. `OK` or a failure reason
    pub fn message(&self) -> &str {
        self.lines
            .last()
            .map(|line| line.payload.as_str())
            .unwrap_or_default()
    }

    /// Value of the first `key=value` line
    pub fn value(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|line| strip_key(&line.payload, key))
    }

    /// Whitespace separated entries listed under `key`, from either the
    /// single-line form or a data block
    pub fn list(&self, key: &str) -> Vec<String> {
        let mut entries = Vec::new();
        for line in &self.lines {
            let Some(value) = strip_key(&line.payload, key) else {
                continue;
            };
            entries.extend(value.split_whitespace().map(str::to_string));
            for data in &line.data {
                entries.extend(data.split_whitespace().map(str::to_string));
            }
        }
        entries
    }
}

fn strip_key<'a>(payload: &'a str, key: &str) -> Option<&'a str> {
    payload
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('='))
}

/// Incremental reply decoder, fed one line at a time
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    lines: Vec<ReplyLine>,
    raw: Vec<String>,
    data: Option<ReplyLine>,
    /// First problem seen in the current reply, reported at its terminal line
    failed: Option<CodecError>,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reply has been started but not yet finished
    pub fn in_progress(&self) -> bool {
        !self.raw.is_empty()
    }

    /// Drop a partially received reply
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one line (with or without trailing CRLF). Returns the reply
    /// once its terminal line has been seen.
    ///
    /// A malformed or mismatched line does not abort the reply: the decoder
    /// keeps consuming until the terminal line, then reports the first error
    /// and starts afresh, so the stream stays aligned with the next reply.
    pub fn push(&mut self, line: &str) -> Result<Option<Reply>, CodecError> {
        let line = line.trim_end_matches(['\r', '\n']);
        self.raw.push(line.to_string());

        if self.data.is_some() {
            if line == "." {
                if let Some(block) = self.data.take() {
                    self.lines.push(block);
                }
            } else if let Some(block) = self.data.as_mut() {
                // Leading dots are doubled inside data blocks
                let data = line.strip_prefix('.').filter(|rest| rest.starts_with('.'));
                block.data.push(data.unwrap_or(line).to_string());
            }
            return Ok(None);
        }

        let (code, sep, payload) = match split_line(line) {
            Ok(parts) => parts,
            Err(e) => {
                self.failed.get_or_insert(e);
                return Ok(None);
            }
        };

        if let Some(first) = self.lines.first() {
            if first.code != code {
                self.failed.get_or_insert(CodecError::MismatchedCode {
                    expected: first.code,
                    actual: code,
                });
            }
        }

        let reply_line = ReplyLine {
            code,
            payload: payload.to_string(),
            data: Vec::new(),
        };

        match sep {
            '-' => self.lines.push(reply_line),
            '+' => self.data = Some(reply_line),
            _ => {
                self.lines.push(reply_line);
                let reply = Reply {
                    status: code,
                    lines: std::mem::take(&mut self.lines),
                    raw: std::mem::take(&mut self.raw).join("\r\n"),
                };
                if let Some(e) = self.failed.take() {
                    return Err(e);
                }
                return Ok(Some(reply));
            }
        }

        Ok(None)
    }
}

fn split_line(line: &str) -> Result<(u16, char, &str), CodecError> {
    let malformed = || CodecError::Malformed(line.to_string());

    if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
        return Err(malformed());
    }

    let (code, rest) = line.split_at(3);
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let code: u16 = code.parse().map_err(|_| malformed())?;

    let sep = rest.chars().next().ok_or_else(malformed)?;
    if !matches!(sep, '-' | '+' | ' ') {
        return Err(malformed());
    }

    Ok((code, sep, &rest[1..]))
}

/// Decode a buffer holding exactly one complete reply
pub fn decode(raw: &str) -> Result<Reply, CodecError> {
    let mut decoder = ReplyDecoder::new();
    for line in raw.lines() {
        if let Some(reply) = decoder.push(line)? {
            return Ok(reply);
        }
    }
    Err(decoder.failed.take().unwrap_or(CodecError::Incomplete))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed reply line: {0:?}")]
    Malformed(String),

    #[error("Reply code changed mid-reply: expected {expected}, got {actual}")]
    MismatchedCode { expected: u16, actual: u16 },

    #[error("Reply ended before its terminal line")]
    Incomplete,

    #[error("Invalid command argument: {0}")]
    InvalidArgument(String),
}
