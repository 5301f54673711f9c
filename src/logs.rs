//! Conversion of the logs section into log streams
//!
//! The prober logs in logfmt: one record per line, each a sequence of
//! `key=value` pairs with optionally quoted values.

use crate::telemetry::{format_labels, LabelPair, LogEntry, LogStream};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::warn;

/// A logfmt syntax or encoding problem, local to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogfmtError {
    pub column: usize,
    pub message: String,
}

impl LogfmtError {
    fn new(column: usize, message: impl Into<String>) -> Self {
        Self {
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogfmtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "logfmt syntax error at column {}: {}", self.column, self.message)
    }
}

impl std::error::Error for LogfmtError {}

fn is_key_char(c: char) -> bool {
    c > ' ' && c != '=' && c != '"' && c != char::REPLACEMENT_CHARACTER
}

fn record_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(\S+?)=("(?:[^"\\]|\\.)*"|\S*)|(\S+)"#)
            .expect("logfmt record pattern is valid")
    })
}

fn check_key(key: &str, column: usize) -> Result<(), LogfmtError> {
    match key.chars().find(|c| !is_key_char(*c)) {
        Some(c) => Err(LogfmtError::new(column, format!("unexpected {:?} in key", c))),
        None => Ok(()),
    }
}

/// Resolve the escapes inside a quoted value (quotes already stripped).
fn unquote(raw: &str, column: usize) -> Result<String, LogfmtError> {
    let mut value = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some(escaped @ ('"' | '\\' | '/')) => value.push(escaped),
            Some('n') => value.push('\n'),
            Some('r') => value.push('\r'),
            Some('t') => value.push('\t'),
            Some('b') => value.push('\u{8}'),
            Some('f') => value.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        LogfmtError::new(column, format!("invalid unicode escape \\u{}", hex))
                    })?;
                value.push(decoded);
            }
            Some(other) => {
                return Err(LogfmtError::new(column, format!("invalid escape '\\{}'", other)));
            }
            None => return Err(LogfmtError::new(column, "dangling escape")),
        }
    }

    Ok(value)
}

/// Decode one logfmt record into its key/value pairs. A key with no `=`
/// has an empty value.
pub fn decode_record(line: &str) -> Result<Vec<(String, String)>, LogfmtError> {
    let mut pairs = Vec::new();
    let mut last_end = None;

    for captures in record_pattern().captures_iter(line) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let column = whole.start() + 1;

        // Pairs must be separated by whitespace.
        if last_end == Some(whole.start()) {
            return Err(LogfmtError::new(column, "missing space between pairs"));
        }
        last_end = Some(whole.end());

        if let Some(bare) = captures.get(3) {
            check_key(bare.as_str(), column)?;
            pairs.push((bare.as_str().to_string(), String::new()));
            continue;
        }

        let (Some(key), Some(raw)) = (captures.get(1), captures.get(2)) else {
            continue;
        };
        check_key(key.as_str(), column)?;

        let raw = raw.as_str();
        let value = match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            Some(inner) if raw.len() >= 2 => unquote(inner, column + key.len() + 1)?,
            _ => {
                if let Some(c) = raw.chars().find(|c| *c == '=' || *c == '"') {
                    return Err(LogfmtError::new(column, format!("unexpected {:?} in value", c)));
                }
                raw.to_string()
            }
        };

        pairs.push((key.as_str().to_string(), value));
    }

    Ok(pairs)
}

fn needs_quotes(value: &str) -> bool {
    value
        .chars()
        .any(|c| c <= ' ' || c == '=' || c == '"' || c == char::REPLACEMENT_CHARACTER)
}

/// Logfmt encoder writing into a single line buffer.
#[derive(Debug, Default)]
pub struct LineEncoder {
    line: String,
}

impl LineEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode_keyval(&mut self, key: &str, value: &str) -> Result<(), LogfmtError> {
        if key.is_empty() || !key.chars().all(is_key_char) {
            return Err(LogfmtError::new(0, format!("invalid key {:?}", key)));
        }

        if !self.line.is_empty() {
            self.line.push(' ');
        }
        self.line.push_str(key);
        self.line.push('=');

        if !needs_quotes(value) {
            self.line.push_str(value);
            return Ok(());
        }

        self.line.push('"');
        for c in value.chars() {
            match c {
                '"' => self.line.push_str("\\\""),
                '\\' => self.line.push_str("\\\\"),
                '\n' => self.line.push_str("\\n"),
                '\r' => self.line.push_str("\\r"),
                '\t' => self.line.push_str("\\t"),
                c if (c as u32) < 0x20 => self.line.push_str(&format!("\\u{:04x}", c as u32)),
                c => self.line.push(c),
            }
        }
        self.line.push('"');
        Ok(())
    }

    /// Terminate the record with a newline and return it.
    pub fn end_record(mut self) -> String {
        self.line.push('\n');
        self.line
    }
}

/// Convert one record, or explain why it has to be dropped.
fn convert_record(
    pairs: Vec<(String, String)>,
    base_labels: &[LabelPair],
) -> Result<LogStream, String> {
    let mut labels = base_labels.to_vec();
    let mut timestamp: Option<DateTime<Utc>> = None;
    let mut encoder = LineEncoder::new();

    for (key, value) in pairs {
        match key.as_str() {
            "ts" => {
                // A record without a valid timestamp cannot be placed among
                // its neighbours, so it is never given one.
                let parsed = DateTime::parse_from_rfc3339(&value)
                    .map_err(|e| format!("invalid timestamp {:?}: {}", value, e))?;
                timestamp = Some(parsed.with_timezone(&Utc));
            }
            "caller" | "module" => {}
            "level" => labels.push(LabelPair::new("level", value)),
            _ => encoder
                .encode_keyval(&key, &value)
                .map_err(|e| format!("invalid entry {:?}={:?}: {}", key, value, e))?,
        }
    }

    let timestamp = timestamp.ok_or_else(|| "record has no timestamp".to_string())?;

    Ok(LogStream {
        labels: format_labels(&labels),
        entries: vec![LogEntry {
            timestamp,
            line: encoder.end_record(),
        }],
    })
}

/// Decode a logs block into one stream per record. Records that cannot be
/// decoded or re-encoded are skipped with a warning.
pub fn convert_logs(block: &[u8], base_labels: &[LabelPair]) -> Vec<LogStream> {
    let text = String::from_utf8_lossy(block);
    let mut streams = Vec::new();

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let pairs = match decode_record(line) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(record = index + 1, error = %e, "Error decoding log record");
                continue;
            }
        };

        match convert_record(pairs, base_labels) {
            Ok(stream) => streams.push(stream),
            Err(reason) => {
                warn!(record = index + 1, reason = %reason, "Skipping log record");
            }
        }
    }

    streams
}
