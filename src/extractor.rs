//! Splitting of the prober's debug dump into its metrics and logs sections
//!
//! The dump is free-form text. Sections start at one of two literal header
//! lines and end at the first blank line after the header.

use std::io::BufRead;

pub const LOGS_HEADER: &str = "Logs for the probe:";
pub const METRICS_HEADER: &str = "Metrics that would have been returned:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Searching,
    InMetrics,
    InLogs,
}

/// The two raw sections of a debug dump. A missing section is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugDump {
    pub metrics: Vec<u8>,
    pub logs: Vec<u8>,
}

/// Line-oriented section extractor.
#[derive(Debug)]
pub struct Extractor {
    state: State,
    dump: DebugDump,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            state: State::Searching,
            dump: DebugDump::default(),
        }
    }

    /// Feed one line (without its terminator). Returns `false` once both
    /// sections are complete and no further input is needed.
    pub fn feed(&mut self, line: &[u8]) -> bool {
        match self.state {
            State::Searching => {
                if line == METRICS_HEADER.as_bytes() {
                    self.state = State::InMetrics;
                } else if line == LOGS_HEADER.as_bytes() {
                    self.state = State::InLogs;
                }
            }
            State::InMetrics | State::InLogs => {
                if line.is_empty() {
                    if !self.dump.metrics.is_empty() && !self.dump.logs.is_empty() {
                        return false;
                    }
                    self.state = State::Searching;
                    return true;
                }

                let block = if self.state == State::InMetrics {
                    &mut self.dump.metrics
                } else {
                    &mut self.dump.logs
                };
                block.extend_from_slice(line);
                block.push(b'\n');
            }
        }

        true
    }

    pub fn finish(self) -> DebugDump {
        self.dump
    }
}

/// Read a debug dump and return its sections. Lines are handled as raw
/// bytes; only read errors fail.
pub fn extract_metrics_and_logs<R: BufRead>(mut reader: R) -> std::io::Result<DebugDump> {
    let mut extractor = Extractor::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }

        let line = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if !extractor.feed(line) {
            break;
        }
    }

    Ok(extractor.finish())
}
