//! Decoding of latency probe output.
//!
//! The recognized text is what `ping` prints, possibly several runs joined
//! together:
//!
//! ```text
//! PING 10.0.0.2 (10.0.0.2) 56(84) bytes of data.
//! 64 bytes from 10.0.0.2: icmp_seq=1 ttl=64 time=0.254 ms
//! ----
//! PING 10.0.0.3 (10.0.0.3) 56(84) bytes of data.
//! 64 bytes from 10.0.0.3: icmp_seq=1 ttl=64 time=0.301 ms
//! ```

use serde::{Deserialize, Serialize};

const DELIMITER_CHARS: [char; 4] = ['-', '=', '*', '#'];
const MIN_DELIMITER_LEN: usize = 3;
const TIME_PREFIX: &str = "time=";

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeLine {
    /// `time=<float> ms` somewhere in the line
    Sample(f64),
    /// A line made of one repeated delimiter character
    Delimiter,
    /// `PING <host> ...`
    Target(String),
    Other,
}

impl ProbeLine {
    pub fn decode(line: &str) -> Self {
        let trimmed = line.trim();
        if is_delimiter(trimmed) {
            return ProbeLine::Delimiter;
        }
        if let Some(rest) = trimmed.strip_prefix("PING ") {
            if let Some(host) = rest.split_whitespace().next() {
                return ProbeLine::Target(host.to_string());
            }
        }
        match parse_time_ms(trimmed) {
            Some(rtt) => ProbeLine::Sample(rtt),
            None => ProbeLine::Other,
        }
    }
}

fn is_delimiter(line: &str) -> bool {
    let mut chars = line.chars();
    let first = match chars.next() {
        Some(c) if DELIMITER_CHARS.contains(&c) => c,
        _ => return false,
    };
    chars.all(|c| c == first) && line.chars().count() >= MIN_DELIMITER_LEN
}

fn parse_time_ms(line: &str) -> Option<f64> {
    line.match_indices(TIME_PREFIX)
        .find_map(|(at, _)| time_in_ms(&line[at + TIME_PREFIX.len()..]))
}

fn time_in_ms(rest: &str) -> Option<f64> {
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let value: f64 = rest[..end].parse().ok()?;
    rest[end..].trim_start().starts_with("ms").then_some(value)
}

/// One round-trip sample and the target it was measured against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSample {
    pub target: Option<String>,
    pub rtt_ms: f64,
}

/// Line-by-line probe output parser that remembers the current target.
#[derive(Debug, Clone, Default)]
pub struct ProbeParser {
    target: Option<String>,
}

impl ProbeParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Feeds one line, returning the sample it carries, if any.
    pub fn feed(&mut self, line: &str) -> Option<ProbeSample> {
        match ProbeLine::decode(line) {
            ProbeLine::Sample(rtt_ms) => Some(ProbeSample {
                target: self.target.clone(),
                rtt_ms,
            }),
            ProbeLine::Delimiter => {
                self.target = None;
                None
            }
            ProbeLine::Target(host) => {
                self.target = Some(host);
                None
            }
            ProbeLine::Other => None,
        }
    }
}

/// Every sample in `text`, in order.
pub fn parse_probe_output(text: &str) -> Vec<ProbeSample> {
    let mut parser = ProbeParser::new();
    text.lines().filter_map(|line| parser.feed(line)).collect()
}
