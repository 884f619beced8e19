//! Result summary recognition.
//!
//! Encoders finish with a line such as
//! `encoded 2400 frames, 45.12 fps, 3500.25 kb/s`; that line becomes the
//! informational message of a completed job.

use std::fmt;
use std::sync::OnceLock;

use regex_lite::Regex;

/// Throughput figures reported at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSummary {
    pub frames: u64,
    pub fps: f64,
    /// Average bitrate in kb/s, truncated.
    pub bitrate_kbps: u64,
}

impl fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {:.2} fps, {} kb/s",
            self.frames, self.fps, self.bitrate_kbps
        )
    }
}

fn result_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*encoded (\d+) frames,\s*([\d.]+)\s*fps,\s*([\d.]+)\s*kb/s")
            .expect("result line pattern is valid")
    })
}

/// Parse a result line, or `None` if the line is anything else.
pub fn parse_result_line(line: &str) -> Option<ResultSummary> {
    let caps = result_line_pattern().captures(line)?;
    let frames = caps.get(1)?.as_str().parse().ok()?;
    let fps = caps.get(2)?.as_str().parse().ok()?;
    let bitrate: f64 = caps.get(3)?.as_str().parse().ok()?;

    Some(ResultSummary {
        frames,
        fps,
        bitrate_kbps: bitrate as u64,
    })
}
