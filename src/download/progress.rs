//! Progress adapters normalizing download-tool output.
//!
//! Each adapter consumes one line of subprocess output at a time and
//! keeps a uniform completion signal, so the orchestrator stays
//! tool-agnostic. Two shapes cover the supported tools: a streaming
//! `NN.N% of ~SIZE` form and a marker/percent tick form.

use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;

/// Which subprocess stream carries the progress lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStream {
    Stdout,
    Stderr,
}

/// Uniform sink for heterogeneous tool output.
pub trait ProgressSink: Send {
    /// Feed one line of tool output.
    fn on_line(&mut self, line: &str);
    /// Observe process exit; returns overall success.
    fn finish(&mut self, exit_ok: bool) -> bool;
}

/// Adapter for tools reporting `NN.N% of ~SIZE UNIT` lines. The first
/// matching line establishes the total; later lines advance a monotonic
/// byte counter proportionally.
pub struct StreamingPercentSink {
    pattern: Regex,
    total: Option<u64>,
    position: u64,
    bar: Option<ProgressBar>,
}

impl StreamingPercentSink {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"(\d+\.\d+)% of ~?\s*(\d+\.\d+)(K|M|G)iB")
                .expect("valid progress pattern"),
            total: None,
            position: 0,
            bar: None,
        }
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Default for StreamingPercentSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for StreamingPercentSink {
    fn on_line(&mut self, line: &str) {
        let Some(captures) = self.pattern.captures(line) else {
            return;
        };
        let percent: f64 = captures[1].parse().unwrap_or(0.0);
        let size: f64 = captures[2].parse().unwrap_or(0.0);
        let multiplier: f64 = match &captures[3] {
            "K" => 1024.0,
            "M" => 1024.0 * 1024.0,
            _ => 1024.0 * 1024.0 * 1024.0,
        };

        let total = *self.total.get_or_insert((size * multiplier) as u64);
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::with_template("{msg} {bar:40} {bytes}/{total_bytes}")
                    .expect("valid progress template"),
            );
            bar.set_message("downloading");
            bar
        });

        let position = ((percent / 100.0) * total as f64) as u64;
        if position > self.position {
            self.position = position.min(total);
            bar.set_position(self.position);
        }
    }

    fn finish(&mut self, exit_ok: bool) -> bool {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        exit_ok
    }
}

/// Marker style for the tick adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStyle {
    /// Repeated `#` marker characters per line (curl with `-#`).
    Hash,
    /// An integer before a `%` token per line (wget).
    Percent,
}

/// Adapter tracking the highest percentage observed, clamped to 100 and
/// forced to 100 at process exit.
pub struct TickPercentSink {
    style: TickStyle,
    last_percent: u64,
    bar: ProgressBar,
}

impl TickPercentSink {
    pub fn new(style: TickStyle) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{msg} {bar:40} {pos}/{len}%")
                .expect("valid progress template"),
        );
        bar.set_message("downloading");
        Self {
            style,
            last_percent: 0,
            bar,
        }
    }

    pub fn last_percent(&self) -> u64 {
        self.last_percent
    }

    fn parse_percent(&self, line: &str) -> Option<u64> {
        match self.style {
            TickStyle::Hash => {
                let count = line.chars().filter(|c| *c == '#').count() as u64;
                (count > 0).then_some(count.min(100))
            }
            TickStyle::Percent => {
                let before = line.split('%').next()?;
                let token = before.split_whitespace().last()?;
                token.parse::<u64>().ok().map(|p| p.min(100))
            }
        }
    }
}

impl ProgressSink for TickPercentSink {
    fn on_line(&mut self, line: &str) {
        // Lines without a usable percentage are ignored.
        if let Some(percent) = self.parse_percent(line) {
            if percent > self.last_percent {
                self.last_percent = percent;
                self.bar.set_position(percent);
            }
        }
    }

    fn finish(&mut self, exit_ok: bool) -> bool {
        self.last_percent = 100;
        self.bar.set_position(100);
        self.bar.finish_and_clear();
        exit_ok
    }
}

/// Select the adapter and progress stream for a download command.
/// yt-dlp streams percent-of-size lines on stdout; curl and wget tick
/// on stderr.
pub fn adapter_for_command(command: &str) -> (Box<dyn ProgressSink>, ProgressStream) {
    if command.contains("yt-dlp") {
        (
            Box::new(StreamingPercentSink::new()),
            ProgressStream::Stdout,
        )
    } else if command.contains("wget") {
        (
            Box::new(TickPercentSink::new(TickStyle::Percent)),
            ProgressStream::Stderr,
        )
    } else {
        (
            Box::new(TickPercentSink::new(TickStyle::Hash)),
            ProgressStream::Stderr,
        )
    }
}
