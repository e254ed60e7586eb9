//! Install progress events.
//!
//! Every step owns a fixed percent range; the reporter clamps what it emits
//! into that range and never lets the percent go backwards.
//!
//! ```text
//! 0 ── connect ── 15│16 privilege 19│20 ── os ── 29│30 ─ dir ─ 39│
//! 40 ──────── dependencies ──────── 65│66 ── artifacts ── 80│
//! 81 ── service ── 90│91 ── verify ── 100
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Ordered pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStep {
    Connect,
    Privilege,
    Prerequisites,
    Directory,
    Dependencies,
    Artifacts,
    Service,
    Verify,
}

impl InstallStep {
    pub const ALL: [InstallStep; 8] = [
        InstallStep::Connect,
        InstallStep::Privilege,
        InstallStep::Prerequisites,
        InstallStep::Directory,
        InstallStep::Dependencies,
        InstallStep::Artifacts,
        InstallStep::Service,
        InstallStep::Verify,
    ];

    /// 1-based position in the pipeline.
    pub fn number(self) -> u8 {
        self as u8 + 1
    }

    /// Inclusive percent range owned by this step.
    pub fn range(self) -> (u8, u8) {
        match self {
            InstallStep::Connect => (0, 15),
            InstallStep::Privilege => (16, 19),
            InstallStep::Prerequisites => (20, 29),
            InstallStep::Directory => (30, 39),
            InstallStep::Dependencies => (40, 65),
            InstallStep::Artifacts => (66, 80),
            InstallStep::Service => (81, 90),
            InstallStep::Verify => (91, 100),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            InstallStep::Connect => "Connecting",
            InstallStep::Privilege => "Checking privileges",
            InstallStep::Prerequisites => "Checking system",
            InstallStep::Directory => "Creating directories",
            InstallStep::Dependencies => "Installing dependencies",
            InstallStep::Artifacts => "Deploying agent",
            InstallStep::Service => "Starting service",
            InstallStep::Verify => "Verifying installation",
        }
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub step: InstallStep,
    pub percent: u8,
    pub message: String,
    /// Raw remote output line, for streamed steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output_line: Option<String>,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

/// Emits events for one install run.
pub struct ProgressReporter<'a> {
    sink: &'a mut (dyn FnMut(&ProgressEvent) + Send),
    host: String,
    step: InstallStep,
    percent: u8,
    streamed: u32,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(host: impl Into<String>, sink: &'a mut (dyn FnMut(&ProgressEvent) + Send)) -> Self {
        Self {
            sink,
            host: host.into(),
            step: InstallStep::Connect,
            percent: 0,
            streamed: 0,
        }
    }

    /// Move to `step` and announce it at the start of its range.
    pub fn begin(&mut self, step: InstallStep, message: impl Into<String>) {
        debug!(
            "[installer] {}: step {}/{} ({})",
            self.host,
            step.number(),
            InstallStep::ALL.len(),
            step.label()
        );
        self.step = step;
        self.streamed = 0;
        self.emit(step.range().0, message);
    }

    pub fn emit(&mut self, percent: u8, message: impl Into<String>) {
        self.send(percent, message.into(), None, false);
    }

    /// Step-scoped failure at the current percent.
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("[installer] {}: {}", self.host, message);
        self.send(self.percent, message, None, true);
    }

    /// Soft failure: reported, but the pipeline carries on.
    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("[installer] {}: {}", self.host, message);
        self.send(self.percent, format!("Warning: {}", message), None, false);
    }

    /// Forward one remote output line. Each line nudges the percent toward
    /// the end of the step's range without reaching it.
    pub fn output_line(&mut self, line: &str) {
        self.streamed = self.streamed.saturating_add(1);
        let (lo, hi) = self.step.range();
        let span = u32::from(hi - lo).saturating_sub(1);
        let advance = span * self.streamed / (self.streamed + 20);
        let percent = lo + advance as u8;
        self.send(
            percent,
            format!("{}...", self.step.label()),
            Some(line.to_string()),
            false,
        );
    }

    /// Final success event at 100%.
    pub fn complete(&mut self, message: impl Into<String>) {
        self.step = InstallStep::Verify;
        self.send(100, message.into(), None, false);
    }

    fn send(&mut self, percent: u8, message: String, raw_output_line: Option<String>, is_error: bool) {
        let (lo, hi) = self.step.range();
        self.percent = percent.clamp(lo, hi).max(self.percent);
        if raw_output_line.is_none() && !is_error {
            info!("[installer] {} [{}%] {}", self.host, self.percent, message);
        }
        let event = ProgressEvent {
            step: self.step,
            percent: self.percent,
            message,
            raw_output_line,
            is_error,
            timestamp: Utc::now(),
        };
        (self.sink)(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(run: impl FnOnce(&mut ProgressReporter<'_>)) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        let mut sink = |e: &ProgressEvent| events.push(e.clone());
        {
            let mut reporter = ProgressReporter::new("web-1", &mut sink);
            run(&mut reporter);
        }
        events
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let mut expected_start = 0;
        for step in InstallStep::ALL {
            let (lo, hi) = step.range();
            assert_eq!(lo, expected_start, "{:?}", step);
            assert!(lo < hi);
            expected_start = hi + 1;
        }
        assert_eq!(InstallStep::Verify.range().1, 100);
        assert_eq!(InstallStep::Dependencies.number(), 5);
    }

    #[test]
    fn test_percent_clamped_and_monotonic() {
        let events = record(|r| {
            r.begin(InstallStep::Connect, "connecting");
            r.emit(50, "out of range");
            r.begin(InstallStep::Directory, "mkdir");
            r.emit(5, "backwards");
        });
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0, 15, 30, 30]);
    }

    #[test]
    fn test_output_lines_stay_inside_step() {
        let events = record(|r| {
            r.begin(InstallStep::Dependencies, "deps");
            for i in 0..500 {
                r.output_line(&format!("line {}", i));
            }
        });
        let last = events.last().unwrap();
        assert!(last.percent < 65);
        assert!(last.percent > 40);
        assert_eq!(last.raw_output_line.as_deref(), Some("line 499"));
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    }

    #[test]
    fn test_error_keeps_percent() {
        let events = record(|r| {
            r.begin(InstallStep::Privilege, "probing");
            r.error("no sudo");
        });
        assert!(events[1].is_error);
        assert_eq!(events[1].percent, 16);
    }

    #[test]
    fn test_event_wire_shape() {
        let events = record(|r| r.complete("done"));
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["percent"], 100);
        assert_eq!(json["step"], "verify");
        assert_eq!(json["isError"], false);
        assert!(json.get("rawOutputLine").is_none());
    }
}
