//! Throttled textual progress for a single device operation.
//!
//! A [`ProgressReporter`] owns the counters of one operation and turns them
//! into a rendered line (bar, percentage, average speed and ETA). Where the
//! line ends up is decided by the [`ProgressSink`] it renders into: a terminal
//! slot in the CLI, a channel in the multi-device path, or nothing at all.
use std::time::{Duration, Instant};

const RENDER_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_WIDTH: usize = 30;
const MIB: f64 = 1024.0 * 1024.0;

/// Destination for rendered progress lines.
pub trait ProgressSink {
    /// Replaces the currently displayed line.
    fn draw(&mut self, line: &str);
    /// Displays the final line; nothing else is drawn for this operation.
    fn finish(&mut self, line: &str);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct HiddenSink;

impl ProgressSink for HiddenSink {
    fn draw(&mut self, _line: &str) {}
    fn finish(&mut self, _line: &str) {}
}

impl<F> ProgressSink for F
where
    F: FnMut(&str, bool),
{
    fn draw(&mut self, line: &str) {
        self(line, false)
    }

    fn finish(&mut self, line: &str) {
        self(line, true)
    }
}

pub struct ProgressReporter<'a> {
    label: String,
    total: u64,
    current: u64,
    start: Instant,
    width: usize,
    last_render: Option<Instant>,
    completed: bool,
    sink: &'a mut dyn ProgressSink,
}

impl<'a> ProgressReporter<'a> {
    /// Creates a reporter and renders its first line immediately.
    pub fn new(label: impl Into<String>, total: u64, sink: &'a mut dyn ProgressSink) -> Self {
        let mut reporter = Self {
            label: label.into(),
            total,
            current: 0,
            start: Instant::now(),
            width: DEFAULT_WIDTH,
            last_render: None,
            completed: false,
            sink,
        };
        reporter.render(true);
        reporter
    }

    pub fn add(&mut self, n: u64) {
        if self.completed {
            return;
        }
        self.current = self.current.saturating_add(n);
        self.clamp();
        self.render(false);
    }

    pub fn set(&mut self, n: u64) {
        if self.completed {
            return;
        }
        self.current = n;
        self.clamp();
        self.render(false);
    }

    /// Changes the total. A zero total, or one below the current position,
    /// is ignored.
    pub fn update_total(&mut self, total: u64) {
        if self.completed || total == 0 || total < self.current {
            return;
        }
        self.total = total;
        self.clamp();
        self.render(false);
    }

    /// Marks the operation complete, filling the bar.
    pub fn finish(&mut self) {
        if self.completed {
            return;
        }
        if self.total > 0 && self.current < self.total {
            self.current = self.total;
        }
        self.terminate();
    }

    /// Ends the operation where it stands, e.g. after a failure.
    pub fn stop(&mut self) {
        if self.completed {
            return;
        }
        self.terminate();
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn clamp(&mut self) {
        if self.total > 0 && self.current > self.total {
            self.current = self.total;
        }
    }

    fn terminate(&mut self) {
        let line = self.render_line(self.start.elapsed());
        self.sink.finish(&line);
        self.last_render = Some(Instant::now());
        self.completed = true;
    }

    fn render(&mut self, force: bool) {
        let now = Instant::now();
        if !force {
            if let Some(last) = self.last_render {
                if now.duration_since(last) < RENDER_INTERVAL {
                    return;
                }
            }
        }
        self.last_render = Some(now);
        let line = self.render_line(now.duration_since(self.start));
        self.sink.draw(&line);
    }

    /// Formats the progress line as it would look after `elapsed`.
    pub fn render_line(&self, elapsed: Duration) -> String {
        let fraction = if self.total > 0 {
            (self.current as f64 / self.total as f64).min(1.0)
        } else {
            0.0
        };

        let filled = ((fraction * self.width as f64) as usize).min(self.width);
        let bar = format!("{}{}", "=".repeat(filled), " ".repeat(self.width - filled));

        let mut speed = 0.0;
        let mut eta = "--:--".to_string();
        let seconds = elapsed.as_secs_f64();
        if self.current > 0 && seconds > 0.0 {
            let bytes_per_second = self.current as f64 / seconds;
            speed = bytes_per_second / MIB;
            if self.total > 0 && bytes_per_second > 0.0 {
                let remaining = (self.total - self.current) as f64 / bytes_per_second;
                eta = format_eta(Duration::from_secs_f64(remaining));
            }
        }

        format!(
            "{:<10} [{}] {:6.2}% {:6.2} MB/s ETA {}",
            self.label,
            bar,
            fraction * 100.0,
            speed,
            eta
        )
    }
}

/// Formats a remaining duration as `00:SS`, `MM:SS` or `HH:MM:SS`.
pub fn format_eta(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("00:{:02}", secs)
    } else if secs < 3600 {
        format!("{:02}:{:02}", secs / 60, secs % 60)
    } else {
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        drawn: Vec<String>,
        finished: Vec<String>,
    }

    impl ProgressSink for Recorder {
        fn draw(&mut self, line: &str) {
            self.drawn.push(line.to_string());
        }
        fn finish(&mut self, line: &str) {
            self.finished.push(line.to_string());
        }
    }

    #[test]
    fn construction_forces_a_render() {
        let mut sink = Recorder::default();
        let reporter = ProgressReporter::new("Write", 100, &mut sink);
        drop(reporter);
        assert_eq!(sink.drawn.len(), 1);
        assert!(sink.drawn[0].starts_with("Write "));
        assert!(sink.drawn[0].ends_with("ETA --:--"));
    }

    #[test]
    fn updates_inside_the_interval_are_throttled() {
        let mut sink = Recorder::default();
        let mut reporter = ProgressReporter::new("Write", 100, &mut sink);
        for _ in 0..10 {
            reporter.add(1);
        }
        assert_eq!(reporter.current(), 10);
        drop(reporter);
        assert_eq!(sink.drawn.len(), 1);
    }

    #[test]
    fn add_and_set_clamp_into_total() {
        let mut sink = HiddenSink;
        let mut reporter = ProgressReporter::new("Read", 50, &mut sink);
        reporter.add(80);
        assert_eq!(reporter.current(), 50);
        reporter.set(10);
        assert_eq!(reporter.current(), 10);
        reporter.set(500);
        assert_eq!(reporter.current(), 50);
    }

    #[test]
    fn zero_total_does_not_clamp() {
        let mut sink = HiddenSink;
        let mut reporter = ProgressReporter::new("Spin", 0, &mut sink);
        reporter.add(1234);
        assert_eq!(reporter.current(), 1234);
    }

    #[test]
    fn update_total_grows_and_ignores_zero() {
        let mut sink = HiddenSink;
        let mut reporter = ProgressReporter::new("Write", 32, &mut sink);
        reporter.add(32);
        reporter.update_total(64);
        assert_eq!(reporter.total(), 64);
        assert_eq!(reporter.current(), 32);
        reporter.update_total(0);
        assert_eq!(reporter.total(), 64);
    }

    #[test]
    fn total_never_drops_below_current() {
        let mut sink = HiddenSink;
        let mut reporter = ProgressReporter::new("Write", 100, &mut sink);
        reporter.set(80);
        reporter.update_total(50);
        assert_eq!(reporter.total(), 100);
        assert_eq!(reporter.current(), 80);
        reporter.update_total(80);
        assert_eq!(reporter.total(), 80);
        assert_eq!(reporter.current(), 80);
    }

    #[test]
    fn finish_fills_and_makes_reporter_terminal() {
        let mut sink = Recorder::default();
        let mut reporter = ProgressReporter::new("Format", 100, &mut sink);
        reporter.set(40);
        reporter.finish();
        assert_eq!(reporter.current(), 100);
        assert!(reporter.is_completed());

        reporter.set(10);
        reporter.add(5);
        reporter.update_total(500);
        reporter.finish();
        reporter.stop();
        assert_eq!(reporter.current(), 100);
        assert_eq!(reporter.total(), 100);
        drop(reporter);

        assert_eq!(sink.finished.len(), 1);
        assert!(sink.finished[0].contains("100.00%"));
    }

    #[test]
    fn stop_keeps_current_position() {
        let mut sink = Recorder::default();
        let mut reporter = ProgressReporter::new("Format", 100, &mut sink);
        reporter.set(35);
        reporter.stop();
        assert_eq!(reporter.current(), 35);
        drop(reporter);
        assert!(sink.finished[0].contains(" 35.00%"));
    }

    #[test]
    fn render_line_shows_bar_speed_and_eta() {
        let mut sink = HiddenSink;
        let mut reporter = ProgressReporter::new("Write", 4 * 1024 * 1024, &mut sink);
        reporter.set(2 * 1024 * 1024);
        let line = reporter.render_line(Duration::from_secs(1));
        assert_eq!(
            line,
            format!(
                "{:<10} [{}{}] {:6.2}% {:6.2} MB/s ETA 00:01",
                "Write",
                "=".repeat(15),
                " ".repeat(15),
                50.0,
                2.0
            )
        );
    }

    #[test]
    fn eta_is_undefined_before_any_bytes() {
        let mut sink = HiddenSink;
        let reporter = ProgressReporter::new("Read", 10, &mut sink);
        assert!(reporter.render_line(Duration::from_secs(5)).ends_with("ETA --:--"));
    }

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(Duration::from_secs(7)), "00:07");
        assert_eq!(format_eta(Duration::from_secs(125)), "02:05");
        assert_eq!(format_eta(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn closures_are_sinks() {
        let mut lines = Vec::new();
        {
            let mut sink = |line: &str, done: bool| lines.push((line.to_string(), done));
            let mut reporter = ProgressReporter::new("Verify", 1, &mut sink);
            reporter.finish();
        }
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].1);
        assert!(lines[1].1);
    }
}
