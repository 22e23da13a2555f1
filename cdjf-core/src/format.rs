//! Erasing one or many removable drives to FAT32.
//!
//! Every device moves through the same stages:
//!
//! ```text
//! Pending -> Validated -> (Benchmarked) -> Confirmed -> Erasing -> Erased | Failed -> (Ejected)
//! ```
//!
//! A single device is benchmarked first and the operator may back out if it
//! is slow. Several devices skip the benchmark, are confirmed in bulk and are
//! erased concurrently, one scoped thread each. Workers never touch the
//! front-end: they send `(device, message)` events over a channel to a loop on
//! the calling thread, which keeps each device's output on its own line.
//!
//! A rejected or failed device never stops its siblings; it just ends up with
//! a failed [`FormatOutcome`].
use crate::benchmark::{self, BenchmarkConfig, Thresholds};
use crate::device::ClusterSize;
use crate::error::DeviceError;
use crate::frontend::{Frontend, FrontendSink};
use crate::platform::DeviceDriver;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::translate::{OutputTranslator, ProgressTable};
use anyhow::{Result, bail};
use crossbeam::channel::{self, Sender};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Label used when none is given.
pub const DEFAULT_LABEL: &str = "REKORDBOX";

/// Drives larger than this (in GB) get a compatibility warning.
pub const LARGE_DRIVE_GB: f64 = 1024.0;

/// Highest numeric suffix tried when making a label unique.
const MAX_LABEL_SUFFIX: u32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Validated,
    Benchmarked,
    Confirmed,
    Erasing,
    Erased,
    Failed,
    Ejected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Validated => "validated",
            Stage::Benchmarked => "benchmarked",
            Stage::Confirmed => "confirmed",
            Stage::Erasing => "erasing",
            Stage::Erased => "erased",
            Stage::Failed => "failed",
            Stage::Ejected => "ejected",
        };
        f.write_str(name)
    }
}

/// Tracks and logs one device's stage.
struct DeviceRun<'a> {
    device: &'a str,
    stage: Stage,
}

impl<'a> DeviceRun<'a> {
    fn new(device: &'a str) -> Self {
        Self {
            device,
            stage: Stage::Pending,
        }
    }

    fn advance(&mut self, next: Stage) {
        log::debug!("[{}] {} -> {}", self.device, self.stage, next);
        self.stage = next;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStatus {
    Success,
    Failed,
}

/// The terminal result of one device's format attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOutcome {
    pub device: String,
    pub label: String,
    pub status: FormatStatus,
    /// Why the device failed, including captured tool output.
    pub detail: Option<String>,
}

impl FormatOutcome {
    fn succeeded(device: &str, label: &str) -> Self {
        Self {
            device: device.to_string(),
            label: label.to_string(),
            status: FormatStatus::Success,
            detail: None,
        }
    }

    fn failed(device: &str, label: &str, detail: impl fmt::Display) -> Self {
        Self {
            device: device.to_string(),
            label: label.to_string(),
            status: FormatStatus::Failed,
            detail: Some(detail.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FormatStatus::Success
    }
}

impl fmt::Display for FormatOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.detail) {
            (FormatStatus::Success, _) => write!(f, "[{}] SUCCESS", self.device),
            (FormatStatus::Failed, Some(detail)) => write!(f, "[{}] FAILED: {}", self.device, detail),
            (FormatStatus::Failed, None) => write!(f, "[{}] FAILED", self.device),
        }
    }
}

/// What to format and how.
#[derive(Debug, Clone)]
pub struct FormatRequest {
    pub devices: Vec<String>,
    pub label: String,
    pub cluster: Option<ClusterSize>,
    pub thresholds: Thresholds,
    /// Skip the benchmark and every confirmation; eject without asking.
    pub assume_yes: bool,
}

impl FormatRequest {
    pub fn new(devices: Vec<String>) -> Self {
        Self {
            devices,
            label: DEFAULT_LABEL.to_string(),
            cluster: None,
            thresholds: Thresholds::default(),
            assume_yes: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSummary {
    /// One entry per device that reached a terminal state, in the order the
    /// results arrived.
    pub outcomes: Vec<FormatOutcome>,
    /// The operator backed out before anything was erased.
    pub cancelled: bool,
}

impl FormatSummary {
    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(FormatOutcome::is_success)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &FormatOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }
}

/// The label to try for the device at `index` of a request for `count`
/// devices, before the uniqueness pass.
pub fn candidate_label(base: &str, index: usize, count: usize) -> String {
    if count > 1 && index > 0 {
        format!("{}{}", base, index + 1)
    } else {
        base.to_string()
    }
}

/// Returns `base`, or `base2` .. `base99`, whichever is first absent from
/// `taken` (upper-cased labels). Falls back to `base` when all are taken.
pub fn unique_label(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(&base.to_uppercase()) {
        return base.to_string();
    }
    for i in 2..=MAX_LABEL_SUFFIX {
        let candidate = format!("{}{}", base, i);
        if !taken.contains(&candidate.to_uppercase()) {
            return candidate;
        }
    }
    log::warn!("no free label derived from {}; reusing it", base);
    base.to_string()
}

/// Plans a label for every `(index, device)` so that no two planned labels
/// collide with each other or with a visible volume.
pub fn plan_labels(
    driver: &dyn DeviceDriver,
    devices: &[(usize, &str)],
    base: &str,
    count: usize,
) -> Vec<String> {
    let mut reserved: HashSet<String> = HashSet::new();
    devices
        .iter()
        .map(|&(index, device)| {
            let mut taken = driver.existing_labels(device);
            taken.extend(reserved.iter().cloned());
            let label = unique_label(&candidate_label(base, index, count), &taken);
            reserved.insert(label.to_uppercase());
            label
        })
        .collect()
}

enum Event {
    Progress {
        device: String,
        line: String,
        done: bool,
    },
    Line {
        device: String,
        line: String,
    },
    Outcome(FormatOutcome),
}

/// Forwards rendered progress lines of one worker to the event loop.
struct ChannelSink<'a> {
    device: &'a str,
    tx: &'a Sender<Event>,
}

impl ChannelSink<'_> {
    fn send(&self, line: &str, done: bool) {
        let _ = self.tx.send(Event::Progress {
            device: self.device.to_string(),
            line: line.to_string(),
            done,
        });
    }
}

impl ProgressSink for ChannelSink<'_> {
    fn draw(&mut self, line: &str) {
        self.send(line, false);
    }

    fn finish(&mut self, line: &str) {
        self.send(line, true);
    }
}

pub struct Formatter<'d> {
    driver: &'d dyn DeviceDriver,
    table: ProgressTable,
    running: &'d AtomicBool,
    benchmark: BenchmarkConfig,
}

impl<'d> Formatter<'d> {
    pub fn new(driver: &'d dyn DeviceDriver, running: &'d AtomicBool) -> Self {
        Self {
            driver,
            table: driver.progress_table(),
            running,
            benchmark: BenchmarkConfig::default(),
        }
    }

    pub fn with_benchmark_config(mut self, config: BenchmarkConfig) -> Self {
        self.benchmark = config;
        self
    }

    /// Runs a whole format request: pre-flight, benchmark, confirmation,
    /// erase and ejection.
    ///
    /// Invalid thresholds or an empty device list fail before any device is
    /// probed. A device that is refused during pre-flight gets a failed
    /// outcome and the others continue.
    pub fn run(&self, request: &FormatRequest, frontend: &dyn Frontend) -> Result<FormatSummary> {
        request.thresholds.validate()?;
        if request.devices.is_empty() {
            bail!("no device specified");
        }
        let count = request.devices.len();

        let mut summary = FormatSummary::default();
        let mut accepted: Vec<(usize, &str)> = Vec::new();
        for (index, device) in request.devices.iter().enumerate() {
            let mut run = DeviceRun::new(device);
            match self.preflight(device, frontend) {
                Ok(()) => {
                    run.advance(Stage::Validated);
                    accepted.push((index, device.as_str()));
                }
                Err(e) => {
                    run.advance(Stage::Failed);
                    frontend.warn(&format!("Error with device {}: {}", device, e));
                    summary.outcomes.push(FormatOutcome::failed(device, "", &e));
                }
            }
        }
        if accepted.is_empty() {
            return Ok(summary);
        }

        if !request.assume_yes {
            if count == 1 && !self.benchmark_gate(accepted[0].1, &request.thresholds, frontend)? {
                frontend.info("Format cancelled.");
                summary.cancelled = true;
                return Ok(summary);
            }
            if !self.confirm_erase(&accepted, frontend)? {
                frontend.info("Format cancelled.");
                summary.cancelled = true;
                return Ok(summary);
            }
        }
        if !self.running.load(Ordering::SeqCst) {
            frontend.info("Format cancelled.");
            summary.cancelled = true;
            return Ok(summary);
        }

        let labels = plan_labels(self.driver, &accepted, &request.label, count);
        let jobs: Vec<(&str, String)> = accepted
            .iter()
            .zip(labels)
            .map(|(&(index, device), label)| {
                let candidate = candidate_label(&request.label, index, count);
                if label != candidate {
                    frontend.info(&format!(
                        "Label '{}' already exists, using '{}' instead",
                        candidate, label
                    ));
                }
                (device, label)
            })
            .collect();

        if count == 1 {
            let (device, label) = &jobs[0];
            frontend.info(&format!("Formatting {} to FAT32...", device));
            summary
                .outcomes
                .push(self.format_single(device, label, request.cluster, frontend));
        } else {
            frontend.info(&format!("Formatting {} drives concurrently...", jobs.len()));
            let outcomes = self.format_many(&jobs, request.cluster, frontend);
            summary.outcomes.extend(outcomes);
            frontend.info("=== Format Results ===");
            for outcome in &summary.outcomes {
                frontend.info(&outcome.to_string());
            }
        }

        self.offer_eject(&summary, request.assume_yes, frontend)?;
        Ok(summary)
    }

    fn preflight(&self, device: &str, frontend: &dyn Frontend) -> Result<(), DeviceError> {
        self.driver.validate_identifier(device)?;
        self.driver.ensure_removable(device)?;

        let size = self.driver.size_gb(device);
        if size > LARGE_DRIVE_GB {
            frontend.warn(&format!(
                "WARNING: Drive {} is {:.1} GB (over 1TB). Large drives may not perform well on Pioneer CDJ/XDJ hardware.",
                device, size
            ));
        }
        Ok(())
    }

    /// Benchmarks `device` and asks whether to go on when it is slow.
    /// Returns `false` when the operator backs out or interrupts.
    fn benchmark_gate(
        &self,
        device: &str,
        thresholds: &Thresholds,
        frontend: &dyn Frontend,
    ) -> Result<bool> {
        frontend.info(&format!("Benchmarking {} to check performance...", device));
        let mut sink = FrontendSink::new(frontend, device);
        let measurement =
            benchmark::measure_device(self.driver, device, &self.benchmark, self.running, &mut sink);
        if !self.running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        log::debug!("[{}] {} -> {}", device, Stage::Validated, Stage::Benchmarked);

        frontend.info(&benchmark::summary(&measurement.result, thresholds));
        for note in measurement.advisories() {
            frontend.warn(note);
        }

        let write = measurement.result.write_mbps;
        if thresholds.prompt > 0.0 && write > 0.0 && write < thresholds.prompt {
            return frontend.confirm("Do you want to proceed anyway?", false);
        }
        Ok(true)
    }

    fn confirm_erase(&self, accepted: &[(usize, &str)], frontend: &dyn Frontend) -> Result<bool> {
        frontend.warn("! WARNING !");
        if let [(_, device)] = accepted {
            frontend.warn(&format!("This will ERASE ALL DATA on {}", device));
        } else {
            let names: Vec<&str> = accepted.iter().map(|&(_, d)| d).collect();
            frontend.warn(&format!(
                "This will ERASE ALL DATA on {} drives: {}",
                names.len(),
                names.join(", ")
            ));
        }
        let confirmed = frontend.confirm("Are you sure you want to continue?", false)?;
        if confirmed {
            for (_, device) in accepted {
                log::debug!("[{}] {} -> {}", device, Stage::Validated, Stage::Confirmed);
            }
        }
        Ok(confirmed)
    }

    fn format_single(
        &self,
        device: &str,
        label: &str,
        cluster: Option<ClusterSize>,
        frontend: &dyn Frontend,
    ) -> FormatOutcome {
        let mut sink = FrontendSink::new(frontend, device);
        self.erase(device, label, cluster, &mut sink, &mut |line| frontend.log(device, line))
    }

    /// Erases every job on its own scoped thread and collects the outcomes in
    /// arrival order.
    fn format_many(
        &self,
        jobs: &[(&str, String)],
        cluster: Option<ClusterSize>,
        frontend: &dyn Frontend,
    ) -> Vec<FormatOutcome> {
        let (tx, rx) = channel::unbounded::<Event>();
        let mut outcomes = Vec::with_capacity(jobs.len());

        thread::scope(|s| {
            for (device, label) in jobs {
                let device: &str = device;
                let tx = tx.clone();
                s.spawn(move || {
                    frontend_line(&tx, device, "Starting format...");
                    let mut sink = ChannelSink { device, tx: &tx };
                    let outcome = self.erase(device, label, cluster, &mut sink, &mut |line| {
                        frontend_line(&tx, device, line)
                    });
                    let _ = tx.send(Event::Outcome(outcome));
                });
            }
            drop(tx);

            for event in rx {
                match event {
                    Event::Progress { device, line, done } if done => {
                        frontend.progress_done(&device, &line)
                    }
                    Event::Progress { device, line, .. } => frontend.progress(&device, &line),
                    Event::Line { device, line } => frontend.log(&device, &line),
                    Event::Outcome(outcome) => outcomes.push(outcome),
                }
            }
        });

        outcomes
    }

    /// Re-checks the device, runs the platform erase and translates its
    /// output into a "Format" progress bar.
    fn erase(
        &self,
        device: &str,
        label: &str,
        cluster: Option<ClusterSize>,
        sink: &mut dyn ProgressSink,
        log_line: &mut dyn FnMut(&str),
    ) -> FormatOutcome {
        let mut run = DeviceRun::new(device);
        run.stage = Stage::Confirmed;
        if let Err(e) = self.driver.ensure_removable(device) {
            run.advance(Stage::Failed);
            return FormatOutcome::failed(device, label, format!("refusing to format: {}", e));
        }

        run.advance(Stage::Erasing);
        let mut reporter = ProgressReporter::new("Format", 100, sink);
        let mut translator = OutputTranslator::new(&self.table);
        let result = self.driver.erase(device, label, cluster, &mut |line| {
            translator.feed(line, &mut reporter, |text| log_line(text))
        });

        match result {
            Ok(()) => {
                reporter.finish();
                run.advance(Stage::Erased);
                FormatOutcome::succeeded(device, label)
            }
            Err(e) => {
                reporter.stop();
                run.advance(Stage::Failed);
                log::info!("[{}] erase failed: {}", device, e);
                FormatOutcome::failed(device, label, e)
            }
        }
    }

    fn offer_eject(
        &self,
        summary: &FormatSummary,
        assume_yes: bool,
        frontend: &dyn Frontend,
    ) -> Result<()> {
        let ready: Vec<&FormatOutcome> = summary.succeeded().collect();
        if ready.is_empty() {
            return Ok(());
        }
        let prompt = if ready.len() == 1 {
            "Do you want to eject the newly formatted drive?"
        } else {
            "Do you want to eject all newly formatted drives?"
        };
        if !assume_yes && !frontend.confirm(prompt, true)? {
            return Ok(());
        }

        for outcome in ready {
            let mut run = DeviceRun::new(&outcome.device);
            run.stage = Stage::Erased;
            match self.driver.eject(&outcome.device) {
                Ok(()) => {
                    run.advance(Stage::Ejected);
                    frontend.info(&format!("[{}] Ejected successfully", outcome.device));
                }
                Err(e) => frontend.warn(&format!("[{}] Error ejecting: {}", outcome.device, e)),
            }
        }
        Ok(())
    }
}

fn frontend_line(tx: &Sender<Event>, device: &str, line: &str) {
    let _ = tx.send(Event::Line {
        device: device.to_string(),
        line: line.to_string(),
    });
}
