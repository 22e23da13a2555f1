//! Sustained write/read throughput measurement.
//!
//! The benchmark writes a sample file to the mounted device, syncs it, and
//! reads it back, timing both phases. Small samples on USB sticks are often
//! absorbed by a write cache and report absurd speeds, so the sample starts at
//! 32 MiB and doubles (up to 256 MiB) until writing it takes at least 400 ms.
//!
//! Measurement is fail-soft: any I/O problem yields zero for the affected
//! metric, and zero means "could not measure", never "infinitely slow".
use crate::error::ConfigError;
use crate::platform::DeviceDriver;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::scratch::ScratchFile;
use crate::verify::fill_pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub const MIB: u64 = 1024 * 1024;

/// File name used for the benchmark sample at the device mount point.
pub const BENCHMARK_FILE_NAME: &str = "cdjf_benchmark_test.tmp";

/// Write and read speed in MB/s (mebibytes per second). Zero means unmeasured.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BenchmarkResult {
    pub write_mbps: f64,
    pub read_mbps: f64,
}

/// Tunables for the adaptive sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkConfig {
    pub initial_sample: u64,
    pub max_sample: u64,
    pub chunk_size: usize,
    pub min_duration: Duration,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            initial_sample: 32 * MIB,
            max_sample: 256 * MIB,
            chunk_size: 4 * MIB as usize,
            min_duration: Duration::from_millis(400),
        }
    }
}

/// The outcome of one benchmark run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub result: BenchmarkResult,
    /// Bytes in the final write sample.
    pub sample_bytes: u64,
    /// Writing finished under the minimum duration even at the largest sample.
    pub write_cache_advisory: bool,
    /// Reading finished under the minimum duration.
    pub read_cache_advisory: bool,
}

impl Measurement {
    /// Human-readable notes about possibly cache-inflated numbers.
    pub fn advisories(&self) -> Vec<&'static str> {
        let mut notes = Vec::new();
        if self.write_cache_advisory {
            notes.push(
                "Write benchmark completed very quickly even at the maximum payload; reported write speed may be inflated by caching.",
            );
        }
        if self.read_cache_advisory {
            notes.push(
                "Read benchmark completed very quickly; reported read speed may benefit from OS caching.",
            );
        }
        notes
    }
}

/// Speed limits, in MB/s, used to grade a benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub extremely_slow: f64,
    pub very_slow: f64,
    pub slightly_slow: f64,
    /// Below this write speed the operator is asked before formatting.
    pub prompt: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            extremely_slow: 2.0,
            very_slow: 3.0,
            slightly_slow: 6.0,
            prompt: 5.0,
        }
    }
}

impl Thresholds {
    /// Defaults overridden by every positive value in `custom`.
    pub fn merged(custom: Option<&Thresholds>) -> Self {
        let mut merged = Self::default();
        let Some(custom) = custom else {
            return merged;
        };
        if custom.extremely_slow > 0.0 {
            merged.extremely_slow = custom.extremely_slow;
        }
        if custom.very_slow > 0.0 {
            merged.very_slow = custom.very_slow;
        }
        if custom.slightly_slow > 0.0 {
            merged.slightly_slow = custom.slightly_slow;
        }
        if custom.prompt > 0.0 {
            merged.prompt = custom.prompt;
        }
        merged
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = [
            self.extremely_slow,
            self.very_slow,
            self.slightly_slow,
            self.prompt,
        ];
        // `!(x > 0)` also rejects NaN.
        if all.iter().any(|v| !(*v > 0.0)) {
            return Err(ConfigError::NonPositiveThreshold);
        }
        if self.extremely_slow > self.very_slow {
            return Err(ConfigError::ExtremelySlowAboveVerySlow);
        }
        if self.very_slow > self.slightly_slow {
            return Err(ConfigError::VerySlowAboveSlightlySlow);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Unmeasurable,
    ExtremelySlow,
    VerySlow,
    SlightlySlow,
    Ok,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Severity::Unmeasurable => "Unable to benchmark drive.",
            Severity::ExtremelySlow => "WARNING: Drive appears to be extremely slow.",
            Severity::VerySlow => "WARNING: Drive appears to be very slow.",
            Severity::SlightlySlow => "WARNING: Drive appears to be slightly slow.",
            Severity::Ok => "Performance is OK.",
        };
        f.write_str(text)
    }
}

/// Grades `speed` against the first threshold it falls under.
pub fn classify(speed: f64, thresholds: &Thresholds) -> Severity {
    if !(speed > 0.0) {
        Severity::Unmeasurable
    } else if thresholds.extremely_slow > 0.0 && speed < thresholds.extremely_slow {
        Severity::ExtremelySlow
    } else if thresholds.very_slow > 0.0 && speed < thresholds.very_slow {
        Severity::VerySlow
    } else if thresholds.slightly_slow > 0.0 && speed < thresholds.slightly_slow {
        Severity::SlightlySlow
    } else {
        Severity::Ok
    }
}

/// Severity line followed by the measured speeds.
pub fn summary(result: &BenchmarkResult, thresholds: &Thresholds) -> String {
    let severity = classify(result.write_mbps, thresholds);
    if result.write_mbps <= 0.0 && result.read_mbps <= 0.0 {
        return severity.to_string();
    }

    let speed = |v: f64| {
        if v > 0.0 {
            format!("{:.2} MB/s", v)
        } else {
            "unavailable".to_string()
        }
    };
    format!(
        "{}\n  Write Speed: {}\n  Read Speed: {}",
        severity,
        speed(result.write_mbps),
        speed(result.read_mbps)
    )
}

/// The sample size to continue with after `current` bytes took `elapsed`, or
/// `None` once the sample is long enough or already at the ceiling.
pub fn next_sample_target(current: u64, elapsed: Duration, config: &BenchmarkConfig) -> Option<u64> {
    if elapsed >= config.min_duration || current >= config.max_sample {
        return None;
    }
    Some(current.saturating_mul(2).min(config.max_sample))
}

/// MB/s for `bytes` moved in `elapsed`, or zero when either is zero.
pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if bytes == 0 || seconds <= 0.0 {
        return 0.0;
    }
    bytes as f64 / seconds / MIB as f64
}

/// Runs the benchmark against `path` with the default configuration.
pub fn measure(path: &Path, running: &AtomicBool, sink: &mut dyn ProgressSink) -> Measurement {
    measure_with(&BenchmarkConfig::default(), path, running, sink)
}

/// Benchmarks the volume `device` is mounted at. An unmounted device simply
/// measures as zero.
pub fn measure_device(
    driver: &dyn DeviceDriver,
    device: &str,
    config: &BenchmarkConfig,
    running: &AtomicBool,
    sink: &mut dyn ProgressSink,
) -> Measurement {
    match driver.mount_point(device) {
        Ok(mount) => measure_with(config, &mount.join(BENCHMARK_FILE_NAME), running, sink),
        Err(e) => {
            log::warn!("cannot benchmark {}: {}", device, e);
            Measurement::default()
        }
    }
}

pub fn measure_with(
    config: &BenchmarkConfig,
    path: &Path,
    running: &AtomicBool,
    sink: &mut dyn ProgressSink,
) -> Measurement {
    let scratch = ScratchFile::claim(path);
    let mut measurement = Measurement::default();

    let Some((written, write_elapsed)) = write_sample(config, &scratch, running, sink) else {
        return measurement;
    };
    measurement.sample_bytes = written;
    measurement.result.write_mbps = mbps(written, write_elapsed);

    if let Some((read, read_elapsed)) = read_sample(config, &scratch, written, running, sink) {
        measurement.result.read_mbps = mbps(read, read_elapsed);
        measurement.read_cache_advisory = read_elapsed < config.min_duration;
    }
    measurement.write_cache_advisory = write_elapsed < config.min_duration;

    for note in measurement.advisories() {
        log::warn!("{}", note);
    }
    measurement
}

fn write_sample(
    config: &BenchmarkConfig,
    path: &ScratchFile,
    running: &AtomicBool,
    sink: &mut dyn ProgressSink,
) -> Option<(u64, Duration)> {
    let mut file = match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => {
            log::warn!("cannot create benchmark sample {}: {}", path.as_ref().display(), e);
            return None;
        }
    };

    let mut chunk = vec![0u8; config.chunk_size.max(1)];
    fill_pattern(&mut chunk, 0);

    let mut target = config.initial_sample.max(1);
    let mut written: u64 = 0;
    let mut reporter = ProgressReporter::new("Write", target, sink);
    let start = Instant::now();

    loop {
        if !running.load(Ordering::SeqCst) {
            log::info!("benchmark cancelled after {} bytes", written);
            reporter.stop();
            return None;
        }

        let to_write = std::cmp::min(chunk.len() as u64, target - written) as usize;
        if let Err(e) = file.write_all(&chunk[..to_write]) {
            log::warn!("benchmark write failed after {} bytes: {}", written, e);
            reporter.stop();
            return None;
        }
        written += to_write as u64;
        reporter.add(to_write as u64);

        if written >= target {
            match next_sample_target(target, start.elapsed(), config) {
                Some(next) => {
                    log::info!("extending write sample to {} MB", next / MIB);
                    target = next;
                    reporter.update_total(target);
                }
                None => break,
            }
        }
    }

    if let Err(e) = file.sync_all() {
        log::warn!("benchmark sync failed: {}", e);
        reporter.stop();
        return None;
    }
    drop(file);

    let elapsed = start.elapsed();
    reporter.finish();
    Some((written, elapsed))
}

fn read_sample(
    config: &BenchmarkConfig,
    path: &ScratchFile,
    expected: u64,
    running: &AtomicBool,
    sink: &mut dyn ProgressSink,
) -> Option<(u64, Duration)> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("cannot reopen benchmark sample: {}", e);
            return None;
        }
    };

    let mut chunk = vec![0u8; config.chunk_size.max(1)];
    let mut total: u64 = 0;
    let mut reporter = ProgressReporter::new("Read", expected, sink);
    let start = Instant::now();

    loop {
        if !running.load(Ordering::SeqCst) {
            reporter.stop();
            return None;
        }
        match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                reporter.add(n as u64);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("benchmark read failed after {} bytes: {}", total, e);
                reporter.stop();
                return None;
            }
        }
    }

    let elapsed = start.elapsed();
    reporter.finish();
    Some((total, elapsed))
}
