//! Write/read-back integrity check with a deterministic byte pattern.
//!
//! Every byte of the test file is `offset mod 256`, so the expected content of
//! any chunk can be regenerated from its offset alone and the original buffer
//! never has to be kept around. Verification stops at the first mismatch.
use crate::benchmark::{BenchmarkResult, MIB, mbps};
use crate::error::ConfigError;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::scratch::ScratchFile;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// File name used for the test pattern at the device mount point.
pub const VERIFY_FILE_NAME: &str = "cdjf_verify_test.tmp";

/// Default size of the integrity test, in MB.
pub const DEFAULT_TEST_SIZE_MB: i64 = 64;

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrityResult {
    pub throughput: BenchmarkResult,
    pub bytes_written: u64,
    pub bytes_verified: u64,
    pub errors: Vec<String>,
}

impl IntegrityResult {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Fills `buf` with the pattern as it appears starting at `offset`.
pub fn fill_pattern(buf: &mut [u8], offset: u64) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = (offset.wrapping_add(i as u64) & 0xFF) as u8;
    }
}

/// Converts a requested test size in MB into bytes, rejecting non-positive
/// sizes and sizes whose byte count does not fit a `u64`.
pub fn verification_size(size_mb: i64) -> Result<u64, ConfigError> {
    if size_mb <= 0 {
        return Err(ConfigError::NonPositiveTestSize(size_mb));
    }
    (size_mb as u64)
        .checked_mul(MIB)
        .ok_or(ConfigError::TestSizeTooLarge(size_mb))
}

/// Writes `size` pattern bytes to `path`, reads them back and compares. The
/// test file is removed afterwards.
pub fn verify(
    path: &Path,
    size: u64,
    running: &AtomicBool,
    sink: &mut dyn ProgressSink,
) -> IntegrityResult {
    let scratch = ScratchFile::claim(path);
    let mut result = IntegrityResult::default();
    write_phase(scratch.as_ref(), size, running, sink, &mut result);
    if result.success() {
        read_phase(scratch.as_ref(), running, sink, &mut result);
    }
    result
}

/// Writes the pattern, recording the first failure in `result.errors`.
pub fn write_phase(
    path: &Path,
    size: u64,
    running: &AtomicBool,
    sink: &mut dyn ProgressSink,
    result: &mut IntegrityResult,
) {
    let mut file = match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => {
            result.errors.push(format!("create test file: {}", e));
            return;
        }
    };

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut reporter = ProgressReporter::new("Write", size, sink);
    let start = Instant::now();

    while result.bytes_written < size {
        if !running.load(Ordering::SeqCst) {
            result
                .errors
                .push(format!("cancelled after writing {} bytes", result.bytes_written));
            reporter.stop();
            return;
        }

        let offset = result.bytes_written;
        let to_write = std::cmp::min(CHUNK_SIZE as u64, size - offset) as usize;
        fill_pattern(&mut chunk[..to_write], offset);

        match file.write(&chunk[..to_write]) {
            Ok(n) if n == to_write => {
                result.bytes_written += n as u64;
                reporter.add(n as u64);
            }
            Ok(n) => {
                result.bytes_written += n as u64;
                result.errors.push(format!(
                    "short write at offset {} (expected {} wrote {})",
                    offset, to_write, n
                ));
                reporter.stop();
                return;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                result.errors.push(format!("write at offset {}: {}", offset, e));
                reporter.stop();
                return;
            }
        }
    }

    if let Err(e) = file.sync_all() {
        result.errors.push(format!("sync: {}", e));
        reporter.stop();
        return;
    }
    drop(file);

    result.throughput.write_mbps = mbps(result.bytes_written, start.elapsed());
    reporter.finish();
}

/// Reads `path` back and compares it against the pattern, stopping at the
/// first mismatching byte.
pub fn read_phase(
    path: &Path,
    running: &AtomicBool,
    sink: &mut dyn ProgressSink,
    result: &mut IntegrityResult,
) {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            result.errors.push(format!("reopen for read: {}", e));
            return;
        }
    };

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut expected = vec![0u8; CHUNK_SIZE];
    let mut reporter = ProgressReporter::new("Verify", result.bytes_written, sink);
    let start = Instant::now();

    loop {
        if !running.load(Ordering::SeqCst) {
            result
                .errors
                .push(format!("cancelled after verifying {} bytes", result.bytes_verified));
            break;
        }

        let n = match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                result.errors.push(format!(
                    "read error after {} bytes: {}",
                    result.bytes_verified, e
                ));
                break;
            }
        };

        let offset = result.bytes_verified;
        fill_pattern(&mut expected[..n], offset);
        if let Some(index) = chunk[..n]
            .iter()
            .zip(&expected[..n])
            .position(|(got, want)| got != want)
        {
            result.bytes_verified += index as u64;
            result
                .errors
                .push(format!("data mismatch at offset {}", offset + index as u64));
            break;
        }

        result.bytes_verified += n as u64;
        reporter.add(n as u64);
    }

    if result.success() && result.bytes_verified < result.bytes_written {
        result.errors.push(format!(
            "read error after {} bytes: file is shorter than the {} bytes written",
            result.bytes_verified, result.bytes_written
        ));
    }

    result.throughput.read_mbps = mbps(result.bytes_verified, start.elapsed());
    if result.success() {
        reporter.finish();
    } else {
        reporter.stop();
    }
}

/// Turns a device identifier into something safe for a file name.
pub fn sanitize_device_name(device: &str) -> String {
    let replaced: String = device
        .trim()
        .chars()
        .filter(|c| *c != ':')
        .map(|c| match c {
            '/' | '\\' | ' ' => '_',
            other => other,
        })
        .collect();
    let cleaned = replaced.trim_matches('_');
    if cleaned.is_empty() {
        "drive".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Persists a human-readable verification report into `dir` and returns its
/// path.
pub fn write_report(
    dir: &Path,
    device: &str,
    mount_point: &Path,
    test_size: u64,
    result: &IntegrityResult,
    now: DateTime<Local>,
) -> io::Result<PathBuf> {
    let stem = format!(
        "cdjf-verify-{}-{}",
        sanitize_device_name(device),
        now.format("%Y%m%d-%H%M%S")
    );
    let (path, file) = create_unique(dir, &stem)?;

    let mb = |bytes: u64| bytes as f64 / MIB as f64;
    let mut w = BufWriter::new(file);
    writeln!(w, "CDJF Integrity Verification Report")?;
    writeln!(w, "Timestamp: {}", now.to_rfc3339())?;
    writeln!(w, "Device: {}", device)?;
    writeln!(w, "Mount point: {}", mount_point.display())?;
    writeln!(w, "Test size: {:.1} MB", mb(test_size))?;
    writeln!(w, "Bytes written: {:.1} MB", mb(result.bytes_written))?;
    writeln!(w, "Bytes verified: {:.1} MB", mb(result.bytes_verified))?;
    writeln!(w, "Write speed: {:.2} MB/s", result.throughput.write_mbps)?;
    writeln!(w, "Read speed: {:.2} MB/s", result.throughput.read_mbps)?;
    if result.success() {
        writeln!(w, "Status: PASS - No integrity issues detected.")?;
    } else {
        writeln!(w, "Status: FAIL")?;
        for error in &result.errors {
            writeln!(w, "Error: {}", error)?;
        }
    }
    w.flush()?;

    Ok(path)
}

fn create_unique(dir: &Path, stem: &str) -> io::Result<(PathBuf, File)> {
    let mut attempt = 1;
    loop {
        let name = if attempt == 1 {
            format!("{}.log", stem)
        } else {
            format!("{}-{}.log", stem, attempt)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < 100 => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}
