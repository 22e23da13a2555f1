//! Running the native disk tools.
use crate::error::DeviceError;
use crossbeam::channel;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread;

/// Lines of output kept as diagnostic text for a failed command.
const TAIL_LINES: usize = 20;

/// Runs `program`, handing every non-empty output line (stdout and stderr,
/// split on `\n` and `\r`) to `on_line` as it arrives.
///
/// A non-zero exit becomes [`DeviceError::CommandFailed`] carrying the last
/// lines of output.
pub fn run_streaming(
    program: &str,
    args: &[String],
    on_line: &mut dyn FnMut(&str),
) -> Result<(), DeviceError> {
    log::debug!("running {} {}", program, args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| DeviceError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let streams: Vec<Box<dyn Read + Send>> = [
        child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
        child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
    ]
    .into_iter()
    .flatten()
    .collect();

    let (tx, rx) = channel::unbounded::<String>();
    let mut tail = VecDeque::with_capacity(TAIL_LINES);

    thread::scope(|s| {
        for stream in streams {
            let tx = tx.clone();
            s.spawn(move || {
                let result = for_each_line(stream, |line| {
                    let _ = tx.send(line.to_string());
                });
                if let Err(e) = result {
                    log::debug!("{} output stream closed: {}", program, e);
                }
            });
        }
        drop(tx);

        for line in rx {
            on_line(&line);
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    });

    let status = child.wait()?;
    if status.success() {
        return Ok(());
    }
    Err(DeviceError::CommandFailed {
        program: program.to_string(),
        status: status.to_string(),
        output: Vec::from(tail).join("\n"),
    })
}

/// Runs `program` to completion and returns its stdout.
pub fn run_captured(program: &str, args: &[String]) -> Result<String, DeviceError> {
    log::debug!("running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| DeviceError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut combined: Vec<&str> = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if combined.len() > TAIL_LINES {
        combined.drain(..combined.len() - TAIL_LINES);
    }
    Err(DeviceError::CommandFailed {
        program: program.to_string(),
        status: output.status.to_string(),
        output: combined.join("\n"),
    })
}

/// Builds an owned argument list.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Splits `reader` into trimmed lines on both `\n` and `\r`, skipping empty
/// ones. Tools that redraw a progress line with `\r` yield each redraw.
pub fn for_each_line<R: Read>(mut reader: R, mut handle: impl FnMut(&str)) -> io::Result<()> {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    let mut flush = |pending: &mut Vec<u8>| {
        if pending.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(pending);
        let line = text.trim();
        if !line.is_empty() {
            handle(line);
        }
        pending.clear();
    };

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                flush(&mut pending);
                return Err(e);
            }
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                flush(&mut pending);
            } else {
                pending.push(byte);
            }
        }
    }
    flush(&mut pending);
    Ok(())
}
