//! The core, UI-agnostic library for the `cdjf` drive preparation utility.
//!
//! `cdjf-core` gets USB drives ready for rekordbox and CDJ/XDJ players: it
//! measures whether a drive is fast enough, erases one or many drives to FAT32
//! with the platform's own tools, and checks that data written to a freshly
//! formatted drive reads back intact. It can be driven by any front-end, be it
//! a command-line interface (like `cdjf`) or something graphical.
//!
//! The library is structured into several key modules:
//! - [`benchmark`]: Adaptive write/read throughput measurement and grading.
//! - [`mod@verify`]: Pattern-based write/read-back integrity checks and reports.
//! - [`mod@format`]: The per-device format state machine, single and concurrent.
//! - [`platform`]: The [`platform::DeviceDriver`] trait and its macOS, Windows
//!   and Linux implementations.
//! - [`progress`] and [`translate`]: Progress lines, and turning erase tool
//!   output into percentages.
//! - [`profile`]: Named settings persisted as JSON.
//!
//! Operations report through [`progress::ProgressSink`] and
//! [`frontend::Frontend`] rather than printing, so the caller decides how
//! progress and prompts look.
//!
//! ## Example: Verifying a Mounted Drive
//!
//! ```rust,no_run
//! use cdjf_core::{platform, progress::HiddenSink, verify};
//! use std::sync::{Arc, atomic::AtomicBool};
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let driver = platform::native()?;
//!     let mount = driver.mount_point("disk4")?;
//!
//!     // A shared flag to allow for graceful cancellation.
//!     let running = Arc::new(AtomicBool::new(true));
//!
//!     let size = verify::verification_size(64)?;
//!     let result = verify::verify(
//!         &mount.join(verify::VERIFY_FILE_NAME),
//!         size,
//!         &running,
//!         &mut HiddenSink,
//!     );
//!
//!     println!("{:.2} MB/s write, {:.2} MB/s read", result.throughput.write_mbps, result.throughput.read_mbps);
//!     for error in &result.errors {
//!         println!("{}", error);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod benchmark;
pub mod device;
pub mod error;
pub mod format;
pub mod frontend;
pub mod platform;
pub mod profile;
pub mod progress;
mod scratch;
pub mod translate;
pub mod verify;
