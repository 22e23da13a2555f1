//! The operator-facing side of an operation.
//!
//! The orchestrator never prints or reads stdin itself. Everything the
//! operator sees or answers goes through a [`Frontend`], and only from the
//! thread that called into the library, so an implementation does not need to
//! be thread-safe.
use crate::progress::ProgressSink;

pub trait Frontend {
    /// Asks a yes/no question; `default` is the answer to an empty reply.
    fn confirm(&self, prompt: &str, default: bool) -> anyhow::Result<bool>;

    fn info(&self, message: &str);

    fn warn(&self, message: &str);

    /// Replaces the live progress line of `device`.
    fn progress(&self, device: &str, line: &str);

    /// Final progress line of `device`; its live line can be retired.
    fn progress_done(&self, device: &str, line: &str);

    /// A line of tool output for `device` that did not translate to progress.
    fn log(&self, device: &str, line: &str);
}

/// Renders a [`crate::progress::ProgressReporter`] into a front-end's slot for
/// one device.
pub struct FrontendSink<'f> {
    frontend: &'f dyn Frontend,
    device: &'f str,
}

impl<'f> FrontendSink<'f> {
    pub fn new(frontend: &'f dyn Frontend, device: &'f str) -> Self {
        Self { frontend, device }
    }
}

impl ProgressSink for FrontendSink<'_> {
    fn draw(&mut self, line: &str) {
        self.frontend.progress(self.device, line);
    }

    fn finish(&mut self, line: &str) {
        self.frontend.progress_done(self.device, line);
    }
}
