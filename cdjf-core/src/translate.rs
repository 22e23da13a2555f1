//! Turns free-text output of a native erase tool into progress percentages.
//!
//! Each platform's erase tool prints a recognisable sequence of phrases. A
//! [`ProgressTable`] maps those phrases to percentages and an
//! [`OutputTranslator`] applies the table to a line stream while guaranteeing
//! the emitted percentage never goes backwards. This is purely cosmetic: a
//! line the table does not understand is handed back as log output and never
//! fails the erase.
use crate::progress::ProgressReporter;
use regex::Regex;

/// Ordered `(phrase, percent)` vocabulary plus an explicit percent pattern.
#[derive(Debug, Clone)]
pub struct ProgressTable {
    steps: Vec<(String, u64)>,
    percent: Regex,
}

impl ProgressTable {
    /// Builds a table from lower-case phrases, tested in order.
    pub fn new<S: Into<String>>(steps: impl IntoIterator<Item = (S, u64)>) -> Self {
        Self {
            steps: steps
                .into_iter()
                .map(|(pattern, pct)| (pattern.into().to_lowercase(), pct.min(100)))
                .collect(),
            percent: Regex::new(r"(?i)\b(\d{1,3})\s*(?:percent|%)")
                .expect("percent pattern is a valid regex"),
        }
    }

    /// `diskutil eraseDisk` on macOS.
    pub fn diskutil() -> Self {
        Self::new([
            ("started erase", 5),
            ("unmounting", 15),
            ("creating the partition map", 35),
            ("waiting for partitions", 55),
            ("formatting", 75),
            ("initialization complete", 90),
            ("finished", 100),
        ])
    }

    /// `format.com` on Windows. Its "NN percent completed" lines go through
    /// the explicit percent pattern.
    pub fn format_com() -> Self {
        Self::new([
            ("quickformatting", 10),
            ("initializing the file allocation table", 80),
            ("creating file system structures", 90),
            ("format complete", 100),
        ])
    }

    /// `parted` + `mkfs.fat` on Linux, with the phase lines the Linux driver
    /// prints between commands.
    pub fn mkfs_fat() -> Self {
        Self::new([
            ("unmounting", 15),
            ("creating the partition map", 35),
            ("formatting", 55),
            ("volume id is", 95),
            ("finished", 100),
        ])
    }

    /// Whether `line` carries an explicit percentage such as `42 percent`.
    pub fn is_percent_line(&self, line: &str) -> bool {
        self.percent.is_match(line)
    }

    /// Returns the percentage a line maps to, if any. An explicit percent
    /// token wins over the phrase table.
    pub fn lookup(&self, line: &str) -> Option<u64> {
        if let Some(caps) = self.percent.captures(line) {
            if let Ok(value) = caps[1].parse::<u64>() {
                return Some(value.min(100));
            }
        }

        let lower = line.to_lowercase();
        self.steps
            .iter()
            .find(|(pattern, _)| lower.contains(pattern.as_str()))
            .map(|(_, pct)| *pct)
    }
}

/// What a single line of tool output turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation<'l> {
    /// A new, strictly higher percentage.
    Progress(u64),
    /// A recognised line that would not advance progress.
    Stale,
    /// An unrecognised line, to be shown as-is.
    Passthrough(&'l str),
}

pub struct OutputTranslator<'t> {
    table: &'t ProgressTable,
    last: u64,
}

impl<'t> OutputTranslator<'t> {
    pub fn new(table: &'t ProgressTable) -> Self {
        Self { table, last: 0 }
    }

    pub fn translate<'l>(&mut self, line: &'l str) -> Translation<'l> {
        match self.table.lookup(line) {
            Some(pct) if pct > self.last => {
                self.last = pct;
                Translation::Progress(pct)
            }
            Some(_) => Translation::Stale,
            None => Translation::Passthrough(line),
        }
    }

    /// Translates `line`, moving `reporter` forward, and hands the line to
    /// `log`. Bare percentage lines only move the bar.
    pub fn feed(&mut self, line: &str, reporter: &mut ProgressReporter<'_>, log: impl FnOnce(&str)) {
        if let Translation::Progress(pct) = self.translate(line) {
            reporter.set(pct);
        }
        if !self.table.is_percent_line(line) {
            log(line);
        }
    }

    /// Highest percentage emitted so far.
    pub fn last(&self) -> u64 {
        self.last
    }
}
