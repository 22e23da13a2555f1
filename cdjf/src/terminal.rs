//! The terminal implementation of [`Frontend`].
//!
//! Every device with live progress gets its own spinner line in a shared
//! [`MultiProgress`]; plain output and prompts suspend the bars so nothing
//! gets drawn over.
use anyhow::Result;
use cdjf_core::frontend::Frontend;
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

pub struct TerminalFrontend {
    multi: MultiProgress,
    bars: RefCell<HashMap<String, ProgressBar>>,
}

impl TerminalFrontend {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: RefCell::new(HashMap::new()),
        }
    }

    fn bar(&self, device: &str) -> ProgressBar {
        self.bars
            .borrow_mut()
            .entry(device.to_string())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(
                    ProgressStyle::with_template("{spinner:.green} {prefix:.cyan} {msg}")
                        .unwrap()
                        .tick_strings(&["■  ", " ■ ", "  ■", " ■ ", "■■■"]),
                );
                bar.set_prefix(format!("[{}]", device));
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            })
            .clone()
    }
}

impl Frontend for TerminalFrontend {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        let answer = self.multi.suspend(|| {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .default(default)
                .interact()
        })?;
        Ok(answer)
    }

    fn info(&self, message: &str) {
        self.multi.suspend(|| println!("{}", message));
    }

    fn warn(&self, message: &str) {
        self.multi
            .suspend(|| println!("{}", style(message).yellow().bold()));
    }

    fn progress(&self, device: &str, line: &str) {
        self.bar(device).set_message(line.to_string());
    }

    fn progress_done(&self, device: &str, line: &str) {
        let bar = self.bar(device);
        bar.finish_with_message(line.to_string());
        self.bars.borrow_mut().remove(device);
    }

    fn log(&self, device: &str, line: &str) {
        self.multi.suspend(|| {
            println!("{} {}", style(format!("[{}]", device)).cyan(), style(line).dim())
        });
    }
}
