//! Presentation-layer implementations of the reporting ports.
//!
//! `TerminalReporter` prints plain progress messages. `StepBar` drives the
//! deploy pipeline's step counter and prints one tagged line per step
//! transition above it.

use std::time::Duration;

use indicatif::ProgressBar;
use owo_colors::{OwoColorize as _, Style};

use crate::application::ports::{ProgressReporter, StepProgress};
use crate::output::{OutputContext, Styles, progress};

#[derive(Clone, Copy)]
enum Note {
    Step,
    Success,
    Warn,
}

fn note_line(styles: &Styles, note: Note, message: &str) -> String {
    let (glyph, style) = match note {
        Note::Step => ("→", styles.info),
        Note::Success => ("✓", styles.success),
        Note::Warn => ("!", styles.warning),
    };
    format!("  {} {message}", glyph.style(style))
}

fn tagged(tag: &str, style: Style, label: &str) -> String {
    format!("{} {label}", tag.style(style))
}

/// Prints `→`, `✓` and `!` lines to stdout; silent when quiet.
pub struct TerminalReporter<'a> {
    ctx: &'a OutputContext,
}

impl<'a> TerminalReporter<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    fn emit(&self, note: Note, message: &str) {
        if !self.ctx.quiet {
            println!("{}", note_line(&self.ctx.styles, note, message));
        }
    }
}

impl ProgressReporter for TerminalReporter<'_> {
    fn step(&self, message: &str) {
        self.emit(Note::Step, message);
    }

    fn success(&self, message: &str) {
        self.emit(Note::Success, message);
    }

    fn warn(&self, message: &str) {
        self.emit(Note::Warn, message);
    }
}

/// Pipeline progress: `[STEP]`, `[SKIP]`, `[DONE] (1.2s)` and `[FAIL]` lines
/// plus an `n/total` counter bar when stdout is a terminal.
pub struct StepBar<'a> {
    ctx: &'a OutputContext,
    bar: ProgressBar,
}

impl<'a> StepBar<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        let bar = if ctx.show_progress() {
            progress::steps(0)
        } else {
            ProgressBar::hidden()
        };
        Self { ctx, bar }
    }

    fn print(&self, line: &str) {
        if self.ctx.quiet {
            return;
        }
        if self.bar.is_hidden() {
            println!("{line}");
        } else {
            self.bar.println(line);
        }
    }

    fn done_line(&self, label: &str, elapsed: Duration) -> String {
        format!(
            "{} ({:.1}s)",
            tagged("[DONE]", self.ctx.styles.success, label),
            elapsed.as_secs_f64()
        )
    }
}

impl StepProgress for StepBar<'_> {
    fn begin(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn started(&self, label: &str) {
        self.print(&tagged("[STEP]", self.ctx.styles.info, label));
        self.bar.set_message(label.to_string());
    }

    fn skipped(&self, label: &str) {
        self.print(&tagged("[SKIP]", self.ctx.styles.dim, label));
    }

    fn finished(&self, label: &str, elapsed: Duration) {
        self.print(&self.done_line(label, elapsed));
    }

    // Failures go to stderr even when quiet.
    fn failed(&self, label: &str) {
        let line = tagged("[FAIL]", self.ctx.styles.error, label);
        self.bar.suspend(|| eprintln!("{line}"));
    }

    fn advance(&self) {
        self.bar.inc(1);
    }
}

impl ProgressReporter for StepBar<'_> {
    fn step(&self, message: &str) {
        self.print(&note_line(&self.ctx.styles, Note::Step, message));
    }

    fn success(&self, message: &str) {
        self.print(&note_line(&self.ctx.styles, Note::Success, message));
    }

    fn warn(&self, message: &str) {
        self.print(&note_line(&self.ctx.styles, Note::Warn, message));
    }
}

impl Drop for StepBar<'_> {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}
