//! Terminal and JSON output.
//!
//! Plain status lines go through [`OutputContext`]; pipeline progress goes
//! through the reporters in [`reporter`].

pub mod json;
pub mod progress;
pub mod reporter;
pub mod styles;

use console::Term;
use owo_colors::{OwoColorize as _, Style};
pub use reporter::{StepBar, TerminalReporter};
pub use styles::Styles;

/// Styling and verbosity for one invocation.
pub struct OutputContext {
    pub styles: Styles,
    /// Whether stdout is a terminal.
    pub is_tty: bool,
    /// Only secrets and errors are printed.
    pub quiet: bool,
}

impl OutputContext {
    /// Colours are used only on a terminal, and never with `--no-color` or
    /// `NO_COLOR` set.
    #[must_use]
    pub fn new(no_color: bool, quiet: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let colored = is_tty && !no_color && std::env::var_os("NO_COLOR").is_none();
        Self {
            styles: Styles::for_terminal(colored),
            is_tty,
            quiet,
        }
    }

    /// Progress bars only make sense on an interactive, non-quiet terminal.
    #[must_use]
    pub fn show_progress(&self) -> bool {
        self.is_tty && !self.quiet
    }

    fn status(&self, glyph: &str, style: Style, msg: &str) {
        if !self.quiet {
            println!("{}", status_line(glyph, style, msg));
        }
    }

    pub fn success(&self, msg: &str) {
        self.status("✓", self.styles.success, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.status("⚠", self.styles.warning, msg);
    }

    pub fn info(&self, msg: &str) {
        self.status("ℹ", self.styles.info, msg);
    }

    /// Key in dim, value as is. Suppressed when quiet.
    pub fn kv(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("{}", self.kv_line(key, value, Style::new()));
        }
    }

    /// Always printed, even when quiet: it may be the only copy of the token.
    pub fn secret(&self, key: &str, value: &str) {
        println!("{}", self.kv_line(key, value, self.styles.bold));
    }

    fn kv_line(&self, key: &str, value: &str, value_style: Style) -> String {
        format!("  {}  {}", key.style(self.styles.dim), value.style(value_style))
    }
}

fn status_line(glyph: &str, style: Style, msg: &str) -> String {
    format!("  {} {msg}", glyph.style(style))
}
