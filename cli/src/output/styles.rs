//! Colour palette for terminal output.

use owo_colors::Style;

/// One style per kind of line. All plain unless built for a colour terminal.
#[derive(Default, Clone)]
pub struct Styles {
    pub success: Style,
    pub warning: Style,
    pub error: Style,
    pub info: Style,
    pub dim: Style,
    /// Secrets shown once.
    pub bold: Style,
}

impl Styles {
    /// Palette for a terminal; plain when `colored` is false.
    #[must_use]
    pub fn for_terminal(colored: bool) -> Self {
        if !colored {
            return Self::default();
        }
        Self {
            success: Style::new().green(),
            warning: Style::new().yellow(),
            error: Style::new().red(),
            info: Style::new().blue(),
            dim: Style::new().dimmed(),
            bold: Style::new().bold(),
        }
    }
}
