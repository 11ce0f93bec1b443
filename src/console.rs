//! Operator-facing message formatting.

use std::path::Path;

use anstyle::{AnsiColor, Color, Reset, Style};

const INFO: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlue)));
const SUCCESS: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightGreen)));
const WARNING: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightYellow)));
const FAILURE: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightRed)));
const EMPHASIS: Style = Style::new().bold();

#[must_use]
pub fn command_banner(command: &str, cwd: &Path) -> String {
    format!("{INFO}Running command: {command} in {}{Reset}", cwd.display())
}

#[must_use]
pub fn heading(text: &str) -> String {
    format!("\n--- {text} ---")
}

#[must_use]
pub fn success(text: &str) -> String {
    format!("{SUCCESS}{text}{Reset}")
}

#[must_use]
pub fn warning(text: &str) -> String {
    format!("{WARNING}{text}{Reset}")
}

#[must_use]
pub fn failure(text: &str) -> String {
    format!("{FAILURE}{text}{Reset}")
}

#[must_use]
pub fn emphasis(text: &str) -> String {
    format!("{EMPHASIS}{text}{Reset}")
}
