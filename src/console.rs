//! Operator-facing messages on stderr.
//!
//! Step banners, warnings and the final status are printed here, styled
//! with crossterm. They are separate from the `tracing` log stream, which
//! may also go to a file.
//!
//! # Usage
//! ```rust
//! use archsetup::console::{self, Level};
//!
//! console::banner("Preparing disk");
//! console::message(Level::Warn, "reflector failed, using the ISO mirrorlist");
//! ```

use std::io::{self, IsTerminal, Write};

use crossterm::style::{Color, StyledContent, Stylize};

// =============================================================================
// COLOR PALETTE
// =============================================================================

/// Colors used for operator messages.
pub struct Colors;

impl Colors {
    pub const BANNER: Color = Color::Cyan;
    pub const SUCCESS: Color = Color::Green;
    pub const WARNING: Color = Color::Yellow;
    pub const ERROR: Color = Color::Red;
    pub const MUTED: Color = Color::DarkGrey;
}

/// Severity of an operator message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Info => "::",
            Self::Success => "ok",
            Self::Warn => "!!",
            Self::Error => "error:",
        }
    }

    pub fn color(self) -> Color {
        match self {
            Self::Info => Colors::BANNER,
            Self::Success => Colors::SUCCESS,
            Self::Warn => Colors::WARNING,
            Self::Error => Colors::ERROR,
        }
    }
}

fn styled<'a>(text: &'a str, color: Color, color_enabled: bool) -> StyledContent<&'a str> {
    if color_enabled {
        text.with(color).bold()
    } else {
        text.stylize()
    }
}

/// Render a message line without writing it.
pub fn render(level: Level, text: &str, color_enabled: bool) -> String {
    format!("{} {}", styled(level.tag(), level.color(), color_enabled), text)
}

fn emit(line: &str) {
    let mut stderr = io::stderr().lock();
    // stderr going away is not worth failing the run over
    let _ = writeln!(stderr, "{}", line);
}

fn color_enabled() -> bool {
    io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Print a message at `level`.
pub fn message(level: Level, text: &str) {
    emit(&render(level, text, color_enabled()));
}

/// Print a step banner.
pub fn banner(step: &str) {
    let rule = "=".repeat(step.len() + 8);
    let colored = color_enabled();
    emit(&format!("{}", styled(&rule, Colors::MUTED, colored)));
    emit(&format!("    {}", styled(step, Colors::BANNER, colored)));
    emit(&format!("{}", styled(&rule, Colors::MUTED, colored)));
}

/// Print a multi-line block, e.g. a plan summary.
pub fn block(text: &str) {
    for line in text.lines() {
        emit(line);
    }
}

pub fn success(text: &str) {
    message(Level::Success, text);
}

pub fn warn(text: &str) {
    message(Level::Warn, text);
}

pub fn error(text: &str) {
    message(Level::Error, text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_color_is_plain() {
        assert_eq!(render(Level::Warn, "offline", false), "!! offline");
        assert_eq!(render(Level::Error, "boom", false), "error: boom");
    }

    #[test]
    fn test_render_with_color_adds_escapes() {
        let line = render(Level::Success, "done", true);
        assert!(line.contains("\u{1b}["));
        assert!(line.ends_with("done"));
    }
}
