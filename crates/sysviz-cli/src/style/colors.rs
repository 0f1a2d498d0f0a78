//! Semantic color palette for terminal output.

use owo_colors::{OwoColorize, Style};

fn paint(text: &impl std::fmt::Display, style: Style) -> String {
    if super::no_color() {
        text.to_string()
    } else {
        text.style(style).to_string()
    }
}

/// Trait extension to apply semantic styles.
pub trait SemanticStyle: Sized {
    /// Green bold: healthy, closed, delivered.
    fn success(&self) -> String;
    /// Red bold: failed, open, unhealthy.
    fn error(&self) -> String;
    /// Yellow: transitional states.
    fn warning(&self) -> String;
    /// Dimmed secondary text.
    fn muted(&self) -> String;
    fn header(&self) -> String;
    /// Blue: seeds, keys, flag values.
    fn code(&self) -> String;
}

impl<T: std::fmt::Display> SemanticStyle for T {
    fn success(&self) -> String {
        paint(self, Style::new().green().bold())
    }

    fn error(&self) -> String {
        paint(self, Style::new().red().bold())
    }

    fn warning(&self) -> String {
        paint(self, Style::new().yellow())
    }

    fn muted(&self) -> String {
        paint(self, Style::new().dimmed())
    }

    fn header(&self) -> String {
        paint(self, Style::new().bold())
    }

    fn code(&self) -> String {
        paint(self, Style::new().blue())
    }
}

/// Colors a simulator state label by what it means for traffic.
pub fn state(label: &str) -> String {
    match label {
        "closed" | "healthy" | "success" | "acknowledged" | "complete" | "normal" => {
            label.success()
        }
        "open" | "unhealthy" | "failed" | "overloaded" | "partial" => label.error(),
        "idle" | "pending" => label.muted(),
        _ => label.warning(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_color_returns_plain_text() {
        crate::style::set_no_color(true);
        assert_eq!(state("open"), "open");
        assert_eq!("seed 7".code(), "seed 7");
    }
}
