//! Output helper functions for consistent styled messages.

use sysviz_sim::Explanation;

use super::colors::SemanticStyle;

/// Prints a hint/suggestion with an arrow.
pub fn print_hint(msg: &str) {
    println!("{} {}", "→".muted(), msg.muted());
}

/// Prints a section title.
pub fn print_section(title: &str) {
    println!("{}", title.header());
}

/// Prints an empty line for spacing.
pub fn print_spacer() {
    println!();
}

/// Prints explanations as `[  1.234s] text`, oldest first.
pub fn print_timeline(entries: &[Explanation]) {
    if entries.is_empty() {
        print_hint("nothing happened in the simulated window");
        return;
    }
    for entry in entries {
        println!("  {} {}", timestamp(entry.at_ns).muted(), entry.text);
    }
}

fn timestamp(at_ns: u64) -> String {
    format!("[{:>8.3}s]", at_ns as f64 / 1e9)
}
