//! Terminal output helpers
//!
//! Everything goes to stderr: stdout carries generated manifests.

use colored::Colorize;

/// Print a success message
pub fn success(msg: &str) {
    eprintln!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    eprintln!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    eprintln!("  {}", msg.dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    eprintln!("  {}: {}", key.dimmed(), value);
}

/// Step label, e.g. `[3] tmplt`
pub fn step_label(id: usize, kind: &str) -> String {
    format!("[{id}] {kind:<6}")
}

/// Plural suffix for counts in messages
pub fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}
