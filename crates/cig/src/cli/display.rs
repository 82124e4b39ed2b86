//! Common display utilities for CLI commands.

use colored::Colorize;

const MAX_DISPLAY_ITEMS: usize = 20;

/// Display a bulleted list with truncation.
///
/// Shows up to `MAX_DISPLAY_ITEMS` entries. If there are more, shows
/// "... and N more". If empty, shows `empty_message`.
pub fn print_list<S: AsRef<str>>(items: &[S], empty_message: &str) {
    if items.is_empty() {
        println!("    {}", empty_message.dimmed());
        return;
    }

    for item in items.iter().take(MAX_DISPLAY_ITEMS) {
        println!("    {} {}", "•".dimmed(), item.as_ref());
    }

    if items.len() > MAX_DISPLAY_ITEMS {
        println!(
            "    {} ... and {} more",
            "•".dimmed(),
            items.len() - MAX_DISPLAY_ITEMS
        );
    }
}

/// Print a `label: count` line with the count highlighted.
pub fn print_count(label: &str, count: usize) {
    println!("  {}: {}", label.white().bold(), count.to_string().green());
}
