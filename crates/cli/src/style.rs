//! Shared styling utilities for the CLI.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Short commit hash (cyan).
pub fn hash(hash: &str) -> String {
    let style = Style::new().cyan();
    style
        .apply_to(peerpick_core::models::short_hash(hash))
        .to_string()
}

/// Banner for a failed working-copy recovery. The user must act.
pub fn urgent(msg: &str) -> String {
    let style = Style::new().red().bold().reverse();
    format!("{} {}", style.apply_to(" WORKING COPY NEEDS ATTENTION "), msg)
}
