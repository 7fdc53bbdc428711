//! Compact output rendering for the operator binary.

use crate::core::error::SwitchyardError;
use crate::core::time;
use serde_json::Value as JsonValue;

/// Prints an `ok` command envelope carrying `extra` as pretty JSON.
pub fn print_envelope(cmd: &str, extra: JsonValue) -> Result<(), SwitchyardError> {
    let envelope = time::command_envelope(cmd, "ok", extra);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Fixed-width cell: pads short values, truncates long ones on a char boundary.
pub fn cell(input: &str, width: usize) -> String {
    let count = input.chars().count();
    if count > width && width > 3 {
        let head: String = input.chars().take(width - 3).collect();
        format!("{}...", head)
    } else {
        format!("{:<width$}", input, width = width)
    }
}
