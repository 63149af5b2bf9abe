//! One-line, human-readable summaries of tool calls.

/// Summary values longer than this many characters are cut off.
const SUMMARY_MAX_CHARS: usize = 120;

/// Label and primary argument for the tools we know how to describe.
fn summary_format(tool_name: &str) -> Option<(&'static str, &'static str)> {
    match tool_name {
        "read_file" => Some(("Reading file", "path")),
        "edit_file" => Some(("Editing file", "path")),
        "list_files" => Some(("Listing files in", "path")),
        "bash" => Some(("Running command", "command")),
        "grep_search" => Some(("Searching code for", "pattern")),
        "read_more" => Some(("Reading more of result", "result_id")),
        "create_subagent" => Some(("Delegating task", "task")),
        _ => None,
    }
}

/// Describe a tool call by its name and primary argument.
pub fn tool_summary(tool_name: &str, input: &serde_json::Value) -> String {
    let Some((label, param)) = summary_format(tool_name) else {
        return format!("Using tool {tool_name}");
    };

    let value = match input.get(param) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    if value.chars().count() > SUMMARY_MAX_CHARS {
        let cut: String = value.chars().take(SUMMARY_MAX_CHARS).collect();
        format!("{label} {cut}...")
    } else {
        format!("{label} {value}")
    }
}
