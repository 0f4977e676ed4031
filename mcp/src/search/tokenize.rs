//! Tokenization shared by every search method.

use crate::inventory::ToolRecord;

/// Lowercase `text` and split it on non-alphanumeric boundaries.
///
/// Mixed tokens such as `issue123` stay whole.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Searchable text for a record: server, tool name, description and parameter names.
pub fn document_text(record: &ToolRecord) -> String {
    let mut text = format!("{} {} {}", record.server, record.name, record.description);
    for param in record.param_names() {
        text.push(' ');
        text.push_str(param);
    }
    text
}
