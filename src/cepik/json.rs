//! JSON decoding for CEPiK responses with path-aware error messages.

use anyhow::Result;

/// Decode `body` into `T`. On failure the error names the serde path that
/// failed (e.g. `data[3].attributes`), the type mismatch, and a short snippet
/// of the offending line.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let jd = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(jd).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let raw = inner.to_string();
        let location = format!(" at line {line} column {column}");
        let message = describe_mismatch(raw.strip_suffix(&location).unwrap_or(&raw));

        let prefix = if path.is_empty() || path == "." {
            String::new()
        } else {
            format!("at path '{path}': ")
        };
        anyhow::anyhow!(
            "{prefix}{message} (line {line} col {column})\n{}",
            snippet_around(body, line, column, 24)
        )
    })
}

/// Rewrite serde's "invalid type: X, expected Y" into "expected Y, got X".
fn describe_mismatch(message: &str) -> String {
    if let Some(rest) = message.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {actual}", expected.trim());
    }
    message.to_owned()
}

fn snippet_around(body: &str, line: usize, column: usize, width: usize) -> String {
    let target = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target.is_empty() {
        return "(empty line)".to_owned();
    }

    let mut error_idx = column.saturating_sub(1).min(target.len());
    while !target.is_char_boundary(error_idx) {
        error_idx -= 1;
    }
    let mut start = error_idx.saturating_sub(width / 2);
    while !target.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (error_idx + width / 2).min(target.len());
    while !target.is_char_boundary(end) {
        end += 1;
    }

    let marker = " ".repeat(target[start..error_idx].chars().count()) + "^";
    format!("...{}...\n   {marker}", &target[start..end])
}
