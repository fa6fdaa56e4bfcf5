use crate::error::CorrelationError;

const OPEN: &str = "${";
const CLOSE: &str = "}";

/// Replaces every `${name}` in `input` with what `resolve` returns for the
/// trimmed name. `Ok(None)` keeps the placeholder verbatim. Empty and
/// unterminated placeholders are copied through as literal text.
///
/// # Errors
///
/// Propagates the first error returned by `resolve`.
pub fn render<F>(input: &str, mut resolve: F) -> Result<String, CorrelationError>
where
    F: FnMut(&str) -> Result<Option<String>, CorrelationError>,
{
    let mut rest = input;
    let mut output = String::with_capacity(input.len());

    loop {
        let Some(start) = rest.find(OPEN) else {
            output.push_str(rest);
            break;
        };
        let (before, after_start) = rest.split_at(start);
        output.push_str(before);
        let Some(after) = after_start.strip_prefix(OPEN) else {
            output.push_str(after_start);
            break;
        };
        let Some(end) = after.find(CLOSE) else {
            output.push_str(after_start);
            break;
        };
        let (name_part, after_end) = after.split_at(end);
        let name = name_part.trim();
        let replacement = if name.is_empty() {
            None
        } else {
            resolve(name)?
        };
        match replacement {
            Some(value) => output.push_str(&value),
            None => {
                output.push_str(OPEN);
                output.push_str(name_part);
                output.push_str(CLOSE);
            }
        }
        rest = after_end.strip_prefix(CLOSE).unwrap_or(after_end);
    }

    Ok(output)
}

/// Names referenced by `${...}` placeholders, in order of appearance.
#[must_use]
pub fn placeholders(input: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find(OPEN) {
        let Some(after) = rest.get(start.saturating_add(OPEN.len())..) else {
            break;
        };
        let Some(end) = after.find(CLOSE) else {
            break;
        };
        let (name_part, after_end) = after.split_at(end);
        let name = name_part.trim();
        if !name.is_empty() {
            names.push(name);
        }
        rest = after_end.strip_prefix(CLOSE).unwrap_or(after_end);
    }
    names
}
