//! Cleanup of markdown artifacts in model output.

use std::sync::LazyLock;

use regex::Regex;

static INLINE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*```[A-Za-z0-9_+-]*[ \t]*([^\n]*?)```[ \t]*$").unwrap());

static FENCE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*```[^\n]*$\n?").unwrap());

/// Return the body of the fence enclosing the reply, or the trimmed input when
/// no line opens a fence.
///
/// The block runs from the first line starting with a fence to the last line
/// that is a bare closing fence, so fences nested in the body are kept.
/// Commentary outside the block is discarded. An opening fence without a
/// closing one (truncated output) drops only the opening fence line.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let mut opening: Option<(usize, usize)> = None;
    let mut closing: Option<usize> = None;
    let mut offset = 0;
    for line in trimmed.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        match opening {
            None if line.trim_start().starts_with("```") => opening = Some((start, offset)),
            Some(_) if line.trim() == "```" => closing = Some(start),
            _ => {}
        }
    }

    match (opening, closing) {
        (Some((_, body_start)), Some(body_end)) => trimmed[body_start..body_end].trim(),
        (Some((line_start, _)), None) => unterminated_block(&trimmed[line_start..]),
        (None, _) => trimmed,
    }
}

fn unterminated_block(block: &str) -> &str {
    if let Some(body) = INLINE_FENCE_RE.captures(block).and_then(|caps| caps.get(1)) {
        return body.as_str().trim();
    }
    block.split_once('\n').map_or("", |(_, body)| body).trim()
}

/// Prepare a generated script for persisting.
///
/// Fence marker lines are removed (their contents are kept), every remaining
/// backtick becomes a double quote, and surrounding whitespace is trimmed.
/// The result never contains a backtick.
pub fn sanitize_script(script: &str) -> String {
    let unfenced = FENCE_LINE_RE.replace_all(script, "");
    unfenced.replace('`', "\"").trim().to_string()
}
