//! Locating the JSON payload inside a raw model response.
//!
//! Models wrap their answer in reasoning blocks, markdown fences, and
//! chatty prose. These helpers peel those layers off without judging the
//! content.

/// Strip `<think>` / `<thinking>` blocks, then trim.
pub fn preprocess(text: &str) -> String {
    strip_think_tags(text).trim().to_string()
}

/// Remove every `<think>...</think>` and `<thinking>...</thinking>` block.
///
/// An unclosed opening tag swallows the rest of the text.
///
/// ```
/// use schema_extract::output_parser::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>w2 or 1040?</think>{}"), "{}");
/// assert_eq!(strip_think_tags("<thinking>never closed"), "");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    ["think", "thinking"]
        .iter()
        .fold(text.to_string(), |acc, tag| strip_tag(&acc, tag))
}

fn strip_tag(text: &str, tag: &str) -> String {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(&open) {
        out.push_str(&rest[..start]);
        match rest[start..].find(&close) {
            Some(end) => rest = &rest[start + end + close.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Body of the first fenced code block, preferring a `json`-tagged one.
///
/// ```
/// use schema_extract::output_parser::extract::fenced_block;
///
/// let text = "Sure:\n```json\n{\"wages\": 1}\n```\nanything else?";
/// assert_eq!(fenced_block(text), Some("{\"wages\": 1}"));
/// ```
pub fn fenced_block(text: &str) -> Option<&str> {
    let blocks = fenced_blocks(text);
    blocks
        .iter()
        .find(|(lang, _)| lang.eq_ignore_ascii_case("json"))
        .or_else(|| blocks.first())
        .map(|(_, body)| *body)
}

/// All closed fenced blocks as `(language, body)` pairs.
fn fenced_blocks(text: &str) -> Vec<(&str, &str)> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(newline) = after.find('\n') else {
            break;
        };
        let lang = after[..newline].trim();
        let body_start = &after[newline + 1..];
        let Some(close) = body_start.find("```") else {
            break;
        };
        blocks.push((lang, body_start[..close].trim()));
        rest = &body_start[close + 3..];
    }
    blocks
}

/// Remove a single surrounding fence when the whole reply is one block.
///
/// Handles replies like "```json\n{...}" where the closing fence is
/// missing, which [`fenced_block`] would not match.
pub fn strip_outer_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = match inner.find('\n') {
        Some(nl) if inner[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            &inner[nl + 1..]
        }
        _ => inner,
    };
    inner.trim_end().trim_end_matches("```").trim()
}

/// The last balanced `open`..`close` region, ignoring delimiters in strings.
///
/// The last region is preferred because models tend to restate the
/// answer after explaining it.
///
/// ```
/// use schema_extract::output_parser::extract::find_bracketed;
///
/// let text = r#"Example {"a": 1}. Answer: {"wages": {"box1": 2}}"#;
/// assert_eq!(find_bracketed(text, '{', '}'), Some(r#"{"wages": {"box1": 2}}"#));
/// ```
pub fn find_bracketed(text: &str, open: char, close: char) -> Option<&str> {
    let mut last = None;
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' && depth > 0 {
            in_string = true;
        } else if ch == open {
            if depth == 0 {
                start = i;
            }
            depth += 1;
        } else if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                last = Some(&text[start..i + ch.len_utf8()]);
            }
        }
    }
    last
}

/// Text from the first `open` delimiter to the end, for truncated replies.
pub fn unclosed_tail(text: &str, open: char) -> Option<&str> {
    text.find(open).map(|i| &text[i..])
}
