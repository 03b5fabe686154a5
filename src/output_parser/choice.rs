//! Picking one option out of a free-form model answer.
//!
//! Used by the LLM classifier: the model is asked for a bare schema id but
//! often wraps it as `**w2**` or `"1040"`. Ids mentioned mid-sentence are
//! not accepted, since prose like "not a w9" names the wrong option.

use crate::output_parser::error::ParseError;
use crate::output_parser::extract::preprocess;

/// Match a response against `options`, case-insensitively.
///
/// Tried in order: the whole (unwrapped) answer equals an option, then the
/// answer starts with an option as a whole word.
///
/// ```
/// use schema_extract::output_parser::parse_choice;
///
/// let ids = ["1040", "w2"];
/// assert_eq!(parse_choice("**W2**", &ids).unwrap(), "w2");
/// assert_eq!(parse_choice("1040 - individual return", &ids).unwrap(), "1040");
/// assert!(parse_choice("This looks like a 1040 return.", &ids).is_err());
/// ```
pub fn parse_choice<'a>(response: &str, options: &[&'a str]) -> Result<&'a str, ParseError> {
    let cleaned = preprocess(response).to_lowercase();
    if cleaned.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let unwrapped = unwrap_answer(&cleaned);

    if let Some(&hit) = options.iter().find(|o| unwrapped == o.to_lowercase()) {
        return Ok(hit);
    }

    options
        .iter()
        .find(|o| {
            let o = o.to_lowercase();
            unwrapped.starts_with(&o) && !is_word_byte(unwrapped.as_bytes().get(o.len()).copied())
        })
        .copied()
        .ok_or_else(|| ParseError::NoMatchingChoice {
            valid: options.iter().map(|o| o.to_string()).collect(),
        })
}

/// Peel punctuation, bold markers, quotes, and backticks off an answer.
fn unwrap_answer(text: &str) -> &str {
    let mut s = text.trim();
    loop {
        let next = s
            .trim_matches(|c: char| c.is_whitespace() || ".!,:;".contains(c))
            .trim_start_matches("**")
            .trim_end_matches("**")
            .trim_matches(|c: char| "\"'`()".contains(c));
        if next == s {
            return s;
        }
        s = next;
    }
}

fn is_word_byte(b: Option<u8>) -> bool {
    b.is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDS: [&str; 3] = ["1040", "w2", "w9"];

    #[test]
    fn exact_answer() {
        assert_eq!(parse_choice("w2", &IDS).unwrap(), "w2");
        assert_eq!(parse_choice("1040\n", &IDS).unwrap(), "1040");
    }

    #[test]
    fn wrapped_answers() {
        assert_eq!(parse_choice("**w9**", &IDS).unwrap(), "w9");
        assert_eq!(parse_choice("\"1040\".", &IDS).unwrap(), "1040");
        assert_eq!(parse_choice("`w2`", &IDS).unwrap(), "w2");
    }

    #[test]
    fn answer_with_trailing_explanation() {
        assert_eq!(
            parse_choice("w2 - it lists wages and withholding", &IDS).unwrap(),
            "w2"
        );
    }

    #[test]
    fn mentions_in_prose_are_rejected() {
        for answer in [
            "Not a w9; this is a 1040 that references a w2.",
            "This looks like a 1040 return.",
            "It is not a w2.",
        ] {
            assert!(
                matches!(parse_choice(answer, &IDS), Err(ParseError::NoMatchingChoice { .. })),
                "{answer}"
            );
        }
    }

    #[test]
    fn think_block_ignored() {
        assert_eq!(
            parse_choice("<think>could be w2</think>1040", &IDS).unwrap(),
            "1040"
        );
    }

    #[test]
    fn substring_is_not_a_match() {
        assert!(matches!(
            parse_choice("form w2x", &IDS),
            Err(ParseError::NoMatchingChoice { .. })
        ));
        assert!(parse_choice("10400", &IDS).is_err());
    }

    #[test]
    fn empty_answer() {
        assert_eq!(
            parse_choice("<think>hmm</think>  ", &IDS),
            Err(ParseError::EmptyResponse)
        );
    }
}
