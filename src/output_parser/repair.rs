//! Deterministic repair of almost-JSON produced by models.
//!
//! A single left-to-right pass rewrites the text, tracking string state and
//! bracket nesting. The result is accepted only if `serde_json` parses it.

/// Repair common model JSON mistakes without another model call.
///
/// Returns `None` if the input already parses, or if the repaired text
/// still does not.
///
/// Fixes applied during the pass:
/// - `//` and `/* */` comments are dropped
/// - Python `True` / `False` / `None` become `true` / `false` / `null`
/// - trailing commas before `}` or `]` are removed
/// - single-quoted strings become double-quoted
/// - bare object keys are quoted
/// - raw newlines inside strings are escaped
/// - unterminated strings and unclosed brackets are closed
///
/// ```
/// use schema_extract::output_parser::try_repair_json;
///
/// let fixed = try_repair_json("{'wages': 50000, 'retirement_plan': False,}").unwrap();
/// assert_eq!(fixed, r#"{"wages": 50000, "retirement_plan": false}"#);
/// ```
pub fn try_repair_json(broken: &str) -> Option<String> {
    if is_json(broken) {
        return None;
    }
    let repaired = Repairer::new(broken).run();
    is_json(&repaired).then_some(repaired)
}

fn is_json(s: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(s).is_ok()
}

struct Repairer {
    chars: Vec<char>,
    pos: usize,
    out: String,
    /// Open `{` / `[` delimiters, innermost last.
    stack: Vec<char>,
}

impl Repairer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            out: String::with_capacity(input.len() + 8),
            stack: Vec::new(),
        }
    }

    fn run(mut self) -> String {
        while let Some(ch) = self.peek(0) {
            match ch {
                '"' => self.double_quoted(),
                '\'' if self.at_token_start() => self.single_quoted(),
                '/' if matches!(self.peek(1), Some('/') | Some('*')) => self.comment(),
                '{' | '[' => {
                    self.stack.push(ch);
                    self.emit(ch);
                }
                '}' | ']' => {
                    self.drop_trailing_comma();
                    self.stack.pop();
                    self.emit(ch);
                }
                c if c.is_alphabetic() || c == '_' => self.word(),
                c => self.emit(c),
            }
        }

        self.drop_trailing_comma();
        while let Some(open) = self.stack.pop() {
            self.out.push(if open == '{' { '}' } else { ']' });
        }
        self.out
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn emit(&mut self, ch: char) {
        self.out.push(ch);
        self.pos += 1;
    }

    fn last_significant(&self) -> Option<char> {
        self.out.chars().rev().find(|c| !c.is_whitespace())
    }

    fn next_significant_from(&self, from: usize) -> Option<char> {
        self.chars[from.min(self.chars.len())..]
            .iter()
            .copied()
            .find(|c| !c.is_whitespace())
    }

    /// Whether the cursor sits where a key or value may begin.
    fn at_token_start(&self) -> bool {
        matches!(self.last_significant(), None | Some('{' | '[' | ':' | ','))
    }

    fn drop_trailing_comma(&mut self) {
        let kept = self.out.trim_end().len();
        if self.out[..kept].ends_with(',') {
            self.out.truncate(kept - 1);
        }
    }

    fn double_quoted(&mut self) {
        self.emit('"');
        let mut escaped = false;
        while let Some(ch) = self.peek(0) {
            self.pos += 1;
            match ch {
                _ if escaped => {
                    escaped = false;
                    self.out.push(ch);
                }
                '\\' => {
                    escaped = true;
                    self.out.push(ch);
                }
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                '"' => {
                    self.out.push('"');
                    return;
                }
                _ => self.out.push(ch),
            }
        }
        // unterminated
        self.out.push('"');
    }

    fn single_quoted(&mut self) {
        let Some(close) = self.closing_single_quote() else {
            self.emit('\'');
            return;
        };
        self.out.push('"');
        for i in self.pos + 1..close {
            match self.chars[i] {
                '"' => self.out.push_str("\\\""),
                '\n' => self.out.push_str("\\n"),
                c => self.out.push(c),
            }
        }
        self.out.push('"');
        self.pos = close + 1;
    }

    /// A closing `'` is one followed by a structural character or the end,
    /// so apostrophes inside the string survive.
    fn closing_single_quote(&self) -> Option<usize> {
        let mut i = self.pos + 1;
        while i < self.chars.len() {
            match self.chars[i] {
                '\\' => i += 1,
                '\'' if matches!(
                    self.next_significant_from(i + 1),
                    None | Some('}' | ']' | ':' | ',')
                ) =>
                {
                    return Some(i)
                }
                _ => {}
            }
            i += 1;
        }
        None
    }

    fn comment(&mut self) {
        let block = self.peek(1) == Some('*');
        self.pos += 2;
        while let Some(ch) = self.peek(0) {
            if block && ch == '*' && self.peek(1) == Some('/') {
                self.pos += 2;
                return;
            }
            if !block && ch == '\n' {
                return;
            }
            self.pos += 1;
        }
    }

    fn word(&mut self) {
        let start = self.pos;
        let mut end = start;
        while end < self.chars.len() && (self.chars[end].is_alphanumeric() || self.chars[end] == '_') {
            end += 1;
        }
        let word: String = self.chars[start..end].iter().collect();

        let is_key = self.stack.last() == Some(&'{')
            && matches!(self.last_significant(), Some('{' | ','))
            && self.next_significant_from(end) == Some(':');

        if is_key {
            self.out.push('"');
            self.out.push_str(&word);
            self.out.push('"');
        } else {
            self.out.push_str(match word.as_str() {
                "True" => "true",
                "False" => "false",
                "None" => "null",
                other => other,
            });
        }
        self.pos = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn repaired(input: &str) -> Value {
        serde_json::from_str(&try_repair_json(input).unwrap()).unwrap()
    }

    #[test]
    fn trailing_commas_nested() {
        assert_eq!(
            repaired(r#"{"boxes": [1, 2,], "wages": 3,}"#),
            json!({"boxes": [1, 2], "wages": 3})
        );
    }

    #[test]
    fn single_quotes_with_apostrophe() {
        assert_eq!(
            repaired("{'employer_name': 'O'Brien's Bakery'}"),
            json!({"employer_name": "O'Brien's Bakery"})
        );
    }

    #[test]
    fn python_literals() {
        assert_eq!(
            repaired(r#"{"statutory": True, "third_party": False, "control_number": None}"#),
            json!({"statutory": true, "third_party": false, "control_number": null})
        );
    }

    #[test]
    fn python_literal_inside_string_untouched() {
        assert_eq!(
            repaired(r#"{"note": "None of the above", "x": None}"#),
            json!({"note": "None of the above", "x": null})
        );
    }

    #[test]
    fn bare_keys() {
        assert_eq!(
            repaired(r#"{employee_name: "Jane Doe", wages: 50000}"#),
            json!({"employee_name": "Jane Doe", "wages": 50000})
        );
    }

    #[test]
    fn comments_dropped() {
        assert_eq!(
            repaired("{\"wages\": /* box 1 */ 50000 // gross\n}"),
            json!({"wages": 50000})
        );
    }

    #[test]
    fn truncated_output_closed() {
        assert_eq!(
            repaired(r#"{"employer_name": "Acme", "boxes": [1, 2"#),
            json!({"employer_name": "Acme", "boxes": [1, 2]})
        );
        assert_eq!(
            repaired(r#"{"employer_name": "Acm"#),
            json!({"employer_name": "Acm"})
        );
    }

    #[test]
    fn raw_newline_in_string() {
        assert_eq!(
            repaired("{\"address\": \"1 Main St\nSpringfield\"}"),
            json!({"address": "1 Main St\nSpringfield"})
        );
    }

    #[test]
    fn valid_input_needs_no_repair() {
        assert!(try_repair_json(r#"{"text": "don't stop"}"#).is_none());
    }

    #[test]
    fn prose_is_unrepairable() {
        assert!(try_repair_json("I could not find any wages on this form.").is_none());
    }
}
