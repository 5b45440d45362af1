//! JSON extraction/repair for `generate_json` responses (spec.md §4.3).
//!
//! LLM structured-output modes still occasionally truncate output mid-string
//! (token limits, provider timeouts). The recovery ladder is: direct parse,
//! then extract the outermost balanced `{...}` block, then repair
//! truncation by closing an unterminated string and any unbalanced `]`/`}`
//! in the order they were opened.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct RepairedJson {
    pub value: Value,
    /// Set once a repair pass (beyond plain extraction) was needed, so
    /// callers can flag the result as lower-confidence.
    pub was_repaired: bool,
}

/// Scans for the first `{` and returns the substring up to its matching
/// `}`, respecting string literals and escapes. Returns `None` if no
/// opening brace is found or braces never balance even after scanning to
/// the end of input.
fn extract_outermost_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Closes an unterminated string, then appends closing brackets for any
/// structure left open, in the order those structures were opened (a stack
/// of `{`/`[`).
fn repair_truncated(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut repaired = text.to_string();
    if in_string {
        repaired.push('"');
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Runs the full ladder: direct parse, then brace-extraction, then
/// truncation repair. Returns the parsed value and whether repair beyond
/// plain extraction was needed.
pub fn parse_json_response(text: &str) -> Result<RepairedJson, String> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(RepairedJson {
            value,
            was_repaired: false,
        });
    }

    if let Some(extracted) = extract_outermost_object(text) {
        if let Ok(value) = serde_json::from_str::<Value>(extracted) {
            return Ok(RepairedJson {
                value,
                was_repaired: false,
            });
        }

        let repaired_text = repair_truncated(extracted);
        if let Ok(value) = serde_json::from_str::<Value>(&repaired_text) {
            return Ok(RepairedJson {
                value,
                was_repaired: true,
            });
        }
    }

    let repaired_text = repair_truncated(text);
    serde_json::from_str::<Value>(&repaired_text)
        .map(|value| RepairedJson {
            value,
            was_repaired: true,
        })
        .map_err(|e| format!("could not parse or repair JSON response: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json_directly() {
        let repaired = parse_json_response(r#"{"a": 1}"#).expect("parses");
        assert!(!repaired.was_repaired);
        assert_eq!(repaired.value["a"], 1);
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let repaired =
            parse_json_response("Here is the result:\n```json\n{\"a\": 1, \"b\": [1,2]}\n```\nThanks!").expect("parses");
        assert!(!repaired.was_repaired);
        assert_eq!(repaired.value["b"], serde_json::json!([1, 2]));
    }

    #[test]
    fn repairs_truncated_string_and_unbalanced_brackets() {
        let truncated = r#"{"reasoning": "the user said hi and then the response trail"#;
        let repaired = parse_json_response(truncated).expect("repairs");
        assert!(repaired.was_repaired);
        assert!(repaired.value["reasoning"].as_str().unwrap().starts_with("the user said hi"));
    }

    #[test]
    fn repairs_truncated_nested_array() {
        let truncated = r#"{"items": [{"name": "a"}, {"name": "b"#;
        let repaired = parse_json_response(truncated).expect("repairs");
        assert!(repaired.was_repaired);
        assert_eq!(repaired.value["items"][0]["name"], "a");
    }

    #[test]
    fn unparseable_garbage_fails() {
        assert!(parse_json_response("not json at all, no braces").is_err());
    }
}
