//! The Prompt Resolver from spec.md §4.7.
//!
//! Token scanning mirrors the teacher's templating approach in
//! `gateway` (`{{var}}` substitution over a flat context), generalized here
//! to the dotted-path lookup the spec calls for.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::data_loader::ChatMessage;

/// Segment-only tokens become available once a segmented transcript is in
/// play; API-only tokens once a structured API response is in play.
#[derive(Debug, Clone, Default)]
pub struct ResolverContext {
    pub audio_present: bool,
    pub transcript: Option<String>,
    pub llm_transcript: Option<String>,
    pub chat_messages: Option<Vec<ChatMessage>>,
    pub script_preference: Option<String>,
    pub language_hint: Option<String>,
    pub preserve_code_switching: Option<bool>,
    pub original_script: Option<String>,
    pub segment_count: Option<usize>,
    pub speaker_list: Option<Vec<String>>,
    pub time_windows: Option<String>,
    pub structured_output: Option<Value>,
    pub api_input: Option<Value>,
    pub api_rx: Option<Value>,
    pub llm_structured: Option<Value>,
    /// Backing store for any other `{{a.b.c}}` token, looked up by dotted
    /// path (spec.md §4.7 "Any remaining ... is resolved by dotted-path
    /// lookup into the API response mapping").
    pub api_response: Value,
}

#[derive(Debug, Clone)]
pub struct ResolvedPrompt {
    pub prompt: String,
    pub resolved_variables: BTreeMap<String, String>,
    pub unresolved_variables: Vec<String>,
}

fn format_chat_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", if m.is_user { "User" } else { "Bot" }, m.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lookup_dotted_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn resolve_token(token: &str, ctx: &ResolverContext) -> Option<String> {
    match token {
        "audio" => {
            if ctx.audio_present {
                Some("[Audio file attached]".to_string())
            } else {
                None
            }
        }
        "transcript" => ctx.transcript.clone(),
        "llm_transcript" => ctx.llm_transcript.clone(),
        "chat_transcript" => ctx.chat_messages.as_deref().map(format_chat_transcript),
        "script_preference" => ctx.script_preference.clone(),
        "language_hint" => ctx.language_hint.clone(),
        "preserve_code_switching" => ctx.preserve_code_switching.map(|b| b.to_string()),
        "original_script" => ctx.original_script.clone(),
        "segment_count" => ctx.segment_count.map(|n| n.to_string()),
        "speaker_list" => ctx.speaker_list.as_ref().map(|s| s.join(", ")),
        "time_windows" => ctx.time_windows.clone(),
        "structured_output" => ctx.structured_output.as_ref().map(stringify_value),
        "api_input" => ctx.api_input.as_ref().map(stringify_value),
        "api_rx" => ctx.api_rx.as_ref().map(stringify_value),
        "llm_structured" => ctx.llm_structured.as_ref().map(stringify_value),
        other => lookup_dotted_path(&ctx.api_response, other).map(|v| stringify_value(&v)),
    }
}

/// Finds every `{{ident}}` or `{{a.b.c}}` token in `prompt` and substitutes
/// whatever is resolvable, leaving the rest (`{{...}}` intact) so a human
/// reviewer can see what didn't resolve.
pub fn resolve_prompt(prompt: &str, ctx: &ResolverContext) -> ResolvedPrompt {
    let mut resolved_variables = BTreeMap::new();
    let mut unresolved_variables = Vec::new();
    let mut output = String::with_capacity(prompt.len());

    let bytes = prompt.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = prompt[i + 2..].find("}}") {
                let token = prompt[i + 2..i + 2 + end].trim();
                if is_valid_token(token) {
                    match resolve_token(token, ctx) {
                        Some(value) => {
                            output.push_str(&value);
                            resolved_variables.insert(token.to_string(), value);
                        }
                        None => {
                            output.push_str(&prompt[i..i + 2 + end + 2]);
                            unresolved_variables.push(token.to_string());
                        }
                    }
                    i += 2 + end + 2;
                    continue;
                }
            }
        }
        let ch = prompt[i..].chars().next().unwrap_or('\u{0}');
        output.push(ch);
        i += ch.len_utf8();
    }

    unresolved_variables.sort();
    unresolved_variables.dedup();

    ResolvedPrompt {
        prompt: output,
        resolved_variables,
        unresolved_variables,
    }
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .split('.')
            .all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_known_tokens_and_leaves_unknown_intact() {
        let ctx = ResolverContext {
            transcript: Some("hello world".to_string()),
            ..Default::default()
        };
        let resolved = resolve_prompt("Transcript: {{transcript}}, missing: {{nope}}", &ctx);
        assert_eq!(resolved.prompt, "Transcript: hello world, missing: {{nope}}");
        assert_eq!(resolved.resolved_variables.get("transcript").unwrap(), "hello world");
        assert_eq!(resolved.unresolved_variables, vec!["nope".to_string()]);
    }

    #[test]
    fn audio_token_left_unresolved_without_audio() {
        let ctx = ResolverContext::default();
        let resolved = resolve_prompt("{{audio}}", &ctx);
        assert_eq!(resolved.prompt, "{{audio}}");
        assert_eq!(resolved.unresolved_variables, vec!["audio".to_string()]);
    }

    #[test]
    fn dotted_path_lookup_into_api_response() {
        let ctx = ResolverContext {
            api_response: json!({"rx": {"followUp": "2 weeks"}}),
            ..Default::default()
        };
        let resolved = resolve_prompt("Follow up: {{rx.followUp}}", &ctx);
        assert_eq!(resolved.prompt, "Follow up: 2 weeks");
    }

    #[test]
    fn chat_transcript_formats_user_and_bot_lines() {
        let ctx = ResolverContext {
            chat_messages: Some(vec![
                ChatMessage {
                    thread_id: "t1".to_string(),
                    timestamp: chrono::Utc::now(),
                    is_user: true,
                    text: "Hi".to_string(),
                    has_image: false,
                    intent: None,
                    raw: Default::default(),
                },
                ChatMessage {
                    thread_id: "t1".to_string(),
                    timestamp: chrono::Utc::now(),
                    is_user: false,
                    text: "Hello!".to_string(),
                    has_image: false,
                    intent: None,
                    raw: Default::default(),
                },
            ]),
            ..Default::default()
        };
        let resolved = resolve_prompt("{{chat_transcript}}", &ctx);
        assert_eq!(resolved.prompt, "User: Hi\nBot: Hello!");
    }
}
