//! The Deep Comparator from spec.md §4.6.
//!
//! A direct Rust port of
//! `examples/original_source/backend/app/services/evaluators/comparison_builder.py`:
//! the field configuration tables, the normalized-key index-and-union
//! alignment, and the `[N] FIELD: ... ITEM: ... API: ... JUDGE: ... HINT:
//! ...` prompt format are all carried unchanged.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchHint {
    Match,
    Mismatch,
    ApiOnly,
    JudgeOnly,
}

impl MatchHint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Mismatch => "mismatch",
            Self::ApiOnly => "api_only",
            Self::JudgeOnly => "judge_only",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComparisonEntry {
    pub field_path: String,
    pub api_value: String,
    pub judge_value: String,
    pub match_hint: MatchHint,
    pub item_name: Option<String>,
}

struct ArrayFieldConfig {
    name: &'static str,
    key: &'static str,
    fields: &'static [&'static str],
}

const ARRAY_FIELD_CONFIG: &[ArrayFieldConfig] = &[
    ArrayFieldConfig {
        name: "medications",
        key: "name",
        fields: &["dosage", "frequency", "duration", "quantity", "schedule", "notes"],
    },
    ArrayFieldConfig {
        name: "symptoms",
        key: "name",
        fields: &["notes", "duration", "severity"],
    },
    ArrayFieldConfig {
        name: "diagnosis",
        key: "name",
        fields: &["notes", "since", "status"],
    },
    ArrayFieldConfig {
        name: "medicalHistory",
        key: "name",
        fields: &["type", "notes", "duration", "relation"],
    },
    ArrayFieldConfig {
        name: "labResults",
        key: "testname",
        fields: &["value"],
    },
    ArrayFieldConfig {
        name: "labInvestigation",
        key: "testname",
        fields: &[],
    },
];

const OBJECT_FIELD_CONFIG: &[(&str, &[&str])] = &[(
    "vitalsAndBodyComposition",
    &[
        "bloodPressure",
        "pulse",
        "temperature",
        "weight",
        "height",
        "spo2",
        "respRate",
        "ofc",
    ],
)];

const SCALAR_FIELDS: &[&str] = &["followUp"];
const STRING_ARRAY_FIELDS: &[&str] = &["advice"];

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "(empty)".to_string(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                "(empty)".to_string()
            } else {
                trimmed.to_string()
            }
        }
        Some(v @ (Value::Array(_) | Value::Object(_))) => {
            let is_empty = match v {
                Value::Array(a) => a.is_empty(),
                Value::Object(o) => o.is_empty(),
                _ => false,
            };
            if is_empty {
                "(empty)".to_string()
            } else {
                v.to_string()
            }
        }
        Some(other) => other.to_string(),
    }
}

fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// `{normalized_key: (array_position, item)}`, built in input order so the
/// first occurrence of a repeated key wins (matches the Python dict-build
/// semantics, where a later duplicate key would overwrite — but
/// `comparison_builder.py` iterates forward so the *last* occurrence wins
/// for duplicate keys; we replicate that exactly below).
fn build_index(items: &[Value], key_field: &str) -> Vec<(String, usize, &Value)> {
    let mut index: Vec<(String, usize, &Value)> = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if let Value::Object(map) = item {
            if let Some(raw_key) = map.get(key_field) {
                let raw_key_str = match raw_key {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                if !raw_key_str.is_empty() {
                    let norm = normalize_key(&raw_key_str);
                    if let Some(existing) = index.iter_mut().find(|(k, _, _)| *k == norm) {
                        existing.1 = i;
                        existing.2 = item;
                    } else {
                        index.push((norm, i, item));
                    }
                }
            }
        }
    }
    index
}

fn lookup<'a>(index: &'a [(String, usize, &'a Value)], key: &str) -> Option<(usize, &'a Value)> {
    index
        .iter()
        .find(|(k, _, _)| k == key)
        .map(|(_, i, item)| (*i, *item))
}

fn compare_array_field(config: &ArrayFieldConfig, api_items: &[Value], judge_items: &[Value]) -> Vec<ComparisonEntry> {
    let mut entries = Vec::new();

    let api_index = build_index(api_items, config.key);
    let judge_index = build_index(judge_items, config.key);

    // Union preserving API-first order, then judge-only keys (spec.md §4.6).
    let mut all_keys: Vec<String> = Vec::new();
    for (k, _, _) in &api_index {
        if !all_keys.contains(k) {
            all_keys.push(k.clone());
        }
    }
    for (k, _, _) in &judge_index {
        if !all_keys.contains(k) {
            all_keys.push(k.clone());
        }
    }

    for norm_key in all_keys {
        let api_entry = lookup(&api_index, &norm_key);
        let judge_entry = lookup(&judge_index, &norm_key);

        let api_idx = api_entry.map(|(i, _)| i);
        let api_item = api_entry.map(|(_, v)| v);
        let judge_item = judge_entry.map(|(_, v)| v);

        let display_key = api_item
            .and_then(|v| v.get(config.key))
            .or_else(|| judge_item.and_then(|v| v.get(config.key)))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| norm_key.clone());

        match (api_item, judge_item) {
            (Some(api_item), Some(judge_item)) => {
                let idx = api_idx.unwrap_or(0);
                if !config.fields.is_empty() {
                    for sub_field in config.fields {
                        let api_val = stringify(api_item.get(*sub_field));
                        let judge_val = stringify(judge_item.get(*sub_field));
                        let hint = if api_val == judge_val {
                            MatchHint::Match
                        } else {
                            MatchHint::Mismatch
                        };
                        entries.push(ComparisonEntry {
                            field_path: format!("rx.{}[{}].{}", config.name, idx, sub_field),
                            api_value: api_val,
                            judge_value: judge_val,
                            match_hint: hint,
                            item_name: Some(display_key.clone()),
                        });
                    }
                } else {
                    entries.push(ComparisonEntry {
                        field_path: format!("rx.{}[{}]", config.name, idx),
                        api_value: stringify(api_item.get(config.key)),
                        judge_value: stringify(judge_item.get(config.key)),
                        match_hint: MatchHint::Match,
                        item_name: Some(display_key.clone()),
                    });
                }
            }
            (Some(_api_item), None) => {
                let idx = api_idx.unwrap_or(0);
                entries.push(ComparisonEntry {
                    field_path: format!("rx.{}[{}]", config.name, idx),
                    api_value: display_key.clone(),
                    judge_value: "(not found)".to_string(),
                    match_hint: MatchHint::ApiOnly,
                    item_name: Some(display_key.clone()),
                });
            }
            (None, Some(_judge_item)) => {
                entries.push(ComparisonEntry {
                    field_path: format!("rx.{}[{}]", config.name, display_key),
                    api_value: "(not found)".to_string(),
                    judge_value: display_key.clone(),
                    match_hint: MatchHint::JudgeOnly,
                    item_name: Some(display_key.clone()),
                });
            }
            (None, None) => {}
        }
    }

    entries
}

fn compare_object_field(name: &str, api_obj: &Value, judge_obj: &Value, sub_keys: &[&str]) -> Vec<ComparisonEntry> {
    sub_keys
        .iter()
        .map(|sub_key| {
            let api_val = stringify(api_obj.get(*sub_key));
            let judge_val = stringify(judge_obj.get(*sub_key));
            let hint = if api_val == judge_val {
                MatchHint::Match
            } else {
                MatchHint::Mismatch
            };
            ComparisonEntry {
                field_path: format!("rx.{name}.{sub_key}"),
                api_value: api_val,
                judge_value: judge_val,
                match_hint: hint,
                item_name: None,
            }
        })
        .collect()
}

fn compare_scalar_field(name: &str, api_val: Option<&Value>, judge_val: Option<&Value>) -> ComparisonEntry {
    let a = stringify(api_val);
    let j = stringify(judge_val);
    let hint = if a == j { MatchHint::Match } else { MatchHint::Mismatch };
    ComparisonEntry {
        field_path: format!("rx.{name}"),
        api_value: a,
        judge_value: j,
        match_hint: hint,
        item_name: None,
    }
}

fn compare_string_array_field(name: &str, api_items: &[Value], judge_items: &[Value]) -> Vec<ComparisonEntry> {
    let max_len = api_items.len().max(judge_items.len());
    (0..max_len)
        .map(|i| {
            let api_val = api_items.get(i).map(Some).map(stringify).unwrap_or_else(|| "(empty)".to_string());
            let judge_val = judge_items.get(i).map(Some).map(stringify).unwrap_or_else(|| "(empty)".to_string());
            let hint = if api_val == judge_val { MatchHint::Match } else { MatchHint::Mismatch };
            ComparisonEntry {
                field_path: format!("rx.{name}[{i}]"),
                api_value: api_val,
                judge_value: judge_val,
                match_hint: hint,
                item_name: None,
            }
        })
        .collect()
}

fn as_array(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn as_object(value: Option<&Value>) -> Value {
    match value {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Object(serde_json::Map::new()),
    }
}

/// Main entry point: returns a flat, ordered list of field-level diffs
/// between the system-under-test's output (`api_rx`) and the judge's
/// reference output (`judge_rx`).
pub fn build_deep_comparison(api_rx: &Value, judge_rx: &Value) -> Vec<ComparisonEntry> {
    let mut entries = Vec::new();

    for config in ARRAY_FIELD_CONFIG {
        let api_items = as_array(api_rx.get(config.name));
        let judge_items = as_array(judge_rx.get(config.name));
        if !api_items.is_empty() || !judge_items.is_empty() {
            entries.extend(compare_array_field(config, &api_items, &judge_items));
        }
    }

    for (name, sub_keys) in OBJECT_FIELD_CONFIG {
        let api_obj = as_object(api_rx.get(*name));
        let judge_obj = as_object(judge_rx.get(*name));
        let api_is_empty = api_obj.as_object().map(serde_json::Map::is_empty).unwrap_or(true);
        let judge_is_empty = judge_obj.as_object().map(serde_json::Map::is_empty).unwrap_or(true);
        if !api_is_empty || !judge_is_empty {
            entries.extend(compare_object_field(name, &api_obj, &judge_obj, sub_keys));
        }
    }

    for name in SCALAR_FIELDS {
        let api_val = api_rx.get(*name);
        let judge_val = judge_rx.get(*name);
        if api_val.is_some() || judge_val.is_some() {
            entries.push(compare_scalar_field(name, api_val, judge_val));
        }
    }

    for name in STRING_ARRAY_FIELDS {
        let api_items = as_array(api_rx.get(*name));
        let judge_items = as_array(judge_rx.get(*name));
        if !api_items.is_empty() || !judge_items.is_empty() {
            entries.extend(compare_string_array_field(name, &api_items, &judge_items));
        }
    }

    entries
}

/// Formats entries into the structured text injected verbatim into the
/// judge prompt (spec.md §4.6).
pub fn format_comparison_for_prompt(entries: &[ComparisonEntry]) -> String {
    if entries.is_empty() {
        return "(no structured data fields to compare)".to_string();
    }

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let mut block = format!("[{}] FIELD: {}\n", i + 1, entry.field_path);
            if let Some(item_name) = &entry.item_name {
                block.push_str(&format!("    ITEM:  {item_name}\n"));
            }
            block.push_str(&format!(
                "    API:   {}\n    JUDGE: {}\n    HINT:  {}",
                entry.api_value,
                entry.judge_value,
                entry.match_hint.as_str()
            ));
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matched_medication_with_mismatched_dosage() {
        let api_rx = json!({
            "medications": [{"name": "Amoxicillin", "dosage": "500mg"}]
        });
        let judge_rx = json!({
            "medications": [{"name": "amoxicillin ", "dosage": "500 mg"}]
        });

        let entries = build_deep_comparison(&api_rx, &judge_rx);
        let dosage_entry = entries
            .iter()
            .find(|e| e.field_path == "rx.medications[0].dosage")
            .expect("dosage entry present");
        assert_eq!(dosage_entry.match_hint, MatchHint::Mismatch);
        assert_eq!(dosage_entry.api_value, "500mg");
        assert_eq!(dosage_entry.judge_value, "500 mg");

        let name_entries: Vec<_> = entries
            .iter()
            .filter(|e| e.field_path.starts_with("rx.medications[0]"))
            .collect();
        assert!(!name_entries.is_empty());
    }

    #[test]
    fn api_only_and_judge_only_entries_use_not_found_sentinel() {
        let api_rx = json!({"medications": [{"name": "Paracetamol", "dosage": "500mg"}]});
        let judge_rx = json!({"medications": [{"name": "Ibuprofen", "dosage": "400mg"}]});

        let entries = build_deep_comparison(&api_rx, &judge_rx);
        let api_only = entries.iter().find(|e| e.match_hint == MatchHint::ApiOnly).expect("api_only");
        assert_eq!(api_only.judge_value, "(not found)");
        let judge_only = entries.iter().find(|e| e.match_hint == MatchHint::JudgeOnly).expect("judge_only");
        assert_eq!(judge_only.api_value, "(not found)");
    }

    #[test]
    fn string_array_padding_uses_empty_marker() {
        let api_rx = json!({"advice": ["Drink water", "Rest"]});
        let judge_rx = json!({"advice": ["Drink water"]});
        let entries = build_deep_comparison(&api_rx, &judge_rx);
        let second = entries.iter().find(|e| e.field_path == "rx.advice[1]").expect("second advice entry");
        assert_eq!(second.judge_value, "(empty)");
        assert_eq!(second.match_hint, MatchHint::Mismatch);
    }

    #[test]
    fn no_fields_present_is_empty() {
        let entries = build_deep_comparison(&json!({}), &json!({}));
        assert!(entries.is_empty());
        assert_eq!(format_comparison_for_prompt(&entries), "(no structured data fields to compare)");
    }
}
