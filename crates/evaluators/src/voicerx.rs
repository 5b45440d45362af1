//! Voice-Rx prompt/schema catalog and response-shape parsing (spec.md
//! §4.5, §4.9). The LLM call itself goes through
//! [`evalengine_providers::LlmProvider`], which already repairs and parses
//! the raw JSON (`GenerateJsonResult`); this module only reshapes that
//! [`Value`] into the camelCase wire shapes the frontend expects, and holds
//! the default prompt/schema text the Seeder installs for new evaluators.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/evaluation_constants.py`
//! and `response_parser.py`.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Default prompt/schema text for the Voice-Rx normalization and critique
/// steps, installed by the Seeder (spec.md §9). These are distinct from the
/// user-authored `{{...}}` templates the runner resolves at call time —
/// they're the starting content a fresh evaluator is seeded with.
pub mod prompts {
    use serde_json::{json, Value};

    const SCRIPT_DISPLAY_NAMES: &[(&str, &str)] = &[
        ("latin", "Latin (Roman/English alphabet)"),
        ("devanagari", "Devanagari"),
        ("arabic", "Arabic"),
        ("bengali", "Bengali"),
        ("tamil", "Tamil"),
        ("telugu", "Telugu"),
        ("kannada", "Kannada"),
        ("malayalam", "Malayalam"),
        ("gujarati", "Gujarati"),
        ("gurmukhi", "Gurmukhi"),
        ("odia", "Odia"),
        ("sinhala", "Sinhala"),
        ("cjk", "CJK (Chinese/Japanese)"),
        ("hangul", "Hangul (Korean)"),
        ("hiragana", "Hiragana"),
        ("katakana", "Katakana"),
        ("cyrillic", "Cyrillic"),
        ("thai", "Thai"),
        ("hebrew", "Hebrew"),
        ("greek", "Greek"),
        ("myanmar", "Myanmar"),
        ("ethiopic", "Ethiopic"),
        ("khmer", "Khmer"),
        ("georgian", "Georgian"),
    ];

    /// Converts a script id to a human-readable name for use in prompts.
    /// `"auto"` and the empty string return `""`; the caller handles auto
    /// detection itself.
    pub fn resolve_script_name(script_id: &str) -> String {
        if script_id.is_empty() || script_id == "auto" {
            return String::new();
        }
        SCRIPT_DISPLAY_NAMES
            .iter()
            .find(|(id, _)| *id == script_id)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| title_case(script_id))
    }

    fn title_case(s: &str) -> String {
        s.split(['_', '-', ' '])
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    const NORMALIZATION_PROMPT: &str = "You are an expert multilingual transliteration specialist.\n\n\
TASK: Transliterate the following transcript into {target_script} script.\n\
{source_instruction}\n\
Source language: {language}\n\n\
CRITICAL: Every \"text\" field in your output MUST be written in {target_script} characters. Do NOT return text in the original script.\n\n\
RULES:\n\
1. Convert ALL text into {target_script} script using standard transliteration conventions for {language}\n\
2. Preserve proper nouns, technical/medical terminology, and widely-known abbreviations in their original form\n\
3. Keep speaker labels unchanged\n\
4. Keep timestamps unchanged (startTime, endTime, startSeconds, endSeconds)\n\
5. For code-switched content (multiple languages mixed), transliterate the {language} portions while keeping other language portions intact\n\
6. Return EXACT same JSON structure with same number of segments\n\
7. If the text is already in {target_script} script, return it unchanged\n\n\
INPUT TRANSCRIPT:\n\
{transcript_json}\n\n\
OUTPUT: Return the transliterated transcript in JSON format. ALL text MUST be in {target_script} script.";

    const NORMALIZATION_PROMPT_PLAIN: &str = "You are an expert multilingual transliteration specialist.\n\n\
TASK: Transliterate the following transcript text into {target_script} script.\n\
{source_instruction}\n\
Source language: {language}\n\n\
CRITICAL: Your output MUST be written entirely in {target_script} characters. Do NOT return text in the original script.\n\n\
RULES:\n\
1. Convert ALL text into {target_script} script using standard transliteration conventions for {language}\n\
2. Preserve proper nouns, technical/medical terminology, and widely-known abbreviations in their original form\n\
3. Keep speaker labels (e.g., [Doctor]:, [Patient]:) unchanged\n\
4. For code-switched content (multiple languages mixed), transliterate the {language} portions while keeping other language portions intact\n\
5. If the text is already in {target_script} script, return it unchanged\n\
6. Preserve line breaks and formatting\n\n\
INPUT TRANSCRIPT:\n\
{transcript_text}\n\n\
OUTPUT: Return the transliterated transcript text. ALL text MUST be in {target_script} script.";

    fn source_instruction(source_script: Option<&str>) -> String {
        match source_script {
            Some(s) if !s.is_empty() && s != "auto" => format!("Source script: {}", resolve_script_name(s)),
            _ => "Auto-detect the source script.".to_string(),
        }
    }

    pub fn build_normalization_prompt(target_script: &str, source_script: Option<&str>, language: &str, transcript_json: &str) -> String {
        NORMALIZATION_PROMPT
            .replace("{target_script}", &resolve_script_name(target_script))
            .replace("{source_instruction}", &source_instruction(source_script))
            .replace("{language}", language)
            .replace("{transcript_json}", transcript_json)
    }

    pub fn build_normalization_prompt_plain(target_script: &str, source_script: Option<&str>, language: &str, transcript_text: &str) -> String {
        NORMALIZATION_PROMPT_PLAIN
            .replace("{target_script}", &resolve_script_name(target_script))
            .replace("{source_instruction}", &source_instruction(source_script))
            .replace("{language}", language)
            .replace("{transcript_text}", transcript_text)
    }

    pub fn build_normalization_schema(target_script: &str) -> Value {
        let script_name = resolve_script_name(target_script);
        json!({
            "type": "object",
            "properties": {
                "segments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "speaker": {"type": "string"},
                            "text": {"type": "string", "description": format!("Transliterated text — MUST be in {script_name} script")},
                            "startTime": {"type": "string", "description": "Exact start time in HH:MM:SS format — must match the original transcript time window exactly, do not modify or approximate"},
                            "endTime": {"type": "string", "description": "Exact end time in HH:MM:SS format — must match the original transcript time window exactly, do not modify or approximate"},
                        },
                        "required": ["speaker", "text", "startTime", "endTime"],
                    },
                },
            },
            "required": ["segments"],
        })
    }

    pub fn build_normalization_schema_plain(target_script: &str) -> Value {
        let script_name = resolve_script_name(target_script);
        json!({
            "type": "object",
            "properties": {
                "normalized_text": {
                    "type": "string",
                    "description": format!("The full transcript text transliterated into {script_name} script"),
                },
            },
            "required": ["normalized_text"],
        })
    }

    pub const UPLOAD_EVALUATION_PROMPT_TEMPLATE: &str = "You are an expert medical transcription auditor acting as a JUDGE.\n\n\
TASK: SEGMENT-BY-SEGMENT TRANSCRIPT COMPARISON\n\n\
Below is a pre-built comparison table with {segment_count} segments. Each row pairs the ORIGINAL transcript segment (system under test) with the JUDGE transcript segment (your reference from Call 1). Both cover the EXACT same time window.\n\n\
Your job: For each segment, determine if there is a meaningful discrepancy. If the segments essentially match, do NOT include that segment in your output — only report segments with actual discrepancies.\n\n\
SEGMENT COMPARISON TABLE\n\n\
{comparison_table}\n\n\
SEVERITY CLASSIFICATION\n\n\
CRITICAL (Patient safety risk): medication dosage errors, wrong drug names, missed allergies/contraindications, incorrect procedure/diagnosis.\n\
MODERATE (Clinical meaning affected): speaker misattribution affecting context, missing medical history, incomplete symptom descriptions.\n\
MINOR (No clinical impact): filler words, punctuation, paraphrasing with same meaning.\n\n\
OUTPUT RULES\n\n\
- ONLY output segments that have a discrepancy (severity != none)\n\
- Segments not in your output are assumed to be matches\n\
- For each discrepancy segment, provide: segmentIndex, severity, discrepancy description, likelyCorrect (original/judge/both/unclear), confidence, and category\n\
- Provide an overallAssessment summarizing transcript quality";

    pub fn build_upload_evaluation_prompt(segment_count: usize, comparison_table: &str) -> String {
        UPLOAD_EVALUATION_PROMPT_TEMPLATE
            .replace("{segment_count}", &segment_count.to_string())
            .replace("{comparison_table}", comparison_table)
    }

    pub fn upload_evaluation_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "segments": {
                    "type": "array",
                    "description": "ONLY segments with discrepancies — omit matching segments",
                    "items": {
                        "type": "object",
                        "properties": {
                            "segmentIndex": {"type": "number", "description": "Zero-based index of segment"},
                            "severity": {"type": "string", "enum": ["minor", "moderate", "critical"], "description": "Clinical impact severity"},
                            "discrepancy": {"type": "string", "description": "Description of the difference"},
                            "likelyCorrect": {"type": "string", "enum": ["original", "judge", "both", "unclear"], "description": "Which transcript is likely correct"},
                            "confidence": {"type": "string", "enum": ["high", "medium", "low"], "description": "Confidence in the determination"},
                            "category": {"type": "string", "description": "Error category (e.g., dosage, speaker, terminology)"},
                        },
                        "required": ["segmentIndex", "severity", "discrepancy", "likelyCorrect"],
                    },
                },
                "overallAssessment": {"type": "string", "description": "Summary of overall transcript quality"},
            },
            "required": ["segments", "overallAssessment"],
        })
    }

    pub const API_EVALUATION_PROMPT_TEMPLATE: &str = "You are an expert Medical Informatics Auditor evaluating rx JSON accuracy.\n\n\
TASK: JUDGE PRE-ALIGNED FIELD COMPARISONS\n\n\
Below is a server-built comparison. Section 1 compares transcripts. Section 2 lists individual structured-data fields, already matched and aligned for you.\n\n\
{comparison}\n\n\
YOUR JOB\n\n\
For EACH field entry in the structured data section, judge whether the API value and Judge value agree in CLINICAL MEANING (not exact string match), classify severity (none/minor/moderate/critical), write a brief critique, assign confidence, and quote a short evidence snippet from the API transcript when possible. For the TRANSCRIPT section, summarize whether transcripts are semantically equivalent and list significant discrepancies with severity.\n\n\
OUTPUT RULES\n\n\
- Output ONE entry per field in structuredComparison.fields\n\
- Use the EXACT fieldPath string from the comparison data\n\
- Copy apiValue and judgeValue as-is from the comparison\n\
- Provide an overallAssessment summarizing API quality";

    pub fn build_api_evaluation_prompt(comparison: &str) -> String {
        API_EVALUATION_PROMPT_TEMPLATE.replace("{comparison}", comparison)
    }

    pub fn api_evaluation_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "transcriptComparison": {
                    "type": "object",
                    "properties": {
                        "summary": {"type": "string", "description": "Summary of transcript comparison"},
                        "discrepancies": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "description": {"type": "string"},
                                    "severity": {"type": "string", "enum": ["minor", "moderate", "critical"]},
                                },
                                "required": ["description", "severity"],
                            },
                        },
                    },
                    "required": ["summary"],
                },
                "structuredComparison": {
                    "type": "object",
                    "properties": {
                        "fields": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "fieldPath": {"type": "string", "description": "JSON path to the field"},
                                    "apiValue": {"type": "string", "description": "Exact string value from the comparison data above"},
                                    "judgeValue": {"type": "string", "description": "Exact string value from the comparison data above"},
                                    "match": {"type": "boolean", "description": "Whether values match"},
                                    "critique": {"type": "string", "description": "Explanation of difference or match"},
                                    "severity": {"type": "string", "enum": ["none", "minor", "moderate", "critical"]},
                                    "confidence": {"type": "string", "enum": ["low", "medium", "high"]},
                                    "evidenceSnippet": {"type": "string", "description": "Short quote from the API transcript supporting this verdict"},
                                },
                                "required": ["fieldPath", "apiValue", "judgeValue", "match", "critique", "severity"],
                            },
                        },
                    },
                    "required": ["fields"],
                },
                "overallAssessment": {"type": "string", "description": "Overall assessment of API system quality"},
            },
            "required": ["transcriptComparison", "structuredComparison", "overallAssessment"],
        })
    }
}

fn value_to_display_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Reshapes a Call-1 transcription response into the `TranscriptData` shape
/// (spec.md §4.9 Voice-Rx upload flow), with fresh `segments`/`fullTranscript`
/// derived the same way the original builds them from the judge's raw JSON.
pub fn parse_transcript_response(parsed: &Value, generated_at: DateTime<Utc>) -> Value {
    let raw_segments = parsed.get("segments").and_then(Value::as_array).cloned().unwrap_or_default();

    let segments: Vec<Value> = raw_segments
        .iter()
        .enumerate()
        .map(|(idx, seg)| {
            let speaker = seg.get("speaker").map(value_to_display_string).unwrap_or_else(|| "Unknown".to_string());
            let text = seg.get("text").map(value_to_display_string).unwrap_or_default();
            let start_time = seg
                .get("startTime")
                .or_else(|| seg.get("start_time"))
                .map(value_to_display_string)
                .unwrap_or_else(|| idx.to_string());
            let end_time = seg
                .get("endTime")
                .or_else(|| seg.get("end_time"))
                .map(value_to_display_string)
                .unwrap_or_else(|| (idx + 1).to_string());
            let start_seconds = seg.get("startTime").and_then(Value::as_f64);
            let end_seconds = seg.get("endTime").and_then(Value::as_f64);
            json!({
                "speaker": speaker,
                "text": text,
                "startTime": start_time,
                "endTime": end_time,
                "startSeconds": start_seconds,
                "endSeconds": end_seconds,
            })
        })
        .collect();

    let full_transcript = segments
        .iter()
        .map(|s| format!("[{}]: {}", s["speaker"].as_str().unwrap_or(""), s["text"].as_str().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n");

    let now = generated_at.to_rfc3339();
    json!({
        "formatVersion": "1.0",
        "generatedAt": now,
        "metadata": {
            "recordingId": "ai-generated",
            "jobId": format!("eval-{}", generated_at.timestamp_millis()),
            "processedAt": now,
        },
        "speakerMapping": {},
        "segments": segments,
        "fullTranscript": full_transcript,
    })
}

fn validate_severity(v: Option<&str>) -> &'static str {
    match v.map(str::to_lowercase).as_deref() {
        Some("minor") => "minor",
        Some("moderate") => "moderate",
        Some("critical") => "critical",
        _ => "none",
    }
}

fn validate_likely_correct(v: Option<&str>) -> &'static str {
    match v.map(str::to_lowercase).as_deref() {
        Some("original") => "original",
        Some("judge") => "judge",
        Some("both") => "both",
        _ => "unclear",
    }
}

fn validate_confidence(v: Option<&str>) -> Option<&'static str> {
    match v.map(str::to_lowercase).as_deref() {
        Some("high") => Some("high"),
        Some("medium") => Some("medium"),
        Some("low") => Some("low"),
        _ => None,
    }
}

/// Reshapes a Call-2 critique response into the `EvaluationCritique` shape,
/// back-filling missing `originalText`/`judgeText` from the source segments
/// and computing match/severity statistics server-side from `total_segments`
/// (spec.md §4.9 "the match count is the server's arithmetic, not the
/// judge's").
pub fn parse_critique_response(
    parsed: &Value,
    original_segments: &[Value],
    llm_segments: &[Value],
    model: &str,
    total_segments: i64,
    generated_at: DateTime<Utc>,
) -> Value {
    let raw_segments = parsed.get("segments").and_then(Value::as_array).cloned().unwrap_or_default();

    let segments: Vec<Value> = raw_segments
        .iter()
        .enumerate()
        .map(|(idx, seg)| {
            let segment_index = seg.get("segmentIndex").and_then(Value::as_i64).unwrap_or(idx as i64);

            let mut original_text = seg.get("originalText").and_then(Value::as_str).unwrap_or("").to_string();
            if original_text.is_empty() {
                if let Some(s) = original_segments
                    .get(usize::try_from(segment_index).unwrap_or(usize::MAX))
                    .and_then(|s| s.get("text"))
                    .and_then(Value::as_str)
                {
                    original_text = s.to_string();
                }
            }

            let mut judge_text = seg
                .get("judgeText")
                .or_else(|| seg.get("llmText"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            if judge_text.is_empty() {
                if let Some(s) = llm_segments
                    .get(usize::try_from(segment_index).unwrap_or(usize::MAX))
                    .and_then(|s| s.get("text"))
                    .and_then(Value::as_str)
                {
                    judge_text = s.to_string();
                }
            }

            let discrepancy = seg.get("discrepancy").or_else(|| seg.get("critique")).and_then(Value::as_str).unwrap_or("");

            json!({
                "segmentIndex": segment_index,
                "originalText": original_text,
                "judgeText": judge_text,
                "discrepancy": discrepancy,
                "likelyCorrect": validate_likely_correct(seg.get("likelyCorrect").and_then(Value::as_str)),
                "confidence": validate_confidence(seg.get("confidence").and_then(Value::as_str)),
                "severity": validate_severity(seg.get("severity").and_then(Value::as_str)),
                "category": seg.get("category").and_then(Value::as_str),
            })
        })
        .collect();

    let assessment_refs: Vec<Value> = parsed
        .get("assessmentReferences")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| {
                    let idx = r.get("segmentIndex").and_then(Value::as_i64)?;
                    Some(json!({
                        "segmentIndex": idx,
                        "timeWindow": r.get("timeWindow").and_then(Value::as_str).unwrap_or(""),
                        "issue": r.get("issue").and_then(Value::as_str).unwrap_or(""),
                        "severity": validate_severity(r.get("severity").and_then(Value::as_str)),
                    }))
                })
                .collect()
        })
        .unwrap_or_default();
    let assessment_refs = if assessment_refs.is_empty() { Value::Null } else { Value::Array(assessment_refs) };

    let actual_total = if total_segments > 0 {
        total_segments
    } else {
        let m = original_segments.len().max(llm_segments.len());
        if m > 0 {
            m as i64
        } else {
            segments.len() as i64
        }
    };
    let critique_indices: std::collections::HashSet<i64> =
        segments.iter().filter_map(|s| s.get("segmentIndex").and_then(Value::as_i64)).collect();
    let match_count = actual_total - critique_indices.len() as i64;

    let count_where = |key: &str, want: &str| segments.iter().filter(|s| s.get(key).and_then(Value::as_str) == Some(want)).count() as i64;

    let stats = json!({
        "totalSegments": actual_total,
        "criticalCount": count_where("severity", "critical"),
        "moderateCount": count_where("severity", "moderate"),
        "minorCount": count_where("severity", "minor"),
        "matchCount": match_count,
        "originalCorrectCount": count_where("likelyCorrect", "original"),
        "judgeCorrectCount": count_where("likelyCorrect", "judge"),
        "unclearCount": count_where("likelyCorrect", "unclear"),
    });

    json!({
        "segments": segments,
        "overallAssessment": parsed.get("overallAssessment").and_then(Value::as_str).unwrap_or(""),
        "assessmentReferences": assessment_refs,
        "statistics": stats,
        "generatedAt": generated_at.to_rfc3339(),
        "model": model,
    })
}

/// Reshapes the API-flow critique response. The judge's output schema is
/// user-configured, so unlike the upload flow this keeps the full parsed
/// payload under `rawOutput` alongside the well-known keys the frontend
/// renders directly.
pub fn parse_api_critique_response(parsed: &Value, model: &str, generated_at: DateTime<Utc>) -> Value {
    let overall = parsed
        .get("overallAssessment")
        .or_else(|| parsed.get("summary"))
        .or_else(|| parsed.get("overall_assessment"))
        .and_then(Value::as_str)
        .unwrap_or("");

    json!({
        "transcriptComparison": parsed.get("transcriptComparison").cloned().unwrap_or(Value::Null),
        "structuredComparison": parsed.get("structuredComparison").cloned().unwrap_or(Value::Null),
        "overallAssessment": overall,
        "generatedAt": generated_at.to_rfc3339(),
        "model": model,
        "rawOutput": parsed.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn resolves_known_and_unknown_script_ids() {
        assert_eq!(prompts::resolve_script_name("devanagari"), "Devanagari");
        assert_eq!(prompts::resolve_script_name("auto"), "");
        assert_eq!(prompts::resolve_script_name(""), "");
        assert_eq!(prompts::resolve_script_name("klingon"), "Klingon");
    }

    #[test]
    fn parses_transcript_segments_and_builds_full_transcript() {
        let parsed = json!({
            "segments": [
                {"speaker": "Doctor", "text": "Hello", "startTime": 0, "endTime": 2},
                {"speaker": "Patient", "text": "Hi doc", "startTime": 2, "endTime": 4},
            ]
        });
        let result = parse_transcript_response(&parsed, ts());
        assert_eq!(result["fullTranscript"], "[Doctor]: Hello\n[Patient]: Hi doc");
        assert_eq!(result["segments"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn critique_match_count_derived_from_total_segments() {
        let parsed = json!({
            "segments": [
                {"segmentIndex": 1, "severity": "critical", "discrepancy": "wrong dose", "likelyCorrect": "original"},
            ],
            "overallAssessment": "mostly fine",
        });
        let result = parse_critique_response(&parsed, &[], &[], "gemini-pro", 5, ts());
        assert_eq!(result["statistics"]["totalSegments"], 5);
        assert_eq!(result["statistics"]["matchCount"], 4);
        assert_eq!(result["statistics"]["criticalCount"], 1);
    }

    #[test]
    fn unknown_severity_values_default_to_none() {
        assert_eq!(validate_severity(Some("bogus")), "none");
        assert_eq!(validate_severity(None), "none");
        assert_eq!(validate_likely_correct(Some("JUDGE")), "judge");
        assert_eq!(validate_confidence(Some("extreme")), None);
    }

    #[test]
    fn api_critique_falls_back_through_well_known_keys() {
        let parsed = json!({"summary": "looks good", "transcriptComparison": {"summary": "ok"}});
        let result = parse_api_critique_response(&parsed, "gpt-4o", ts());
        assert_eq!(result["overallAssessment"], "looks good");
        assert_eq!(result["model"], "gpt-4o");
    }
}
