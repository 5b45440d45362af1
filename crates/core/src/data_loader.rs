//! The Data Loader from spec.md §4.4.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/data_loader.py`
//! and `.../models.py`'s `ChatMessage`/`ConversationThread`. CSV parsing
//! uses the teacher's `csv` crate rather than pandas; timestamp parsing
//! keeps the original's ISO-8601-first, day-first-fallback strategy.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

const MEAL_SUMMARY_INDICATORS: &[&str] = &["total calories", "kcal", "meal summary", "consumed at"];

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    /// `true` for the user turn, `false` for the bot turn — drives
    /// `{{chat_transcript}}` formatting (spec.md §4.7).
    pub is_user: bool,
    pub text: String,
    pub has_image: bool,
    pub intent: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCsvRow {
    timestamp: String,
    user_id: String,
    session_id: String,
    thread_id: String,
    #[serde(default)]
    response_id: Option<String>,
    query_text: String,
    intent_detected: String,
    #[serde(default)]
    intent_query_type: Option<String>,
    final_response_message: String,
    has_image: i32,
    #[serde(default)]
    error_message: Option<String>,
}

/// One parsed CSV row: the user query and the bot's final response are
/// modeled as a single record (matching the original's `ChatMessage`
/// dataclass) but exposed to downstream code as two `ChatMessage` turns so
/// prompt formatting ("User:"/"Bot:" lines) is a plain iteration.
#[derive(Debug, Clone)]
pub struct ChatRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub session_id: String,
    pub thread_id: String,
    pub response_id: String,
    pub query_text: String,
    pub intent_detected: String,
    pub intent_query_type: String,
    pub final_response_message: String,
    pub has_image: bool,
    pub error_message: Option<String>,
}

impl ChatRecord {
    pub fn is_meal_summary(&self) -> bool {
        let response = self.final_response_message.to_lowercase();
        MEAL_SUMMARY_INDICATORS.iter().any(|indicator| response.contains(indicator))
    }

    pub fn is_confirmation(&self) -> bool {
        let query = self.query_text.to_lowercase();
        query.contains("yes, log this meal") || query.contains("confirm")
    }
}

#[derive(Debug, Clone)]
pub struct ConversationThread {
    pub thread_id: String,
    pub user_id: String,
    pub messages: Vec<ChatRecord>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub message_count: usize,
    pub has_errors: bool,
}

impl ChatRecord {
    /// Splits one CSV row into the two conversational turns the Prompt
    /// Resolver's `{{chat_transcript}}` token formats as "User:"/"Bot:"
    /// lines (spec.md §4.7).
    pub fn as_turns(&self) -> [ChatMessage; 2] {
        [
            ChatMessage {
                thread_id: self.thread_id.clone(),
                timestamp: self.timestamp,
                is_user: true,
                text: self.query_text.clone(),
                has_image: self.has_image,
                intent: None,
                raw: Value::Null,
            },
            ChatMessage {
                thread_id: self.thread_id.clone(),
                timestamp: self.timestamp,
                is_user: false,
                text: self.final_response_message.clone(),
                has_image: false,
                intent: Some(self.intent_detected.clone()),
                raw: Value::Null,
            },
        ]
    }
}

impl ConversationThread {
    pub fn as_chat_messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().flat_map(ChatRecord::as_turns).collect()
    }

    pub fn intents(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.intent_detected.as_str()).collect()
    }

    /// Last message contains "successfully" or "logged" (spec.md §4.4).
    pub fn is_successful(&self) -> bool {
        if self.has_errors {
            return false;
        }
        let Some(last) = self.messages.last() else {
            return false;
        };
        let response = last.final_response_message.to_lowercase();
        response.contains("successfully") || response.contains("logged")
    }

    pub fn meal_summary_messages(&self) -> Vec<&ChatRecord> {
        self.messages.iter().filter(|m| m.is_meal_summary()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoaderStatistics {
    pub total_messages: usize,
    pub total_threads: usize,
    pub total_users: usize,
    pub intent_distribution: BTreeMap<String, usize>,
    pub messages_with_images: usize,
    pub messages_with_errors: usize,
}

/// Tries `DateTime::parse_from_rfc3339` first (ISO 8601 with offset), then
/// a bare `NaiveDateTime` ISO form, then day-first `DD/MM/YY H:MM` style
/// formats — mirroring `_parse_timestamp`'s `fromisoformat` → `dayfirst`
/// fallback chain.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(DateTime::from_naive_utc_and_offset(parsed, Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::from_naive_utc_and_offset(parsed, Utc));
    }
    const DAY_FIRST_FORMATS: &[&str] = &["%d/%m/%Y %H:%M", "%d/%m/%y %H:%M", "%d-%m-%Y %H:%M:%S"];
    for format in DAY_FIRST_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(DateTime::from_naive_utc_and_offset(parsed, Utc));
        }
    }
    Err(Error::validation(format!("unparseable timestamp: {raw}")))
}

pub struct DataLoader {
    messages: Vec<ChatRecord>,
}

impl DataLoader {
    pub fn from_csv_content(csv_content: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().from_reader(csv_content.as_bytes());
        let mut messages = Vec::new();
        for row in reader.deserialize::<RawCsvRow>() {
            let row = row.map_err(|e| Error::validation(format!("invalid CSV row: {e}")))?;
            messages.push(ChatRecord {
                timestamp: parse_timestamp(&row.timestamp)?,
                user_id: row.user_id,
                session_id: row.session_id,
                thread_id: row.thread_id,
                response_id: row.response_id.unwrap_or_default(),
                query_text: row.query_text,
                intent_detected: row.intent_detected,
                intent_query_type: row.intent_query_type.unwrap_or_default(),
                final_response_message: row.final_response_message,
                has_image: row.has_image != 0,
                error_message: row.error_message.filter(|s| !s.is_empty()),
            });
        }
        Ok(Self { messages })
    }

    pub fn messages(&self) -> &[ChatRecord] {
        &self.messages
    }

    pub fn get_thread(&self, thread_id: &str) -> Option<ConversationThread> {
        let mut thread_messages: Vec<ChatRecord> =
            self.messages.iter().filter(|m| m.thread_id == thread_id).cloned().collect();
        thread_messages.sort_by_key(|m| m.timestamp);

        let first = thread_messages.first()?;
        let start_time = first.timestamp;
        let user_id = first.user_id.clone();
        let end_time = thread_messages.last()?.timestamp;
        let duration_seconds = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        let has_errors = thread_messages.iter().any(|m| m.error_message.is_some());
        let message_count = thread_messages.len();

        Some(ConversationThread {
            thread_id: thread_id.to_string(),
            user_id,
            messages: thread_messages,
            start_time,
            end_time,
            duration_seconds,
            message_count,
            has_errors,
        })
    }

    pub fn get_all_thread_ids(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        for message in &self.messages {
            seen.insert(message.thread_id.clone());
        }
        seen.into_iter().collect()
    }

    pub fn get_statistics(&self) -> LoaderStatistics {
        let mut thread_ids = std::collections::BTreeSet::new();
        let mut user_ids = std::collections::BTreeSet::new();
        let mut intent_distribution: HashMap<String, usize> = HashMap::new();
        let mut messages_with_images = 0;
        let mut messages_with_errors = 0;

        for message in &self.messages {
            thread_ids.insert(message.thread_id.clone());
            user_ids.insert(message.user_id.clone());
            *intent_distribution.entry(message.intent_detected.clone()).or_insert(0) += 1;
            if message.has_image {
                messages_with_images += 1;
            }
            if message.error_message.is_some() {
                messages_with_errors += 1;
            }
        }

        LoaderStatistics {
            total_messages: self.messages.len(),
            total_threads: thread_ids.len(),
            total_users: user_ids.len(),
            intent_distribution: intent_distribution.into_iter().collect(),
            messages_with_images,
            messages_with_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "timestamp,user_id,session_id,thread_id,response_id,query_text,intent_detected,intent_query_type,final_response_message,has_image,error_message\n\
2024-01-01T10:00:00,u1,s1,t1,r1,I ate an apple,log_meal,,Logged successfully,0,\n\
2024-01-01T10:01:00,u1,s1,t1,r2,what did I eat,meal_summary,,Total calories: 95 kcal,0,\n";

    #[test]
    fn loads_and_groups_by_thread() {
        let loader = DataLoader::from_csv_content(SAMPLE_CSV).expect("parses");
        assert_eq!(loader.messages().len(), 2);
        let thread = loader.get_thread("t1").expect("thread exists");
        assert_eq!(thread.message_count, 2);
        assert!(thread.is_successful());
        assert!(!thread.has_errors);
        assert_eq!(thread.meal_summary_messages().len(), 1);
    }

    #[test]
    fn missing_thread_is_none() {
        let loader = DataLoader::from_csv_content(SAMPLE_CSV).expect("parses");
        assert!(loader.get_thread("nope").is_none());
    }

    #[test]
    fn statistics_counts_intents_and_threads() {
        let loader = DataLoader::from_csv_content(SAMPLE_CSV).expect("parses");
        let stats = loader.get_statistics();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.total_threads, 1);
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.intent_distribution.get("log_meal"), Some(&1));
    }

    #[test]
    fn day_first_timestamp_fallback_parses() {
        let parsed = parse_timestamp("31/01/24 10:30").expect("day-first format parses");
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2024-01-31");
    }
}
