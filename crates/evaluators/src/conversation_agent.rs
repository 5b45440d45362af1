//! ConversationAgent (spec.md §4.10): drives a multi-turn conversation
//! against the chat API under test until a goal-completion condition is
//! met or `max_turns` is exhausted.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/conversation_agent.py`.

use std::sync::Arc;
use std::time::Duration;

use evalengine_providers::{GenerateOptions, LlmProvider, ThinkingLevel};
use regex::Regex;
use serde_json::Value;

use crate::chat_client::{ChatApiClient, StreamResponse};
use crate::session::SessionState;
use crate::types::{AdversarialTestCase, ConversationTranscript, ConversationTurn};

const AGENT_SYSTEM_PROMPT: &str = r#"You are simulating a REAL user talking to a health-assistant chatbot.
Your job is to respond naturally and push the conversation toward the stated goal.

## Core rules
- Stay in character as the user described in the test case. Never break character.
- Be realistic: vary your phrasing, use casual language, make small typos occasionally.
- NEVER repeat the exact same message you already sent in this conversation.

## How to respond to common bot behaviors

**Bot asks for meal time:**
Provide a realistic, varied time. Examples: "around 9 in the morning", "lunch, maybe 1:30 pm".

**Bot asks for quantity/amount:**
Provide a quantity consistent with the original meal description.

**Bot shows a meal summary with calories:**
- If correct → confirm: "Yes, log it", "Looks good, save it"
- If wrong → point out the specific error

**Bot asks for yes/no confirmation:**
Respond naturally: "Yeah", "Sure, go ahead", "Yes please"

**Bot completes the task:**
Respond with exactly: GOAL_COMPLETE

## Difficulty-based behavior

**easy:** Cooperative, clear user. Answer directly and precisely.
**medium:** Realistic, casual. Give partial info, use informal language.
**hard:** Difficult, uncooperative. Be vague, give incomplete answers, change your mind.

## Category-specific behavior

**quantity_ambiguity:** Gave ambiguous quantity. When bot asks, provide specific amount.
**multi_meal_single_message:** Described multiple meals. Remind bot about missed ones.
**correction_contradiction:** After bot shows interpretation, CORRECT something specific.
**edit_after_confirmation:** Cooperate fully, confirm meal, then request an edit.
**future_time_rejection:** Deliberately give future time. If rejected, provide past time.
**contextual_without_context:** Send ONLY quantity/time with NO food. When asked, provide food.
**composite_dish:** Describe dish with all ingredients TOGETHER as one item.

## Output format
Return ONLY the next user message as plain text.
Return exactly "GOAL_COMPLETE" if the task is done."#;

fn goal_completion_patterns() -> &'static [&'static str] {
    &["successfully logged", "meal has been logged", "logged your meal", "saved to your diary"]
}

pub struct ConversationAgent {
    llm: Arc<dyn LlmProvider>,
    max_turns: u32,
}

impl ConversationAgent {
    pub fn new(llm: Arc<dyn LlmProvider>, max_turns: u32) -> Self {
        Self { llm, max_turns }
    }

    pub async fn run_conversation(
        &self,
        test_case: &AdversarialTestCase,
        client: &ChatApiClient,
        user_id: &str,
        turn_delay: Duration,
    ) -> ConversationTranscript {
        let mut transcript = ConversationTranscript {
            goal_type: test_case.goal_type.clone(),
            ..Default::default()
        };
        let mut current_message = test_case.synthetic_input.clone();
        let mut session_state = SessionState::new(user_id);

        tracing::info!(category = %test_case.category, "starting adversarial conversation");

        for turn_num in 1..=self.max_turns {
            if !session_state.is_first_message {
                tokio::time::sleep(turn_delay).await;
            }

            let response = match client.stream_message(&current_message, &mut session_state).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(turn = turn_num, error = %e, "chat api error");
                    transcript.abandonment_reason = format!("API error: {e}");
                    transcript.goal_achieved = false;
                    break;
                }
            };

            let detected_intent = response
                .detected_intents
                .first()
                .and_then(|i| i.get("intent"))
                .and_then(Value::as_str)
                .map(str::to_string);

            transcript.add_turn(ConversationTurn {
                turn_number: turn_num as i64,
                user_message: current_message.clone(),
                bot_response: response.full_message.clone(),
                detected_intent,
                thread_id: session_state.thread_id.clone(),
                session_id: session_state.session_id.clone(),
                response_id: session_state.response_id.clone(),
            });

            if Self::check_goal_completion(&response, &test_case.goal_type) {
                tracing::info!(turns = turn_num, "goal achieved");
                transcript.goal_achieved = true;
                transcript.goal_type = test_case.goal_type.clone();
                break;
            }

            match self.decide_next_turn(test_case, &transcript).await {
                Some(next_message) if next_message != "GOAL_COMPLETE" => {
                    current_message = next_message;
                }
                _ => {
                    transcript.goal_achieved = true;
                    break;
                }
            }
        }

        if transcript.total_turns >= self.max_turns as i64 && !transcript.goal_achieved {
            transcript.abandonment_reason = format!("Max turns ({}) reached", self.max_turns);
        }

        transcript
    }

    fn check_goal_completion(response: &StreamResponse, goal_type: &str) -> bool {
        let intents: Vec<&str> = response
            .detected_intents
            .iter()
            .filter_map(|i| i.get("intent").and_then(Value::as_str))
            .collect();

        if goal_type == "meal_logged" && intents.contains(&"meal_confirmation") {
            return true;
        }
        if goal_type == "question_answered"
            && intents.iter().any(|i| *i == "general_query" || *i == "nutrition_query")
            && response.full_message.len() > 50
        {
            return true;
        }

        let message_lower = response.full_message.to_lowercase();
        if goal_type == "meal_logged" {
            for pattern in goal_completion_patterns() {
                if let Ok(re) = Regex::new(pattern) {
                    if re.is_match(&message_lower) {
                        return true;
                    }
                }
            }
        } else if goal_type == "question_answered" {
            if ["hope this helps", "let me know if", "anything else"].iter().any(|p| message_lower.contains(p)) {
                return true;
            }
        }

        false
    }

    async fn decide_next_turn(&self, test_case: &AdversarialTestCase, transcript: &ConversationTranscript) -> Option<String> {
        let prompt = format!(
            "## Test case\n- **Category:** {}\n- **Difficulty:** {:?}\n- **Original input:** {}\n- **Expected behavior:** {}\n- **Goal:** {}\n\n## Conversation so far\n{}\n\n## Current turn number: {} of {}\n\nWhat does the user say next?",
            test_case.category,
            test_case.difficulty,
            test_case.synthetic_input,
            test_case.expected_behavior,
            test_case.goal_type,
            transcript.to_text(),
            transcript.total_turns,
            self.max_turns,
        );

        let options = GenerateOptions {
            temperature: None,
            thinking_level: Some(ThinkingLevel::Low),
        };
        match self.llm.generate(Some(AGENT_SYSTEM_PROMPT), &prompt, &options).await {
            Ok(result) => {
                let trimmed = result.text.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "conversation agent llm call failed");
                None
            }
        }
    }
}
