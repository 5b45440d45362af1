//! Rubric-based LLM judges, the chat-API session/streaming client, and the
//! conversation agent that drives adversarial probes (spec.md §4.5, §4.10).

pub mod adversarial_judge;
pub mod chat_client;
pub mod conversation_agent;
pub mod correctness_judge;
pub mod custom_evaluator;
pub mod efficiency_judge;
pub mod intent_judge;
pub mod session;
pub mod types;
pub mod voicerx;

pub use adversarial_judge::AdversarialJudge;
pub use chat_client::{ChatApiClient, StreamResponse};
pub use conversation_agent::ConversationAgent;
pub use correctness_judge::CorrectnessJudge;
pub use custom_evaluator::{CustomEvaluator, CustomEvaluatorOutput};
pub use efficiency_judge::EfficiencyJudge;
pub use intent_judge::IntentJudge;
pub use session::SessionState;
pub use types::{
    AdversarialJudgeResult, AdversarialTestCase, ConversationTranscript, ConversationTurn, CorrectnessEvaluation, EfficiencyEvaluation,
    FrictionCause, FrictionTurn, IntentEvaluation, RecoveryQuality,
};
