//! Job handlers: one module per job type, each a pure `async fn` over a
//! [`evalengine_core::repository::Repository`] (and, where audio is read,
//! a [`evalengine_core::file_storage::FileStorage`]). The job worker
//! ([`worker`]) dispatches to these by [`evalengine_core::models::JobType`];
//! none of the handlers poll the queue or own a retry loop themselves. The
//! [`seeder`] module is the idempotent default-content installer run once at
//! startup, ahead of the worker.

pub mod adversarial;
pub mod batch;
pub mod custom;
pub mod custom_batch;
pub mod provider_factory;
pub mod seeder;
pub mod voice_rx;
pub mod worker;

pub use adversarial::{run_adversarial_evaluation, AdversarialJobParams};
pub use batch::{run_batch_evaluation, BatchJobParams};
pub use custom::{run_custom_evaluator, CustomJobParams};
pub use custom_batch::{run_custom_batch_evaluator, CustomBatchJobParams};
pub use provider_factory::create_llm_provider;
pub use seeder::run_seeder;
pub use voice_rx::{run_voice_rx_evaluation, VoiceRxJobParams};
pub use worker::{CancelSet, JobWorker};
