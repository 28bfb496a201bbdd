//! Turn orchestration for the coaching assistant.
//!
//! A turn flows classifier → resolver → dispatcher → summarizer:
//! - `classifier` turns the prompt into an [`IntentDescriptor`](coachline_core::intent::IntentDescriptor),
//!   handing bare affirmatives to `followup`
//! - `resolver` maps "this contact", names and companies onto CRM ids
//! - `dispatch` validates and executes the CRM call
//! - `summarizer` renders the reply and picks the next follow-up question
//!
//! The language model and the CRM are reached only through the [`llm::LlmClient`]
//! and [`dispatch::CrmTransport`] ports. The model never decides which CRM
//! call is made with which ids; it only proposes an intent that is parsed into
//! a closed type first.

pub mod classifier;
pub mod dispatch;
pub mod followup;
pub mod llm;
pub mod resolver;
pub mod runtime;
pub mod summarizer;
pub mod testing;

pub use runtime::{AgentRuntime, TurnError, TurnOutcome, TurnPolicy, TurnRequest, TurnResponse};
