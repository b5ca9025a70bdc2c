//! LLM client and agent contracts.
//!
//! The chat client is a provider boundary (OpenAI-compatible HTTP); every
//! agent is a system prompt plus a JSON contract with strict extraction.

mod agents;
mod client;
mod prompts;

pub use agents::{contains_korean, extract_json, Agents};
pub use client::{ChatMessage, ChatResponse, HttpLlmClient, LlmClient};
pub use prompts::{
    CLARIFIER_SYSTEM_PROMPT, ENGINEER_SYSTEM_PROMPT, ERROR_REPAIR_SYSTEM_PROMPT,
    EXPERT_SYSTEM_PROMPT, PLANNER_SYSTEM_PROMPT, TRANSLATE_SYSTEM_PROMPT,
};
