//! Agent Factory — conversation orchestration and onboarding for
//! vertical customer-facing agents.

pub mod chat_routes;
pub mod config;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod orchestrator;
pub mod provisioning;
pub mod server;
pub mod store;
pub mod template;
pub mod tools;
