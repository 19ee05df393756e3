//! Bronte Providers - Backend driver implementations
//!
//! This crate turns the neutral prompt model into provider-native requests
//! and provider-native streams back into neutral events:
//! - OpenAI (chat completions)
//! - Google Gemini
//! - xAI (OpenAI-compatible)
//! - Azure OpenAI (OpenAI-compatible, deployment URLs)
//! - Anthropic (native passthrough driver)

mod anthropic;
mod config;
mod error;
mod gemini;
pub mod media;
mod openai;
pub mod schema;
mod sse;
mod traits;

pub use anthropic::AnthropicDriver;
pub use config::{DriverRegistry, DriverSettings};
pub use error::DriverError;
pub use gemini::GeminiDriver;
pub use openai::{error_classify, OpenAiDriver};
pub use secrecy::SecretString;
pub use traits::{
    DriverRequest, EventStream, ProviderDriver, ProviderHints, ReasoningEffort, ServiceTier,
};
