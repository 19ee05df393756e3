//! Bronte Protocol - Shared types and format conversions
//!
//! This crate defines the fundamental types used across the Bronte adapter:
//! - The provider-neutral prompt model (turns of typed content parts)
//! - The provider-neutral stream-event union
//! - Tool declaration types
//! - Anthropic `/v1/messages` wire types
//! - Conversions between the wire format and the neutral model

pub mod convert;
mod events;
mod prompt;
mod tools;
mod types;
pub mod wire;

pub use events::*;
pub use prompt::*;
pub use tools::*;
pub use types::*;
