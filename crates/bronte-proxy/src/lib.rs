//! Bronte Proxy - Anthropic-surface HTTP adapter
//!
//! A coding assistant that only speaks Anthropic's `/v1/messages` wire format
//! points its base URL at this adapter. The adapter rewrites each request
//! into the neutral prompt model, dispatches it to the backend selected by
//! the `provider/model` prefix, and rewrites the reply (streaming included)
//! back into Anthropic's shape.
//!
//! Design goals:
//! - Accept Anthropic-format traffic unchanged; byte-proxy everything the
//!   adapter does not itself translate.
//! - Keep translation pure and synchronous between suspension points.
//! - Map provider errors onto Anthropic error kinds that drive the client's
//!   retry behavior.

pub mod config;
pub mod error_map;
pub mod server;
pub mod sink;
pub mod streaming;

pub use config::AdapterConfig;
pub use server::{bind, create_app, create_app_from_parts, serve};
