// AI chat providers and provider selection.

pub mod client;
pub mod prompt;
pub mod service;

pub use client::{ChatProvider, Completion, GenerationOptions, LlmError};
pub use service::ChatService;
