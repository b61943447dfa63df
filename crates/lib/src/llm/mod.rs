//! Client for the inference server's OpenAI-compatible API.
//!
//! Model discovery, load/eject with endpoint fallbacks, and chat completions.

mod chat;
mod client;
mod discovery;
pub mod endpoints;

pub use chat::{ChatMessage, ChatOptions};
pub use client::{ApiClient, ApiError, ClientSettings, ModelDescriptor};
pub use discovery::Discovery;
