//! Tether core library: model discovery and load coordination for a local
//! OpenAI-compatible inference server, plus config, preferences and chat history
//! used by the CLI.

pub mod config;
pub mod coordinator;
pub mod history;
pub mod init;
pub mod llm;
pub mod prefs;
pub mod state;
pub mod view;
