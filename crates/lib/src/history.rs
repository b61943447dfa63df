//! Chat conversations and their JSON import/export format.
//!
//! An export file holds a format version, the export time and a list of conversations.
//! Import validates the shape before accepting anything.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::llm::ChatMessage;

pub const HISTORY_FORMAT_VERSION: u32 = 1;

const KNOWN_ROLES: [&str; 3] = ["system", "user", "assistant"];
const TITLE_MAX_CHARS: usize = 40;

/// One conversation: id, optional title, and ordered user/assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: format!("conv-{}", uuid::Uuid::new_v4()),
            title: None,
            created_at: Utc::now(),
            updated_at: None,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        if self.title.is_none() && message.role == "user" {
            self.title = Some(title_from(&message.content));
        }
        self.messages.push(message);
        self.updated_at = Some(Utc::now());
    }

    /// Drop the last message, e.g. a user turn the server never answered. A title taken
    /// from that message goes with it.
    pub fn pop(&mut self) -> Option<ChatMessage> {
        let message = self.messages.pop()?;
        if !self.messages.iter().any(|m| m.role == "user") {
            self.title = None;
        }
        Some(message)
    }

    /// Messages to send: the optional system prompt followed by the history.
    pub fn request_messages(&self, system_prompt: Option<&str>) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = system_prompt.map(str::trim).filter(|p| !p.is_empty()) {
            out.push(ChatMessage::system(prompt));
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}

fn title_from(content: &str) -> String {
    let line = content.lines().next().unwrap_or("").trim();
    if line.chars().count() <= TITLE_MAX_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}…", cut.trim_end())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryFile {
    version: u32,
    exported_at: DateTime<Utc>,
    conversations: Vec<Conversation>,
}

/// Serialize conversations in the export format.
pub fn to_history_json(conversations: &[Conversation]) -> Result<String> {
    let file = HistoryFile {
        version: HISTORY_FORMAT_VERSION,
        exported_at: Utc::now(),
        conversations: conversations.to_vec(),
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Parse and validate an export. Rejects newer versions, empty exports, empty
/// conversations and unknown roles.
pub fn parse_history(s: &str) -> Result<Vec<Conversation>> {
    let file: HistoryFile = serde_json::from_str(s).context("not a chat history export")?;
    if file.version == 0 || file.version > HISTORY_FORMAT_VERSION {
        bail!(
            "unsupported history version {} (expected {})",
            file.version,
            HISTORY_FORMAT_VERSION
        );
    }
    if file.conversations.is_empty() {
        bail!("history export contains no conversations");
    }
    for conv in &file.conversations {
        if conv.messages.is_empty() {
            bail!("conversation {} has no messages", conv.id);
        }
        if let Some(m) = conv
            .messages
            .iter()
            .find(|m| !KNOWN_ROLES.contains(&m.role.as_str()))
        {
            bail!("conversation {} has unknown role {:?}", conv.id, m.role);
        }
    }
    Ok(file.conversations)
}

pub fn export_history(path: &Path, conversations: &[Conversation]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let body = to_history_json(conversations)?;
    std::fs::write(path, body)
        .with_context(|| format!("writing chat history to {}", path.display()))?;
    log::info!(
        "exported {} conversation(s) to {}",
        conversations.len(),
        path.display()
    );
    Ok(())
}

pub fn import_history(path: &Path) -> Result<Vec<Conversation>> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading chat history from {}", path.display()))?;
    parse_history(&s).with_context(|| format!("importing {}", path.display()))
}
