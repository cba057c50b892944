//! Domain payloads carried inside envelopes.
//!
//! The store treats these as opaque JSON; the types exist so handlers and
//! typed collections can work with real fields.

use serde::{Deserialize, Serialize};

use crate::classes::{ObjectClass, StoredObject};
use crate::template::ArgumentType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl Chat {
    /// Path of the append-only message log inside the payload.
    pub const MESSAGES_FIELD: &'static str = "messages";

    pub fn last_message_is_user(&self) -> bool {
        self.messages.last().is_some_and(|m| m.role == Role::User)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    User,
    System,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub description: String,
    /// ISO 639-3 language code.
    pub language: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub messages: Vec<PromptMessage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateArgument {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArgumentType,
}

/// Messages may reference arguments as `{{ name }}`; see
/// [`PromptTemplate::render`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub description: String,
    pub language: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub arguments: Vec<TemplateArgument>,
    pub messages: Vec<PromptMessage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionParameters {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomInstructions {
    #[serde(default)]
    pub response_instruction: String,
    #[serde(default)]
    pub preference_instruction: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub custom_instructions: CustomInstructions,
}

/// Account record stored globally under `User:{id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl StoredObject for Chat {
    const CLASS: ObjectClass = ObjectClass::Chat;
}

impl StoredObject for Prompt {
    const CLASS: ObjectClass = ObjectClass::Prompt;
}

impl StoredObject for PromptTemplate {
    const CLASS: ObjectClass = ObjectClass::PromptTemplate;
}

impl StoredObject for CompletionParameters {
    const CLASS: ObjectClass = ObjectClass::CompletionParameters;
}

impl StoredObject for UserProfile {
    const CLASS: ObjectClass = ObjectClass::UserProfile;
}

impl StoredObject for User {
    const CLASS: ObjectClass = ObjectClass::User;
}
