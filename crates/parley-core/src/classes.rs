use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::keys::KeyError;

/// How a class lays out its storage keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyShape {
    /// `{Class}:{owner}:{id}`
    Instance,
    /// `{Class}:{owner}`, one document per owner.
    Singleton,
    /// `{Class}:{id}`, not scoped to an owner.
    Global,
}

/// Registry of every class that may be persisted.
///
/// The string returned by [`ObjectClass::as_str`] is written into every key
/// and envelope. Changing one of those strings orphans existing data and
/// requires a migration. Renaming the Rust variant is safe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ObjectClass {
    Chat,
    Prompt,
    PromptTemplate,
    CompletionParameters,
    UserProfile,
    User,
}

impl ObjectClass {
    pub const ALL: [ObjectClass; 6] = [
        Self::Chat,
        Self::Prompt,
        Self::PromptTemplate,
        Self::CompletionParameters,
        Self::UserProfile,
        Self::User,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "Chat",
            Self::Prompt => "Prompt",
            Self::PromptTemplate => "PromptTemplate",
            Self::CompletionParameters => "CompletionParameters",
            Self::UserProfile => "UserProfile",
            Self::User => "User",
        }
    }

    pub const fn shape(self) -> KeyShape {
        match self {
            Self::Chat | Self::Prompt | Self::PromptTemplate | Self::CompletionParameters => {
                KeyShape::Instance
            }
            Self::UserProfile => KeyShape::Singleton,
            Self::User => KeyShape::Global,
        }
    }

    /// Whether listing is backed by a search index for this class.
    pub const fn indexed(self) -> bool {
        matches!(
            self,
            Self::Chat | Self::Prompt | Self::PromptTemplate | Self::CompletionParameters
        )
    }

    /// Whether owners may mint share links for documents of this class.
    pub const fn shareable(self) -> bool {
        matches!(self, Self::Chat | Self::Prompt | Self::PromptTemplate)
    }

    pub fn indexed_classes() -> impl Iterator<Item = ObjectClass> {
        Self::ALL.into_iter().filter(|c| c.indexed())
    }

    /// Key prefix shared by every document of this class.
    pub fn key_prefix(self) -> String {
        format!("{}:", self.as_str())
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectClass {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| KeyError::UnregisteredClass(s.to_string()))
    }
}

impl From<ObjectClass> for String {
    fn from(class: ObjectClass) -> Self {
        class.as_str().to_string()
    }
}

impl TryFrom<String> for ObjectClass {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A payload type bound to its registry entry at compile time.
pub trait StoredObject: Serialize + DeserializeOwned + Send + Sync + 'static {
    const CLASS: ObjectClass;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn names_roundtrip() {
        for class in ObjectClass::ALL {
            assert_eq!(class.as_str().parse::<ObjectClass>().unwrap(), class);
        }
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = ObjectClass::ALL.iter().map(|c| c.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ObjectClass::ALL.len());
    }

    #[test]
    fn unknown_name_is_unregistered() {
        let err = "ChatMessage".parse::<ObjectClass>().unwrap_err();
        assert_matches!(err, KeyError::UnregisteredClass(name) if name == "ChatMessage");
    }

    #[test]
    fn serde_uses_stable_name() {
        let json = serde_json::to_string(&ObjectClass::PromptTemplate).unwrap();
        assert_eq!(json, "\"PromptTemplate\"");
        assert!(serde_json::from_str::<ObjectClass>("\"Nope\"").is_err());
    }

    #[test]
    fn shapes_and_flags() {
        assert_eq!(ObjectClass::Chat.shape(), KeyShape::Instance);
        assert_eq!(ObjectClass::UserProfile.shape(), KeyShape::Singleton);
        assert_eq!(ObjectClass::User.shape(), KeyShape::Global);
        assert!(!ObjectClass::UserProfile.indexed());
        assert!(!ObjectClass::CompletionParameters.shareable());
        assert_eq!(ObjectClass::indexed_classes().count(), 4);
    }
}
