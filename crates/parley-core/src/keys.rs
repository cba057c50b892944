use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classes::{KeyShape, ObjectClass};

const SEPARATOR: char = ':';
const SHARE_NAMESPACE: &str = "Share";
const MAX_SEGMENT_LEN: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("class '{0}' is not registered")]
    UnregisteredClass(String),
    #[error("invalid owner identity: {0:?}")]
    InvalidOwner(String),
    #[error("instance ids must be positive")]
    InvalidId,
    #[error("invalid share token")]
    InvalidToken,
    #[error("class {class} uses {actual:?} keys, not {requested:?}")]
    ShapeMismatch {
        class: ObjectClass,
        actual: KeyShape,
        requested: KeyShape,
    },
    #[error("malformed key: {0}")]
    Malformed(String),
}

/// Identity of the principal owning a document.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Owner(String);

impl Owner {
    pub fn new(id: impl Into<String>) -> Result<Self, KeyError> {
        let id = id.into();
        if !valid_segment(&id) {
            return Err(KeyError::InvalidOwner(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Owner> for String {
    fn from(owner: Owner) -> Self {
        owner.0
    }
}

impl TryFrom<String> for Owner {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for Owner {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_SEGMENT_LEN
        && !s.contains(SEPARATOR)
        && !s.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Storage key addressing exactly one document.
///
/// Keys are only built through the constructors below, each of which checks
/// the class's registered [`KeyShape`]. Owner segments cannot contain the
/// separator, so [`Key::parse`] always recovers the original parts.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Key {
    Instance {
        class: ObjectClass,
        owner: Owner,
        id: u64,
    },
    Singleton {
        class: ObjectClass,
        owner: Owner,
    },
    Global {
        class: ObjectClass,
        id: u64,
    },
    /// Time-limited copy created by sharing.
    Share { token: String },
}

impl Key {
    pub fn instance(class: ObjectClass, owner: &Owner, id: u64) -> Result<Self, KeyError> {
        expect_shape(class, KeyShape::Instance)?;
        if id == 0 {
            return Err(KeyError::InvalidId);
        }
        Ok(Self::Instance {
            class,
            owner: owner.clone(),
            id,
        })
    }

    pub fn singleton(class: ObjectClass, owner: &Owner) -> Result<Self, KeyError> {
        expect_shape(class, KeyShape::Singleton)?;
        Ok(Self::Singleton {
            class,
            owner: owner.clone(),
        })
    }

    pub fn global(class: ObjectClass, id: u64) -> Result<Self, KeyError> {
        expect_shape(class, KeyShape::Global)?;
        if id == 0 {
            return Err(KeyError::InvalidId);
        }
        Ok(Self::Global { class, id })
    }

    pub fn share(token: impl Into<String>) -> Result<Self, KeyError> {
        let token = token.into();
        if !valid_segment(&token) {
            return Err(KeyError::InvalidToken);
        }
        Ok(Self::Share { token })
    }

    /// Inverse of `Display`.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        let malformed = || KeyError::Malformed(raw.to_string());

        if parts[0] == SHARE_NAMESPACE {
            return match parts.as_slice() {
                [_, token] => Self::share(*token),
                _ => Err(malformed()),
            };
        }

        let class: ObjectClass = parts[0].parse()?;
        match (class.shape(), parts.as_slice()) {
            (KeyShape::Instance, [_, owner, id]) => {
                let id = id.parse().map_err(|_| malformed())?;
                Self::instance(class, &Owner::new(*owner)?, id)
            }
            (KeyShape::Singleton, [_, owner]) => Self::singleton(class, &Owner::new(*owner)?),
            (KeyShape::Global, [_, id]) => {
                let id = id.parse().map_err(|_| malformed())?;
                Self::global(class, id)
            }
            _ => Err(malformed()),
        }
    }

    pub fn class(&self) -> Option<ObjectClass> {
        match self {
            Self::Instance { class, .. } | Self::Singleton { class, .. } | Self::Global { class, .. } => {
                Some(*class)
            }
            Self::Share { .. } => None,
        }
    }

    /// Leading segment of the key: the class name, or `Share` for copies.
    pub fn namespace(&self) -> &'static str {
        match self.class() {
            Some(class) => class.as_str(),
            None => SHARE_NAMESPACE,
        }
    }

    pub fn owner(&self) -> Option<&Owner> {
        match self {
            Self::Instance { owner, .. } | Self::Singleton { owner, .. } => Some(owner),
            Self::Global { .. } | Self::Share { .. } => None,
        }
    }
}

fn expect_shape(class: ObjectClass, requested: KeyShape) -> Result<(), KeyError> {
    let actual = class.shape();
    if actual != requested {
        return Err(KeyError::ShapeMismatch {
            class,
            actual,
            requested,
        });
    }
    Ok(())
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance { class, owner, id } => write!(f, "{class}:{owner}:{id}"),
            Self::Singleton { class, owner } => write!(f, "{class}:{owner}"),
            Self::Global { class, id } => write!(f, "{class}:{id}"),
            Self::Share { token } => write!(f, "{SHARE_NAMESPACE}:{token}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use assert_matches::assert_matches;

    fn owner(s: &str) -> Owner {
        Owner::new(s).unwrap()
    }

    #[test]
    fn instance_key_format() {
        let key = Key::instance(ObjectClass::Chat, &owner("u1"), 7).unwrap();
        assert_eq!(key.to_string(), "Chat:u1:7");
    }

    #[test]
    fn singleton_and_global_formats() {
        let profile = Key::singleton(ObjectClass::UserProfile, &owner("u1")).unwrap();
        assert_eq!(profile.to_string(), "UserProfile:u1");
        let account = Key::global(ObjectClass::User, 42).unwrap();
        assert_eq!(account.to_string(), "User:42");
    }

    #[test]
    fn keys_are_deterministic() {
        let a = Key::instance(ObjectClass::Prompt, &owner("alice"), 3).unwrap();
        let b = Key::instance(ObjectClass::Prompt, &owner("alice"), 3).unwrap();
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn keys_are_injective_over_triples() {
        let owners = ["u1", "u2", "u12", "1", "a-b"];
        let classes = [ObjectClass::Chat, ObjectClass::Prompt, ObjectClass::PromptTemplate];
        let mut seen = HashSet::new();
        for class in classes {
            for o in owners {
                for id in 1..=12u64 {
                    let key = Key::instance(class, &owner(o), id).unwrap().to_string();
                    assert!(seen.insert(key.clone()), "collision on {key}");
                }
            }
        }
    }

    #[test]
    fn parse_is_inverse_of_display() {
        let keys = [
            Key::instance(ObjectClass::Chat, &owner("u1"), 9).unwrap(),
            Key::singleton(ObjectClass::UserProfile, &owner("u1")).unwrap(),
            Key::global(ObjectClass::User, 5).unwrap(),
            Key::share("abc_DEF-123").unwrap(),
        ];
        for key in keys {
            assert_eq!(Key::parse(&key.to_string()).unwrap(), key);
        }
    }

    #[test]
    fn owner_rejects_separator() {
        assert_matches!(Owner::new("u1:Chat"), Err(KeyError::InvalidOwner(_)));
        assert_matches!(Owner::new(""), Err(KeyError::InvalidOwner(_)));
        assert_matches!(Owner::new("a b"), Err(KeyError::InvalidOwner(_)));
    }

    #[test]
    fn wrong_shape_rejected_at_construction() {
        let err = Key::singleton(ObjectClass::Chat, &owner("u1")).unwrap_err();
        assert_matches!(
            err,
            KeyError::ShapeMismatch { class: ObjectClass::Chat, actual: KeyShape::Instance, .. }
        );
        assert!(Key::instance(ObjectClass::User, &owner("u1"), 1).is_err());
    }

    #[test]
    fn zero_id_rejected() {
        assert_matches!(Key::instance(ObjectClass::Chat, &owner("u1"), 0), Err(KeyError::InvalidId));
    }

    #[test]
    fn parse_rejects_unknown_and_malformed() {
        assert_matches!(Key::parse("Widget:u1:1"), Err(KeyError::UnregisteredClass(_)));
        assert_matches!(Key::parse("Chat:u1"), Err(KeyError::Malformed(_)));
        assert_matches!(Key::parse("Chat:u1:x"), Err(KeyError::Malformed(_)));
        assert_matches!(Key::parse("User:u1"), Err(KeyError::Malformed(_)));
    }

    #[test]
    fn owner_accessor() {
        let key = Key::instance(ObjectClass::Chat, &owner("u9"), 1).unwrap();
        assert_eq!(key.owner().unwrap().as_str(), "u9");
        assert!(Key::share("tok").unwrap().owner().is_none());
    }
}
