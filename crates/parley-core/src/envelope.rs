use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classes::{KeyShape, ObjectClass};
use crate::clock::Clock;
use crate::keys::{Key, KeyError, Owner};

/// An instant with its timezone label and the numeric timestamp the search
/// index sorts on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Datetime {
    pub datetime_iso: DateTime<Utc>,
    pub timezone: String,
    /// Seconds since the epoch, fractional.
    pub timestamp: f64,
}

impl Datetime {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            datetime_iso: instant,
            timezone: "UTC".to_string(),
            timestamp: instant.timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn now(clock: &dyn Clock) -> Self {
        Self::at(clock.now())
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::at(DateTime::from_timestamp_millis(ms as i64).unwrap_or_default())
    }
}

/// Metadata wrapper persisted around every stored payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub id: u64,
    pub class_name: ObjectClass,
    pub owner: Owner,
    pub object: T,
    pub created_at: Datetime,
    pub updated_at: Datetime,
}

impl<T> Envelope<T> {
    pub fn new(id: u64, class_name: ObjectClass, owner: Owner, object: T, now: Datetime) -> Self {
        Self {
            id,
            class_name,
            owner,
            object,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// The key this envelope lives under, derived from class, owner and id.
    pub fn key(&self) -> Result<Key, KeyError> {
        match self.class_name.shape() {
            KeyShape::Instance => Key::instance(self.class_name, &self.owner, self.id),
            KeyShape::Singleton => Key::singleton(self.class_name, &self.owner),
            KeyShape::Global => Key::global(self.class_name, self.id),
        }
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl Envelope<Value> {
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Envelope<T>, serde_json::Error> {
        Ok(Envelope {
            id: self.id,
            class_name: self.class_name,
            owner: self.owner,
            object: serde_json::from_value(self.object)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
