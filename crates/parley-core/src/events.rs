use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::keys::Owner;

/// Family of events a client can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Task,
    Object,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Object => "object",
        }
    }

    /// Channel carrying this event type for one owner.
    pub fn channel(self, owner: &Owner) -> String {
        format!("{}:{}", self.as_str(), owner)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "object" => Ok(Self::Object),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrudAction {
    Create,
    Read,
    Update,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Start,
    Pause,
    Resume,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventAction {
    Crud(CrudAction),
    Task(TaskAction),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Paused,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub action: EventAction,
    pub status: EventStatus,
    pub object: Value,
}

impl Event {
    pub fn crud(action: CrudAction, status: EventStatus, object: Value) -> Self {
        Self {
            action: EventAction::Crud(action),
            status,
            object,
        }
    }

    pub fn task(action: TaskAction, status: EventStatus, object: Value) -> Self {
        Self {
            action: EventAction::Task(action),
            status,
            object,
        }
    }
}

/// An event as published on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub uuid: Uuid,
    pub owner: Owner,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub event: Event,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(owner: Owner, event_type: EventType, event: Event, created_at: DateTime<Utc>) -> Self {
        Self {
            uuid: Uuid::now_v7(),
            owner,
            event_type,
            event,
            created_at,
        }
    }

    pub fn channel(&self) -> String {
        self.event_type.channel(&self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name() {
        let owner = Owner::new("u1").unwrap();
        assert_eq!(EventType::Object.channel(&owner), "object:u1");
        assert_eq!(EventType::Task.channel(&owner), "task:u1");
    }

    #[test]
    fn action_serializes_flat() {
        let event = Event::crud(CrudAction::Create, EventStatus::Completed, Value::Null);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "create");
        assert_eq!(json["status"], "completed");

        let event = Event::task(TaskAction::Start, EventStatus::InProgress, Value::Null);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "start");
        assert_eq!(json["status"], "in_progress");
    }

    #[test]
    fn record_roundtrip() {
        let record = EventRecord::new(
            Owner::new("u1").unwrap(),
            EventType::Task,
            Event::task(TaskAction::Complete, EventStatus::Completed, serde_json::json!({"n": 1})),
            Utc::now(),
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"task\""));
        let parsed: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.channel(), "task:u1");
    }

    #[test]
    fn event_type_parse() {
        assert_eq!("object".parse::<EventType>().unwrap(), EventType::Object);
        assert!("other".parse::<EventType>().is_err());
    }
}
