use crate::model::participant::ParticipantId;
use crate::utils::SIGNAL_TOPIC_PREFIX;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pub/sub topic carrying this room's negotiation messages.
    pub fn signal_topic(&self) -> String {
        format!("{}{}", SIGNAL_TOPIC_PREFIX, self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Active,
    Ended,
}

/// Record created by the matcher when two participants are paired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRoom {
    pub id: RoomId,
    pub room_token: String,
    pub participants: (ParticipantId, ParticipantId),
    pub status: RoomStatus,
}

impl CallRoom {
    pub fn new(first: ParticipantId, second: ParticipantId) -> Self {
        Self {
            id: RoomId::generate(),
            room_token: Uuid::new_v4().simple().to_string(),
            participants: (first, second),
            status: RoomStatus::Active,
        }
    }

    pub fn includes(&self, participant: &ParticipantId) -> bool {
        &self.participants.0 == participant || &self.participants.1 == participant
    }

    /// The participant on the other side of `participant`, if they are in the room.
    pub fn other(&self, participant: &ParticipantId) -> Option<&ParticipantId> {
        if &self.participants.0 == participant {
            Some(&self.participants.1)
        } else if &self.participants.1 == participant {
            Some(&self.participants.0)
        } else {
            None
        }
    }

    pub fn end(&mut self) {
        self.status = RoomStatus::Ended;
    }

    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }
}
