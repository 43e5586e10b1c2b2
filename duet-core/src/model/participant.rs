use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, opaque identifier of a user taking part in calls.
///
/// Identifiers are totally ordered by their string value; [`Role::derive`]
/// relies on that ordering.
#[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of a call sends the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// The lexicographically smaller id offers. Swapping the arguments always
    /// yields the opposite role, except for identical ids, which yield
    /// `Responder` on both sides.
    pub fn derive(local: &ParticipantId, remote: &ParticipantId) -> Self {
        if local < remote {
            Role::Initiator
        } else {
            Role::Responder
        }
    }

    pub fn is_initiator(self) -> bool {
        matches!(self, Role::Initiator)
    }
}
