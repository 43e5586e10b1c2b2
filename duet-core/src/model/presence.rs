use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Matching,
    InCall,
    Idle,
}

impl Default for PresenceStatus {
    fn default() -> Self {
        Self::Online
    }
}
