use duet_core::MediaKind;

/// Local camera/microphone acquisition failures.
///
/// These are user-correctable and are surfaced separately from connection
/// problems.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("Permission to use the camera or microphone was denied")]
    PermissionDenied,

    #[error("No {0} device available")]
    DeviceUnavailable(MediaKind),

    #[error("Media capture failed: {0}")]
    Capture(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Track is not supported by this engine: {0}")]
    UnsupportedTrack(String),

    #[error("Peer connection is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Signaling transport is not open")]
    NotOpen,

    #[error("Transport already serves room {open}, refusing to open {requested}")]
    RoomMismatch { open: String, requested: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("A participant cannot be matched with itself")]
    SelfMatch,

    #[error("Matching was cancelled")]
    Cancelled,

    #[error("Room not found: {0}")]
    UnknownRoom(String),

    #[error("Matching service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Matching(#[from] MatchError),

    #[error("Invalid operation in state {state}: {operation}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Call session is closed")]
    SessionClosed,

    #[error("No call in progress")]
    NoActiveCall,
}

impl CallError {
    /// Whether the user can fix this by granting access or plugging in a device.
    pub fn is_media_access_error(&self) -> bool {
        matches!(
            self,
            CallError::Media(MediaError::PermissionDenied)
                | CallError::Media(MediaError::DeviceUnavailable(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
