pub mod model;
pub mod utils;

pub use model::{
    CallRoom, ConnectionState, IceCandidate, IceServerConfig, MediaConstraints, MediaKind,
    MediaToggleState, ParticipantId, PresenceStatus, Role, RoomId, RoomStatus, SdpType,
    SessionDescription, SignalKind, SignalMessage, SignalPayload,
};
