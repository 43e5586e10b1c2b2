mod connection;
mod media;
mod participant;
mod presence;
mod room;
mod signaling;

pub use connection::ConnectionState;
pub use media::{MediaConstraints, MediaKind, MediaToggleState};
pub use participant::{ParticipantId, Role};
pub use presence::PresenceStatus;
pub use room::{CallRoom, RoomId, RoomStatus};
pub use signaling::{
    IceCandidate, IceServerConfig, SdpType, SessionDescription, SignalKind, SignalMessage,
    SignalPayload,
};
