pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod matching;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::CallConfig;
pub use controller::{CallController, CallPhase};
pub use engine::{LocalStream, MediaBackend, MediaTrack, RemoteStream, RemoteTrack};
pub use error::{CallError, EngineError, MatchError, MediaError, Result, SignalingError};
pub use matching::{InMemoryMatchmaker, MatchAssignment, MatchingCoordinator};
pub use peer::{IgnoreReason, NegotiationState, PeerConnectionManager, SignalOutcome};
pub use session::{CallObserver, CallParams, EndReason, NoopObserver, SessionHandle, start_call};
pub use signaling::{
    ChannelHandle, InMemoryChannel, RealtimeChannel, SignalingTransport, Subscription,
};
#[cfg(feature = "websocket")]
pub use signaling::WebSocketChannel;
