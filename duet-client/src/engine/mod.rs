//! Seams over the media stack: device capture and WebRTC-style peer
//! connections.
//!
//! Two backends ship with the crate: [`native`] drives webrtc-rs, and
//! [`loopback`] simulates devices and a network inside one process.

pub mod loopback;
#[cfg(feature = "webrtc")]
pub mod native;

use crate::error::{EngineError, MediaError};
use async_trait::async_trait;
use duet_core::{
    ConnectionState, IceCandidate, IceServerConfig, MediaConstraints, MediaKind,
    SessionDescription,
};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

/// A captured local track.
///
/// Disabling a track keeps it attached to the connection; the remote side
/// sees a frozen picture or silence. Stopping it releases the device.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Releases the underlying device. Repeated calls are no-ops.
    fn stop(&self);
    fn is_live(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
    pub stream_id: String,
}

/// Collects the remote side's tracks as they arrive.
///
/// Handed to the observer once, right after the connection is created, and
/// filled in afterwards.
#[derive(Debug, Clone, Default)]
pub struct RemoteStream {
    tracks: Arc<RwLock<Vec<RemoteTrack>>>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_track(&self, track: RemoteTrack) {
        let mut tracks = self.tracks.write().unwrap_or_else(PoisonError::into_inner);
        if !tracks.iter().any(|t| t.id == track.id) {
            tracks.push(track);
        }
    }

    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|t| t.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.tracks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Callbacks of a peer connection, delivered as values to its owner.
#[derive(Debug)]
pub enum PeerEvent {
    /// A locally gathered candidate; `None` once gathering is complete.
    LocalCandidate(Option<IceCandidate>),
    StateChanged(ConnectionState),
    RemoteTrack(RemoteTrack),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints)
    -> Result<LocalStream, MediaError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: Arc<dyn MediaTrack>, stream_id: &str)
    -> Result<(), EngineError>;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Builds a connection whose callbacks are pushed into `events`.
    async fn create_peer_connection(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerConnection>, EngineError>;
}

/// The media capabilities a session runs on.
#[derive(Clone)]
pub struct MediaBackend {
    pub devices: Arc<dyn MediaDevices>,
    pub connections: Arc<dyn PeerConnectionFactory>,
}

impl MediaBackend {
    pub fn new(devices: Arc<dyn MediaDevices>, connections: Arc<dyn PeerConnectionFactory>) -> Self {
        Self {
            devices,
            connections,
        }
    }
}

impl fmt::Debug for MediaBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaBackend").finish_non_exhaustive()
    }
}
