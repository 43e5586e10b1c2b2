//! In-process media backend.
//!
//! Devices hand out counted fake tracks, and connections created from the
//! same [`LoopbackNetwork`] find each other through the session descriptions
//! they exchange. Two connections become `connected` once both have applied
//! a local and a remote description and received at least one candidate.
//! Closing one side reports `disconnected` (or `failed`, if it never
//! connected) to the other.

use crate::engine::{
    LocalStream, MediaBackend, MediaDevices, MediaTrack, PeerConnection, PeerConnectionFactory,
    PeerEvent, PeerEventSender, RemoteTrack,
};
use crate::error::{EngineError, MediaError};
use async_trait::async_trait;
use dashmap::DashMap;
use duet_core::{
    ConnectionState, IceCandidate, IceServerConfig, MediaConstraints, MediaKind, SdpType,
    SessionDescription,
};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

const PEER_LINE: &str = "o=loopback ";
const TRACK_LINE: &str = "a=track:";

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    peers: Arc<DashMap<String, Arc<LoopbackPeer>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A participant's view of the network, with its own set of devices.
    pub fn endpoint(&self) -> LoopbackEndpoint {
        LoopbackEndpoint {
            id: Uuid::new_v4(),
            network: self.clone(),
            devices: Arc::new(DeviceState::new()),
        }
    }

    /// Connections created and not yet closed, across all endpoints.
    pub fn open_connections(&self) -> usize {
        self.peers.len()
    }

    fn peer(&self, id: &str) -> Option<Arc<LoopbackPeer>> {
        self.peers.get(id).map(|p| Arc::clone(p.value()))
    }
}

struct DeviceState {
    permission_denied: AtomicBool,
    camera: AtomicBool,
    microphone: AtomicBool,
    live_tracks: AtomicUsize,
    peak_live_tracks: AtomicUsize,
    released_tracks: AtomicUsize,
    acquisitions: AtomicUsize,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            permission_denied: AtomicBool::new(false),
            camera: AtomicBool::new(true),
            microphone: AtomicBool::new(true),
            live_tracks: AtomicUsize::new(0),
            peak_live_tracks: AtomicUsize::new(0),
            released_tracks: AtomicUsize::new(0),
            acquisitions: AtomicUsize::new(0),
        }
    }

    fn has_device(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.microphone.load(Ordering::SeqCst),
            MediaKind::Video => self.camera.load(Ordering::SeqCst),
        }
    }
}

#[derive(Clone)]
pub struct LoopbackEndpoint {
    id: Uuid,
    network: LoopbackNetwork,
    devices: Arc<DeviceState>,
}

impl LoopbackEndpoint {
    pub fn backend(&self) -> MediaBackend {
        MediaBackend::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    /// Makes every following capture request fail as if the user said no.
    pub fn deny_permission(&self, denied: bool) {
        self.devices.permission_denied.store(denied, Ordering::SeqCst);
    }

    pub fn set_device_present(&self, kind: MediaKind, present: bool) {
        match kind {
            MediaKind::Audio => self.devices.microphone.store(present, Ordering::SeqCst),
            MediaKind::Video => self.devices.camera.store(present, Ordering::SeqCst),
        }
    }

    /// Tracks captured and not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.devices.live_tracks.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live tracks ever observed.
    pub fn peak_live_tracks(&self) -> usize {
        self.devices.peak_live_tracks.load(Ordering::SeqCst)
    }

    /// Number of live-to-stopped transitions.
    pub fn released_tracks(&self) -> usize {
        self.devices.released_tracks.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.devices.acquisitions.load(Ordering::SeqCst)
    }

    /// Connections this endpoint created that are still open.
    pub fn open_connections(&self) -> usize {
        self.network
            .peers
            .iter()
            .filter(|p| p.value().endpoint == self.id)
            .count()
    }
}

#[async_trait]
impl MediaDevices for LoopbackEndpoint {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalStream, MediaError> {
        if self.devices.permission_denied.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }

        let kinds: Vec<MediaKind> = [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .filter(|k| constraints.wants(*k))
            .collect();
        if kinds.is_empty() {
            return Err(MediaError::Capture("no media kind requested".to_owned()));
        }
        if let Some(missing) = kinds.iter().find(|k| !self.devices.has_device(**k)) {
            return Err(MediaError::DeviceUnavailable(*missing));
        }

        let tracks: Vec<Arc<dyn MediaTrack>> = kinds
            .into_iter()
            .map(|kind| {
                Arc::new(LoopbackTrack::new(kind, Arc::clone(&self.devices))) as Arc<dyn MediaTrack>
            })
            .collect();

        let live = self
            .devices
            .live_tracks
            .fetch_add(tracks.len(), Ordering::SeqCst)
            + tracks.len();
        self.devices.peak_live_tracks.fetch_max(live, Ordering::SeqCst);
        self.devices.acquisitions.fetch_add(1, Ordering::SeqCst);

        Ok(LocalStream::new(Uuid::new_v4().to_string(), tracks))
    }
}

#[async_trait]
impl PeerConnectionFactory for LoopbackEndpoint {
    async fn create_peer_connection(
        &self,
        _ice_servers: &[IceServerConfig],
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerConnection>, EngineError> {
        let peer = Arc::new(LoopbackPeer {
            id: Uuid::new_v4().to_string(),
            endpoint: self.id,
            events,
            inner: Mutex::new(PeerInner::default()),
        });
        self.network.peers.insert(peer.id.clone(), Arc::clone(&peer));
        debug!("Loopback peer {} created", peer.id);

        Ok(Box::new(LoopbackConnection {
            peer,
            network: self.network.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct LoopbackTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    live: AtomicBool,
    devices: Arc<DeviceState>,
}

impl LoopbackTrack {
    fn new(kind: MediaKind, devices: Arc<DeviceState>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
            devices,
        }
    }
}

impl std::fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceState")
            .field("live_tracks", &self.live_tracks.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MediaTrack for LoopbackTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.devices.live_tracks.fetch_sub(1, Ordering::SeqCst);
            self.devices.released_tracks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct PeerInner {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_peer: Option<String>,
    tracks: Vec<(MediaKind, String, String)>,
    remote_candidates: usize,
    state: Option<ConnectionState>,
    closed: bool,
}

impl PeerInner {
    fn state(&self) -> ConnectionState {
        self.state.unwrap_or(ConnectionState::New)
    }

    fn is_ready(&self) -> bool {
        !self.closed
            && self.local.is_some()
            && self.remote.is_some()
            && self.remote_candidates > 0
            && self.state() == ConnectionState::Connecting
    }
}

struct LoopbackPeer {
    id: String,
    endpoint: Uuid,
    events: PeerEventSender,
    inner: Mutex<PeerInner>,
}

impl LoopbackPeer {
    fn lock(&self) -> MutexGuard<'_, PeerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PeerEvent) {
        // The owner may already be gone; nobody is left to notify then.
        let _ = self.events.send(event);
    }

    fn set_state(&self, inner: &mut PeerInner, state: ConnectionState) {
        inner.state = Some(state);
        self.emit(PeerEvent::StateChanged(state));
    }

    fn is_ready(&self) -> bool {
        self.lock().is_ready()
    }

    fn mark_connected(&self) {
        let mut inner = self.lock();
        if inner.state() == ConnectionState::Connecting && !inner.closed {
            self.set_state(&mut inner, ConnectionState::Connected);
        }
    }

    fn on_remote_closed(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        match inner.state() {
            ConnectionState::Connected => self.set_state(&mut inner, ConnectionState::Disconnected),
            ConnectionState::Connecting => self.set_state(&mut inner, ConnectionState::Failed),
            _ => {}
        }
    }
}

pub struct LoopbackConnection {
    peer: Arc<LoopbackPeer>,
    network: LoopbackNetwork,
}

impl LoopbackConnection {
    fn describe(&self, inner: &PeerInner) -> String {
        let mut sdp = format!("v=0\r\n{}{}\r\n", PEER_LINE, self.peer.id);
        for (kind, track_id, stream_id) in &inner.tracks {
            sdp.push_str(&format!("{}{}:{}:{}\r\n", TRACK_LINE, kind, track_id, stream_id));
        }
        sdp
    }

    /// Moves this peer (and its counterpart) forward once enough
    /// negotiation has happened.
    fn advance(&self) {
        let remote_id = {
            let mut inner = self.peer.lock();
            if inner.closed {
                return;
            }
            if inner.local.is_some()
                && inner.remote.is_some()
                && inner.state() == ConnectionState::New
            {
                self.peer.set_state(&mut inner, ConnectionState::Connecting);
            }
            if !inner.is_ready() {
                return;
            }
            inner.remote_peer.clone()
        };

        let Some(remote) = remote_id.and_then(|id| self.network.peer(&id)) else {
            return;
        };
        if !remote.is_ready() {
            return;
        }

        self.peer.mark_connected();
        remote.mark_connected();
    }
}

fn parse_description(sdp: &str) -> Result<(String, Vec<RemoteTrack>), EngineError> {
    let mut peer_id = None;
    let mut tracks = Vec::new();

    for line in sdp.lines() {
        if let Some(id) = line.strip_prefix(PEER_LINE) {
            peer_id = Some(id.trim().to_owned());
        } else if let Some(track) = line.strip_prefix(TRACK_LINE) {
            let parts: Vec<&str> = track.trim().splitn(3, ':').collect();
            let [kind, id, stream_id] = parts.as_slice() else {
                return Err(EngineError::InvalidDescription(line.to_owned()));
            };
            let kind = match *kind {
                "audio" => MediaKind::Audio,
                "video" => MediaKind::Video,
                other => {
                    return Err(EngineError::InvalidDescription(format!(
                        "unknown media kind {other}"
                    )));
                }
            };
            tracks.push(RemoteTrack {
                id: (*id).to_owned(),
                kind,
                stream_id: (*stream_id).to_owned(),
            });
        }
    }

    let peer_id = peer_id
        .ok_or_else(|| EngineError::InvalidDescription("missing loopback origin".to_owned()))?;
    Ok((peer_id, tracks))
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        stream_id: &str,
    ) -> Result<(), EngineError> {
        let mut inner = self.peer.lock();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        inner
            .tracks
            .push((track.kind(), track.id().to_owned(), stream_id.to_owned()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let inner = self.peer.lock();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        Ok(SessionDescription::offer(self.describe(&inner)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let inner = self.peer.lock();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        match &inner.remote {
            Some(remote) if remote.sdp_type == SdpType::Offer => {
                Ok(SessionDescription::answer(self.describe(&inner)))
            }
            _ => Err(EngineError::PeerConnection(
                "cannot answer without a remote offer".to_owned(),
            )),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        {
            let mut inner = self.peer.lock();
            if inner.closed {
                return Err(EngineError::Closed);
            }
            inner.local = Some(desc);
        }

        for n in 1..=2u16 {
            self.peer
                .emit(PeerEvent::LocalCandidate(Some(IceCandidate {
                    candidate: format!(
                        "candidate:{n} 1 udp 2130706431 127.0.0.1 {} typ host",
                        50_000 + n
                    ),
                    sdp_mid: Some("0".to_owned()),
                    sdp_m_line_index: Some(0),
                    username_fragment: None,
                })));
        }
        self.peer.emit(PeerEvent::LocalCandidate(None));

        self.advance();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let (remote_peer, tracks) = parse_description(&desc.sdp)?;
        {
            let mut inner = self.peer.lock();
            if inner.closed {
                return Err(EngineError::Closed);
            }
            let local_is_offer = inner
                .local
                .as_ref()
                .is_some_and(|l| l.sdp_type == SdpType::Offer);
            if desc.sdp_type == SdpType::Answer && !local_is_offer {
                return Err(EngineError::PeerConnection(
                    "answer received without a local offer".to_owned(),
                ));
            }
            inner.remote = Some(desc);
            inner.remote_peer = Some(remote_peer);
        }

        for track in tracks {
            self.peer.emit(PeerEvent::RemoteTrack(track));
        }

        self.advance();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        {
            let mut inner = self.peer.lock();
            if inner.closed {
                return Err(EngineError::Closed);
            }
            if inner.remote.is_none() {
                return Err(EngineError::PeerConnection(
                    "remote description not set".to_owned(),
                ));
            }
            if candidate.is_end_of_candidates() {
                return Ok(());
            }
            inner.remote_candidates += 1;
        }

        self.advance();
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        let remote_id = {
            let mut inner = self.peer.lock();
            if inner.closed {
                return Ok(());
            }
            inner.closed = true;
            inner.state = Some(ConnectionState::Closed);
            inner.remote_peer.clone()
        };

        self.network.peers.remove(&self.peer.id);
        debug!("Loopback peer {} closed", self.peer.id);

        if let Some(remote) = remote_id.and_then(|id| self.network.peer(&id)) {
            remote.on_remote_closed();
        }
        Ok(())
    }
}
