//! webrtc-rs backend.

use crate::engine::{
    LocalStream, MediaBackend, MediaDevices, MediaTrack, PeerConnection, PeerConnectionFactory,
    PeerEvent, PeerEventSender, RemoteTrack,
};
use crate::error::{EngineError, MediaError};
use async_trait::async_trait;
use duet_core::{
    ConnectionState, IceCandidate, IceServerConfig, MediaConstraints, MediaKind, SdpType,
    SessionDescription,
};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

fn engine_err(e: webrtc::Error) -> EngineError {
    EngineError::PeerConnection(e.to_string())
}

/// A local track fed by the application through [`SampleTrack::write_sample`].
#[derive(Debug)]
pub struct SampleTrack {
    id: String,
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl SampleTrack {
    pub fn new(kind: MediaKind, stream_id: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.clone(),
            stream_id.to_owned(),
        ));

        Self {
            id,
            kind,
            track,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        }
    }

    pub fn local_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Pushes one encoded frame. Frames written while the track is disabled
    /// or stopped are dropped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<(), EngineError> {
        if !self.is_enabled() || !self.is_live() {
            return Ok(());
        }
        self.track.write_sample(sample).await.map_err(engine_err)
    }
}

impl MediaTrack for SampleTrack {
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
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One 20 ms Opus frame of silence.
const OPUS_SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];

/// VP8 key-frame header of a 16x16 frame.
const VP8_BLANK_FRAME: &[u8] = &[0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a, 0x10, 0x00, 0x10, 0x00];

fn blank_frame(kind: MediaKind) -> (&'static [u8], Duration) {
    match kind {
        MediaKind::Audio => (OPUS_SILENCE, Duration::from_millis(20)),
        MediaKind::Video => (VP8_BLANK_FRAME, Duration::from_millis(33)),
    }
}

/// Feeds blank frames into `track` at its frame rate until the track is
/// stopped or dropped.
fn spawn_sample_pump(track: Weak<SampleTrack>) {
    tokio::spawn(async move {
        let Some(kind) = track.upgrade().map(|t| t.kind) else {
            return;
        };
        let (frame, duration) = blank_frame(kind);
        let sample = Sample {
            data: bytes::Bytes::from_static(frame),
            duration,
            ..Default::default()
        };

        let mut ticker = tokio::time::interval(duration);
        loop {
            ticker.tick().await;
            let Some(track) = track.upgrade() else {
                break;
            };
            if !track.is_live() {
                break;
            }
            if let Err(e) = track.write_sample(&sample).await {
                debug!("Dropped {} sample on track {}: {}", kind, track.id, e);
            }
        }
        debug!("Sample pump for {} track exited", kind);
    });
}

/// Capture devices backed by [`SampleTrack`]s instead of hardware. Every
/// captured track is fed blank frames while it is live.
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    available: Vec<MediaKind>,
}

impl SyntheticCapture {
    pub fn new(available: Vec<MediaKind>) -> Self {
        Self { available }
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new(vec![MediaKind::Audio, MediaKind::Video])
    }
}

#[async_trait]
impl MediaDevices for SyntheticCapture {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalStream, MediaError> {
        let stream_id = Uuid::new_v4().to_string();
        let mut captured: Vec<Arc<SampleTrack>> = Vec::new();

        for kind in [MediaKind::Audio, MediaKind::Video] {
            if !constraints.wants(kind) {
                continue;
            }
            if !self.available.contains(&kind) {
                return Err(MediaError::DeviceUnavailable(kind));
            }
            captured.push(Arc::new(SampleTrack::new(kind, &stream_id)));
        }

        if captured.is_empty() {
            return Err(MediaError::Capture("no media kind requested".to_owned()));
        }

        let tracks: Vec<Arc<dyn MediaTrack>> = captured
            .into_iter()
            .map(|track| {
                spawn_sample_pump(Arc::downgrade(&track));
                track as Arc<dyn MediaTrack>
            })
            .collect();
        Ok(LocalStream::new(stream_id, tracks))
    }
}

pub struct WebRtcEngine {
    api: API,
}

impl WebRtcEngine {
    pub fn new() -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(engine_err)?;
        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(engine_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }

    /// Backend pairing this engine with synthetic capture devices.
    pub fn backend() -> Result<MediaBackend, EngineError> {
        Ok(MediaBackend::new(
            Arc::new(SyntheticCapture::default()),
            Arc::new(Self::new()?),
        ))
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn map_kind(kind: RTPCodecType) -> Option<MediaKind> {
    match kind {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        RTPCodecType::Unspecified => None,
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcEngine {
    async fn create_peer_connection(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerConnection>, EngineError> {
        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config)
                .await
                .map_err(engine_err)?,
        );

        let state_tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                info!("Peer connection state changed: {:?}", s);
                if let Some(state) = map_state(s) {
                    let _ = tx.send(PeerEvent::StateChanged(state));
                }
            })
        }));

        let ice_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            Box::pin(async move {
                let Some(candidate) = c else {
                    let _ = tx.send(PeerEvent::LocalCandidate(None));
                    return;
                };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let _ = tx.send(PeerEvent::LocalCandidate(Some(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })));
            })
        }));

        let track_tx = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            Box::pin(async move {
                let Some(kind) = map_kind(track.kind()) else {
                    return;
                };
                debug!("Remote {} track {} arrived", kind, track.id());
                let _ = tx.send(PeerEvent::RemoteTrack(RemoteTrack {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                }));
            })
        }));

        Ok(Box::new(WebRtcPeer { pc }))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    result.map_err(|e| EngineError::InvalidDescription(e.to_string()))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, EngineError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(EngineError::InvalidDescription(format!(
            "unexpected description type {other}"
        ))),
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        _stream_id: &str,
    ) -> Result<(), EngineError> {
        let Some(sample) = track.as_any().downcast_ref::<SampleTrack>() else {
            return Err(EngineError::UnsupportedTrack(track.id().to_owned()));
        };
        let local: Arc<dyn TrackLocal + Send + Sync> = sample.local_track();
        self.pc.add_track(local).await.map_err(engine_err)?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self.pc.create_offer(None).await.map_err(engine_err)?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self.pc.create_answer(None).await.map_err(engine_err)?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(engine_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(engine_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await.map_err(engine_err)
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await.map_err(engine_err)
    }
}
