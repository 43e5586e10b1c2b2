//! One media peer connection and the negotiation around it.

use crate::engine::{LocalStream, MediaBackend, PeerConnection, PeerEvent, RemoteStream};
use crate::error::{CallError, EngineError, Result};
use crate::signaling::SignalingTransport;
use duet_core::{
    ConnectionState, IceCandidate, IceServerConfig, MediaConstraints, MediaKind,
    MediaToggleState, ParticipantId, RoomId, SessionDescription, SignalKind, SignalMessage,
    SignalPayload,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No description exchanged yet.
    Stable,
    HaveLocalOffer,
    /// Offer and answer are both applied.
    Established,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    ForeignReceiver,
    ForeignRoom,
    UnknownSender,
    /// Arrived before the connection was created.
    NotReady,
    Closed,
    /// An offer crossed our own outstanding offer.
    Glare,
    /// An offer after our answer; the stored answer is published again.
    DuplicateOffer,
    UnexpectedAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Applied(SignalKind),
    /// Candidate held until the remote description is set.
    Buffered,
    EndOfCandidates,
    Ignored(IgnoreReason),
}

pub struct PeerConnectionManager {
    room_id: RoomId,
    local_id: ParticipantId,
    remote_id: ParticipantId,
    backend: MediaBackend,
    transport: Arc<SignalingTransport>,
    ice_servers: Vec<IceServerConfig>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    connection: Option<Box<dyn PeerConnection>>,
    local_stream: Option<LocalStream>,
    remote_stream: Option<RemoteStream>,
    state: ConnectionState,
    negotiation: NegotiationState,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    local_offer: Option<SessionDescription>,
    local_answer: Option<SessionDescription>,
    sent_candidates: Vec<Option<IceCandidate>>,
    toggles: MediaToggleState,
    closed: bool,
}

impl PeerConnectionManager {
    /// Returns the manager together with the queue its connection reports
    /// into. The owner feeds those events back through
    /// [`handle_peer_event`](Self::handle_peer_event).
    pub fn new(
        room_id: RoomId,
        local_id: ParticipantId,
        remote_id: ParticipantId,
        backend: MediaBackend,
        transport: Arc<SignalingTransport>,
        ice_servers: Vec<IceServerConfig>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            room_id,
            local_id,
            remote_id,
            backend,
            transport,
            ice_servers,
            events_tx,
            connection: None,
            local_stream: None,
            remote_stream: None,
            state: ConnectionState::New,
            negotiation: NegotiationState::Stable,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            local_offer: None,
            local_answer: None,
            sent_candidates: Vec::new(),
            toggles: MediaToggleState::default(),
            closed: false,
        };
        (manager, events_rx)
    }

    pub async fn acquire_local_media(&mut self, constraints: MediaConstraints) -> Result<LocalStream> {
        if self.closed {
            return Err(CallError::SessionClosed);
        }
        if let Some(stream) = &self.local_stream {
            return Ok(stream.clone());
        }

        let stream = self.backend.devices.get_user_media(constraints).await?;
        for track in stream.tracks() {
            track.set_enabled(self.toggles.is_enabled(track.kind()));
        }
        info!(
            "Acquired local media for {} ({} tracks)",
            self.local_id,
            stream.tracks().len()
        );
        self.local_stream = Some(stream.clone());
        Ok(stream)
    }

    /// Creates the peer connection and attaches every local track.
    ///
    /// The returned stream fills up as remote tracks arrive.
    pub async fn create_connection(&mut self) -> Result<RemoteStream> {
        if self.closed {
            return Err(CallError::SessionClosed);
        }
        if self.connection.is_some() {
            return Err(CallError::InvalidState {
                operation: "create_connection",
                state: "connection already exists".to_owned(),
            });
        }

        let connection = self
            .backend
            .connections
            .create_peer_connection(&self.ice_servers, self.events_tx.clone())
            .await?;

        if let Some(stream) = &self.local_stream {
            for track in stream.tracks() {
                connection.add_track(Arc::clone(track), stream.id()).await?;
            }
        }

        let remote = RemoteStream::new();
        self.remote_stream = Some(remote.clone());
        self.connection = Some(connection);
        debug!("Peer connection created for room {}", self.room_id);
        Ok(remote)
    }

    pub async fn create_and_send_offer(&mut self) -> Result<()> {
        if self.negotiation != NegotiationState::Stable {
            return Err(CallError::InvalidState {
                operation: "create_and_send_offer",
                state: format!("{:?}", self.negotiation),
            });
        }
        let connection = self.connection()?;

        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        self.negotiation = NegotiationState::HaveLocalOffer;
        self.local_offer = Some(offer.clone());

        info!("Sending offer to {} in room {}", self.remote_id, self.room_id);
        self.send(SignalPayload::Offer(offer)).await;
        Ok(())
    }

    /// Publishes the outstanding offer again, followed by every candidate
    /// gathered so far. Covers a responder that subscribed after the first
    /// attempt. Returns false once there is nothing left to repeat.
    pub async fn resend_offer(&mut self) -> bool {
        if self.closed || self.negotiation != NegotiationState::HaveLocalOffer {
            return false;
        }
        let Some(offer) = self.local_offer.clone() else {
            return false;
        };

        debug!("Re-sending offer to {} in room {}", self.remote_id, self.room_id);
        self.send(SignalPayload::Offer(offer)).await;
        for candidate in self.sent_candidates.clone() {
            self.send(SignalPayload::IceCandidate(candidate)).await;
        }
        true
    }

    async fn resend_answer(&self) {
        let Some(answer) = self.local_answer.clone() else {
            debug!("Duplicate offer from {}", self.remote_id);
            return;
        };

        debug!("Repeated offer from {}, answering again", self.remote_id);
        self.send(SignalPayload::Answer(answer)).await;
        for candidate in self.sent_candidates.clone() {
            self.send(SignalPayload::IceCandidate(candidate)).await;
        }
    }

    fn connection(&self) -> Result<&dyn PeerConnection> {
        if self.closed {
            return Err(CallError::SessionClosed);
        }
        self.connection
            .as_deref()
            .ok_or_else(|| CallError::InvalidState {
                operation: "negotiate",
                state: "no connection".to_owned(),
            })
    }

    fn check_envelope(&self, message: &SignalMessage) -> Option<IgnoreReason> {
        if self.closed {
            Some(IgnoreReason::Closed)
        } else if !message.is_addressed_to(&self.local_id) {
            Some(IgnoreReason::ForeignReceiver)
        } else if message.room_id != self.room_id {
            Some(IgnoreReason::ForeignRoom)
        } else if message.sender != self.remote_id {
            Some(IgnoreReason::UnknownSender)
        } else if self.connection.is_none() {
            Some(IgnoreReason::NotReady)
        } else {
            None
        }
    }

    pub async fn handle_incoming_signal(
        &mut self,
        message: SignalMessage,
    ) -> std::result::Result<SignalOutcome, EngineError> {
        if let Some(reason) = self.check_envelope(&message) {
            debug!(
                "Ignoring {:?} from {} to {}: {:?}",
                message.kind(),
                message.sender,
                message.receiver,
                reason
            );
            return Ok(SignalOutcome::Ignored(reason));
        }
        let Some(connection) = self.connection.as_deref() else {
            return Ok(SignalOutcome::Ignored(IgnoreReason::NotReady));
        };

        match message.payload {
            SignalPayload::Offer(offer) => {
                match self.negotiation {
                    NegotiationState::HaveLocalOffer => {
                        warn!("Offer from {} collided with our own, dropping it", self.remote_id);
                        return Ok(SignalOutcome::Ignored(IgnoreReason::Glare));
                    }
                    NegotiationState::Established => {
                        // Our answer may never have reached the initiator.
                        self.resend_answer().await;
                        return Ok(SignalOutcome::Ignored(IgnoreReason::DuplicateOffer));
                    }
                    NegotiationState::Stable => {}
                }

                connection.set_remote_description(offer).await?;
                self.remote_description_set = true;
                let answer = connection.create_answer().await?;
                connection.set_local_description(answer.clone()).await?;
                self.negotiation = NegotiationState::Established;
                self.local_answer = Some(answer.clone());
                self.flush_pending_candidates().await;

                info!("Answering offer from {} in room {}", self.remote_id, self.room_id);
                self.send(SignalPayload::Answer(answer)).await;
                Ok(SignalOutcome::Applied(SignalKind::Offer))
            }
            SignalPayload::Answer(answer) => {
                if self.negotiation != NegotiationState::HaveLocalOffer {
                    warn!("Answer from {} without a local offer", self.remote_id);
                    return Ok(SignalOutcome::Ignored(IgnoreReason::UnexpectedAnswer));
                }

                connection.set_remote_description(answer).await?;
                self.remote_description_set = true;
                self.negotiation = NegotiationState::Established;
                self.flush_pending_candidates().await;

                debug!("Applied answer from {}", self.remote_id);
                Ok(SignalOutcome::Applied(SignalKind::Answer))
            }
            SignalPayload::IceCandidate(None) => Ok(SignalOutcome::EndOfCandidates),
            SignalPayload::IceCandidate(Some(candidate)) => {
                if candidate.is_end_of_candidates() {
                    return Ok(SignalOutcome::EndOfCandidates);
                }
                if !self.remote_description_set {
                    self.pending_candidates.push(candidate);
                    return Ok(SignalOutcome::Buffered);
                }
                connection.add_ice_candidate(candidate).await?;
                Ok(SignalOutcome::Applied(SignalKind::IceCandidate))
            }
        }
    }

    async fn flush_pending_candidates(&mut self) {
        let Some(connection) = self.connection.as_deref() else {
            return;
        };
        for candidate in self.pending_candidates.drain(..) {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!("Failed to apply buffered candidate: {}", e);
            }
        }
    }

    /// Applies one engine callback. Returns the new connection state when
    /// it changed.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Option<ConnectionState> {
        if self.closed {
            return None;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.sent_candidates.push(candidate.clone());
                self.send(SignalPayload::IceCandidate(candidate)).await;
                None
            }
            PeerEvent::RemoteTrack(track) => {
                debug!("Remote {} track {} from {}", track.kind, track.id, self.remote_id);
                if let Some(remote) = &self.remote_stream {
                    remote.add_track(track);
                }
                None
            }
            PeerEvent::StateChanged(next) => {
                if next == self.state {
                    return None;
                }
                if !self.state.can_transition_to(next) {
                    debug!("Ignoring state change {} -> {}", self.state, next);
                    return None;
                }
                info!("Connection to {} is {}", self.remote_id, next);
                self.state = next;
                Some(next)
            }
        }
    }

    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.set_enabled(MediaKind::Video, enabled);
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.set_enabled(MediaKind::Audio, enabled);
    }

    fn set_enabled(&mut self, kind: MediaKind, enabled: bool) {
        self.toggles.set(kind, enabled);
        if let Some(stream) = &self.local_stream {
            for track in stream.tracks_of(kind) {
                track.set_enabled(enabled);
            }
        }
        debug!("Local {} {}", kind, if enabled { "enabled" } else { "disabled" });
    }

    /// Releases devices, the connection and the room subscription.
    /// Safe to call from any state and more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(stream) = self.local_stream.take() {
            stream.stop();
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!("Closing peer connection failed: {}", e);
            }
        }
        self.transport.close().await;
        self.pending_candidates.clear();
        self.state = ConnectionState::Closed;
        info!("Peer connection to {} closed", self.remote_id);
    }

    async fn send(&self, payload: SignalPayload) {
        let message = SignalMessage::new(
            self.local_id.clone(),
            self.remote_id.clone(),
            self.room_id.clone(),
            payload,
        );
        // The transport logs failures; a lost message shows up as a stall.
        let _ = self.transport.send(&message).await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiation
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub fn toggles(&self) -> MediaToggleState {
        self.toggles
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        if let Some(stream) = self.local_stream.take() {
            stream.stop();
        }
    }
}
