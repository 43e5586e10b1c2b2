//! A single call, from opening the room topic to teardown.

use crate::config::CallConfig;
use crate::engine::{LocalStream, MediaBackend, PeerEvent, RemoteStream};
use crate::error::{CallError, MatchError, Result};
use crate::matching::MatchAssignment;
use crate::peer::{NegotiationState, PeerConnectionManager};
use crate::signaling::{RealtimeChannel, SignalingTransport};
use duet_core::{ConnectionState, ParticipantId, Role, RoomId, SignalMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallParams {
    pub room_id: RoomId,
    pub local_id: ParticipantId,
    pub remote_id: ParticipantId,
    pub is_initiator: bool,
}

impl CallParams {
    /// Derives the initiator role from the id ordering.
    pub fn new(room_id: RoomId, local_id: ParticipantId, remote_id: ParticipantId) -> Self {
        let is_initiator = Role::derive(&local_id, &remote_id).is_initiator();
        Self {
            room_id,
            local_id,
            remote_id,
            is_initiator,
        }
    }

    pub fn from_assignment(local_id: ParticipantId, assignment: MatchAssignment) -> Self {
        Self {
            room_id: assignment.room_id,
            local_id,
            remote_id: assignment.remote_id,
            is_initiator: assignment.is_initiator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    Skipped,
    /// The connection dropped after having been established.
    ConnectionLost(ConnectionState),
    /// The connection never came up.
    NegotiationStall,
}

/// Receives the session's media and lifecycle notifications.
///
/// Callbacks run on the session task and must not block.
pub trait CallObserver: Send + Sync {
    fn on_local_stream(&self, _stream: &LocalStream) {}

    fn on_remote_stream(&self, _stream: &RemoteStream) {}

    fn on_connection_state_change(&self, _state: ConnectionState) {}

    fn on_call_ended(&self, _reason: EndReason) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl CallObserver for NoopObserver {}

enum Command {
    SetVideo(bool, oneshot::Sender<()>),
    SetAudio(bool, oneshot::Sender<()>),
    End(EndReason, oneshot::Sender<()>),
}

/// Control surface of a running session.
///
/// Dropping the handle hangs up.
pub struct SessionHandle {
    params: CallParams,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    ended: watch::Receiver<Option<EndReason>>,
    local_stream: LocalStream,
    remote_stream: RemoteStream,
}

impl SessionHandle {
    pub fn params(&self) -> &CallParams {
        &self.params
    }

    pub fn local_stream(&self) -> &LocalStream {
        &self.local_stream
    }

    pub fn remote_stream(&self) -> &RemoteStream {
        &self.remote_stream
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        *self.ended.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.end_reason().is_none()
    }

    pub async fn toggle_video(&self, enabled: bool) -> Result<()> {
        self.request(|ack| Command::SetVideo(enabled, ack)).await
    }

    pub async fn toggle_audio(&self, enabled: bool) -> Result<()> {
        self.request(|ack| Command::SetAudio(enabled, ack)).await
    }

    /// Hangs up and returns once media, connection and subscription are
    /// released. Ending an already finished session does nothing.
    pub async fn end_call(&self) {
        self.end(EndReason::LocalHangup).await;
    }

    pub(crate) async fn end(&self, reason: EndReason) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::End(reason, ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        self.closed().await;
    }

    /// Resolves when the session has finished, with the reason it ended.
    pub async fn closed(&self) -> EndReason {
        let mut ended = self.ended.clone();
        // Err only means the task is gone; the last value still tells why.
        let _ = ended.wait_for(Option::is_some).await;
        let reason = *ended.borrow();
        reason.unwrap_or(EndReason::LocalHangup)
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(command(ack_tx))
            .map_err(|_| CallError::SessionClosed)?;
        ack_rx.await.map_err(|_| CallError::SessionClosed)
    }
}

/// Sets up one call and hands it to a background task.
///
/// Returns once the room topic is subscribed, local media is acquired and
/// the connection exists (and, for the initiator, the offer is sent).
/// Signals arriving in the meantime are queued and handled afterwards.
/// Any setup failure releases what was acquired before returning.
pub async fn start_call(
    backend: MediaBackend,
    channel: Arc<dyn RealtimeChannel>,
    config: &CallConfig,
    params: CallParams,
    observer: Arc<dyn CallObserver>,
) -> Result<SessionHandle> {
    if params.local_id == params.remote_id {
        return Err(MatchError::SelfMatch.into());
    }
    info!(
        "Starting call {} -> {} in room {} as {}",
        params.local_id,
        params.remote_id,
        params.room_id,
        if params.is_initiator { "initiator" } else { "responder" }
    );

    let transport = Arc::new(SignalingTransport::new(channel));
    let (signals_tx, signals_rx) = mpsc::unbounded_channel();
    transport.on_message(move |message| {
        let _ = signals_tx.send(message);
    });
    transport.open(&params.room_id).await?;

    let (mut manager, events_rx) = PeerConnectionManager::new(
        params.room_id.clone(),
        params.local_id.clone(),
        params.remote_id.clone(),
        backend,
        transport,
        config.ice_servers.clone(),
    );

    let (local_stream, remote_stream) = match setup(&mut manager, config, &params).await {
        Ok(streams) => streams,
        Err(e) => {
            warn!("Call setup in room {} failed: {}", params.room_id, e);
            manager.close().await;
            return Err(e);
        }
    };
    observer.on_local_stream(&local_stream);
    observer.on_remote_stream(&remote_stream);

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(manager.connection_state());
    let (ended_tx, ended_rx) = watch::channel(None);

    let session = CallSession {
        manager,
        observer,
        commands_rx,
        signals_rx,
        events_rx,
        state_tx,
        ended_tx,
        connect_timeout: config.connect_timeout(),
        offer_resend: config.offer_resend_interval(),
        connected_once: false,
    };
    tokio::spawn(session.run());

    Ok(SessionHandle {
        params,
        commands: commands_tx,
        state: state_rx,
        ended: ended_rx,
        local_stream,
        remote_stream,
    })
}

async fn setup(
    manager: &mut PeerConnectionManager,
    config: &CallConfig,
    params: &CallParams,
) -> Result<(LocalStream, RemoteStream)> {
    let local = manager.acquire_local_media(config.media).await?;
    let remote = manager.create_connection().await?;
    if params.is_initiator {
        manager.create_and_send_offer().await?;
    }
    Ok((local, remote))
}

struct CallSession {
    manager: PeerConnectionManager,
    observer: Arc<dyn CallObserver>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    signals_rx: mpsc::UnboundedReceiver<SignalMessage>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    state_tx: watch::Sender<ConnectionState>,
    ended_tx: watch::Sender<Option<EndReason>>,
    connect_timeout: Duration,
    offer_resend: Duration,
    connected_once: bool,
}

impl CallSession {
    async fn run(mut self) {
        debug!("Call session loop started");

        let started = Instant::now();
        let stall = tokio::time::sleep_until(started + self.connect_timeout);
        tokio::pin!(stall);
        let mut resend = tokio::time::interval_at(started + self.offer_resend, self.offer_resend);
        let mut awaiting_answer = self.manager.negotiation_state() == NegotiationState::HaveLocalOffer;

        let (reason, ack) = loop {
            tokio::select! {
                cmd = self.commands_rx.recv() => match cmd {
                    Some(Command::SetVideo(enabled, ack)) => {
                        self.manager.set_video_enabled(enabled);
                        let _ = ack.send(());
                    }
                    Some(Command::SetAudio(enabled, ack)) => {
                        self.manager.set_audio_enabled(enabled);
                        let _ = ack.send(());
                    }
                    Some(Command::End(reason, ack)) => break (reason, Some(ack)),
                    None => {
                        info!("Session handle dropped, hanging up");
                        break (EndReason::LocalHangup, None);
                    }
                },

                Some(message) = self.signals_rx.recv() => {
                    match self.manager.handle_incoming_signal(message).await {
                        Ok(outcome) => debug!("Signal handled: {:?}", outcome),
                        Err(e) => warn!("Failed to apply signal: {}", e),
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    let Some(state) = self.manager.handle_peer_event(event).await else {
                        continue;
                    };
                    self.state_tx.send_replace(state);
                    self.observer.on_connection_state_change(state);

                    if state == ConnectionState::Connected {
                        self.connected_once = true;
                    } else if self.connected_once && state.is_lost() {
                        break (EndReason::ConnectionLost(state), None);
                    } else if state == ConnectionState::Failed {
                        break (EndReason::NegotiationStall, None);
                    }
                }

                _ = resend.tick(), if awaiting_answer => {
                    awaiting_answer = self.manager.resend_offer().await;
                }

                _ = &mut stall, if !self.connected_once => {
                    warn!("Could not connect within {:?}", self.connect_timeout);
                    break (EndReason::NegotiationStall, None);
                }
            }
        };

        self.manager.close().await;
        self.state_tx.send_replace(ConnectionState::Closed);
        self.observer
            .on_connection_state_change(ConnectionState::Closed);
        self.observer.on_call_ended(reason);
        self.ended_tx.send_replace(Some(reason));
        if let Some(ack) = ack {
            let _ = ack.send(());
        }

        info!("Call session finished: {:?}", reason);
    }
}
