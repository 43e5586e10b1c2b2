use crate::config::CallConfig;
use crate::engine::{LocalStream, MediaBackend, RemoteStream};
use crate::error::{CallError, MediaError, Result};
use crate::matching::MatchingCoordinator;
use crate::session::{self, CallObserver, CallParams, EndReason, SessionHandle};
use crate::signaling::RealtimeChannel;
use duet_core::{ConnectionState, ParticipantId, PresenceStatus, RoomId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

/// Where the user currently is, as far as the UI is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Searching,
    InCall {
        room_id: RoomId,
        remote_id: ParticipantId,
    },
    /// Camera or microphone could not be opened; `retry` starts over.
    MediaBlocked {
        error: MediaError,
    },
    CallEnded {
        reason: EndReason,
    },
}

struct ActiveCall {
    handle: SessionHandle,
    /// Set before the controller ends the call itself.
    detached: Arc<AtomicBool>,
}

/// Forwards session callbacks and notices calls ending on their own.
struct PhaseTracker {
    inner: Arc<dyn CallObserver>,
    phase: Arc<watch::Sender<CallPhase>>,
    matcher: Arc<dyn MatchingCoordinator>,
    local_id: ParticipantId,
    room_id: RoomId,
    detached: Arc<AtomicBool>,
    presence_gate: Arc<Mutex<()>>,
}

impl CallObserver for PhaseTracker {
    fn on_local_stream(&self, stream: &LocalStream) {
        self.inner.on_local_stream(stream);
    }

    fn on_remote_stream(&self, stream: &RemoteStream) {
        self.inner.on_remote_stream(stream);
    }

    fn on_connection_state_change(&self, state: ConnectionState) {
        self.inner.on_connection_state_change(state);
    }

    fn on_call_ended(&self, reason: EndReason) {
        self.inner.on_call_ended(reason);
        if self.detached.load(Ordering::SeqCst) {
            return;
        }

        let room_id = self.room_id.clone();
        let changed = self.phase.send_if_modified(|phase| match phase {
            CallPhase::InCall { room_id: current, .. } if *current == room_id => {
                *phase = CallPhase::CallEnded { reason };
                true
            }
            _ => false,
        });
        if !changed {
            return;
        }

        info!("Call in room {} ended: {:?}", room_id, reason);
        let matcher = Arc::clone(&self.matcher);
        let local_id = self.local_id.clone();
        let phase = Arc::clone(&self.phase);
        let gate = Arc::clone(&self.presence_gate);
        tokio::spawn(async move {
            if let Err(e) = matcher.end_room(&room_id).await {
                warn!("Failed to end room {}: {}", room_id, e);
            }

            // The user may have moved on (e.g. `find_match`) since the call ended.
            let _gate = gate.lock().await;
            if !matches!(*phase.borrow(), CallPhase::CallEnded { .. }) {
                return;
            }
            if let Err(e) = matcher.update_presence(&local_id, PresenceStatus::Idle).await {
                warn!("Failed to update presence of {}: {}", local_id, e);
            }
        });
    }
}

/// Application-owned lifecycle of one user's calls. Holds at most one
/// session at a time.
pub struct CallController {
    local_id: ParticipantId,
    backend: MediaBackend,
    channel: Arc<dyn RealtimeChannel>,
    matcher: Arc<dyn MatchingCoordinator>,
    config: CallConfig,
    observer: Arc<dyn CallObserver>,
    current: Option<ActiveCall>,
    last_params: Option<CallParams>,
    phase: Arc<watch::Sender<CallPhase>>,
    /// Serializes presence writes; phase changes happen before taking it.
    presence_gate: Arc<Mutex<()>>,
}

impl CallController {
    pub fn new(
        local_id: ParticipantId,
        backend: MediaBackend,
        channel: Arc<dyn RealtimeChannel>,
        matcher: Arc<dyn MatchingCoordinator>,
        config: CallConfig,
        observer: Arc<dyn CallObserver>,
    ) -> Self {
        let (phase, _) = watch::channel(CallPhase::Idle);
        Self {
            local_id,
            backend,
            channel,
            matcher,
            config,
            observer,
            current: None,
            last_params: None,
            phase: Arc::new(phase),
            presence_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn phase(&self) -> CallPhase {
        self.phase.borrow().clone()
    }

    pub fn phases(&self) -> watch::Receiver<CallPhase> {
        self.phase.subscribe()
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.current.as_ref().map(|c| &c.handle)
    }

    /// Calls `remote_id` in an already agreed room, e.g. an accepted invite.
    pub async fn start_call(&mut self, room_id: RoomId, remote_id: ParticipantId) -> Result<()> {
        self.dispose(EndReason::LocalHangup).await;
        let params = CallParams::new(room_id, self.local_id.clone(), remote_id);
        self.launch(params).await
    }

    /// Waits for the matcher to pair us and starts the resulting call.
    pub async fn find_match(&mut self) -> Result<()> {
        self.dispose(EndReason::LocalHangup).await;
        self.phase.send_replace(CallPhase::Searching);
        self.set_presence(PresenceStatus::Matching).await;

        let assignment = match self.matcher.find_match(&self.local_id).await {
            Ok(assignment) => assignment,
            Err(e) => {
                self.phase.send_replace(CallPhase::Idle);
                self.set_presence(PresenceStatus::Online).await;
                return Err(e.into());
            }
        };
        info!(
            "{} matched with {} in room {}",
            self.local_id, assignment.remote_id, assignment.room_id
        );

        let params = CallParams::from_assignment(self.local_id.clone(), assignment);
        self.launch(params).await
    }

    /// Repeats the complete setup of the last call attempt.
    pub async fn retry(&mut self) -> Result<()> {
        let params = self.last_params.clone().ok_or(CallError::NoActiveCall)?;
        self.dispose(EndReason::LocalHangup).await;
        info!("Retrying call in room {}", params.room_id);
        self.launch(params).await
    }

    pub async fn toggle_video(&self, enabled: bool) -> Result<()> {
        self.active()?.toggle_video(enabled).await
    }

    pub async fn toggle_audio(&self, enabled: bool) -> Result<()> {
        self.active()?.toggle_audio(enabled).await
    }

    /// Hangs up without looking for another match.
    pub async fn end_call(&mut self) -> Result<()> {
        let was_active = self
            .current
            .as_ref()
            .map(|c| c.handle.is_active())
            .ok_or(CallError::NoActiveCall)?;

        self.dispose(EndReason::LocalHangup).await;
        if was_active {
            self.phase.send_replace(CallPhase::CallEnded {
                reason: EndReason::LocalHangup,
            });
        }
        Ok(())
    }

    /// Ends the current call completely, then looks for the next partner.
    pub async fn skip_to_next_match(&mut self) -> Result<()> {
        self.dispose(EndReason::Skipped).await;
        self.find_match().await
    }

    fn active(&self) -> Result<&SessionHandle> {
        match &self.current {
            Some(call) if call.handle.is_active() => Ok(&call.handle),
            _ => Err(CallError::NoActiveCall),
        }
    }

    async fn launch(&mut self, params: CallParams) -> Result<()> {
        self.last_params = Some(params.clone());
        self.phase.send_replace(CallPhase::InCall {
            room_id: params.room_id.clone(),
            remote_id: params.remote_id.clone(),
        });

        let detached = Arc::new(AtomicBool::new(false));
        let tracker = Arc::new(PhaseTracker {
            inner: Arc::clone(&self.observer),
            phase: Arc::clone(&self.phase),
            matcher: Arc::clone(&self.matcher),
            local_id: self.local_id.clone(),
            room_id: params.room_id.clone(),
            detached: Arc::clone(&detached),
            presence_gate: Arc::clone(&self.presence_gate),
        });

        let started = session::start_call(
            self.backend.clone(),
            Arc::clone(&self.channel),
            &self.config,
            params,
            tracker,
        )
        .await;

        match started {
            Ok(handle) => {
                self.current = Some(ActiveCall { handle, detached });
                self.set_presence(PresenceStatus::InCall).await;
                Ok(())
            }
            Err(CallError::Media(error)) => {
                warn!("Media unavailable: {}", error);
                self.phase.send_replace(CallPhase::MediaBlocked {
                    error: error.clone(),
                });
                self.set_presence(PresenceStatus::Idle).await;
                Err(CallError::Media(error))
            }
            Err(e) => {
                self.phase.send_replace(CallPhase::Idle);
                self.set_presence(PresenceStatus::Idle).await;
                Err(e)
            }
        }
    }

    /// Tears the current session down and waits until it is released.
    async fn dispose(&mut self, reason: EndReason) {
        let Some(call) = self.current.take() else {
            return;
        };
        call.detached.store(true, Ordering::SeqCst);
        call.handle.end(reason).await;

        let room_id = &call.handle.params().room_id;
        if let Err(e) = self.matcher.end_room(room_id).await {
            warn!("Failed to end room {}: {}", room_id, e);
        }
        self.set_presence(PresenceStatus::Idle).await;
    }

    async fn set_presence(&self, status: PresenceStatus) {
        let _gate = self.presence_gate.lock().await;
        if let Err(e) = self.matcher.update_presence(&self.local_id, status).await {
            warn!("Failed to update presence of {}: {}", self.local_id, e);
        }
    }
}
