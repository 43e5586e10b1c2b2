use crate::error::MatchError;
use async_trait::async_trait;
use duet_core::{CallRoom, ParticipantId, PresenceStatus, Role, RoomId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info};

/// What the matcher tells one participant about its next call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchAssignment {
    pub room_id: RoomId,
    pub remote_id: ParticipantId,
    pub is_initiator: bool,
}

impl MatchAssignment {
    pub fn new(
        room_id: RoomId,
        local: &ParticipantId,
        remote: ParticipantId,
    ) -> Result<Self, MatchError> {
        if local == &remote {
            return Err(MatchError::SelfMatch);
        }
        Ok(Self {
            room_id,
            is_initiator: Role::derive(local, &remote).is_initiator(),
            remote_id: remote,
        })
    }

    /// The assignment of `local` in `room`.
    pub fn for_room(room: &CallRoom, local: &ParticipantId) -> Result<Self, MatchError> {
        let remote = room
            .other(local)
            .ok_or_else(|| MatchError::UnknownRoom(room.id.to_string()))?;
        Self::new(room.id.clone(), local, remote.clone())
    }
}

#[async_trait]
pub trait MatchingCoordinator: Send + Sync {
    /// Waits until `local` is paired with somebody else.
    async fn find_match(&self, local: &ParticipantId) -> Result<MatchAssignment, MatchError>;

    async fn end_room(&self, room_id: &RoomId) -> Result<(), MatchError>;

    async fn update_presence(
        &self,
        _participant: &ParticipantId,
        _status: PresenceStatus,
    ) -> Result<(), MatchError> {
        Ok(())
    }
}

struct Waiter {
    participant: ParticipantId,
    notify: oneshot::Sender<CallRoom>,
}

#[derive(Default)]
struct MatchState {
    waiting: VecDeque<Waiter>,
    rooms: HashMap<RoomId, CallRoom>,
    presence: HashMap<ParticipantId, PresenceStatus>,
}

/// First come, first served pairing queue.
#[derive(Clone, Default)]
pub struct InMemoryMatchmaker {
    state: Arc<Mutex<MatchState>>,
}

impl InMemoryMatchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a room for two known participants, bypassing the queue.
    pub async fn create_room(
        &self,
        first: ParticipantId,
        second: ParticipantId,
    ) -> Result<CallRoom, MatchError> {
        if first == second {
            return Err(MatchError::SelfMatch);
        }
        let room = CallRoom::new(first, second);
        self.state
            .lock()
            .await
            .rooms
            .insert(room.id.clone(), room.clone());
        info!("Room {} created by invite", room.id);
        Ok(room)
    }

    /// Removes `participant` from the queue. A pending `find_match` for it
    /// fails with [`MatchError::Cancelled`].
    pub async fn cancel(&self, participant: &ParticipantId) {
        self.state
            .lock()
            .await
            .waiting
            .retain(|w| &w.participant != participant);
    }

    pub async fn room(&self, room_id: &RoomId) -> Option<CallRoom> {
        self.state.lock().await.rooms.get(room_id).cloned()
    }

    pub async fn presence(&self, participant: &ParticipantId) -> Option<PresenceStatus> {
        self.state.lock().await.presence.get(participant).copied()
    }

    pub async fn waiting(&self) -> usize {
        self.state.lock().await.waiting.len()
    }
}

#[async_trait]
impl MatchingCoordinator for InMemoryMatchmaker {
    async fn find_match(&self, local: &ParticipantId) -> Result<MatchAssignment, MatchError> {
        let rx = {
            let mut state = self.state.lock().await;
            state
                .waiting
                .retain(|w| !w.notify.is_closed() && &w.participant != local);

            while let Some(waiter) = state.waiting.pop_front() {
                let room = CallRoom::new(waiter.participant.clone(), local.clone());
                if waiter.notify.send(room.clone()).is_err() {
                    continue;
                }
                info!(
                    "Matched {} with {} in room {}",
                    waiter.participant, local, room.id
                );
                state.rooms.insert(room.id.clone(), room.clone());
                return MatchAssignment::for_room(&room, local);
            }

            let (tx, rx) = oneshot::channel();
            state.waiting.push_back(Waiter {
                participant: local.clone(),
                notify: tx,
            });
            debug!("{} is waiting for a match", local);
            rx
        };

        let room = rx.await.map_err(|_| MatchError::Cancelled)?;
        MatchAssignment::for_room(&room, local)
    }

    async fn end_room(&self, room_id: &RoomId) -> Result<(), MatchError> {
        let mut state = self.state.lock().await;
        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| MatchError::UnknownRoom(room_id.to_string()))?;
        room.end();
        info!("Room {} ended", room_id);
        Ok(())
    }

    async fn update_presence(
        &self,
        participant: &ParticipantId,
        status: PresenceStatus,
    ) -> Result<(), MatchError> {
        self.state
            .lock()
            .await
            .presence
            .insert(participant.clone(), status);
        Ok(())
    }
}
