//! Room lifecycle, membership and the password gate.
//!
//! The registry is plain synchronous state; the hub wraps it in a single
//! `RwLock` and fans out events while still holding the write guard, which is
//! what gives every room a total order of control events.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use thiserror::Error;
use watchparty_protocol::{Clock, Participant, ParticipantId, PlaybackState, RoomId, VideoAction};

// Resource limits
pub const MAX_MEMBERS_PER_ROOM: usize = 20;
const MAX_ID_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    #[error("room {0} requires a password")]
    PasswordRequired(RoomId),
    #[error("incorrect password for room {0}")]
    PasswordIncorrect(RoomId),
    #[error("room {0} is full")]
    RoomFull(RoomId),
    #[error("only the room creator can change the password")]
    NotAuthorized,
    #[error("{0} is not a member of room {1}")]
    NotAMember(ParticipantId, RoomId),
    #[error("password must not be empty")]
    InvalidPassword,
    #[error("invalid value {value} for {action:?}")]
    InvalidValue { action: VideoAction, value: f64 },
    #[error("could not allocate a free room id")]
    IdSpaceExhausted,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub creator_id: ParticipantId,
    password: Option<String>,
    /// Members in join order.
    pub members: Vec<Participant>,
    pub created_at: u64,
    pub playback: PlaybackState,
}

impl Room {
    pub fn is_member(&self, id: &ParticipantId) -> bool {
        self.member(id).is_some()
    }

    pub fn member(&self, id: &ParticipantId) -> Option<&Participant> {
        self.members.iter().find(|m| &m.id == id)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.members.iter().map(|m| &m.id)
    }

    pub fn password_protected(&self) -> bool {
        self.password.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Other members remain and must be told.
    Left,
    /// The leaver was the last member; the room no longer exists.
    RoomDestroyed,
}

pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    clock: Arc<dyn Clock>,
    max_members: usize,
}

impl RoomRegistry {
    pub fn new(clock: Arc<dyn Clock>, max_members: usize) -> Self {
        Self { rooms: HashMap::new(), clock, max_members }
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Allocates a fresh room with `creator` as creator and sole member.
    pub fn create_room(&mut self, creator: Participant) -> Result<RoomId, RegistryError> {
        let room_id = (0..MAX_ID_ATTEMPTS)
            .map(|_| RoomId::random())
            .find(|id| !self.rooms.contains_key(id))
            .ok_or(RegistryError::IdSpaceExhausted)?;
        let now = self.clock.now_ms();

        info!("Creating room {} for {}", room_id, creator.id);
        let room = Room {
            id: room_id.clone(),
            creator_id: creator.id.clone(),
            password: None,
            playback: PlaybackState::initial(creator.id.clone(), now),
            members: vec![Participant { joined_at: now, ..creator }],
            created_at: now,
        };
        self.rooms.insert(room_id.clone(), room);
        Ok(room_id)
    }

    /// Admits `participant` if the password gate allows it. A rejected join
    /// leaves the room untouched so the caller can retry.
    pub fn join_room(
        &mut self,
        room_id: &RoomId,
        participant: Participant,
        password: Option<&str>,
    ) -> Result<JoinOutcome, RegistryError> {
        let now = self.clock.now_ms();
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.clone()))?;

        if room.is_member(&participant.id) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        if let Some(secret) = &room.password {
            match password {
                None | Some("") => return Err(RegistryError::PasswordRequired(room_id.clone())),
                Some(given) if given != secret => {
                    return Err(RegistryError::PasswordIncorrect(room_id.clone()))
                }
                Some(_) => {}
            }
        }

        if room.members.len() >= self.max_members {
            return Err(RegistryError::RoomFull(room_id.clone()));
        }

        info!("{} joining room {}", participant.id, room_id);
        room.members.push(Participant { joined_at: now, ..participant });
        Ok(JoinOutcome::Joined)
    }

    pub fn set_password(
        &mut self,
        room_id: &RoomId,
        caller: &ParticipantId,
        secret: &str,
    ) -> Result<(), RegistryError> {
        if secret.is_empty() {
            return Err(RegistryError::InvalidPassword);
        }
        let room = self.creator_room_mut(room_id, caller)?;
        room.password = Some(secret.to_string());
        info!("Password set on room {}", room_id);
        Ok(())
    }

    pub fn clear_password(&mut self, room_id: &RoomId, caller: &ParticipantId) -> Result<(), RegistryError> {
        let room = self.creator_room_mut(room_id, caller)?;
        room.password = None;
        info!("Password cleared on room {}", room_id);
        Ok(())
    }

    /// Removes the participant; destroys the room when it empties.
    pub fn leave_room(
        &mut self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
    ) -> Result<LeaveOutcome, RegistryError> {
        let now = self.clock.now_ms();
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.clone()))?;
        if !room.is_member(participant_id) {
            return Err(RegistryError::NotAMember(participant_id.clone(), room_id.clone()));
        }
        room.members.retain(|m| &m.id != participant_id);

        if room.members.is_empty() {
            let age_secs = now.saturating_sub(room.created_at) / 1000;
            info!("Closing room {} after {}s (last member left)", room_id, age_secs);
            self.rooms.remove(room_id);
            return Ok(LeaveOutcome::RoomDestroyed);
        }
        Ok(LeaveOutcome::Left)
    }

    /// Last-writer-wins: any member may control playback and the accepted
    /// command replaces the whole tuple.
    pub fn apply_control(
        &mut self,
        room_id: &RoomId,
        caller: &ParticipantId,
        action: VideoAction,
        value: f64,
    ) -> Result<PlaybackState, RegistryError> {
        if !action.is_valid_value(value) {
            return Err(RegistryError::InvalidValue { action, value });
        }
        let now = self.clock.now_ms();
        let room = self.member_room_mut(room_id, caller)?;
        room.playback = room.playback.next(action, value, caller.clone(), now);
        Ok(room.playback.clone())
    }

    pub fn update_media(
        &mut self,
        room_id: &RoomId,
        caller: &ParticipantId,
        mic_enabled: bool,
        video_enabled: bool,
    ) -> Result<(), RegistryError> {
        let room = self.member_room_mut(room_id, caller)?;
        if let Some(member) = room.members.iter_mut().find(|m| &m.id == caller) {
            member.mic_enabled = mic_enabled;
            member.video_enabled = video_enabled;
        }
        Ok(())
    }

    fn member_room_mut(&mut self, room_id: &RoomId, caller: &ParticipantId) -> Result<&mut Room, RegistryError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.clone()))?;
        if !room.is_member(caller) {
            return Err(RegistryError::NotAMember(caller.clone(), room_id.clone()));
        }
        Ok(room)
    }

    fn creator_room_mut(&mut self, room_id: &RoomId, caller: &ParticipantId) -> Result<&mut Room, RegistryError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.clone()))?;
        if &room.creator_id != caller {
            return Err(RegistryError::NotAuthorized);
        }
        Ok(room)
    }
}
