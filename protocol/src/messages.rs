//! Hub wire protocol. Every frame is a JSON object tagged by `"type"`.

use serde::{Deserialize, Serialize};

use crate::ids::{ParticipantId, RoomId};
use crate::types::{ChatMessage, Participant, PlaybackState, VideoAction};

/// Client → hub commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    CreateRoom,
    JoinRoom {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Retry of the pending join after `passwordRequired`/`passwordIncorrect`.
    CheckRoomPassword { secret: String },
    SetRoomPassword { secret: String },
    RemoveRoomPassword,
    LeaveRoom,
    ChatMessage { id: String, text: String, sent_at: u64 },
    VideoControl { action: VideoAction, value: f64 },
    MediaState { mic_enabled: bool, video_enabled: bool },
    Ping { ts: u64 },
    #[serde(other)]
    Unknown,
}

impl ClientCommand {
    /// Name used in logs; payloads are never logged.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::CreateRoom => "createRoom",
            ClientCommand::JoinRoom { .. } => "joinRoom",
            ClientCommand::CheckRoomPassword { .. } => "checkRoomPassword",
            ClientCommand::SetRoomPassword { .. } => "setRoomPassword",
            ClientCommand::RemoveRoomPassword => "removeRoomPassword",
            ClientCommand::LeaveRoom => "leaveRoom",
            ClientCommand::ChatMessage { .. } => "chatMessage",
            ClientCommand::VideoControl { .. } => "videoControl",
            ClientCommand::MediaState { .. } => "mediaState",
            ClientCommand::Ping { .. } => "ping",
            ClientCommand::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    RoomNotFound,
    RoomFull,
    NotAuthorized,
    NotInRoom,
    NoPendingJoin,
    InvalidPassword,
    InvalidValue,
    InvalidMessage,
    MessageTooLarge,
    RateLimited,
}

/// Hub → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HubEvent {
    Welcome {
        participant_id: ParticipantId,
    },
    /// Sent only to the participant whose create/join was accepted.
    RoomJoined {
        room_id: RoomId,
        creator_id: ParticipantId,
        members: Vec<Participant>,
        playback: PlaybackState,
        password_protected: bool,
    },
    UserJoined {
        id: ParticipantId,
        name: String,
        mic_enabled: bool,
        video_enabled: bool,
    },
    UserLeft {
        id: ParticipantId,
    },
    ChatMessage(ChatMessage),
    VideoControl {
        action: VideoAction,
        value: f64,
        state: PlaybackState,
    },
    MediaState {
        id: ParticipantId,
        mic_enabled: bool,
        video_enabled: bool,
    },
    PasswordRequired {
        room_id: RoomId,
    },
    PasswordIncorrect {
        room_id: RoomId,
    },
    /// Acknowledges a creator's password change.
    PasswordUpdated {
        protected: bool,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Pong {
        ts: u64,
        server_ts: u64,
    },
}

impl HubEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        HubEvent::Error { code, message: message.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HubEvent::Welcome { .. } => "welcome",
            HubEvent::RoomJoined { .. } => "roomJoined",
            HubEvent::UserJoined { .. } => "userJoined",
            HubEvent::UserLeft { .. } => "userLeft",
            HubEvent::ChatMessage(_) => "chatMessage",
            HubEvent::VideoControl { .. } => "videoControl",
            HubEvent::MediaState { .. } => "mediaState",
            HubEvent::PasswordRequired { .. } => "passwordRequired",
            HubEvent::PasswordIncorrect { .. } => "passwordIncorrect",
            HubEvent::PasswordUpdated { .. } => "passwordUpdated",
            HubEvent::Error { .. } => "error",
            HubEvent::Pong { .. } => "pong",
        }
    }
}
