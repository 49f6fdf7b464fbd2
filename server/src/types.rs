use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use watchparty_protocol::{Clock, Participant, ParticipantId, RoomId};

use crate::config::HubConfig;
use crate::registry::RoomRegistry;

pub type Clients = Arc<RwLock<HashMap<ParticipantId, Client>>>;
pub type Rooms = Arc<RwLock<RoomRegistry>>;
pub type ClientSender = mpsc::Sender<std::result::Result<warp::ws::Message, warp::Error>>;

/// One connected viewer as the hub sees it.
#[derive(Debug, Clone)]
pub struct Client {
    // Bounded sender to prevent OOM from slow/malicious clients
    pub sender: ClientSender,
    pub participant: Participant,
    pub room_id: Option<RoomId>,
    /// Room whose password gate rejected this client; target of `checkRoomPassword`.
    pub pending_room: Option<RoomId>,
    pub message_count: u32,
    pub last_reset: u64,
    pub last_seen: u64, // For zombie connection detection
}

/// Shared hub state handed to every connection task.
///
/// Lock order is always `rooms` before `clients`.
#[derive(Clone)]
pub struct Hub {
    pub clients: Clients,
    pub rooms: Rooms,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<HubConfig>,
}

impl Hub {
    pub fn new(config: HubConfig, clock: Arc<dyn Clock>) -> Self {
        let registry = RoomRegistry::new(clock.clone(), config.max_members_per_room);
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RwLock::new(registry)),
            clock,
            config: Arc::new(config),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

/// Query string of `GET /ws`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub participant_id: Option<String>,
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_params_deserialize() {
        let params: SessionParams =
            serde_json::from_str(r#"{"participantId": "user-1", "displayName": "Ann"}"#).unwrap();
        assert_eq!(params.participant_id.as_deref(), Some("user-1"));
        assert_eq!(params.display_name.as_deref(), Some("Ann"));

        let params: SessionParams = serde_json::from_str("{}").unwrap();
        assert!(params.participant_id.is_none());
    }
}
