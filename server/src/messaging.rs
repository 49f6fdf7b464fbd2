use crate::registry::Room;
use crate::types::Client;
use std::collections::HashMap;
use watchparty_protocol::{HubEvent, ParticipantId};

pub fn send_to_client(client_id: &ParticipantId, clients: &HashMap<ParticipantId, Client>, event: &HubEvent) {
    if let Some(client) = clients.get(client_id) {
        match serde_json::to_string(event) {
            Ok(json) => {
                // Use try_send to avoid blocking on full buffer (bounded channel)
                if let Err(e) = client.sender.try_send(Ok(warp::ws::Message::text(json))) {
                    log::warn!("Failed to send to client {} (buffer full or closed): {}", client_id, e);
                }
            }
            Err(e) => {
                log::error!("Failed to serialize {} for client {}: {}", event.kind(), client_id, e);
            }
        }
    }
}

/// Delivers `event` to every current member of `room`, in call order.
///
/// Serializes once and enqueues without awaiting, so callers may (and do)
/// hold the registry lock across the fan-out. Delivery is at-most-once: a full
/// or closed queue drops the event for that member only.
pub fn broadcast_to_room(
    room: &Room,
    clients: &HashMap<ParticipantId, Client>,
    event: &HubEvent,
    exclude: Option<&ParticipantId>,
) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            log::error!("Failed to serialize {} for room {}: {}", event.kind(), room.id, e);
            return;
        }
    };
    let warp_msg = warp::ws::Message::text(json);
    for member_id in room.member_ids() {
        if Some(member_id) == exclude {
            continue;
        }
        if let Some(client) = clients.get(member_id) {
            if client.room_id.as_ref() != Some(&room.id) {
                continue;
            }
            if let Err(e) = client.sender.try_send(Ok(warp_msg.clone())) {
                log::warn!("Failed to broadcast to client {} (buffer full or closed): {}", member_id, e);
            }
        }
    }
}
