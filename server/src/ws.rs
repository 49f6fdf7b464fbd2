use crate::messaging::{broadcast_to_room, send_to_client};
use crate::room::{
    handle_check_password, handle_create, handle_disconnect, handle_join, handle_leave,
    handle_password_change, registry_error_event,
};
use crate::types::{Client, Hub, SessionParams};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use watchparty_protocol::types::normalize_chat_text;
use watchparty_protocol::{
    ChatMessage, ChatSender, ClientCommand, ErrorCode, HubEvent, Participant, ParticipantId, VideoAction,
};

// Channel buffer size for client message queues (prevents OOM from slow clients)
const CLIENT_CHANNEL_BUFFER: usize = 100;

// Rate limiting constants
const RATE_LIMIT_MESSAGES: u32 = 30; // Max messages per window
const RATE_LIMIT_WINDOW_MS: u64 = 1000; // Window size in ms

// Payload validation
const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KB max message size
const MAX_DISPLAY_NAME_CHARS: usize = 64;
const MAX_PARTICIPANT_ID_LEN: usize = 64;
const MAX_CHAT_ID_LEN: usize = 64;

fn is_valid_participant_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_PARTICIPANT_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn sanitize_display_name(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(name) if !name.is_empty() => name.chars().take(MAX_DISPLAY_NAME_CHARS).collect(),
        _ => watchparty_protocol::ids::guest_name(),
    }
}

pub async fn client_connection(ws: warp::ws::WebSocket, params: SessionParams, hub: Hub) {
    let (client_ws_sender, mut client_ws_rcv) = ws.split();
    // Use bounded channel to prevent OOM from slow/malicious clients
    let (client_sender, client_rcv) = mpsc::channel(CLIENT_CHANNEL_BUFFER);
    let client_rcv = ReceiverStream::new(client_rcv);

    tokio::task::spawn(async move {
        let _ = client_rcv.forward(client_ws_sender).await;
    });

    let client_id = register_client(params, client_sender, &hub).await;

    while let Some(result) = client_ws_rcv.next().await {
        match result {
            Ok(msg) if msg.is_close() => break,
            Ok(msg) => client_msg(&client_id, msg, &hub).await,
            Err(e) => {
                debug!("WebSocket error from {}: {}", client_id, e);
                break;
            }
        }
    }

    handle_disconnect(&client_id, &hub).await;
}

/// Adopts the client's requested handle when it is well-formed and free,
/// otherwise hands out a fresh one. Either way the client learns its id from
/// the `welcome` event.
async fn register_client(params: SessionParams, sender: crate::types::ClientSender, hub: &Hub) -> ParticipantId {
    let now = hub.now_ms();
    let display_name = sanitize_display_name(params.display_name.as_deref());

    let mut clients = hub.clients.write().await;
    let client_id = match params.participant_id {
        Some(id) if is_valid_participant_id(&id) && !clients.contains_key(&ParticipantId::new(id.clone())) => {
            ParticipantId::new(id)
        }
        Some(id) => {
            warn!("Requested participant id {:?} unusable, assigning a fresh one", id);
            ParticipantId::random()
        }
        None => ParticipantId::random(),
    };

    info!("Client connected: {} ({})", client_id, display_name);
    clients.insert(
        client_id.clone(),
        Client {
            sender,
            participant: Participant::new(client_id.clone(), display_name, now),
            room_id: None,
            pending_room: None,
            message_count: 0,
            last_reset: now,
            last_seen: now,
        },
    );
    send_to_client(&client_id, &clients, &HubEvent::Welcome { participant_id: client_id.clone() });
    client_id
}

/// Returns true if the client is rate limited (should drop the message)
async fn check_rate_limit(client_id: &ParticipantId, hub: &Hub) -> bool {
    let mut locked_clients = hub.clients.write().await;
    if let Some(client) = locked_clients.get_mut(client_id) {
        let now = hub.now_ms();
        // Update last_seen for zombie detection
        client.last_seen = now;
        // Reset counter if window has passed
        if now.saturating_sub(client.last_reset) > RATE_LIMIT_WINDOW_MS {
            client.message_count = 0;
            client.last_reset = now;
        }
        client.message_count += 1;
        if client.message_count > RATE_LIMIT_MESSAGES {
            return true; // Rate limited
        }
    }
    false
}

async fn send_error(client_id: &ParticipantId, hub: &Hub, code: ErrorCode, message: &str) {
    let locked_clients = hub.clients.read().await;
    send_to_client(client_id, &locked_clients, &HubEvent::error(code, message));
}

async fn client_msg(client_id: &ParticipantId, msg: warp::ws::Message, hub: &Hub) {
    // Rate limiting check
    if check_rate_limit(client_id, hub).await {
        warn!("Rate limited client: {}", client_id);
        send_error(client_id, hub, ErrorCode::RateLimited, "Rate limit exceeded").await;
        return;
    }

    // Message size limit check (prevent OOM attacks)
    if msg.as_bytes().len() > MAX_MESSAGE_SIZE {
        warn!("Message too large from client {}: {} bytes", client_id, msg.as_bytes().len());
        send_error(client_id, hub, ErrorCode::MessageTooLarge, "Message too large").await;
        return;
    }

    let Ok(text) = msg.to_str() else { return };
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => dispatch(client_id, command, hub).await,
        Err(e) => {
            warn!("JSON parse error from {}: {}", client_id, e);
            send_error(client_id, hub, ErrorCode::InvalidMessage, "Invalid message format").await;
        }
    }
}

pub async fn dispatch(client_id: &ParticipantId, command: ClientCommand, hub: &Hub) {
    // Log message type only (not full payload for privacy)
    debug!("Message from {}: {}", client_id, command.kind());

    match command {
        ClientCommand::CreateRoom => handle_create(client_id, hub).await,
        ClientCommand::JoinRoom { room_id, password } => {
            if !room_id.is_well_formed() {
                send_error(client_id, hub, ErrorCode::RoomNotFound, "Malformed room id").await;
                return;
            }
            handle_join(client_id, &room_id, password.as_deref(), hub).await
        }
        ClientCommand::CheckRoomPassword { secret } => handle_check_password(client_id, &secret, hub).await,
        ClientCommand::SetRoomPassword { secret } => handle_password_change(client_id, Some(&secret), hub).await,
        ClientCommand::RemoveRoomPassword => handle_password_change(client_id, None, hub).await,
        ClientCommand::LeaveRoom => handle_leave(client_id, hub).await,
        ClientCommand::ChatMessage { id, text, sent_at } => handle_chat(client_id, id, &text, sent_at, hub).await,
        ClientCommand::VideoControl { action, value } => handle_video_control(client_id, action, value, hub).await,
        ClientCommand::MediaState { mic_enabled, video_enabled } => {
            handle_media_state(client_id, mic_enabled, video_enabled, hub).await
        }
        ClientCommand::Ping { ts } => {
            let locked_clients = hub.clients.read().await;
            send_to_client(client_id, &locked_clients, &HubEvent::Pong { ts, server_ts: hub.now_ms() });
        }
        ClientCommand::Unknown => {
            debug!("Unknown message type from {}", client_id);
        }
    }
}

/// Applies the command to the room's authoritative tuple and relays it to
/// every member, the originator included; the echo is the originator's
/// confirmation of where its command landed in the room order.
async fn handle_video_control(client_id: &ParticipantId, action: VideoAction, value: f64, hub: &Hub) {
    let mut rooms = hub.rooms.write().await;
    let clients = hub.clients.read().await;

    let Some(room_id) = clients.get(client_id).and_then(|c| c.room_id.clone()) else {
        send_to_client(client_id, &clients, &HubEvent::error(ErrorCode::NotInRoom, "Not in a room"));
        return;
    };
    match rooms.apply_control(&room_id, client_id, action, value) {
        Ok(state) => {
            if let Some(room) = rooms.get(&room_id) {
                broadcast_to_room(room, &clients, &HubEvent::VideoControl { action, value, state }, None);
            }
        }
        Err(e) => {
            warn!("Rejected videoControl from {}: {}", client_id, e);
            send_to_client(client_id, &clients, &registry_error_event(&e));
        }
    }
}

async fn handle_chat(client_id: &ParticipantId, id: String, text: &str, sent_at: u64, hub: &Hub) {
    // Write guard: chat shares the room's total order with control events.
    let rooms = hub.rooms.write().await;
    let clients = hub.clients.read().await;

    let Some(client) = clients.get(client_id) else { return };
    let Some(room) = client.room_id.as_ref().and_then(|room_id| rooms.get(room_id)) else {
        send_to_client(client_id, &clients, &HubEvent::error(ErrorCode::NotInRoom, "Not in a room"));
        return;
    };
    let id_ok = !id.is_empty() && id.len() <= MAX_CHAT_ID_LEN;
    let Some(text) = normalize_chat_text(text).filter(|_| id_ok) else {
        send_to_client(client_id, &clients, &HubEvent::error(ErrorCode::InvalidValue, "Invalid chat message"));
        return;
    };

    // Sender identity comes from the connection, never from the payload.
    let message = ChatMessage {
        id,
        text,
        sent_at,
        sender: ChatSender {
            id: client.participant.id.clone(),
            name: client.participant.display_name.clone(),
        },
    };
    broadcast_to_room(room, &clients, &HubEvent::ChatMessage(message), None);
}

async fn handle_media_state(client_id: &ParticipantId, mic_enabled: bool, video_enabled: bool, hub: &Hub) {
    let mut rooms = hub.rooms.write().await;
    let mut clients = hub.clients.write().await;

    let Some(client) = clients.get_mut(client_id) else { return };
    client.participant.mic_enabled = mic_enabled;
    client.participant.video_enabled = video_enabled;
    let Some(room_id) = client.room_id.clone() else { return };

    if let Err(e) = rooms.update_media(&room_id, client_id, mic_enabled, video_enabled) {
        warn!("Media state update from {} failed: {}", client_id, e);
        return;
    }
    if let Some(room) = rooms.get(&room_id) {
        let event = HubEvent::MediaState { id: client_id.clone(), mic_enabled, video_enabled };
        broadcast_to_room(room, &clients, &event, Some(client_id));
    }
}
