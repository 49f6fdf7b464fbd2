use crate::messaging::{broadcast_to_room, send_to_client};
use crate::registry::{JoinOutcome, LeaveOutcome, RegistryError, Room, RoomRegistry};
use crate::types::{Client, Hub};
use log::{info, warn};
use std::collections::HashMap;
use watchparty_protocol::{ErrorCode, HubEvent, ParticipantId, RoomId};

pub fn registry_error_event(err: &RegistryError) -> HubEvent {
    let code = match err {
        RegistryError::RoomNotFound(_) => ErrorCode::RoomNotFound,
        RegistryError::RoomFull(_) => ErrorCode::RoomFull,
        RegistryError::NotAuthorized => ErrorCode::NotAuthorized,
        RegistryError::NotAMember(_, _) => ErrorCode::NotInRoom,
        RegistryError::InvalidPassword => ErrorCode::InvalidPassword,
        RegistryError::InvalidValue { .. } => ErrorCode::InvalidValue,
        // The gate errors have dedicated events; these codes only show up if
        // a caller reports them generically.
        RegistryError::PasswordRequired(_) | RegistryError::PasswordIncorrect(_) => ErrorCode::InvalidPassword,
        RegistryError::IdSpaceExhausted => ErrorCode::InvalidMessage,
    };
    HubEvent::error(code, err.to_string())
}

/// Snapshot for a joiner, with playback carried forward to `now` so a late
/// joiner lands where the room is rather than where the last command was.
fn room_snapshot(room: &Room, now: u64) -> HubEvent {
    HubEvent::RoomJoined {
        room_id: room.id.clone(),
        creator_id: room.creator_id.clone(),
        members: room.members.clone(),
        playback: room.playback.advanced_to(now),
        password_protected: room.password_protected(),
    }
}

pub async fn handle_create(client_id: &ParticipantId, hub: &Hub) {
    let mut rooms = hub.rooms.write().await;
    let mut clients = hub.clients.write().await;

    let Some(participant) = clients.get(client_id).map(|c| c.participant.clone()) else {
        return;
    };
    let room_id = match rooms.create_room(participant) {
        Ok(id) => id,
        Err(e) => {
            warn!("Room creation failed for {}: {}", client_id, e);
            send_to_client(client_id, &clients, &registry_error_event(&e));
            return;
        }
    };

    // One room per connection: the previous one is left only once the new
    // one exists.
    leave_locked(client_id, &mut rooms, &mut clients);
    if let Some(client) = clients.get_mut(client_id) {
        client.room_id = Some(room_id.clone());
        client.pending_room = None;
    }
    if let Some(room) = rooms.get(&room_id) {
        send_to_client(client_id, &clients, &room_snapshot(room, rooms.now_ms()));
    }
}

pub async fn handle_join(client_id: &ParticipantId, room_id: &RoomId, password: Option<&str>, hub: &Hub) {
    let mut rooms = hub.rooms.write().await;
    let mut clients = hub.clients.write().await;
    join_locked(client_id, room_id, password, &mut rooms, &mut clients);
}

/// Retries the join that the password gate last rejected.
pub async fn handle_check_password(client_id: &ParticipantId, secret: &str, hub: &Hub) {
    let mut rooms = hub.rooms.write().await;
    let mut clients = hub.clients.write().await;

    let Some(room_id) = clients.get(client_id).and_then(|c| c.pending_room.clone()) else {
        send_to_client(
            client_id,
            &clients,
            &HubEvent::error(ErrorCode::NoPendingJoin, "No password-protected join is pending"),
        );
        return;
    };
    join_locked(client_id, &room_id, Some(secret), &mut rooms, &mut clients);
}

fn join_locked(
    client_id: &ParticipantId,
    room_id: &RoomId,
    password: Option<&str>,
    rooms: &mut RoomRegistry,
    clients: &mut HashMap<ParticipantId, Client>,
) {
    let Some(participant) = clients.get(client_id).map(|c| c.participant.clone()) else {
        return;
    };

    match rooms.join_room(room_id, participant.clone(), password) {
        Ok(outcome) => {
            let previous = clients.get(client_id).and_then(|c| c.room_id.clone());
            if previous.as_ref() != Some(room_id) {
                leave_locked(client_id, rooms, clients);
            }
            if let Some(client) = clients.get_mut(client_id) {
                client.room_id = Some(room_id.clone());
                client.pending_room = None;
            }
            if let Some(room) = rooms.get(room_id) {
                send_to_client(client_id, clients, &room_snapshot(room, rooms.now_ms()));
                if outcome == JoinOutcome::Joined {
                    let joined = HubEvent::UserJoined {
                        id: participant.id.clone(),
                        name: participant.display_name.clone(),
                        mic_enabled: participant.mic_enabled,
                        video_enabled: participant.video_enabled,
                    };
                    broadcast_to_room(room, clients, &joined, Some(client_id));
                }
            }
        }
        Err(RegistryError::PasswordRequired(_)) => {
            info!("{} must supply a password for room {}", client_id, room_id);
            set_pending(client_id, room_id, clients);
            send_to_client(client_id, clients, &HubEvent::PasswordRequired { room_id: room_id.clone() });
        }
        Err(RegistryError::PasswordIncorrect(_)) => {
            info!("{} supplied an incorrect password for room {}", client_id, room_id);
            set_pending(client_id, room_id, clients);
            send_to_client(client_id, clients, &HubEvent::PasswordIncorrect { room_id: room_id.clone() });
        }
        Err(e) => {
            send_to_client(client_id, clients, &registry_error_event(&e));
        }
    }
}

fn set_pending(client_id: &ParticipantId, room_id: &RoomId, clients: &mut HashMap<ParticipantId, Client>) {
    if let Some(client) = clients.get_mut(client_id) {
        client.pending_room = Some(room_id.clone());
    }
}

/// `secret == None` clears the password.
pub async fn handle_password_change(client_id: &ParticipantId, secret: Option<&str>, hub: &Hub) {
    let mut rooms = hub.rooms.write().await;
    let clients = hub.clients.read().await;

    let Some(room_id) = clients.get(client_id).and_then(|c| c.room_id.clone()) else {
        send_to_client(client_id, &clients, &HubEvent::error(ErrorCode::NotInRoom, "Not in a room"));
        return;
    };
    let result = match secret {
        Some(secret) => rooms.set_password(&room_id, client_id, secret),
        None => rooms.clear_password(&room_id, client_id),
    };
    match result {
        Ok(()) => {
            send_to_client(client_id, &clients, &HubEvent::PasswordUpdated { protected: secret.is_some() });
        }
        Err(e) => {
            warn!("Rejected password change by {} in room {}: {}", client_id, room_id, e);
            send_to_client(client_id, &clients, &registry_error_event(&e));
        }
    }
}

pub async fn handle_leave(client_id: &ParticipantId, hub: &Hub) {
    let mut rooms = hub.rooms.write().await;
    let mut clients = hub.clients.write().await;
    leave_locked(client_id, &mut rooms, &mut clients);
}

/// Hub-detected disconnects go through the same path as an explicit leave.
pub async fn handle_disconnect(client_id: &ParticipantId, hub: &Hub) {
    info!("Disconnecting client {}", client_id);
    let mut rooms = hub.rooms.write().await;
    let mut clients = hub.clients.write().await;
    leave_locked(client_id, &mut rooms, &mut clients);
    clients.remove(client_id);
}

pub fn leave_locked(
    client_id: &ParticipantId,
    rooms: &mut RoomRegistry,
    clients: &mut HashMap<ParticipantId, Client>,
) {
    let Some(room_id) = clients.get_mut(client_id).and_then(|c| {
        c.pending_room = None;
        c.room_id.take()
    }) else {
        return;
    };

    match rooms.leave_room(&room_id, client_id) {
        Ok(LeaveOutcome::Left) => {
            info!("Client {} left room {}", client_id, room_id);
            if let Some(room) = rooms.get(&room_id) {
                broadcast_to_room(room, clients, &HubEvent::UserLeft { id: client_id.clone() }, None);
            }
        }
        Ok(LeaveOutcome::RoomDestroyed) => {}
        Err(e) => warn!("Leave for {} in room {} failed: {}", client_id, room_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::messaging::test_support::{client, drain, ClientReceiver};
    use std::sync::Arc;
    use watchparty_protocol::ManualClock;

    async fn hub_with(ids: &[&str]) -> (Hub, Vec<ClientReceiver>) {
        let hub = Hub::new(HubConfig::default(), Arc::new(ManualClock::new(1_000)));
        let mut receivers = Vec::new();
        let mut clients = hub.clients.write().await;
        for id in ids {
            let (c, rx) = client(id, None);
            clients.insert(ParticipantId::from(*id), c);
            receivers.push(rx);
        }
        drop(clients);
        (hub, receivers)
    }

    fn joined_room(events: &[HubEvent]) -> Option<RoomId> {
        events.iter().find_map(|e| match e {
            HubEvent::RoomJoined { room_id, .. } => Some(room_id.clone()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_create_sends_snapshot() {
        let (hub, mut rx) = hub_with(&["alice"]).await;
        let alice = ParticipantId::from("alice");
        handle_create(&alice, &hub).await;

        let events = drain(&mut rx[0]);
        match &events[..] {
            [HubEvent::RoomJoined { creator_id, members, password_protected, .. }] => {
                assert_eq!(creator_id, &alice);
                assert_eq!(members.len(), 1);
                assert!(!password_protected);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_broadcasts_membership_diff() {
        let (hub, mut rx) = hub_with(&["alice", "bob"]).await;
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");
        handle_create(&alice, &hub).await;
        let room_id = joined_room(&drain(&mut rx[0])).unwrap();

        handle_join(&bob, &room_id, None, &hub).await;

        let alice_events = drain(&mut rx[0]);
        assert!(matches!(&alice_events[..], [HubEvent::UserJoined { id, .. }] if id == &bob));
        let bob_events = drain(&mut rx[1]);
        assert_eq!(joined_room(&bob_events), Some(room_id.clone()));

        handle_leave(&bob, &hub).await;
        let alice_events = drain(&mut rx[0]);
        assert_eq!(alice_events, vec![HubEvent::UserLeft { id: bob.clone() }]);
        assert!(hub.clients.read().await.get(&bob).unwrap().room_id.is_none());
    }

    #[tokio::test]
    async fn test_password_retry_flow() {
        let (hub, mut rx) = hub_with(&["alice", "bob"]).await;
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");
        handle_create(&alice, &hub).await;
        let room_id = joined_room(&drain(&mut rx[0])).unwrap();
        handle_password_change(&alice, Some("hunter2"), &hub).await;
        assert_eq!(drain(&mut rx[0]), vec![HubEvent::PasswordUpdated { protected: true }]);

        handle_join(&bob, &room_id, None, &hub).await;
        assert_eq!(drain(&mut rx[1]), vec![HubEvent::PasswordRequired { room_id: room_id.clone() }]);

        handle_check_password(&bob, "wrong", &hub).await;
        assert_eq!(drain(&mut rx[1]), vec![HubEvent::PasswordIncorrect { room_id: room_id.clone() }]);
        assert_eq!(hub.rooms.read().await.get(&room_id).unwrap().members.len(), 1);
        assert!(drain(&mut rx[0]).is_empty(), "members see nothing for a rejected join");

        handle_check_password(&bob, "hunter2", &hub).await;
        assert_eq!(joined_room(&drain(&mut rx[1])), Some(room_id.clone()));
        assert_eq!(hub.rooms.read().await.get(&room_id).unwrap().members.len(), 2);
    }

    #[tokio::test]
    async fn test_late_joiner_snapshot_is_current() {
        let clock = Arc::new(ManualClock::new(0));
        let hub = Hub::new(HubConfig::default(), clock.clone());
        let (alice_client, mut alice_rx) = client("alice", None);
        let (bob_client, mut bob_rx) = client("bob", None);
        {
            let mut clients = hub.clients.write().await;
            clients.insert(ParticipantId::from("alice"), alice_client);
            clients.insert(ParticipantId::from("bob"), bob_client);
        }
        let alice = ParticipantId::from("alice");
        handle_create(&alice, &hub).await;
        let room_id = joined_room(&drain(&mut alice_rx)).unwrap();
        hub.rooms
            .write()
            .await
            .apply_control(&room_id, &alice, watchparty_protocol::VideoAction::Play, 5.0)
            .unwrap();

        clock.advance(60_000);
        handle_join(&ParticipantId::from("bob"), &room_id, None, &hub).await;

        let playback = drain(&mut bob_rx).into_iter().find_map(|e| match e {
            HubEvent::RoomJoined { playback, .. } => Some(playback),
            _ => None,
        });
        let playback = playback.expect("snapshot");
        assert!(!playback.paused);
        assert_eq!(playback.position_seconds, 65.0);
        assert_eq!(playback.last_updated_at, 60_000);
    }

    #[tokio::test]
    async fn test_check_password_without_pending_join() {
        let (hub, mut rx) = hub_with(&["bob"]).await;
        handle_check_password(&ParticipantId::from("bob"), "x", &hub).await;
        assert!(matches!(
            &drain(&mut rx[0])[..],
            [HubEvent::Error { code: ErrorCode::NoPendingJoin, .. }]
        ));
    }

    #[tokio::test]
    async fn test_non_creator_password_change_is_noop() {
        let (hub, mut rx) = hub_with(&["alice", "bob"]).await;
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");
        handle_create(&alice, &hub).await;
        let room_id = joined_room(&drain(&mut rx[0])).unwrap();
        handle_join(&bob, &room_id, None, &hub).await;
        drain(&mut rx[1]);

        handle_password_change(&bob, Some("mine"), &hub).await;
        assert!(matches!(
            &drain(&mut rx[1])[..],
            [HubEvent::Error { code: ErrorCode::NotAuthorized, .. }]
        ));
        assert!(!hub.rooms.read().await.get(&room_id).unwrap().password_protected());
    }

    #[tokio::test]
    async fn test_disconnect_destroys_empty_room() {
        let (hub, mut rx) = hub_with(&["alice"]).await;
        let alice = ParticipantId::from("alice");
        handle_create(&alice, &hub).await;
        let room_id = joined_room(&drain(&mut rx[0])).unwrap();

        handle_disconnect(&alice, &hub).await;
        assert!(hub.rooms.read().await.get(&room_id).is_none());
        assert!(hub.clients.read().await.get(&alice).is_none());
    }

    #[tokio::test]
    async fn test_join_unknown_room_reports_error() {
        let (hub, mut rx) = hub_with(&["bob"]).await;
        handle_join(&ParticipantId::from("bob"), &RoomId::from("zzzzzz"), None, &hub).await;
        assert!(matches!(
            &drain(&mut rx[0])[..],
            [HubEvent::Error { code: ErrorCode::RoomNotFound, .. }]
        ));
    }

    #[tokio::test]
    async fn test_switching_rooms_leaves_previous() {
        let (hub, mut rx) = hub_with(&["alice", "bob", "carol"]).await;
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");
        let carol = ParticipantId::from("carol");
        handle_create(&alice, &hub).await;
        let room_a = joined_room(&drain(&mut rx[0])).unwrap();
        handle_create(&carol, &hub).await;
        let room_c = joined_room(&drain(&mut rx[2])).unwrap();

        handle_join(&bob, &room_a, None, &hub).await;
        drain(&mut rx[0]);
        handle_join(&bob, &room_c, None, &hub).await;

        assert_eq!(drain(&mut rx[0]), vec![HubEvent::UserLeft { id: bob.clone() }]);
        let rooms = hub.rooms.read().await;
        assert!(!rooms.get(&room_a).unwrap().is_member(&bob));
        assert!(rooms.get(&room_c).unwrap().is_member(&bob));
    }
}
