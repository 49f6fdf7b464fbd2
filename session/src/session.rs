//! One viewer's session: hub connection, local media, peer mesh, playback
//! sync and chat, behind a single owner.

use rand::Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use watchparty_protocol::{
    ChatMessage, ClientCommand, Clock, ErrorCode, HubEvent, Participant, ParticipantId, RoomId,
};

use crate::chat::ChatChannel;
use crate::config::SessionConfig;
use crate::error::{PeerError, Result, SessionError};
use crate::hub_client::{HubClient, HubInbound};
use crate::media::LocalMedia;
use crate::peers::{HandshakeOutcome, PeerConnectionManager, PeerUpdate};
use crate::ports::{MediaDevices, PlaybackSurface, Rendezvous, SurfaceEvent};
use crate::sync::{PlaybackSynchronizer, SEEK_STEP_SECONDS};
use crate::task::ScheduledTask;

const SECRET_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connected,
    AwaitingPassword,
    Joined,
}

/// Local projection of the room we are in.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    pub room_id: RoomId,
    pub creator_id: ParticipantId,
    pub members: Vec<Participant>,
    pub password_protected: bool,
}

impl RoomView {
    pub fn member(&self, id: &ParticipantId) -> Option<&Participant> {
        self.members.iter().find(|m| &m.id == id)
    }

    fn member_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.members.iter_mut().find(|m| &m.id == id)
    }
}

/// Things the UI should tell the user about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Connected(ParticipantId),
    RoomJoined(RoomId),
    PasswordRequired(RoomId),
    PasswordIncorrect(RoomId),
    PasswordUpdated { protected: bool },
    UserJoined { id: ParticipantId, name: String },
    UserLeft(ParticipantId),
    MediaUnavailable(String),
    PeerFailed(PeerError),
    HubError { code: ErrorCode, message: String },
    Disconnected,
}

/// Collaborators handed to a session at construction.
pub struct SessionPorts {
    pub hub: HubClient,
    pub rendezvous: Arc<dyn Rendezvous>,
    pub surface: Box<dyn PlaybackSurface>,
}

pub struct Session {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    local_id: ParticipantId,
    phase: SessionPhase,
    hub: HubClient,
    surface: Box<dyn PlaybackSurface>,
    media: LocalMedia,
    peers: PeerConnectionManager,
    handshakes: Option<mpsc::UnboundedReceiver<HandshakeOutcome>>,
    sync: PlaybackSynchronizer,
    chat: ChatChannel,
    room: Option<RoomView>,
    pending_room: Option<RoomId>,
    entered_password: Option<String>,
    notices: mpsc::UnboundedSender<Notice>,
    heartbeat: Option<ScheduledTask>,
}

impl Session {
    /// Builds a session around an already-open hub client. Must be called
    /// inside a tokio runtime; the heartbeat starts immediately.
    pub fn new(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        ports: SessionPorts,
        local_id: ParticipantId,
        display_name: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (peers, handshakes) =
            PeerConnectionManager::new(local_id.clone(), ports.rendezvous, config.handshake_timeout);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let heartbeat = Self::spawn_heartbeat(&config, &clock, &ports.hub);
        let session = Self {
            sync: PlaybackSynchronizer::new(clock.clone(), config.drift_threshold_secs),
            chat: ChatChannel::new(local_id.clone(), display_name, clock.clone()),
            config,
            clock,
            local_id,
            phase: SessionPhase::Connected,
            hub: ports.hub,
            surface: ports.surface,
            media: LocalMedia::none(),
            peers,
            handshakes: Some(handshakes),
            room: None,
            pending_room: None,
            entered_password: None,
            notices: notice_tx,
            heartbeat: Some(heartbeat),
        };
        (session, notice_rx)
    }

    /// Connects to the configured hub and builds a session on top of it.
    pub async fn connect(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        rendezvous: Arc<dyn Rendezvous>,
        surface: Box<dyn PlaybackSurface>,
        display_name: &str,
    ) -> Result<(Self, mpsc::Receiver<HubInbound>, mpsc::UnboundedReceiver<Notice>)> {
        let local_id = ParticipantId::random();
        let url = config.connect_url(local_id.as_str(), display_name);
        let (hub, inbound) = HubClient::connect(&url).await?;
        let ports = SessionPorts { hub, rendezvous, surface };
        let (session, notices) = Self::new(config, clock, ports, local_id, display_name);
        Ok((session, inbound, notices))
    }

    fn spawn_heartbeat(config: &SessionConfig, clock: &Arc<dyn Clock>, hub: &HubClient) -> ScheduledTask {
        let sender = hub.sender();
        let clock = clock.clone();
        ScheduledTask::every(config.heartbeat_interval, move || {
            let ping = ClientCommand::Ping { ts: clock.now_ms() };
            !matches!(sender.try_send(ping), Err(mpsc::error::TrySendError::Closed(_)))
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn room(&self) -> Option<&RoomView> {
        self.room.as_ref()
    }

    pub fn pending_room(&self) -> Option<&RoomId> {
        self.pending_room.as_ref()
    }

    pub fn entered_password(&self) -> Option<&str> {
        self.entered_password.as_deref()
    }

    pub fn chat_messages(&self) -> &[ChatMessage] {
        self.chat.messages()
    }

    pub fn media(&self) -> &LocalMedia {
        &self.media
    }

    pub fn peers(&self) -> &PeerConnectionManager {
        &self.peers
    }

    pub fn synchronizer(&self) -> &PlaybackSynchronizer {
        &self.sync
    }

    pub fn is_creator(&self) -> bool {
        self.room.as_ref().is_some_and(|room| room.creator_id == self.local_id)
    }

    // -----------------------------------------------------------------------
    // User intents
    // -----------------------------------------------------------------------

    /// Captures camera and microphone. Denial is not an error: the session
    /// carries on without local media and the UI is told why.
    pub async fn acquire_media(&mut self, devices: &dyn MediaDevices) -> Result<()> {
        self.media.release();
        match LocalMedia::acquire(devices).await {
            Ok(media) => self.media = media,
            Err(e) => {
                log::warn!("Media capture failed: {}", e);
                self.notify(Notice::MediaUnavailable(e.to_string()));
            }
        }
        self.publish_media_state()
    }

    pub fn create_room(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.hub.send(ClientCommand::CreateRoom)
    }

    pub fn join_room(&mut self, room_id: RoomId, password: Option<String>) -> Result<()> {
        self.ensure_connected()?;
        if !room_id.is_well_formed() {
            return Err(SessionError::InvalidValue(format!("malformed room id {:?}", room_id.as_str())));
        }
        self.entered_password = password.clone();
        self.hub.send(ClientCommand::JoinRoom { room_id, password })
    }

    /// Retries the join that was gated by a password.
    pub fn submit_password(&mut self, secret: &str) -> Result<()> {
        self.ensure_connected()?;
        if self.pending_room.is_none() {
            return Err(SessionError::NoPendingJoin);
        }
        self.entered_password = Some(secret.to_string());
        self.hub.send(ClientCommand::CheckRoomPassword { secret: secret.to_string() })
    }

    /// Protects the room with a freshly generated secret and returns it.
    pub fn enable_password(&mut self) -> Result<String> {
        self.ensure_creator()?;
        let secret = generate_secret();
        self.set_password(&secret)?;
        Ok(secret)
    }

    pub fn set_password(&mut self, secret: &str) -> Result<()> {
        self.ensure_creator()?;
        if secret.is_empty() {
            return Err(SessionError::InvalidValue("password must not be empty".to_string()));
        }
        self.hub.send(ClientCommand::SetRoomPassword { secret: secret.to_string() })
    }

    pub fn clear_password(&mut self) -> Result<()> {
        self.ensure_creator()?;
        self.hub.send(ClientCommand::RemoveRoomPassword)
    }

    pub fn send_chat(&mut self, text: &str) -> Result<()> {
        self.ensure_joined()?;
        let command = self.chat.send(text)?;
        self.hub.send(command)
    }

    /// Flips the microphone in place. Returns the new state.
    pub fn toggle_mic(&mut self) -> Result<bool> {
        let enabled = self.media.toggle_mic();
        self.publish_media_state()?;
        Ok(enabled)
    }

    pub fn toggle_video(&mut self) -> Result<bool> {
        let enabled = self.media.toggle_video();
        self.publish_media_state()?;
        Ok(enabled)
    }

    pub fn play(&mut self) -> Result<()> {
        self.ensure_joined()?;
        let command = self.sync.play(&mut *self.surface);
        self.hub.send(command)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.ensure_joined()?;
        let command = self.sync.pause(&mut *self.surface);
        self.hub.send(command)
    }

    /// Skips forward (`forward == true`) or back by the fixed seek step.
    pub fn seek_by(&mut self, forward: bool) -> Result<()> {
        self.ensure_joined()?;
        let delta = if forward { SEEK_STEP_SECONDS } else { -SEEK_STEP_SECONDS };
        let command = self.sync.seek_by(delta, &mut *self.surface);
        self.hub.send(command)
    }

    pub fn set_rate(&mut self, rate: f64) -> Result<()> {
        self.ensure_joined()?;
        let command = self.sync.set_rate(rate, &mut *self.surface)?;
        self.hub.send(command)
    }

    /// Leaves the current room: unsubscribes from its traffic, aborts every
    /// handshake and stops every captured track.
    pub fn leave(&mut self) -> Result<()> {
        let was_in_room = self.room.is_some() || self.pending_room.is_some();
        self.reset_room();
        self.media.release();
        if self.phase != SessionPhase::Disconnected {
            self.phase = SessionPhase::Connected;
            if was_in_room {
                self.hub.send(ClientCommand::LeaveRoom)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    pub fn handle_inbound(&mut self, inbound: HubInbound) {
        match inbound {
            HubInbound::Event(event) => self.handle_hub_event(event),
            HubInbound::Disconnected => {
                if self.phase == SessionPhase::Disconnected {
                    return;
                }
                log::warn!("Lost connection to hub");
                self.reset_room();
                self.heartbeat = None;
                self.phase = SessionPhase::Disconnected;
                self.notify(Notice::Disconnected);
            }
        }
    }

    pub fn handle_hub_event(&mut self, event: HubEvent) {
        log::debug!("<- {}", event.kind());
        match event {
            HubEvent::Welcome { participant_id } => {
                if participant_id != self.local_id {
                    log::info!("Hub assigned participant id {}", participant_id);
                }
                self.local_id = participant_id.clone();
                self.peers.set_local_id(participant_id.clone());
                self.chat.set_local_id(participant_id.clone());
                self.notify(Notice::Connected(participant_id));
            }
            HubEvent::RoomJoined { room_id, creator_id, members, playback, password_protected } => {
                if self.room.as_ref().is_some_and(|room| room.room_id != room_id) {
                    self.reset_room();
                }
                self.pending_room = None;
                self.entered_password = None;
                self.phase = SessionPhase::Joined;
                self.sync.begin(&playback, &mut *self.surface);
                self.room = Some(RoomView { room_id: room_id.clone(), creator_id, members, password_protected });
                self.sync_peers();
                log::info!("Joined room {}", room_id);
                self.notify(Notice::RoomJoined(room_id));
            }
            HubEvent::UserJoined { id, name, mic_enabled, video_enabled } => {
                let Some(room) = self.room.as_mut() else { return };
                if room.member(&id).is_none() {
                    let mut participant = Participant::new(id.clone(), name.clone(), self.clock.now_ms());
                    participant.mic_enabled = mic_enabled;
                    participant.video_enabled = video_enabled;
                    room.members.push(participant);
                }
                self.sync_peers();
                self.notify(Notice::UserJoined { id, name });
            }
            HubEvent::UserLeft { id } => {
                let Some(room) = self.room.as_mut() else { return };
                room.members.retain(|m| m.id != id);
                self.sync_peers();
                self.notify(Notice::UserLeft(id));
            }
            HubEvent::ChatMessage(message) => {
                if self.phase == SessionPhase::Joined {
                    self.chat.receive(message);
                }
            }
            HubEvent::VideoControl { state, .. } => {
                if self.phase == SessionPhase::Joined {
                    self.sync.reconcile(&state, &mut *self.surface);
                }
            }
            HubEvent::MediaState { id, mic_enabled, video_enabled } => {
                if let Some(member) = self.room.as_mut().and_then(|room| room.member_mut(&id)) {
                    member.mic_enabled = mic_enabled;
                    member.video_enabled = video_enabled;
                }
            }
            HubEvent::PasswordRequired { room_id } => {
                self.await_password(room_id.clone());
                self.notify(Notice::PasswordRequired(room_id));
            }
            HubEvent::PasswordIncorrect { room_id } => {
                self.await_password(room_id.clone());
                self.entered_password = None;
                self.notify(Notice::PasswordIncorrect(room_id));
            }
            HubEvent::PasswordUpdated { protected } => {
                if let Some(room) = self.room.as_mut() {
                    room.password_protected = protected;
                }
                self.notify(Notice::PasswordUpdated { protected });
            }
            HubEvent::Error { code, message } => {
                log::warn!("Hub error {:?}: {}", code, message);
                self.notify(Notice::HubError { code, message });
            }
            HubEvent::Pong { ts, .. } => {
                log::trace!("Hub round trip {} ms", self.clock.now_ms().saturating_sub(ts));
            }
        }
    }

    pub fn handle_surface_event(&mut self, event: SurfaceEvent) {
        if let Some(command) = self.sync.on_surface_event(event) {
            if self.phase != SessionPhase::Joined {
                return;
            }
            if let Err(e) = self.hub.send(command) {
                log::warn!("Failed to publish playback change: {}", e);
            }
        }
    }

    pub fn handle_handshake(&mut self, outcome: HandshakeOutcome) {
        if let Some(PeerUpdate::Failed(e)) = self.peers.on_handshake(outcome) {
            self.notify(Notice::PeerFailed(e));
        }
    }

    /// Drives the session until the hub connection ends.
    pub async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<HubInbound>,
        mut surface_events: mpsc::Receiver<SurfaceEvent>,
    ) {
        let Some(mut handshakes) = self.handshakes.take() else {
            log::error!("Session loop is already running");
            return;
        };
        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let message = message.unwrap_or(HubInbound::Disconnected);
                    let closed = message == HubInbound::Disconnected;
                    self.handle_inbound(message);
                    if closed {
                        break;
                    }
                }
                Some(event) = surface_events.recv() => self.handle_surface_event(event),
                Some(outcome) = handshakes.recv() => self.handle_handshake(outcome),
            }
        }
        self.handshakes = Some(handshakes);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn sync_peers(&mut self) {
        let local = self.media.describe();
        if let Some(room) = &self.room {
            self.peers.sync_members(room.members.iter().map(|m| &m.id), &local);
        }
    }

    /// A gated join leaves the current room untouched until it succeeds.
    fn await_password(&mut self, room_id: RoomId) {
        if self.room.is_none() {
            self.phase = SessionPhase::AwaitingPassword;
        }
        self.pending_room = Some(room_id);
    }

    fn reset_room(&mut self) {
        self.peers.close_all();
        self.sync.reset();
        self.chat.clear();
        self.room = None;
        self.pending_room = None;
        self.entered_password = None;
    }

    fn publish_media_state(&mut self) -> Result<()> {
        let (mic_enabled, video_enabled) = (self.media.mic_enabled(), self.media.video_enabled());
        let local_id = self.local_id.clone();
        if let Some(me) = self.room.as_mut().and_then(|room| room.member_mut(&local_id)) {
            me.mic_enabled = mic_enabled;
            me.video_enabled = video_enabled;
        }
        if self.phase == SessionPhase::Disconnected {
            return Ok(());
        }
        self.hub.send(ClientCommand::MediaState { mic_enabled, video_enabled })
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.phase == SessionPhase::Disconnected {
            return Err(SessionError::Disconnected);
        }
        Ok(())
    }

    fn ensure_joined(&self) -> Result<()> {
        self.ensure_connected()?;
        if self.phase != SessionPhase::Joined {
            return Err(SessionError::NotInRoom);
        }
        Ok(())
    }

    fn ensure_creator(&self) -> Result<()> {
        self.ensure_joined()?;
        if !self.is_creator() {
            return Err(SessionError::NotAuthorized);
        }
        Ok(())
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.media.release();
        self.peers.close_all();
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.cancel();
        }
        log::debug!("Session {} dropped", self.local_id);
    }
}

fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    (0..SECRET_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::test_support::{FakeDevices, RecordingSurface, ScriptedRendezvous};
    use crate::ports::SurfaceCommand;
    use std::time::Duration;
    use watchparty_protocol::{ChatSender, ManualClock, PlaybackState, VideoAction};

    struct Harness {
        session: Session,
        sent: mpsc::Receiver<ClientCommand>,
        notices: mpsc::UnboundedReceiver<Notice>,
        surface: RecordingSurface,
    }

    impl Harness {
        fn new(local: &str) -> Self {
            let (hub, sent) = HubClient::channel();
            let surface = RecordingSurface::default();
            let ports = SessionPorts {
                hub,
                rendezvous: Arc::new(ScriptedRendezvous::default()),
                surface: Box::new(surface.clone()),
            };
            let (session, notices) =
                Session::new(SessionConfig::default(), Arc::new(ManualClock::new(0)), ports, local.into(), "Me");
            Self { session, sent, notices, surface }
        }

        fn sent(&mut self) -> Vec<ClientCommand> {
            let mut commands = Vec::new();
            while let Ok(command) = self.sent.try_recv() {
                commands.push(command);
            }
            commands
        }

        fn notices(&mut self) -> Vec<Notice> {
            let mut notices = Vec::new();
            while let Ok(notice) = self.notices.try_recv() {
                notices.push(notice);
            }
            notices
        }

        fn joined(&mut self, creator: &str, members: &[&str]) {
            let members = members
                .iter()
                .map(|id| Participant::new((*id).into(), id.to_uppercase(), 0))
                .collect();
            self.session.handle_hub_event(HubEvent::RoomJoined {
                room_id: "abc123".into(),
                creator_id: creator.into(),
                members,
                playback: PlaybackState::initial(creator.into(), 0),
                password_protected: false,
            });
        }
    }

    #[tokio::test]
    async fn test_welcome_adopts_assigned_id() {
        let mut h = Harness::new("requested");
        h.session.handle_hub_event(HubEvent::Welcome { participant_id: "assigned".into() });
        assert_eq!(h.session.local_id().as_str(), "assigned");
        assert_eq!(h.notices(), vec![Notice::Connected("assigned".into())]);
    }

    #[tokio::test]
    async fn test_password_retry_flow() {
        let mut h = Harness::new("me");
        h.session.join_room("abc123".into(), None).unwrap();
        h.session.handle_hub_event(HubEvent::PasswordRequired { room_id: "abc123".into() });
        assert_eq!(h.session.phase(), SessionPhase::AwaitingPassword);

        h.session.submit_password("wrong").unwrap();
        assert_eq!(h.session.entered_password(), Some("wrong"));
        h.session.handle_hub_event(HubEvent::PasswordIncorrect { room_id: "abc123".into() });
        assert_eq!(h.session.phase(), SessionPhase::AwaitingPassword);
        assert_eq!(h.session.entered_password(), None);
        assert!(h.session.room().is_none());

        h.session.submit_password("right").unwrap();
        h.joined("owner", &["owner", "me"]);
        assert_eq!(h.session.phase(), SessionPhase::Joined);
        assert!(h.session.pending_room().is_none());

        assert_eq!(
            h.sent(),
            vec![
                ClientCommand::JoinRoom { room_id: "abc123".into(), password: None },
                ClientCommand::CheckRoomPassword { secret: "wrong".to_string() },
                ClientCommand::CheckRoomPassword { secret: "right".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn test_gated_switch_keeps_current_room() {
        let mut h = Harness::new("me");
        h.joined("a", &["a", "me"]);
        h.session.join_room("bbbbbb".into(), None).unwrap();
        h.session.handle_hub_event(HubEvent::PasswordRequired { room_id: "bbbbbb".into() });
        assert_eq!(h.session.phase(), SessionPhase::Joined);
        assert_eq!(h.session.pending_room(), Some(&RoomId::from("bbbbbb")));
        assert_eq!(h.session.room().unwrap().room_id.as_str(), "abc123");

        let mut state = PlaybackState::initial("a".into(), 0);
        state.paused = false;
        state.position_seconds = 30.0;
        state.last_updated_at = 10;
        h.session.handle_hub_event(HubEvent::VideoControl { action: VideoAction::Play, value: 30.0, state });
        assert_eq!(
            h.surface.take(),
            vec![SurfaceCommand::SetTime(30.0), SurfaceCommand::SetPaused(false)]
        );
        h.session.handle_hub_event(HubEvent::PasswordIncorrect { room_id: "bbbbbb".into() });
        assert_eq!(h.session.phase(), SessionPhase::Joined);
        assert!(h.session.play().is_ok());

        h.sent();
        h.session.submit_password("secret").unwrap();
        assert_eq!(h.sent(), vec![ClientCommand::CheckRoomPassword { secret: "secret".to_string() }]);
    }

    #[tokio::test]
    async fn test_submit_password_without_pending_join() {
        let mut h = Harness::new("me");
        assert!(matches!(h.session.submit_password("x"), Err(SessionError::NoPendingJoin)));
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn test_password_changes_are_creator_only() {
        let mut h = Harness::new("me");
        h.joined("owner", &["owner", "me"]);
        assert!(matches!(h.session.enable_password(), Err(SessionError::NotAuthorized)));
        assert!(matches!(h.session.clear_password(), Err(SessionError::NotAuthorized)));
        assert!(h.sent().is_empty());

        let mut h = Harness::new("owner");
        h.joined("owner", &["owner"]);
        let secret = h.session.enable_password().unwrap();
        assert_eq!(secret.len(), 6);
        assert!(secret.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
        assert_eq!(h.sent(), vec![ClientCommand::SetRoomPassword { secret }]);

        h.session.handle_hub_event(HubEvent::PasswordUpdated { protected: true });
        assert!(h.session.room().unwrap().password_protected);
    }

    #[tokio::test]
    async fn test_chat_send_and_echo() {
        let mut h = Harness::new("me");
        assert!(matches!(h.session.send_chat("early"), Err(SessionError::NotInRoom)));

        h.joined("me", &["me"]);
        h.session.send_chat("hello").unwrap();
        assert_eq!(h.session.chat_messages().len(), 1);

        let echo = h.session.chat_messages()[0].clone();
        h.session.handle_hub_event(HubEvent::ChatMessage(echo));
        h.session.handle_hub_event(HubEvent::ChatMessage(ChatMessage {
            id: "m2".to_string(),
            text: "hi back".to_string(),
            sent_at: 5,
            sender: ChatSender { id: "bob".into(), name: "Bob".to_string() },
        }));
        assert_eq!(h.session.chat_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_membership_drives_peer_links() {
        let mut h = Harness::new("me");
        h.joined("a", &["a", "me"]);
        assert_eq!(h.session.peers().link_count(), 1);

        h.session.handle_hub_event(HubEvent::UserJoined {
            id: "b".into(),
            name: "B".to_string(),
            mic_enabled: true,
            video_enabled: false,
        });
        assert_eq!(h.session.peers().link_count(), 2);
        assert!(!h.session.room().unwrap().member(&"b".into()).unwrap().video_enabled);

        h.session.handle_hub_event(HubEvent::UserLeft { id: "a".into() });
        assert_eq!(h.session.peers().link_count(), 1);
        assert!(h.session.peers().link(&"a".into()).is_none());
    }

    #[tokio::test]
    async fn test_leave_releases_everything() {
        let mut h = Harness::new("me");
        let devices = FakeDevices::default();
        h.session.acquire_media(&devices).await.unwrap();
        assert_eq!(h.session.media().track_count(), 2);
        h.joined("a", &["a", "b", "me"]);

        h.session.leave().unwrap();
        assert_eq!(h.session.media().track_count(), 0);
        assert_eq!(h.session.peers().link_count(), 0);
        assert!(devices.all_stopped());
        assert!(h.session.room().is_none());
        assert_eq!(h.session.phase(), SessionPhase::Connected);
        assert_eq!(h.sent().last(), Some(&ClientCommand::LeaveRoom));
    }

    #[tokio::test]
    async fn test_media_denied_degrades() {
        let mut h = Harness::new("me");
        h.session.acquire_media(&FakeDevices::denied()).await.unwrap();
        assert!(!h.session.media().mic_enabled());
        assert!(matches!(h.notices().as_slice(), [Notice::MediaUnavailable(_)]));
        assert_eq!(
            h.sent(),
            vec![ClientCommand::MediaState { mic_enabled: false, video_enabled: false }]
        );

        // Joining still works without devices.
        h.joined("me", &["me"]);
        assert_eq!(h.session.phase(), SessionPhase::Joined);
    }

    #[tokio::test]
    async fn test_toggle_mic_publishes_state() {
        let mut h = Harness::new("me");
        h.session.acquire_media(&FakeDevices::default()).await.unwrap();
        h.joined("me", &["me"]);
        h.sent();

        assert!(!h.session.toggle_mic().unwrap());
        assert_eq!(
            h.sent(),
            vec![ClientCommand::MediaState { mic_enabled: false, video_enabled: true }]
        );
        assert!(!h.session.room().unwrap().member(&"me".into()).unwrap().mic_enabled);
        assert_eq!(h.session.media().track_count(), 2);
    }

    #[tokio::test]
    async fn test_remote_control_reaches_surface() {
        let mut h = Harness::new("me");
        h.joined("a", &["a", "me"]);
        let mut state = PlaybackState::initial("a".into(), 0);
        state.paused = false;
        state.position_seconds = 30.0;
        state.last_updated_at = 10;

        h.session.handle_hub_event(HubEvent::VideoControl { action: VideoAction::Play, value: 30.0, state });
        assert_eq!(
            h.surface.take(),
            vec![SurfaceCommand::SetTime(30.0), SurfaceCommand::SetPaused(false)]
        );
        // Surface echoes are not re-broadcast.
        h.session.handle_surface_event(SurfaceEvent::Seeked(30.0));
        h.session.handle_surface_event(SurfaceEvent::Play);
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn test_local_controls_publish() {
        let mut h = Harness::new("me");
        assert!(matches!(h.session.play(), Err(SessionError::NotInRoom)));
        h.joined("me", &["me"]);

        h.session.seek_by(true).unwrap();
        h.session.set_rate(1.5).unwrap();
        assert!(h.session.set_rate(1.25).is_err());
        assert_eq!(
            h.sent(),
            vec![
                ClientCommand::VideoControl { action: VideoAction::Seek, value: 10.0 },
                ClientCommand::VideoControl { action: VideoAction::Speed, value: 1.5 },
            ]
        );
    }

    #[tokio::test]
    async fn test_hub_error_is_reported_not_fatal() {
        let mut h = Harness::new("me");
        h.joined("a", &["a", "me"]);
        h.notices();

        h.session.handle_hub_event(HubEvent::Error { code: ErrorCode::RoomFull, message: "room is full".to_string() });
        assert_eq!(
            h.notices(),
            vec![Notice::HubError { code: ErrorCode::RoomFull, message: "room is full".to_string() }]
        );
        assert_eq!(h.session.phase(), SessionPhase::Joined);
        assert!(h.session.send_chat("still here").is_ok());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let mut h = Harness::new("me");
        h.joined("a", &["a", "me"]);
        h.session.handle_inbound(HubInbound::Disconnected);

        assert_eq!(h.session.phase(), SessionPhase::Disconnected);
        assert_eq!(h.session.peers().link_count(), 0);
        assert_eq!(h.notices().last(), Some(&Notice::Disconnected));
        assert!(matches!(h.session.create_room(), Err(SessionError::Disconnected)));
    }

    #[tokio::test]
    async fn test_run_until_disconnected() {
        let mut h = Harness::new("me");
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (_surface_tx, surface_rx) = mpsc::channel(8);

        inbound_tx.send(HubInbound::Event(HubEvent::Welcome { participant_id: "me".into() })).await.unwrap();
        inbound_tx
            .send(HubInbound::Event(HubEvent::PasswordRequired { room_id: "abc123".into() }))
            .await
            .unwrap();
        inbound_tx.send(HubInbound::Disconnected).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), h.session.run(inbound_rx, surface_rx))
            .await
            .expect("run loop should stop on disconnect");
        assert_eq!(h.session.phase(), SessionPhase::Disconnected);
        assert_eq!(
            h.notices(),
            vec![
                Notice::Connected("me".into()),
                Notice::PasswordRequired("abc123".into()),
                Notice::Disconnected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings() {
        let mut h = Harness::new("me");
        tokio::time::sleep(Duration::from_secs(31)).await;
        let pings = h.sent().into_iter().filter(|c| matches!(c, ClientCommand::Ping { .. })).count();
        assert_eq!(pings, 2);
    }

    #[tokio::test]
    async fn test_drop_releases_media() {
        let devices = FakeDevices::default();
        let mut h = Harness::new("me");
        h.session.acquire_media(&devices).await.unwrap();
        drop(h);
        assert!(devices.all_stopped());
    }
}
