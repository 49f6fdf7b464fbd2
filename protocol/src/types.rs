use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// Longest accepted playback position (24 hours).
pub const MAX_POSITION_SECONDS: f64 = 86400.0;
pub const MIN_PLAYBACK_RATE: f64 = 0.25;
pub const MAX_PLAYBACK_RATE: f64 = 4.0;
/// Rates offered by the player's speed selector.
pub const PLAYBACK_RATES: [f64; 4] = [0.5, 1.0, 1.5, 2.0];
pub const MAX_CHAT_MESSAGE_CHARS: usize = 2000;

/// Returns false for NaN, Infinity, negative values, or values exceeding 24 hours.
pub fn is_valid_position(pos: f64) -> bool {
    pos.is_finite() && (0.0..=MAX_POSITION_SECONDS).contains(&pos)
}

pub fn is_valid_rate(rate: f64) -> bool {
    rate.is_finite() && (MIN_PLAYBACK_RATE..=MAX_PLAYBACK_RATE).contains(&rate)
}

/// Trims and checks a chat body; `None` means the message must not be sent.
pub fn normalize_chat_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_CHAT_MESSAGE_CHARS {
        return None;
    }
    Some(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub mic_enabled: bool,
    pub video_enabled: bool,
    pub joined_at: u64,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: impl Into<String>, joined_at: u64) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            mic_enabled: true,
            video_enabled: true,
            joined_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoAction {
    Play,
    Pause,
    Seek,
    Speed,
}

impl VideoAction {
    /// `value` is the playback position for play/pause/seek and the rate for speed.
    pub fn is_valid_value(self, value: f64) -> bool {
        match self {
            VideoAction::Speed => is_valid_rate(value),
            _ => is_valid_position(value),
        }
    }
}

/// Authoritative playback tuple. Every accepted command replaces the whole
/// value; there is no field-level merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub position_seconds: f64,
    pub paused: bool,
    pub rate: f64,
    pub last_updated_by: ParticipantId,
    pub last_updated_at: u64,
}

impl PlaybackState {
    pub fn initial(creator: ParticipantId, at: u64) -> Self {
        Self {
            position_seconds: 0.0,
            paused: true,
            rate: 1.0,
            last_updated_by: creator,
            last_updated_at: at,
        }
    }

    /// Position implied at `at`. Paused playback does not move.
    pub fn position_at(&self, at: u64) -> f64 {
        if self.paused {
            return self.position_seconds;
        }
        let elapsed = at.saturating_sub(self.last_updated_at) as f64 / 1000.0;
        (self.position_seconds + elapsed * self.rate).min(MAX_POSITION_SECONDS)
    }

    /// The same playback carried forward to `at`.
    pub fn advanced_to(&self, at: u64) -> Self {
        Self {
            position_seconds: self.position_at(at),
            last_updated_at: at.max(self.last_updated_at),
            ..self.clone()
        }
    }

    /// Builds the successor tuple for one control command. `last_updated_at`
    /// never moves backwards even if the caller's clock does, and a speed
    /// change keeps the position playback has reached.
    pub fn next(&self, action: VideoAction, value: f64, by: ParticipantId, at: u64) -> Self {
        let mut next = Self { last_updated_by: by, ..self.advanced_to(at) };
        match action {
            VideoAction::Play => {
                next.paused = false;
                next.position_seconds = value;
            }
            VideoAction::Pause => {
                next.paused = true;
                next.position_seconds = value;
            }
            VideoAction::Seek => next.position_seconds = value,
            VideoAction::Speed => next.rate = value,
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSender {
    pub id: ParticipantId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sent_at: u64,
    pub sender: ChatSender,
}

impl ChatMessage {
    pub fn sender_id(&self) -> &ParticipantId {
        &self.sender.id
    }

    pub fn sender_name(&self) -> &str {
        &self.sender.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ParticipantId {
        ParticipantId::from("alice")
    }

    #[test]
    fn test_position_validation() {
        assert!(is_valid_position(0.0));
        assert!(is_valid_position(MAX_POSITION_SECONDS));
        assert!(!is_valid_position(-1.0));
        assert!(!is_valid_position(f64::NAN));
        assert!(!is_valid_position(f64::INFINITY));
        assert!(!is_valid_position(MAX_POSITION_SECONDS + 1.0));
    }

    #[test]
    fn test_rate_validation() {
        for rate in PLAYBACK_RATES {
            assert!(is_valid_rate(rate));
        }
        assert!(!is_valid_rate(0.0));
        assert!(!is_valid_rate(8.0));
        assert!(VideoAction::Speed.is_valid_value(1.5));
        assert!(!VideoAction::Speed.is_valid_value(120.0));
        assert!(VideoAction::Seek.is_valid_value(120.0));
    }

    #[test]
    fn test_chat_text_normalized() {
        assert_eq!(normalize_chat_text("  hi  ").as_deref(), Some("hi"));
        assert_eq!(normalize_chat_text("   "), None);
        let long = "x".repeat(MAX_CHAT_MESSAGE_CHARS + 1);
        assert_eq!(normalize_chat_text(&long), None);
    }

    #[test]
    fn test_next_state_overwrites_tuple() {
        let bob = ParticipantId::from("bob");
        let state = PlaybackState::initial(alice(), 1_000);

        let playing = state.next(VideoAction::Play, 12.5, bob.clone(), 2_000);
        assert!(!playing.paused);
        assert_eq!(playing.position_seconds, 12.5);
        assert_eq!(playing.rate, 1.0);
        assert_eq!(playing.last_updated_by, bob);
        assert_eq!(playing.last_updated_at, 2_000);

        let faster = playing.next(VideoAction::Speed, 2.0, alice(), 3_000);
        assert_eq!(faster.rate, 2.0);
        assert_eq!(faster.position_seconds, 13.5, "one second played at 1x before the change");
        assert!(!faster.paused);
    }

    #[test]
    fn test_speed_change_keeps_reached_position() {
        let playing = PlaybackState::initial(alice(), 0).next(VideoAction::Play, 0.0, alice(), 0);
        let faster = playing.next(VideoAction::Speed, 1.5, alice(), 60_000);
        assert_eq!(faster.position_seconds, 60.0);
        assert_eq!(faster.last_updated_at, 60_000);

        // Later positions extrapolate at the new rate from there.
        assert_eq!(faster.position_at(70_000), 75.0);
    }

    #[test]
    fn test_advanced_to_leaves_paused_playback_alone() {
        let paused = PlaybackState::initial(alice(), 0).next(VideoAction::Pause, 42.0, alice(), 1_000);
        let later = paused.advanced_to(61_000);
        assert_eq!(later.position_seconds, 42.0);
        assert_eq!(later.last_updated_at, 61_000);
        assert_eq!(later.last_updated_by, alice());
    }

    #[test]
    fn test_next_state_timestamp_is_monotonic() {
        let state = PlaybackState::initial(alice(), 5_000);
        let next = state.next(VideoAction::Seek, 30.0, alice(), 4_000);
        assert_eq!(next.last_updated_at, 5_000);
    }

    #[test]
    fn test_chat_message_wire_shape() {
        let msg = ChatMessage {
            id: "m1".to_string(),
            text: "hello".to_string(),
            sent_at: 42,
            sender: ChatSender { id: alice(), name: "Alice".to_string() },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sentAt"], 42);
        assert_eq!(json["sender"]["id"], "alice");
        assert_eq!(json["sender"]["name"], "Alice");
        assert_eq!(msg.sender_id(), &alice());
    }
}
