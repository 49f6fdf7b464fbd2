//! Wire types shared by the watch-party hub and its clients.

pub mod clock;
pub mod ids;
pub mod messages;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{ParticipantId, RoomId};
pub use messages::{ClientCommand, ErrorCode, HubEvent};
pub use types::{ChatMessage, ChatSender, Participant, PlaybackState, VideoAction};
