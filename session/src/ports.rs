//! Port traits for the collaborators the engine consumes but does not
//! implement: the rendezvous service, the capture devices, and the on-screen
//! playback surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use watchparty_protocol::ParticipantId;

// ---------------------------------------------------------------------------
// Rendezvous (handshake exchange)
// ---------------------------------------------------------------------------

/// Opaque session-description payload exchanged during a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
}

/// Remote media bound to a render surface once a link is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub peer: ParticipantId,
    pub description: SessionDescription,
}

/// Exchanges handshake payloads with one remote endpoint. ICE-style candidate
/// trickling is the implementation's business.
#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Sends our offer and waits for the remote answer.
    async fn offer(&self, remote: &ParticipantId, local: SessionDescription) -> anyhow::Result<SessionDescription>;

    /// Waits for the remote offer and replies with `local` as the answer.
    async fn answer(&self, remote: &ParticipantId, local: SessionDescription) -> anyhow::Result<SessionDescription>;
}

// ---------------------------------------------------------------------------
// Media capture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One captured camera or microphone track.
pub trait CapturedTrack: Send {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    /// Mutes/unmutes in place; never renegotiates any connection.
    fn set_enabled(&mut self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Releases the underlying device.
    fn stop(&mut self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquires the requested devices. Fails when access is denied or no
    /// device is available.
    async fn capture(&self, audio: bool, video: bool) -> anyhow::Result<Vec<Box<dyn CapturedTrack>>>;
}

// ---------------------------------------------------------------------------
// Playback surface
// ---------------------------------------------------------------------------

/// Events emitted by the on-screen player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceEvent {
    Play,
    Pause,
    TimeUpdate(f64),
    Seeking,
    Seeked(f64),
    RateChange(f64),
}

/// Commands accepted by the on-screen player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceCommand {
    SetPaused(bool),
    SetTime(f64),
    SetRate(f64),
}

pub trait PlaybackSurface: Send {
    fn apply(&mut self, command: SurfaceCommand);
}
