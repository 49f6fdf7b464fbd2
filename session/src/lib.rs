//! Client side of a watch party: one [`Session`] per viewer keeps the local
//! player, camera/microphone links and chat in step with the room.

pub mod chat;
pub mod config;
pub mod error;
pub mod hub_client;
pub mod media;
pub mod peers;
pub mod ports;
pub mod session;
pub mod surfaces;
pub mod sync;
pub mod task;

pub use chat::ChatChannel;
pub use config::SessionConfig;
pub use error::{PeerError, SessionError};
pub use hub_client::{HubClient, HubInbound};
pub use media::LocalMedia;
pub use peers::{HandshakeOutcome, LinkState, PeerConnectionManager, PeerLink, PeerUpdate};
pub use ports::{
    CapturedTrack, MediaDevices, PlaybackSurface, RemoteStream, Rendezvous, SessionDescription, SurfaceCommand,
    SurfaceEvent, TrackKind,
};
pub use session::{Notice, RoomView, Session, SessionPhase, SessionPorts};
pub use surfaces::{RenderSurface, SurfaceHandle, SurfaceRegistry};
pub use sync::{PlaybackSynchronizer, SyncPhase};
pub use task::ScheduledTask;
