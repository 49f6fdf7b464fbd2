//! Keeps the local playback surface aligned with the room's authoritative
//! playback state, and turns local user actions into `videoControl` commands.
//!
//! Commands this module issues to the surface are remembered as expected
//! echoes: the surface events they cause are consumed here and never turned
//! back into outbound commands.

use std::sync::Arc;
use watchparty_protocol::types::{MAX_POSITION_SECONDS, PLAYBACK_RATES};
use watchparty_protocol::{ClientCommand, Clock, PlaybackState, VideoAction};

use crate::error::SessionError;
use crate::ports::{PlaybackSurface, SurfaceCommand, SurfaceEvent};

/// Seek step of the skip buttons, in seconds.
pub const SEEK_STEP_SECONDS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not in a room.
    Idle,
    /// A corrective seek was issued and has not landed yet.
    Syncing,
    Playing,
    Paused,
    /// The local user is dragging the seek bar; remote commands are dropped.
    LocalSeeking,
}

#[derive(Debug, Default)]
struct ExpectedEchoes {
    paused: Option<bool>,
    seek: bool,
    rate: Option<f64>,
}

pub struct PlaybackSynchronizer {
    clock: Arc<dyn Clock>,
    drift_threshold: f64,
    phase: SyncPhase,
    paused: bool,
    rate: f64,
    position: f64,
    position_at_ms: u64,
    last_applied_at: Option<u64>,
    expected: ExpectedEchoes,
}

impl PlaybackSynchronizer {
    pub fn new(clock: Arc<dyn Clock>, drift_threshold: f64) -> Self {
        let now = clock.now_ms();
        Self {
            clock,
            drift_threshold,
            phase: SyncPhase::Idle,
            paused: true,
            rate: 1.0,
            position: 0.0,
            position_at_ms: now,
            last_applied_at: None,
            expected: ExpectedEchoes::default(),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Best estimate of where the local surface is right now.
    pub fn local_position(&self) -> f64 {
        if self.paused {
            return self.position;
        }
        let elapsed = self.clock.now_ms().saturating_sub(self.position_at_ms) as f64 / 1000.0;
        self.position + elapsed * self.rate
    }

    /// Aligns with the snapshot received on joining a room.
    pub fn begin(&mut self, state: &PlaybackState, surface: &mut dyn PlaybackSurface) {
        self.reset();
        self.phase = SyncPhase::Syncing;
        self.reconcile(state, surface);
    }

    /// Back to `Idle`, forgetting everything learned in the room.
    pub fn reset(&mut self) {
        let clock = self.clock.clone();
        *self = Self::new(clock, self.drift_threshold);
    }

    /// Reconciles with an authoritative state relayed by the hub. Returns
    /// whether the state was taken into account.
    pub fn reconcile(&mut self, state: &PlaybackState, surface: &mut dyn PlaybackSurface) -> bool {
        match self.phase {
            SyncPhase::Idle => return false,
            SyncPhase::LocalSeeking => {
                log::debug!("Dropping remote playback state while seeking locally");
                return false;
            }
            _ => {}
        }
        if self.last_applied_at.is_some_and(|last| state.last_updated_at < last) {
            log::debug!("Ignoring stale playback state from {}", state.last_updated_by);
            return false;
        }
        self.last_applied_at = Some(state.last_updated_at);

        if state.rate != self.rate {
            self.issue(surface, SurfaceCommand::SetRate(state.rate));
        }
        let mut seeking = false;
        if (self.local_position() - state.position_seconds).abs() > self.drift_threshold {
            self.issue(surface, SurfaceCommand::SetTime(state.position_seconds));
            seeking = true;
        }
        if state.paused != self.paused {
            self.issue(surface, SurfaceCommand::SetPaused(state.paused));
        }

        self.phase = if seeking { SyncPhase::Syncing } else { self.settled_phase() };
        true
    }

    /// Handles an event reported by the local surface. Returns the command to
    /// send to the hub when the event was user-originated.
    pub fn on_surface_event(&mut self, event: SurfaceEvent) -> Option<ClientCommand> {
        if self.phase == SyncPhase::Idle {
            self.observe(event);
            return None;
        }
        match event {
            SurfaceEvent::Play | SurfaceEvent::Pause => {
                let paused = event == SurfaceEvent::Pause;
                // Any play/pause settles the pending expectation; only a
                // matching one is swallowed.
                if self.expected.paused.take() == Some(paused) {
                    return None;
                }
                self.set_paused(paused);
                let action = if paused { VideoAction::Pause } else { VideoAction::Play };
                Some(ClientCommand::VideoControl { action, value: self.position })
            }
            SurfaceEvent::TimeUpdate(t) => {
                self.anchor(t);
                None
            }
            SurfaceEvent::Seeking => {
                if !self.expected.seek {
                    self.phase = SyncPhase::LocalSeeking;
                }
                None
            }
            SurfaceEvent::Seeked(t) => {
                self.anchor(t);
                if self.expected.seek {
                    self.expected.seek = false;
                    if self.phase == SyncPhase::Syncing {
                        self.phase = self.settled_phase();
                    }
                    return None;
                }
                if self.phase == SyncPhase::LocalSeeking {
                    self.phase = self.settled_phase();
                }
                Some(ClientCommand::VideoControl { action: VideoAction::Seek, value: t })
            }
            SurfaceEvent::RateChange(rate) => {
                if self.expected.rate.take() == Some(rate) {
                    return None;
                }
                self.rebase();
                self.rate = rate;
                Some(ClientCommand::VideoControl { action: VideoAction::Speed, value: rate })
            }
        }
    }

    /// The command is published even when the surface is already playing;
    /// the surface is only touched when something changes.
    pub fn play(&mut self, surface: &mut dyn PlaybackSurface) -> ClientCommand {
        if self.paused {
            self.issue(surface, SurfaceCommand::SetPaused(false));
        }
        self.phase = self.settled_phase();
        ClientCommand::VideoControl { action: VideoAction::Play, value: self.position }
    }

    pub fn pause(&mut self, surface: &mut dyn PlaybackSurface) -> ClientCommand {
        if !self.paused {
            self.issue(surface, SurfaceCommand::SetPaused(true));
        }
        self.phase = self.settled_phase();
        ClientCommand::VideoControl { action: VideoAction::Pause, value: self.position }
    }

    /// Skips `delta` seconds, clamped to the valid position range.
    pub fn seek_by(&mut self, delta: f64, surface: &mut dyn PlaybackSurface) -> ClientCommand {
        let target = (self.local_position() + delta).clamp(0.0, MAX_POSITION_SECONDS);
        self.issue(surface, SurfaceCommand::SetTime(target));
        ClientCommand::VideoControl { action: VideoAction::Seek, value: target }
    }

    pub fn set_rate(&mut self, rate: f64, surface: &mut dyn PlaybackSurface) -> Result<ClientCommand, SessionError> {
        if !PLAYBACK_RATES.contains(&rate) {
            return Err(SessionError::InvalidValue(format!("unsupported playback rate {}", rate)));
        }
        if rate != self.rate {
            self.issue(surface, SurfaceCommand::SetRate(rate));
        }
        Ok(ClientCommand::VideoControl { action: VideoAction::Speed, value: rate })
    }

    fn issue(&mut self, surface: &mut dyn PlaybackSurface, command: SurfaceCommand) {
        match command {
            SurfaceCommand::SetPaused(paused) => {
                self.set_paused(paused);
                self.expected.paused = Some(paused);
            }
            SurfaceCommand::SetTime(t) => {
                self.anchor(t);
                self.expected.seek = true;
            }
            SurfaceCommand::SetRate(rate) => {
                self.rebase();
                self.rate = rate;
                self.expected.rate = Some(rate);
            }
        }
        surface.apply(command);
    }

    /// Tracks surface state while outside a room.
    fn observe(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Play => self.set_paused(false),
            SurfaceEvent::Pause => self.set_paused(true),
            SurfaceEvent::TimeUpdate(t) | SurfaceEvent::Seeked(t) => self.anchor(t),
            SurfaceEvent::RateChange(rate) => {
                self.rebase();
                self.rate = rate;
            }
            SurfaceEvent::Seeking => {}
        }
    }

    fn set_paused(&mut self, paused: bool) {
        self.rebase();
        self.paused = paused;
    }

    fn anchor(&mut self, position: f64) {
        self.position = position;
        self.position_at_ms = self.clock.now_ms();
    }

    /// Folds elapsed play time into `position` before a rate or pause change.
    fn rebase(&mut self) {
        let position = self.local_position();
        self.anchor(position);
    }

    fn settled_phase(&self) -> SyncPhase {
        if self.paused {
            SyncPhase::Paused
        } else {
            SyncPhase::Playing
        }
    }
}
