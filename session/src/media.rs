use crate::ports::{CapturedTrack, MediaDevices, SessionDescription, TrackKind};

/// The local camera and microphone, owned exclusively by one session.
///
/// Toggling flips the enabled flag on the captured track in place. A session
/// without devices (denied or never acquired) reports both flags as false.
#[derive(Default)]
pub struct LocalMedia {
    tracks: Vec<Box<dyn CapturedTrack>>,
}

impl LocalMedia {
    pub fn none() -> Self {
        Self::default()
    }

    /// Captures microphone and camera together.
    pub async fn acquire(devices: &dyn MediaDevices) -> anyhow::Result<Self> {
        let tracks = devices.capture(true, true).await?;
        log::info!("Captured {} local track(s)", tracks.len());
        Ok(Self { tracks })
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn mic_enabled(&self) -> bool {
        self.enabled(TrackKind::Audio)
    }

    pub fn video_enabled(&self) -> bool {
        self.enabled(TrackKind::Video)
    }

    /// Returns the new state, or `false` when there is no such track.
    pub fn toggle_mic(&mut self) -> bool {
        self.toggle(TrackKind::Audio)
    }

    pub fn toggle_video(&mut self) -> bool {
        self.toggle(TrackKind::Video)
    }

    /// Local description offered to every peer; lists the tracks attached.
    pub fn describe(&self) -> SessionDescription {
        let tracks: Vec<String> = self
            .tracks
            .iter()
            .map(|t| format!("{}:{}", kind_label(t.kind()), t.id()))
            .collect();
        SessionDescription { sdp: tracks.join(",") }
    }

    /// Stops every track and forgets it.
    pub fn release(&mut self) {
        for track in self.tracks.iter_mut() {
            track.stop();
        }
        if !self.tracks.is_empty() {
            log::info!("Released {} local track(s)", self.tracks.len());
        }
        self.tracks.clear();
    }

    fn enabled(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind && t.is_enabled())
    }

    fn toggle(&mut self, kind: TrackKind) -> bool {
        let mut state = false;
        for track in self.tracks.iter_mut().filter(|t| t.kind() == kind) {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            state = enabled;
        }
        state
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.release();
    }
}

fn kind_label(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    }
}
