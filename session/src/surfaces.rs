//! Per-peer render surfaces, stored in an arena keyed by peer id.

use std::collections::HashMap;
use watchparty_protocol::ParticipantId;

use crate::ports::RemoteStream;

/// Stable handle into the registry. A handle outlives its surface only as a
/// dangling key: lookups after removal return `None`, even if the slot has
/// been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSurface {
    pub peer: ParticipantId,
    pub stream: RemoteStream,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    surface: Option<RenderSurface>,
}

#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_peer: HashMap<ParticipantId, SurfaceHandle>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `stream` to a surface for its peer, replacing any previous one.
    pub fn insert(&mut self, stream: RemoteStream) -> SurfaceHandle {
        let peer = stream.peer.clone();
        self.remove(&peer);

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.surface = Some(RenderSurface { peer: peer.clone(), stream });
        let handle = SurfaceHandle { index, generation: slot.generation };
        self.by_peer.insert(peer, handle);
        handle
    }

    pub fn get(&self, handle: SurfaceHandle) -> Option<&RenderSurface> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.surface.as_ref())
    }

    pub fn handle_for(&self, peer: &ParticipantId) -> Option<SurfaceHandle> {
        self.by_peer.get(peer).copied()
    }

    pub fn remove(&mut self, peer: &ParticipantId) -> Option<RenderSurface> {
        let handle = self.by_peer.remove(peer)?;
        let slot = &mut self.slots[handle.index];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        slot.surface.take()
    }

    pub fn clear(&mut self) {
        let peers: Vec<ParticipantId> = self.by_peer.keys().cloned().collect();
        for peer in peers {
            self.remove(&peer);
        }
    }

    pub fn len(&self) -> usize {
        self.by_peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_peer.is_empty()
    }
}
