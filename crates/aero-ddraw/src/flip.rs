//! Flip-chain to swap-chain slot mapping.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::caps::SurfaceKind;
use crate::device::{GpuDevice, ResourceId};
use crate::surface::{SurfaceArena, SurfaceId};

/// Swap-chain slot of every surface in the active flip chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackBufferMap {
    pub slots: HashMap<SurfaceId, u32>,
    /// Back buffer 0, used for surfaces outside the chain that still alias the swap chain.
    pub fallback: Option<ResourceId>,
}

impl BackBufferMap {
    pub fn slot(&self, surface: SurfaceId) -> Option<u32> {
        self.slots.get(&surface).copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Maps `front` and every flippable surface reachable from it to a swap-chain index.
///
/// The front buffer maps to slot 0 so writes to it stay visible; the back buffers follow in
/// attachment order from 0. With `force_single` every back buffer shares slot 0. The walk
/// stops when it returns to `front`, reaches a surface with no flippable attachment, or
/// revisits a surface.
pub fn enumerate_back_buffers<D: GpuDevice>(
    arena: &SurfaceArena,
    front: Option<SurfaceId>,
    device: &mut D,
    force_single: bool,
) -> BackBufferMap {
    let fallback = match device.back_buffer(0) {
        Ok(resource) => Some(resource),
        Err(err) => {
            warn!(%err, "swap chain has no back buffer 0");
            None
        }
    };
    let mut map = BackBufferMap {
        slots: HashMap::new(),
        fallback,
    };
    let Some(front) = front.filter(|&id| arena.contains(id)) else {
        return map;
    };

    map.slots.insert(front, 0);
    let mut visited = HashSet::new();
    visited.insert(front);

    let mut current = front;
    let mut index = 0u32;
    while let Some(next) = next_in_chain(arena, current) {
        if next == front || !visited.insert(next) {
            break;
        }
        map.slots.insert(next, if force_single { 0 } else { index });
        index += 1;
        current = next;
    }

    debug!(surface = %front, slots = map.slots.len(), force_single, "enumerated flip chain");
    map
}

fn next_in_chain(arena: &SurfaceArena, id: SurfaceId) -> Option<SurfaceId> {
    arena.get(id)?.attachments.iter().map(|a| a.surface).find(|&child| {
        arena.get(child).is_some_and(|s| {
            matches!(s.kind, SurfaceKind::BackBuffer | SurfaceKind::FrontBuffer)
        })
    })
}
