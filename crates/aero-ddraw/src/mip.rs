//! Mip-chain traversal over the attachment graph.
//!
//! The declared mip count in a descriptor is only a hint; clients routinely leave it at 1 while
//! attaching a full chain. The walk below is the authoritative level count.

use crate::caps::is_mip_sublevel;
use crate::device::max_mip_levels;
use crate::surface::{SurfaceArena, SurfaceId};

/// Longest chain followed below a top-level surface (16 levels including the top).
pub const MAX_MIP_SUBLEVELS: u32 = 15;

/// Iterator over the mip sublevels attached below a surface, nearest first.
///
/// Restartable: clone it before consuming to walk the chain again.
#[derive(Debug, Clone)]
pub struct MipChain<'a> {
    arena: &'a SurfaceArena,
    top: SurfaceId,
    current: Option<SurfaceId>,
    remaining: u32,
}

impl<'a> MipChain<'a> {
    pub fn new(arena: &'a SurfaceArena, top: SurfaceId) -> Self {
        Self {
            arena,
            top,
            current: Some(top),
            remaining: MAX_MIP_SUBLEVELS,
        }
    }
}

impl Iterator for MipChain<'_> {
    type Item = SurfaceId;

    fn next(&mut self) -> Option<SurfaceId> {
        if self.remaining == 0 {
            return None;
        }
        let parent = self.arena.get(self.current?)?;
        let next = parent
            .attachments
            .iter()
            .map(|a| a.surface)
            .filter(|&id| id != self.top)
            .find(|&id| {
                self.arena
                    .get(id)
                    .is_some_and(|child| is_mip_sublevel(parent.caps_pair(), child.caps_pair()))
            });
        self.current = next;
        if next.is_some() {
            self.remaining -= 1;
        }
        next
    }
}

/// Every level of the chain rooted at `top`, paired with its level index (the top is level 0).
pub fn levels(arena: &SurfaceArena, top: SurfaceId) -> impl Iterator<Item = (u32, SurfaceId)> + '_ {
    std::iter::once(top)
        .chain(MipChain::new(arena, top))
        .zip(0u32..)
        .map(|(id, level)| (level, id))
}

/// Authoritative level count of the chain rooted at `top`, clamped to what its extent allows.
pub fn level_count(arena: &SurfaceArena, top: SurfaceId) -> u32 {
    let Some(surface) = arena.get(top) else {
        return 0;
    };
    let (width, height) = surface.extent();
    let walked = 1 + MipChain::new(arena, top).count() as u32;
    walked.min(max_mip_levels(width, height))
}
