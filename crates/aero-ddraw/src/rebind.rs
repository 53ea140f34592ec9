//! Device-generation tracking.
//!
//! Every device context gets a fresh [`DeviceGeneration`]. Surfaces remember the generation
//! their binding was made under; a mismatch means the binding refers to a device that no longer
//! exists and must be dropped before anything touches it.

use core::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::surface::{Binding, Surface};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one device context instance. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceGeneration(NonZeroU64);

impl DeviceGeneration {
    pub fn next() -> Self {
        let raw = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and a u64 does not wrap in practice.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for DeviceGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Drops `surface`'s binding if it was made under a different generation and records
/// `generation` as current. Returns whether a binding was invalidated.
///
/// The stale resource is forgotten, not released: it belonged to a device that is gone.
pub fn refresh_binding(surface: &mut Surface, generation: Option<DeviceGeneration>) -> bool {
    if surface.bound_generation == generation {
        return false;
    }
    let invalidated = !surface.binding.resource.is_none();
    if invalidated {
        debug!(
            from = ?surface.bound_generation,
            to = ?generation,
            ?surface.kind,
            "dropping binding from previous device"
        );
    }
    surface.binding = Binding::NONE;
    surface.bound_generation = generation;
    invalidated
}
