use std::sync::atomic::{AtomicU64, Ordering};

use crate::blit::CopyPath;

/// Counters for the binding engine.
///
/// Cheap to bump from inside the runtime lock and readable from any thread through a shared
/// handle.
#[derive(Debug, Default)]
pub struct BindingStats {
    allocations: AtomicU64,
    releases: AtomicU64,
    invalidations: AtomicU64,
    uploads: AtomicU64,
    skipped_uploads: AtomicU64,
    downloads: AtomicU64,
    contiguous_copies: AtomicU64,
    row_by_row_copies: AtomicU64,
    converted_copies: AtomicU64,
    format_fallbacks: AtomicU64,
}

impl BindingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_allocations(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_releases(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invalidations(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_uploads(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped_uploads(&self) {
        self.skipped_uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_downloads(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_format_fallbacks(&self) {
        self.format_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy(&self, path: CopyPath) {
        let counter = match path {
            CopyPath::Contiguous => &self.contiguous_copies,
            CopyPath::RowByRow => &self.row_by_row_copies,
            CopyPath::Converted => &self.converted_copies,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BindingStatsSnapshot {
        BindingStatsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            skipped_uploads: self.skipped_uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            contiguous_copies: self.contiguous_copies.load(Ordering::Relaxed),
            row_by_row_copies: self.row_by_row_copies.load(Ordering::Relaxed),
            converted_copies: self.converted_copies.load(Ordering::Relaxed),
            format_fallbacks: self.format_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Returns a JSON object as a string.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingStatsSnapshot {
    pub allocations: u64,
    pub releases: u64,
    pub invalidations: u64,
    pub uploads: u64,
    pub skipped_uploads: u64,
    pub downloads: u64,
    pub contiguous_copies: u64,
    pub row_by_row_copies: u64,
    pub converted_copies: u64,
    pub format_fallbacks: u64,
}

impl BindingStatsSnapshot {
    pub fn to_json(self) -> String {
        format!(
            "{{\"allocations\":{},\"releases\":{},\"invalidations\":{},\"uploads\":{},\"skipped_uploads\":{},\"downloads\":{},\"copies\":{{\"contiguous\":{},\"row_by_row\":{},\"converted\":{}}},\"format_fallbacks\":{}}}",
            self.allocations,
            self.releases,
            self.invalidations,
            self.uploads,
            self.skipped_uploads,
            self.downloads,
            self.contiguous_copies,
            self.row_by_row_copies,
            self.converted_copies,
            self.format_fallbacks,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_json_contains_counters() {
        let stats = BindingStats::new();
        stats.inc_allocations();
        stats.inc_allocations();
        stats.inc_skipped_uploads();
        stats.record_copy(CopyPath::RowByRow);
        stats.record_copy(CopyPath::Converted);
        let json = stats.to_json();
        assert!(json.contains("\"allocations\":2"));
        assert!(json.contains("\"skipped_uploads\":1"));
        assert!(json.contains("\"row_by_row\":1"));
        assert!(json.contains("\"contiguous\":0"));
        assert!(json.contains("\"converted\":1"));
        assert_eq!(stats.snapshot().row_by_row_copies, 1);
    }
}
