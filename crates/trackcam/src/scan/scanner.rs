//! Region enumeration and pattern scanning over a target address space.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::memory::{MemoryRegion, QueryRegions, ReadMemory};
use crate::pattern::BytePattern;

/// Step used when a region query fails and no size is known.
pub const PAGE_SIZE: u64 = 0x1000;

/// What the scanner does with one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionVerdict {
    Scan,
    /// Committed and writable but larger than the ceiling.
    SkipOversized,
    Ignore,
}

/// Decide whether a region is scanned.
pub fn region_verdict(region: &MemoryRegion, max_region_size: u64) -> RegionVerdict {
    if !(region.is_committed() && region.is_writable()) {
        return RegionVerdict::Ignore;
    }
    if region.size > max_region_size {
        RegionVerdict::SkipOversized
    } else if region.is_private() {
        RegionVerdict::Scan
    } else {
        RegionVerdict::Ignore
    }
}

/// Counters for one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub regions_scanned: usize,
    pub regions_skipped: usize,
    pub regions_failed: usize,
    pub query_failures: usize,
    pub bytes_scanned: u64,
    pub candidates: usize,
    pub elapsed: Duration,
    /// The walk stopped early on request.
    pub cancelled: bool,
}

pub struct RegionScanner<'a, M: ReadMemory + QueryRegions + ?Sized> {
    memory: &'a M,
    pattern: &'a BytePattern,
    max_region_size: u64,
    heartbeat: Duration,
    label: String,
    cancel: Option<Box<dyn Fn() -> bool + 'a>>,
}

impl<'a, M: ReadMemory + QueryRegions + ?Sized> RegionScanner<'a, M> {
    pub fn new(memory: &'a M, pattern: &'a BytePattern, max_region_size: u64) -> Self {
        Self {
            memory,
            pattern,
            max_region_size,
            heartbeat: Duration::from_secs(10),
            label: "scanner".to_string(),
            cancel: None,
        }
    }

    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    /// Prefix for log lines (usually the camera name).
    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = label.into();
        self
    }

    /// Stop between regions once `cancel` returns true.
    pub fn cancel_when<F: Fn() -> bool + 'a>(mut self, cancel: F) -> Self {
        self.cancel = Some(Box::new(cancel));
        self
    }

    /// Walk the address space and report every match through `on_match`.
    pub fn scan<F: FnMut(u64)>(&self, mut on_match: F) -> ScanStats {
        let start = Instant::now();
        let mut last_heartbeat = start;
        let mut stats = ScanStats::default();
        let max_address = self.memory.max_address();
        let mut address = 0u64;

        info!(
            "[{}] Scanning up to {:#x} for a {}-byte pattern",
            self.label,
            max_address,
            self.pattern.len()
        );

        while address < max_address {
            if self.cancel.as_ref().is_some_and(|cancel| cancel()) {
                info!("[{}] Scan cancelled", self.label);
                stats.cancelled = true;
                break;
            }

            let region = match self.memory.query_region(address) {
                Ok(Some(region)) => region,
                Ok(None) => break,
                Err(e) => {
                    debug!("[{}] Region query failed: {}", self.label, e);
                    stats.query_failures += 1;
                    address = address.saturating_add(PAGE_SIZE);
                    continue;
                }
            };

            let next = region.end().max(address.saturating_add(PAGE_SIZE.min(region.size.max(1))));

            match region_verdict(&region, self.max_region_size) {
                RegionVerdict::Scan => self.scan_region(&region, &mut stats, &mut on_match),
                RegionVerdict::SkipOversized => {
                    debug!(
                        "[{}] Skipped huge region {:#x} ({} bytes)",
                        self.label, region.base_address, region.size
                    );
                    stats.regions_skipped += 1;
                }
                RegionVerdict::Ignore => {}
            }

            if last_heartbeat.elapsed() >= self.heartbeat {
                info!(
                    "[{}] Scanned {} regions ({} skipped) in {:.1}s, {} matches so far",
                    self.label,
                    stats.regions_scanned,
                    stats.regions_skipped,
                    start.elapsed().as_secs_f32(),
                    stats.candidates
                );
                last_heartbeat = Instant::now();
            }

            address = next;
        }

        stats.elapsed = start.elapsed();
        info!(
            "[{}] Scan complete in {:.2}s: {} regions scanned, {} skipped, {} candidates",
            self.label,
            stats.elapsed.as_secs_f32(),
            stats.regions_scanned,
            stats.regions_skipped,
            stats.candidates
        );
        stats
    }

    fn scan_region<F: FnMut(u64)>(
        &self,
        region: &MemoryRegion,
        stats: &mut ScanStats,
        on_match: &mut F,
    ) {
        let buffer = match self.memory.read_bytes(region.base_address, region.size as usize) {
            Ok(buffer) => buffer,
            Err(e) => {
                debug!("[{}] Unreadable region {:#x}: {}", self.label, region.base_address, e);
                stats.regions_failed += 1;
                return;
            }
        };

        stats.regions_scanned += 1;
        stats.bytes_scanned += buffer.len() as u64;

        for offset in self.pattern.find_all(&buffer) {
            stats.candidates += 1;
            on_match(region.base_address + offset as u64);
        }
    }
}

/// Scan and collect every candidate address.
pub fn collect_candidates<M: ReadMemory + QueryRegions + ?Sized>(
    memory: &M,
    pattern: &BytePattern,
    max_region_size: u64,
) -> (Vec<u64>, ScanStats) {
    let mut found = Vec::new();
    let stats = RegionScanner::new(memory, pattern, max_region_size).scan(|addr| found.push(addr));
    if found.is_empty() {
        warn!("No candidates found for pattern of {} bytes", pattern.len());
    }
    (found, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::mock::MockMemoryBuilder;
    use crate::memory::{RegionKind, RegionState, protection};
    use std::cell::Cell;

    fn buffer_with(marker: &[u8], at: usize, len: usize) -> Vec<u8> {
        let mut data = vec![0x11u8; len];
        data[at..at + marker.len()].copy_from_slice(marker);
        data
    }

    #[test]
    fn test_region_verdicts() {
        let base = MemoryRegion {
            base_address: 0,
            size: 0x1000,
            state: RegionState::Commit,
            protection: protection::READWRITE,
            kind: RegionKind::Private,
        };
        assert_eq!(region_verdict(&base, 0x1000), RegionVerdict::Scan);
        assert_eq!(region_verdict(&base, 0x800), RegionVerdict::SkipOversized);

        let readonly = MemoryRegion {
            protection: protection::READONLY,
            ..base
        };
        assert_eq!(region_verdict(&readonly, 0x1000), RegionVerdict::Ignore);

        let image = MemoryRegion {
            kind: RegionKind::Image,
            ..base
        };
        assert_eq!(region_verdict(&image, 0x1000), RegionVerdict::Ignore);
        // Oversized writable regions count as skipped whatever their kind.
        assert_eq!(region_verdict(&image, 0x800), RegionVerdict::SkipOversized);

        let reserved = MemoryRegion {
            state: RegionState::Reserve,
            ..base
        };
        assert_eq!(region_verdict(&reserved, 0x1000), RegionVerdict::Ignore);
    }

    #[test]
    fn test_finds_matches_in_writable_regions_only() {
        let marker = [0xDE, 0xAD, 0xBE, 0xEF];
        let memory = MockMemoryBuilder::new()
            .region(0x10000, buffer_with(&marker, 0x20, 0x100))
            .region_with(
                0x20000,
                buffer_with(&marker, 0x40, 0x100),
                RegionState::Commit,
                protection::READONLY,
                RegionKind::Private,
            )
            .region_with(
                0x30000,
                buffer_with(&marker, 0x10, 0x100),
                RegionState::Commit,
                protection::EXECUTE_READWRITE,
                RegionKind::Private,
            )
            .build();

        let pattern = BytePattern::compile("DE AD BE EF");
        let (found, stats) = collect_candidates(&memory, &pattern, 0x1000);

        assert_eq!(found, vec![0x10020, 0x30010]);
        assert_eq!(stats.regions_scanned, 2);
        assert!(memory.reads().iter().all(|(addr, _)| *addr != 0x20000));
    }

    #[test]
    fn test_oversized_regions_are_counted_not_read() {
        let memory = MockMemoryBuilder::new()
            .sized_region(0x10000, 0x10_0000, protection::READWRITE)
            .region(0x200000, vec![0u8; 0x100])
            .build();

        let pattern = BytePattern::compile("00 00");
        let (_, stats) = collect_candidates(&memory, &pattern, 0x1000);

        assert_eq!(stats.regions_skipped, 1);
        assert_eq!(stats.regions_scanned, 1);
        assert!(memory.reads().iter().all(|(addr, _)| *addr != 0x10000));
    }

    #[test]
    fn test_oversized_mapped_region_counts_as_skipped() {
        let memory = MockMemoryBuilder::new()
            .region_with(
                0x10000,
                vec![0u8; 0x2000],
                RegionState::Commit,
                protection::READWRITE,
                RegionKind::Mapped,
            )
            .region_with(
                0x20000,
                vec![0u8; 0x100],
                RegionState::Commit,
                protection::READWRITE,
                RegionKind::Mapped,
            )
            .build();

        let pattern = BytePattern::compile("00 00");
        let (found, stats) = collect_candidates(&memory, &pattern, 0x1000);

        assert_eq!(stats.regions_skipped, 1);
        assert_eq!(stats.regions_scanned, 0);
        assert!(found.is_empty());
        assert!(memory.reads().is_empty());
    }

    #[test]
    fn test_unreadable_region_is_skipped() {
        let marker = [0xCA, 0xFE];
        let memory = MockMemoryBuilder::new()
            .region(0x1000, buffer_with(&marker, 0, 0x100))
            .unreadable(0x1000)
            .region(0x4000, buffer_with(&marker, 8, 0x100))
            .build();

        let pattern = BytePattern::compile("CA FE");
        let (found, stats) = collect_candidates(&memory, &pattern, 0x1000);

        assert_eq!(found, vec![0x4008]);
        assert_eq!(stats.regions_failed, 1);
    }

    #[test]
    fn test_query_failure_advances_one_page() {
        let marker = [0xCA, 0xFE];
        let memory = MockMemoryBuilder::new()
            .query_failure(0)
            .region(0x1000, buffer_with(&marker, 4, 0x100))
            .build();

        let pattern = BytePattern::compile("CA FE");
        let (found, stats) = collect_candidates(&memory, &pattern, 0x1000);

        assert_eq!(stats.query_failures, 1);
        assert_eq!(found, vec![0x1004]);
    }

    #[test]
    fn test_cancel_stops_between_regions() {
        let memory = MockMemoryBuilder::new()
            .region(0x1000, vec![0xAA; 0x10])
            .region(0x2000, vec![0xAA; 0x10])
            .build();
        let pattern = BytePattern::compile("AA");
        let calls = Cell::new(0);

        let scanner = RegionScanner::new(&memory, &pattern, 0x1000).cancel_when(|| {
            calls.set(calls.get() + 1);
            calls.get() > 1
        });
        let mut found = Vec::new();
        let stats = scanner.scan(|addr| found.push(addr));

        // First region (a free gap at 0) is examined, then cancellation stops the walk.
        assert_eq!(stats.regions_scanned, 0);
        assert!(stats.cancelled);
        assert!(found.is_empty());
    }
}
