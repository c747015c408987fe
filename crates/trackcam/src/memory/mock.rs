//! In-memory process backend for tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::memory::{
    MAX_ADDRESS_64, MemoryRegion, QueryRegions, ReadMemory, RegionKind, RegionState,
    TargetProcess, WriteMemory, protection,
};

#[derive(Debug, Clone)]
struct MockRegion {
    region: MemoryRegion,
    data: Vec<u8>,
}

/// Builder for [`MockMemory`].
#[derive(Debug, Default)]
pub struct MockMemoryBuilder {
    pid: u32,
    regions: Vec<MockRegion>,
    unreadable: HashSet<u64>,
    unwritable: HashSet<u64>,
    query_failures: HashSet<u64>,
}

impl MockMemoryBuilder {
    pub fn new() -> Self {
        Self {
            pid: 4242,
            ..Default::default()
        }
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Committed private read-write region.
    pub fn region(self, base: u64, data: Vec<u8>) -> Self {
        self.region_with(base, data, RegionState::Commit, protection::READWRITE, RegionKind::Private)
    }

    pub fn region_with(
        mut self,
        base: u64,
        data: Vec<u8>,
        state: RegionState,
        protection: u32,
        kind: RegionKind,
    ) -> Self {
        let region = MemoryRegion {
            base_address: base,
            size: data.len() as u64,
            state,
            protection,
            kind,
        };
        self.regions.push(MockRegion { region, data });
        self
    }

    /// Region whose advertised size differs from the data backing it.
    pub fn sized_region(mut self, base: u64, size: u64, protection: u32) -> Self {
        let region = MemoryRegion {
            base_address: base,
            size,
            state: RegionState::Commit,
            protection,
            kind: RegionKind::Private,
        };
        self.regions.push(MockRegion {
            region,
            data: Vec::new(),
        });
        self
    }

    /// Reads starting inside the region at `base` fail.
    pub fn unreadable(mut self, base: u64) -> Self {
        self.unreadable.insert(base);
        self
    }

    /// Writes touching this exact address fail.
    pub fn unwritable(mut self, address: u64) -> Self {
        self.unwritable.insert(address);
        self
    }

    /// Querying this exact address fails.
    pub fn query_failure(mut self, address: u64) -> Self {
        self.query_failures.insert(address);
        self
    }

    pub fn build(mut self) -> MockMemory {
        self.regions
            .sort_by_key(|r| r.region.base_address);
        MockMemory {
            pid: self.pid,
            alive: AtomicBool::new(true),
            regions: Mutex::new(self.regions),
            unreadable: self.unreadable,
            unwritable: Mutex::new(self.unwritable),
            query_failures: self.query_failures,
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        }
    }
}

/// Fake process address space with scripted failures and a write log.
#[derive(Debug)]
pub struct MockMemory {
    pid: u32,
    alive: AtomicBool,
    regions: Mutex<Vec<MockRegion>>,
    unreadable: HashSet<u64>,
    unwritable: Mutex<HashSet<u64>>,
    query_failures: HashSet<u64>,
    reads: Mutex<Vec<(u64, usize)>>,
    writes: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl MockMemory {
    /// Simulate the target process exiting.
    pub fn terminate(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<(u64, Vec<u8>)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Addresses and sizes of every read attempt.
    pub fn reads(&self) -> Vec<(u64, usize)> {
        self.reads.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Make later writes to `address` fail.
    pub fn fail_writes_at(&self, address: u64) {
        if let Ok(mut set) = self.unwritable.lock() {
            set.insert(address);
        }
    }

    /// Last f32 written at `address`, if any.
    pub fn last_f32_at(&self, address: u64) -> Option<f32> {
        self.writes()
            .into_iter()
            .rev()
            .find(|(a, bytes)| *a == address && bytes.len() == 4)
            .and_then(|(_, bytes)| bytes.try_into().ok().map(f32::from_le_bytes))
    }

    pub fn write_count_at(&self, address: u64) -> usize {
        self.writes().iter().filter(|(a, _)| *a == address).count()
    }
}

impl ReadMemory for MockMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        if let Ok(mut reads) = self.reads.lock() {
            reads.push((address, size));
        }
        let regions = self.regions.lock().map_err(|_| Error::MemoryReadFailed {
            address,
            message: "mock poisoned".to_string(),
        })?;

        for r in regions.iter() {
            let base = r.region.base_address;
            let data_end = base + r.data.len() as u64;
            if address >= base && address < r.region.end() {
                if self.unreadable.contains(&base) {
                    return Err(Error::MemoryReadFailed {
                        address,
                        message: "access denied".to_string(),
                    });
                }
                let end = address + size as u64;
                if end > data_end {
                    return Err(Error::MemoryReadFailed {
                        address,
                        message: "read past end of region".to_string(),
                    });
                }
                let start = (address - base) as usize;
                return Ok(r.data[start..start + size].to_vec());
            }
        }

        Err(Error::MemoryReadFailed {
            address,
            message: "unmapped".to_string(),
        })
    }
}

impl WriteMemory for MockMemory {
    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let blocked = self
            .unwritable
            .lock()
            .map(|set| set.contains(&address))
            .unwrap_or(true);
        if blocked {
            return Err(Error::MemoryWriteFailed {
                address,
                message: "access violation".to_string(),
            });
        }

        let mut regions = self.regions.lock().map_err(|_| Error::MemoryWriteFailed {
            address,
            message: "mock poisoned".to_string(),
        })?;
        let end = address + bytes.len() as u64;
        let target = regions.iter_mut().find(|r| {
            address >= r.region.base_address
                && end <= r.region.base_address + r.data.len() as u64
        });
        let Some(target) = target else {
            return Err(Error::MemoryWriteFailed {
                address,
                message: "unmapped".to_string(),
            });
        };

        let start = (address - target.region.base_address) as usize;
        target.data[start..start + bytes.len()].copy_from_slice(bytes);
        drop(regions);

        if let Ok(mut writes) = self.writes.lock() {
            writes.push((address, bytes.to_vec()));
        }
        Ok(())
    }
}

impl TargetProcess for MockMemory {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl QueryRegions for MockMemory {
    fn query_region(&self, address: u64) -> Result<Option<MemoryRegion>> {
        if self.query_failures.contains(&address) {
            return Err(Error::RegionQueryFailed {
                address,
                message: "scripted failure".to_string(),
            });
        }
        if address >= self.max_address() {
            return Ok(None);
        }

        let regions = self.regions.lock().map_err(|_| Error::RegionQueryFailed {
            address,
            message: "mock poisoned".to_string(),
        })?;

        if let Some(r) = regions
            .iter()
            .find(|r| address >= r.region.base_address && address < r.region.end())
        {
            return Ok(Some(r.region));
        }

        // Gap: report a free region up to the next mapped base (or the end).
        let next = regions
            .iter()
            .map(|r| r.region.base_address)
            .filter(|&b| b > address)
            .min();
        match next {
            Some(next) => Ok(Some(MemoryRegion {
                base_address: address,
                size: next - address,
                state: RegionState::Free,
                protection: protection::NOACCESS,
                kind: RegionKind::Other(0),
            })),
            None => Ok(None),
        }
    }

    fn max_address(&self) -> u64 {
        MAX_ADDRESS_64
    }
}
