//! Virtual memory region model.
//!
//! Values mirror the Win32 `MEMORY_BASIC_INFORMATION` fields so the Windows
//! backend can pass them through unchanged and mocks can describe any layout.

use crate::error::Result;

/// Page protection constants (`PAGE_*`).
pub mod protection {
    pub const NOACCESS: u32 = 0x01;
    pub const READONLY: u32 = 0x02;
    pub const READWRITE: u32 = 0x04;
    pub const WRITECOPY: u32 = 0x08;
    pub const EXECUTE: u32 = 0x10;
    pub const EXECUTE_READ: u32 = 0x20;
    pub const EXECUTE_READWRITE: u32 = 0x40;
    pub const GUARD: u32 = 0x100;
}

/// Allocation state of a region (`MEM_COMMIT` etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    Commit,
    Reserve,
    Free,
    Other(u32),
}

impl RegionState {
    pub const COMMIT: u32 = 0x1000;
    pub const RESERVE: u32 = 0x2000;
    pub const FREE: u32 = 0x10000;

    pub fn from_raw(value: u32) -> Self {
        match value {
            Self::COMMIT => Self::Commit,
            Self::RESERVE => Self::Reserve,
            Self::FREE => Self::Free,
            other => Self::Other(other),
        }
    }
}

/// Backing type of a region (`MEM_PRIVATE` etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Private,
    Mapped,
    Image,
    Other(u32),
}

impl RegionKind {
    pub const PRIVATE: u32 = 0x20000;
    pub const MAPPED: u32 = 0x40000;
    pub const IMAGE: u32 = 0x1000000;

    pub fn from_raw(value: u32) -> Self {
        match value {
            Self::PRIVATE => Self::Private,
            Self::MAPPED => Self::Mapped,
            Self::IMAGE => Self::Image,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base_address: u64,
    pub size: u64,
    pub state: RegionState,
    pub protection: u32,
    pub kind: RegionKind,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.base_address.saturating_add(self.size)
    }

    pub fn is_committed(&self) -> bool {
        self.state == RegionState::Commit
    }

    pub fn is_private(&self) -> bool {
        self.kind == RegionKind::Private
    }

    /// Plain read-write or execute-read-write, with no modifier bits.
    pub fn is_writable(&self) -> bool {
        matches!(
            self.protection,
            protection::READWRITE | protection::EXECUTE_READWRITE
        )
    }
}

/// Enumerates the address space of a target process.
pub trait QueryRegions {
    /// Describe the region containing `address`.
    ///
    /// `Ok(None)` means the end of the enumerable address space was reached.
    fn query_region(&self, address: u64) -> Result<Option<MemoryRegion>>;

    /// Upper bound of the user address space.
    fn max_address(&self) -> u64;
}

impl<T: QueryRegions + ?Sized> QueryRegions for &T {
    fn query_region(&self, address: u64) -> Result<Option<MemoryRegion>> {
        (**self).query_region(address)
    }

    fn max_address(&self) -> u64 {
        (**self).max_address()
    }
}

/// Highest user-mode address for a 64-bit target.
pub const MAX_ADDRESS_64: u64 = 0x7FFF_FFFF_FFFF;
/// Highest user-mode address for a 32-bit target.
pub const MAX_ADDRESS_32: u64 = 0xFFFF_FFFF;
