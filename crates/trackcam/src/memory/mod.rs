mod process;
mod reader;
mod region;

#[doc(hidden)]
pub mod mock;

pub use process::*;
pub use reader::{ReadMemory, WriteMemory};
pub use region::{
    MAX_ADDRESS_32, MAX_ADDRESS_64, MemoryRegion, QueryRegions, RegionKind, RegionState, protection,
};
