//! Live address discovery: region scan, extent validation and selection.

pub mod scanner;
pub mod select;
pub mod session;
pub mod validate;

pub use scanner::{RegionScanner, RegionVerdict, ScanStats, collect_candidates, region_verdict};
pub use select::select_address;
pub use session::{ScanOutcome, ScanSession, ScannerExit, ScannerWorker};
pub use validate::{CandidateValidator, ValidatedAddress};
