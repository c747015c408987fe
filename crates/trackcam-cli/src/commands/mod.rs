//! CLI command implementations.

pub mod check;
pub mod patterns;
pub mod run;
pub mod scan;
pub mod write;
