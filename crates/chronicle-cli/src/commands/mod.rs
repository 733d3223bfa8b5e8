//! CLI command implementations for Chronicle.

pub mod check;
pub mod replay;
