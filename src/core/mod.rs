//! Shared primitives: errors, configuration, the read-only connection,
//! retry, output bounding and the step trace log.

pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod retry;
pub mod trace;
