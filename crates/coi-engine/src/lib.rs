//! Certificate of insurance (COI) tracking for managed buildings.
//!
//! The [`compliance`] module holds the engine: requirement resolution, coverage
//! evaluation, the COI lifecycle, and the expiry reminder scheduler. The
//! remaining modules carry the ambient configuration, telemetry, and error
//! plumbing shared with the service binary.

pub mod compliance;
pub mod config;
pub mod error;
pub mod telemetry;
