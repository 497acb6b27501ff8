//! Database operations, grouped by table.

pub mod connectors;
pub mod leases;
pub mod runs;
pub mod stats;
pub mod sync_state;
pub mod vectors;
