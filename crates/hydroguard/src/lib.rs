//! hydroguard - flood alert daemon.
//!
//! Wires the `hydro-alerts` core to concrete notification channels and to a
//! stream of water level readings.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channels;
pub mod runner;

pub use channels::{build_channel, build_registry};
pub use runner::{RunSummary, build_manager, parse_reading, run_readings, spawn_line_reader, spawn_probe};
