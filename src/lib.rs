//! Rockfall Monitor - Edge Node
//!
//! Samples slope sensors, scores rockfall risk, buffers everything in a
//! local SQLite queue and syncs with the central server when it can.

pub mod constants;
pub mod logic;
