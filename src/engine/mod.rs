//! Session engine: evaluation gate, debugger levels, output relay.
//!
//! - `gate`: FIFO mutual exclusion around interpreter evaluations.
//! - `debugger`: nested debugger levels and restart resolution.
//! - `relay`: forwarding of incidental interpreter output.
//! - `session`: per-connection state tying the above together.

pub mod debugger;
pub mod gate;
pub mod relay;
pub mod session;
