//! Editor-facing wire layer.
//!
//! - `codec`: six-hex-digit length-prefixed framing.
//! - `sexp`: S-expression values, reader, and printer.
//! - `message`: typed inbound messages and outbound responses.
//! - `writer`: outbound response queue and the socket writer task.

pub mod codec;
pub mod message;
pub mod sexp;
pub mod writer;
