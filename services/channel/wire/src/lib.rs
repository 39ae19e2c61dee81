//! Envelope encoding/decoding for the broker control channel.
//!
//! This crate provides the wire-level message shapes exchanged with a
//! settlement broker over its persistent control channel: signed request
//! envelopes, success/error response envelopes, and the well-known method
//! names.
//!
//! ## Wire Format
//!
//! ```text
//! request:  {"req": [id, method, params, timestamp], "sig": ["0x..", ..]}
//! success:  {"res": [id, method, result, timestamp], "sig": ["0x..", ..]}
//! error:    {"err": [id, code,   message, timestamp]}
//! ```
//!
//! Timestamps are milliseconds since the Unix epoch. A success envelope
//! whose method is literally `"error"` is decoded as an error envelope;
//! callers never have to distinguish the two failure shapes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod error;

// Re-export main types
pub use envelope::{method, now_millis, Envelope, Request, CODE_UNSPECIFIED, METHOD_ERROR};
pub use error::WireError;
