//! Versioned, typed, checksummed message envelopes
//!
//! Every message exchanged with external systems travels inside an
//! [`Envelope`]: a payload wrapped with metadata (version, packet type,
//! timestamp, source/destination, unique message id) and a SHA-256
//! checksum over the canonical serialization of the payload.
//!
//! Envelopes are immutable once checksummed; a correction is a new
//! envelope with a new message id, never an in-place edit.
//!
//! ## Checksum semantics
//!
//! A checksum mismatch on receipt is deliberately non-fatal: [`unwrap`]
//! proceeds and returns the payload together with a `checksum_ok` flag,
//! and logs a warning. Whether a stale checksum is fatal is the caller's
//! decision, not the codec's.
//!
//! [`unwrap`]: crate::envelope::unwrap

mod codec;
mod types;

pub use codec::{from_bytes, to_bytes, unwrap, validate, validate_value, wrap, UnwrappedPayload};
pub use types::{Envelope, EnvelopeMeta, PacketType, Payload, ENVELOPE_VERSION};
