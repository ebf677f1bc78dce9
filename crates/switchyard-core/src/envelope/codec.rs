//! Wrap, unwrap, and validate envelopes

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::types::{Envelope, EnvelopeMeta, PacketType, Payload, ENVELOPE_VERSION};

/// Payload returned by [`unwrap`], carrying the checksum verdict
#[derive(Debug, Clone, PartialEq)]
pub struct UnwrappedPayload {
    /// The payload data
    pub data: serde_json::Value,
    /// Whether the envelope checksum matched the payload. A mismatch is
    /// a warning, not a rejection; the caller decides what to do with it.
    pub checksum_ok: bool,
}

/// Compute the checksum of a payload: SHA-256 hex digest over the
/// canonical JSON serialization of the payload wrapper.
fn payload_checksum(payload: &Payload) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Wrap a payload in a structurally valid envelope.
///
/// Generates a fresh message id, stamps the current time, and computes
/// the payload checksum.
pub fn wrap(
    data: serde_json::Value,
    packet_type: PacketType,
    source: &str,
    destination: &str,
) -> Result<Envelope> {
    let payload = Payload { data };
    let checksum = payload_checksum(&payload)?;

    Ok(Envelope {
        meta: EnvelopeMeta {
            version: ENVELOPE_VERSION.to_string(),
            packet_type,
            timestamp: Utc::now(),
            source: source.to_string(),
            destination: destination.to_string(),
            message_id: Uuid::new_v4().to_string(),
            checksum,
        },
        payload,
    })
}

/// Unwrap an envelope, returning its payload and the checksum verdict.
///
/// Fails with [`Error::Format`] on structural problems (missing meta
/// fields or payload). A checksum mismatch does not fail: it is logged
/// and surfaced via [`UnwrappedPayload::checksum_ok`].
pub fn unwrap(envelope: &Envelope) -> Result<UnwrappedPayload> {
    check_structure(envelope)?;

    let expected = payload_checksum(&envelope.payload)?;
    let checksum_ok = expected == envelope.meta.checksum;
    if !checksum_ok {
        warn!(
            message_id = %envelope.meta.message_id,
            packet_type = %envelope.meta.packet_type,
            "envelope checksum mismatch"
        );
    }

    Ok(UnwrappedPayload {
        data: envelope.payload.data.clone(),
        checksum_ok,
    })
}

/// Structural validation as a boolean gate, for callers that prefer not
/// to handle an error. Checksum state does not affect the result.
pub fn validate(envelope: &Envelope) -> bool {
    check_structure(envelope).is_ok()
}

/// Structural validation of a raw JSON value before typed decoding.
///
/// Used on receipt of untrusted bytes, where the packet type may be
/// outside the enumerated set.
pub fn validate_value(value: &serde_json::Value) -> bool {
    check_value(value).is_ok()
}

fn check_structure(envelope: &Envelope) -> Result<()> {
    let meta = &envelope.meta;
    if meta.version.is_empty() {
        return Err(Error::Format("missing envelope version".into()));
    }
    if meta.message_id.is_empty() {
        return Err(Error::Format("missing message id".into()));
    }
    if meta.source.is_empty() || meta.destination.is_empty() {
        return Err(Error::Format("missing source or destination".into()));
    }
    if meta.checksum.is_empty() {
        return Err(Error::Format("missing checksum".into()));
    }
    Ok(())
}

fn check_value(value: &serde_json::Value) -> Result<()> {
    let meta = value
        .get("meta")
        .ok_or_else(|| Error::Format("missing meta".into()))?;

    for field in [
        "version",
        "packet_type",
        "timestamp",
        "source",
        "destination",
        "message_id",
        "checksum",
    ] {
        if meta.get(field).is_none() {
            return Err(Error::Format(format!("missing meta field '{}'", field)));
        }
    }

    let packet_type = meta
        .get("packet_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Format("packet_type is not a string".into()))?;
    packet_type.parse::<PacketType>()?;

    value
        .get("payload")
        .and_then(|p| p.get("data"))
        .ok_or_else(|| Error::Format("missing payload data".into()))?;

    Ok(())
}

/// Serialize an envelope to its JSON byte representation
pub fn to_bytes(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode an envelope from bytes, validating structure first.
///
/// `from_bytes(to_bytes(e)) == e` for any valid envelope `e`.
pub fn from_bytes(bytes: &[u8]) -> Result<Envelope> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| Error::Format(e.to_string()))?;
    check_value(&value)?;
    serde_json::from_value(value).map_err(|e| Error::Format(e.to_string()))
}
