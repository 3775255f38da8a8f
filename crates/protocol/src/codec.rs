//! Decoding of broker deliveries.
//!
//! A corrupt or unknown message is a `CodecError`; the consumer logs it and
//! drops the delivery (redelivering garbage forever helps nobody).

use thiserror::Error;

use crate::messages::{ChoreMessage, InboundMessage, OutboundMessage};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message body is not valid UTF-8 JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decodes a delivery from the protocol queue.
pub fn parse_inbound(body: &[u8]) -> Result<InboundMessage, CodecError> {
    Ok(serde_json::from_slice(body)?)
}

/// Decodes a delivery from the chores queue.
pub fn parse_chore(body: &[u8]) -> Result<ChoreMessage, CodecError> {
    Ok(serde_json::from_slice(body)?)
}

/// Encodes an outgoing message into its outbox payload.
pub fn to_payload(message: &OutboundMessage) -> serde_json::Value {
    // Serialization of a plain data struct cannot fail.
    serde_json::to_value(message).unwrap_or(serde_json::Value::Null)
}

/// Encodes a chore into its outbox payload.
pub fn chore_to_payload(message: &ChoreMessage) -> serde_json::Value {
    serde_json::to_value(message).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_types_are_codec_errors() {
        let body = br#"{"type": "FrobnicateAccount", "debtor_id": 1}"#;
        assert!(parse_inbound(body).is_err());
    }

    #[test]
    fn missing_type_field_is_a_codec_error() {
        let body = br#"{"debtor_id": 1, "creditor_id": 2}"#;
        assert!(parse_inbound(body).is_err());
    }

    #[test]
    fn non_utf8_bodies_are_codec_errors() {
        assert!(parse_inbound(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn chores_parse_from_their_own_queue() {
        let body = br#"{"type": "CapitalizeInterest", "debtor_id": 1, "creditor_id": 2}"#;
        let msg = parse_chore(body).unwrap();
        assert_eq!(msg.account(), (1, 2));
        assert_eq!(msg.type_name(), "CapitalizeInterest");
    }
}
