//! The wire envelope and its channel / message-type tags.

use crate::P2pError;
use serde::{Deserialize, Serialize};

/// Channel an envelope is dispatched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Consensus state machine traffic.
    ConsensusState = 1,
    /// Intra-shard transaction import.
    Mempool = 2,
    /// Cross-shard transaction import.
    CrossShardMempool = 3,
}

impl TryFrom<u8> for ChannelId {
    type Error = P2pError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChannelId::ConsensusState),
            2 => Ok(ChannelId::Mempool),
            3 => Ok(ChannelId::CrossShardMempool),
            other => Err(P2pError::UnknownChannel(other)),
        }
    }
}

/// Discriminator for the payload carried inside an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A block part.
    Part = 1,
    /// A signed part-set proposal.
    Proposal = 2,
    /// A cross-shard message.
    CrossShardMessage = 3,
    /// A consensus vote.
    Vote = 4,
    /// A bank insert transaction.
    TxInsert = 5,
    /// A bank transfer transaction.
    TxTransfer = 6,
}

impl TryFrom<u32> for MessageType {
    type Error = P2pError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Part),
            2 => Ok(MessageType::Proposal),
            3 => Ok(MessageType::CrossShardMessage),
            4 => Ok(MessageType::Vote),
            5 => Ok(MessageType::TxInsert),
            6 => Ok(MessageType::TxTransfer),
            other => Err(P2pError::UnknownMessageType(other)),
        }
    }
}

/// One JSON line on the TCP stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Dispatch channel.
    #[serde(rename = "Channel_id")]
    pub channel_id: u8,

    /// Base64-encoded payload bytes.
    #[serde(rename = "Message", with = "b64")]
    pub message: Vec<u8>,

    /// Payload discriminator.
    #[serde(rename = "MessageType")]
    pub message_type: u32,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(channel: ChannelId, message: Vec<u8>, message_type: MessageType) -> Self {
        Self {
            channel_id: channel as u8,
            message,
            message_type: message_type as u32,
        }
    }

    /// Encode as one newline-terminated JSON line.
    pub fn encode_line(&self) -> Vec<u8> {
        let mut line =
            serde_json::to_vec(self).expect("envelope serialization should never fail");
        line.push(b'\n');
        line
    }

    /// Decode from one JSON line (without the trailing newline).
    pub fn decode_line(line: &[u8]) -> Result<Self, P2pError> {
        serde_json::from_slice(line).map_err(|e| P2pError::Envelope(e.to_string()))
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_line_roundtrip() {
        let envelope = Envelope::new(
            ChannelId::ConsensusState,
            vec![0, 1, 2, 0xff],
            MessageType::Vote,
        );
        let line = envelope.encode_line();
        assert_eq!(*line.last().unwrap(), b'\n');

        let decoded = Envelope::decode_line(&line[..line.len() - 1]).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_envelope_field_names() {
        let envelope = Envelope::new(ChannelId::Mempool, b"x".to_vec(), MessageType::TxTransfer);
        let json = String::from_utf8(serde_json::to_vec(&envelope).unwrap()).unwrap();

        assert!(json.contains("\"Channel_id\":2"));
        assert!(json.contains("\"MessageType\":6"));
        assert!(json.contains("\"Message\":\"eA==\""));
    }

    #[test]
    fn test_unknown_tags_rejected() {
        assert!(ChannelId::try_from(9).is_err());
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(7).is_err());
    }
}
