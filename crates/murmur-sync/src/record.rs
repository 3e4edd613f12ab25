//! Sync records carried by simplex connections.
//!
//! One record per frame, encoded as CBOR. Byte payloads (batch ids, group ids,
//! messages) are CBOR byte strings rather than integer arrays, so a record's
//! encoded size tracks its payload size closely.

use std::{collections::BTreeMap, fmt};

use murmur_crypto::message_digest;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, SeqAccess, Visitor},
};

use crate::error::RecordError;

/// Length of batch and group identifiers
pub const ID_LENGTH: usize = 32;

macro_rules! byte_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; ID_LENGTH]);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                for byte in &self.0[..4] {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("..)")
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let ByteBuf(bytes) = ByteBuf::deserialize(deserializer)?;
                let id = bytes
                    .try_into()
                    .map_err(|b: Vec<u8>| de::Error::invalid_length(b.len(), &"32 bytes"))?;
                Ok(Self(id))
            }
        }
    };
}

byte_id!(
    /// Identifier of a message batch: a digest of its encoded record
    BatchId
);

byte_id!(
    /// Identifier of a group a contact may subscribe to
    GroupId
);

/// Transport properties the sender can be reached on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransportUpdate {
    /// Properties keyed by transport identifier
    pub transports: BTreeMap<String, BTreeMap<String, String>>,
    /// Monotonic version; receivers ignore anything not newer than what they hold
    pub version: u64,
}

/// Groups the sender wants to receive messages from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    /// Subscribed groups
    pub groups: Vec<GroupId>,
    /// Monotonic version
    pub version: u64,
}

/// Acknowledgement of received batches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ack {
    /// Batches received
    pub batch_ids: Vec<BatchId>,
}

/// Batch of raw messages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawBatch {
    /// Encoded messages, opaque at this layer
    #[serde(with = "byte_strings")]
    pub messages: Vec<Vec<u8>>,
}

/// One protocol record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRecord {
    /// Sender's transport properties
    TransportUpdate(TransportUpdate),
    /// Sender's group subscriptions
    SubscriptionUpdate(SubscriptionUpdate),
    /// Batches the sender received
    Ack(Ack),
    /// Messages for the receiver
    Batch(RawBatch),
}

impl SyncRecord {
    /// Encode to CBOR.
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out).map_err(|e| RecordError::Encode(e.to_string()))?;
        Ok(out)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        ciborium::de::from_reader(bytes).map_err(|e| RecordError::Decode(e.to_string()))
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> Result<usize, RecordError> {
        self.encode().map(|bytes| bytes.len())
    }

    /// Record kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransportUpdate(_) => "transport_update",
            Self::SubscriptionUpdate(_) => "subscription_update",
            Self::Ack(_) => "ack",
            Self::Batch(_) => "batch",
        }
    }
}

impl RawBatch {
    /// Identifier acknowledging this batch: the first 32 bytes of the double
    /// SHA-384 digest of the encoded record.
    pub fn id(&self) -> Result<BatchId, RecordError> {
        let encoded = SyncRecord::Batch(self.clone()).encode()?;
        let digest = message_digest(&encoded);
        let mut id = [0u8; ID_LENGTH];
        id.copy_from_slice(&digest[..ID_LENGTH]);
        Ok(BatchId(id))
    }
}

/// Owned byte string that accepts CBOR byte strings or integer arrays.
struct ByteBuf(Vec<u8>);

impl<'de> Deserialize<'de> for ByteBuf {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteBufVisitor;

        impl<'de> Visitor<'de> for ByteBufVisitor {
            type Value = ByteBuf;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<ByteBuf, E> {
                Ok(ByteBuf(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<ByteBuf, E> {
                Ok(ByteBuf(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ByteBuf, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                Ok(ByteBuf(bytes))
            }
        }

        deserializer.deserialize_byte_buf(ByteBufVisitor)
    }
}

mod byte_strings {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::ByteBuf;

    struct ByteStr<'a>(&'a [u8]);

    impl Serialize for ByteStr<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_bytes(self.0)
        }
    }

    pub(super) fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(items.iter().map(|item| ByteStr(item)))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let items = Vec::<ByteBuf>::deserialize(deserializer)?;
        Ok(items.into_iter().map(|ByteBuf(bytes)| bytes).collect())
    }
}
