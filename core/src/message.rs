//! Generic Message type for SILTA
//!
//! The Message is the universal envelope exchanged through bridge
//! adapters. It is protocol-agnostic and uses `Bytes` for zero-copy
//! payload handling: cloning a message only bumps a refcount on the
//! content, so fan-out to several adapters never copies the payload.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique message identifier (ULID, lexicographically sortable by time)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(ulid::Ulid);

impl MessageId {
    /// Generate a new unique ID
    #[inline]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Parse an ID from its string form
    pub fn from_string(s: &str) -> Option<Self> {
        ulid::Ulid::from_string(s).ok().map(Self)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The universal bridge envelope
///
/// Mirrors the wire format (`BridgeMessage`) but keeps the payload as
/// [`Bytes`] and the id as a typed [`MessageId`]. The bridge converts
/// to and from the proto representation at the gRPC boundary.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique message identifier
    pub id: MessageId,
    /// Application-level message type, e.g. `"invoice.created"`
    pub message_type: String,
    /// Opaque payload (zero-copy)
    pub content: Bytes,
    /// Free-form string metadata
    pub metadata: HashMap<String, String>,
    /// Creation time, epoch milliseconds
    pub timestamp_ms: i64,
}

impl Message {
    /// Create a message with a fresh id and current timestamp
    pub fn new(message_type: impl Into<String>, content: Bytes) -> Self {
        Self {
            id: MessageId::new(),
            message_type: message_type.into(),
            content,
            metadata: HashMap::new(),
            timestamp_ms: epoch_millis(),
        }
    }

    /// Attach a metadata entry, builder style
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Current time as epoch milliseconds
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
