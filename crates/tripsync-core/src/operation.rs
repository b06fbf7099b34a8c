//! Edit operations and trip identifiers

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Trip identifier - UTF-8 string, max 512 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripId(String);

impl TripId {
    /// Create a new trip ID, validating the format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidTripId("Trip ID cannot be empty".into()));
        }

        if id.len() > 512 {
            return Err(Error::InvalidTripId("Trip ID exceeds 512 bytes".into()));
        }

        // Validate pattern: [a-zA-Z0-9:_-]+
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-')
        {
            return Err(Error::InvalidTripId(
                "Trip ID must match pattern [a-zA-Z0-9:_-]+".into(),
            ));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TripId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current wall-clock time in milliseconds since the epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// What an operation does to the document text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Insert `content` at the operation position
    Insert { content: String },
    /// Remove `length` characters starting at the position
    Delete { length: usize },
    /// Skip `length` characters; a zero-length retain is a no-op
    Retain { length: usize },
}

/// An atomic edit against a trip document
///
/// Positions are character indices, not byte offsets. `seq` is the
/// author's per-session sequence number and must be strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireOperation", into = "WireOperation")]
pub struct Operation {
    pub kind: OpKind,
    pub position: usize,
    pub author: String,
    pub seq: u64,
    pub timestamp: u64,
}

impl Operation {
    pub fn insert(
        position: usize,
        content: impl Into<String>,
        author: impl Into<String>,
        seq: u64,
    ) -> Self {
        Self {
            kind: OpKind::Insert {
                content: content.into(),
            },
            position,
            author: author.into(),
            seq,
            timestamp: now_millis(),
        }
    }

    pub fn delete(position: usize, length: usize, author: impl Into<String>, seq: u64) -> Self {
        Self {
            kind: OpKind::Delete { length },
            position,
            author: author.into(),
            seq,
            timestamp: now_millis(),
        }
    }

    pub fn retain(position: usize, length: usize, author: impl Into<String>, seq: u64) -> Self {
        Self {
            kind: OpKind::Retain { length },
            position,
            author: author.into(),
            seq,
            timestamp: now_millis(),
        }
    }

    /// Number of characters this operation affects
    pub fn len(&self) -> usize {
        match &self.kind {
            OpKind::Insert { content } => content.chars().count(),
            OpKind::Delete { length } | OpKind::Retain { length } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exclusive end of the affected range; saturates rather than wrap on
    /// adversarial wire-supplied operands
    pub fn end(&self) -> usize {
        self.position.saturating_add(self.len())
    }

    /// True when this operation no longer changes the document
    pub fn is_noop(&self) -> bool {
        matches!(self.kind, OpKind::Retain { .. })
    }

    /// Turn this operation into a zero-length retain, preserving attribution
    pub fn into_noop(mut self) -> Self {
        self.kind = OpKind::Retain { length: 0 };
        self.position = 0;
        self
    }

    /// Apply this operation to document text
    pub fn apply(&self, text: &mut String) -> Result<()> {
        match &self.kind {
            OpKind::Insert { content } => {
                let at = byte_offset(text, self.position).ok_or_else(|| Error::OutOfBounds {
                    position: self.position,
                    len: text.chars().count(),
                })?;
                text.insert_str(at, content);
            }
            OpKind::Delete { length } => {
                let char_len = text.chars().count();
                let end_pos = self
                    .position
                    .checked_add(*length)
                    .ok_or(Error::OutOfBounds {
                        position: usize::MAX,
                        len: char_len,
                    })?;
                if end_pos > char_len {
                    return Err(Error::OutOfBounds {
                        position: end_pos,
                        len: char_len,
                    });
                }
                let start = byte_offset(text, self.position).unwrap_or(text.len());
                let end = byte_offset(text, end_pos).unwrap_or(text.len());
                text.replace_range(start..end, "");
            }
            OpKind::Retain { .. } => {}
        }
        Ok(())
    }
}

/// Byte offset of the `chars`-th character, or `None` past the end
fn byte_offset(text: &str, chars: usize) -> Option<usize> {
    let mut seen = 0;
    for (i, _) in text.char_indices() {
        if seen == chars {
            return Some(i);
        }
        seen += 1;
    }
    (seen == chars).then_some(text.len())
}

/// Flat wire shape: `{operation, position, content?, length?, author, seq, timestamp}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOperation {
    operation: WireKind,
    position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<usize>,
    author: String,
    seq: u64,
    timestamp: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum WireKind {
    Insert,
    Delete,
    Retain,
}

impl TryFrom<WireOperation> for Operation {
    type Error = Error;

    fn try_from(wire: WireOperation) -> Result<Self> {
        let kind = match wire.operation {
            WireKind::Insert => {
                let content = wire
                    .content
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| Error::InvalidOperation("insert requires content".into()))?;
                OpKind::Insert { content }
            }
            WireKind::Delete => {
                let length = wire
                    .length
                    .filter(|l| *l >= 1)
                    .ok_or_else(|| Error::InvalidOperation("delete requires length >= 1".into()))?;
                OpKind::Delete { length }
            }
            WireKind::Retain => {
                let length = wire
                    .length
                    .filter(|l| *l >= 1)
                    .ok_or_else(|| Error::InvalidOperation("retain requires length >= 1".into()))?;
                OpKind::Retain { length }
            }
        };

        if wire.author.is_empty() {
            return Err(Error::InvalidOperation("author cannot be empty".into()));
        }

        Ok(Operation {
            kind,
            position: wire.position,
            author: wire.author,
            seq: wire.seq,
            timestamp: wire.timestamp,
        })
    }
}

impl From<Operation> for WireOperation {
    fn from(op: Operation) -> Self {
        let (operation, content, length) = match op.kind {
            OpKind::Insert { content } => (WireKind::Insert, Some(content), None),
            OpKind::Delete { length } => (WireKind::Delete, None, Some(length)),
            OpKind::Retain { length } => (WireKind::Retain, None, Some(length)),
        };
        WireOperation {
            operation,
            position: op.position,
            content,
            length,
            author: op.author,
            seq: op.seq,
            timestamp: op.timestamp,
        }
    }
}
