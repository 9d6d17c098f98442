use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{GossipError, Result};

/// Fixed prefix of an encoded action: type byte plus 64-bit timestamp.
pub(crate) const ACTION_HEADER_SIZE: usize = 9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ActionType {
    #[default]
    Unknown = 0,
    Set = 1,
    Delete = 2,
}

impl ActionType {
    fn from_u8(raw: u8) -> ActionType {
        match raw {
            1 => ActionType::Set,
            2 => ActionType::Delete,
            _ => ActionType::Unknown,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Set => write!(f, "set"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single gossipped mutation.
///
/// Wire layout: `[typ: 1][time: u64 LE][key][NUL][value...]`. The value
/// carries no length prefix; it runs to the end of the frame, so an action
/// always occupies a frame of its own. The little-endian timestamp is part
/// of the wire contract; state-transfer entries use big-endian instead
/// (see [`Entry`](crate::entry::Entry)), and both layouts must be
/// preserved to interoperate with existing peers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Action {
    pub typ: ActionType,
    /// Originator timestamp, epoch millis, truncated to milliseconds.
    pub time_ms: i64,
    pub key: String,
    pub value: Bytes,
}

impl Action {
    pub fn set(key: impl Into<String>, value: Bytes, time_ms: i64) -> Action {
        Action {
            typ: ActionType::Set,
            time_ms,
            key: key.into(),
            value,
        }
    }

    pub fn delete(key: impl Into<String>, time_ms: i64) -> Action {
        Action {
            typ: ActionType::Delete,
            time_ms,
            key: key.into(),
            value: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(ACTION_HEADER_SIZE + self.key.len() + 1 + self.value.len());
        buf.put_u8(self.typ as u8);
        buf.put_u64_le(self.time_ms as u64);
        buf.put_slice(self.key.as_bytes());
        buf.put_u8(0);
        buf.put_slice(&self.value);
        buf.freeze()
    }

    /// Decodes an action frame. An empty buffer decodes to an empty
    /// `Unknown` action; anything shorter than the fixed header, or a key
    /// without its NUL terminator, is a malformed frame.
    pub fn decode(buf: &[u8]) -> Result<Action> {
        if buf.is_empty() {
            return Ok(Action::default());
        }
        if buf.len() < ACTION_HEADER_SIZE {
            return Err(GossipError::MalformedFrame("action header truncated"));
        }
        let typ = ActionType::from_u8(buf[0]);
        let time_ms = u64::from_le_bytes(buf[1..9].try_into().unwrap()) as i64;
        let rest = &buf[ACTION_HEADER_SIZE..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(GossipError::MalformedFrame("unterminated action key"))?;
        let key = std::str::from_utf8(&rest[..nul])
            .map_err(|_| GossipError::MalformedFrame("action key is not UTF-8"))?
            .to_owned();
        let value = Bytes::copy_from_slice(&rest[nul + 1..]);
        Ok(Action {
            typ,
            time_ms,
            key,
            value,
        })
    }
}
