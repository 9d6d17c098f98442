use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{GossipError, Result};

/// A key-value cell as carried in push/pull state transfer.
///
/// Wire layout: `[key][NUL][time: u64 BE][len: u64 BE][value: len]`.
/// Entries are length-prefixed so several of them concatenate into a
/// single state frame. Note the big-endian fields, unlike
/// [`Action`](crate::action::Action); both encodings are historical and
/// byte-for-byte normative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub key: String,
    pub time_ms: i64,
    pub value: Bytes,
}

impl Entry {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.key.len() + 17 + self.value.len());
        buf.put_slice(self.key.as_bytes());
        buf.put_u8(0);
        buf.put_u64(self.time_ms as u64);
        buf.put_u64(self.value.len() as u64);
        buf.put_slice(&self.value);
        buf.freeze()
    }

    /// Decodes one entry from the front of `buf`, returning it together
    /// with the number of bytes consumed so callers can walk concatenated
    /// entries. An empty buffer yields `(default, 0)`; any truncated field
    /// is a malformed frame.
    pub fn decode(buf: &[u8]) -> Result<(Entry, usize)> {
        if buf.is_empty() {
            return Ok((Entry::default(), 0));
        }
        let nul = buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(GossipError::MalformedFrame("unterminated entry key"))?;
        let key = std::str::from_utf8(&buf[..nul])
            .map_err(|_| GossipError::MalformedFrame("entry key is not UTF-8"))?
            .to_owned();
        let fixed = nul + 1 + 16;
        if buf.len() < fixed {
            return Err(GossipError::MalformedFrame("entry header truncated"));
        }
        let time_ms = u64::from_be_bytes(buf[nul + 1..nul + 9].try_into().unwrap()) as i64;
        let len = u64::from_be_bytes(buf[nul + 9..nul + 17].try_into().unwrap()) as usize;
        let end = fixed + len;
        if buf.len() < end {
            return Err(GossipError::MalformedFrame("entry value truncated"));
        }
        let value = Bytes::copy_from_slice(&buf[fixed..end]);
        Ok((
            Entry {
                key,
                time_ms,
                value,
            },
            end,
        ))
    }

    /// Decodes a whole state frame of concatenated entries.
    pub fn decode_all(mut buf: &[u8]) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while !buf.is_empty() {
            let (entry, consumed) = Entry::decode(buf)?;
            if consumed == 0 {
                break;
            }
            entries.push(entry);
            buf = &buf[consumed..];
        }
        Ok(entries)
    }
}
