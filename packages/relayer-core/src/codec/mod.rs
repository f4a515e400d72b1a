//! Tag-length-value codec used by the relayer wire envelopes and certificates.
//!
//! Every item is `tag: u16 LE | length: u32 LE | value`. There is no packet
//! header, so encoding a prefix of the fields yields a byte prefix of the full
//! encoding. Tags must appear in strictly ascending order.

use crate::{Error, Result};

const TAG_SIZE: usize = 2;
const LEN_SIZE: usize = 4;
const HEADER_SIZE: usize = TAG_SIZE + LEN_SIZE;

#[derive(Debug, Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
    last_tag: Option<u16>,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, tag: u16, value: u8) -> Result<&mut Self> {
        self.put(tag, &[value])
    }

    pub fn put_string(&mut self, tag: u16, value: &str) -> Result<&mut Self> {
        self.put(tag, value.as_bytes())
    }

    pub fn put_bytes(&mut self, tag: u16, value: &[u8]) -> Result<&mut Self> {
        self.put(tag, value)
    }

    fn put(&mut self, tag: u16, value: &[u8]) -> Result<&mut Self> {
        if let Some(last) = self.last_tag {
            if tag <= last {
                return Err(Error::Codec(format!("tlv tag {} written after tag {}", tag, last)));
            }
        }
        let len = u32::try_from(value.len())
            .map_err(|_| Error::Codec(format!("tlv value too long for tag {}: {}", tag, value.len())))?;

        self.buf.reserve(HEADER_SIZE + value.len());
        self.buf.extend_from_slice(&tag.to_le_bytes());
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value);
        self.last_tag = Some(tag);
        Ok(self)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvItem<'a> {
    pub tag: u16,
    pub value: &'a [u8],
}

impl<'a> TlvItem<'a> {
    pub fn as_u8(&self) -> Result<u8> {
        match self.value {
            [v] => Ok(*v),
            other => Err(Error::Codec(format!(
                "tlv tag {} expects 1 byte, got {}",
                self.tag,
                other.len()
            ))),
        }
    }

    pub fn as_string(&self) -> Result<String> {
        String::from_utf8(self.value.to_vec())
            .map_err(|e| Error::Codec(format!("tlv tag {} is not utf-8: {}", self.tag, e)))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.value.to_vec()
    }
}

#[derive(Debug)]
pub struct TlvReader<'a> {
    data: &'a [u8],
    pos: usize,
    last_tag: Option<u16>,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            last_tag: None,
        }
    }

    /// Returns the next item, `None` once the input is consumed.
    pub fn next_item(&mut self) -> Result<Option<TlvItem<'a>>> {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        if rest.len() < HEADER_SIZE {
            return Err(Error::Codec(format!(
                "truncated tlv header at offset {}",
                self.pos
            )));
        }

        let tag = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u32::from_le_bytes([rest[2], rest[3], rest[4], rest[5]]) as usize;
        if let Some(last) = self.last_tag {
            if tag <= last {
                return Err(Error::Codec(format!("tlv tag {} found after tag {}", tag, last)));
            }
        }
        let body = &rest[HEADER_SIZE..];
        if body.len() < len {
            return Err(Error::Codec(format!(
                "truncated tlv value for tag {}: want {} bytes, have {}",
                tag,
                len,
                body.len()
            )));
        }

        self.pos += HEADER_SIZE + len;
        self.last_tag = Some(tag);
        Ok(Some(TlvItem {
            tag,
            value: &body[..len],
        }))
    }
}
