//! Upload frame codec.
//!
//! A frame is a variable-length metadata header followed by the file payload
//! and a trailing digest. All integers are big-endian:
//!
//! ```text
//! name_length:u16 extension_length:u8 created_length:u8
//! filename[name_length] extension[extension_length] created[created_length]
//! file_size:u32 hash_length:u8
//! payload[file_size] digest[hash_length]
//! ```
//!
//! Nothing in this module touches a socket.

use crate::error::FrameError;
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Size of the three length prefixes.
pub const PREFIX_LEN: usize = 4;

/// Size of `file_size` + `hash_length`.
pub const TRAILER_LEN: usize = 5;

/// Decoded frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub filename: String,
    pub extension: String,
    /// Creation timestamp as sent by the client.
    pub created: String,
    /// Payload bytes following the header.
    pub file_size: u32,
    /// Digest bytes following the payload.
    pub hash_length: u8,
}

impl TransferHeader {
    pub fn new(
        filename: impl Into<String>,
        extension: impl Into<String>,
        created: impl Into<String>,
        file_size: u32,
        hash_length: u8,
    ) -> Self {
        Self {
            filename: filename.into(),
            extension: extension.into(),
            created: created.into(),
            file_size,
            hash_length,
        }
    }

    /// Length of the header on the wire.
    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN + self.filename.len() + self.extension.len() + self.created.len() + TRAILER_LEN
    }

    /// Bytes following the header: payload plus digest.
    ///
    /// `None` if the sum does not fit in `usize`.
    pub fn body_len(&self) -> Option<usize> {
        usize::try_from(self.file_size)
            .ok()?
            .checked_add(self.hash_length as usize)
    }

    /// Interpret `created` as a timestamp, if it looks like one.
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        let created = self.created.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(created) {
            return Some(ts.naive_utc());
        }
        if let Ok(ts) = NaiveDateTime::parse_from_str(created, "%Y-%m-%d %H:%M:%S") {
            return Some(ts);
        }
        NaiveDate::parse_from_str(created, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }
}

/// Decode a header from the start of `buffer`.
///
/// Returns the header and the bytes that follow it, which are the first
/// bytes of the payload (and possibly digest or the next frame).
pub fn decode_header(buffer: &[u8]) -> Result<(TransferHeader, &[u8]), FrameError> {
    if buffer.len() < PREFIX_LEN {
        return Err(FrameError::MalformedHeader {
            needed: PREFIX_LEN,
            available: buffer.len(),
        });
    }

    let mut cursor = buffer;
    let name_length = cursor.get_u16() as usize;
    let extension_length = cursor.get_u8() as usize;
    let created_length = cursor.get_u8() as usize;

    let needed = PREFIX_LEN + name_length + extension_length + created_length + TRAILER_LEN;
    if buffer.len() < needed {
        return Err(FrameError::MalformedHeader {
            needed,
            available: buffer.len(),
        });
    }

    let filename = take_text(&mut cursor, name_length, "filename")?;
    let extension = take_text(&mut cursor, extension_length, "extension")?;
    let created = take_text(&mut cursor, created_length, "created")?;
    let file_size = cursor.get_u32();
    let hash_length = cursor.get_u8();

    let header = TransferHeader {
        filename,
        extension,
        created,
        file_size,
        hash_length,
    };
    Ok((header, &buffer[needed..]))
}

fn take_text(cursor: &mut &[u8], len: usize, field: &'static str) -> Result<String, FrameError> {
    let (text, rest) = cursor.split_at(len);
    let text = std::str::from_utf8(text)
        .map_err(|source| FrameError::Encoding { field, source })?
        .to_owned();
    *cursor = rest;
    Ok(text)
}

/// Append the wire form of `header` to `buf`.
pub fn encode_header(header: &TransferHeader, buf: &mut BytesMut) -> Result<(), FrameError> {
    let name_length = field_len(&header.filename, "filename", u16::MAX as usize)?;
    let extension_length = field_len(&header.extension, "extension", u8::MAX as usize)?;
    let created_length = field_len(&header.created, "created", u8::MAX as usize)?;

    buf.reserve(header.encoded_len());
    buf.put_u16(name_length as u16);
    buf.put_u8(extension_length as u8);
    buf.put_u8(created_length as u8);
    buf.put_slice(header.filename.as_bytes());
    buf.put_slice(header.extension.as_bytes());
    buf.put_slice(header.created.as_bytes());
    buf.put_u32(header.file_size);
    buf.put_u8(header.hash_length);
    Ok(())
}

/// Build a complete frame.
///
/// `payload` and `digest` must match the sizes declared in `header`.
pub fn encode_frame(
    header: &TransferHeader,
    payload: &[u8],
    digest: &[u8],
) -> Result<BytesMut, FrameError> {
    debug_assert_eq!(payload.len(), header.file_size as usize);
    debug_assert_eq!(digest.len(), header.hash_length as usize);

    let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len() + digest.len());
    encode_header(header, &mut buf)?;
    buf.put_slice(payload);
    buf.put_slice(digest);
    Ok(buf)
}

fn field_len(value: &str, field: &'static str, max: usize) -> Result<usize, FrameError> {
    let len = value.len();
    if len > max {
        return Err(FrameError::FieldTooLong { field, len, max });
    }
    Ok(len)
}
