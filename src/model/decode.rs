//! Decoding of lavaplayer's binary track format.
//!
//! Layout: a big-endian `u32` header (two flag bits, thirty size bits)
//! followed by the message body. The body starts with a version byte when the
//! versioned flag is set, then Java `DataOutput` fields. The playback position
//! is always the trailing `i64` of the body.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::TrackInfo;
use crate::{Error, Result};

const FLAG_VERSIONED: u32 = 1;

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::TrackDecode(format!("unexpected end of data at byte {}", self.offset)))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(buf))
    }

    /// Java `readUTF`: a `u16` length followed by (modified) UTF-8.
    fn read_utf(&mut self) -> Result<String> {
        let len = usize::from(self.read_u16()?);
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_nullable_utf(&mut self) -> Result<Option<String>> {
        if self.read_bool()? {
            self.read_utf().map(Some)
        } else {
            Ok(None)
        }
    }
}

pub(crate) fn decode_track(encoded: &str) -> Result<TrackInfo> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::TrackDecode(e.to_string()))?;

    let mut outer = Reader::new(&raw);
    let header = outer.read_u32()?;
    let flags = header >> 30;
    let size = (header & 0x3FFF_FFFF) as usize;
    let body = outer.take(size)?;

    if body.len() < 8 {
        return Err(Error::TrackDecode("track body too short".to_string()));
    }

    let mut reader = Reader::new(body);
    let version = if flags & FLAG_VERSIONED != 0 {
        reader.read_u8()?
    } else {
        1
    };

    let title = reader.read_utf()?;
    let author = reader.read_utf()?;
    let length = reader.read_i64()?;
    let identifier = reader.read_utf()?;
    let is_stream = reader.read_bool()?;
    let uri = if version >= 2 {
        reader.read_nullable_utf()?
    } else {
        None
    };
    let (artwork_url, isrc) = if version >= 3 {
        (reader.read_nullable_utf()?, reader.read_nullable_utf()?)
    } else {
        (None, None)
    };
    let source_name = reader.read_utf()?;

    // Source specific fields sit between the source name and the position.
    let mut tail = Reader::new(&body[body.len() - 8..]);
    let position = tail.read_i64()?;

    Ok(TrackInfo {
        identifier,
        is_seekable: !is_stream,
        author,
        length: length.max(0) as u64,
        is_stream,
        position: position.max(0) as u64,
        title,
        uri,
        artwork_url,
        isrc,
        source_name,
    })
}
