//! The RIFF chunk format used by AVI and WAVE files.
//!
//! Chunks are framed as a four-character id followed by a 32-bit
//! little-endian size. Chunks are word-aligned: an odd-sized chunk is
//! followed by one alignment byte which this adapter counts into the
//! payload so sibling offsets stay aligned.

use crate::core::io::BufStream;
use crate::diag::{DiagLevel, Diagnostics};
use crate::element::{ElementFormat, ElementHeader};
use crate::error::{Error, Result};
use crate::types::Size;

use std::io::{Read, Seek, SeekFrom};

/// Well-known chunk ids.
pub mod ids {
    const fn fourcc(id: &[u8; 4]) -> u32 {
        u32::from_be_bytes(*id)
    }

    pub const RIFF: u32 = fourcc(b"RIFF");
    pub const LIST: u32 = fourcc(b"LIST");
    pub const JUNK: u32 = fourcc(b"JUNK");
    pub const AVIH: u32 = fourcc(b"avih");
    pub const STRH: u32 = fourcc(b"strh");
    pub const STRF: u32 = fourcc(b"strf");
    pub const FMT: u32 = fourcc(b"fmt ");
    pub const DATA: u32 = fourcc(b"data");
    pub const INFO: u32 = fourcc(b"INFO");
}

/// The RIFF chunk element format.
pub struct RiffFormat;

impl ElementFormat for RiffFormat {
    type Id = u32;

    fn min_element_size(&self) -> u64 {
        8
    }

    fn read_header<R: Read + Seek>(
        &self,
        reader: &mut R,
        start: u64,
        max_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<ElementHeader<u32>> {
        const CONTEXT: &str = "parsing RIFF chunk header";

        if max_size < 8 {
            diag.push(
                DiagLevel::Critical,
                format!("the chunk at offset {} is truncated", start),
                CONTEXT,
            );
            return Err(Error::TruncatedData);
        }

        reader.seek(SeekFrom::Start(start))?;

        let mut header = [0; 8];
        reader.read_exact(&mut header)?;

        let id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        Ok(ElementHeader {
            id,
            id_length: 4,
            size_length: 4,
            // Account for the alignment byte after odd-sized chunks.
            data_size: u64::from(size) + u64::from(size & 1),
            size_unknown: false,
        })
    }

    fn is_parent(&self, header: &ElementHeader<u32>) -> bool {
        header.id == ids::RIFF || header.id == ids::LIST
    }

    fn is_padding(&self, header: &ElementHeader<u32>) -> bool {
        header.id == ids::JUNK
    }

    fn first_child_offset(&self, header: &ElementHeader<u32>) -> u64 {
        if self.is_parent(header) {
            // The form/list type follows the header.
            header.header_size() + 4
        } else {
            0
        }
    }

    fn id_to_string(&self, id: u32) -> String {
        let bytes = id.to_be_bytes();
        if bytes.iter().all(|byte| byte.is_ascii_graphic() || *byte == b' ') {
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            format!("0x{:08X}", id)
        }
    }
}

/// The BITMAPINFOHEADER struct carried by AVI "strf" chunks.
#[derive(Clone, Copy, Debug, Default)]
pub struct BitmapInfoHeader {
    pub size: u32,
    pub width: u32,
    pub height: u32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub image_size: u32,
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
    pub clr_used: u32,
    pub clr_important: u32,
}

impl BitmapInfoHeader {
    /// Parses the 40-byte header from `stream`.
    pub fn parse(stream: &mut BufStream) -> Result<Self> {
        Ok(Self {
            size: stream.read_le_u32()?,
            width: stream.read_le_u32()?,
            height: stream.read_le_u32()?,
            planes: stream.read_le_u16()?,
            bit_count: stream.read_le_u16()?,
            compression: stream.read_le_u32()?,
            image_size: stream.read_le_u32()?,
            horizontal_resolution: stream.read_le_u32()?,
            vertical_resolution: stream.read_le_u32()?,
            clr_used: stream.read_le_u32()?,
            clr_important: stream.read_le_u32()?,
        })
    }

    /// The video dimensions this header declares.
    pub fn dimensions(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementTree;
    use std::io::Cursor;

    fn chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut data = id.to_vec();
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(payload);
        if payload.len() % 2 != 0 {
            data.push(0);
        }
        data
    }

    #[test]
    fn chunks_parse_with_little_endian_sizes() {
        let mut payload = b"WAVE".to_vec();
        payload.extend(chunk(b"fmt ", &[0; 16]));
        payload.extend(chunk(b"data", &[1, 2, 3, 4]));
        let data = chunk(b"RIFF", &payload);
        let len = data.len() as u64;

        let mut reader = Cursor::new(data);
        let mut tree = ElementTree::new(RiffFormat, &mut reader, 0, len);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        tree.parse(root, &mut diag).unwrap();
        assert_eq!(tree.id(root), ids::RIFF);
        assert!(tree.is_parent(root));
        assert_eq!(tree.total_size(root), len);

        let fmt = tree.child_by_id(root, ids::FMT, &mut diag).unwrap().unwrap();
        assert_eq!(tree.data_size(fmt), 16);
        assert_eq!(tree.start_offset(fmt), 12);

        let data_chunk = tree.sibling_by_id(fmt, ids::DATA, &mut diag).unwrap().unwrap();
        assert_eq!(tree.data_size(data_chunk), 4);
        assert_eq!(tree.end_offset(data_chunk), len);
    }

    #[test]
    fn odd_chunks_stay_word_aligned() {
        let mut payload = b"AVI ".to_vec();
        payload.extend(chunk(b"avih", &[0; 5]));
        payload.extend(chunk(b"JUNK", &[0; 2]));
        let data = chunk(b"RIFF", &payload);
        let len = data.len() as u64;

        let mut reader = Cursor::new(data);
        let mut tree = ElementTree::new(RiffFormat, &mut reader, 0, len);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        let avih = tree.child_by_id(root, ids::AVIH, &mut diag).unwrap().unwrap();
        // Five declared bytes plus one alignment byte.
        assert_eq!(tree.data_size(avih), 6);

        let junk = tree.next_sibling(avih).unwrap();
        tree.parse(junk, &mut diag).unwrap();
        assert!(tree.is_padding(junk));
        assert_eq!(tree.start_offset(junk) % 2, 0);

        let mut padding = 0;
        tree.validate_structure(root, &mut diag, &mut padding).unwrap();
        assert_eq!(padding, 10);
    }

    #[test]
    fn bitmap_info_header_reads_every_field() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&40u32.to_le_bytes());
        raw.extend_from_slice(&1280u32.to_le_bytes());
        raw.extend_from_slice(&720u32.to_le_bytes());
        raw.extend_from_slice(&1u16.to_le_bytes());
        raw.extend_from_slice(&24u16.to_le_bytes());
        raw.extend_from_slice(b"MJPG");
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&[0; 16]);

        let header = BitmapInfoHeader::parse(&mut BufStream::new(&raw)).unwrap();
        assert_eq!(header.size, 40);
        assert_eq!(header.dimensions(), Size::new(1280, 720));
        assert_eq!(header.planes, 1);
        assert_eq!(header.bit_count, 24);
        assert_eq!(header.compression, u32::from_le_bytes(*b"MJPG"));

        assert!(BitmapInfoHeader::parse(&mut BufStream::new(&raw[..20])).is_err());
    }
}
