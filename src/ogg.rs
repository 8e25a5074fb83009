//! The Ogg page format.
//!
//! Pages are flat: each starts with the "OggS" capture pattern, a fixed
//! 23-byte header, and a segment table whose entries sum to the payload
//! size. Pages never nest, so the element tree degenerates to a sibling
//! chain.

use crate::diag::{DiagLevel, Diagnostics};
use crate::element::{ElementFormat, ElementHeader};
use crate::error::{Error, Result};

use std::io::{Read, Seek, SeekFrom};

/// The "OggS" capture pattern as a big-endian fourcc.
pub const CAPTURE_PATTERN: u32 = u32::from_be_bytes(*b"OggS");

/// Page header flags.
pub mod flags {
    pub const CONTINUED: u8 = 0x01;
    pub const FIRST_PAGE: u8 = 0x02;
    pub const LAST_PAGE: u8 = 0x04;
}

/// The Ogg page element format.
pub struct OggFormat;

impl ElementFormat for OggFormat {
    type Id = u32;

    fn min_element_size(&self) -> u64 {
        27
    }

    fn read_header<R: Read + Seek>(
        &self,
        reader: &mut R,
        start: u64,
        max_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<ElementHeader<u32>> {
        const CONTEXT: &str = "parsing Ogg page header";

        if max_size < 27 {
            diag.push(
                DiagLevel::Critical,
                format!("the Ogg page at offset {} is truncated", start),
                CONTEXT,
            );
            return Err(Error::TruncatedData);
        }

        reader.seek(SeekFrom::Start(start))?;

        let mut fixed = [0; 27];
        reader.read_exact(&mut fixed)?;

        let id = u32::from_be_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);
        if id != CAPTURE_PATTERN {
            diag.push(
                DiagLevel::Critical,
                format!("the capture pattern at offset {} is invalid", start),
                CONTEXT,
            );
            return Err(Error::InvalidData);
        }

        if fixed[4] != 0 {
            diag.push(
                DiagLevel::Critical,
                format!("the Ogg page at offset {} has an unsupported stream structure version", start),
                CONTEXT,
            );
            return Err(Error::VersionNotSupported);
        }

        let segment_count = fixed[26] as usize;
        if max_size < 27 + segment_count as u64 {
            diag.push(
                DiagLevel::Critical,
                format!("the segment table of the Ogg page at offset {} is truncated", start),
                CONTEXT,
            );
            return Err(Error::TruncatedData);
        }

        let mut segments = vec![0; segment_count];
        reader.read_exact(&mut segments)?;
        let data_size = segments.iter().map(|&entry| u64::from(entry)).sum();

        Ok(ElementHeader {
            id,
            id_length: 4,
            // The fixed header after the capture pattern plus the segment table.
            size_length: 23 + segment_count as u32,
            data_size,
            size_unknown: false,
        })
    }

    fn is_parent(&self, _header: &ElementHeader<u32>) -> bool {
        false
    }

    fn is_padding(&self, _header: &ElementHeader<u32>) -> bool {
        false
    }

    fn first_child_offset(&self, _header: &ElementHeader<u32>) -> u64 {
        0
    }

    fn id_to_string(&self, _id: u32) -> String {
        String::from("OggS")
    }
}
