//! Vorbis comment fields.
//!
//! Each field is a 4-byte little-endian length followed by `KEY=VALUE`,
//! where the key is case-insensitive ASCII and the value is UTF-8. The
//! special key `METADATA_BLOCK_PICTURE` wraps a Base64-encoded FLAC picture
//! metadata block.

use crate::core::io::BufStream;
use crate::diag::{DiagLevel, Diagnostics};
use crate::error::{Error, Result};
use crate::types::{Size, VorbisCommentFlags};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::warn;
use std::io::Write;

/// The field key carrying a Base64-wrapped FLAC picture block.
pub const PICTURE_KEY: &str = "METADATA_BLOCK_PICTURE";

const PARSE_CONTEXT: &str = "parsing Vorbis comment field";
const MAKE_CONTEXT: &str = "making Vorbis comment field";

/// A FLAC picture metadata block, as embedded in FLAC files and Vorbis
/// comments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlacPictureBlock {
    pub picture_type: u32,
    pub mime_type: String,
    pub description: String,
    pub size: Size,
    pub depth: u32,
    pub colors: u32,
    pub data: Vec<u8>,
}

impl FlacPictureBlock {
    /// Parses a picture block from `stream`.
    pub fn parse(stream: &mut BufStream) -> Result<Self> {
        let picture_type = stream.read_be_u32()?;

        let mime_length = stream.read_be_u32()? as usize;
        let mime_type = String::from_utf8_lossy(stream.slice(mime_length)?).into_owned();

        let description_length = stream.read_be_u32()? as usize;
        let description = String::from_utf8_lossy(stream.slice(description_length)?).into_owned();

        let width = stream.read_be_u32()?;
        let height = stream.read_be_u32()?;
        let depth = stream.read_be_u32()?;
        let colors = stream.read_be_u32()?;

        let data_length = stream.read_be_u32()? as usize;
        let data = stream.slice(data_length)?.to_vec();

        Ok(Self {
            picture_type,
            mime_type,
            description,
            size: Size::new(width, height),
            depth,
            colors,
            data,
        })
    }

    /// The number of bytes [`make`](Self::make) will write.
    pub fn required_size(&self) -> u64 {
        32 + (self.mime_type.len() + self.description.len() + self.data.len()) as u64
    }

    /// Writes the picture block to `writer`.
    pub fn make(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.picture_type.to_be_bytes())?;
        writer.write_all(&(self.mime_type.len() as u32).to_be_bytes())?;
        writer.write_all(self.mime_type.as_bytes())?;
        writer.write_all(&(self.description.len() as u32).to_be_bytes())?;
        writer.write_all(self.description.as_bytes())?;
        writer.write_all(&self.size.width().to_be_bytes())?;
        writer.write_all(&self.size.height().to_be_bytes())?;
        writer.write_all(&self.depth.to_be_bytes())?;
        writer.write_all(&self.colors.to_be_bytes())?;
        writer.write_all(&(self.data.len() as u32).to_be_bytes())?;
        writer.write_all(&self.data)?;
        Ok(())
    }
}

/// The value of a Vorbis comment field.
#[derive(Clone, Debug, PartialEq)]
pub enum VorbisValue {
    Text(String),
    Picture(FlacPictureBlock),
}

/// A single Vorbis comment field.
#[derive(Clone, Debug, PartialEq)]
pub struct VorbisCommentField {
    id: String,
    value: VorbisValue,
}

impl VorbisCommentField {
    /// Creates a text field.
    pub fn text(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: VorbisValue::Text(value.into()),
        }
    }

    /// Creates a picture field.
    pub fn picture(picture: FlacPictureBlock) -> Self {
        Self {
            id: String::from(PICTURE_KEY),
            value: VorbisValue::Picture(picture),
        }
    }

    /// The field key.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> &VorbisValue {
        &self.value
    }

    /// Whether this field carries a picture.
    pub fn is_picture(&self) -> bool {
        self.id.eq_ignore_ascii_case(PICTURE_KEY)
    }

    /// Parses one field from `stream`, which bounds the comment region.
    pub fn parse(stream: &mut BufStream, diag: &mut Diagnostics) -> Result<Self> {
        if stream.remaining() < 4 {
            diag.push(DiagLevel::Critical, "a field is expected", PARSE_CONTEXT);
            return Err(Error::TruncatedData);
        }

        let size = stream.read_le_u32()? as usize;
        if size > stream.remaining() {
            diag.push(DiagLevel::Critical, "the field is truncated", PARSE_CONTEXT);
            return Err(Error::TruncatedData);
        }

        let data = stream.slice(size)?;
        let id_size = data.iter().position(|&byte| byte == b'=').unwrap_or(size);

        if id_size == 0 {
            diag.push(DiagLevel::Critical, "the field ID is empty", PARSE_CONTEXT);
            return Err(Error::InvalidData);
        }

        let id = String::from_utf8_lossy(&data[..id_size]).into_owned();

        let value = if id.eq_ignore_ascii_case(PICTURE_KEY) && id_size < size {
            let decoded = match BASE64.decode(&data[id_size + 1..]) {
                Ok(decoded) => decoded,
                Err(_) => {
                    diag.push(
                        DiagLevel::Critical,
                        "the Base64 coding of the METADATA_BLOCK_PICTURE field is invalid",
                        PARSE_CONTEXT,
                    );
                    return Err(Error::InvalidData);
                }
            };

            let picture = FlacPictureBlock::parse(&mut BufStream::new(&decoded)).map_err(|err| {
                diag.push(
                    DiagLevel::Critical,
                    "the METADATA_BLOCK_PICTURE field is truncated",
                    PARSE_CONTEXT,
                );
                err
            })?;

            VorbisValue::Picture(picture)
        } else if id_size + 1 < size {
            VorbisValue::Text(String::from_utf8_lossy(&data[id_size + 1..]).into_owned())
        } else {
            VorbisValue::Text(String::new())
        };

        Ok(Self { id, value })
    }

    /// Writes the field to `writer`.
    ///
    /// Returns whether the field has been written; picture fields are
    /// skipped when `flags` says so.
    pub fn make(
        &self,
        writer: &mut impl Write,
        flags: VorbisCommentFlags,
        diag: &mut Diagnostics,
    ) -> Result<bool> {
        if self.id.is_empty() {
            diag.push(DiagLevel::Critical, "the field ID is empty", MAKE_CONTEXT);
        }

        let value = match &self.value {
            VorbisValue::Picture(picture) => {
                if flags.no_covers {
                    warn!("skipping picture field due to the no-covers flag");
                    return Ok(false);
                }

                let mut raw = Vec::with_capacity(picture.required_size() as usize);
                picture.make(&mut raw)?;
                BASE64.encode(&raw)
            }
            VorbisValue::Text(text) => text.clone(),
        };

        let size = self.id.len() as u64 + 1 + value.len() as u64;
        if size > u64::from(u32::MAX) {
            diag.push(
                DiagLevel::Critical,
                "the assigned value exceeds the maximum size",
                MAKE_CONTEXT,
            );
            return Err(Error::InvalidData);
        }

        writer.write_all(&(size as u32).to_le_bytes())?;
        writer.write_all(self.id.as_bytes())?;
        writer.write_all(b"=")?;
        writer.write_all(value.as_bytes())?;

        Ok(true)
    }
}
