//! ID3v2 tag reading and writing.
//!
//! An ID3v2 block consists of a 10-byte header, an optional extended header,
//! a run of frames, optional padding, and an optional footer. Parsing is
//! best-effort: malformed frames are reported through diagnostics and
//! skipped where possible, and only structural damage aborts. Writing goes
//! through a two-phase maker so the exact output size is known before a
//! single byte is produced.

pub mod frames;
mod syncdata;

use crate::core::io::BufStream;
use crate::diag::{DiagLevel, Diagnostics};
use crate::error::{Error, Result};
use self::frames::{FrameMaker, FrameMap, FrameParseOutcome};

use log::info;
use std::io::{self, Read, Seek, SeekFrom, Write};

const SIGNATURE: &[u8; 3] = b"ID3";
const FOOTER_SIGNATURE: &[u8; 3] = b"3DI";

const PARSE_CONTEXT: &str = "parsing ID3v2 tag";
const MAKE_CONTEXT: &str = "making ID3v2 tag";

/// An ID3v2.{2,3,4} tag.
#[derive(Clone, Debug, Default)]
pub struct Id3v2Tag {
    major_version: u8,
    revision: u8,
    flags: u8,
    size_excluding_header: u32,
    extended_header_size: u32,
    padding_size: u32,
    /// The frames of the tag.
    pub frames: FrameMap,
}

impl Id3v2Tag {
    /// Creates an empty ID3v2.4 tag.
    pub fn new() -> Self {
        Self {
            major_version: 4,
            ..Self::default()
        }
    }

    /// Whether tags with the given major version can be parsed.
    pub fn version_supported(major_version: u8) -> bool {
        (2..=4).contains(&major_version)
    }

    pub fn major_version(&self) -> u8 {
        self.major_version
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    /// The declared tag size excluding the 10-byte header and the footer.
    pub fn size_excluding_header(&self) -> u32 {
        self.size_excluding_header
    }

    pub fn extended_header_size(&self) -> u32 {
        self.extended_header_size
    }

    /// The number of padding bytes found at the end of the frame region.
    pub fn padding_size(&self) -> u32 {
        self.padding_size
    }

    /// The total on-disk size of the tag including header and footer.
    pub fn total_size(&self) -> u64 {
        10 + u64::from(self.size_excluding_header) + if self.has_footer() { 10 } else { 0 }
    }

    fn is_unsynchronized(&self) -> bool {
        self.flags & 0x80 != 0
    }

    fn has_extended_header(&self) -> bool {
        self.flags & 0x40 != 0
    }

    fn has_footer(&self) -> bool {
        self.flags & 0x10 != 0
    }

    /// Parses a tag from the current position of `reader`.
    ///
    /// `max_size` bounds the tag region; zero means no bound is known, in
    /// which case the declared sizes are trusted.
    pub fn parse<R: Read + Seek>(
        reader: &mut R,
        max_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        let start_offset = reader.seek(SeekFrom::Current(0))?;

        if max_size != 0 && max_size < 10 {
            diag.push(
                DiagLevel::Critical,
                "the ID3v2 header is truncated; at least 10 bytes are expected",
                PARSE_CONTEXT,
            );
            return Err(Error::TruncatedData);
        }

        let mut header = [0; 10];
        reader.read_exact(&mut header)?;

        if &header[..3] != SIGNATURE {
            diag.push(DiagLevel::Critical, "the signature is invalid", PARSE_CONTEXT);
            return Err(Error::InvalidData);
        }

        let mut tag = Self {
            major_version: header[3],
            revision: header[4],
            flags: header[5],
            size_excluding_header: syncdata::to_u28([header[6], header[7], header[8], header[9]]),
            extended_header_size: 0,
            padding_size: 0,
            frames: FrameMap::new(),
        };

        if tag.size_excluding_header == 0 {
            diag.push(DiagLevel::Warning, "the tag seems to be empty", PARSE_CONTEXT);
            return Ok(tag);
        }

        if !Self::version_supported(tag.major_version) {
            diag.push(
                DiagLevel::Critical,
                format!(
                    "the tag cannot be parsed because version 2.{}.{} is not supported",
                    tag.major_version, tag.revision
                ),
                PARSE_CONTEXT,
            );
            return Err(Error::VersionNotSupported);
        }

        if tag.has_extended_header() {
            if max_size != 0 && max_size < 14 {
                diag.push(
                    DiagLevel::Critical,
                    "an extended header is denoted but not present",
                    PARSE_CONTEXT,
                );
                return Err(Error::TruncatedData);
            }

            let mut raw = [0; 4];
            reader.read_exact(&mut raw)?;
            let extended_header_size = syncdata::to_u28(raw);

            if extended_header_size < 6
                || extended_header_size > tag.size_excluding_header
                || (max_size != 0 && max_size < 10 + u64::from(extended_header_size))
            {
                diag.push(
                    DiagLevel::Critical,
                    "the extended header is invalid or truncated",
                    PARSE_CONTEXT,
                );
                return Err(Error::TruncatedData);
            }

            tag.extended_header_size = extended_header_size;
            // The content of the extended header is not interpreted.
            reader.seek(SeekFrom::Current(i64::from(extended_header_size) - 4))?;
        }

        let mut frames_size = tag.size_excluding_header - tag.extended_header_size;
        if max_size != 0 && u64::from(frames_size) > max_size {
            frames_size = max_size as u32;
            diag.push(DiagLevel::Critical, "the frames are truncated", PARSE_CONTEXT);
        }

        // Load the whole frame region; if the file ends early the region is
        // simply shorter than declared.
        let mut window = vec![0; frames_size as usize];
        let read = read_fully(reader, &mut window)?;
        window.truncate(read);

        // ID3v2.4 applies unsynchronization per frame; earlier versions
        // obfuscate the whole tag body.
        if tag.major_version < 4 && tag.is_unsynchronized() {
            window = syncdata::decode(&mut BufStream::new(&window));
        }

        let mut stream = BufStream::new(&window);

        while !stream.is_empty() {
            let frame_start = stream.pos();
            match frames::parse(&mut stream, tag.major_version, diag) {
                Ok(FrameParseOutcome::Frame(frame)) => {
                    if frame.id().is_text_frame() && tag.frames.contains(frame.id()) {
                        diag.push(
                            DiagLevel::Warning,
                            format!("the text frame {} exists more than once", frame.id()),
                            PARSE_CONTEXT,
                        );
                    }
                    tag.frames.insert(frame);
                }
                Ok(FrameParseOutcome::Padding) => {
                    tag.padding_size = (window.len() - frame_start) as u32;
                    break;
                }
                Ok(FrameParseOutcome::Skipped) => {}
                Err(err) if err.is_io() => return Err(err),
                Err(_) => {
                    // Best-effort: the rest of the frame region cannot be
                    // interpreted; the anomaly is already recorded.
                    break;
                }
            }
        }

        if tag.has_footer() {
            // With no known bound the declared size is trusted.
            if max_size == 0 || u64::from(tag.size_excluding_header) + 20 <= max_size {
                reader.seek(SeekFrom::Start(
                    start_offset + 10 + u64::from(tag.size_excluding_header),
                ))?;

                let mut footer = [0; 10];
                reader.read_exact(&mut footer)?;
                if &footer[..3] != FOOTER_SIGNATURE {
                    diag.push(
                        DiagLevel::Critical,
                        "the footer signature is invalid",
                        PARSE_CONTEXT,
                    );
                }
            } else {
                diag.push(
                    DiagLevel::Critical,
                    "a footer is denoted but not present",
                    PARSE_CONTEXT,
                );
                return Err(Error::TruncatedData);
            }
        }

        Ok(tag)
    }

    /// Prepares making; the returned maker knows the exact output size.
    ///
    /// The tag must not be mutated between preparing and making.
    pub fn prepare_making(&self, diag: &mut Diagnostics) -> Result<Id3v2TagMaker> {
        if !Self::version_supported(self.major_version) || self.major_version == 2 {
            diag.push(
                DiagLevel::Critical,
                format!("tags of version 2.{} cannot be written", self.major_version),
                MAKE_CONTEXT,
            );
            return Err(Error::VersionNotSupported);
        }

        let mut makers = Vec::with_capacity(self.frames.len());
        let mut frames_size = 0u64;

        for frame in self.frames.sorted() {
            match frame.prepare_making(self.major_version, diag) {
                Ok(maker) => {
                    frames_size += maker.required_size();
                    makers.push(maker);
                }
                // The anomaly is recorded; the frame is left out.
                Err(_) => {}
            }
        }

        if frames_size > 0x0FFF_FFFF {
            diag.push(
                DiagLevel::Critical,
                "the tag is too large to be written",
                MAKE_CONTEXT,
            );
            return Err(Error::InvalidData);
        }

        Ok(Id3v2TagMaker {
            major_version: self.major_version,
            revision: self.revision,
            flags: self.flags,
            makers,
            frames_size: frames_size as u32,
        })
    }

    /// Writes the tag followed by `padding` zero bytes.
    pub fn make<W: Write>(&self, writer: &mut W, padding: u32, diag: &mut Diagnostics) -> Result<()> {
        self.prepare_making(diag)?.make(writer, padding, diag)
    }
}

/// Writes an ID3v2 tag; created by [`Id3v2Tag::prepare_making`].
pub struct Id3v2TagMaker {
    major_version: u8,
    revision: u8,
    flags: u8,
    makers: Vec<FrameMaker>,
    frames_size: u32,
}

impl Id3v2TagMaker {
    /// The number of bytes [`make`](Self::make) will write, excluding padding.
    pub fn required_size(&self) -> u64 {
        10 + u64::from(self.frames_size)
    }

    pub fn make<W: Write>(&self, writer: &mut W, padding: u32, diag: &mut Diagnostics) -> Result<()> {
        let body_size = u64::from(self.frames_size) + u64::from(padding);
        if body_size > 0x0FFF_FFFF {
            diag.push(
                DiagLevel::Critical,
                "the tag is too large to be written",
                MAKE_CONTEXT,
            );
            return Err(Error::InvalidData);
        }

        info!("writing ID3v2.{} tag with {} frames", self.major_version, self.makers.len());

        writer.write_all(SIGNATURE)?;
        writer.write_all(&[self.major_version, self.revision])?;
        // Clear the extended header bit; the maker never writes one.
        writer.write_all(&[self.flags & 0xBF])?;
        writer.write_all(&syncdata::from_u28(body_size as u32))?;

        for maker in &self.makers {
            maker.make(writer)?;
        }

        let zeroes = [0; 0x400];
        let mut left = padding as usize;
        while left > 0 {
            let chunk = usize::min(left, zeroes.len());
            writer.write_all(&zeroes[..chunk])?;
            left -= chunk;
        }

        Ok(())
    }
}

fn read_fully(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;

    while total < buffer.len() {
        match reader.read(&mut buffer[total..])? {
            0 => break,
            n => total += n,
        }
    }

    Ok(total)
}
