//! ID3v2 frames: identifiers, the on-disk order, parsing, and rendering.
//!
//! A frame is a single tagged record inside an ID3v2 block. Identifiers are
//! three ASCII characters in ID3v2.2 and four from ID3v2.3 on; both forms
//! are packed into a [`FrameId`] so the version-independent tables can be
//! expressed once.

use crate::core::io::BufStream;
use crate::diag::{DiagLevel, Diagnostics};
use crate::element::{ElementFormat, ElementHeader};
use crate::error::{Error, Result};
use crate::id3v2::syncdata;
use crate::types::{KnownField, TagDataType};

use indexmap::map::{Iter, Keys, Values};
use indexmap::IndexMap;
use log::{info, warn};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Index;

/// An ID3v2 frame identifier, packed into a `u32`.
///
/// Four-character identifiers occupy all four bytes; the three-character
/// identifiers of ID3v2.2 occupy the low three bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FrameId(u32);

impl FrameId {
    /// Packs a four-character identifier.
    pub const fn long(id: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*id))
    }

    /// Packs a three-character identifier.
    pub const fn short(id: &[u8; 3]) -> Self {
        Self((id[0] as u32) << 16 | (id[1] as u32) << 8 | id[2] as u32)
    }

    /// The packed value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Whether this is a four-character identifier.
    pub fn is_long(self) -> bool {
        self.0 > 0xFF_FFFF
    }

    /// Converts a three-character identifier to its four-character
    /// equivalent, when one exists.
    pub fn to_long(self) -> Option<FrameId> {
        if self.is_long() {
            return Some(self);
        }

        Some(match self {
            ids::S_UNIQUE_FILE_ID => ids::UNIQUE_FILE_ID,
            ids::S_TITLE => ids::TITLE,
            ids::S_ALBUM => ids::ALBUM,
            ids::S_ARTIST => ids::ARTIST,
            ids::S_COMMENT => ids::COMMENT,
            ids::S_YEAR => ids::YEAR,
            ids::S_RECORD_DATE => ids::RECORD_DATE,
            ids::S_GENRE => ids::GENRE,
            ids::S_TRACK_POSITION => ids::TRACK_POSITION,
            ids::S_DISK_POSITION => ids::DISK_POSITION,
            ids::S_ENCODER => ids::ENCODER,
            ids::S_BPM => ids::BPM,
            ids::S_COVER => ids::COVER,
            ids::S_WRITER => ids::WRITER,
            ids::S_LENGTH => ids::LENGTH,
            ids::S_LANGUAGE => ids::LANGUAGE,
            ids::S_ENCODER_SETTINGS => ids::ENCODER_SETTINGS,
            ids::S_UNSYNC_LYRICS => ids::UNSYNC_LYRICS,
            ids::S_SYNC_LYRICS => ids::SYNC_LYRICS,
            ids::S_GROUPING => ids::GROUPING,
            ids::S_RECORD_LABEL => ids::RECORD_LABEL,
            ids::S_COMPOSER => ids::COMPOSER,
            ids::S_USER_TEXT => ids::USER_TEXT,
            _ => return None,
        })
    }

    /// Whether this identifier denotes a text frame. User-defined text
    /// frames carry a description and are not considered plain text frames.
    pub fn is_text_frame(self) -> bool {
        if self.is_long() {
            self.0 & 0xFF00_0000 == (b'T' as u32) << 24 && self != ids::USER_TEXT
        } else {
            self.0 & 0xFF_0000 == (b'T' as u32) << 16 && self != ids::S_USER_TEXT
        }
    }

    fn parse_long(raw: [u8; 4]) -> Result<Self> {
        if !raw.iter().all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit()) {
            return Err(Error::InvalidData);
        }

        Ok(Self::long(&raw))
    }

    fn parse_short(raw: [u8; 3]) -> Result<Self> {
        if !raw.iter().all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit()) {
            return Err(Error::InvalidData);
        }

        Ok(Self::short(&raw))
    }
}

impl Display for FrameId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        let chars = if self.is_long() { &bytes[..] } else { &bytes[1..] };

        for &ch in chars {
            write![f, "{}", ch as char]?;
        }

        Ok(())
    }
}

/// The frame identifiers this crate knows about. `S_`-prefixed constants
/// are the three-character ID3v2.2 forms.
pub mod ids {
    use super::FrameId;

    pub const UNIQUE_FILE_ID: FrameId = FrameId::long(b"UFID");
    pub const TITLE: FrameId = FrameId::long(b"TIT2");
    pub const ALBUM: FrameId = FrameId::long(b"TALB");
    pub const ARTIST: FrameId = FrameId::long(b"TPE1");
    pub const COMMENT: FrameId = FrameId::long(b"COMM");
    pub const YEAR: FrameId = FrameId::long(b"TYER");
    pub const RECORD_DATE: FrameId = FrameId::long(b"TDRC");
    pub const GENRE: FrameId = FrameId::long(b"TCON");
    pub const TRACK_POSITION: FrameId = FrameId::long(b"TRCK");
    pub const DISK_POSITION: FrameId = FrameId::long(b"TPOS");
    pub const ENCODER: FrameId = FrameId::long(b"TENC");
    pub const BPM: FrameId = FrameId::long(b"TBPM");
    pub const COVER: FrameId = FrameId::long(b"APIC");
    pub const WRITER: FrameId = FrameId::long(b"TEXT");
    pub const LENGTH: FrameId = FrameId::long(b"TLEN");
    pub const LANGUAGE: FrameId = FrameId::long(b"TLAN");
    pub const ENCODER_SETTINGS: FrameId = FrameId::long(b"TSSE");
    pub const UNSYNC_LYRICS: FrameId = FrameId::long(b"USLT");
    pub const SYNC_LYRICS: FrameId = FrameId::long(b"SYLT");
    pub const GROUPING: FrameId = FrameId::long(b"TIT1");
    pub const RECORD_LABEL: FrameId = FrameId::long(b"TPUB");
    pub const COMPOSER: FrameId = FrameId::long(b"TCOM");
    pub const RATING: FrameId = FrameId::long(b"POPM");
    pub const USER_TEXT: FrameId = FrameId::long(b"TXXX");

    pub const S_UNIQUE_FILE_ID: FrameId = FrameId::short(b"UFI");
    pub const S_TITLE: FrameId = FrameId::short(b"TT2");
    pub const S_ALBUM: FrameId = FrameId::short(b"TAL");
    pub const S_ARTIST: FrameId = FrameId::short(b"TP1");
    pub const S_COMMENT: FrameId = FrameId::short(b"COM");
    pub const S_YEAR: FrameId = FrameId::short(b"TYE");
    pub const S_RECORD_DATE: FrameId = FrameId::short(b"TRD");
    pub const S_GENRE: FrameId = FrameId::short(b"TCO");
    pub const S_TRACK_POSITION: FrameId = FrameId::short(b"TRK");
    pub const S_DISK_POSITION: FrameId = FrameId::short(b"TPA");
    pub const S_ENCODER: FrameId = FrameId::short(b"TEN");
    pub const S_BPM: FrameId = FrameId::short(b"TBP");
    pub const S_COVER: FrameId = FrameId::short(b"PIC");
    pub const S_WRITER: FrameId = FrameId::short(b"TXT");
    pub const S_LENGTH: FrameId = FrameId::short(b"TLE");
    pub const S_LANGUAGE: FrameId = FrameId::short(b"TLA");
    pub const S_ENCODER_SETTINGS: FrameId = FrameId::short(b"TSS");
    pub const S_UNSYNC_LYRICS: FrameId = FrameId::short(b"ULT");
    pub const S_SYNC_LYRICS: FrameId = FrameId::short(b"SLT");
    pub const S_GROUPING: FrameId = FrameId::short(b"TT1");
    pub const S_RECORD_LABEL: FrameId = FrameId::short(b"TPB");
    pub const S_COMPOSER: FrameId = FrameId::short(b"TCM");
    pub const S_USER_TEXT: FrameId = FrameId::short(b"TXX");
}

/// Defines the order in which frames are stored on disk.
///
/// The order is: unique file id, title, other text frames, other frames,
/// cover. Three-character identifiers are normalized to their
/// four-character equivalents first so mixed versions compare uniformly.
pub fn frame_order(lhs: FrameId, rhs: FrameId) -> Ordering {
    if lhs == rhs {
        return Ordering::Equal;
    }

    let mut lhs = lhs;
    let mut rhs = rhs;
    if lhs.is_long() != rhs.is_long() {
        if !lhs.is_long() {
            lhs = lhs.to_long().unwrap_or(lhs);
        } else {
            rhs = rhs.to_long().unwrap_or(rhs);
        }
    }

    if lhs == ids::UNIQUE_FILE_ID || lhs == ids::S_UNIQUE_FILE_ID {
        return Ordering::Less;
    }
    if rhs == ids::UNIQUE_FILE_ID || rhs == ids::S_UNIQUE_FILE_ID {
        return Ordering::Greater;
    }

    if lhs == ids::TITLE || lhs == ids::S_TITLE {
        return Ordering::Less;
    }
    if rhs == ids::TITLE || rhs == ids::S_TITLE {
        return Ordering::Greater;
    }

    let lhs_text = lhs.is_text_frame();
    let rhs_text = rhs.is_text_frame();
    if lhs_text && !rhs_text {
        return Ordering::Less;
    }
    if !lhs_text && rhs_text {
        return Ordering::Greater;
    }

    if lhs == ids::COVER || lhs == ids::S_COVER {
        return Ordering::Greater;
    }
    if rhs == ids::COVER || rhs == ids::S_COVER {
        return Ordering::Less;
    }

    lhs.value().cmp(&rhs.value())
}

/// Maps a frame identifier to the format-independent field it carries.
pub fn known_field(id: FrameId) -> Option<KnownField> {
    let id = id.to_long().unwrap_or(id);

    Some(match id {
        ids::TITLE => KnownField::Title,
        ids::ALBUM => KnownField::Album,
        ids::ARTIST => KnownField::Artist,
        ids::COMMENT => KnownField::Comment,
        ids::YEAR => KnownField::Year,
        ids::RECORD_DATE => KnownField::RecordDate,
        ids::GENRE => KnownField::Genre,
        ids::TRACK_POSITION => KnownField::TrackPosition,
        ids::DISK_POSITION => KnownField::DiskPosition,
        ids::ENCODER => KnownField::Encoder,
        ids::BPM => KnownField::Bpm,
        ids::COVER => KnownField::Cover,
        ids::WRITER => KnownField::Lyricist,
        ids::LENGTH => KnownField::Length,
        ids::LANGUAGE => KnownField::Language,
        ids::ENCODER_SETTINGS => KnownField::EncoderSettings,
        ids::UNSYNC_LYRICS => KnownField::Lyrics,
        ids::SYNC_LYRICS => KnownField::SynchronizedLyrics,
        ids::GROUPING => KnownField::Grouping,
        ids::RECORD_LABEL => KnownField::RecordLabel,
        ids::COMPOSER => KnownField::Composer,
        ids::RATING => KnownField::Rating,
        _ => return None,
    })
}

/// Maps a field to the frame identifier the given tag version uses for it.
pub fn field_id(field: KnownField, major_version: u8) -> Option<FrameId> {
    let long = match field {
        KnownField::Title => ids::TITLE,
        KnownField::Album => ids::ALBUM,
        KnownField::Artist => ids::ARTIST,
        KnownField::Comment => ids::COMMENT,
        KnownField::Year => ids::YEAR,
        KnownField::RecordDate => ids::RECORD_DATE,
        KnownField::Genre => ids::GENRE,
        KnownField::TrackPosition => ids::TRACK_POSITION,
        KnownField::DiskPosition => ids::DISK_POSITION,
        KnownField::Encoder => ids::ENCODER,
        KnownField::Bpm => ids::BPM,
        KnownField::Cover => ids::COVER,
        KnownField::Lyricist => ids::WRITER,
        KnownField::Length => ids::LENGTH,
        KnownField::Language => ids::LANGUAGE,
        KnownField::EncoderSettings => ids::ENCODER_SETTINGS,
        KnownField::Lyrics => ids::UNSYNC_LYRICS,
        KnownField::SynchronizedLyrics => ids::SYNC_LYRICS,
        KnownField::Grouping => ids::GROUPING,
        KnownField::RecordLabel => ids::RECORD_LABEL,
        KnownField::Composer => ids::COMPOSER,
        KnownField::Rating => ids::RATING,
    };

    if major_version >= 3 {
        Some(long)
    } else {
        match long {
            ids::UNIQUE_FILE_ID => Some(ids::S_UNIQUE_FILE_ID),
            ids::TITLE => Some(ids::S_TITLE),
            ids::ALBUM => Some(ids::S_ALBUM),
            ids::ARTIST => Some(ids::S_ARTIST),
            ids::COMMENT => Some(ids::S_COMMENT),
            ids::YEAR => Some(ids::S_YEAR),
            ids::RECORD_DATE => Some(ids::S_RECORD_DATE),
            ids::GENRE => Some(ids::S_GENRE),
            ids::TRACK_POSITION => Some(ids::S_TRACK_POSITION),
            ids::DISK_POSITION => Some(ids::S_DISK_POSITION),
            ids::ENCODER => Some(ids::S_ENCODER),
            ids::BPM => Some(ids::S_BPM),
            ids::COVER => Some(ids::S_COVER),
            ids::WRITER => Some(ids::S_WRITER),
            ids::LENGTH => Some(ids::S_LENGTH),
            ids::LANGUAGE => Some(ids::S_LANGUAGE),
            ids::ENCODER_SETTINGS => Some(ids::S_ENCODER_SETTINGS),
            ids::UNSYNC_LYRICS => Some(ids::S_UNSYNC_LYRICS),
            ids::SYNC_LYRICS => Some(ids::S_SYNC_LYRICS),
            ids::GROUPING => Some(ids::S_GROUPING),
            ids::RECORD_LABEL => Some(ids::S_RECORD_LABEL),
            ids::COMPOSER => Some(ids::S_COMPOSER),
            _ => None,
        }
    }
}

/// Proposes a data type for the value carried by a frame.
pub fn proposed_data_type(id: FrameId) -> TagDataType {
    match id {
        ids::LENGTH | ids::S_LENGTH => TagDataType::TimeSpan,
        ids::BPM | ids::S_BPM => TagDataType::Integer,
        ids::TRACK_POSITION | ids::S_TRACK_POSITION | ids::DISK_POSITION | ids::S_DISK_POSITION => {
            TagDataType::PositionInSet
        }
        ids::COVER | ids::S_COVER => TagDataType::Picture,
        _ if id.is_text_frame() => TagDataType::Text,
        _ => TagDataType::Undefined,
    }
}

/// The text encodings an ID3v2 frame can declare.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    Latin1,
    Utf16,
    Utf16Be,
    Utf8,
}

impl Encoding {
    fn parse(byte: u8) -> Self {
        match byte {
            1 => Self::Utf16,
            2 => Self::Utf16Be,
            3 => Self::Utf8,
            _ => Self::Latin1,
        }
    }

    fn render(self) -> u8 {
        match self {
            Self::Latin1 => 0,
            Self::Utf16 => 1,
            Self::Utf16Be => 2,
            Self::Utf8 => 3,
        }
    }
}

fn decode_utf16(data: &[u8], le: bool) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| {
            if le {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .take_while(|&unit| unit != 0)
        .collect();

    String::from_utf16_lossy(&units)
}

fn decode_text(encoding: Encoding, data: &[u8]) -> String {
    match encoding {
        Encoding::Latin1 => data
            .iter()
            .take_while(|&&byte| byte != 0)
            .map(|&byte| byte as char)
            .collect(),
        Encoding::Utf8 => {
            let end = data.iter().position(|&byte| byte == 0).unwrap_or(data.len());
            String::from_utf8_lossy(&data[..end]).into_owned()
        }
        Encoding::Utf16 => match data {
            [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, true),
            [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, false),
            _ => decode_utf16(data, true),
        },
        Encoding::Utf16Be => decode_utf16(data, false),
    }
}

fn encode_text(encoding: Encoding, text: &str) -> Vec<u8> {
    match encoding {
        Encoding::Latin1 => text
            .chars()
            .map(|ch| if (ch as u32) <= 0xFF { ch as u8 } else { b'?' })
            .collect(),
        Encoding::Utf8 => text.as_bytes().to_vec(),
        Encoding::Utf16 => {
            let mut out = vec![0xFF, 0xFE];
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out
        }
        Encoding::Utf16Be => text
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes().to_vec())
            .collect(),
    }
}

/// The value carried by a frame.
///
/// The core only distinguishes text from everything else; structured frame
/// bodies are consumed as opaque binary values.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameValue {
    Text { encoding: Encoding, text: String },
    Binary(Vec<u8>),
}

/// A single ID3v2 frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    id: FrameId,
    flags: u16,
    value: FrameValue,
}

impl Frame {
    /// Creates a text frame.
    pub fn text(id: FrameId, text: impl Into<String>) -> Self {
        Self {
            id,
            flags: 0,
            value: FrameValue::Text {
                encoding: Encoding::Utf8,
                text: text.into(),
            },
        }
    }

    /// Creates a frame with an opaque binary value.
    pub fn binary(id: FrameId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            flags: 0,
            value: FrameValue::Binary(data.into()),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn value(&self) -> &FrameValue {
        &self.value
    }

    /// Prepares writing this frame for the given tag version.
    pub(crate) fn prepare_making(
        &self,
        major_version: u8,
        diag: &mut Diagnostics,
    ) -> Result<FrameMaker> {
        const CONTEXT: &str = "making ID3v2 frame";

        let id = match self.id.to_long() {
            Some(id) => id,
            None => {
                diag.push(
                    DiagLevel::Critical,
                    format!(
                        "the frame {} cannot be written because its identifier has no ID3v2.{} equivalent",
                        self.id, major_version
                    ),
                    CONTEXT,
                );
                return Err(Error::InvalidData);
            }
        };

        let data = match &self.value {
            FrameValue::Text { encoding, text } => {
                // ID3v2.3 predates the UTF-8 encoding.
                let encoding = match encoding {
                    Encoding::Utf8 if major_version < 4 => Encoding::Utf16,
                    encoding => *encoding,
                };

                let mut data = vec![encoding.render()];
                data.extend(encode_text(encoding, text));
                data
            }
            FrameValue::Binary(data) => data.clone(),
        };

        // Frame sizes are synchsafe in ID3v2.4 and must fit 28 bits anyway.
        if data.len() > 0x0FFF_FFFF {
            diag.push(
                DiagLevel::Critical,
                format!("the frame {} is too large to be written", id),
                CONTEXT,
            );
            return Err(Error::InvalidData);
        }

        Ok(FrameMaker {
            id,
            flags: self.flags,
            major_version,
            data,
        })
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.value {
            FrameValue::Text { text, .. } => write![f, "{}", text],
            FrameValue::Binary(data) => write![f, "<{} bytes>", data.len()],
        }
    }
}

/// The outcome of attempting to parse one frame.
pub(crate) enum FrameParseOutcome {
    /// A frame was parsed and consumed from the stream.
    Frame(Frame),
    /// An all-zero identifier was found; the rest of the region is padding.
    Padding,
    /// The frame was malformed but could be skipped over.
    Skipped,
}

/// Parses one frame from `stream`, which must span the remaining frame
/// region of the tag.
pub(crate) fn parse(
    stream: &mut BufStream,
    major_version: u8,
    diag: &mut Diagnostics,
) -> Result<FrameParseOutcome> {
    const CONTEXT: &str = "parsing ID3v2 frame";

    let (id, size, flags) = match major_version {
        2 => {
            let raw: [u8; 3] = stream.read_array()?;
            if raw == [0; 3] {
                return Ok(FrameParseOutcome::Padding);
            }

            (FrameId::parse_short(raw), stream.read_be_u24()? as usize, 0)
        }
        3 | 4 => {
            let raw: [u8; 4] = stream.read_array()?;
            if raw == [0; 4] {
                return Ok(FrameParseOutcome::Padding);
            }

            let size = match major_version {
                4 => syncdata::to_u28(stream.read_array()?) as usize,
                _ => stream.read_be_u32()? as usize,
            };

            (FrameId::parse_long(raw), size, stream.read_be_u16()?)
        }
        _ => return Err(Error::VersionNotSupported),
    };

    let id = match id {
        Ok(id) => id,
        Err(_) => {
            warn!("encountered a frame with an invalid identifier");
            diag.push(
                DiagLevel::Warning,
                "a frame with an invalid identifier will be skipped",
                CONTEXT,
            );
            stream.skip(usize::min(size, stream.remaining()))?;
            return Ok(FrameParseOutcome::Skipped);
        }
    };

    if size == 0 {
        diag.push(
            DiagLevel::Warning,
            format!("the frame {} is empty and will be skipped", id),
            CONTEXT,
        );
        return Ok(FrameParseOutcome::Skipped);
    }

    let data = match stream.slice(size) {
        Ok(data) => data,
        Err(err) => {
            diag.push(
                DiagLevel::Critical,
                format!("the frame {} is truncated", id),
                CONTEXT,
            );
            return Err(err);
        }
    };

    let value = if id.is_text_frame() {
        let encoding = Encoding::parse(data[0]);
        FrameValue::Text {
            encoding,
            text: decode_text(encoding, &data[1..]),
        }
    } else {
        FrameValue::Binary(data.to_vec())
    };

    Ok(FrameParseOutcome::Frame(Frame { id, flags, value }))
}

/// Writes one frame; created by [`Frame::prepare_making`].
pub(crate) struct FrameMaker {
    id: FrameId,
    flags: u16,
    major_version: u8,
    data: Vec<u8>,
}

impl FrameMaker {
    /// The exact number of bytes [`make`](Self::make) will write.
    pub fn required_size(&self) -> u64 {
        10 + self.data.len() as u64
    }

    pub fn make(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.id.value().to_be_bytes())?;

        let size = self.data.len() as u32;
        match self.major_version {
            4 => writer.write_all(&syncdata::from_u28(size))?,
            _ => writer.write_all(&size.to_be_bytes())?,
        }

        writer.write_all(&self.flags.to_be_bytes())?;
        writer.write_all(&self.data)
    }
}

/// Structure-level view of an ID3v2 frame region for the element tree.
///
/// This adapter only decodes frame framing (identifier, size, flags), which
/// is enough to walk a frame region, validate its structure, and account
/// for padding. An all-zero identifier turns the remainder of the region
/// into a single padding element.
pub struct Id3v2FrameFormat {
    pub major_version: u8,
}

impl Id3v2FrameFormat {
    fn id_length(&self) -> u32 {
        if self.major_version < 3 {
            3
        } else {
            4
        }
    }
}

impl ElementFormat for Id3v2FrameFormat {
    type Id = FrameId;

    fn min_element_size(&self) -> u64 {
        if self.major_version < 3 {
            6
        } else {
            10
        }
    }

    fn read_header<R: Read + Seek>(
        &self,
        reader: &mut R,
        start: u64,
        max_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<ElementHeader<FrameId>> {
        const CONTEXT: &str = "parsing ID3v2 frame header";

        if max_size < self.min_element_size() {
            diag.push(
                DiagLevel::Critical,
                format!("the frame at offset {} is truncated", start),
                CONTEXT,
            );
            return Err(Error::TruncatedData);
        }

        reader.seek(SeekFrom::Start(start))?;

        let id_length = self.id_length();
        let mut raw = [0; 4];
        reader.read_exact(&mut raw[..id_length as usize])?;

        // An all-zero identifier marks the start of padding, which extends
        // to the end of the region.
        if raw[..id_length as usize].iter().all(|&byte| byte == 0) {
            return Ok(ElementHeader {
                id: FrameId(0),
                id_length,
                size_length: 0,
                data_size: max_size - u64::from(id_length),
                size_unknown: false,
            });
        }

        let id = if self.major_version < 3 {
            FrameId::parse_short([raw[0], raw[1], raw[2]])
        } else {
            FrameId::parse_long(raw)
        };

        let id = id.map_err(|err| {
            diag.push(
                DiagLevel::Critical,
                format!("the frame at offset {} has an invalid identifier", start),
                CONTEXT,
            );
            err
        })?;

        let (data_size, size_length) = if self.major_version < 3 {
            let mut size = [0; 3];
            reader.read_exact(&mut size)?;
            let size = u32::from(size[0]) << 16 | u32::from(size[1]) << 8 | u32::from(size[2]);
            (u64::from(size), 3)
        } else {
            let mut size = [0; 4];
            reader.read_exact(&mut size)?;
            let size = match self.major_version {
                4 => syncdata::to_u28(size),
                _ => u32::from_be_bytes(size),
            };

            let mut flags = [0; 2];
            reader.read_exact(&mut flags)?;

            // The two flag bytes are counted into the size denotation.
            (u64::from(size), 6)
        };

        Ok(ElementHeader {
            id,
            id_length,
            size_length,
            data_size,
            size_unknown: false,
        })
    }

    fn is_parent(&self, _header: &ElementHeader<FrameId>) -> bool {
        false
    }

    fn is_padding(&self, header: &ElementHeader<FrameId>) -> bool {
        header.id.value() == 0
    }

    fn first_child_offset(&self, _header: &ElementHeader<FrameId>) -> u64 {
        0
    }

    fn id_to_string(&self, id: FrameId) -> String {
        if id.value() == 0 {
            String::from("padding")
        } else {
            id.to_string()
        }
    }
}

/// The frames of a tag, keyed by identifier.
///
/// Iteration follows insertion order; the on-disk order is produced by
/// [`sorted`](FrameMap::sorted) using [`frame_order`].
#[derive(Clone, Debug, Default)]
pub struct FrameMap {
    map: IndexMap<FrameId, Frame>,
}

impl FrameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a frame, replacing and returning any frame with the same
    /// identifier.
    pub fn insert(&mut self, frame: Frame) -> Option<Frame> {
        let replaced = self.map.insert(frame.id(), frame);
        if let Some(replaced) = &replaced {
            info!("replacing existing frame {}", replaced.id());
        }
        replaced
    }

    /// Inserts a frame unless one with the same identifier exists.
    pub fn add(&mut self, frame: Frame) {
        self.map.entry(frame.id()).or_insert(frame);
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.map.get(&id)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.map.get_mut(&id)
    }

    pub fn remove(&mut self, id: FrameId) -> Option<Frame> {
        self.map.shift_remove(&id)
    }

    pub fn contains(&self, id: FrameId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn keys(&self) -> Keys<FrameId, Frame> {
        self.map.keys()
    }

    pub fn values(&self) -> Values<FrameId, Frame> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear()
    }

    /// The frames in their on-disk order.
    pub fn sorted(&self) -> Vec<&Frame> {
        let mut frames: Vec<&Frame> = self.map.values().collect();
        frames.sort_by(|lhs, rhs| frame_order(lhs.id(), rhs.id()));
        frames
    }
}

impl Index<FrameId> for FrameMap {
    type Output = Frame;

    fn index(&self, id: FrameId) -> &Self::Output {
        &self.map[&id]
    }
}

impl<'a> IntoIterator for &'a FrameMap {
    type Item = (&'a FrameId, &'a Frame);
    type IntoIter = Iter<'a, FrameId, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_order() {
        let mut map = FrameMap::new();
        map.insert(Frame::text(ids::TITLE, "Title"));
        map.insert(Frame::binary(ids::COVER, vec![0; 4]));
        map.insert(Frame::binary(ids::UNIQUE_FILE_ID, vec![1]));
        map.insert(Frame::text(ids::ALBUM, "Album"));

        let order: Vec<FrameId> = map.sorted().iter().map(|frame| frame.id()).collect();
        assert_eq!(
            order,
            [ids::UNIQUE_FILE_ID, ids::TITLE, ids::ALBUM, ids::COVER]
        );
    }

    #[test]
    fn order_normalizes_short_identifiers() {
        assert_eq!(frame_order(ids::S_TITLE, ids::ALBUM), Ordering::Less);
        assert_eq!(frame_order(ids::ALBUM, ids::S_TITLE), Ordering::Greater);
        assert_eq!(frame_order(ids::S_COVER, ids::RATING), Ordering::Greater);
        assert_eq!(frame_order(ids::TITLE, ids::TITLE), Ordering::Equal);
        // Text frames precede non-text frames.
        assert_eq!(frame_order(ids::ALBUM, ids::RATING), Ordering::Less);
    }

    #[test]
    fn field_tables_cover_both_id_widths() {
        assert_eq!(known_field(ids::TITLE), Some(KnownField::Title));
        assert_eq!(known_field(ids::S_TITLE), Some(KnownField::Title));
        assert_eq!(known_field(ids::USER_TEXT), None);

        assert_eq!(field_id(KnownField::Cover, 3), Some(ids::COVER));
        assert_eq!(field_id(KnownField::Cover, 2), Some(ids::S_COVER));
        assert_eq!(field_id(KnownField::Rating, 2), None);
    }

    #[test]
    fn data_type_proposals() {
        assert_eq!(proposed_data_type(ids::LENGTH), TagDataType::TimeSpan);
        assert_eq!(proposed_data_type(ids::BPM), TagDataType::Integer);
        assert_eq!(proposed_data_type(ids::TRACK_POSITION), TagDataType::PositionInSet);
        assert_eq!(proposed_data_type(ids::COVER), TagDataType::Picture);
        assert_eq!(proposed_data_type(ids::ALBUM), TagDataType::Text);
        assert_eq!(proposed_data_type(ids::UNIQUE_FILE_ID), TagDataType::Undefined);
        assert_eq!(proposed_data_type(ids::USER_TEXT), TagDataType::Undefined);
    }

    #[test]
    fn text_payloads_decode_by_declared_encoding() {
        let latin1 = b"\x00Caf\xE9";
        let mut diag = Diagnostics::new();
        let mut data = b"TIT2".to_vec();
        data.extend_from_slice(&(latin1.len() as u32).to_be_bytes());
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(latin1);

        match parse(&mut BufStream::new(&data), 3, &mut diag).unwrap() {
            FrameParseOutcome::Frame(frame) => {
                assert_eq!(frame.to_string(), "Café");
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn utf16_text_honors_byte_order_marks() {
        assert_eq!(
            decode_text(Encoding::Utf16, &[0xFF, 0xFE, 0x48, 0x00, 0x69, 0x00]),
            "Hi"
        );
        assert_eq!(
            decode_text(Encoding::Utf16, &[0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69]),
            "Hi"
        );
        assert_eq!(decode_text(Encoding::Utf16Be, &[0x00, 0x48]), "H");
    }

    #[test]
    fn makers_render_version_specific_sizes() {
        let frame = Frame::text(ids::TITLE, "Hi");
        let mut diag = Diagnostics::new();

        // ID3v2.4 keeps UTF-8 and writes a synchsafe size.
        let maker = frame.prepare_making(4, &mut diag).unwrap();
        let mut out = Vec::new();
        maker.make(&mut out).unwrap();
        assert_eq!(out[..4], *b"TIT2");
        assert_eq!(&out[4..8], &[0, 0, 0, 3]);
        assert_eq!(&out[10..], &[3, b'H', b'i']);
        assert_eq!(maker.required_size(), out.len() as u64);

        // ID3v2.3 falls back to UTF-16 with a byte order mark.
        let maker = frame.prepare_making(3, &mut diag).unwrap();
        let mut out = Vec::new();
        maker.make(&mut out).unwrap();
        assert_eq!(&out[10..], &[1, 0xFF, 0xFE, b'H', 0, b'i', 0]);
    }

    #[test]
    fn short_frames_upgrade_on_write() {
        let frame = Frame::text(ids::S_TITLE, "Hi");
        let mut diag = Diagnostics::new();
        let maker = frame.prepare_making(4, &mut diag).unwrap();

        let mut out = Vec::new();
        maker.make(&mut out).unwrap();
        assert_eq!(out[..4], *b"TIT2");
    }

    #[test]
    fn frame_regions_walk_as_elements() {
        use crate::element::ElementTree;
        use std::io::Cursor;

        let mut region = b"TIT2".to_vec();
        region.extend_from_slice(&3u32.to_be_bytes());
        region.extend_from_slice(&[0, 0]);
        region.extend_from_slice(&[0x00, b'H', b'i']);
        region.extend_from_slice(&[0; 10]);
        let len = region.len() as u64;

        let mut reader = Cursor::new(region);
        let format = Id3v2FrameFormat { major_version: 3 };
        let mut tree = ElementTree::new(format, &mut reader, 0, len);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        tree.parse(root, &mut diag).unwrap();
        assert_eq!(tree.id(root), ids::TITLE);
        assert_eq!(tree.header_size(root), 10);
        assert_eq!(tree.total_size(root), 13);
        assert!(!tree.is_padding(root));

        let mut padding = 0;
        tree.validate_structure(root, &mut diag, &mut padding).unwrap();
        assert_eq!(padding, 10);
        assert!(diag.is_empty());
    }

    #[test]
    fn zero_sized_frames_are_skipped() {
        let mut data = b"TIT2".to_vec();
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        data.extend_from_slice(b"TALB");
        let mut diag = Diagnostics::new();

        let mut stream = BufStream::new(&data);
        assert!(matches!(
            parse(&mut stream, 3, &mut diag).unwrap(),
            FrameParseOutcome::Skipped
        ));
        assert!(diag.has(DiagLevel::Warning));
        // The next frame header is up next.
        assert_eq!(stream.peek(0..4).unwrap(), b"TALB");
    }
}
