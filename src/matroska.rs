//! Matroska/WebM structure: the EBML-backed element format and the
//! "Cues" position updater used when rewriting files.

use crate::diag::{DiagLevel, Diagnostics};
use crate::ebml;
use crate::element::{ElementFormat, ElementHeader, ElementRef, ElementTree};
use crate::error::{Error, Result};

use log::debug;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

/// Matroska element ids, in their raw form (marker bits included).
pub mod ids {
    pub const EBML_HEADER: u32 = 0x1A45_DFA3;
    pub const VOID: u32 = 0xEC;
    pub const CRC32: u32 = 0xBF;
    pub const SEGMENT: u32 = 0x1853_8067;
    pub const SEEK_HEAD: u32 = 0x114D_9B74;
    pub const SEEK: u32 = 0x4DBB;
    pub const INFO: u32 = 0x1549_A966;
    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TAGS: u32 = 0x1254_C367;
    pub const TAG: u32 = 0x7373;
    pub const TARGETS: u32 = 0x63C0;
    pub const SIMPLE_TAG: u32 = 0x67C8;
    pub const ATTACHMENTS: u32 = 0x1941_A469;
    pub const ATTACHED_FILE: u32 = 0x61A7;
    pub const CHAPTERS: u32 = 0x1043_A770;
    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
    pub const CUE_RELATIVE_POSITION: u32 = 0xF0;
    pub const CUE_DURATION: u32 = 0xB2;
    pub const CUE_BLOCK_NUMBER: u32 = 0x5378;
    pub const CUE_CODEC_STATE: u32 = 0xEA;
    pub const CUE_REFERENCE: u32 = 0xDB;
    pub const CUE_REF_TIME: u32 = 0x96;
    pub const CUE_REF_CLUSTER: u32 = 0x97;
    pub const CUE_REF_NUMBER: u32 = 0x535F;
    pub const CUE_REF_CODEC_STATE: u32 = 0xEB;

    /// The master elements this crate descends into.
    pub(crate) const MASTERS: &[u32] = &[
        EBML_HEADER,
        SEGMENT,
        SEEK_HEAD,
        SEEK,
        INFO,
        CLUSTER,
        TRACKS,
        TRACK_ENTRY,
        TAGS,
        TAG,
        TARGETS,
        SIMPLE_TAG,
        ATTACHMENTS,
        ATTACHED_FILE,
        CHAPTERS,
        CUES,
        CUE_POINT,
        CUE_TRACK_POSITIONS,
        CUE_REFERENCE,
    ];

    pub(crate) fn name(id: u32) -> Option<&'static str> {
        Some(match id {
            EBML_HEADER => "EBML",
            VOID => "Void",
            CRC32 => "Crc32",
            SEGMENT => "Segment",
            SEEK_HEAD => "SeekHead",
            SEEK => "Seek",
            INFO => "Info",
            CLUSTER => "Cluster",
            TRACKS => "Tracks",
            TRACK_ENTRY => "TrackEntry",
            TAGS => "Tags",
            TAG => "Tag",
            TARGETS => "Targets",
            SIMPLE_TAG => "SimpleTag",
            ATTACHMENTS => "Attachments",
            ATTACHED_FILE => "AttachedFile",
            CHAPTERS => "Chapters",
            CUES => "Cues",
            CUE_POINT => "CuePoint",
            CUE_TIME => "CueTime",
            CUE_TRACK_POSITIONS => "CueTrackPositions",
            CUE_TRACK => "CueTrack",
            CUE_CLUSTER_POSITION => "CueClusterPosition",
            CUE_RELATIVE_POSITION => "CueRelativePosition",
            CUE_DURATION => "CueDuration",
            CUE_BLOCK_NUMBER => "CueBlockNumber",
            CUE_CODEC_STATE => "CueCodecState",
            CUE_REFERENCE => "CueReference",
            CUE_REF_TIME => "CueRefTime",
            CUE_REF_CLUSTER => "CueRefCluster",
            CUE_REF_NUMBER => "CueRefNumber",
            CUE_REF_CODEC_STATE => "CueRefCodecState",
            _ => return None,
        })
    }
}

/// The EBML element format as used by Matroska and WebM.
pub struct MatroskaFormat;

impl ElementFormat for MatroskaFormat {
    type Id = u32;

    fn min_element_size(&self) -> u64 {
        2
    }

    fn read_header<R: Read + Seek>(
        &self,
        reader: &mut R,
        start: u64,
        max_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<ElementHeader<u32>> {
        const CONTEXT: &str = "parsing EBML element header";

        if max_size < 2 {
            diag.push(
                DiagLevel::Critical,
                format!("the EBML element at offset {} is truncated", start),
                CONTEXT,
            );
            return Err(Error::TruncatedData);
        }

        reader.seek(SeekFrom::Start(start))?;

        let (id, id_length) = ebml::read_id(reader).map_err(|err| {
            if !err.is_io() {
                diag.push(
                    DiagLevel::Critical,
                    format!("the id of the EBML element at offset {} is invalid", start),
                    CONTEXT,
                );
            }
            err
        })?;

        if u64::from(id_length) >= max_size {
            diag.push(
                DiagLevel::Critical,
                format!("the EBML element at offset {} has no size denotation", start),
                CONTEXT,
            );
            return Err(Error::TruncatedData);
        }

        let (size, size_length) = ebml::read_size(reader).map_err(|err| {
            if !err.is_io() {
                diag.push(
                    DiagLevel::Critical,
                    format!("the size denotation of the EBML element at offset {} is invalid", start),
                    CONTEXT,
                );
            }
            err
        })?;

        let header_size = u64::from(id_length + size_length);
        let (data_size, size_unknown) = match size {
            Some(size) => (size, false),
            // Streamed elements omit their size; they extend to whatever
            // space the parent leaves.
            None => (max_size - header_size, true),
        };

        Ok(ElementHeader {
            id,
            id_length,
            size_length,
            data_size,
            size_unknown,
        })
    }

    fn is_parent(&self, header: &ElementHeader<u32>) -> bool {
        ids::MASTERS.contains(&header.id)
    }

    fn is_padding(&self, header: &ElementHeader<u32>) -> bool {
        header.id == ids::VOID
    }

    fn first_child_offset(&self, header: &ElementHeader<u32>) -> u64 {
        if self.is_parent(header) {
            header.header_size()
        } else {
            0
        }
    }

    fn id_to_string(&self, id: u32) -> String {
        match ids::name(id) {
            Some(name) => format!("\"{}\" (0x{:X})", name, id),
            None => format!("0x{:X}", id),
        }
    }
}

/// Reads the payload of an element as a big-endian unsigned integer.
pub fn read_uinteger<R: Read + Seek>(
    tree: &mut ElementTree<'_, R, MatroskaFormat>,
    elem: ElementRef,
    diag: &mut Diagnostics,
) -> Result<u64> {
    tree.parse(elem, diag)?;

    if tree.data_size(elem) > 8 {
        diag.push(
            DiagLevel::Critical,
            format!(
                "the unsigned integer payload of the element {} is larger than eight bytes",
                tree.id_to_string(elem)
            ),
            "parsing EBML unsigned integer",
        );
        return Err(Error::InvalidData);
    }

    let data = tree.read_data(elem, diag)?;
    ebml::parse_uinteger(&data)
}

/// An absolute position recorded while parsing the "Cues" element.
#[derive(Clone, Copy, Debug)]
pub struct CueOffset {
    initial: u64,
    current: u64,
}

impl CueOffset {
    fn new(value: u64) -> Self {
        Self {
            initial: value,
            current: value,
        }
    }

    pub fn initial(&self) -> u64 {
        self.initial
    }

    pub fn current(&self) -> u64 {
        self.current
    }
}

/// A position relative to a referenced absolute offset.
#[derive(Clone, Copy, Debug)]
pub struct CueRelativeOffset {
    reference: u64,
    initial: u64,
    current: u64,
}

impl CueRelativeOffset {
    fn new(reference: u64, value: u64) -> Self {
        Self {
            reference,
            initial: value,
            current: value,
        }
    }

    pub fn reference(&self) -> u64 {
        self.reference
    }

    pub fn initial(&self) -> u64 {
        self.initial
    }

    pub fn current(&self) -> u64 {
        self.current
    }
}

const PARSE_CONTEXT: &str = "parsing \"Cues\" element";
const MAKE_CONTEXT: &str = "making \"Cues\" element";

/// Rewrites the "Cues" element with shifted positions.
///
/// Rewriting a Matroska file moves every cluster, so every absolute offset
/// recorded in the index must change. Offsets are stored with minimal-width
/// encoding, so a changed offset can change its element's size, which
/// changes the parent's size, which can change the width of the parent's
/// size denotation, recursively. This type reparses the original index,
/// tracks those cascades, and replays the structure with updated values.
#[derive(Default)]
pub struct CuePositionUpdater {
    cues: Option<ElementRef>,
    sizes: HashMap<ElementRef, u64>,
    offsets: HashMap<ElementRef, CueOffset>,
    relative_offsets: HashMap<ElementRef, CueRelativeOffset>,
}

impl CuePositionUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all parsing results and updates.
    pub fn clear(&mut self) {
        self.cues = None;
        self.sizes.clear();
        self.offsets.clear();
        self.relative_offsets.clear();
    }

    /// Returns how many bytes [`make`](Self::make) will write. The value
    /// changes when offsets are updated.
    pub fn total_size(&self) -> u64 {
        match self.cues {
            Some(cues) => {
                let size = self.sizes[&cues];
                4 + u64::from(ebml::calculate_size_denotation_length(size)) + size
            }
            None => 0,
        }
    }

    /// Parses the given "Cues" element, recording every tracked size and
    /// offset. Previous parsing results and updates are cleared.
    ///
    /// Fixed-payload children are buffered so their bytes survive when the
    /// source region is overwritten during make.
    pub fn parse<R: Read + Seek>(
        &mut self,
        tree: &mut ElementTree<'_, R, MatroskaFormat>,
        cues: ElementRef,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        self.clear();
        tree.parse(cues, diag)?;

        let mut cues_size = 0;
        let mut point_iter = tree.first_child(cues);

        while let Some(point) = point_iter {
            tree.parse(point, diag)?;
            match tree.id(point) {
                ids::VOID | ids::CRC32 => {}
                ids::CUE_POINT => {
                    let point_size = self.parse_cue_point(tree, point, diag)?;
                    cues_size +=
                        1 + u64::from(ebml::calculate_size_denotation_length(point_size)) + point_size;
                    self.sizes.insert(point, point_size);
                }
                _ => diag.push(
                    DiagLevel::Warning,
                    "the \"Cues\" element contains an element which is not a \"CuePoint\" element; it will be ignored",
                    PARSE_CONTEXT,
                ),
            }
            point_iter = tree.next_sibling(point);
        }

        self.sizes.insert(cues, cues_size);
        self.cues = Some(cues);

        Ok(())
    }

    fn parse_cue_point<R: Read + Seek>(
        &mut self,
        tree: &mut ElementTree<'_, R, MatroskaFormat>,
        point: ElementRef,
        diag: &mut Diagnostics,
    ) -> Result<u64> {
        let mut point_size = 0;
        let mut child_iter = tree.first_child(point);

        while let Some(child) = child_iter {
            tree.parse(child, diag)?;
            match tree.id(child) {
                ids::VOID | ids::CRC32 => {}
                ids::CUE_TIME => {
                    tree.make_buffer(child)?;
                    point_size += tree.total_size(child);
                }
                ids::CUE_TRACK_POSITIONS => {
                    let positions_size = self.parse_track_positions(tree, child, diag)?;
                    point_size += 1
                        + u64::from(ebml::calculate_size_denotation_length(positions_size))
                        + positions_size;
                    self.sizes.insert(child, positions_size);
                }
                _ => diag.push(
                    DiagLevel::Warning,
                    "the \"CuePoint\" element contains an element which is not a \"CueTime\" or a \"CueTrackPositions\" element; it will be ignored",
                    PARSE_CONTEXT,
                ),
            }
            child_iter = tree.next_sibling(child);
        }

        Ok(point_size)
    }

    fn parse_track_positions<R: Read + Seek>(
        &mut self,
        tree: &mut ElementTree<'_, R, MatroskaFormat>,
        positions: ElementRef,
        diag: &mut Diagnostics,
    ) -> Result<u64> {
        let mut positions_size = 0;
        let mut cluster_position = None;
        let mut relative = None;
        let mut child_iter = tree.first_child(positions);

        while let Some(child) = child_iter {
            tree.parse(child, diag)?;
            match tree.id(child) {
                ids::VOID | ids::CRC32 => {}
                ids::CUE_TRACK | ids::CUE_DURATION | ids::CUE_BLOCK_NUMBER => {
                    tree.make_buffer(child)?;
                    positions_size += tree.total_size(child);
                }
                ids::CUE_RELATIVE_POSITION => {
                    relative = Some((child, read_uinteger(tree, child, diag)?));
                }
                ids::CUE_CLUSTER_POSITION => {
                    let position = read_uinteger(tree, child, diag)?;
                    cluster_position = Some(position);
                    positions_size += 2 + u64::from(ebml::calculate_uinteger_length(position));
                    self.offsets.insert(child, CueOffset::new(position));
                }
                ids::CUE_CODEC_STATE => {
                    let state = read_uinteger(tree, child, diag)?;
                    positions_size += 2 + u64::from(ebml::calculate_uinteger_length(state));
                    self.offsets.insert(child, CueOffset::new(state));
                }
                ids::CUE_REFERENCE => {
                    let reference_size = self.parse_reference(tree, child, diag)?;
                    positions_size += 1
                        + u64::from(ebml::calculate_size_denotation_length(reference_size))
                        + reference_size;
                    self.sizes.insert(child, reference_size);
                }
                _ => diag.push(
                    DiagLevel::Warning,
                    "the \"CueTrackPositions\" element contains an element which is not known to the parser; it will be ignored",
                    PARSE_CONTEXT,
                ),
            }
            child_iter = tree.next_sibling(child);
        }

        match cluster_position {
            None => diag.push(
                DiagLevel::Critical,
                "the \"CueTrackPositions\" element does not contain the mandatory \"CueClusterPosition\" element",
                PARSE_CONTEXT,
            ),
            Some(position) => {
                // The relative position can only be resolved against the
                // absolute cluster position, so it is registered last.
                if let Some((elem, value)) = relative {
                    positions_size += 2 + u64::from(ebml::calculate_uinteger_length(value));
                    self.relative_offsets
                        .insert(elem, CueRelativeOffset::new(position, value));
                }
            }
        }

        Ok(positions_size)
    }

    fn parse_reference<R: Read + Seek>(
        &mut self,
        tree: &mut ElementTree<'_, R, MatroskaFormat>,
        reference: ElementRef,
        diag: &mut Diagnostics,
    ) -> Result<u64> {
        let mut reference_size = 0;
        let mut child_iter = tree.first_child(reference);

        while let Some(child) = child_iter {
            tree.parse(child, diag)?;
            match tree.id(child) {
                ids::VOID | ids::CRC32 => {}
                ids::CUE_REF_TIME | ids::CUE_REF_NUMBER => {
                    tree.make_buffer(child)?;
                    reference_size += tree.total_size(child);
                }
                ids::CUE_REF_CLUSTER | ids::CUE_REF_CODEC_STATE => {
                    let position = read_uinteger(tree, child, diag)?;
                    reference_size += 2 + u64::from(ebml::calculate_uinteger_length(position));
                    self.offsets.insert(child, CueOffset::new(position));
                }
                _ => diag.push(
                    DiagLevel::Warning,
                    "the \"CueReference\" element contains an element which is not known to the parser; it will be ignored",
                    PARSE_CONTEXT,
                ),
            }
            child_iter = tree.next_sibling(child);
        }

        Ok(reference_size)
    }

    /// Sets every tracked absolute offset whose initial value is
    /// `original_offset` to `new_offset`, shifting the enclosing sizes when
    /// the minimal encoding width changes.
    ///
    /// Returns whether the size of the "Cues" element has been altered.
    pub fn update_offsets<R>(
        &mut self,
        tree: &ElementTree<'_, R, MatroskaFormat>,
        original_offset: u64,
        new_offset: u64,
    ) -> bool {
        let mut updated = false;
        let matches: Vec<ElementRef> = self
            .offsets
            .iter()
            .filter(|(_, offset)| offset.initial() == original_offset && offset.current() != new_offset)
            .map(|(&elem, _)| elem)
            .collect();

        for elem in matches {
            let current = self.offsets[&elem].current();
            let shift = i64::from(ebml::calculate_uinteger_length(new_offset))
                - i64::from(ebml::calculate_uinteger_length(current));
            updated = self.update_size(tree, tree.parent(elem), shift) || updated;
            self.offsets.get_mut(&elem).expect("offset was just looked up").current = new_offset;
        }

        updated
    }

    /// Sets every tracked relative offset with the given reference and
    /// initial value to `new_relative_offset`.
    ///
    /// Returns whether the size of the "Cues" element has been altered.
    pub fn update_relative_offsets<R>(
        &mut self,
        tree: &ElementTree<'_, R, MatroskaFormat>,
        reference_offset: u64,
        original_relative_offset: u64,
        new_relative_offset: u64,
    ) -> bool {
        let mut updated = false;
        let matches: Vec<ElementRef> = self
            .relative_offsets
            .iter()
            .filter(|(_, offset)| {
                offset.reference() == reference_offset
                    && offset.initial() == original_relative_offset
                    && offset.current() != new_relative_offset
            })
            .map(|(&elem, _)| elem)
            .collect();

        for elem in matches {
            let current = self.relative_offsets[&elem].current();
            let shift = i64::from(ebml::calculate_uinteger_length(new_relative_offset))
                - i64::from(ebml::calculate_uinteger_length(current));
            updated = self.update_size(tree, tree.parent(elem), shift) || updated;
            self.relative_offsets
                .get_mut(&elem)
                .expect("offset was just looked up")
                .current = new_relative_offset;
        }

        updated
    }

    /// Shifts the tracked size of `elem` by `shift` bytes and propagates the
    /// change upwards, accounting for size denotations whose width changes.
    ///
    /// A shift that leaves the tracked scope reports `true`: the outer
    /// container has to grow or shrink by that amount.
    fn update_size<R>(
        &mut self,
        tree: &ElementTree<'_, R, MatroskaFormat>,
        elem: Option<ElementRef>,
        shift: i64,
    ) -> bool {
        if shift == 0 {
            return false;
        }

        let elem = match elem {
            Some(elem) => elem,
            None => return true,
        };

        let size = match self.sizes.get(&elem) {
            Some(&size) => size,
            // The element is outside the scope of the updater, likely the
            // Segment element.
            None => return true,
        };

        let new_size = if shift > 0 {
            size + shift as u64
        } else {
            size - shift.unsigned_abs()
        };

        let denotation_shift = i64::from(ebml::calculate_size_denotation_length(new_size))
            - i64::from(ebml::calculate_size_denotation_length(size));
        let updated = self.update_size(tree, tree.parent(elem), shift + denotation_shift);
        self.sizes.insert(elem, new_size);

        updated
    }

    /// Writes the previously parsed "Cues" element with the updated
    /// positions to `target`.
    ///
    /// Exactly [`total_size`](Self::total_size) bytes are written. An
    /// inconsistency between the parse and make phases aborts with a
    /// Critical diagnostic and [`Error::InvalidData`].
    pub fn make<R: Read + Seek, W: Write>(
        &self,
        tree: &mut ElementTree<'_, R, MatroskaFormat>,
        target: &mut W,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let cues = match self.cues {
            Some(cues) => cues,
            None => {
                diag.push(
                    DiagLevel::Warning,
                    "no index is written because the \"Cues\" element of the source file could not be parsed",
                    MAKE_CONTEXT,
                );
                return Ok(());
            }
        };

        let mut buffer = [0; 8];

        target.write_all(&ids::CUES.to_be_bytes())?;
        let length = ebml::make_size_denotation(self.tracked_size(cues, diag)?, &mut buffer)?;
        target.write_all(&buffer[..length])?;

        let mut point_iter = tree.first_child(cues);
        while let Some(point) = point_iter {
            tree.parse(point, diag)?;
            match tree.id(point) {
                ids::VOID | ids::CRC32 => {}
                ids::CUE_POINT => self.make_cue_point(tree, point, target, diag)?,
                _ => {}
            }
            point_iter = tree.next_sibling(point);
        }

        Ok(())
    }

    fn make_cue_point<R: Read + Seek, W: Write>(
        &self,
        tree: &mut ElementTree<'_, R, MatroskaFormat>,
        point: ElementRef,
        target: &mut W,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let mut buffer = [0; 8];

        target.write_all(&[ids::CUE_POINT as u8])?;
        let length = ebml::make_size_denotation(self.tracked_size(point, diag)?, &mut buffer)?;
        target.write_all(&buffer[..length])?;

        let mut child_iter = tree.first_child(point);
        while let Some(child) = child_iter {
            tree.parse(child, diag)?;
            match tree.id(child) {
                ids::VOID | ids::CRC32 => {}
                ids::CUE_TIME => {
                    tree.copy_buffer(child, target)?;
                }
                ids::CUE_TRACK_POSITIONS => {
                    self.make_track_positions(tree, child, target, diag)?;
                }
                _ => {}
            }
            child_iter = tree.next_sibling(child);
        }

        Ok(())
    }

    fn make_track_positions<R: Read + Seek, W: Write>(
        &self,
        tree: &mut ElementTree<'_, R, MatroskaFormat>,
        positions: ElementRef,
        target: &mut W,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let mut buffer = [0; 8];

        target.write_all(&[ids::CUE_TRACK_POSITIONS as u8])?;
        let length = ebml::make_size_denotation(self.tracked_size(positions, diag)?, &mut buffer)?;
        target.write_all(&buffer[..length])?;

        let mut child_iter = tree.first_child(positions);
        while let Some(child) = child_iter {
            tree.parse(child, diag)?;
            let id = tree.id(child);
            match id {
                ids::VOID | ids::CRC32 => {}
                ids::CUE_TRACK | ids::CUE_DURATION | ids::CUE_BLOCK_NUMBER => {
                    tree.copy_buffer(child, target)?;
                }
                ids::CUE_RELATIVE_POSITION => {
                    // The relative position is only tracked when the absolute
                    // position was present; otherwise it is dropped.
                    if let Some(offset) = self.relative_offsets.get(&child) {
                        ebml::make_simple_element(target, id, offset.current())?;
                    } else {
                        debug!("dropping relative position without an absolute reference");
                    }
                }
                ids::CUE_CLUSTER_POSITION | ids::CUE_CODEC_STATE => {
                    ebml::make_simple_element(target, id, self.tracked_offset(child, diag)?)?;
                }
                ids::CUE_REFERENCE => {
                    self.make_reference(tree, child, target, diag)?;
                }
                _ => {}
            }
            child_iter = tree.next_sibling(child);
        }

        Ok(())
    }

    fn make_reference<R: Read + Seek, W: Write>(
        &self,
        tree: &mut ElementTree<'_, R, MatroskaFormat>,
        reference: ElementRef,
        target: &mut W,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let mut buffer = [0; 8];

        target.write_all(&[ids::CUE_REFERENCE as u8])?;
        let length = ebml::make_size_denotation(self.tracked_size(reference, diag)?, &mut buffer)?;
        target.write_all(&buffer[..length])?;

        let mut child_iter = tree.first_child(reference);
        while let Some(child) = child_iter {
            tree.parse(child, diag)?;
            let id = tree.id(child);
            match id {
                ids::VOID | ids::CRC32 => {}
                ids::CUE_REF_TIME | ids::CUE_REF_NUMBER => {
                    tree.copy_buffer(child, target)?;
                }
                ids::CUE_REF_CLUSTER | ids::CUE_REF_CODEC_STATE => {
                    ebml::make_simple_element(target, id, self.tracked_offset(child, diag)?)?;
                }
                _ => {}
            }
            child_iter = tree.next_sibling(child);
        }

        Ok(())
    }

    fn tracked_size(&self, elem: ElementRef, diag: &mut Diagnostics) -> Result<u64> {
        match self.sizes.get(&elem) {
            Some(&size) => Ok(size),
            None => Err(self.inconsistent(diag)),
        }
    }

    fn tracked_offset(&self, elem: ElementRef, diag: &mut Diagnostics) -> Result<u64> {
        match self.offsets.get(&elem) {
            Some(offset) => Ok(offset.current()),
            None => Err(self.inconsistent(diag)),
        }
    }

    fn inconsistent(&self, diag: &mut Diagnostics) -> Error {
        diag.push(
            DiagLevel::Critical,
            "unable to write the file index because the index of the source file could not be parsed correctly",
            MAKE_CONTEXT,
        );
        Error::InvalidData
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // Cues { CuePoint { CueTime 1, CueTrackPositions {
    //     CueTrack 1, CueClusterPosition 0x7F, CueRelativePosition 0x10 } } }
    fn cues_fixture() -> Vec<u8> {
        vec![
            0x1C, 0x53, 0xBB, 0x6B, 0x90, // Cues, 16 bytes
            0xBB, 0x8E, // CuePoint, 14 bytes
            0xB3, 0x81, 0x01, // CueTime = 1
            0xB7, 0x89, // CueTrackPositions, 9 bytes
            0xF7, 0x81, 0x01, // CueTrack = 1
            0xF1, 0x81, 0x7F, // CueClusterPosition = 0x7F
            0xF0, 0x81, 0x10, // CueRelativePosition = 0x10
        ]
    }

    fn parse_fixture<'r>(
        data: &[u8],
        reader: &'r mut Cursor<Vec<u8>>,
        diag: &mut Diagnostics,
    ) -> (ElementTree<'r, Cursor<Vec<u8>>, MatroskaFormat>, CuePositionUpdater) {
        let mut tree = ElementTree::new(MatroskaFormat, reader, 0, data.len() as u64);
        let mut updater = CuePositionUpdater::new();
        let root = tree.root();
        updater.parse(&mut tree, root, diag).unwrap();
        (tree, updater)
    }

    #[test]
    fn parsing_tracks_sizes_and_offsets() {
        let data = cues_fixture();
        let mut reader = Cursor::new(data.clone());
        let mut diag = Diagnostics::new();
        let (_, updater) = parse_fixture(&data, &mut reader, &mut diag);

        assert_eq!(updater.total_size(), data.len() as u64);
        assert!(diag.is_empty());
    }

    #[test]
    fn unmodified_index_round_trips() {
        let data = cues_fixture();
        let mut reader = Cursor::new(data.clone());
        let mut diag = Diagnostics::new();
        let (mut tree, updater) = parse_fixture(&data, &mut reader, &mut diag);

        let mut out = Vec::new();
        updater.make(&mut tree, &mut out, &mut diag).unwrap();

        assert_eq!(out, data);
        assert_eq!(out.len() as u64, updater.total_size());
    }

    #[test]
    fn widened_offsets_propagate_through_parent_sizes() {
        let data = cues_fixture();
        let mut reader = Cursor::new(data.clone());
        let mut diag = Diagnostics::new();
        let (mut tree, mut updater) = parse_fixture(&data, &mut reader, &mut diag);

        // 0x7F fits one byte, 0x1234 needs two; every enclosing size grows.
        assert!(updater.update_offsets(&tree, 0x7F, 0x1234));
        assert_eq!(updater.total_size(), data.len() as u64 + 1);

        let mut out = Vec::new();
        updater.make(&mut tree, &mut out, &mut diag).unwrap();

        let expected = vec![
            0x1C, 0x53, 0xBB, 0x6B, 0x91, // Cues, 17 bytes
            0xBB, 0x8F, // CuePoint, 15 bytes
            0xB3, 0x81, 0x01, // CueTime = 1
            0xB7, 0x8A, // CueTrackPositions, 10 bytes
            0xF7, 0x81, 0x01, // CueTrack = 1
            0xF1, 0x82, 0x12, 0x34, // CueClusterPosition = 0x1234
            0xF0, 0x81, 0x10, // CueRelativePosition = 0x10
        ];
        assert_eq!(out, expected);
        assert_eq!(out.len() as u64, updater.total_size());
    }

    #[test]
    fn updates_to_the_same_value_are_noops() {
        let data = cues_fixture();
        let mut reader = Cursor::new(data.clone());
        let mut diag = Diagnostics::new();
        let (tree, mut updater) = parse_fixture(&data, &mut reader, &mut diag);

        assert!(!updater.update_offsets(&tree, 0x7F, 0x7F));
        assert_eq!(updater.total_size(), data.len() as u64);

        // An offset that matches nothing changes nothing either.
        assert!(!updater.update_offsets(&tree, 0xDEAD, 0xBEEF));
    }

    #[test]
    fn relative_offsets_update_against_their_reference() {
        let data = cues_fixture();
        let mut reader = Cursor::new(data.clone());
        let mut diag = Diagnostics::new();
        let (mut tree, mut updater) = parse_fixture(&data, &mut reader, &mut diag);

        // The reference is the initial cluster position.
        assert!(updater.update_relative_offsets(&tree, 0x7F, 0x10, 0x300));
        assert_eq!(updater.total_size(), data.len() as u64 + 1);

        // A mismatched reference leaves everything untouched.
        assert!(!updater.update_relative_offsets(&tree, 0x55, 0x10, 0x400));

        let mut out = Vec::new();
        updater.make(&mut tree, &mut out, &mut diag).unwrap();
        assert_eq!(&out[out.len() - 4..], &[0xF0, 0x82, 0x03, 0x00]);
    }

    #[test]
    fn missing_cluster_position_is_critical_but_not_fatal() {
        let data = vec![
            0x1C, 0x53, 0xBB, 0x6B, 0x89, // Cues, 9 bytes
            0xBB, 0x87, // CuePoint, 7 bytes
            0xB3, 0x81, 0x01, // CueTime = 1
            0xB7, 0x82, // CueTrackPositions, 2 bytes
            0xB2, 0x80, // CueDuration, empty
        ];
        let mut reader = Cursor::new(data.clone());
        let mut diag = Diagnostics::new();
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut updater = CuePositionUpdater::new();

        let root = tree.root();
        updater.parse(&mut tree, root, &mut diag).unwrap();

        assert!(diag.has(DiagLevel::Critical));
        assert!(updater.total_size() > 0);
    }

    #[test]
    fn unknown_children_are_ignored_with_a_warning() {
        let data = vec![
            0x1C, 0x53, 0xBB, 0x6B, 0x8B, // Cues, 11 bytes
            0xBB, 0x89, // CuePoint, 9 bytes
            0xB7, 0x87, // CueTrackPositions, 7 bytes
            0xF1, 0x81, 0x20, // CueClusterPosition = 0x20
            0xEE, 0x82, 0x00, 0x00, // unknown child
        ];
        let mut reader = Cursor::new(data.clone());
        let mut diag = Diagnostics::new();
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut updater = CuePositionUpdater::new();

        let root = tree.root();
        updater.parse(&mut tree, root, &mut diag).unwrap();

        assert!(diag.has(DiagLevel::Warning));
        assert!(!diag.has(DiagLevel::Critical));
    }

    #[test]
    fn making_without_a_parsed_index_writes_nothing() {
        let updater = CuePositionUpdater::new();
        let data = cues_fixture();
        let mut reader = Cursor::new(data.clone());
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut diag = Diagnostics::new();

        let mut out = Vec::new();
        updater.make(&mut tree, &mut out, &mut diag).unwrap();

        assert!(out.is_empty());
        assert_eq!(updater.total_size(), 0);
        assert!(diag.has(DiagLevel::Warning));
    }

    #[test]
    fn references_round_trip() {
        let data = vec![
            0x1C, 0x53, 0xBB, 0x6B, 0x8F, // Cues, 15 bytes
            0xBB, 0x8D, // CuePoint, 13 bytes
            0xB3, 0x81, 0x02, // CueTime = 2
            0xB7, 0x88, // CueTrackPositions, 8 bytes
            0xF1, 0x81, 0x40, // CueClusterPosition = 0x40
            0xDB, 0x83, // CueReference, 3 bytes
            0x97, 0x81, 0x30, // CueRefCluster = 0x30
        ];
        let mut reader = Cursor::new(data.clone());
        let mut diag = Diagnostics::new();
        let (mut tree, mut updater) = parse_fixture(&data, &mut reader, &mut diag);

        let mut out = Vec::new();
        updater.make(&mut tree, &mut out, &mut diag).unwrap();
        assert_eq!(out, data);

        // Referenced cluster offsets are tracked like any other offset.
        assert!(updater.update_offsets(&tree, 0x30, 0x1234));
        assert_eq!(updater.total_size(), data.len() as u64 + 1);
    }
}
