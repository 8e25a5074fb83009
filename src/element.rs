//! The generic element tree.
//!
//! Every supported container consists of self-describing elements with
//! (identifier, size, payload) framing, nested into a hierarchy. This module
//! implements the mechanics shared by all of them: lazy header parsing,
//! sibling/child materialization, id lookups, structure validation, and
//! buffered copies. An [`ElementFormat`] adapter supplies the
//! format-specific header codec.
//!
//! Nodes live in a per-tree arena and are addressed through [`ElementRef`]
//! handles. A parent owns its subtree only in the sense that dropping the
//! tree drops every node; handles themselves are plain indices and stay
//! valid for the lifetime of the tree.

use crate::core::io::{copy_range, copy_range_with_progress, Progress};
use crate::diag::{DiagLevel, Diagnostics};
use crate::error::{Error, Result};

use log::debug;
use std::io::{Read, Seek, SeekFrom, Write};

/// The header information an adapter decodes for one element.
#[derive(Clone, Copy, Debug)]
pub struct ElementHeader<I> {
    /// The element identifier in its decoded form.
    pub id: I,
    /// How many bytes the identifier occupied in the stream.
    pub id_length: u32,
    /// How many bytes the size denotation occupied in the stream.
    pub size_length: u32,
    /// The payload size following the header.
    pub data_size: u64,
    /// Whether the size denotation declared an unknown size. Adapters
    /// resolve unknown sizes against the space the parent leaves.
    pub size_unknown: bool,
}

impl<I> ElementHeader<I> {
    pub fn header_size(&self) -> u64 {
        u64::from(self.id_length + self.size_length)
    }

    pub fn total_size(&self) -> u64 {
        self.header_size() + self.data_size
    }
}

/// Format-specific behavior plugged into an [`ElementTree`].
pub trait ElementFormat {
    type Id: Copy + Eq;

    /// The smallest on-disk footprint a well-formed element can have.
    fn min_element_size(&self) -> u64;

    /// Decodes one element header from `reader` at the absolute offset
    /// `start`, never consuming more than `max_size` bytes.
    fn read_header<R: Read + Seek>(
        &self,
        reader: &mut R,
        start: u64,
        max_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<ElementHeader<Self::Id>>;

    /// Whether an element with this header contains child elements.
    fn is_parent(&self, header: &ElementHeader<Self::Id>) -> bool;

    /// Whether an element with this header only reserves space.
    fn is_padding(&self, header: &ElementHeader<Self::Id>) -> bool;

    /// The offset of the first child relative to the element start, or 0
    /// when the element cannot have children.
    fn first_child_offset(&self, header: &ElementHeader<Self::Id>) -> u64;

    /// A printable representation of an identifier.
    fn id_to_string(&self, id: Self::Id) -> String;
}

/// A handle to a node inside an [`ElementTree`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ElementRef(usize);

struct Node<I> {
    start: u64,
    max_size: u64,
    header: Option<ElementHeader<I>>,
    parent: Option<ElementRef>,
    first_child: Option<ElementRef>,
    next_sibling: Option<ElementRef>,
    buffer: Option<Vec<u8>>,
}

impl<I> Node<I> {
    fn new(start: u64, max_size: u64, parent: Option<ElementRef>) -> Self {
        Self {
            start,
            max_size,
            header: None,
            parent,
            first_child: None,
            next_sibling: None,
            buffer: None,
        }
    }
}

/// A lazily expanded tree of container elements over a borrowed stream.
///
/// The tree borrows the stream for its whole lifetime; the stream cursor is
/// shared mutable state, so every operation that touches data seeks first.
pub struct ElementTree<'r, R, F: ElementFormat> {
    format: F,
    reader: &'r mut R,
    nodes: Vec<Node<F::Id>>,
}

impl<'r, R, F: ElementFormat> ElementTree<'r, R, F> {
    /// Creates a tree whose root element starts at `start` and may occupy at
    /// most `max_size` bytes.
    pub fn new(format: F, reader: &'r mut R, start: u64, max_size: u64) -> Self {
        Self {
            format,
            reader,
            nodes: vec![Node::new(start, max_size, None)],
        }
    }

    /// The handle of the root element.
    pub fn root(&self) -> ElementRef {
        ElementRef(0)
    }

    fn node(&self, elem: ElementRef) -> &Node<F::Id> {
        &self.nodes[elem.0]
    }

    fn header(&self, elem: ElementRef) -> &ElementHeader<F::Id> {
        self.node(elem)
            .header
            .as_ref()
            .expect("parse() must be called before accessing element fields")
    }

    fn push_node(&mut self, start: u64, max_size: u64, parent: Option<ElementRef>) -> ElementRef {
        self.nodes.push(Node::new(start, max_size, parent));
        ElementRef(self.nodes.len() - 1)
    }

    /// Whether the header of `elem` has been decoded yet.
    pub fn is_parsed(&self, elem: ElementRef) -> bool {
        self.node(elem).header.is_some()
    }

    /// The byte offset of the element header in the stream.
    pub fn start_offset(&self, elem: ElementRef) -> u64 {
        self.node(elem).start
    }

    /// The offset of the element in its parent, or in the stream for
    /// top-level elements.
    pub fn relative_start_offset(&self, elem: ElementRef) -> u64 {
        match self.parent(elem) {
            Some(parent) => self.start_offset(elem) - self.start_offset(parent),
            None => self.start_offset(elem),
        }
    }

    /// The upper bound the parent (or the stream end) imposes on this
    /// element's total size.
    pub fn max_total_size(&self, elem: ElementRef) -> u64 {
        self.node(elem).max_size
    }

    /// The element identifier. The element must be parsed.
    pub fn id(&self, elem: ElementRef) -> F::Id {
        self.header(elem).id
    }

    /// A printable representation of the element identifier.
    pub fn id_to_string(&self, elem: ElementRef) -> String {
        self.format.id_to_string(self.id(elem))
    }

    pub fn id_length(&self, elem: ElementRef) -> u32 {
        self.header(elem).id_length
    }

    pub fn size_length(&self, elem: ElementRef) -> u32 {
        self.header(elem).size_length
    }

    /// The sum of id and size denotation lengths.
    pub fn header_size(&self, elem: ElementRef) -> u64 {
        self.header(elem).header_size()
    }

    /// The payload size following the header.
    pub fn data_size(&self, elem: ElementRef) -> u64 {
        self.header(elem).data_size
    }

    pub fn total_size(&self, elem: ElementRef) -> u64 {
        self.header(elem).total_size()
    }

    /// The offset of the payload in the stream.
    pub fn data_offset(&self, elem: ElementRef) -> u64 {
        self.start_offset(elem) + self.header_size(elem)
    }

    /// The offset of the first byte which no longer belongs to this element.
    pub fn end_offset(&self, elem: ElementRef) -> u64 {
        self.start_offset(elem) + self.total_size(elem)
    }

    pub fn size_unknown(&self, elem: ElementRef) -> bool {
        self.header(elem).size_unknown
    }

    pub fn is_parent(&self, elem: ElementRef) -> bool {
        self.format.is_parent(self.header(elem))
    }

    pub fn is_padding(&self, elem: ElementRef) -> bool {
        self.format.is_padding(self.header(elem))
    }

    /// How deep the element is nested; 0 for top-level elements.
    pub fn level(&self, elem: ElementRef) -> u32 {
        let mut level = 0;
        let mut current = self.node(elem).parent;

        while let Some(parent) = current {
            level += 1;
            current = self.node(parent).parent;
        }

        level
    }

    pub fn parent(&self, elem: ElementRef) -> Option<ElementRef> {
        self.node(elem).parent
    }

    /// The n-th parent of the element; `parent_nth(elem, 0)` is the element
    /// itself.
    pub fn parent_nth(&self, elem: ElementRef, n: u32) -> Option<ElementRef> {
        let mut current = Some(elem);

        for _ in 0..n {
            current = self.node(current?).parent;
        }

        current
    }

    /// The first child of the element. The element must be parsed; the child
    /// itself is materialized but not yet parsed.
    pub fn first_child(&self, elem: ElementRef) -> Option<ElementRef> {
        self.node(elem).first_child
    }

    /// The next sibling of the element. The element must be parsed.
    pub fn next_sibling(&self, elem: ElementRef) -> Option<ElementRef> {
        self.node(elem).next_sibling
    }

    /// The last materialized child of the element.
    pub fn last_child(&self, elem: ElementRef) -> Option<ElementRef> {
        let mut child = self.first_child(elem)?;

        while let Some(sibling) = self.node(child).next_sibling {
            child = sibling;
        }

        Some(child)
    }

    /// Returns the buffered bytes of the element, if any.
    pub fn buffer(&self, elem: ElementRef) -> Option<&[u8]> {
        self.node(elem).buffer.as_deref()
    }

    /// Releases the buffered bytes of the element.
    pub fn discard_buffer(&mut self, elem: ElementRef) {
        self.nodes[elem.0].buffer = None;
    }

    /// Writes the buffered bytes of the element to `target`.
    ///
    /// # Errors
    /// Fails with [`Error::InvalidData`] when [`make_buffer`](Self::make_buffer)
    /// has not been called.
    pub fn copy_buffer(&self, elem: ElementRef, target: &mut impl Write) -> Result<()> {
        match &self.node(elem).buffer {
            Some(buffer) => {
                target.write_all(buffer)?;
                Ok(())
            }
            None => Err(Error::InvalidData),
        }
    }

    /// Resets the parsing state of the element. Materialized descendants and
    /// siblings are unlinked and any buffer is released.
    pub fn clear(&mut self, elem: ElementRef) {
        let node = &mut self.nodes[elem.0];
        node.header = None;
        node.first_child = None;
        node.next_sibling = None;
        node.buffer = None;
    }
}

impl<'r, R: Read + Seek, F: ElementFormat> ElementTree<'r, R, F> {
    /// Decodes the header of the element.
    ///
    /// This is idempotent; use [`reparse`](Self::reparse) to force a re-read.
    /// On success the element's first child and next sibling are materialized
    /// (unparsed) when the surrounding space allows for them.
    pub fn parse(&mut self, elem: ElementRef, diag: &mut Diagnostics) -> Result<()> {
        if self.nodes[elem.0].header.is_some() {
            return Ok(());
        }

        let (start, max_size, parent) = {
            let node = &self.nodes[elem.0];
            (node.start, node.max_size, node.parent)
        };

        let header = self
            .format
            .read_header(&mut *self.reader, start, max_size, diag)?;

        let total = header.total_size();
        if total > max_size {
            diag.push(
                DiagLevel::Critical,
                format!(
                    "the element {} at offset {} is larger than the space left for it",
                    self.format.id_to_string(header.id),
                    start
                ),
                "parsing element header",
            );
            return Err(Error::TruncatedData);
        }

        let min = self.format.min_element_size();

        let mut first_child = None;
        if self.format.is_parent(&header) {
            let child_offset = self.format.first_child_offset(&header);
            if child_offset > 0 && child_offset + min <= total {
                first_child = Some(self.push_node(start + child_offset, total - child_offset, Some(elem)));
            }
        }

        let mut next_sibling = None;
        if total + min <= max_size {
            next_sibling = Some(self.push_node(start + total, max_size - total, parent));
        }

        let node = &mut self.nodes[elem.0];
        node.header = Some(header);
        node.first_child = first_child;
        node.next_sibling = next_sibling;

        Ok(())
    }

    /// Clears the element and decodes its header again.
    pub fn reparse(&mut self, elem: ElementRef, diag: &mut Diagnostics) -> Result<()> {
        self.clear(elem);
        self.parse(elem, diag)
    }

    /// Returns the first child with the given id, parsing children on demand.
    pub fn child_by_id(
        &mut self,
        elem: ElementRef,
        id: F::Id,
        diag: &mut Diagnostics,
    ) -> Result<Option<ElementRef>> {
        self.parse(elem, diag)?;

        let mut child = self.first_child(elem);
        while let Some(current) = child {
            self.parse(current, diag)?;
            if self.id(current) == id {
                return Ok(Some(current));
            }
            child = self.next_sibling(current);
        }

        Ok(None)
    }

    /// Returns the first later sibling with the given id.
    pub fn sibling_by_id(
        &mut self,
        elem: ElementRef,
        id: F::Id,
        diag: &mut Diagnostics,
    ) -> Result<Option<ElementRef>> {
        self.parse(elem, diag)?;

        match self.next_sibling(elem) {
            Some(sibling) => self.sibling_by_id_including_this(sibling, id, diag),
            None => Ok(None),
        }
    }

    /// Returns the element itself or the first later sibling with the given id.
    pub fn sibling_by_id_including_this(
        &mut self,
        elem: ElementRef,
        id: F::Id,
        diag: &mut Diagnostics,
    ) -> Result<Option<ElementRef>> {
        let mut sibling = Some(elem);
        while let Some(current) = sibling {
            self.parse(current, diag)?;
            if self.id(current) == id {
                return Ok(Some(current));
            }
            sibling = self.next_sibling(current);
        }

        Ok(None)
    }

    /// Walks `path` through the tree and returns the matching element.
    ///
    /// At each level the current element and its later siblings are candidates
    /// for the current path item; a match descends into its first child with
    /// the remaining path. A path of length one can therefore return the
    /// element itself.
    pub fn subelement_by_path(
        &mut self,
        elem: ElementRef,
        path: &[F::Id],
        diag: &mut Diagnostics,
    ) -> Result<Option<ElementRef>> {
        if path.is_empty() {
            return Ok(None);
        }

        let mut depth = 0;
        let mut current = Some(elem);

        'descend: while let Some(mut candidate) = current {
            loop {
                self.parse(candidate, diag)?;

                if self.id(candidate) == path[depth] {
                    if depth + 1 == path.len() {
                        return Ok(Some(candidate));
                    }

                    depth += 1;
                    current = self.first_child(candidate);
                    continue 'descend;
                }

                match self.next_sibling(candidate) {
                    Some(sibling) => candidate = sibling,
                    None => return Ok(None),
                }
            }
        }

        Ok(None)
    }

    /// Parses this element and every subsequent element, recording anomalies
    /// in `diag` and accumulating the total size of padding elements in
    /// `padding_size`.
    ///
    /// Failures inside a child structure are recorded and swallowed so that
    /// validation continues with the siblings; stream errors always abort.
    pub fn validate_structure(
        &mut self,
        elem: ElementRef,
        diag: &mut Diagnostics,
        padding_size: &mut u64,
    ) -> Result<()> {
        self.parse(elem, diag)?;

        if let Some(child) = self.first_child(elem) {
            if let Err(err) = self.validate_structure(child, diag, padding_size) {
                if err.is_io() {
                    return Err(err);
                }
                // Anomalies in the child structure are already recorded;
                // continue with the siblings.
                debug!("continuing validation past an invalid child structure");
            }
        } else if self.is_padding(elem) {
            *padding_size += self.total_size(elem);
        }

        if let Some(sibling) = self.next_sibling(elem) {
            self.validate_structure(sibling, diag, padding_size)?;
        }

        Ok(())
    }

    /// Reads the element payload into a new buffer.
    pub fn read_data(&mut self, elem: ElementRef, diag: &mut Diagnostics) -> Result<Vec<u8>> {
        self.parse(elem, diag)?;

        let offset = self.data_offset(elem);
        let size = self.data_size(elem);

        self.reader.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0; size as usize];
        self.reader.read_exact(&mut data)?;

        Ok(data)
    }

    /// Loads the whole element (header and payload) into an internal buffer
    /// so its bytes survive overwriting the source region. The element must
    /// be parsed.
    pub fn make_buffer(&mut self, elem: ElementRef) -> Result<()> {
        let start = self.start_offset(elem);
        let total = self.total_size(elem);

        self.reader.seek(SeekFrom::Start(start))?;
        let mut buffer = vec![0; total as usize];
        self.reader.read_exact(&mut buffer)?;
        self.nodes[elem.0].buffer = Some(buffer);

        Ok(())
    }

    /// Writes the element header to `target`.
    pub fn copy_header<W: Write>(
        &mut self,
        elem: ElementRef,
        target: &mut W,
        diag: &mut Diagnostics,
        progress: Option<&mut Progress>,
    ) -> Result<()> {
        self.ensure_parsed(elem, diag)?;
        let start = self.start_offset(elem);
        let count = self.header_size(elem);
        self.copy_internal(target, start, count, progress)
    }

    /// Writes the element without its children to `target`.
    pub fn copy_without_children<W: Write>(
        &mut self,
        elem: ElementRef,
        target: &mut W,
        diag: &mut Diagnostics,
        progress: Option<&mut Progress>,
    ) -> Result<()> {
        self.ensure_parsed(elem, diag)?;
        let start = self.start_offset(elem);
        let count = match self.format.first_child_offset(self.header(elem)) {
            0 => self.total_size(elem),
            first_child_offset => first_child_offset,
        };
        self.copy_internal(target, start, count, progress)
    }

    /// Writes the entire element including all children to `target`.
    pub fn copy_entirely<W: Write>(
        &mut self,
        elem: ElementRef,
        target: &mut W,
        diag: &mut Diagnostics,
        progress: Option<&mut Progress>,
    ) -> Result<()> {
        self.ensure_parsed(elem, diag)?;
        let start = self.start_offset(elem);
        let count = self.total_size(elem);
        self.copy_internal(target, start, count, progress)
    }

    /// Writes the buffered bytes if present and falls back to
    /// [`copy_entirely`](Self::copy_entirely) otherwise.
    pub fn copy_preferably_from_buffer<W: Write>(
        &mut self,
        elem: ElementRef,
        target: &mut W,
        diag: &mut Diagnostics,
        progress: Option<&mut Progress>,
    ) -> Result<()> {
        if self.node(elem).buffer.is_some() {
            self.copy_buffer(elem, target)
        } else {
            self.copy_entirely(elem, target, diag, progress)
        }
    }

    fn ensure_parsed(&mut self, elem: ElementRef, diag: &mut Diagnostics) -> Result<()> {
        match self.parse(elem, diag) {
            Ok(()) => Ok(()),
            Err(err) if err.is_io() => Err(err),
            Err(_) => Err(Error::InvalidData),
        }
    }

    fn copy_internal<W: Write>(
        &mut self,
        target: &mut W,
        start: u64,
        count: u64,
        progress: Option<&mut Progress>,
    ) -> Result<()> {
        self.reader.seek(SeekFrom::Start(start))?;

        match progress {
            Some(progress) => copy_range_with_progress(&mut *self.reader, target, count, progress),
            None => copy_range(&mut *self.reader, target, count).map_err(Error::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matroska::{ids, MatroskaFormat};
    use std::io::Cursor;

    // CuePoint { CueTrackPositions { CueTrack 1 }, CueTime 5 } followed by a
    // Void element reserving two payload bytes.
    fn fixture() -> Vec<u8> {
        vec![
            0xBB, 0x88, // CuePoint, 8 bytes
            0xB7, 0x83, // CueTrackPositions, 3 bytes
            0xF7, 0x81, 0x01, // CueTrack = 1
            0xB3, 0x81, 0x05, // CueTime = 5
            0xEC, 0x82, 0x00, 0x00, // Void
        ]
    }

    #[test]
    fn headers_obey_the_size_invariants() {
        let data = fixture();
        let mut reader = Cursor::new(data.clone());
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        tree.parse(root, &mut diag).unwrap();

        assert_eq!(tree.id(root), ids::CUE_POINT);
        assert_eq!(tree.id_length(root), 1);
        assert_eq!(tree.size_length(root), 1);
        assert_eq!(tree.header_size(root), 2);
        assert_eq!(tree.data_size(root), 8);
        assert_eq!(tree.total_size(root), 10);
        assert_eq!(tree.end_offset(root), 10);
        assert!(tree.end_offset(root) <= tree.start_offset(root) + tree.max_total_size(root));
        assert_eq!(tree.level(root), 0);

        let positions = tree.first_child(root).unwrap();
        tree.parse(positions, &mut diag).unwrap();
        assert_eq!(tree.id(positions), ids::CUE_TRACK_POSITIONS);
        assert_eq!(tree.level(positions), 1);
        assert_eq!(tree.relative_start_offset(positions), 2);
        assert_eq!(tree.parent(positions), Some(root));

        let time = tree.next_sibling(positions).unwrap();
        tree.parse(time, &mut diag).unwrap();
        assert_eq!(tree.id(time), ids::CUE_TIME);
        assert_eq!(tree.start_offset(time), tree.end_offset(positions));
        assert_eq!(tree.next_sibling(time), None);

        assert!(diag.is_empty());
    }

    #[test]
    fn children_are_found_by_id() {
        let data = fixture();
        let mut reader = Cursor::new(data.clone());
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        let time = tree.child_by_id(root, ids::CUE_TIME, &mut diag).unwrap().unwrap();
        assert_eq!(tree.data_size(time), 1);

        assert_eq!(tree.child_by_id(root, ids::CUE_REFERENCE, &mut diag).unwrap(), None);

        let positions = tree.first_child(root).unwrap();
        let found = tree
            .sibling_by_id(positions, ids::CUE_TIME, &mut diag)
            .unwrap()
            .unwrap();
        assert_eq!(found, time);
        assert_eq!(
            tree.sibling_by_id_including_this(positions, ids::CUE_TRACK_POSITIONS, &mut diag)
                .unwrap(),
            Some(positions)
        );
    }

    #[test]
    fn paths_descend_only_through_matches() {
        let data = fixture();
        let mut reader = Cursor::new(data.clone());
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut diag = Diagnostics::new();

        let root = tree.root();

        // CuePoint -> CueTrackPositions -> CueTrack resolves.
        let track = tree
            .subelement_by_path(root, &[ids::CUE_POINT, ids::CUE_TRACK_POSITIONS, ids::CUE_TRACK], &mut diag)
            .unwrap()
            .unwrap();
        assert_eq!(tree.id(track), ids::CUE_TRACK);

        // CueTime is a sibling, not a parent of CueTrack; the path dead-ends.
        assert_eq!(
            tree.subelement_by_path(root, &[ids::CUE_POINT, ids::CUE_TIME, ids::CUE_TRACK], &mut diag)
                .unwrap(),
            None
        );

        // A single-item path may match the element itself.
        assert_eq!(
            tree.subelement_by_path(root, &[ids::CUE_POINT], &mut diag).unwrap(),
            Some(root)
        );
    }

    #[test]
    fn validation_accumulates_padding() {
        let data = fixture();
        let mut reader = Cursor::new(data.clone());
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        let mut padding = 0;
        tree.validate_structure(root, &mut diag, &mut padding).unwrap();

        // The trailing Void element is 2 header + 2 payload bytes.
        assert_eq!(padding, 4);
        assert!(diag.is_empty());
    }

    #[test]
    fn validation_survives_broken_children() {
        // The CueTrackPositions declares 3 bytes but its child declares 9.
        let data = vec![
            0xBB, 0x88, // CuePoint, 8 bytes
            0xB7, 0x83, // CueTrackPositions, 3 bytes
            0xF7, 0x89, 0x01, // CueTrack overruns its parent
            0xB3, 0x81, 0x05, // CueTime = 5, still reachable
        ];
        let mut reader = Cursor::new(data.clone());
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        let mut padding = 0;
        tree.validate_structure(root, &mut diag, &mut padding).unwrap();

        assert!(diag.has(DiagLevel::Critical));
    }

    #[test]
    fn copies_and_buffers_round_trip() {
        let data = fixture();
        let mut reader = Cursor::new(data.clone());
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        tree.parse(root, &mut diag).unwrap();

        let mut header = Vec::new();
        tree.copy_header(root, &mut header, &mut diag, None).unwrap();
        assert_eq!(header, &data[..2]);

        let mut entire = Vec::new();
        tree.copy_entirely(root, &mut entire, &mut diag, None).unwrap();
        assert_eq!(entire, &data[..10]);

        tree.make_buffer(root).unwrap();
        assert_eq!(tree.buffer(root).unwrap().len(), 10);

        let mut buffered = Vec::new();
        tree.copy_preferably_from_buffer(root, &mut buffered, &mut diag, None)
            .unwrap();
        assert_eq!(buffered, entire);

        tree.discard_buffer(root);
        assert!(tree.buffer(root).is_none());
        assert!(tree.copy_buffer(root, &mut Vec::new()).is_err());
    }

    #[test]
    fn reparse_rebuilds_the_subtree() {
        let data = fixture();
        let mut reader = Cursor::new(data.clone());
        let mut tree = ElementTree::new(MatroskaFormat, &mut reader, 0, data.len() as u64);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        tree.parse(root, &mut diag).unwrap();
        let first = tree.first_child(root).unwrap();

        tree.reparse(root, &mut diag).unwrap();
        let second = tree.first_child(root).unwrap();

        assert_ne!(first, second);
        assert_eq!(tree.start_offset(second), 2);
    }
}
