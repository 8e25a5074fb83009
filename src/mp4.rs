//! The MP4/ISO-BMFF atom format.
//!
//! Atoms are framed as a 32-bit big-endian size followed by a four-character
//! id. A size of one switches to a 64-bit size stored right after the id; a
//! size of zero lets the atom extend to the end of the enclosing space.

use crate::diag::{DiagLevel, Diagnostics};
use crate::element::{ElementFormat, ElementHeader};
use crate::error::{Error, Result};

use std::io::{Read, Seek, SeekFrom};

/// Well-known atom ids.
pub mod ids {
    const fn fourcc(id: &[u8; 4]) -> u32 {
        u32::from_be_bytes(*id)
    }

    pub const FTYP: u32 = fourcc(b"ftyp");
    pub const MOOV: u32 = fourcc(b"moov");
    pub const MVHD: u32 = fourcc(b"mvhd");
    pub const TRAK: u32 = fourcc(b"trak");
    pub const MDIA: u32 = fourcc(b"mdia");
    pub const MINF: u32 = fourcc(b"minf");
    pub const STBL: u32 = fourcc(b"stbl");
    pub const EDTS: u32 = fourcc(b"edts");
    pub const DINF: u32 = fourcc(b"dinf");
    pub const UDTA: u32 = fourcc(b"udta");
    pub const META: u32 = fourcc(b"meta");
    pub const ILST: u32 = fourcc(b"ilst");
    pub const MOOF: u32 = fourcc(b"moof");
    pub const TRAF: u32 = fourcc(b"traf");
    pub const MVEX: u32 = fourcc(b"mvex");
    pub const MDAT: u32 = fourcc(b"mdat");
    pub const FREE: u32 = fourcc(b"free");
    pub const SKIP: u32 = fourcc(b"skip");

    pub(crate) const CONTAINERS: &[u32] = &[
        MOOV, TRAK, MDIA, MINF, STBL, EDTS, DINF, UDTA, META, ILST, MOOF, TRAF, MVEX,
    ];
}

/// The ISO-BMFF atom element format.
pub struct Mp4Format;

impl ElementFormat for Mp4Format {
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
        const CONTEXT: &str = "parsing MP4 atom header";

        if max_size < 8 {
            diag.push(
                DiagLevel::Critical,
                format!("the atom at offset {} is truncated", start),
                CONTEXT,
            );
            return Err(Error::TruncatedData);
        }

        reader.seek(SeekFrom::Start(start))?;

        let mut header = [0; 8];
        reader.read_exact(&mut header)?;

        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        let (data_size, size_length, size_unknown) = match size {
            // A 64-bit size follows the id.
            1 => {
                if max_size < 16 {
                    diag.push(
                        DiagLevel::Critical,
                        format!("the atom at offset {} denotes a 64-bit size which is not present", start),
                        CONTEXT,
                    );
                    return Err(Error::TruncatedData);
                }

                let mut large = [0; 8];
                reader.read_exact(&mut large)?;
                let large = u64::from_be_bytes(large);

                if large < 16 {
                    diag.push(
                        DiagLevel::Critical,
                        format!("the atom at offset {} denotes an invalid 64-bit size", start),
                        CONTEXT,
                    );
                    return Err(Error::InvalidData);
                }

                (large - 16, 12, false)
            }
            // The atom extends to the end of the enclosing space.
            0 => (max_size - 8, 4, true),
            _ => {
                if size < 8 {
                    diag.push(
                        DiagLevel::Critical,
                        format!("the atom at offset {} denotes an invalid size", start),
                        CONTEXT,
                    );
                    return Err(Error::InvalidData);
                }

                (u64::from(size) - 8, 4, false)
            }
        };

        Ok(ElementHeader {
            id,
            id_length: 4,
            size_length,
            data_size,
            size_unknown,
        })
    }

    fn is_parent(&self, header: &ElementHeader<u32>) -> bool {
        ids::CONTAINERS.contains(&header.id)
    }

    fn is_padding(&self, header: &ElementHeader<u32>) -> bool {
        header.id == ids::FREE || header.id == ids::SKIP
    }

    fn first_child_offset(&self, header: &ElementHeader<u32>) -> u64 {
        if !self.is_parent(header) {
            return 0;
        }

        // The meta atom nests a version and flags word before its children.
        match header.id {
            ids::META => header.header_size() + 4,
            _ => header.header_size(),
        }
    }

    fn id_to_string(&self, id: u32) -> String {
        let bytes = id.to_be_bytes();
        if bytes.iter().all(|byte| byte.is_ascii_graphic()) {
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            format!("0x{:08X}", id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementTree;
    use std::io::Cursor;

    fn atom(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut data = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        data.extend_from_slice(id);
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn atoms_parse_and_tile() {
        let mut data = atom(b"ftyp", b"isomiso2");
        data.extend(atom(b"free", &[0; 4]));
        let len = data.len() as u64;

        let mut reader = Cursor::new(data);
        let mut tree = ElementTree::new(Mp4Format, &mut reader, 0, len);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        tree.parse(root, &mut diag).unwrap();
        assert_eq!(tree.id(root), ids::FTYP);
        assert_eq!(tree.header_size(root), 8);
        assert_eq!(tree.data_size(root), 8);
        assert!(!tree.is_parent(root));

        let free = tree.next_sibling(root).unwrap();
        tree.parse(free, &mut diag).unwrap();
        assert!(tree.is_padding(free));
        assert_eq!(tree.end_offset(free), len);
    }

    #[test]
    fn containers_expose_children() {
        let trak = atom(b"trak", &atom(b"mdia", &[]));
        let data = atom(b"moov", &trak);
        let len = data.len() as u64;

        let mut reader = Cursor::new(data);
        let mut tree = ElementTree::new(Mp4Format, &mut reader, 0, len);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        let mdia = tree
            .subelement_by_path(root, &[ids::MOOV, ids::TRAK, ids::MDIA], &mut diag)
            .unwrap()
            .unwrap();
        assert_eq!(tree.level(mdia), 2);
        assert_eq!(tree.data_size(mdia), 0);
    }

    #[test]
    fn large_sizes_use_the_extension_field() {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&24u64.to_be_bytes());
        data.extend_from_slice(&[0; 8]);
        let len = data.len() as u64;

        let mut reader = Cursor::new(data);
        let mut tree = ElementTree::new(Mp4Format, &mut reader, 0, len);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        tree.parse(root, &mut diag).unwrap();
        assert_eq!(tree.id(root), ids::MDAT);
        assert_eq!(tree.id_length(root), 4);
        assert_eq!(tree.size_length(root), 12);
        assert_eq!(tree.header_size(root), 16);
        assert_eq!(tree.data_size(root), 8);
        assert_eq!(tree.total_size(root), 24);
    }

    #[test]
    fn zero_sizes_extend_to_the_end() {
        let mut data = 0u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0; 100]);
        let len = data.len() as u64;

        let mut reader = Cursor::new(data);
        let mut tree = ElementTree::new(Mp4Format, &mut reader, 0, len);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        tree.parse(root, &mut diag).unwrap();
        assert!(tree.size_unknown(root));
        assert_eq!(tree.data_size(root), 100);
        assert_eq!(tree.next_sibling(root), None);
    }

    #[test]
    fn undersized_atoms_are_rejected() {
        let mut data = 4u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"ftyp");
        let len = data.len() as u64;

        let mut reader = Cursor::new(data);
        let mut tree = ElementTree::new(Mp4Format, &mut reader, 0, len);
        let mut diag = Diagnostics::new();

        let root = tree.root();
        assert!(matches!(tree.parse(root, &mut diag), Err(Error::InvalidData)));
        assert!(diag.has(DiagLevel::Critical));
    }
}
