//! Mediatag reads and rewrites the metadata inside media containers such as
//! Matroska/WebM, MP4, AVI, Ogg, FLAC, and raw MP3.
//!
//! The crate revolves around a generic [element tree](element) that treats
//! every supported container as a hierarchy of self-describing elements
//! with (identifier, size, payload) framing. One [format
//! adapter](element::ElementFormat) per container teaches the tree how to
//! decode headers; lazy expansion, id lookups, structure validation, and
//! buffered copies are shared.
//!
//! On top of that sit the tag codecs: the [ID3v2 parser and writer](id3v2),
//! the [Vorbis comment field codec](vorbis), and the [Matroska "Cues"
//! position updater](matroska::CuePositionUpdater) that keeps the seeking
//! index consistent when rewriting moves every cluster in the file.
//!
//! Operations report recoverable anomalies through
//! [`Diagnostics`](diag::Diagnostics) and reserve errors for situations
//! where parsing or making genuinely cannot continue.

#![forbid(unsafe_code)]

pub mod core;
pub mod diag;
pub mod ebml;
pub mod element;
pub mod error;
pub mod id3v2;
pub mod matroska;
pub mod mp4;
pub mod ogg;
pub mod riff;
pub mod types;
pub mod vorbis;
