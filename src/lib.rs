//! # strand - structure-aware string extraction for malware triage
//!
//! Running `strings(1)` on a suspicious binary buries the ten lines an
//! analyst cares about under thousands of lines of noise: disassembled code
//! bytes that happen to look like text, relocation padding, runtime library
//! boilerplate. This library extracts strings *and* the context needed to
//! sort them: where each string lives in the image's structure, and which
//! knowledge base recognizes it.
//!
//! The pipeline:
//!
//! 1. scan the buffer for ASCII and UTF-16LE candidates, or, for binaries
//!    that pack their literals into a shared constant blob, scan the blob
//!    and repair the boundaries using reference addresses recovered from
//!    fat-pointer structures and instruction operands;
//! 2. build a layout tree of the image (header, sections, gaps, overlay,
//!    resources, nested embedded images) and an index of fine-grained
//!    format structures;
//! 3. tag every candidate against the loaded knowledge bases (prevalence,
//!    library fingerprints, expert rules, API names) and structural facts
//!    (code bytes, relocation data), then strip library tags without
//!    corpus-level support.
//!
//! ## Usage
//!
//! ```no_run
//! use strand::{analyze, AnalysisOptions, Databases};
//!
//! let data = std::fs::read("sample.exe").unwrap();
//! let databases = Databases::empty();
//! let analysis = analyze(&data, &databases, &AnalysisOptions::default()).unwrap();
//!
//! for s in analysis.visible_strings() {
//!     println!("{:08x} {}", s.string.range.offset, s.string.text);
//! }
//! ```

pub mod blob;
pub mod db;
pub mod layout;
pub mod pe;
pub mod refine;
pub mod scan;
pub mod structures;
pub mod tag;
pub mod types;
pub mod xref;

pub use blob::extract_blob_strings;
pub use db::Databases;
pub use layout::{Layout, LayoutKind, LayoutNode, NodeId};
pub use scan::{extract_strings, DEFAULT_MIN_LEN};
pub use structures::{compute_file_structures, Structure, StructureIndex};
pub use tag::{
    resolve_disposition, BasicBlock, CodeMap, TagContext, TagRules, DEFAULT_MIN_LIBRARY_SUPPORT,
};
pub use types::{
    Action, Disposition, ExtractedString, Range, StringEncoding, Tag, TaggedString,
};

use crate::pe::PeImage;
use log::{debug, warn};

/// Errors this library reports.
///
/// Most malformed-input conditions are not errors at all: missing resource
/// directories, unreadable resources and absent import tables degrade to a
/// poorer layout or fewer tags.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The buffer does not parse as a supported image format.
    #[error("not a valid image: {0}")]
    InvalidImage(String),

    /// Blob-mode extraction found no section to scan.
    #[error("no string blob section found")]
    MissingStringSection,

    /// Reference-address harvesting does not support this machine type.
    #[error("unsupported machine type: {0:#x}")]
    UnsupportedMachine(u16),

    /// A knowledge-base file failed to parse.
    #[error("malformed database: {0}")]
    Database(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How candidates are pulled out of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionMode {
    /// Scan the whole buffer for ASCII and UTF-16LE runs.
    #[default]
    Direct,
    /// Scan the packed string blob section and split candidates at
    /// recovered reference addresses.
    Blob,
}

/// Options for one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Minimum string length in characters
    pub min_length: usize,
    pub mode: ExtractionMode,
    /// Basic blocks from the disassembly provider, for code tagging
    pub basic_blocks: Vec<BasicBlock>,
    /// Library tags on fewer strings than this are suppressed
    pub min_library_support: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LEN,
            mode: ExtractionMode::Direct,
            basic_blocks: Vec::new(),
            min_library_support: DEFAULT_MIN_LIBRARY_SUPPORT,
        }
    }
}

impl AnalysisOptions {
    pub fn new(min_length: usize) -> Self {
        Self {
            min_length,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ExtractionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Provide pre-computed basic blocks so strings overlapping code bytes
    /// can be tagged. Addresses are virtual.
    pub fn with_basic_blocks(mut self, blocks: Vec<BasicBlock>) -> Self {
        self.basic_blocks = blocks;
        self
    }

    pub fn with_min_library_support(mut self, n: usize) -> Self {
        self.min_library_support = n;
        self
    }
}

/// The result of analyzing one image.
#[derive(Debug)]
pub struct Analysis {
    /// Tagged strings in ascending file-offset order, after suppression but
    /// before hide filtering
    pub strings: Vec<TaggedString>,
    /// Region tree of the image
    pub layout: Layout,
    /// Tag display rules derived from the loaded databases
    pub tag_rules: TagRules,
}

impl Analysis {
    /// Strings whose resolved disposition is not hide.
    pub fn visible_strings(&self) -> Vec<&TaggedString> {
        self.strings
            .iter()
            .filter(|s| self.disposition(s) != Disposition::Hide)
            .collect()
    }

    pub fn disposition(&self, string: &TaggedString) -> Disposition {
        resolve_disposition(&string.tags, &self.tag_rules)
    }
}

/// Analyze one fully-buffered image.
///
/// The databases are only read, so one [`Databases`] may serve concurrent
/// analyses of different images.
pub fn analyze(
    data: &[u8],
    databases: &Databases,
    opts: &AnalysisOptions,
) -> Result<Analysis, Error> {
    let pe = match PeImage::parse(data) {
        Ok(pe) => Some(pe),
        Err(e) => {
            debug!("treating input as raw binary: {}", e);
            None
        }
    };

    let candidates = match opts.mode {
        ExtractionMode::Direct => scan::extract_strings(data, opts.min_length),
        ExtractionMode::Blob => {
            let pe = pe
                .as_ref()
                .ok_or_else(|| Error::InvalidImage("blob extraction requires an image".into()))?;
            extract_blob_strings(pe, opts.min_length)?
        }
    };

    let candidates = match &pe {
        Some(pe) => refine_candidates(pe, data, candidates, opts.min_length),
        None => candidates,
    };

    let (layout, structures, reloc, code) = match &pe {
        Some(pe) => (
            Layout::for_image(pe),
            StructureIndex::new(compute_file_structures(pe)),
            pe.reloc_range(),
            (!opts.basic_blocks.is_empty())
                .then(|| CodeMap::from_basic_blocks(pe, &opts.basic_blocks)),
        ),
        None => (
            Layout::for_raw(data.len() as u64),
            StructureIndex::default(),
            None,
            None,
        ),
    };

    let ctx = TagContext {
        databases,
        structures: &structures,
        code: code.as_ref(),
        reloc,
    };
    let mut strings = tag::tag_strings(candidates, &ctx);
    tag::suppress_rare_library_tags(
        &mut strings,
        &databases.library_tags(),
        opts.min_library_support,
    );

    Ok(Analysis {
        strings,
        layout,
        tag_rules: tag::default_tag_rules(databases),
    })
}

/// Split candidates at harvested reference addresses.
///
/// Refinement is best-effort: with no blob section there are no usable
/// addresses, and an unsupported machine type only costs the refinement
/// step, not the analysis.
fn refine_candidates(
    pe: &PeImage,
    data: &[u8],
    candidates: Vec<ExtractedString>,
    min_length: usize,
) -> Vec<ExtractedString> {
    let Some(section) = pe.section_by_name(blob::BLOB_SECTION) else {
        return candidates;
    };

    match xref::harvest_reference_addresses(pe, &section) {
        Ok(addresses) => {
            let offsets: Vec<u64> = addresses
                .iter()
                .filter_map(|&va| xref::va_to_section_offset(va, pe.image_base(), &section))
                .collect();
            refine::split_candidates(data, candidates, &offsets, min_length)
        }
        Err(e) => {
            warn!("skipping boundary refinement: {}", e);
            candidates
        }
    }
}
