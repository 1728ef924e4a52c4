//! String extraction from packed constant blobs.
//!
//! Some compilers never null-terminate string literals. Every literal is a
//! pointer+length slice into one shared read-only blob, so the blob itself
//! is a wall of concatenated text and a plain byte scan returns merged
//! garbage like `"invalid lengthassertion failedsrc/main.rs"`. This module
//! extracts candidates from that blob and leaves the cutting to the
//! boundary refiner, which knows where the real string starts are.
//!
//! The run scanner occasionally misreads multi-byte UTF-8 as UTF-16: a wide
//! run whose first code unit decodes above U+00FF is UTF-8 data seen through
//! the wrong lens. The repair pass re-scans one byte past such a run and
//! swaps the recovered string in for the bogus one.

use crate::pe::PeImage;
use crate::scan::{scan_first_run, scan_runs, RawRun, RunKind};
use crate::types::{ExtractedString, Range, StringEncoding};
use crate::Error;

/// Name of the section that holds the packed string blob.
pub const BLOB_SECTION: &str = ".rdata";

/// Extract blob-mode string candidates from the image's `.rdata` section.
///
/// Offsets in the result are absolute file offsets. A missing `.rdata`
/// section is an error distinct from "no strings found": without the blob
/// there is nothing for this mode to scan, while the other extraction modes
/// remain usable.
pub fn extract_blob_strings(pe: &PeImage, min_len: usize) -> Result<Vec<ExtractedString>, Error> {
    let section = pe
        .section_by_name(BLOB_SECTION)
        .ok_or(Error::MissingStringSection)?;
    let data = pe.section_data(&section).ok_or(Error::MissingStringSection)?;

    let runs = scan_runs(data, min_len);
    let runs = repair_wide_runs(runs, min_len, data);

    Ok(runs
        .into_iter()
        .filter(|r| r.kind == RunKind::Utf8)
        .map(|r| {
            ExtractedString::new(
                r.text.replace('\n', ""),
                Range::new(section.raw_ptr + r.range.offset, r.range.length),
                StringEncoding::Utf8,
            )
        })
        .collect())
}

/// Repair wide runs that are really UTF-8 seen byte-shifted.
///
/// A wide run whose re-encoded first code unit has a zero low byte did not
/// come from real UTF-16 text; re-scanning from one byte past the run's
/// start recovers the UTF-8 string the scanner should have found. The
/// recovered run replaces the next emitted UTF-8 run when it textually
/// contains it, since that next run is the tail of the same misread bytes.
fn repair_wide_runs(runs: Vec<RawRun>, min_len: usize, buf: &[u8]) -> Vec<RawRun> {
    let mut fixed = Vec::with_capacity(runs.len());
    let mut last_fixup: Option<RawRun> = None;

    for run in runs {
        match run.kind {
            RunKind::Wide => {
                last_fixup = None;
                let first_low_byte = run.text.encode_utf16().next().map(|u| u.to_le_bytes()[0]);
                if first_low_byte == Some(0) {
                    let start = run.range.offset as usize;
                    if let Some(rescued) = scan_first_run(&buf[start + 1..], min_len) {
                        let rescued = rescued.rebased(start as u64 + 1);
                        if rescued.text.chars().count() >= min_len {
                            last_fixup = Some(rescued);
                        }
                    }
                }
            }
            RunKind::Utf8 => {
                match last_fixup.take() {
                    Some(fixup) if fixup.text.contains(&run.text) => fixed.push(fixup),
                    _ => fixed.push(run),
                }
            }
        }
    }

    fixed
}
