//! Core types for string extraction and tagging.
//!
//! This module defines the fundamental data structures used throughout
//! the extraction and classification pipeline.

use serde::Serialize;
use std::collections::BTreeSet;

/// A half-open byte interval `[offset, offset + length)` within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Range {
    /// File offset where the interval begins
    pub offset: u64,
    /// Length of the interval in bytes
    pub length: u64,
}

impl Range {
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// One past the last byte of the interval.
    pub const fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Whether a file offset falls inside the interval.
    pub fn contains(&self, offset: u64) -> bool {
        self.offset <= offset && offset < self.end()
    }

    /// Whether another interval falls inside this one (both endpoints inside).
    pub fn contains_range(&self, other: &Range) -> bool {
        self.contains(other.offset) && self.contains(other.end())
    }

    /// Whether two intervals share at least one byte.
    pub fn overlaps(&self, other: &Range) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// How the bytes backing a string were encoded in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StringEncoding {
    /// Printable ASCII run
    Ascii,
    /// Naive UTF-16LE run (ASCII code points with zero high bytes)
    Unicode,
    /// UTF-8 data recovered from a packed string blob
    Utf8,
}

/// An extracted but not-yet-classified string.
///
/// Instances are never mutated in place: the boundary refiner replaces a
/// candidate with up to two narrower candidates whose text is re-decoded
/// from the underlying buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedString {
    /// The decoded string value
    pub text: String,
    /// Byte range of the raw data backing the string
    pub range: Range,
    /// Encoding of the raw data
    pub encoding: StringEncoding,
}

impl ExtractedString {
    pub fn new(text: impl Into<String>, range: Range, encoding: StringEncoding) -> Self {
        Self {
            text: text.into(),
            range,
            encoding,
        }
    }
}

/// A short classification label attached to a string, e.g. `#common`.
pub type Tag = String;

/// An extracted string plus everything the classifiers learned about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedString {
    /// The underlying extracted string
    pub string: ExtractedString,
    /// Classification tags, sorted for stable output
    pub tags: BTreeSet<Tag>,
    /// Name of the file structure the string overlaps, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure: Option<String>,
}

impl TaggedString {
    pub fn new(string: ExtractedString) -> Self {
        Self {
            string,
            tags: BTreeSet::new(),
            structure: None,
        }
    }
}

/// Display action associated with a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Render dimmed
    Mute,
    /// Render emphasized
    Highlight,
    /// Remove from output entirely
    Hide,
    /// Render normally
    Default,
}

/// The resolved display policy for a string given its full tag set.
///
/// Precedence is highlight > hide > mute > default: one matching highlight
/// rule wins over any number of hide or mute rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Highlight,
    Hide,
    Mute,
    Default,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_end() {
        let r = Range::new(100, 8);
        assert_eq!(r.end(), 108);
    }

    #[test]
    fn test_range_contains_point() {
        let r = Range::new(100, 8);
        assert!(r.contains(100));
        assert!(r.contains(107));
        assert!(!r.contains(108));
        assert!(!r.contains(99));
    }

    #[test]
    fn test_range_contains_range() {
        let r = Range::new(100, 10);
        assert!(r.contains_range(&Range::new(102, 4)));
        // end of the inner range is an exclusive point of the outer one
        assert!(!r.contains_range(&Range::new(105, 5)));
        assert!(!r.contains_range(&Range::new(98, 4)));
    }

    #[test]
    fn test_range_overlaps() {
        let r = Range::new(100, 10);
        assert!(r.overlaps(&Range::new(105, 20)));
        assert!(r.overlaps(&Range::new(90, 11)));
        assert!(!r.overlaps(&Range::new(110, 5)));
        assert!(!r.overlaps(&Range::new(90, 10)));
    }

    #[test]
    fn test_tagged_string_starts_empty() {
        let s = ExtractedString::new("hello!", Range::new(0, 6), StringEncoding::Ascii);
        let t = TaggedString::new(s);
        assert!(t.tags.is_empty());
        assert!(t.structure.is_none());
    }
}
