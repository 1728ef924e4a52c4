//! Flat index of fine-grained format elements.
//!
//! Structures label strings that overlap a known format element (a section
//! header entry, an import name) so the analyst can tell "this string is the
//! import table talking" from "this string is program data". They are not
//! part of the layout tree; the index is a flat interval set.

use crate::pe::PeImage;
use crate::types::Range;

/// A format element with a file range and a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    pub range: Range,
    pub name: String,
}

/// Interval index over structures.
///
/// Entries are held sorted by start offset; entries that share a start
/// offset keep their declaration order, so queries are deterministic.
#[derive(Debug, Clone, Default)]
pub struct StructureIndex {
    entries: Vec<Structure>,
}

impl StructureIndex {
    pub fn new(mut entries: Vec<Structure>) -> Self {
        entries.sort_by_key(|s| s.range.offset);
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All structures overlapping `range`, ordered by start offset.
    pub fn overlapping(&self, range: &Range) -> Vec<&Structure> {
        // entries are sorted by start, so everything at or past `range.end`
        // can be cut off with a binary search
        let cutoff = self.entries.partition_point(|s| s.range.offset < range.end());
        self.entries[..cutoff]
            .iter()
            .filter(|s| s.range.overlaps(range))
            .collect()
    }

    /// The first overlapping structure by start offset, if any.
    pub fn first_overlapping(&self, range: &Range) -> Option<&Structure> {
        let cutoff = self.entries.partition_point(|s| s.range.offset < range.end());
        self.entries[..cutoff]
            .iter()
            .find(|s| s.range.overlaps(range))
    }
}

/// Collect the format elements of an image: one entry per section table row
/// and, if an import table exists, one per DLL name and imported symbol name.
pub fn compute_file_structures(pe: &PeImage) -> Vec<Structure> {
    let mut structures = Vec::new();

    for range in pe.section_header_ranges() {
        structures.push(Structure {
            range,
            name: "section header".to_string(),
        });
    }

    let (dlls, symbols) = pe.imported_names();
    for name in dlls.iter().chain(symbols.iter()) {
        structures.push(Structure {
            range: Range::new(name.offset, name.text.len() as u64),
            name: "import table".to_string(),
        });
    }

    structures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure(offset: u64, length: u64, name: &str) -> Structure {
        Structure {
            range: Range::new(offset, length),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_overlapping_ordered_by_start() {
        let index = StructureIndex::new(vec![
            structure(50, 10, "b"),
            structure(10, 10, "a"),
            structure(55, 10, "c"),
        ]);

        let hits = index.overlapping(&Range::new(52, 20));
        let names: Vec<&str> = hits.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[test]
    fn test_first_overlapping_prefers_lowest_start() {
        let index = StructureIndex::new(vec![
            structure(100, 20, "later"),
            structure(90, 40, "earlier"),
        ]);

        let hit = index.first_overlapping(&Range::new(105, 5)).unwrap();
        assert_eq!(hit.name, "earlier");
    }

    #[test]
    fn test_equal_starts_keep_declaration_order() {
        let index = StructureIndex::new(vec![
            structure(10, 4, "first"),
            structure(10, 8, "second"),
        ]);

        let hit = index.first_overlapping(&Range::new(10, 2)).unwrap();
        assert_eq!(hit.name, "first");
    }

    #[test]
    fn test_no_overlap() {
        let index = StructureIndex::new(vec![structure(10, 4, "a")]);
        assert!(index.first_overlapping(&Range::new(14, 4)).is_none());
        assert!(index.overlapping(&Range::new(0, 10)).is_empty());
    }
}
