//! Tag sources and the tagging engine.
//!
//! Every tag source is a pure function from a string's content or range to
//! a set of tags, independent of the others. The engine unions the answers,
//! resolves the string's structure label, and applies corpus-level cleanup:
//! a library fingerprint carried by only a handful of strings in the whole
//! sample is almost always a coincidental substring collision, so its tag
//! is stripped sample-wide.

use crate::db::{
    Databases, OpenSourceStringDatabase, StringGlobalPrevalenceDatabase, StringHashDatabase,
    WindowsApiStringDatabase,
};
use crate::pe::PeImage;
use crate::structures::StructureIndex;
use crate::types::{Action, Disposition, ExtractedString, Range, Tag, TaggedString};
use std::collections::{BTreeSet, HashMap};

pub const TAG_CODE: &str = "#code";
pub const TAG_RELOC: &str = "#reloc";
pub const TAG_COMMON: &str = "#common";
pub const TAG_WINAPI: &str = "#winapi";

/// Library tags carried by fewer surviving strings than this are stripped.
pub const DEFAULT_MIN_LIBRARY_SUPPORT: usize = 5;

/// Tag to display action table.
pub type TagRules = HashMap<Tag, Action>;

/// A basic block reported by the disassembly provider: starting virtual
/// address plus byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub address: u64,
    pub length: u64,
}

/// File-offset ranges known to hold instruction bytes.
///
/// Ranges are kept sorted and merged so membership is a binary search
/// rather than a per-byte set probe.
#[derive(Debug, Clone, Default)]
pub struct CodeMap {
    ranges: Vec<Range>,
}

impl CodeMap {
    pub fn from_file_ranges(mut ranges: Vec<Range>) -> Self {
        ranges.retain(|r| r.length > 0);
        ranges.sort_by_key(|r| r.offset);
        let mut merged: Vec<Range> = Vec::with_capacity(ranges.len());
        for r in ranges {
            match merged.last_mut() {
                Some(last) if r.offset <= last.end() => {
                    let end = last.end().max(r.end());
                    last.length = end - last.offset;
                }
                _ => merged.push(r),
            }
        }
        Self { ranges: merged }
    }

    /// Convert basic blocks from virtual addresses to file ranges. Blocks
    /// that do not map to file bytes are skipped.
    pub fn from_basic_blocks(pe: &PeImage, blocks: &[BasicBlock]) -> Self {
        let ranges = blocks
            .iter()
            .filter_map(|b| {
                let rva = b.address.checked_sub(pe.image_base())?;
                let offset = pe.rva_to_offset(rva)?;
                Some(Range::new(offset, b.length))
            })
            .collect();
        Self::from_file_ranges(ranges)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn overlaps(&self, range: &Range) -> bool {
        let i = self.ranges.partition_point(|r| r.end() <= range.offset);
        self.ranges.get(i).is_some_and(|r| r.offset < range.end())
    }
}

/// Code membership: any byte of the string lies in instruction bytes.
pub fn check_is_code(code: &CodeMap, string: &ExtractedString) -> Vec<Tag> {
    if code.overlaps(&string.range) {
        vec![TAG_CODE.to_string()]
    } else {
        Vec::new()
    }
}

/// Relocation membership: the string lies wholly inside the relocation
/// directory.
pub fn check_is_reloc(reloc: Option<&Range>, string: &ExtractedString) -> Vec<Tag> {
    match reloc {
        Some(r) if r.contains_range(&string.range) => vec![TAG_RELOC.to_string()],
        _ => Vec::new(),
    }
}

pub fn query_global_prevalence(db: &StringGlobalPrevalenceDatabase, s: &str) -> Vec<Tag> {
    if db.query(s) {
        vec![TAG_COMMON.to_string()]
    } else {
        Vec::new()
    }
}

pub fn query_hash_prevalence(db: &StringHashDatabase, s: &str) -> Vec<Tag> {
    if db.contains(s) {
        vec![TAG_COMMON.to_string()]
    } else {
        Vec::new()
    }
}

pub fn query_library_databases(dbs: &[OpenSourceStringDatabase], s: &str) -> Vec<Tag> {
    dbs.iter()
        .filter_map(|db| db.query(s).map(OpenSourceStringDatabase::tag_for))
        .collect()
}

pub fn query_winapi_names(db: &WindowsApiStringDatabase, s: &str) -> Vec<Tag> {
    if db.has_dll_name(s) || db.has_api_name(s) {
        vec![TAG_WINAPI.to_string()]
    } else {
        Vec::new()
    }
}

/// Everything the tagging engine consults, borrowed for one analysis.
pub struct TagContext<'a> {
    pub databases: &'a Databases,
    pub structures: &'a StructureIndex,
    pub code: Option<&'a CodeMap>,
    pub reloc: Option<Range>,
}

/// Run every tag source over every candidate and resolve structure labels.
pub fn tag_strings(strings: Vec<ExtractedString>, ctx: &TagContext) -> Vec<TaggedString> {
    strings
        .into_iter()
        .map(|string| {
            let mut tagged = TaggedString::new(string);
            let text = tagged.string.text.clone();

            if let Some(code) = ctx.code {
                tagged.tags.extend(check_is_code(code, &tagged.string));
            }
            tagged
                .tags
                .extend(check_is_reloc(ctx.reloc.as_ref(), &tagged.string));

            if let Some(gp) = &ctx.databases.prevalence {
                tagged.tags.extend(query_global_prevalence(gp, &text));
            }
            for hashes in &ctx.databases.hashes {
                tagged.tags.extend(query_hash_prevalence(hashes, &text));
            }
            tagged
                .tags
                .extend(query_library_databases(&ctx.databases.libraries, &text));
            for expert in &ctx.databases.expert {
                tagged.tags.extend(expert.query(&text));
            }
            if let Some(winapi) = &ctx.databases.winapi {
                tagged.tags.extend(query_winapi_names(winapi, &text));
            }

            tagged.structure = ctx
                .structures
                .first_overlapping(&tagged.string.range)
                .map(|s| s.name.clone());

            tagged
        })
        .collect()
}

/// Strip library tags with too little support across the whole sample.
///
/// A count strictly between zero and `min_support` means the tag is carried
/// by so few strings that the hits are probably false positives.
pub fn suppress_rare_library_tags(
    strings: &mut [TaggedString],
    library_tags: &BTreeSet<Tag>,
    min_support: usize,
) {
    for tag in library_tags {
        let count = strings.iter().filter(|s| s.tags.contains(tag)).count();
        if count > 0 && count < min_support {
            for s in strings.iter_mut() {
                s.tags.remove(tag);
            }
        }
    }
}

/// Build the display rule table: built-in actions for the structural and
/// prevalence tags, mute for every known library tag, and whatever action
/// each expert rule declares for its own tag.
pub fn default_tag_rules(databases: &Databases) -> TagRules {
    let mut rules = TagRules::new();
    rules.insert(TAG_CODE.to_string(), Action::Hide);
    rules.insert(TAG_RELOC.to_string(), Action::Hide);
    rules.insert(TAG_COMMON.to_string(), Action::Mute);
    rules.insert(TAG_WINAPI.to_string(), Action::Mute);

    for tag in databases.library_tags() {
        rules.insert(tag, Action::Mute);
    }
    for expert in &databases.expert {
        for (tag, action) in expert.tag_actions() {
            rules.insert(tag.clone(), action);
        }
    }

    rules
}

/// Resolve a string's display policy from its full tag set.
///
/// Tags without a rule count as mute; a string with no tags at all is
/// default.
pub fn resolve_disposition(tags: &BTreeSet<Tag>, rules: &TagRules) -> Disposition {
    if tags.is_empty() {
        return Disposition::Default;
    }

    let mut saw_hide = false;
    let mut saw_mute = false;
    for tag in tags {
        match rules.get(tag).copied().unwrap_or(Action::Mute) {
            Action::Highlight => return Disposition::Highlight,
            Action::Hide => saw_hide = true,
            Action::Mute => saw_mute = true,
            Action::Default => {}
        }
    }

    if saw_hide {
        Disposition::Hide
    } else if saw_mute {
        Disposition::Mute
    } else {
        Disposition::Default
    }
}

/// Drop strings whose resolved disposition is hide.
pub fn filter_hidden(strings: Vec<TaggedString>, rules: &TagRules) -> Vec<TaggedString> {
    strings
        .into_iter()
        .filter(|s| resolve_disposition(&s.tags, rules) != Disposition::Hide)
        .collect()
}
