//! Adapter over the PE parser.
//!
//! The pipeline consumes format facts, not a parser API, so this module
//! flattens what it needs out of goblin: the section table, the relocation
//! directory, import name locations, and the resource tree. goblin does not
//! expose the resource tree or the file offsets of import name strings, so
//! those are read from the raw directory structures here.

use crate::types::Range;
use crate::Error;
use goblin::pe::PE;
use log::debug;
use memchr::memchr;

pub use goblin::pe::header::{COFF_MACHINE_X86, COFF_MACHINE_X86_64};

const SECTION_HEADER_SIZE: u64 = 40;
const IMPORT_DESCRIPTOR_SIZE: u64 = 20;

const DIRECTORY_IMPORT: usize = 1;
const DIRECTORY_RESOURCE: usize = 2;
const DIRECTORY_BASERELOC: usize = 5;

/// One entry of the section table, reduced to the facts the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub name: String,
    /// File offset of the section's raw data
    pub raw_ptr: u64,
    /// Size of the raw data on disk
    pub raw_size: u64,
    pub virtual_address: u64,
    pub virtual_size: u64,
}

impl SectionInfo {
    /// File range of the raw data.
    pub fn file_range(&self) -> Range {
        Range::new(self.raw_ptr, self.raw_size)
    }
}

/// A name string from the import tables, with the file offset of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedName {
    pub text: String,
    pub offset: u64,
}

/// A leaf of the resource directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource<'a> {
    /// Slash-joined path through the directory tree
    pub name: String,
    /// File range of the resource bytes
    pub range: Range,
    pub data: &'a [u8],
}

/// A parsed image plus its backing buffer.
pub struct PeImage<'a> {
    data: &'a [u8],
    pe: PE<'a>,
}

#[inline]
fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)?
        .try_into()
        .ok()
        .map(u16::from_le_bytes)
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)?
        .try_into()
        .ok()
        .map(u32::from_le_bytes)
}

#[inline]
fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset + 8)?
        .try_into()
        .ok()
        .map(u64::from_le_bytes)
}

/// Read a null-terminated ASCII string at `offset`, or `None` if the bytes
/// are out of range or not ASCII.
fn read_ascii_cstr(data: &[u8], offset: usize) -> Option<String> {
    let tail = data.get(offset..)?;
    let len = memchr(0, tail)?;
    let bytes = &tail[..len];
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii) {
        return None;
    }
    Some(String::from_utf8_lossy(bytes).into_owned())
}

impl<'a> PeImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, Error> {
        let pe = PE::parse(data).map_err(|e| Error::InvalidImage(e.to_string()))?;
        Ok(Self { data, pe })
    }

    /// Cheap probe for an embedded image: does the buffer start with `MZ`?
    pub fn looks_like_image(data: &[u8]) -> bool {
        data.len() >= 2 && &data[..2] == b"MZ"
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn machine(&self) -> u16 {
        self.pe.header.coff_header.machine
    }

    pub fn is_64(&self) -> bool {
        self.pe.is_64
    }

    pub fn image_base(&self) -> u64 {
        self.pe.image_base as u64
    }

    /// Sections in table order. Zero-sized sections are included; callers
    /// that cannot use them filter them out.
    pub fn sections(&self) -> Vec<SectionInfo> {
        self.pe
            .sections
            .iter()
            .map(|s| SectionInfo {
                name: s
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|_| "(invalid)".to_string()),
                raw_ptr: u64::from(s.pointer_to_raw_data),
                raw_size: u64::from(s.size_of_raw_data),
                virtual_address: u64::from(s.virtual_address),
                virtual_size: u64::from(s.virtual_size),
            })
            .collect()
    }

    pub fn section_by_name(&self, name: &str) -> Option<SectionInfo> {
        self.sections().into_iter().find(|s| s.name == name)
    }

    /// Raw data of a section, or `None` when its declared range is not
    /// backed by file bytes.
    pub fn section_data(&self, section: &SectionInfo) -> Option<&'a [u8]> {
        let start = usize::try_from(section.raw_ptr).ok()?;
        let size = usize::try_from(section.raw_size).ok()?;
        self.data.get(start..start + size)
    }

    /// File offset of the first section table entry.
    fn section_table_offset(&self) -> u64 {
        let pe_pointer = u64::from(self.pe.header.dos_header.pe_pointer);
        let optional_size = u64::from(self.pe.header.coff_header.size_of_optional_header);
        // PE signature (4) + COFF header (20) + optional header
        pe_pointer + 24 + optional_size
    }

    /// File ranges of the section table entries, in table order.
    pub fn section_header_ranges(&self) -> Vec<Range> {
        let base = self.section_table_offset();
        (0..self.pe.sections.len() as u64)
            .map(|i| Range::new(base + i * SECTION_HEADER_SIZE, SECTION_HEADER_SIZE))
            .collect()
    }

    /// Convert a relative virtual address to a file offset.
    ///
    /// Addresses below the first section map through the header identity
    /// region; addresses in no section at all resolve to `None`.
    pub fn rva_to_offset(&self, rva: u64) -> Option<u64> {
        let sections = self.sections();
        for s in &sections {
            let span = s.virtual_size.max(s.raw_size);
            if s.virtual_address <= rva && rva < s.virtual_address + span {
                let offset = rva - s.virtual_address + s.raw_ptr;
                return (offset < self.len()).then_some(offset);
            }
        }
        let header_end = sections
            .iter()
            .map(|s| s.virtual_address)
            .min()
            .unwrap_or(self.len());
        (rva < header_end && rva < self.len()).then_some(rva)
    }

    /// Look up one data directory entry as `(virtual_address, size)`.
    fn data_directory(&self, index: usize) -> Option<(u64, u64)> {
        let optional = usize::try_from(self.pe.header.dos_header.pe_pointer).ok()? + 24;
        let magic = read_u16(self.data, optional)?;
        let (count_off, array_off) = match magic {
            0x10b => (optional + 92, optional + 96),
            0x20b => (optional + 108, optional + 112),
            _ => return None,
        };
        let count = read_u32(self.data, count_off)? as usize;
        if index >= count {
            return None;
        }
        let entry = array_off + index * 8;
        let va = u64::from(read_u32(self.data, entry)?);
        let size = u64::from(read_u32(self.data, entry + 4)?);
        (va != 0 && size != 0).then_some((va, size))
    }

    /// File range of the base-relocation directory, if the image has one.
    pub fn reloc_range(&self) -> Option<Range> {
        let (va, size) = self.data_directory(DIRECTORY_BASERELOC)?;
        let offset = self.rva_to_offset(va)?;
        Some(Range::new(offset, size))
    }

    /// Name strings from the import tables: `(dll_names, symbol_names)`.
    ///
    /// Entries whose names are missing or not ASCII are skipped.
    pub fn imported_names(&self) -> (Vec<ImportedName>, Vec<ImportedName>) {
        let mut dlls = Vec::new();
        let mut symbols = Vec::new();

        let Some((va, _)) = self.data_directory(DIRECTORY_IMPORT) else {
            return (dlls, symbols);
        };
        let Some(table) = self.rva_to_offset(va) else {
            return (dlls, symbols);
        };

        for i in 0..4096u64 {
            let desc = (table + i * IMPORT_DESCRIPTOR_SIZE) as usize;
            let Some(lookup_rva) = read_u32(self.data, desc) else {
                break;
            };
            let Some(name_rva) = read_u32(self.data, desc + 12) else {
                break;
            };
            let Some(iat_rva) = read_u32(self.data, desc + 16) else {
                break;
            };
            if lookup_rva == 0 && name_rva == 0 && iat_rva == 0 {
                break;
            }

            if let Some(offset) = self.rva_to_offset(u64::from(name_rva)) {
                if let Some(text) = read_ascii_cstr(self.data, offset as usize) {
                    dlls.push(ImportedName { text, offset });
                }
            }

            let thunks = if lookup_rva != 0 { lookup_rva } else { iat_rva };
            if let Some(thunk_off) = self.rva_to_offset(u64::from(thunks)) {
                self.walk_thunks(thunk_off, &mut symbols);
            }
        }

        (dlls, symbols)
    }

    fn walk_thunks(&self, mut offset: u64, symbols: &mut Vec<ImportedName>) {
        let (entry_size, ordinal_bit) = if self.is_64() {
            (8u64, 1u64 << 63)
        } else {
            (4u64, 1u64 << 31)
        };

        for _ in 0..65536 {
            let entry = if self.is_64() {
                read_u64(self.data, offset as usize)
            } else {
                read_u32(self.data, offset as usize).map(u64::from)
            };
            let Some(entry) = entry else { break };
            if entry == 0 {
                break;
            }
            offset += entry_size;

            if entry & ordinal_bit != 0 {
                // imported by ordinal, no name bytes to index
                continue;
            }
            // hint/name entry: u16 hint, then the name string
            let name_rva = (entry & 0x7fff_ffff) + 2;
            let Some(name_off) = self.rva_to_offset(name_rva) else {
                continue;
            };
            if let Some(text) = read_ascii_cstr(self.data, name_off as usize) {
                symbols.push(ImportedName {
                    text,
                    offset: name_off,
                });
            }
        }
    }

    /// Walk the resource directory tree and collect every leaf resource.
    ///
    /// Resources whose declared data range is unreadable are skipped.
    pub fn resources(&self) -> Vec<Resource<'a>> {
        let mut out = Vec::new();
        let Some((va, _)) = self.data_directory(DIRECTORY_RESOURCE) else {
            return out;
        };
        let Some(base) = self.rva_to_offset(va) else {
            return out;
        };
        self.walk_resource_dir(base, 0, &[], &mut out);
        out
    }

    fn walk_resource_dir(&self, base: u64, dir_rel: u64, path: &[String], out: &mut Vec<Resource<'a>>) {
        if path.len() > 8 {
            // resource trees are three levels deep in practice; deeper means
            // the directory is corrupt or self-referential
            return;
        }

        let dir = (base + dir_rel) as usize;
        let Some(named) = read_u16(self.data, dir + 12) else {
            return;
        };
        let Some(ids) = read_u16(self.data, dir + 14) else {
            return;
        };
        let count = usize::from(named) + usize::from(ids);
        if count > 4096 {
            return;
        }

        for i in 0..count {
            let entry = dir + 16 + i * 8;
            let Some(name_field) = read_u32(self.data, entry) else {
                return;
            };
            let Some(offset_field) = read_u32(self.data, entry + 4) else {
                return;
            };

            let label = if name_field & 0x8000_0000 != 0 {
                self.resource_name(base, u64::from(name_field & 0x7fff_ffff))
                    .unwrap_or_else(|| "(invalid)".to_string())
            } else {
                name_field.to_string()
            };
            let mut epath = path.to_vec();
            epath.push(label);

            if offset_field & 0x8000_0000 != 0 {
                self.walk_resource_dir(base, u64::from(offset_field & 0x7fff_ffff), &epath, out);
                continue;
            }

            // leaf: IMAGE_RESOURCE_DATA_ENTRY
            let data_entry = (base + u64::from(offset_field)) as usize;
            let Some(data_rva) = read_u32(self.data, data_entry) else {
                continue;
            };
            let Some(size) = read_u32(self.data, data_entry + 4) else {
                continue;
            };
            let Some(offset) = self.rva_to_offset(u64::from(data_rva)) else {
                debug!("resource {}: unmapped data rva {:#x}", epath.join("/"), data_rva);
                continue;
            };
            let start = offset as usize;
            let Some(bytes) = self.data.get(start..start + size as usize) else {
                debug!("resource {}: data out of range", epath.join("/"));
                continue;
            };

            out.push(Resource {
                name: epath.join("/"),
                range: Range::new(offset, u64::from(size)),
                data: bytes,
            });
        }
    }

    /// Decode an IMAGE_RESOURCE_DIR_STRING_U name.
    fn resource_name(&self, base: u64, rel: u64) -> Option<String> {
        let at = (base + rel) as usize;
        let len = usize::from(read_u16(self.data, at)?);
        let mut units = Vec::with_capacity(len);
        for i in 0..len {
            units.push(read_u16(self.data, at + 2 + i * 2)?);
        }
        String::from_utf16(&units).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_image() {
        assert!(PeImage::looks_like_image(b"MZ\x90\x00"));
        assert!(!PeImage::looks_like_image(b"\x7fELF"));
        assert!(!PeImage::looks_like_image(b"M"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PeImage::parse(b"not a pe file at all").is_err());
    }

    #[test]
    fn test_read_ascii_cstr() {
        let data = b"\x00kernel32.dll\x00rest";
        assert_eq!(read_ascii_cstr(data, 1).as_deref(), Some("kernel32.dll"));
        assert_eq!(read_ascii_cstr(data, 100), None);
        // unterminated
        assert_eq!(read_ascii_cstr(b"abc", 0), None);
    }

    #[test]
    fn test_read_ascii_cstr_rejects_non_ascii() {
        let data = b"\xc3\xa9\x00";
        assert_eq!(read_ascii_cstr(data, 0), None);
    }
}
