//! Reference-address harvesting for boundary recovery.
//!
//! Compilers that store strings as pointer+length slices into a shared blob
//! leave two kinds of breadcrumbs behind: fat-pointer structures in data
//! sections, and instruction operands that load a string's address directly.
//! Both give the exact starting address of a string, which is what the
//! boundary refiner needs to cut apart candidates a byte scan merged.
//!
//! Instruction operands are recovered by raw pattern matching over the code
//! bytes rather than by disassembly. That over-matches, but every harvested
//! address is later discarded unless it lands inside the target data
//! section, so the false positives are cheap.

use crate::pe::{PeImage, SectionInfo, COFF_MACHINE_X86, COFF_MACHINE_X86_64};
use crate::Error;

/// Largest plausible string length for a fat-pointer candidate.
const MAX_STRING_LEN: u64 = 1024 * 1024;

/// Sections scanned for fat-pointer structures.
const STRUCT_SECTIONS: [&str; 2] = [".rdata", ".data"];

/// Harvest candidate reference addresses for strings in `target`.
///
/// Returns virtual addresses, sorted ascending and deduplicated. On 64-bit
/// images only `lea`-style operands are harvested; the 32-bit immediate
/// forms (`push`, `mov`) are skipped there because their false-positive rate
/// outweighs the recall. Unsupported machine types are an error so the
/// caller can log and continue without refinement.
pub fn harvest_reference_addresses(pe: &PeImage, target: &SectionInfo) -> Result<Vec<u64>, Error> {
    let mut addresses = find_struct_string_candidates(pe, target);

    match pe.machine() {
        COFF_MACHINE_X86_64 => {
            if let Some((text, text_va)) = text_section(pe) {
                addresses.extend(find_lea_operands_64(text, text_va, pe.image_base()));
            }
        }
        COFF_MACHINE_X86 => {
            if let Some((text, _)) = text_section(pe) {
                addresses.extend(find_lea_operands_32(text));
                addresses.extend(find_push_operands(text));
                addresses.extend(find_mov_operands(text));
            }
        }
        other => return Err(Error::UnsupportedMachine(other)),
    }

    addresses.sort_unstable();
    addresses.dedup();
    Ok(addresses)
}

/// Convert a virtual address to a file offset within `section`.
///
/// Returns `None` when the address does not land inside the section's raw
/// data on disk.
pub fn va_to_section_offset(va: u64, image_base: u64, section: &SectionInfo) -> Option<u64> {
    let rva = va.checked_sub(image_base)?;
    let delta = rva.checked_sub(section.virtual_address)?;
    let offset = section.raw_ptr + delta;
    section.file_range().contains(offset).then_some(offset)
}

fn text_section<'a>(pe: &PeImage<'a>) -> Option<(&'a [u8], u64)> {
    let section = pe.section_by_name(".text")?;
    let data = pe.section_data(&section)?;
    Some((data, section.virtual_address))
}

/// Scan data sections for pointer+length pairs whose pointer lands in the
/// target section.
fn find_struct_string_candidates(pe: &PeImage, target: &SectionInfo) -> Vec<u64> {
    let blob_start = pe.image_base() + target.virtual_address;
    let blob_end = blob_start + target.raw_size;
    let mut out = Vec::new();

    for name in STRUCT_SECTIONS {
        let Some(section) = pe.section_by_name(name) else {
            continue;
        };
        let Some(data) = pe.section_data(&section) else {
            continue;
        };

        if pe.is_64() {
            scan_fat_pointers_64(data, blob_start, blob_end, &mut out);
        } else {
            scan_fat_pointers_32(data, blob_start, blob_end, &mut out);
        }
    }

    out
}

fn scan_fat_pointers_64(data: &[u8], blob_start: u64, blob_end: u64, out: &mut Vec<u64>) {
    if data.len() < 16 {
        return;
    }
    let mut i = 0;
    while i + 16 <= data.len() {
        let ptr = u64::from_le_bytes(data[i..i + 8].try_into().unwrap());
        let len = u64::from_le_bytes(data[i + 8..i + 16].try_into().unwrap());
        if ptr >= blob_start
            && ptr < blob_end
            && len > 0
            && len < MAX_STRING_LEN
            && ptr + len <= blob_end
        {
            out.push(ptr);
        }
        i += 8;
    }
}

fn scan_fat_pointers_32(data: &[u8], blob_start: u64, blob_end: u64, out: &mut Vec<u64>) {
    if data.len() < 8 {
        return;
    }
    let mut i = 0;
    while i + 8 <= data.len() {
        let ptr = u64::from(u32::from_le_bytes(data[i..i + 4].try_into().unwrap()));
        let len = u64::from(u32::from_le_bytes(data[i + 4..i + 8].try_into().unwrap()));
        if ptr >= blob_start
            && ptr < blob_end
            && len > 0
            && len < MAX_STRING_LEN
            && ptr + len <= blob_end
        {
            out.push(ptr);
        }
        i += 4;
    }
}

/// RIP-relative `lea` operands: REX.W 8D /r with mod=00, r/m=101.
fn find_lea_operands_64(text: &[u8], text_va: u64, image_base: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 7 <= text.len() {
        let rex = text[i];
        if (rex == 0x48 || rex == 0x4c) && text[i + 1] == 0x8d {
            let modrm = text[i + 2];
            if modrm & 0xc7 == 0x05 {
                let disp = i32::from_le_bytes(text[i + 3..i + 7].try_into().unwrap());
                let rip = image_base + text_va + i as u64 + 7;
                if let Some(target) = rip.checked_add_signed(i64::from(disp)) {
                    out.push(target);
                }
            }
        }
        i += 1;
    }
    out
}

/// Absolute `lea` operands: 8D /r with mod=00, r/m=101 carries a disp32
/// that is the address itself on 32-bit targets.
fn find_lea_operands_32(text: &[u8]) -> Vec<u64> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 6 <= text.len() {
        if text[i] == 0x8d && text[i + 1] & 0xc7 == 0x05 {
            let disp = u32::from_le_bytes(text[i + 2..i + 6].try_into().unwrap());
            out.push(u64::from(disp));
        }
        i += 1;
    }
    out
}

/// `push imm32` operands: 68 id.
fn find_push_operands(text: &[u8]) -> Vec<u64> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 5 <= text.len() {
        if text[i] == 0x68 {
            let imm = u32::from_le_bytes(text[i + 1..i + 5].try_into().unwrap());
            out.push(u64::from(imm));
        }
        i += 1;
    }
    out
}

/// `mov r32, imm32` operands: B8+rd id.
fn find_mov_operands(text: &[u8]) -> Vec<u64> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 5 <= text.len() {
        if (0xb8..=0xbf).contains(&text[i]) {
            let imm = u32::from_le_bytes(text[i + 1..i + 5].try_into().unwrap());
            out.push(u64::from(imm));
        }
        i += 1;
    }
    out
}
