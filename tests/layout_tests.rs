//! Layout construction tests against hand-built images.

mod common;

use common::{build_pe64, put_u32, SectionSpec};
use strand::pe::PeImage;
use strand::{Layout, LayoutKind, NodeId, Range};

fn child_ranges(layout: &Layout, node: NodeId) -> Vec<Range> {
    layout
        .children(node)
        .iter()
        .map(|&c| layout.node(c).range)
        .collect()
}

fn find_child<'a>(layout: &'a Layout, node: NodeId, name: &str) -> Option<NodeId> {
    layout
        .children(node)
        .iter()
        .copied()
        .find(|&c| layout.node(c).name == name)
}

#[test]
fn test_layout_covers_whole_image() {
    // two sections with a hole between them and trailing overlay bytes
    let data = build_pe64(
        &[
            SectionSpec {
                name: ".text",
                va: 0x1000,
                vsize: 0x200,
                raw_ptr: 0x200,
                raw_size: 0x200,
            },
            SectionSpec {
                name: ".rdata",
                va: 0x2000,
                vsize: 0x200,
                raw_ptr: 0x600,
                raw_size: 0x200,
            },
        ],
        0xa00,
        &[],
    );
    let pe = PeImage::parse(&data).unwrap();
    let layout = Layout::for_image(&pe);
    let root = layout.root();

    // children are offset-sorted, disjoint, and cover the root exactly
    let ranges = child_ranges(&layout, root);
    assert_eq!(ranges[0].offset, 0);
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].end(), pair[1].offset);
    }
    assert_eq!(ranges.last().unwrap().end(), 0xa00);
}

#[test]
fn test_layout_names_synthetic_segments() {
    let data = build_pe64(
        &[
            SectionSpec {
                name: ".text",
                va: 0x1000,
                vsize: 0x200,
                raw_ptr: 0x200,
                raw_size: 0x200,
            },
            SectionSpec {
                name: ".rdata",
                va: 0x2000,
                vsize: 0x200,
                raw_ptr: 0x600,
                raw_size: 0x200,
            },
        ],
        0xa00,
        &[],
    );
    let pe = PeImage::parse(&data).unwrap();
    let layout = Layout::for_image(&pe);
    let root = layout.root();

    let header = find_child(&layout, root, "header").expect("no header segment");
    assert_eq!(layout.node(header).range, Range::new(0, 0x200));
    assert_eq!(layout.node(header).kind, LayoutKind::Segment);

    let gap = find_child(&layout, root, "gap").expect("no gap segment");
    assert_eq!(layout.node(gap).range, Range::new(0x400, 0x200));

    let overlay = find_child(&layout, root, "overlay").expect("no overlay segment");
    assert_eq!(layout.node(overlay).range, Range::new(0x800, 0x200));

    let text = find_child(&layout, root, ".text").expect("no .text node");
    assert_eq!(layout.node(text).kind, LayoutKind::Section);
}

#[test]
fn test_layout_zero_sized_sections_excluded() {
    let data = build_pe64(
        &[
            SectionSpec {
                name: ".bss",
                va: 0x1000,
                vsize: 0x200,
                raw_ptr: 0,
                raw_size: 0,
            },
            SectionSpec {
                name: ".rdata",
                va: 0x2000,
                vsize: 0x200,
                raw_ptr: 0x200,
                raw_size: 0x200,
            },
        ],
        0x400,
        &[],
    );
    let pe = PeImage::parse(&data).unwrap();
    let layout = Layout::for_image(&pe);

    assert!(find_child(&layout, layout.root(), ".bss").is_none());
    assert!(find_child(&layout, layout.root(), ".rdata").is_some());
}

/// Build an image whose `.rsrc` section holds one resource leaf.
fn pe_with_resource(resource_bytes: &[u8]) -> Vec<u8> {
    // resource data lives at rva 0x2100 (file 0x500)
    let mut data = build_pe64(
        &[
            SectionSpec {
                name: ".rdata",
                va: 0x1000,
                vsize: 0x200,
                raw_ptr: 0x200,
                raw_size: 0x200,
            },
            SectionSpec {
                name: ".rsrc",
                va: 0x2000,
                vsize: 0x600,
                raw_ptr: 0x400,
                raw_size: 0x600,
            },
        ],
        0xa00,
        &[(2, 0x2000, 0x100)],
    );

    // root directory: one id entry (type 10 = RCDATA) -> subdirectory
    let rsrc = 0x400;
    put_u32(&mut data, rsrc + 12, 0); // named entries (u16) + id entries (u16)
    data[rsrc + 14] = 1;
    put_u32(&mut data, rsrc + 16, 10);
    put_u32(&mut data, rsrc + 20, 0x8000_0018);
    // level 2: id 1 -> subdirectory
    let l2 = rsrc + 0x18;
    data[l2 + 14] = 1;
    put_u32(&mut data, l2 + 16, 1);
    put_u32(&mut data, l2 + 20, 0x8000_0030);
    // level 3: language 1033 -> data entry
    let l3 = rsrc + 0x30;
    data[l3 + 14] = 1;
    put_u32(&mut data, l3 + 16, 1033);
    put_u32(&mut data, l3 + 20, 0x48);
    // data entry: rva, size
    let de = rsrc + 0x48;
    put_u32(&mut data, de, 0x2100);
    put_u32(&mut data, de + 4, resource_bytes.len() as u32);

    data[0x500..0x500 + resource_bytes.len()].copy_from_slice(resource_bytes);
    data
}

#[test]
fn test_resource_attached_to_containing_section() {
    let data = pe_with_resource(b"plain resource payload");
    let pe = PeImage::parse(&data).unwrap();
    let layout = Layout::for_image(&pe);
    let root = layout.root();

    let rsrc = find_child(&layout, root, ".rsrc").expect("no .rsrc node");
    let leaf = find_child(&layout, rsrc, "rsrc: 10/1/1033").expect("resource leaf missing");
    let node = layout.node(leaf);
    assert_eq!(node.kind, LayoutKind::Resource);
    assert_eq!(node.range, Range::new(0x500, 22));
    assert_eq!(layout.parent(leaf), Some(rsrc));
    assert!(layout.children(leaf).is_empty());
}

#[test]
fn test_embedded_image_gets_nested_layout() {
    // the resource payload is itself a complete image
    let inner = common::pe_with_rdata(b"inner-string\0");
    let data = pe_with_resource(&inner);
    let pe = PeImage::parse(&data).unwrap();
    let layout = Layout::for_image(&pe);
    let root = layout.root();

    let rsrc = find_child(&layout, root, ".rsrc").unwrap();
    let leaf = find_child(&layout, rsrc, "rsrc: 10/1/1033").unwrap();

    let nested = layout.children(leaf);
    assert_eq!(nested.len(), 1);
    let nested_root = layout.node(nested[0]);
    assert_eq!(nested_root.kind, LayoutKind::Image);
    // nested layout is rebased to the resource's file offset
    assert_eq!(nested_root.range, Range::new(0x500, inner.len() as u64));
    assert!(find_child(&layout, nested[0], ".rdata").is_some());
    assert_eq!(layout.parent(nested[0]), Some(leaf));
}

#[test]
fn test_garbage_resource_payload_is_just_bytes() {
    // starts with MZ but is not parsable: recursion is skipped, the leaf
    // stays a plain resource node
    let data = pe_with_resource(b"MZ but nothing else here");
    let pe = PeImage::parse(&data).unwrap();
    let layout = Layout::for_image(&pe);

    let rsrc = find_child(&layout, layout.root(), ".rsrc").unwrap();
    let leaf = find_child(&layout, rsrc, "rsrc: 10/1/1033").unwrap();
    assert!(layout.children(leaf).is_empty());
}

#[test]
fn test_sibling_navigation_across_segments() {
    let data = build_pe64(
        &[SectionSpec {
            name: ".rdata",
            va: 0x1000,
            vsize: 0x200,
            raw_ptr: 0x200,
            raw_size: 0x200,
        }],
        0x400,
        &[],
    );
    let pe = PeImage::parse(&data).unwrap();
    let layout = Layout::for_image(&pe);
    let root = layout.root();

    let header = find_child(&layout, root, "header").unwrap();
    let rdata = find_child(&layout, root, ".rdata").unwrap();
    assert_eq!(layout.successor(header), Some(rdata));
    assert_eq!(layout.predecessor(rdata), Some(header));
    assert_eq!(layout.predecessor(header), None);
    assert_eq!(layout.successor(rdata), None);
}
