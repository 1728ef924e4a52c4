//! Hierarchical layout of a binary image.
//!
//! The layout is a tree of regions: the whole file at the root, one node per
//! section, synthetic segments for the header, inter-section gaps and any
//! overlay, and resource leaves attached under whichever region contains
//! them. A resource whose bytes are themselves a valid image gets a full
//! nested layout, so a dropper's embedded payload shows up as a subtree.
//!
//! Nodes live in an arena and refer to each other by handle, which gives the
//! tree parent back-references without reference cycles.

use crate::pe::PeImage;
use crate::types::Range;
use log::debug;

/// Handle to a node in a [`Layout`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// What kind of region a node describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// A whole (possibly nested) image
    Image,
    /// A section from the section table
    Section,
    /// A synthetic region with no single backing format element:
    /// header, gap, or overlay
    Segment,
    /// A resource directory leaf
    Resource,
}

/// One region in the layout tree.
#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub range: Range,
    pub name: String,
    pub kind: LayoutKind,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// The region tree for one analyzed image.
#[derive(Debug, Clone)]
pub struct Layout {
    nodes: Vec<LayoutNode>,
    root: NodeId,
}

impl Layout {
    /// Build the layout of a parsed image.
    pub fn for_image(pe: &PeImage) -> Self {
        let mut nodes = Vec::new();
        let root = build_image(&mut nodes, pe, 0);
        Self { nodes, root }
    }

    /// Single-segment layout for data that is not a recognized image.
    pub fn for_raw(len: u64) -> Self {
        let nodes = vec![LayoutNode {
            range: Range::new(0, len),
            name: "binary".to_string(),
            kind: LayoutKind::Segment,
            children: Vec::new(),
            parent: None,
        }];
        Self {
            nodes,
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &LayoutNode {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// The prior sibling, if any.
    pub fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&c| c == id)?;
        index.checked_sub(1).map(|i| siblings[i])
    }

    /// The next sibling, if any.
    pub fn successor(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&c| c == id)?;
        siblings.get(index + 1).copied()
    }
}

fn push_node(
    nodes: &mut Vec<LayoutNode>,
    range: Range,
    name: impl Into<String>,
    kind: LayoutKind,
    parent: Option<NodeId>,
) -> NodeId {
    let id = NodeId(nodes.len());
    nodes.push(LayoutNode {
        range,
        name: name.into(),
        kind,
        children: Vec::new(),
        parent,
    });
    if let Some(p) = parent {
        nodes[p.0].children.push(id);
    }
    id
}

fn sort_children(nodes: &mut [LayoutNode], id: NodeId) {
    let mut children = std::mem::take(&mut nodes[id.0].children);
    children.sort_by_key(|&c| nodes[c.0].range.offset);
    nodes[id.0].children = children;
}

/// Build the subtree for one image and return its root node.
///
/// `base` is the file offset of the image's first byte within the outermost
/// file: 0 for the top-level image, the resource's own offset for a nested
/// one.
fn build_image(nodes: &mut Vec<LayoutNode>, pe: &PeImage, base: u64) -> NodeId {
    let root = push_node(
        nodes,
        Range::new(base, pe.len()),
        "pe",
        LayoutKind::Image,
        None,
    );

    let mut sections = pe.sections();
    sections.retain(|s| s.raw_size > 0);
    sections.sort_by_key(|s| s.raw_ptr);

    for section in &sections {
        push_node(
            nodes,
            Range::new(base + section.raw_ptr, section.raw_size),
            section.name.clone(),
            LayoutKind::Section,
            Some(root),
        );
    }

    // everything before the first section is the header
    let header_end = nodes[root.0]
        .children
        .first()
        .map(|&c| nodes[c.0].range.offset)
        .unwrap_or_else(|| nodes[root.0].range.end());
    let header = push_node(
        nodes,
        Range::new(base, header_end - base),
        "header",
        LayoutKind::Segment,
        Some(root),
    );
    let children = &mut nodes[root.0].children;
    children.pop();
    children.insert(0, header);

    // everything after the last section is the overlay
    let image_end = nodes[root.0].range.end();
    let last_end = nodes[root.0]
        .children
        .last()
        .map(|&c| nodes[c.0].range.end())
        .unwrap_or(base);
    if last_end < image_end {
        push_node(
            nodes,
            Range::new(last_end, image_end - last_end),
            "overlay",
            LayoutKind::Segment,
            Some(root),
        );
    }

    // fill holes between adjacent siblings; new segments are appended and
    // the list is resorted afterwards rather than mutated mid-iteration
    let pairs: Vec<(u64, u64)> = {
        let children = &nodes[root.0].children;
        children
            .windows(2)
            .map(|w| (nodes[w[0].0].range.end(), nodes[w[1].0].range.offset))
            .collect()
    };
    for (prior_end, next_start) in pairs {
        if prior_end < next_start {
            push_node(
                nodes,
                Range::new(prior_end, next_start - prior_end),
                "gap",
                LayoutKind::Segment,
                Some(root),
            );
        }
    }
    sort_children(nodes, root);

    attach_resources(nodes, pe, base, root);

    root
}

fn attach_resources(nodes: &mut Vec<LayoutNode>, pe: &PeImage, base: u64, root: NodeId) {
    let mut resources = pe.resources();
    resources.sort_by_key(|r| r.range.offset);

    for resource in resources {
        let range = Range::new(base + resource.range.offset, resource.range.length);

        // probe for an embedded image; a resource that fails to parse is
        // just bytes
        let node = push_node(
            nodes,
            range,
            format!("rsrc: {}", resource.name),
            LayoutKind::Resource,
            None,
        );
        if PeImage::looks_like_image(resource.data) {
            match PeImage::parse(resource.data) {
                Ok(nested) => {
                    let nested_root = build_image(nodes, &nested, range.offset);
                    nodes[nested_root.0].parent = Some(node);
                    nodes[node.0].children.push(nested_root);
                }
                Err(e) => {
                    debug!("resource {} is not a valid embedded image: {}", resource.name, e);
                }
            }
        }

        let container = nodes[root.0]
            .children
            .iter()
            .copied()
            .find(|&c| nodes[c.0].range.contains(range.offset));
        match container {
            Some(parent) => {
                nodes[node.0].parent = Some(parent);
                nodes[parent.0].children.push(node);
                sort_children(nodes, parent);
            }
            None => {
                debug!("resource {} falls outside every region", resource.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_layout_single_segment() {
        let layout = Layout::for_raw(0x1000);
        let root = layout.root();
        assert_eq!(layout.node(root).range, Range::new(0, 0x1000));
        assert_eq!(layout.node(root).name, "binary");
        assert!(layout.children(root).is_empty());
    }

    #[test]
    fn test_sibling_navigation() {
        let mut nodes = Vec::new();
        let root = push_node(
            &mut nodes,
            Range::new(0, 30),
            "root",
            LayoutKind::Image,
            None,
        );
        let a = push_node(
            &mut nodes,
            Range::new(0, 10),
            "a",
            LayoutKind::Segment,
            Some(root),
        );
        let b = push_node(
            &mut nodes,
            Range::new(10, 10),
            "b",
            LayoutKind::Segment,
            Some(root),
        );
        let c = push_node(
            &mut nodes,
            Range::new(20, 10),
            "c",
            LayoutKind::Segment,
            Some(root),
        );
        let layout = Layout { nodes, root };

        assert_eq!(layout.predecessor(a), None);
        assert_eq!(layout.predecessor(b), Some(a));
        assert_eq!(layout.successor(b), Some(c));
        assert_eq!(layout.successor(c), None);
        assert_eq!(layout.predecessor(root), None);
    }
}
