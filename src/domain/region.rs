//! Hierarchical region graphs.
//!
//! A region graph is the normalized output of the hOCR parser: a page root
//! owning paragraphs, which own lines, which own words. Nodes are immutable
//! after construction. The graph also exposes flattened reading-order views
//! of its words for consumers that want flat access without traversal, and a
//! canonical flat encoding (explicit parent-index back-references) for the
//! table codec, since trees are not natively columnar.

use serde::{Deserialize, Serialize};

use crate::core::errors::{DataError, DataResult};
use crate::domain::geometry::{BoundingBox, CoordinateSystem};

/// Sentinel confidence for leaf words whose input carried no explicit
/// confidence. Distinct from zero, which is a legitimate measured value.
pub const UNKNOWN_CONFIDENCE: f32 = -1.0;

/// The hierarchy level of a region node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    /// The root of the graph. Always and only the root.
    Page,
    /// A paragraph of text.
    Paragraph,
    /// A single line of text.
    Line,
    /// A single word. Always a leaf.
    Word,
}

impl RegionKind {
    /// A short lowercase name for diagnostics and encoding.
    pub fn name(&self) -> &'static str {
        match self {
            RegionKind::Page => "page",
            RegionKind::Paragraph => "paragraph",
            RegionKind::Line => "line",
            RegionKind::Word => "word",
        }
    }

    /// Parses a kind from its short name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "page" => Some(RegionKind::Page),
            "paragraph" => Some(RegionKind::Paragraph),
            "line" => Some(RegionKind::Line),
            "word" => Some(RegionKind::Word),
            _ => None,
        }
    }
}

/// One node in the hierarchical region graph.
///
/// Invariant: every non-root node's bounding box is contained within its
/// parent's box (the parser clips noisy input to guarantee this), and a word
/// never has children. The graph is read-only once parsing completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionNode {
    /// The hierarchy level of this node.
    pub kind: RegionKind,
    /// The node's bounding box, normalized to relative units.
    pub bbox: BoundingBox,
    /// Text content; present for words, absent for structural nodes.
    pub text: Option<String>,
    /// Confidence in [0, 100], or [`UNKNOWN_CONFIDENCE`].
    pub confidence: f32,
    /// Text angle in degrees, when the source markup declares one.
    pub angle: f32,
    /// Owned child nodes in reading order.
    pub children: Vec<RegionNode>,
}

impl RegionNode {
    /// Iterates over the subtree in preorder (reading order).
    pub fn iter(&self) -> RegionIter<'_> {
        RegionIter { stack: vec![self] }
    }

    /// Counts nodes of a given kind in the subtree.
    pub fn count(&self, kind: RegionKind) -> usize {
        self.iter().filter(|n| n.kind == kind).count()
    }
}

/// Preorder iterator over a region subtree.
pub struct RegionIter<'a> {
    stack: Vec<&'a RegionNode>,
}

impl<'a> Iterator for RegionIter<'a> {
    type Item = &'a RegionNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push children reversed so they pop in reading order.
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// One node of the canonical flat encoding of a region graph.
///
/// Nodes are listed in preorder with an explicit parent index; the root has
/// parent `-1`. The tree is reconstructed by a single linear pass grouping
/// children by parent index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRegionNode {
    /// The hierarchy level of the node.
    pub kind: RegionKind,
    /// Index of the parent node in the flat sequence, `-1` for the root.
    pub parent: i64,
    /// Corner coordinates `[x0, y0, x1, y1]`.
    pub bbox: [f32; 4],
    /// The coordinate system of `bbox`.
    pub system: CoordinateSystem,
    /// Text content, for word nodes.
    pub text: Option<String>,
    /// Confidence, or [`UNKNOWN_CONFIDENCE`].
    pub confidence: f32,
    /// Text angle in degrees.
    pub angle: f32,
}

/// A parsed region graph: the page root plus flattened word-level views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionGraph {
    /// The root page node.
    pub page: RegionNode,
}

impl RegionGraph {
    /// Wraps a page node, which must be of kind [`RegionKind::Page`].
    pub fn new(page: RegionNode) -> DataResult<Self> {
        if page.kind != RegionKind::Page {
            return Err(DataError::invalid_input(format!(
                "region graph root must be a page, got {}",
                page.kind.name()
            )));
        }
        Ok(Self { page })
    }

    /// All word texts in reading order.
    pub fn words(&self) -> Vec<&str> {
        self.word_nodes()
            .map(|n| n.text.as_deref().unwrap_or(""))
            .collect()
    }

    /// Word bounding boxes, parallel to [`RegionGraph::words`].
    pub fn word_boxes(&self) -> Vec<BoundingBox> {
        self.word_nodes().map(|n| n.bbox).collect()
    }

    /// Word confidences, parallel to [`RegionGraph::words`].
    pub fn word_confidences(&self) -> Vec<f32> {
        self.word_nodes().map(|n| n.confidence).collect()
    }

    fn word_nodes(&self) -> impl Iterator<Item = &RegionNode> {
        self.page.iter().filter(|n| n.kind == RegionKind::Word)
    }

    /// Flattens the graph into preorder nodes with parent back-references.
    pub fn flatten(&self) -> Vec<FlatRegionNode> {
        let mut out = Vec::new();
        flatten_into(&self.page, -1, &mut out);
        out
    }

    /// Reconstructs a graph from its flat encoding in a single linear pass.
    ///
    /// Fails with [`DataError::SchemaMismatch`] when the node list does not
    /// describe a preorder tree: empty input, a non-root first node, or a
    /// parent index that does not precede its child.
    pub fn from_flat(nodes: &[FlatRegionNode]) -> DataResult<Self> {
        if nodes.is_empty() {
            return Err(DataError::schema_mismatch("empty region node list"));
        }
        if nodes[0].parent != -1 {
            return Err(DataError::schema_mismatch(format!(
                "first region node must be the root, has parent {}",
                nodes[0].parent
            )));
        }

        let mut built: Vec<RegionNode> = Vec::with_capacity(nodes.len());
        // children[i] holds the indices of node i's children, in order.
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

        for (index, node) in nodes.iter().enumerate() {
            if index > 0 {
                let parent = node.parent;
                if parent < 0 || parent as usize >= index {
                    return Err(DataError::schema_mismatch(format!(
                        "region node {index} has invalid parent index {parent}"
                    )));
                }
                children[parent as usize].push(index);
            }
            built.push(RegionNode {
                kind: node.kind,
                bbox: BoundingBox {
                    x0: node.bbox[0],
                    y0: node.bbox[1],
                    x1: node.bbox[2],
                    y1: node.bbox[3],
                    system: node.system,
                },
                text: node.text.clone(),
                confidence: node.confidence,
                angle: node.angle,
                children: Vec::new(),
            });
        }

        // Attach children bottom-up; children always follow their parent in
        // preorder, so a reverse pass sees every subtree completed.
        for index in (0..nodes.len()).rev() {
            let mut attached = Vec::with_capacity(children[index].len());
            for &child in &children[index] {
                attached.push(std::mem::replace(
                    &mut built[child],
                    placeholder_node(),
                ));
            }
            built[index].children = attached;
        }

        Self::new(built.swap_remove(0))
    }
}

fn placeholder_node() -> RegionNode {
    RegionNode {
        kind: RegionKind::Word,
        bbox: BoundingBox::from_relative(0.0, 0.0, 0.0, 0.0),
        text: None,
        confidence: UNKNOWN_CONFIDENCE,
        angle: 0.0,
        children: Vec::new(),
    }
}

fn flatten_into(node: &RegionNode, parent: i64, out: &mut Vec<FlatRegionNode>) {
    let index = out.len() as i64;
    out.push(FlatRegionNode {
        kind: node.kind,
        parent,
        bbox: node.bbox.corners(),
        system: node.bbox.system,
        text: node.text.clone(),
        confidence: node.confidence,
        angle: node.angle,
    });
    for child in &node.children {
        flatten_into(child, index, out);
    }
}

/// Computes the arithmetic mean of the known confidences, ignoring unknown
/// sentinels. Returns the sentinel when no child has a known confidence.
pub(crate) fn mean_confidence(children: &[RegionNode]) -> f32 {
    let known: Vec<f32> = children
        .iter()
        .map(|c| c.confidence)
        .filter(|c| *c != UNKNOWN_CONFIDENCE)
        .collect();
    if known.is_empty() {
        UNKNOWN_CONFIDENCE
    } else {
        known.iter().sum::<f32>() / known.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, conf: f32, x0: f32) -> RegionNode {
        RegionNode {
            kind: RegionKind::Word,
            bbox: BoundingBox::from_relative(x0, 0.0, x0 + 0.1, 0.1),
            text: Some(text.into()),
            confidence: conf,
            angle: 0.0,
            children: Vec::new(),
        }
    }

    fn sample_graph() -> RegionGraph {
        let line = RegionNode {
            kind: RegionKind::Line,
            bbox: BoundingBox::from_relative(0.0, 0.0, 0.5, 0.1),
            text: None,
            confidence: 85.0,
            angle: 0.0,
            children: vec![word("hello", 90.0, 0.0), word("world", 80.0, 0.2)],
        };
        let paragraph = RegionNode {
            kind: RegionKind::Paragraph,
            bbox: BoundingBox::from_relative(0.0, 0.0, 0.5, 0.2),
            text: None,
            confidence: 85.0,
            angle: 0.0,
            children: vec![line],
        };
        let page = RegionNode {
            kind: RegionKind::Page,
            bbox: BoundingBox::from_relative(0.0, 0.0, 1.0, 1.0),
            text: None,
            confidence: 85.0,
            angle: 0.0,
            children: vec![paragraph],
        };
        RegionGraph::new(page).unwrap()
    }

    #[test]
    fn words_are_in_reading_order() {
        let graph = sample_graph();
        assert_eq!(graph.words(), ["hello", "world"]);
        assert_eq!(graph.word_confidences(), [90.0, 80.0]);
        assert_eq!(graph.word_boxes().len(), 2);
    }

    #[test]
    fn flatten_uses_parent_back_references() {
        let graph = sample_graph();
        let flat = graph.flatten();
        assert_eq!(flat.len(), 5);
        assert_eq!(flat[0].parent, -1);
        assert_eq!(flat[0].kind, RegionKind::Page);
        assert_eq!(flat[1].parent, 0);
        assert_eq!(flat[2].parent, 1);
        assert_eq!(flat[3].parent, 2);
        assert_eq!(flat[4].parent, 2);
    }

    #[test]
    fn flat_round_trip_preserves_structure() {
        let graph = sample_graph();
        let rebuilt = RegionGraph::from_flat(&graph.flatten()).unwrap();
        assert_eq!(rebuilt, graph);
    }

    #[test]
    fn flat_nodes_serialize_to_json_and_back() {
        let graph = sample_graph();
        let json = serde_json::to_string(&graph.flatten()).unwrap();
        let decoded: Vec<FlatRegionNode> = serde_json::from_str(&json).unwrap();
        assert_eq!(RegionGraph::from_flat(&decoded).unwrap(), graph);
    }

    #[test]
    fn from_flat_rejects_forward_parent() {
        let graph = sample_graph();
        let mut flat = graph.flatten();
        flat[1].parent = 3;
        assert!(RegionGraph::from_flat(&flat).is_err());
    }

    #[test]
    fn from_flat_rejects_empty_input() {
        assert!(RegionGraph::from_flat(&[]).is_err());
    }

    #[test]
    fn mean_confidence_ignores_unknown() {
        let children = vec![
            word("a", 90.0, 0.0),
            word("b", UNKNOWN_CONFIDENCE, 0.1),
            word("c", 70.0, 0.2),
        ];
        assert_eq!(mean_confidence(&children), 80.0);
        let unknown = vec![word("a", UNKNOWN_CONFIDENCE, 0.0)];
        assert_eq!(mean_confidence(&unknown), UNKNOWN_CONFIDENCE);
    }
}
