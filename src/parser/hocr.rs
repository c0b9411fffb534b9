//! hOCR region parsing.
//!
//! Walks an hOCR element tree and produces a [`RegionGraph`] per page:
//! paragraphs under the page, lines under paragraphs, words under lines.
//! Intermediate grouping elements the grammar does not model (content areas,
//! plain divs) are skipped with their children hoisted to the nearest
//! recognized ancestor, so documents with or without them parse to the same
//! shape.
//!
//! All coordinates are normalized to relative units against the page size
//! taken from the page's own `bbox`, then clipped to their parent region.
//! Words missing `x_wconf` carry [`UNKNOWN_CONFIDENCE`]; structural nodes
//! without an explicit confidence receive the mean of their children's known
//! confidences, computed bottom-up.

use tracing::{debug, warn};

use crate::core::errors::{DataError, DataResult};
use crate::domain::geometry::{BoundingBox, OutOfRangePolicy};
use crate::domain::region::{
    mean_confidence, RegionGraph, RegionKind, RegionNode, UNKNOWN_CONFIDENCE,
};
use crate::parser::markup::{self, Element};

/// Configuration for the hOCR parser.
#[derive(Debug, Clone)]
pub struct HocrParserConfig {
    /// How to handle coordinates outside the page after normalization.
    pub out_of_range: OutOfRangePolicy,
    /// Whether to clip each region to its parent's bounding box.
    pub clip_to_parent: bool,
}

impl Default for HocrParserConfig {
    fn default() -> Self {
        Self {
            out_of_range: OutOfRangePolicy::default(),
            clip_to_parent: true,
        }
    }
}

/// Parser from hOCR markup to hierarchical region graphs.
#[derive(Debug, Default)]
pub struct HocrParser {
    config: HocrParserConfig,
}

impl HocrParser {
    /// Creates a parser with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser with an explicit configuration.
    pub fn with_config(config: HocrParserConfig) -> Self {
        Self { config }
    }

    /// Parses the first page of an hOCR document.
    ///
    /// Fails with [`DataError::MarkupParse`] on structurally invalid markup
    /// and with [`DataError::InvalidInput`] when the document contains no
    /// `ocr_page` element.
    pub fn parse(&self, input: &str) -> DataResult<RegionGraph> {
        let mut pages = self.parse_pages(input)?;
        if pages.is_empty() {
            return Err(DataError::invalid_input(
                "document contains no ocr_page element",
            ));
        }
        Ok(pages.swap_remove(0))
    }

    /// Parses every page of an hOCR document, in document order.
    pub fn parse_pages(&self, input: &str) -> DataResult<Vec<RegionGraph>> {
        let document = markup::parse(input)?;
        let mut page_elements = Vec::new();
        find_pages(&document, &mut page_elements);
        debug!(pages = page_elements.len(), "parsed hOCR document");
        page_elements
            .into_iter()
            .map(|element| self.build_page(element))
            .collect()
    }

    fn build_page(&self, element: &Element) -> DataResult<RegionGraph> {
        let title = TitleProperties::parse(element.attribute("title").unwrap_or(""));
        let (page_width, page_height, page_bbox) = match title.bbox {
            Some(bbox) if bbox.x1 > 0.0 && bbox.y1 > 0.0 => (bbox.x1, bbox.y1, bbox),
            _ => {
                warn!("page has no usable bbox; coordinates are kept unscaled");
                (1.0, 1.0, BoundingBox::from_pixels(0.0, 0.0, 1.0, 1.0))
            }
        };

        let mut page = RegionNode {
            kind: RegionKind::Page,
            bbox: page_bbox,
            text: None,
            confidence: title.confidence.unwrap_or(UNKNOWN_CONFIDENCE),
            angle: title.angle.unwrap_or(0.0),
            children: Vec::new(),
        };
        self.collect_regions(element, page_bbox, &mut page.children);

        self.normalize_node(&mut page, page_width, page_height, None)?;
        propagate_confidence(&mut page);
        RegionGraph::new(page)
    }

    /// Collects recognized regions among `element`'s descendants, hoisting
    /// children of unrecognized wrappers up to the current parent.
    fn collect_regions(
        &self,
        element: &Element,
        parent_bbox: BoundingBox,
        nodes: &mut Vec<RegionNode>,
    ) {
        for child in &element.children {
            match child_kind(child) {
                Some(kind) => {
                    if let Some(node) = self.build_node(child, kind, parent_bbox) {
                        nodes.push(node);
                    }
                }
                None => self.collect_regions(child, parent_bbox, nodes),
            }
        }
    }

    fn build_node(
        &self,
        element: &Element,
        kind: RegionKind,
        parent_bbox: BoundingBox,
    ) -> Option<RegionNode> {
        let title = TitleProperties::parse(element.attribute("title").unwrap_or(""));
        let bbox = title.bbox.unwrap_or(parent_bbox);
        let mut node = RegionNode {
            kind,
            bbox,
            text: None,
            confidence: title.confidence.unwrap_or(UNKNOWN_CONFIDENCE),
            angle: title.angle.unwrap_or(0.0),
            children: Vec::new(),
        };

        if kind == RegionKind::Word {
            let text = element.deep_text();
            if text.is_empty() {
                debug!("skipping word element with no text");
                return None;
            }
            node.text = Some(text);
        } else {
            self.collect_regions(element, bbox, &mut node.children);
        }
        Some(node)
    }

    fn normalize_node(
        &self,
        node: &mut RegionNode,
        page_width: f32,
        page_height: f32,
        parent_bbox: Option<BoundingBox>,
    ) -> DataResult<()> {
        let mut bbox = node
            .bbox
            .normalized(page_width, page_height, self.config.out_of_range)?;
        if let Some(parent) = parent_bbox {
            if self.config.clip_to_parent && !parent.contains(&bbox) {
                debug!(kind = node.kind.name(), "clipping region to its parent");
                bbox = bbox.clipped_to(&parent);
            }
        }
        node.bbox = bbox;
        for child in &mut node.children {
            self.normalize_node(child, page_width, page_height, Some(bbox))?;
        }
        Ok(())
    }
}

/// Recursively computes structural confidences from the leaves up. Explicit
/// confidences from the markup are kept.
fn propagate_confidence(node: &mut RegionNode) {
    for child in &mut node.children {
        propagate_confidence(child);
    }
    if node.kind != RegionKind::Word
        && node.confidence == UNKNOWN_CONFIDENCE
        && !node.children.is_empty()
    {
        node.confidence = mean_confidence(&node.children);
    }
}

fn find_pages<'a>(element: &'a Element, out: &mut Vec<&'a Element>) {
    if has_class(element, "ocr_page") {
        out.push(element);
        return;
    }
    for child in &element.children {
        find_pages(child, out);
    }
}

fn has_class(element: &Element, class: &str) -> bool {
    element
        .attribute("class")
        .map(|value| value.split_whitespace().any(|token| token == class))
        .unwrap_or(false)
}

/// Classifies a page descendant. Content areas and other wrappers are
/// unrecognized and get their children hoisted. Tesseract's line-level
/// variants (headers, captions, floats) behave as lines.
fn child_kind(element: &Element) -> Option<RegionKind> {
    let class = element.attribute("class")?;
    for token in class.split_whitespace() {
        let kind = match token {
            "ocr_par" => Some(RegionKind::Paragraph),
            "ocr_line" | "ocr_header" | "ocr_caption" | "ocr_textfloat" => Some(RegionKind::Line),
            "ocrx_word" => Some(RegionKind::Word),
            _ => None,
        };
        if kind.is_some() {
            return kind;
        }
    }
    None
}

/// Properties parsed from an hOCR `title` attribute.
#[derive(Debug, Default)]
struct TitleProperties {
    bbox: Option<BoundingBox>,
    confidence: Option<f32>,
    angle: Option<f32>,
}

impl TitleProperties {
    /// Parses the semicolon-separated `key value...` fragments of a title
    /// attribute. Unknown keys are ignored; malformed known fragments are
    /// dropped with a warning rather than failing the document.
    fn parse(title: &str) -> Self {
        let mut props = Self::default();
        for fragment in title.split(';') {
            let mut tokens = fragment.split_whitespace();
            match tokens.next() {
                Some("bbox") => {
                    let coords: Vec<f32> =
                        tokens.by_ref().take(4).filter_map(|t| t.parse().ok()).collect();
                    if coords.len() == 4 {
                        props.bbox = Some(BoundingBox::from_pixels(
                            coords[0], coords[1], coords[2], coords[3],
                        ));
                    } else {
                        warn!(fragment = fragment.trim(), "ignoring malformed bbox");
                    }
                }
                Some("x_wconf") => match tokens.next().and_then(|t| t.parse().ok()) {
                    Some(value) => props.confidence = Some(value),
                    None => warn!(fragment = fragment.trim(), "ignoring malformed x_wconf"),
                },
                Some("textangle") => match tokens.next().and_then(|t| t.parse().ok()) {
                    Some(value) => props.angle = Some(value),
                    None => warn!(fragment = fragment.trim(), "ignoring malformed textangle"),
                },
                _ => {}
            }
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geometry::CoordinateSystem;

    const SAMPLE: &str = r#"
        <html><body>
          <div class="ocr_page" title='image "p1.png"; bbox 0 0 2000 3000'>
            <div class="ocr_carea" title="bbox 0 0 2000 1500">
              <p class="ocr_par" title="bbox 80 80 1900 400">
                <span class="ocr_line" title="bbox 100 100 900 150">
                  <span class="ocrx_word" title="bbox 100 100 300 150; x_wconf 85">Hello</span>
                  <span class="ocrx_word" title="bbox 320 100 520 150; x_wconf 95">world</span>
                </span>
                <span class="ocr_line" title="bbox 100 200 900 250">
                  <span class="ocrx_word" title="bbox 100 200 300 250">dim</span>
                </span>
              </p>
            </div>
          </div>
        </body></html>"#;

    #[test]
    fn parses_page_hierarchy_with_hoisted_careas() {
        let graph = HocrParser::new().parse(SAMPLE).unwrap();
        assert_eq!(graph.page.kind, RegionKind::Page);
        assert_eq!(graph.page.count(RegionKind::Paragraph), 1);
        assert_eq!(graph.page.count(RegionKind::Line), 2);
        assert_eq!(graph.words(), ["Hello", "world", "dim"]);
    }

    #[test]
    fn normalizes_against_the_page_bbox() {
        let graph = HocrParser::new().parse(SAMPLE).unwrap();
        let boxes = graph.word_boxes();
        let first = boxes[0];
        assert_eq!(first.system, CoordinateSystem::Relative);
        assert!((first.x0 - 0.05).abs() < 1e-6);
        assert!((first.y0 - 100.0 / 3000.0).abs() < 1e-6);
        assert!((first.x1 - 0.15).abs() < 1e-6);
        assert!((first.y1 - 0.05).abs() < 1e-6);

        let page = graph.page.bbox;
        assert_eq!(page.corners(), [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn missing_word_confidence_is_the_unknown_sentinel() {
        let graph = HocrParser::new().parse(SAMPLE).unwrap();
        assert_eq!(graph.word_confidences(), [85.0, 95.0, UNKNOWN_CONFIDENCE]);
    }

    #[test]
    fn structural_confidence_is_the_mean_of_known_children() {
        let graph = HocrParser::new().parse(SAMPLE).unwrap();
        let paragraph = &graph.page.children[0];
        let first_line = &paragraph.children[0];
        let second_line = &paragraph.children[1];
        assert_eq!(first_line.confidence, 90.0);
        // The only word has no confidence, so neither does the line.
        assert_eq!(second_line.confidence, UNKNOWN_CONFIDENCE);
        // The paragraph averages over lines with known confidence.
        assert_eq!(paragraph.confidence, 90.0);
        assert_eq!(graph.page.confidence, 90.0);
    }

    #[test]
    fn single_line_page_averages_word_confidences() {
        let input = r#"
            <div class="ocr_page" title="bbox 0 0 2000 3000">
              <p class="ocr_par" title="bbox 100 100 500 150">
                <span class="ocr_line" title="bbox 100 100 500 150">
                  <span class="ocrx_word" title="bbox 100 100 300 150; x_wconf 90">first</span>
                  <span class="ocrx_word" title="bbox 310 100 500 150; x_wconf 80">second</span>
                </span>
              </p>
            </div>"#;
        let graph = HocrParser::new().parse(input).unwrap();
        assert_eq!(graph.page.count(RegionKind::Line), 1);
        assert_eq!(graph.words(), ["first", "second"]);

        let line = &graph.page.children[0].children[0];
        assert_eq!(line.confidence, 85.0);

        let boxes = graph.word_boxes();
        assert!((boxes[0].x0 - 0.05).abs() < 1e-6);
        assert!((boxes[0].y0 - 100.0 / 3000.0).abs() < 1e-6);
        assert!((boxes[0].x1 - 0.15).abs() < 1e-6);
        assert!((boxes[0].y1 - 0.05).abs() < 1e-6);
        assert!((boxes[1].x0 - 0.155).abs() < 1e-6);
        assert!((boxes[1].x1 - 0.25).abs() < 1e-6);
    }

    #[test]
    fn words_are_clipped_into_their_line() {
        let input = r#"
            <div class="ocr_page" title="bbox 0 0 100 100">
              <p class="ocr_par" title="bbox 0 0 100 100">
                <span class="ocr_line" title="bbox 0 0 50 10">
                  <span class="ocrx_word" title="bbox 40 0 80 10; x_wconf 50">wide</span>
                </span>
              </p>
            </div>"#;
        let graph = HocrParser::new().parse(input).unwrap();
        let word = graph.word_boxes()[0];
        assert_eq!(word.corners(), [0.4, 0.0, 0.5, 0.1]);
    }

    #[test]
    fn out_of_page_coordinates_clamp_by_default_and_reject_when_strict() {
        let input = r#"
            <div class="ocr_page" title="bbox 0 0 100 100">
              <p class="ocr_par" title="bbox 0 0 100 100">
                <span class="ocr_line" title="bbox 0 0 100 100">
                  <span class="ocrx_word" title="bbox 90 90 120 110; x_wconf 50">edge</span>
                </span>
              </p>
            </div>"#;

        let graph = HocrParser::new().parse(input).unwrap();
        assert_eq!(graph.word_boxes()[0].corners(), [0.9, 0.9, 1.0, 1.0]);

        let strict = HocrParser::with_config(HocrParserConfig {
            out_of_range: OutOfRangePolicy::Reject,
            ..HocrParserConfig::default()
        });
        assert!(matches!(
            strict.parse(input),
            Err(DataError::InvalidInput { .. })
        ));
    }

    #[test]
    fn missing_bbox_falls_back_to_the_parent_box() {
        let input = r#"
            <div class="ocr_page" title="bbox 0 0 100 100">
              <p class="ocr_par" title="bbox 10 10 90 90">
                <span class="ocr_line">
                  <span class="ocrx_word" title="x_wconf 70">word</span>
                </span>
              </p>
            </div>"#;
        let graph = HocrParser::new().parse(input).unwrap();
        let paragraph = &graph.page.children[0];
        let line = &paragraph.children[0];
        assert_eq!(line.bbox, paragraph.bbox);
        assert_eq!(graph.word_boxes()[0], line.bbox);
    }

    #[test]
    fn empty_words_are_skipped() {
        let input = r#"
            <div class="ocr_page" title="bbox 0 0 100 100">
              <span class="ocr_line" title="bbox 0 0 50 10">
                <span class="ocrx_word" title="bbox 0 0 10 10; x_wconf 50"></span>
                <span class="ocrx_word" title="bbox 20 0 30 10; x_wconf 60">kept</span>
              </span>
            </div>"#;
        let graph = HocrParser::new().parse(input).unwrap();
        assert_eq!(graph.words(), ["kept"]);
    }

    #[test]
    fn textangle_is_parsed_per_node() {
        let input = r#"
            <div class="ocr_page" title="bbox 0 0 100 100">
              <span class="ocr_line" title="bbox 0 0 50 10; textangle 90">
                <span class="ocrx_word" title="bbox 0 0 10 10; x_wconf 50">up</span>
              </span>
            </div>"#;
        let graph = HocrParser::new().parse(input).unwrap();
        assert_eq!(graph.page.children[0].angle, 90.0);
        assert_eq!(graph.page.children[0].children[0].angle, 0.0);
    }

    #[test]
    fn page_without_bbox_keeps_unscaled_coordinates() {
        let input = r#"
            <div class="ocr_page">
              <span class="ocr_line" title="bbox 0 0 1 1">
                <span class="ocrx_word" title="bbox 0 0 1 1; x_wconf 10">w</span>
              </span>
            </div>"#;
        let graph = HocrParser::new().parse(input).unwrap();
        assert_eq!(graph.words(), ["w"]);
        assert_eq!(graph.word_boxes()[0].corners(), [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn multiple_pages_parse_in_document_order() {
        let input = r#"
            <html><body>
              <div class="ocr_page" title="bbox 0 0 10 10">
                <span class="ocr_line" title="bbox 0 0 5 5">
                  <span class="ocrx_word" title="bbox 0 0 5 5; x_wconf 1">one</span>
                </span>
              </div>
              <div class="ocr_page" title="bbox 0 0 10 10">
                <span class="ocr_line" title="bbox 0 0 5 5">
                  <span class="ocrx_word" title="bbox 0 0 5 5; x_wconf 2">two</span>
                </span>
              </div>
            </body></html>"#;
        let pages = HocrParser::new().parse_pages(input).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].words(), ["one"]);
        assert_eq!(pages[1].words(), ["two"]);
    }

    #[test]
    fn document_without_a_page_is_invalid_input() {
        let err = HocrParser::new().parse("<html><body></body></html>").unwrap_err();
        assert!(matches!(err, DataError::InvalidInput { .. }));
    }

    #[test]
    fn malformed_title_fragments_are_ignored() {
        let input = r#"
            <div class="ocr_page" title="bbox 0 0 100 100">
              <span class="ocr_line" title="bbox nan nan; x_wconf; textangle up">
                <span class="ocrx_word" title="bbox 0 0 10 10; x_wconf 50">w</span>
              </span>
            </div>"#;
        let graph = HocrParser::new().parse(input).unwrap();
        // The malformed line bbox falls back to the page box; the malformed
        // confidence and angle fall back to their defaults.
        let line = &graph.page.children[0];
        assert_eq!(line.bbox, graph.page.bbox);
        assert_eq!(line.angle, 0.0);
        assert_eq!(graph.words(), ["w"]);
        assert_eq!(graph.word_confidences(), [50.0]);
    }

    #[test]
    fn unbalanced_markup_is_a_parse_error() {
        let err = HocrParser::new()
            .parse(r#"<div class="ocr_page" title="bbox 0 0 1 1">"#)
            .unwrap_err();
        assert!(matches!(err, DataError::MarkupParse { .. }));
    }
}
