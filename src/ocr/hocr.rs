//! hOCR geometry types and HTML serialisation.
//!
//! The hOCR vocabulary we need is narrow: pages containing lines containing
//! words, each with a pixel bounding box. A templating crate would be
//! overkill for a handful of fixed tag shapes, so this is a small hand-written
//! writer, in the same spirit as the block-tree writer in
//! `ocr::backends::textract`.

use crate::prelude::*;

/// A pixel-space bounding box, `(x0, y0)` to `(x1, y1)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl BBox {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

/// A single recognised word and its geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Word {
    pub bbox: BBox,
    pub text: String,
    pub confidence: Option<f32>,
}

/// A line of words.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Line {
    pub bbox: BBox,
    pub words: Vec<Word>,
}

impl Default for BBox {
    fn default() -> Self {
        BBox {
            x0: 0,
            y0: 0,
            x1: 0,
            y1: 0,
        }
    }
}

/// A single page's hOCR geometry, rendered at `dpi`.
///
/// Invariant (per `OcrResult`): this page describes the same page, rendered
/// at the same DPI, that the sibling plaintext was produced from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Page {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub lines: Vec<Line>,
}

/// A whole-document hOCR structure: one `Page` per processed page, in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Document {
    pub pages: Vec<Page>,
}

impl Document {
    /// Serialise to hOCR HTML (the standard `ocr_page`/`ocr_line`/`ocrx_word`
    /// class vocabulary).
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        out.push_str(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"ocr-system\" content=\"docscribe-core\">\n\
             <meta name=\"ocr-capabilities\" content=\"ocr_page ocr_line ocrx_word\">\n\
             </head>\n<body>\n",
        );
        for (page_idx, page) in self.pages.iter().enumerate() {
            out.push_str(&format!(
                "<div class=\"ocr_page\" id=\"page_{page_idx}\" title=\"bbox 0 0 {} {}; ppageno {page_idx}; scan_res {} {}\">\n",
                page.width, page.height, page.dpi, page.dpi
            ));
            for (line_idx, line) in page.lines.iter().enumerate() {
                out.push_str(&format!(
                    "<span class=\"ocr_line\" id=\"line_{page_idx}_{line_idx}\" title=\"bbox {} {} {} {}\">\n",
                    line.bbox.x0, line.bbox.y0, line.bbox.x1, line.bbox.y1
                ));
                for (word_idx, word) in line.words.iter().enumerate() {
                    let conf = word
                        .confidence
                        .map(|c| format!("; x_wconf {:.0}", c * 100.0))
                        .unwrap_or_default();
                    out.push_str(&format!(
                        "<span class=\"ocrx_word\" id=\"word_{page_idx}_{line_idx}_{word_idx}\" title=\"bbox {} {} {} {}{conf}\">{}</span>\n",
                        word.bbox.x0,
                        word.bbox.y0,
                        word.bbox.x1,
                        word.bbox.y1,
                        escape_html(&word.text),
                    ));
                }
                out.push_str("</span>\n");
            }
            out.push_str("</div>\n");
        }
        out.push_str("</body>\n</html>\n");
        out
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_renders_expected_classes() {
        let doc = Document {
            pages: vec![Page {
                width: 100,
                height: 200,
                dpi: 300,
                lines: vec![Line {
                    bbox: BBox {
                        x0: 1,
                        y0: 2,
                        x1: 50,
                        y1: 20,
                    },
                    words: vec![Word {
                        bbox: BBox {
                            x0: 1,
                            y0: 2,
                            x1: 20,
                            y1: 20,
                        },
                        text: "Hello".to_string(),
                        confidence: Some(0.95),
                    }],
                }],
            }],
        };
        let html = doc.to_html();
        assert!(html.contains("ocr_page"));
        assert!(html.contains("ocr_line"));
        assert!(html.contains("ocrx_word"));
        assert!(html.contains("Hello"));
        assert!(html.contains("x_wconf 95"));
    }

    #[test]
    fn escapes_html_special_characters() {
        let doc = Document {
            pages: vec![Page {
                width: 1,
                height: 1,
                dpi: 72,
                lines: vec![Line {
                    bbox: BBox::default(),
                    words: vec![Word {
                        bbox: BBox::default(),
                        text: "<b>&".to_string(),
                        confidence: None,
                    }],
                }],
            }],
        };
        assert!(doc.to_html().contains("&lt;b&gt;&amp;"));
    }
}
