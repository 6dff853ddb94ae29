//! OCR via AWS Textract.
//!
//! Grounded on `elevatelaw-prompt-scaler/src/queues/ocr/engines/textract.rs`'s
//! `TextractOcrEngine`: call `analyze_document` with the `LAYOUT` feature,
//! build a block-by-id table, and walk the block tree recursively,
//! deduplicating by block id so a block reachable through more than one
//! relationship path is only ever emitted once. This backend additionally
//! keeps the `WORD`/`LINE` blocks' bounding boxes, which the teacher's engine
//! collects only to discard; here they feed `hocr::Page` instead.

use std::collections::{HashMap, HashSet};

use aws_sdk_textract::operation::analyze_document::AnalyzeDocumentOutput;
use aws_sdk_textract::primitives::Blob;
use aws_sdk_textract::types::{Block, BlockType, FeatureType, RelationshipType};
use leaky_bucket::RateLimiter;

use crate::aws::load_aws_config;
use crate::model::OcrResult;
use crate::ocr::hocr;
use crate::prelude::*;
use crate::rate_limit::{RateLimit, RateLimitPeriod};

use super::super::backend::{OcrBackend, OcrPageInput};

/// Our estimated page cost, based on the `LAYOUT` feature we request.
const ESTIMATED_PAGE_COST: f64 = 0.004;

pub struct TextractBackend {
    client: aws_sdk_textract::Client,
    rate_limiter: RateLimiter,
}

impl TextractBackend {
    pub async fn new(concurrency_limit: usize, rate_limit: Option<RateLimit>) -> Result<Self> {
        let config = load_aws_config().await?;
        let client = aws_sdk_textract::Client::new(&config);
        let rate_limit = rate_limit
            .unwrap_or_else(|| RateLimit::new(concurrency_limit, RateLimitPeriod::Second));
        Ok(Self {
            client,
            rate_limiter: rate_limit.to_rate_limiter(),
        })
    }
}

#[async_trait]
impl OcrBackend for TextractBackend {
    #[instrument(level = "debug", skip_all, fields(page = %input.page_number))]
    async fn process_image(&self, input: OcrPageInput) -> Result<OcrResult> {
        self.rate_limiter.acquire_one().await;

        let document = aws_sdk_textract::types::Document::builder()
            .bytes(Blob::new(input.data))
            .build();

        let response = self
            .client
            .analyze_document()
            .document(document)
            .set_feature_types(Some(vec![FeatureType::Layout]))
            .send()
            .await
            .context("AWS Textract request failed")?;

        let mut blocks_by_id = HashMap::new();
        for block in response.blocks() {
            if let Some(id) = block.id() {
                blocks_by_id.insert(id, block);
            }
        }

        let mut state = OutputState::new(blocks_by_id);
        state.write_analyzed_document(&response)?;

        Ok(OcrResult {
            text: state.output,
            hocr_page: state.hocr_page(),
            limit_hit: false,
            generation_info: json!({
                "backend": "textract",
                "estimated_cost": ESTIMATED_PAGE_COST,
            }),
        })
    }

    fn is_hocr_capable(&self) -> bool {
        true
    }
}

/// Output state for the recursive block walk: accumulates plain text and, in
/// parallel, `LINE`/`WORD` geometry keyed by line.
#[derive(Debug)]
struct OutputState<'a> {
    output: String,
    blocks_by_id: HashMap<&'a str, &'a Block>,
    printed_block_ids: HashSet<&'a str>,
    lines: Vec<hocr::Line>,
    current_line: Option<hocr::Line>,
}

impl<'a> OutputState<'a> {
    fn new(blocks_by_id: HashMap<&'a str, &'a Block>) -> Self {
        Self {
            output: String::new(),
            blocks_by_id,
            printed_block_ids: HashSet::new(),
            lines: Vec::new(),
            current_line: None,
        }
    }

    fn bytes_written(&self) -> usize {
        self.output.len()
    }

    fn hocr_page(self) -> Option<hocr::Page> {
        if self.lines.is_empty() {
            return None;
        }
        Some(hocr::Page {
            // Textract reports geometry normalized to [0, 1]; we store it
            // scaled to this synthetic 1000x1000 space and rely on
            // `ocr::pdf_assemble` to rescale against the real page size.
            width: 1000,
            height: 1000,
            dpi: 0,
            lines: self.lines,
        })
    }

    fn write_analyzed_document<'d: 'a>(&mut self, document: &'d AnalyzeDocumentOutput) -> Result<()> {
        for block in document.blocks() {
            let Some(block_type) = block.block_type() else {
                continue;
            };
            if !block_type.as_str().starts_with("LAYOUT_") {
                continue;
            }
            let bytes_written = self.bytes_written();
            self.write_block(block, false)?;
            if self.bytes_written() > bytes_written {
                self.output.push('\n');
            }
        }
        Ok(())
    }

    fn write_block(&mut self, block: &'a Block, printed_parent: bool) -> Result<()> {
        if let Some(id) = block.id()
            && !self.printed_block_ids.insert(id)
        {
            return Ok(());
        }

        let mut printed_self = false;
        if !printed_parent {
            if let Some(text) = block.text() {
                self.output.push_str(text);
                match block.block_type() {
                    Some(BlockType::Line) => {
                        self.flush_line();
                        self.current_line = Some(hocr::Line {
                            bbox: normalized_bbox(block),
                            words: Vec::new(),
                        });
                        self.output.push('\n');
                    }
                    Some(BlockType::Word) => {
                        if let Some(line) = &mut self.current_line {
                            line.words.push(hocr::Word {
                                bbox: normalized_bbox(block),
                                text: text.to_string(),
                                confidence: block.confidence().map(|c| c / 100.0),
                            });
                        }
                        self.output.push(' ');
                    }
                    _ => {}
                }
                printed_self = true;
            }
        }

        for relationship in block.relationships() {
            if relationship.r#type() == Some(&RelationshipType::Child) {
                for id in relationship.ids() {
                    if let Some(child_block) = self.blocks_by_id.get(&id[..]) {
                        self.write_block(child_block, printed_self)?;
                    } else {
                        return Err(anyhow!("Textract child block {} not found", id));
                    }
                }
            }
        }

        if !printed_parent && block.block_type() == Some(&BlockType::Line) {
            self.flush_line();
        }
        Ok(())
    }

    fn flush_line(&mut self) {
        if let Some(line) = self.current_line.take() {
            self.lines.push(line);
        }
    }
}

/// Convert Textract's normalized `[0, 1]` bounding box to our `0..=1000`
/// pixel-like space.
fn normalized_bbox(block: &Block) -> hocr::BBox {
    let Some(geometry) = block.geometry() else {
        return hocr::BBox::default();
    };
    let Some(bbox) = geometry.bounding_box() else {
        return hocr::BBox::default();
    };
    let left = bbox.left().unwrap_or(0.0);
    let top = bbox.top().unwrap_or(0.0);
    let width = bbox.width().unwrap_or(0.0);
    let height = bbox.height().unwrap_or(0.0);
    hocr::BBox {
        x0: (left * 1000.0).round().max(0.0) as u32,
        y0: (top * 1000.0).round().max(0.0) as u32,
        x1: ((left + width) * 1000.0).round().max(0.0) as u32,
        y1: ((top + height) * 1000.0).round().max(0.0) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hocr_page_is_none_when_no_lines_seen() {
        let state = OutputState::new(HashMap::new());
        assert!(state.hocr_page().is_none());
    }
}
