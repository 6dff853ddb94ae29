//! Searchable-PDF assembly: a visible layer (re-rendered JPEG pages, or the
//! original PDF's own page content, depending on `ProcessMode`) plus an
//! invisible hOCR-derived text layer, built directly with `lopdf`.
//!
//! Grounded on the low-level `Document`/`Stream`/`Content` construction shown
//! in the pack's `lopdf`-based PDF generators, combined with the standard
//! "searchable PDF" technique: one invisible (`Tr 3`) `Tj` text-showing
//! operator per recognized word, positioned and horizontally scaled to its
//! hOCR bounding box, set in the PDF's built-in Helvetica font so no font
//! file needs embedding.

use std::collections::HashMap;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};

use crate::ocr::hocr;
use crate::ocr::page_source::{ProcessMode, SourcePage};
use crate::prelude::*;

/// Assemble a searchable PDF. `pages` are the visible-layer sources: raw
/// JPEG bytes in image mode, or a single-page source PDF's bytes in
/// pdf/whole_pdf mode. `hocr` supplies the invisible text layer, one `Page`
/// per entry of `pages`, in the same order.
pub fn assemble(mode: ProcessMode, pages: &[SourcePage], hocr: &hocr::Document) -> Result<Vec<u8>> {
    if pages.len() != hocr.pages.len() {
        return Err(anyhow!(
            "page count mismatch assembling searchable PDF: {} visible page(s), {} hOCR page(s)",
            pages.len(),
            hocr.pages.len()
        ));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::with_capacity(pages.len());
    for (page, hocr_page) in pages.iter().zip(&hocr.pages) {
        let page_id = match mode {
            ProcessMode::Image => add_image_page(&mut doc, pages_id, font_id, page, hocr_page)?,
            ProcessMode::Pdf | ProcessMode::WholePdf => {
                add_imported_page(&mut doc, pages_id, font_id, page, hocr_page)?
            }
        };
        kids.push(Object::Reference(page_id));
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .context("failed to serialize assembled PDF")?;
    Ok(out)
}

/// Build a page whose visible layer is `page`'s JPEG bytes, shown full-page
/// via a `cm`-scaled `Do`, with the invisible text layer drawn on top.
fn add_image_page(
    doc: &mut Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    page: &SourcePage,
    hocr_page: &hocr::Page,
) -> Result<ObjectId> {
    let (width, height) = image::load_from_memory(&page.data)
        .map(|img| (img.width(), img.height()))
        .unwrap_or((hocr_page.width, hocr_page.height));

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        page.data.clone(),
    ));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
        "XObject" => dictionary! { "Im0" => image_id },
    });

    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                (width as f32).into(),
                0.into(),
                0.into(),
                (height as f32).into(),
                0.into(),
                0.into(),
            ],
        ),
        Operation::new("Do", vec!["Im0".into()]),
        Operation::new("Q", vec![]),
    ];
    operations.extend(text_overlay_operations(hocr_page));
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        Content { operations }.encode()?,
    ));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), (width as i64).into(), (height as i64).into()],
        "Contents" => content_id,
    }))
}

/// Build a page by importing `page`'s (single-page) source PDF content and
/// resources into `doc`, then appending the invisible text layer to its
/// content stream.
fn add_imported_page(
    doc: &mut Document,
    pages_id: ObjectId,
    _font_id: ObjectId,
    page: &SourcePage,
    hocr_page: &hocr::Page,
) -> Result<ObjectId> {
    let source = Document::load_mem(&page.data).context("failed to parse source PDF page")?;
    let source_page_id = *source
        .get_pages()
        .values()
        .next()
        .ok_or_else(|| anyhow!("source PDF has no pages"))?;
    let source_page_dict = source
        .get_dictionary(source_page_id)
        .context("source PDF page is not a dictionary")?
        .clone();

    let mut remap = HashMap::new();
    let resources = source_page_dict
        .get(b"Resources")
        .ok()
        .cloned()
        .unwrap_or_else(|| Object::Dictionary(Dictionary::new()));
    let resources = clone_object_tree(&source, doc, &resources, &mut remap)?;

    let mut content_bytes = Vec::new();
    for content_id in content_stream_ids(&source_page_dict) {
        let stream = source
            .get_object(content_id)
            .and_then(Object::as_stream)
            .context("source PDF page's Contents is not a stream")?;
        content_bytes.extend(
            stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone()),
        );
        content_bytes.push(b'\n');
    }
    content_bytes.extend(
        Content {
            operations: text_overlay_operations(hocr_page),
        }
        .encode()?,
    );
    let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

    let media_box = source_page_dict.get(b"MediaBox").ok().cloned().unwrap_or_else(|| {
        Object::Array(vec![
            0.into(),
            0.into(),
            (hocr_page.width as i64).into(),
            (hocr_page.height as i64).into(),
        ])
    });

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Resources" => resources,
        "MediaBox" => media_box,
        "Contents" => content_id,
    }))
}

pub(crate) fn content_stream_ids(page_dict: &Dictionary) -> Vec<ObjectId> {
    match page_dict.get(b"Contents") {
        Ok(Object::Reference(id)) => vec![*id],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Object::Reference(id) => Some(*id),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Deep-copy `object` from `source` into `dest`, remapping every indirect
/// reference it (transitively) touches. `remap` is reserved for a
/// reference's destination id before recursing into it, so a cycle through
/// that id resolves to the reservation instead of recursing forever.
fn clone_object_tree(
    source: &Document,
    dest: &mut Document,
    object: &Object,
    remap: &mut HashMap<ObjectId, ObjectId>,
) -> Result<Object> {
    match object {
        Object::Reference(id) => {
            if let Some(&dest_id) = remap.get(id) {
                return Ok(Object::Reference(dest_id));
            }
            let resolved = source
                .get_object(*id)
                .with_context(|| format!("dangling reference {id:?} in source PDF"))?;
            let dest_id = dest.new_object_id();
            remap.insert(*id, dest_id);
            let cloned = clone_object_tree(source, dest, resolved, remap)?;
            dest.objects.insert(dest_id, cloned);
            Ok(Object::Reference(dest_id))
        }
        Object::Dictionary(dict) => {
            let mut out = Dictionary::new();
            for (key, value) in dict.iter() {
                if key == b"Parent" {
                    continue;
                }
                out.set(key.clone(), clone_object_tree(source, dest, value, remap)?);
            }
            Ok(Object::Dictionary(out))
        }
        Object::Array(items) => Ok(Object::Array(
            items
                .iter()
                .map(|item| clone_object_tree(source, dest, item, remap))
                .collect::<Result<Vec<_>>>()?,
        )),
        Object::Stream(stream) => {
            let mut dict = Dictionary::new();
            for (key, value) in stream.dict.iter() {
                dict.set(key.clone(), clone_object_tree(source, dest, value, remap)?);
            }
            Ok(Object::Stream(Stream::new(dict, stream.content.clone())))
        }
        other => Ok(other.clone()),
    }
}

/// One invisible (`Tr 3`) `Tj` per hOCR word, each wrapped in its own
/// `BT`/`ET` block so a per-word `Td` is always relative to the page
/// origin, not the previous word's position.
fn text_overlay_operations(page: &hocr::Page) -> Vec<Operation> {
    let mut ops = Vec::new();
    for line in &page.lines {
        for word in &line.words {
            let font_size = word.bbox.height().max(1) as f32;
            let x = word.bbox.x0 as f32;
            let y = page.height.saturating_sub(word.bbox.y1) as f32;

            // The built-in Helvetica metrics don't match the recognized
            // glyphs, so the run is horizontally scaled to cover the word's
            // actual pixel width regardless of its text's natural width.
            let natural_width = word.text.chars().count().max(1) as f32 * font_size * 0.5;
            let h_scale = ((word.bbox.width().max(1) as f32) / natural_width * 100.0).clamp(1.0, 400.0);

            ops.push(Operation::new("BT", vec![]));
            ops.push(Operation::new("Tr", vec![3.into()]));
            ops.push(Operation::new("Tz", vec![h_scale.into()]));
            ops.push(Operation::new("Tf", vec!["F1".into(), font_size.into()]));
            ops.push(Operation::new("Td", vec![x.into(), y.into()]));
            ops.push(Operation::new(
                "Tj",
                vec![Object::String(
                    word.text.clone().into_bytes(),
                    StringFormat::Literal,
                )],
            ));
            ops.push(Operation::new("ET", vec![]));
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hocr_page() -> hocr::Page {
        hocr::Page {
            width: 200,
            height: 100,
            dpi: 300,
            lines: vec![hocr::Line {
                bbox: hocr::BBox {
                    x0: 10,
                    y0: 10,
                    x1: 100,
                    y1: 30,
                },
                words: vec![hocr::Word {
                    bbox: hocr::BBox {
                        x0: 10,
                        y0: 10,
                        x1: 100,
                        y1: 30,
                    },
                    text: "Hello".to_string(),
                    confidence: Some(0.9),
                }],
            }],
        }
    }

    #[test]
    fn assembles_a_single_image_page() {
        let img = image::DynamicImage::new_rgb8(200, 100);
        let mut jpeg = Vec::new();
        img.write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(
            &mut std::io::Cursor::new(&mut jpeg),
            85,
        ))
        .unwrap();

        let pages = vec![SourcePage {
            mime_type: "image/jpeg".to_string(),
            data: jpeg,
        }];
        let hocr_doc = hocr::Document {
            pages: vec![sample_hocr_page()],
        };
        let pdf = assemble(ProcessMode::Image, &pages, &hocr_doc).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
    }

    #[test]
    fn rejects_mismatched_page_counts() {
        let hocr_doc = hocr::Document {
            pages: vec![sample_hocr_page(), sample_hocr_page()],
        };
        let result = assemble(ProcessMode::Image, &[], &hocr_doc);
        assert!(result.is_err());
    }
}
