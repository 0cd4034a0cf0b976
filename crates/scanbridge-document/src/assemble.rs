// SPDX-License-Identifier: MIT
//
// PDF assembly -- turn an ordered sequence of captured images into one PDF
// document using `printpdf` 0.8.
//
// printpdf 0.8 uses a data-oriented API: documents are built by
// constructing `PdfPage` structs containing `Vec<Op>` operation lists,
// then serialised via `PdfDocument::save()`.

use printpdf::{
    Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Pt, RawImage, RawImageData,
    RawImageFormat, XObjectTransform,
};
use tracing::{debug, info, instrument};

use scanbridge_core::error::{Result, ScanbridgeError};

use crate::payload::decode_image_payload;

/// Output page size for assembled scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSize {
    #[default]
    A4,
    Letter,
}

impl PageSize {
    /// Dimensions in millimetres (width, height).
    pub fn dimensions_mm(&self) -> (f32, f32) {
        match self {
            Self::A4 => (210.0, 297.0),
            Self::Letter => (216.0, 279.0),
        }
    }
}

/// Assembles finalised scan sessions into a single PDF: one page per
/// captured image, in capture order.
///
/// Deterministic with respect to its input -- the same ordered image set
/// always produces the same page layout.
pub struct PdfAssembler {
    page_size: PageSize,
    /// Title metadata embedded in the PDF /Info dictionary.
    title: Option<String>,
}

impl PdfAssembler {
    pub fn new(page_size: PageSize) -> Self {
        Self {
            page_size,
            title: None,
        }
    }

    /// Create an assembler targeting A4 pages.
    pub fn a4() -> Self {
        Self::new(PageSize::A4)
    }

    /// Set a title for the PDF metadata.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// Build a PDF from ordered image payloads (base64 or data URLs).
    ///
    /// Each image becomes one page, scaled to fit within the page margins
    /// while preserving its aspect ratio. An empty image set is a caller
    /// error -- there is nothing to assemble.
    #[instrument(skip_all, fields(image_count = payloads.len()))]
    pub fn assemble(&self, payloads: &[String]) -> Result<Vec<u8>> {
        if payloads.is_empty() {
            return Err(ScanbridgeError::InvalidRequest(
                "cannot assemble a PDF from an empty image set".into(),
            ));
        }

        let (w_mm, h_mm) = self.page_size.dimensions_mm();
        let (page_w, page_h) = (Mm(w_mm), Mm(h_mm));
        let title = self.title.as_deref().unwrap_or("Scanned Document");

        info!(pages = payloads.len(), size = ?self.page_size, "assembling scan PDF");

        let mut doc = PdfDocument::new(title);
        let mut pages: Vec<PdfPage> = Vec::with_capacity(payloads.len());

        for (index, payload) in payloads.iter().enumerate() {
            let bytes = decode_image_payload(payload)?;
            let ops = self.place_image(&mut doc, &bytes, index)?;
            pages.push(PdfPage::new(page_w, page_h, ops));
        }

        doc.with_pages(pages);

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let output = doc.save(&PdfSaveOptions::default(), &mut warnings);

        debug!(output_bytes = output.len(), "scan PDF assembled");
        Ok(output)
    }

    /// Decode one image and produce the ops that centre it on a page.
    fn place_image(
        &self,
        doc: &mut PdfDocument,
        image_bytes: &[u8],
        index: usize,
    ) -> Result<Vec<Op>> {
        let dynamic_image = image::load_from_memory(image_bytes).map_err(|err| {
            ScanbridgeError::ImageError(format!("failed to decode image {}: {}", index + 1, err))
        })?;

        let img_width = dynamic_image.width() as usize;
        let img_height = dynamic_image.height() as usize;

        // printpdf wants raw RGB8 pixel data.
        let rgb_image = dynamic_image.to_rgb8();
        let raw = RawImage {
            pixels: RawImageData::U8(rgb_image.into_raw()),
            width: img_width,
            height: img_height,
            data_format: RawImageFormat::RGB8,
            tag: Vec::new(),
        };
        let xobject_id = doc.add_image(&raw);

        let (w_mm, h_mm) = self.page_size.dimensions_mm();
        let margin_mm: f32 = 10.0;
        let usable_w_pt = Mm(w_mm - 2.0 * margin_mm).into_pt().0;
        let usable_h_pt = Mm(h_mm - 2.0 * margin_mm).into_pt().0;

        // Image native size at 150 DPI, a sensible default for phone scans.
        let dpi: f32 = 150.0;
        let img_w_pt = img_width as f32 / dpi * 72.0;
        let img_h_pt = img_height as f32 / dpi * 72.0;

        // Scale to fit while preserving aspect ratio; do not upscale.
        let scale = (usable_w_pt / img_w_pt)
            .min(usable_h_pt / img_h_pt)
            .min(1.0);

        let margin_pt = Mm(margin_mm).into_pt().0;
        let x_offset = margin_pt + (usable_w_pt - img_w_pt * scale) / 2.0;
        let y_offset = margin_pt + (usable_h_pt - img_h_pt * scale) / 2.0;

        debug!(index, img_width, img_height, scale, "image placed");

        Ok(vec![Op::UseXobject {
            id: xobject_id,
            transform: XObjectTransform {
                translate_x: Some(Pt(x_offset)),
                translate_y: Some(Pt(y_offset)),
                scale_x: Some(scale),
                scale_y: Some(scale),
                dpi: Some(dpi),
                rotate: None,
            },
        }])
    }
}
