// SPDX-License-Identifier: MIT
//
// PDF utility operations -- merge, split, and page numbering on existing
// documents using the `lopdf` crate.
//
// Pages are imported between documents by deep-cloning the page object and
// everything it transitively references (content streams, fonts, images),
// then grafting the clone onto the target's page tree. The /Parent
// back-reference is skipped during the clone and patched afterwards to
// avoid dragging the whole source page tree across.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info, instrument, warn};

use scanbridge_core::error::{Result, ScanbridgeError};

/// Resource name under which the page-numbering font is registered.
const NUMBER_FONT_KEY: &str = "SbPageNum";

/// Font size (pt) for stamped page numbers.
const NUMBER_FONT_SIZE: f32 = 9.0;

/// Utility operations over a loaded PDF document.
#[derive(Debug)]
pub struct PdfOps {
    document: Document,
}

impl PdfOps {
    // -- Construction ---------------------------------------------------------

    /// Load a PDF from raw bytes.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data)
            .map_err(|err| ScanbridgeError::PdfError(format!("failed to load PDF: {err}")))?;

        debug!(pages = document.get_pages().len(), "PDF loaded");
        Ok(Self { document })
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    // -- Merge ----------------------------------------------------------------

    /// Concatenate several PDF documents into one, pages in input order.
    #[instrument(skip_all, fields(document_count = documents.len()))]
    pub fn merge(documents: &[&[u8]]) -> Result<Vec<u8>> {
        if documents.is_empty() {
            return Err(ScanbridgeError::InvalidRequest(
                "nothing to merge: no documents supplied".into(),
            ));
        }

        let (mut target, pages_id) = empty_document();

        for (index, bytes) in documents.iter().enumerate() {
            let source = Document::load_mem(bytes).map_err(|err| {
                ScanbridgeError::PdfError(format!("failed to load PDF #{}: {}", index + 1, err))
            })?;

            let source_pages = source.get_pages();
            for (_, page_id) in &source_pages {
                append_page(&source, &mut target, pages_id, *page_id)?;
            }
        }

        let output = serialise(&mut target)?;
        info!(
            documents = documents.len(),
            output_bytes = output.len(),
            "PDFs merged"
        );
        Ok(output)
    }

    // -- Split ----------------------------------------------------------------

    /// Split the document after `after_page` (1-indexed, inclusive),
    /// producing pages `[1..=after_page]` and `[after_page+1..=end]`.
    #[instrument(skip(self), fields(after_page))]
    pub fn split(&self, after_page: u32) -> Result<(Vec<u8>, Vec<u8>)> {
        let total = self.page_count() as u32;
        if after_page == 0 || after_page >= total {
            return Err(ScanbridgeError::PdfError(format!(
                "split point {after_page} invalid for {total} page document"
            )));
        }

        info!(after_page, total, "splitting PDF");

        let first = self.extract_range(1, after_page)?;
        let second = self.extract_range(after_page + 1, total)?;
        Ok((first, second))
    }

    /// Extract a contiguous 1-indexed page range into a standalone PDF.
    fn extract_range(&self, start: u32, end: u32) -> Result<Vec<u8>> {
        let pages = self.document.get_pages();
        let (mut target, pages_id) = empty_document();

        for page_num in start..=end {
            let page_id = *pages.get(&page_num).ok_or_else(|| {
                ScanbridgeError::PdfError(format!("page {page_num} not found in page tree"))
            })?;
            append_page(&self.document, &mut target, pages_id, page_id)?;
        }

        serialise(&mut target)
    }

    // -- Page numbering -------------------------------------------------------

    /// Stamp "n / total" in the bottom margin of every page, returning the
    /// numbered document as bytes. The original document is untouched.
    #[instrument(skip(self))]
    pub fn number_pages(&self) -> Result<Vec<u8>> {
        let mut doc = self.document.clone();
        let pages = doc.get_pages();
        let total = pages.len();
        if total == 0 {
            return Err(ScanbridgeError::PdfError(
                "cannot number a document with no pages".into(),
            ));
        }

        // One shared Helvetica resource for every page's stamp.
        let mut font = Dictionary::new();
        font.set("Type", Object::Name(b"Font".to_vec()));
        font.set("Subtype", Object::Name(b"Type1".to_vec()));
        font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
        let font_id = doc.add_object(Object::Dictionary(font));

        for (page_num, page_id) in &pages {
            let (page_w, _) = page_media_size(&doc, *page_id);
            let text = format!("{page_num} / {total}");

            // Centre horizontally; Helvetica digits are ~0.5em wide.
            let text_w = text.len() as f32 * NUMBER_FONT_SIZE * 0.5;
            let x = (page_w - text_w) / 2.0;
            let y = 18.0;

            let content = format!(
                "q BT /{NUMBER_FONT_KEY} {NUMBER_FONT_SIZE} Tf {x:.1} {y:.1} Td ({text}) Tj ET Q"
            );
            let stream_id = doc.add_object(Object::Stream(Stream::new(
                Dictionary::new(),
                content.into_bytes(),
            )));

            attach_content_stream(&mut doc, *page_id, stream_id)?;
            register_number_font(&mut doc, *page_id, font_id)?;
        }

        info!(pages = total, "page numbers stamped");
        serialise(&mut doc)
    }
}

// ---------------------------------------------------------------------------
// Document construction helpers
// ---------------------------------------------------------------------------

/// Build a minimal valid document skeleton: empty /Pages tree plus a
/// /Catalog wired into the trailer. Returns the document and the /Pages id.
fn empty_document() -> (Document, ObjectId) {
    let mut doc = Document::with_version("1.5");

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Kids", Object::Array(Vec::new()));
    pages.set("Count", Object::Integer(0));
    let pages_id = doc.add_object(Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));

    doc.trailer.set("Root", Object::Reference(catalog_id));
    (doc, pages_id)
}

/// Serialise a document to bytes.
fn serialise(doc: &mut Document) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|err| ScanbridgeError::PdfError(format!("failed to serialise PDF: {err}")))?;
    Ok(output)
}

/// Import `page_id` from `source` into `target`, appending it to the page
/// tree rooted at `pages_id`.
fn append_page(
    source: &Document,
    target: &mut Document,
    pages_id: ObjectId,
    page_id: ObjectId,
) -> Result<()> {
    let page_object = source.get_object(page_id).map_err(|err| {
        ScanbridgeError::PdfError(format!("cannot read page object {page_id:?}: {err}"))
    })?;

    let imported = import_object(source, target, page_object)?;
    let imported_id = target.add_object(imported);

    // Graft onto the page tree: push into /Kids and bump /Count.
    if let Ok(Object::Dictionary(pages_dict)) = target.get_object_mut(pages_id) {
        if let Ok(Object::Array(kids)) = pages_dict.get_mut(b"Kids") {
            kids.push(Object::Reference(imported_id));
        }
        if let Ok(Object::Integer(count)) = pages_dict.get_mut(b"Count") {
            *count += 1;
        }
    }

    // Point the imported page back at the target's /Pages node.
    if let Ok(Object::Dictionary(page_dict)) = target.get_object_mut(imported_id) {
        page_dict.set("Parent", Object::Reference(pages_id));
    }

    Ok(())
}

/// Deep-clone an object from `source` into `target`, following references.
///
/// /Parent is deliberately skipped to avoid circular cloning; the caller
/// patches it after grafting the page.
fn import_object(source: &Document, target: &mut Document, object: &Object) -> Result<Object> {
    match object {
        Object::Dictionary(dict) => {
            let mut imported = Dictionary::new();
            for (key, value) in dict.iter() {
                if key == b"Parent" {
                    continue;
                }
                imported.set(key.clone(), import_object(source, target, value)?);
            }
            Ok(Object::Dictionary(imported))
        }
        Object::Array(items) => {
            let mut imported = Vec::with_capacity(items.len());
            for item in items {
                imported.push(import_object(source, target, item)?);
            }
            Ok(Object::Array(imported))
        }
        Object::Reference(ref_id) => match source.get_object(*ref_id) {
            Ok(referenced) => {
                let imported = import_object(source, target, referenced)?;
                let new_id = target.add_object(imported);
                Ok(Object::Reference(new_id))
            }
            Err(err) => {
                warn!(?ref_id, %err, "unresolvable reference replaced with Null");
                Ok(Object::Null)
            }
        },
        Object::Stream(stream) => {
            let mut dict = Dictionary::new();
            for (key, value) in stream.dict.iter() {
                if key == b"Parent" {
                    continue;
                }
                dict.set(key.clone(), import_object(source, target, value)?);
            }
            Ok(Object::Stream(Stream::new(dict, stream.content.clone())))
        }
        // Boolean, Integer, Real, String, Name, Null: trivially cloneable.
        other => Ok(other.clone()),
    }
}

// ---------------------------------------------------------------------------
// Page numbering helpers
// ---------------------------------------------------------------------------

/// Width and height of a page in points, from its /MediaBox (checking the
/// page itself, then its parent node). Defaults to A4.
fn page_media_size(doc: &Document, page_id: ObjectId) -> (f32, f32) {
    fn media_box_of(doc: &Document, id: ObjectId) -> Option<(f32, f32)> {
        let dict = doc.get_object(id).ok()?.as_dict().ok()?;
        match dict.get(b"MediaBox").ok()? {
            Object::Array(values) if values.len() == 4 => {
                let nums: Vec<f32> = values
                    .iter()
                    .filter_map(|v| match v {
                        Object::Integer(i) => Some(*i as f32),
                        Object::Real(r) => Some(*r),
                        _ => None,
                    })
                    .collect();
                if nums.len() == 4 {
                    Some((nums[2] - nums[0], nums[3] - nums[1]))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    if let Some(size) = media_box_of(doc, page_id) {
        return size;
    }

    // MediaBox may be inherited from the parent /Pages node.
    let parent = doc
        .get_object(page_id)
        .ok()
        .and_then(|obj| obj.as_dict().ok())
        .and_then(|dict| match dict.get(b"Parent") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        });
    if let Some(parent_id) = parent {
        if let Some(size) = media_box_of(doc, parent_id) {
            return size;
        }
    }

    // A4 in points.
    (595.3, 841.9)
}

/// Append a content stream reference to a page's /Contents, normalising it
/// to an array form.
fn attach_content_stream(doc: &mut Document, page_id: ObjectId, stream_id: ObjectId) -> Result<()> {
    let page = doc
        .get_object_mut(page_id)
        .and_then(|obj| obj.as_dict_mut())
        .map_err(|err| ScanbridgeError::PdfError(format!("page {page_id:?}: {err}")))?;

    let new_ref = Object::Reference(stream_id);
    let existing = page.get(b"Contents").ok().map(|obj| obj.clone());
    match existing {
        Some(Object::Array(mut refs)) => {
            refs.push(new_ref);
            page.set("Contents", Object::Array(refs));
        }
        Some(single @ Object::Reference(_)) => {
            page.set("Contents", Object::Array(vec![single, new_ref]));
        }
        _ => {
            page.set("Contents", Object::Array(vec![new_ref]));
        }
    }
    Ok(())
}

/// Register the numbering font in the page's /Resources /Font dictionary,
/// creating whichever levels are missing. Handles indirect /Resources and
/// indirect /Font dictionaries.
fn register_number_font(doc: &mut Document, page_id: ObjectId, font_id: ObjectId) -> Result<()> {
    enum ResourcesSlot {
        Inline,
        Indirect(ObjectId),
        Missing,
    }

    let slot = {
        let page = doc
            .get_object(page_id)
            .and_then(|obj| obj.as_dict())
            .map_err(|err| ScanbridgeError::PdfError(format!("page {page_id:?}: {err}")))?;
        match page.get(b"Resources") {
            Ok(Object::Reference(id)) => ResourcesSlot::Indirect(*id),
            Ok(Object::Dictionary(_)) => ResourcesSlot::Inline,
            _ => ResourcesSlot::Missing,
        }
    };

    // A /Font entry that is itself an indirect reference gets patched in a
    // second borrow scope.
    let deferred_font_dict: Option<ObjectId> = match slot {
        ResourcesSlot::Missing => {
            let page = doc
                .get_object_mut(page_id)
                .and_then(|obj| obj.as_dict_mut())
                .map_err(|err| ScanbridgeError::PdfError(format!("page {page_id:?}: {err}")))?;
            let mut fonts = Dictionary::new();
            fonts.set(NUMBER_FONT_KEY, Object::Reference(font_id));
            let mut resources = Dictionary::new();
            resources.set("Font", Object::Dictionary(fonts));
            page.set("Resources", Object::Dictionary(resources));
            None
        }
        ResourcesSlot::Inline => {
            let page = doc
                .get_object_mut(page_id)
                .and_then(|obj| obj.as_dict_mut())
                .map_err(|err| ScanbridgeError::PdfError(format!("page {page_id:?}: {err}")))?;
            let resources = page
                .get_mut(b"Resources")
                .and_then(|obj| obj.as_dict_mut())
                .map_err(|err| ScanbridgeError::PdfError(format!("resources: {err}")))?;
            set_font_entry(resources, font_id)
        }
        ResourcesSlot::Indirect(resources_id) => {
            let resources = doc
                .get_object_mut(resources_id)
                .and_then(|obj| obj.as_dict_mut())
                .map_err(|err| ScanbridgeError::PdfError(format!("resources: {err}")))?;
            set_font_entry(resources, font_id)
        }
    };

    if let Some(fonts_id) = deferred_font_dict {
        let fonts = doc
            .get_object_mut(fonts_id)
            .and_then(|obj| obj.as_dict_mut())
            .map_err(|err| ScanbridgeError::PdfError(format!("font dict: {err}")))?;
        fonts.set(NUMBER_FONT_KEY, Object::Reference(font_id));
    }

    Ok(())
}

/// Insert the numbering font into an inline /Font dictionary, or return
/// the id of an indirect one for the caller to patch.
fn set_font_entry(resources: &mut Dictionary, font_id: ObjectId) -> Option<ObjectId> {
    let existing = resources.get(b"Font").ok().map(|obj| obj.clone());
    match existing {
        Some(Object::Dictionary(mut fonts)) => {
            fonts.set(NUMBER_FONT_KEY, Object::Reference(font_id));
            resources.set("Font", Object::Dictionary(fonts));
            None
        }
        Some(Object::Reference(fonts_id)) => Some(fonts_id),
        _ => {
            let mut fonts = Dictionary::new();
            fonts.set(NUMBER_FONT_KEY, Object::Reference(font_id));
            resources.set("Font", Object::Dictionary(fonts));
            None
        }
    }
}
