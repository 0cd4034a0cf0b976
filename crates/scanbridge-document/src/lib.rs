// SPDX-License-Identifier: MIT
//
// scanbridge-document -- Document production for the Scanbridge hand-off
// server.
//
// Provides the PDF-producing collaborator the scan session manager hands
// its finalised image set to (ordered images in, one PDF out), plus thin
// utility operations on existing PDFs (merge, split, page numbering). PDF
// parsing and encoding semantics are delegated to `lopdf`/`printpdf`
// throughout.

pub mod assemble;
pub mod ops;
pub mod payload;

pub use assemble::{PageSize, PdfAssembler};
pub use ops::PdfOps;
pub use payload::decode_image_payload;
