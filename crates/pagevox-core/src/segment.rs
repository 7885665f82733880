//! Page segmentation.
//!
//! Extracted text arrives as one string with blank-line markers between
//! pages. Splitting drops empty units, so page numbers are the 1-based
//! position in the resulting sequence, not the source document's own
//! numbering.

/// Split extracted text into ordered, non-empty page units.
///
/// An input that yields zero units is a valid zero-page document, not an
/// error.
pub fn segment_pages(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|unit| !unit.is_empty())
        .map(str::to_string)
        .collect()
}
