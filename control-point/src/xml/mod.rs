//! XML helpers.
//!
//! - [`tree`]: element lookups over `xmltree` documents (description
//!   documents, event bodies, action responses).
//! - [`decode`]: serde decoding of small documents with namespace prefixes
//!   stripped.

pub mod decode;
pub mod tree;

pub use tree::{element_text, elements_by_tag_name, first_document_item, first_element_item, raw_text};
