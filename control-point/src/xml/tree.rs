//! Name-based lookups over `xmltree` elements.
//!
//! All lookups compare local names, so `e:property` and `property` match the
//! same element.

use xmltree::{Element, XMLNode};

/// Parse `xml` into an element tree
pub fn parse_document(xml: &str) -> Result<Element, xmltree::ParseError> {
    Element::parse(xml.as_bytes())
}

/// Text of the first descendant named `name`, searching the whole document
/// (the root itself included) in document order.
pub fn first_document_item(document: &Element, name: &str) -> Option<String> {
    if document.name == name {
        return element_text(document);
    }
    find_descendant(document, name).and_then(element_text)
}

/// Text of the first direct child of `element` named `name`.
pub fn first_element_item(element: &Element, name: &str) -> Option<String> {
    element.get_child(name).and_then(element_text)
}

/// Every descendant of `element` named `name`, in document order.
pub fn elements_by_tag_name<'a>(element: &'a Element, name: &str) -> Vec<&'a Element> {
    let mut found = Vec::new();
    collect_descendants(element, name, &mut found);
    found
}

/// Trimmed text content of `element`, `None` when it has no text.
pub fn element_text(element: &Element) -> Option<String> {
    element
        .get_text()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Full text content of `element` as received, empty when it has none.
pub fn raw_text(element: &Element) -> String {
    element.get_text().map(|text| text.into_owned()).unwrap_or_default()
}

/// First descendant named `name`, depth-first.
pub fn find_descendant<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
    for child in child_elements(element) {
        if child.name == name {
            return Some(child);
        }
        if let Some(found) = find_descendant(child, name) {
            return Some(found);
        }
    }
    None
}

fn collect_descendants<'a>(element: &'a Element, name: &str, found: &mut Vec<&'a Element>) {
    for child in child_elements(element) {
        if child.name == name {
            found.push(child);
        }
        collect_descendants(child, name, found);
    }
}

fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(XMLNode::as_element)
}
