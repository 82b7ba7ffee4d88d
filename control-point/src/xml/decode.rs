//! Serde decoding of prefixed XML documents.
//!
//! CMS documents arrive with arbitrary (sometimes undeclared) namespace
//! prefixes such as `cms:ParameterValueList`. Prefixes and `xmlns`
//! declarations are stripped before handing the text to `quick_xml`, so serde
//! structs can use plain local names.

use serde::de::DeserializeOwned;

/// Parse XML string into a deserializable type with namespace stripping.
pub fn parse<T: DeserializeOwned>(xml: &str) -> Result<T, quick_xml::DeError> {
    let stripped = strip_namespaces(xml);
    quick_xml::de::from_str(&stripped)
}

/// Strip namespace prefixes from element and attribute names and drop
/// `xmlns` declarations.
///
/// Input: `<e:propertyset xmlns:e="x"><e:property/></e:propertyset>`
/// Output: `<propertyset><property/></propertyset>`
pub fn strip_namespaces(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];

        // Declarations, comments and CDATA are copied verbatim
        let verbatim_end = if rest.starts_with("<![CDATA[") {
            rest.find("]]>").map(|end| end + 3)
        } else if rest.starts_with("<!--") {
            rest.find("-->").map(|end| end + 3)
        } else if rest.starts_with("<?") || rest.starts_with("<!") {
            rest.find('>').map(|end| end + 1)
        } else {
            None
        };
        if let Some(end) = verbatim_end {
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }

        let Some(close) = tag_end(rest) else {
            // Unterminated tag: leave the tail untouched for the parser to reject
            out.push_str(rest);
            return out;
        };
        rewrite_tag(&rest[..close + 1], &mut out);
        rest = &rest[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Index of the `>` closing the tag at the start of `tag`, skipping quoted
/// attribute values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in tag.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Rewrite one `<...>` tag with prefixes stripped.
fn rewrite_tag(tag: &str, out: &mut String) {
    let inner = &tag[1..tag.len() - 1];
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let (inner, self_closing) = match inner.strip_suffix('/') {
        Some(rest) => (rest, true),
        None => (inner, false),
    };

    let name_end = inner
        .find(|c: char| c.is_whitespace())
        .unwrap_or(inner.len());
    let (name, mut attributes) = inner.split_at(name_end);

    out.push('<');
    if closing {
        out.push('/');
    }
    out.push_str(local_name(name));

    loop {
        attributes = attributes.trim_start();
        if attributes.is_empty() {
            break;
        }
        let Some(eq) = attributes.find('=') else {
            break;
        };
        let attr_name = attributes[..eq].trim();
        let value_part = attributes[eq + 1..].trim_start();
        let Some(quote) = value_part.chars().next().filter(|q| *q == '"' || *q == '\'') else {
            break;
        };
        let Some(value_len) = value_part[1..].find(quote) else {
            break;
        };
        let value = &value_part[..value_len + 2];
        attributes = &value_part[value_len + 2..];

        if attr_name == "xmlns" || attr_name.starts_with("xmlns:") {
            continue;
        }
        out.push(' ');
        out.push_str(local_name(attr_name));
        out.push('=');
        out.push_str(value);
    }

    if self_closing {
        out.push('/');
    }
    out.push('>');
}

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}
