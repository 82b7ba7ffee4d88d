//! Parameter codec.
//!
//! CMS state variables such as `ConfigurationUpdate` carry an aggregated
//! value: `version,timestamp,document`, where `document` is an
//! entity-escaped `ParameterValueList`:
//!
//! ```text
//! 24,2015-07-27T20:47:22,&lt;cms:ParameterValueList ...&gt;&lt;Parameter&gt;...
//! ```
//!
//! This module reverses that encoding, and builds the `ContentPathList` and
//! `ParameterValueList` documents sent as action arguments.

use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;

use crate::error::DecodeError;
use crate::xml::decode;

/// Namespace of outbound CMS parameter documents
pub const CMS_DOCUMENT_NAMESPACE: &str = "urn:schemas-upnp-org:dm:ConfigurationManagement";

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

const CMS_SCHEMA_LOCATION: &str = "urn:schemas-upnp-org:dm:ConfigurationManagement http://www.upnp.org/schemas/dm/ConfigurationManagement-v2.xsd";

const ENTITIES: [(&str, char); 5] = [
    ("&amp;", '&'),
    ("&lt;", '<'),
    ("&gt;", '>'),
    ("&quot;", '"'),
    ("&apos;", '\''),
];

/// One `(ParameterPath, Value)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterValue {
    pub path: String,
    pub value: String,
}

impl ParameterValue {
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// A decoded aggregated variable value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedValue {
    /// Change counter
    pub version: u64,
    pub timestamp: NaiveDateTime,
    /// Parameters carried by the embedded document
    pub parameters: Vec<ParameterValue>,
}

/// Escape the five reserved XML characters.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape`] in a single pass.
///
/// Replaced text is never rescanned, so `&amp;lt;` becomes `&lt;`.
/// Unrecognised `&` sequences are copied through.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Decode an aggregated `version,timestamp,escaped-document` value.
///
/// The value is split on its first two commas, so commas inside the
/// document survive.
pub fn decode_aggregated(value: &str) -> Result<AggregatedValue, DecodeError> {
    let mut fields = value.splitn(3, ',');
    let (Some(version), Some(timestamp), Some(document)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(DecodeError::NotAggregated(value.to_string()));
    };
    if document.trim().is_empty() {
        return Err(DecodeError::NotAggregated(value.to_string()));
    }

    let version = version
        .trim()
        .parse::<u64>()
        .map_err(|_| DecodeError::InvalidVersion(version.to_string()))?;
    let timestamp = parse_timestamp(timestamp.trim())
        .ok_or_else(|| DecodeError::InvalidTimestamp(timestamp.to_string()))?;
    let parameters = decode_parameter_list(&unescape(document))?;

    Ok(AggregatedValue {
        version,
        timestamp,
        parameters,
    })
}

/// ISO-8601 local time (`2024-01-01T00:00:00`, optional fraction), or
/// RFC 3339 with an offset.
fn parse_timestamp(field: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(field, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(field)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

#[derive(Debug, Deserialize)]
struct ParameterValueListDocument {
    #[serde(rename = "Parameter", default)]
    parameters: Vec<ParameterDocument>,
}

#[derive(Debug, Deserialize)]
struct ParameterDocument {
    #[serde(rename = "ParameterPath", default)]
    path: String,
    #[serde(rename = "Value", default)]
    value: Option<String>,
}

/// Decode an unescaped `ParameterValueList` document.
///
/// Parameters without a path, or whose `Value` is missing or empty, are
/// skipped.
pub fn decode_parameter_list(xml: &str) -> Result<Vec<ParameterValue>, DecodeError> {
    let document: ParameterValueListDocument =
        decode::parse(xml).map_err(|e| DecodeError::Xml(e.to_string()))?;

    Ok(document
        .parameters
        .into_iter()
        .filter_map(|parameter| {
            let path = parameter.path.trim();
            let value = parameter.value?;
            let value = value.trim();
            if path.is_empty() || value.is_empty() {
                None
            } else {
                Some(ParameterValue::new(path, value))
            }
        })
        .collect())
}

/// `ContentPathList` document for a `GetValues` request
pub fn encode_content_path_list(path: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><cms:ContentPathList xmlns:cms="{ns}" xmlns:xsi="{xsi}" xsi:schemaLocation="{location}"><ContentPath>{path}</ContentPath></cms:ContentPathList>"#,
        ns = CMS_DOCUMENT_NAMESPACE,
        xsi = XSI_NAMESPACE,
        location = CMS_SCHEMA_LOCATION,
        path = escape(path),
    )
}

/// `ParameterValueList` document for a `SetValues` request
pub fn encode_parameter_value_list(path: &str, value: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><cms:ParameterValueList xmlns:cms="{ns}" xmlns:xsi="{xsi}" xsi:schemaLocation="{location}"><Parameter><ParameterPath>{path}</ParameterPath><Value>{value}</Value></Parameter></cms:ParameterValueList>"#,
        ns = CMS_DOCUMENT_NAMESPACE,
        xsi = XSI_NAMESPACE,
        location = CMS_SCHEMA_LOCATION,
        path = escape(path),
        value = escape(value),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rstest::rstest;

    const SAMPLE: &str = "3,2024-01-01T00:00:00,&lt;cms:ParameterValueList&gt;&lt;Parameter&gt;&lt;ParameterPath&gt;/Foo/Bar&lt;/ParameterPath&gt;&lt;Value&gt;42&lt;/Value&gt;&lt;/Parameter&gt;&lt;/cms:ParameterValueList&gt;";

    #[test]
    fn test_escape_replaces_ampersand_once() {
        assert_eq!(escape(r#"a<b>&"c'"#), "a&lt;b&gt;&amp;&quot;c&apos;");
        assert_eq!(escape("&lt;"), "&amp;lt;");
    }

    #[rstest]
    #[case("&lt;x&gt;", "<x>")]
    #[case("&amp;lt;", "&lt;")]
    #[case("&quot;&apos;", "\"'")]
    #[case("a & b", "a & b")]
    #[case("&unknown;", "&unknown;")]
    #[case("trailing &", "trailing &")]
    #[case("", "")]
    fn test_unescape(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(unescape(input), expected);
    }

    proptest! {
        #[test]
        fn prop_unescape_reverses_escape(s in r#"[<>&"'a-z;# ]{0,40}"#) {
            prop_assert_eq!(unescape(&escape(&s)), s);
        }

        #[test]
        fn prop_escaped_text_has_no_reserved_characters(s in any::<String>()) {
            let escaped = escape(&s);
            prop_assert!(!escaped.contains(['<', '>', '"', '\'']));
        }
    }

    #[test]
    fn test_decode_aggregated_sample() {
        let decoded = decode_aggregated(SAMPLE).unwrap();

        assert_eq!(decoded.version, 3);
        assert_eq!(
            decoded.timestamp,
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
        assert_eq!(decoded.parameters, vec![ParameterValue::new("/Foo/Bar", "42")]);
    }

    #[test]
    fn test_decode_aggregated_keeps_commas_in_document() {
        let doc = escape(
            "<ParameterValueList><Parameter><ParameterPath>/A</ParameterPath><Value>x,y</Value></Parameter></ParameterValueList>",
        );
        let decoded = decode_aggregated(&format!("9,2015-07-27T20:47:22,{doc}")).unwrap();
        assert_eq!(decoded.parameters, vec![ParameterValue::new("/A", "x,y")]);
    }

    #[rstest]
    #[case::opaque("1")]
    #[case::two_fields("3,2024-01-01T00:00:00")]
    #[case::empty_document("3,2024-01-01T00:00:00,")]
    #[case::bad_version("v3,2024-01-01T00:00:00,&lt;a/&gt;")]
    #[case::bad_timestamp("3,yesterday,&lt;a/&gt;")]
    #[case::bad_document("3,2024-01-01T00:00:00,&lt;unclosed")]
    fn test_decode_aggregated_rejects(#[case] value: &str) {
        assert!(decode_aggregated(value).is_err(), "{value} should not decode");
    }

    #[test]
    fn test_decode_aggregated_rfc3339_timestamp() {
        let decoded = decode_aggregated(
            "1,2024-05-01T10:00:00+02:00,&lt;ParameterValueList/&gt;",
        )
        .unwrap();
        assert_eq!(decoded.version, 1);
        assert!(decoded.parameters.is_empty());
    }

    #[test]
    fn test_decode_parameter_list_skips_empty_values() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<cms:ParameterValueList xmlns:cms="urn:schemas-upnp-org:dm:cms" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="urn:schemas-upnp-org:dm:cms http://www.upnp.org/schemas/dm/cms.xsd">
    <Parameter>
        <ParameterPath>/BBF/VoiceService/0/SIP/Network/0/Status</ParameterPath>
        <Value>Up</Value>
    </Parameter>
    <Parameter>
        <ParameterPath>/BBF/Empty</ParameterPath>
        <Value></Value>
    </Parameter>
    <Parameter>
        <ParameterPath>/BBF/Missing</ParameterPath>
    </Parameter>
</cms:ParameterValueList>"#;

        assert_eq!(
            decode_parameter_list(xml).unwrap(),
            vec![ParameterValue::new("/BBF/VoiceService/0/SIP/Network/0/Status", "Up")]
        );
    }

    #[test]
    fn test_encode_content_path_list() {
        let doc = encode_content_path_list("/UPnP/DeviceInfo/");
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains(r#"xmlns:cms="urn:schemas-upnp-org:dm:ConfigurationManagement""#));
        assert!(doc.contains("<ContentPath>/UPnP/DeviceInfo/</ContentPath>"));
    }

    #[test]
    fn test_encode_parameter_value_list_escapes_and_decodes_back() {
        let doc = encode_parameter_value_list("/A/B", "x<y & z");
        assert!(doc.contains("<Value>x&lt;y &amp; z</Value>"));

        let decoded = decode_parameter_list(&doc).unwrap();
        assert_eq!(decoded, vec![ParameterValue::new("/A/B", "x<y & z")]);
    }
}
