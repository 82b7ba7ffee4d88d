//! Device description parsing and service descriptor resolution.

use url::Url;
use xmltree::Element;

use crate::error::{ControlPointError, DecodeError};
use crate::xml::{elements_by_tag_name, first_element_item, tree};

/// The fields of a device description document the registry cares about
#[derive(Debug, Clone)]
pub struct DeviceDescription {
    pub udn: String,
    pub device_type: String,
    pub friendly_name: String,
    /// Raw `presentationURL`, unresolved
    pub presentation_url: Option<String>,
    /// Declared `URLBase`, if any
    pub url_base: Option<String>,
    root: Element,
}

impl DeviceDescription {
    /// Parse a description document.
    ///
    /// Device fields are read from the first `device` element; a document
    /// without a UDN is rejected.
    pub fn parse(xml: &str) -> Result<Self, DecodeError> {
        let root = tree::parse_document(xml).map_err(|e| DecodeError::Xml(e.to_string()))?;
        let device = if root.name == "device" {
            &root
        } else {
            tree::find_descendant(&root, "device").ok_or(DecodeError::MissingField("device"))?
        };

        let udn = first_element_item(device, "UDN").ok_or(DecodeError::MissingField("UDN"))?;
        let device_type = first_element_item(device, "deviceType").unwrap_or_default();
        let friendly_name = first_element_item(device, "friendlyName").unwrap_or_default();
        let presentation_url = first_element_item(device, "presentationURL");
        let url_base = first_element_item(&root, "URLBase");

        Ok(Self {
            udn,
            device_type,
            friendly_name,
            presentation_url,
            url_base,
            root,
        })
    }

    /// Base that relative URLs resolve against: `URLBase` if declared,
    /// otherwise the document's own location
    pub fn base_url<'a>(&'a self, location: &'a str) -> &'a str {
        self.url_base.as_deref().unwrap_or(location)
    }

    /// Presentation URL resolved against the base, empty when absent
    pub fn resolved_presentation_url(&self, location: &str) -> String {
        resolve_url(self.base_url(location), self.presentation_url.as_deref())
    }

    pub fn root(&self) -> &Element {
        &self.root
    }
}

/// Identifiers and absolute URLs of one service block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedService {
    pub service_id: String,
    pub service_type: String,
    pub control_url: String,
    pub event_url: String,
}

/// Locate the block for `service_type` in the first service list of the
/// document and resolve its URLs.
///
/// Missing or unresolvable URL fields come back empty.
pub fn resolve(
    description: &DeviceDescription,
    location: &str,
    service_type: &str,
) -> Result<ResolvedService, ControlPointError> {
    let not_found = || ControlPointError::ServiceNotFound(service_type.to_string());

    let service_list = tree::find_descendant(description.root(), "serviceList").ok_or_else(not_found)?;
    let service = elements_by_tag_name(service_list, "service")
        .into_iter()
        .find(|service| first_element_item(service, "serviceType").as_deref() == Some(service_type))
        .ok_or_else(not_found)?;

    let base = description.base_url(location);
    Ok(ResolvedService {
        service_id: first_element_item(service, "serviceId").unwrap_or_default(),
        service_type: service_type.to_string(),
        control_url: resolve_url(base, first_element_item(service, "controlURL").as_deref()),
        event_url: resolve_url(base, first_element_item(service, "eventSubURL").as_deref()),
    })
}

/// Join `relative` onto `base`; empty when either is missing or malformed.
pub fn resolve_url(base: &str, relative: Option<&str>) -> String {
    let Some(relative) = relative.filter(|r| !r.is_empty()) else {
        return String::new();
    };

    match Url::parse(base).and_then(|base| base.join(relative)) {
        Ok(url) => url.to_string(),
        Err(e) => {
            tracing::debug!(base, relative, error = %e, "Could not resolve URL");
            String::new()
        }
    }
}
