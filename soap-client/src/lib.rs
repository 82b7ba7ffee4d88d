//! Blocking SOAP client for UPnP control points
//!
//! This crate sends SOAP actions to a service control URL and manages GENA
//! event subscriptions (SUBSCRIBE, renewal and UNSUBSCRIBE) against a service
//! event URL. All URLs are absolute; resolving them from a device description
//! is the caller's job.

mod error;

pub use error::SoapError;

use std::time::Duration;
use xmltree::Element;

/// Service URI used for the `QueryStateVariable` control action
pub const CONTROL_NAMESPACE: &str = "urn:schemas-upnp-org:control-1-0";

const ENVELOPE_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Outcome of a successful SUBSCRIBE
#[derive(Debug, Clone)]
pub struct SubscriptionResponse {
    /// Subscription identifier assigned by the publisher
    pub sid: String,
    /// Timeout the publisher granted, in seconds
    pub timeout_seconds: u32,
}

/// Headers that distinguish a fresh SUBSCRIBE from a renewal
enum SubscribeKind<'a> {
    Initial { callback_url: &'a str },
    Renewal { sid: &'a str },
}

/// SOAP and GENA client over a shared `ureq` agent
#[derive(Debug, Clone)]
pub struct SoapClient {
    agent: ureq::Agent,
}

impl SoapClient {
    /// Client with a 5s connect and 10s read timeout
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(5), Duration::from_secs(10))
    }

    pub fn with_timeouts(connect: Duration, read: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect)
            .timeout_read(read)
            .build();
        Self { agent }
    }

    /// Invoke `action` on the service at `control_url`
    ///
    /// Returns the `{action}Response` element of the reply. `payload` is
    /// placed inside the action element as-is, so argument values must
    /// already be entity-escaped. A SOAP fault becomes [`SoapError::Fault`]
    /// carrying the UPnP error code (500 when the fault has none).
    pub fn call(
        &self,
        control_url: &str,
        service_uri: &str,
        action: &str,
        payload: &str,
    ) -> Result<Element, SoapError> {
        let request = self
            .agent
            .post(control_url)
            .set("Content-Type", "text/xml; charset=\"utf-8\"")
            .set("SOAPACTION", &format!("\"{service_uri}#{action}\""));

        // Faults are delivered with status 500 and still carry an envelope
        let response = match request.send_string(&envelope(service_uri, action, payload)) {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(e) => return Err(SoapError::Network(e.to_string())),
        };

        let text = response
            .into_string()
            .map_err(|e| SoapError::Network(e.to_string()))?;
        let document =
            Element::parse(text.as_bytes()).map_err(|e| SoapError::Parse(e.to_string()))?;

        action_response(&document, action)
    }

    /// Read one state variable through `QueryStateVariable`
    pub fn query_state_variable(&self, control_url: &str, variable: &str) -> Result<String, SoapError> {
        let payload = format!("<u:varName>{variable}</u:varName>");
        let response = self.call(control_url, CONTROL_NAMESPACE, "QueryStateVariable", &payload)?;

        let value = response
            .get_child("return")
            .ok_or_else(|| SoapError::Parse("QueryStateVariable reply has no return value".to_string()))?;
        Ok(value.get_text().map(|text| text.into_owned()).unwrap_or_default())
    }

    /// Open a subscription on `event_url` delivering to `callback_url`
    pub fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        let response = self.send_subscribe(
            event_url,
            SubscribeKind::Initial { callback_url },
            timeout_seconds,
        )?;

        let sid = response
            .header("SID")
            .map(str::to_string)
            .ok_or_else(|| SoapError::Parse("SUBSCRIBE reply has no SID header".to_string()))?;

        Ok(SubscriptionResponse {
            sid,
            timeout_seconds: granted_timeout(&response, timeout_seconds),
        })
    }

    /// Extend subscription `sid`; returns the timeout the publisher granted
    pub fn renew_subscription(
        &self,
        event_url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<u32, SoapError> {
        let response = self.send_subscribe(event_url, SubscribeKind::Renewal { sid }, timeout_seconds)?;
        Ok(granted_timeout(&response, timeout_seconds))
    }

    pub fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), SoapError> {
        self.agent
            .request("UNSUBSCRIBE", event_url)
            .set("SID", sid)
            .call()
            .map(drop)
            .map_err(|e| gena_error("UNSUBSCRIBE", e))
    }

    fn send_subscribe(
        &self,
        event_url: &str,
        kind: SubscribeKind<'_>,
        timeout_seconds: u32,
    ) -> Result<ureq::Response, SoapError> {
        let request = self
            .agent
            .request("SUBSCRIBE", event_url)
            .set("TIMEOUT", &format!("Second-{timeout_seconds}"));

        let request = match kind {
            SubscribeKind::Initial { callback_url } => request
                .set("CALLBACK", &format!("<{callback_url}>"))
                .set("NT", "upnp:event"),
            SubscribeKind::Renewal { sid } => request.set("SID", sid),
        };

        request.call().map_err(|e| gena_error("SUBSCRIBE", e))
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

fn envelope(service_uri: &str, action: &str, payload: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<s:Envelope xmlns:s="{envelope}" s:encodingStyle="{encoding}">"#,
            r#"<s:Body><u:{action} xmlns:u="{service}">{payload}</u:{action}></s:Body>"#,
            r#"</s:Envelope>"#
        ),
        envelope = ENVELOPE_NAMESPACE,
        encoding = ENCODING_STYLE,
        action = action,
        service = service_uri,
        payload = payload,
    )
}

/// Pull `{action}Response` out of a reply envelope, surfacing faults
fn action_response(document: &Element, action: &str) -> Result<Element, SoapError> {
    let body = document
        .get_child("Body")
        .ok_or_else(|| SoapError::Parse("Envelope has no Body".to_string()))?;

    if let Some(fault) = body.get_child("Fault") {
        return Err(SoapError::Fault(fault_code(fault).unwrap_or(500)));
    }

    let name = format!("{action}Response");
    body.get_child(name.as_str())
        .cloned()
        .ok_or_else(|| SoapError::Parse(format!("Body has no {name} element")))
}

/// UPnP error code from `detail/UPnPError/errorCode`
fn fault_code(fault: &Element) -> Option<u16> {
    let detail = fault.get_child("detail")?;
    let error = detail
        .get_child("UPnPError")
        .or_else(|| detail.get_child("UpnPError"))?;
    error.get_child("errorCode")?.get_text()?.trim().parse().ok()
}

/// Timeout granted in the reply, or the requested one when absent
fn granted_timeout(response: &ureq::Response, requested: u32) -> u32 {
    response
        .header("TIMEOUT")
        .and_then(parse_timeout_header)
        .unwrap_or(requested)
}

/// Parse a GENA `TIMEOUT` header such as `Second-1800`
fn parse_timeout_header(value: &str) -> Option<u32> {
    value.trim().strip_prefix("Second-")?.parse().ok()
}

fn gena_error(method: &'static str, error: ureq::Error) -> SoapError {
    match error {
        ureq::Error::Status(status, _) => SoapError::Status { method, status },
        other => SoapError::Network(other.to_string()),
    }
}
