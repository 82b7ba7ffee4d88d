//! HTTP-level tests against a mock device

use mockito::{Matcher, Server};
use soap_client::{SoapClient, SoapError};

const CMS: &str = "urn:schemas-upnp-org:service:ConfigurationManagement:2";

#[test]
fn test_call_returns_action_response() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/upnp/control/cms")
        .match_header(
            "SOAPACTION",
            Matcher::Exact(format!("\"{}#GetValues\"", CMS)),
        )
        .match_body(Matcher::Regex("<Parameters>/Foo</Parameters>".to_string()))
        .with_status(200)
        .with_header("content-type", "text/xml")
        .with_body(format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>
                <u:GetValuesResponse xmlns:u="{CMS}"><ParameterValueList>v</ParameterValueList></u:GetValuesResponse>
            </s:Body></s:Envelope>"#
        ))
        .create();

    let client = SoapClient::new();
    let url = format!("{}/upnp/control/cms", server.url());
    let response = client
        .call(&url, CMS, "GetValues", "<Parameters>/Foo</Parameters>")
        .expect("action should succeed");

    mock.assert();
    assert_eq!(
        response
            .get_child("ParameterValueList")
            .and_then(|e| e.get_text())
            .as_deref(),
        Some("v")
    );
}

#[test]
fn test_call_maps_http_500_fault() {
    let mut server = Server::new();
    let _mock = server
        .mock("POST", "/ctl")
        .with_status(500)
        .with_body(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault>
                <faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring>
                <detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>401</errorCode></UPnPError></detail>
            </s:Fault></s:Body></s:Envelope>"#,
        )
        .create();

    let client = SoapClient::new();
    let err = client
        .call(&format!("{}/ctl", server.url()), CMS, "Nope", "")
        .unwrap_err();
    assert!(matches!(err, SoapError::Fault(401)), "got {err:?}");
}

#[test]
fn test_query_state_variable() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/ctl")
        .match_header(
            "SOAPACTION",
            "\"urn:schemas-upnp-org:control-1-0#QueryStateVariable\"",
        )
        .match_body(Matcher::Regex("<u:varName>AlarmsEnabled</u:varName>".to_string()))
        .with_status(200)
        .with_body(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>
                <u:QueryStateVariableResponse xmlns:u="urn:schemas-upnp-org:control-1-0"><return>1</return></u:QueryStateVariableResponse>
            </s:Body></s:Envelope>"#,
        )
        .create();

    let client = SoapClient::new();
    let value = client
        .query_state_variable(&format!("{}/ctl", server.url()), "AlarmsEnabled")
        .unwrap();

    mock.assert();
    assert_eq!(value, "1");
}

#[test]
fn test_subscribe_reads_sid_and_timeout() {
    let mut server = Server::new();
    let mock = server
        .mock("SUBSCRIBE", "/evt")
        .match_header("NT", "upnp:event")
        .match_header("CALLBACK", "<http://10.0.0.2:3400/notify>")
        .match_header("TIMEOUT", "Second-1801")
        .with_status(200)
        .with_header("SID", "uuid:sub-1")
        .with_header("TIMEOUT", "Second-1800")
        .create();

    let client = SoapClient::new();
    let response = client
        .subscribe(
            &format!("{}/evt", server.url()),
            "http://10.0.0.2:3400/notify",
            1801,
        )
        .unwrap();

    mock.assert();
    assert_eq!(response.sid, "uuid:sub-1");
    assert_eq!(response.timeout_seconds, 1800);
}

#[test]
fn test_subscribe_without_sid_is_parse_error() {
    let mut server = Server::new();
    let _mock = server.mock("SUBSCRIBE", "/evt").with_status(200).create();

    let client = SoapClient::new();
    let err = client
        .subscribe(&format!("{}/evt", server.url()), "http://cb", 60)
        .unwrap_err();
    assert!(matches!(err, SoapError::Parse(_)));
}

#[test]
fn test_renew_falls_back_to_requested_timeout() {
    let mut server = Server::new();
    let mock = server
        .mock("SUBSCRIBE", "/evt")
        .match_header("SID", "uuid:sub-1")
        .with_status(200)
        .create();

    let client = SoapClient::new();
    let granted = client
        .renew_subscription(&format!("{}/evt", server.url()), "uuid:sub-1", 300)
        .unwrap();

    mock.assert();
    assert_eq!(granted, 300);
}

#[test]
fn test_unsubscribe_reports_http_status() {
    let mut server = Server::new();
    let _mock = server
        .mock("UNSUBSCRIBE", "/evt")
        .match_header("SID", "uuid:gone")
        .with_status(412)
        .create();

    let client = SoapClient::new();
    let err = client
        .unsubscribe(&format!("{}/evt", server.url()), "uuid:gone")
        .unwrap_err();
    assert!(matches!(
        err,
        SoapError::Status {
            method: "UNSUBSCRIBE",
            status: 412
        }
    ));
}
