//! Description download against a mock HTTP server

use std::time::Duration;

use mockito::Server;
use rstest::rstest;
use upnp_discovery::{DescriptionFetcher, DiscoveryError};

const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:ManageableDevice:2</deviceType>
    <friendlyName>B2BUA test</friendlyName>
    <UDN>uuid:1</UDN>
  </device>
</root>"#;

#[test]
fn test_fetch_returns_document_body() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/description.xml")
        .with_status(200)
        .with_header("content-type", "text/xml")
        .with_body(DESCRIPTION)
        .create();

    let fetcher = DescriptionFetcher::new(Duration::from_secs(2)).unwrap();
    let xml = fetcher
        .fetch(&format!("{}/description.xml", server.url()))
        .expect("fetch should succeed");

    mock.assert();
    assert!(xml.contains("<UDN>uuid:1</UDN>"));
}

#[rstest]
#[case(404)]
#[case(500)]
fn test_fetch_rejects_error_status(#[case] status: usize) {
    let mut server = Server::new();
    let _mock = server
        .mock("GET", "/description.xml")
        .with_status(status)
        .create();

    let fetcher = DescriptionFetcher::new(Duration::from_secs(2)).unwrap();
    let err = fetcher
        .fetch(&format!("{}/description.xml", server.url()))
        .unwrap_err();

    match err {
        DiscoveryError::Status { status: got, .. } => assert_eq!(usize::from(got), status),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[test]
fn test_fetch_unreachable_host() {
    let fetcher = DescriptionFetcher::new(Duration::from_millis(200)).unwrap();
    let err = fetcher.fetch("http://127.0.0.1:9/description.xml").unwrap_err();
    assert!(err.to_string().starts_with("HTTP error"));
}
