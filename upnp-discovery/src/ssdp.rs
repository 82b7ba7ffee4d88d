//! SSDP (Simple Service Discovery Protocol) search and advertisement handling
//!
//! [`SsdpClient`] sends M-SEARCH requests and iterates over the unicast
//! responses until the MX window closes. [`SsdpListener`] joins the SSDP
//! multicast group and yields `ssdp:alive` / `ssdp:byebye` announcements.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace};

use crate::error::{DiscoveryError, Result};

/// SSDP multicast group address
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// SSDP well-known port
pub const SSDP_PORT: u16 = 1900;

/// A device announcement, either a search response or an `ssdp:alive`
#[derive(Debug, Clone, PartialEq)]
pub struct SsdpAdvertisement {
    /// Description document URL (`LOCATION`)
    pub location: String,
    /// Search target or notification type (`ST` / `NT`)
    pub target: String,
    /// Unique service name (`USN`)
    pub usn: String,
    pub server: Option<String>,
    /// Advertisement lifetime from `CACHE-CONTROL: max-age`
    pub max_age: Option<u32>,
}

impl SsdpAdvertisement {
    /// The device UDN carried in the USN
    pub fn udn(&self) -> &str {
        udn_from_usn(&self.usn)
    }
}

/// A multicast NOTIFY message
#[derive(Debug, Clone, PartialEq)]
pub enum SsdpNotification {
    /// `NTS: ssdp:alive`
    Alive(SsdpAdvertisement),
    /// `NTS: ssdp:byebye`
    ByeBye { usn: String, target: String },
}

/// SSDP client for device search
pub struct SsdpClient {
    socket: UdpSocket,
}

impl SsdpClient {
    /// Create a new SSDP client; `timeout` bounds the wait for each response
    pub fn new(timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to bind UDP socket: {}", e)))?;

        socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to set read timeout: {}", e)))?;

        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to set multicast loop: {}", e)))?;

        Ok(Self { socket })
    }

    /// Send an M-SEARCH request and return an iterator of responses
    ///
    /// `mx` is the maximum number of seconds a device may wait before replying.
    pub fn search(&self, search_target: &str, mx: u32) -> Result<SsdpResponseIterator<'_>> {
        let request = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             USER-AGENT: cms-cp/0.2 UPnP/1.0\r\n\
             \r\n",
            mx, search_target
        );

        self.socket
            .send_to(request.as_bytes(), (SSDP_MULTICAST_ADDR, SSDP_PORT))
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to send M-SEARCH: {}", e)))?;

        debug!(target = search_target, mx, "Sent M-SEARCH");
        Ok(SsdpResponseIterator::new(&self.socket))
    }
}

/// Iterator over SSDP search responses
pub struct SsdpResponseIterator<'a> {
    socket: &'a UdpSocket,
    buffer: [u8; 2048],
    finished: bool,
}

impl<'a> SsdpResponseIterator<'a> {
    fn new(socket: &'a UdpSocket) -> Self {
        Self {
            socket,
            buffer: [0; 2048],
            finished: false,
        }
    }
}

impl<'a> Iterator for SsdpResponseIterator<'a> {
    type Item = Result<SsdpAdvertisement>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((size, from)) => {
                    let Ok(text) = std::str::from_utf8(&self.buffer[..size]) else {
                        continue;
                    };
                    match parse_ssdp_response(text) {
                        Some(response) => return Some(Ok(response)),
                        None => trace!(%from, "Ignoring unparseable SSDP response"),
                    }
                }
                Err(e) if is_timeout(&e) => self.finished = true,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(DiscoveryError::NetworkError(format!("Socket error: {}", e))));
                }
            }
        }
        None
    }
}

/// Passive listener for multicast NOTIFY announcements
pub struct SsdpListener {
    socket: UdpSocket,
    buffer: [u8; 2048],
}

impl SsdpListener {
    /// Bind to the SSDP port and join the multicast group
    ///
    /// `poll_interval` is the read timeout, so `recv` returns `Ok(None)` at
    /// least that often and callers can check for shutdown.
    pub fn bind(poll_interval: Duration) -> Result<Self> {
        let network = |context: &str, e: std::io::Error| {
            DiscoveryError::NetworkError(format!("{}: {}", context, e))
        };

        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| network("Failed to create socket", e))?;
        socket2
            .set_reuse_address(true)
            .map_err(|e| network("Failed to set SO_REUSEADDR", e))?;

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, SSDP_PORT));
        socket2
            .bind(&bind_addr.into())
            .map_err(|e| network("Failed to bind SSDP port", e))?;

        let socket: UdpSocket = socket2.into();
        socket
            .join_multicast_v4(&SSDP_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| network("Failed to join SSDP multicast group", e))?;
        socket
            .set_read_timeout(Some(poll_interval))
            .map_err(|e| network("Failed to set read timeout", e))?;

        debug!(addr = %bind_addr, "SSDP listener bound");
        Ok(Self {
            socket,
            buffer: [0; 2048],
        })
    }

    /// Wait for the next NOTIFY message
    ///
    /// Returns `Ok(None)` when the poll interval elapses or the datagram is not
    /// a NOTIFY (for example another control point's M-SEARCH).
    pub fn recv(&mut self) -> Result<Option<SsdpNotification>> {
        match self.socket.recv_from(&mut self.buffer) {
            Ok((size, _)) => Ok(std::str::from_utf8(&self.buffer[..size])
                .ok()
                .and_then(parse_notify)),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(DiscoveryError::NetworkError(format!("Socket error: {}", e))),
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Parse an SSDP search response from HTTP text
pub fn parse_ssdp_response(response: &str) -> Option<SsdpAdvertisement> {
    let mut location = None;
    let mut target = None;
    let mut usn = None;
    let mut server = None;
    let mut max_age = None;

    for line in response.lines() {
        let line = line.trim();

        if let Some(value) = extract_header_value(line, "LOCATION:") {
            location = Some(value);
        } else if let Some(value) = extract_header_value(line, "ST:") {
            target = Some(value);
        } else if let Some(value) = extract_header_value(line, "USN:") {
            usn = Some(value);
        } else if let Some(value) = extract_header_value(line, "SERVER:") {
            server = Some(value);
        } else if let Some(value) = extract_header_value(line, "CACHE-CONTROL:") {
            max_age = parse_max_age(&value);
        }
    }

    match (location, target, usn) {
        (Some(location), Some(target), Some(usn)) => Some(SsdpAdvertisement {
            location,
            target,
            usn,
            server,
            max_age,
        }),
        _ => None,
    }
}

/// Parse a multicast NOTIFY message
pub fn parse_notify(message: &str) -> Option<SsdpNotification> {
    let mut lines = message.lines();
    let start = lines.next()?.trim();
    if !start.to_ascii_uppercase().starts_with("NOTIFY ") {
        return None;
    }

    let mut location = None;
    let mut target = None;
    let mut nts = None;
    let mut usn = None;
    let mut server = None;
    let mut max_age = None;

    for line in lines {
        let line = line.trim();

        if let Some(value) = extract_header_value(line, "LOCATION:") {
            location = Some(value);
        } else if let Some(value) = extract_header_value(line, "NTS:") {
            nts = Some(value);
        } else if let Some(value) = extract_header_value(line, "NT:") {
            target = Some(value);
        } else if let Some(value) = extract_header_value(line, "USN:") {
            usn = Some(value);
        } else if let Some(value) = extract_header_value(line, "SERVER:") {
            server = Some(value);
        } else if let Some(value) = extract_header_value(line, "CACHE-CONTROL:") {
            max_age = parse_max_age(&value);
        }
    }

    let usn = usn?;
    let target = target.unwrap_or_default();
    match nts?.to_ascii_lowercase().as_str() {
        "ssdp:alive" => Some(SsdpNotification::Alive(SsdpAdvertisement {
            location: location?,
            target,
            usn,
            server,
            max_age,
        })),
        "ssdp:byebye" => Some(SsdpNotification::ByeBye { usn, target }),
        _ => None,
    }
}

/// Extract header value from a line like "HEADER: value"
fn extract_header_value(line: &str, header: &str) -> Option<String> {
    if line.len() > header.len()
        && line.is_char_boundary(header.len())
        && line[..header.len()].eq_ignore_ascii_case(header)
    {
        Some(line[header.len()..].trim().to_string())
    } else {
        None
    }
}

/// Read the `max-age` directive out of a `CACHE-CONTROL` value
pub fn parse_max_age(cache_control: &str) -> Option<u32> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// The UDN part of a USN such as `uuid:abc::urn:...:device:X:1`
pub fn udn_from_usn(usn: &str) -> &str {
    usn.split("::").next().unwrap_or(usn)
}
