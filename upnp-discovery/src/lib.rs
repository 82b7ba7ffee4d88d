//! UPnP discovery primitives for control points
//!
//! This crate covers the discovery half of UPnP device tracking:
//!
//! - [`SsdpClient`] sends an M-SEARCH for any search target and yields the
//!   responses that arrive within the MX window.
//! - [`SsdpListener`] receives `ssdp:alive` and `ssdp:byebye` multicast
//!   announcements.
//! - [`DescriptionFetcher`] downloads the description document an
//!   advertisement points at.
//!
//! Interpreting the description document is left to the caller.
//!
//! ```no_run
//! use std::time::Duration;
//! use upnp_discovery::SsdpClient;
//!
//! let client = SsdpClient::new(Duration::from_secs(3)).unwrap();
//! for response in client.search("upnp:rootdevice", 2).unwrap().flatten() {
//!     println!("{} at {}", response.udn(), response.location);
//! }
//! ```

mod description;
mod error;
pub mod ssdp;

pub use description::DescriptionFetcher;
pub use error::{DiscoveryError, Result};
pub use ssdp::{
    udn_from_usn, SsdpAdvertisement, SsdpClient, SsdpListener, SsdpNotification,
    SsdpResponseIterator,
};
