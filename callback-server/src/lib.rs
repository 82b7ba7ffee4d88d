//! UPnP GENA callback server.
//!
//! A control point subscribes to a service's event URL and gives the device a
//! callback URL. The device then sends `NOTIFY` requests carrying a
//! `propertyset` body, a `SID` naming the subscription and a `SEQ` event key.
//! This crate accepts those requests and forwards them on a channel:
//!
//! - [`CallbackServer`] binds the first free port in a range and serves
//!   `NOTIFY` on any path.
//! - [`EventRouter`] forwards events for registered subscription IDs and parks
//!   events that arrive before their SID is known.
//! - [`NotificationPayload`] is the unparsed event (SID, event key, XML body).
//!
//! The crate knows nothing about services or state variables; interpreting
//! the body is up to the consumer.
//!
//! ```no_run
//! use callback_server::{CallbackServer, NotificationPayload};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callback_server::CallbackServerError> {
//!     let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
//!     let server = CallbackServer::new((3400, 3500), tx).await?;
//!
//!     server.router().register("uuid:subscription-123".to_string()).await;
//!
//!     while let Some(notification) = rx.recv().await {
//!         println!("{}: {}", notification.subscription_id, notification.event_xml);
//!     }
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;
pub mod router;
mod server;

pub use error::CallbackServerError;
pub use router::{EventRouter, NotificationPayload, RouteOutcome};
pub use server::CallbackServer;
