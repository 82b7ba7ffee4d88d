//! UPnP ConfigurationManagement control point.
//!
//! Tracks devices that advertise `ManageableDevice:2`, keeps a GENA
//! subscription on each device's ConfigurationManagement service, applies
//! change events to a per-device state table and issues `GetValues`,
//! `SetValues` and `SetAlarmsEnabled` actions.
//!
//! # Architecture
//!
//! - [`DeviceRegistry`] owns every [`Device`] behind one lock.
//! - [`EventDispatcher`] is the single consumer of [`TransportEvent`]s and
//!   routes each one into the registry.
//! - [`TimeoutMonitor`] ages advertisement lifetimes, removes expired devices
//!   and prompts renewals.
//! - [`ActionRequestBuilder`] turns commands into SOAP requests.
//! - [`Transport`] is the network seam; [`UpnpTransport`] implements it over
//!   SSDP, GENA and SOAP.
//!
//! Aggregated state variables carry `version,timestamp,escaped-document`;
//! [`codec`] decodes them into [`ParameterValue`] pairs.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cms_control_point::{ControlPoint, ControlPointConfig, UpnpTransport, UpnpTransportConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ControlPointConfig::default();
//! let (transport, events) = UpnpTransport::start(UpnpTransportConfig::for_control_point(&config))?;
//! let (mut control_point, notifications) = ControlPoint::start(config, Arc::new(transport), events)?;
//!
//! for notification in notifications.iter().take(1) {
//!     println!("{notification:?}");
//! }
//! for device in control_point.devices() {
//!     println!("{device}");
//! }
//! control_point.stop();
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod codec;
pub mod config;
mod control_point;
pub mod device;
pub mod differencer;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod logging;
pub mod monitor;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod transport;
pub mod xml;

pub use action::{ActionKind, ActionRequestBuilder, PendingAction};
pub use codec::{AggregatedValue, ParameterValue};
pub use config::ControlPointConfig;
pub use control_point::ControlPoint;
pub use device::{Device, DeviceHandle, DeviceSummary, ServiceState};
pub use differencer::StateChange;
pub use dispatcher::{DispatcherHandle, EventDispatcher};
pub use error::{ControlPointError, DecodeError, Result, TransportError};
pub use event::{Advertisement, Notification, Notifier, SubscriptionUpdate, TransportEvent};
pub use monitor::{MonitorHandle, SweepReport, TimeoutMonitor};
pub use registry::{AgeReport, DeviceRegistry, UpsertOutcome};
pub use resolver::{DeviceDescription, ResolvedService};
pub use schema::Service;
pub use transport::{ActionRequest, Subscription, Transport, UpnpTransport, UpnpTransportConfig};
