//! Events flowing into and out of the control point.
//!
//! [`TransportEvent`] is what the transport delivers to the dispatcher, one
//! value per asynchronous callback. [`Notification`] is what the control
//! point reports to its front end.

use std::sync::mpsc;

use crate::codec::ParameterValue;
use crate::error::TransportError;
use crate::schema::Service;

/// A device announcement, from a search response or an `ssdp:alive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// UDN of the announcing device
    pub device_id: String,
    /// Description document URL
    pub location: String,
    /// Advertised lifetime in seconds
    pub expires: i64,
    /// Search target or notification type
    pub target: String,
}

/// Outcome of a GENA subscription handshake, reported asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    /// Event URL the subscription belongs to
    pub publisher_url: String,
    pub sid: String,
    /// Granted timeout in seconds
    pub timeout: u32,
    pub outcome: Result<(), TransportError>,
}

/// Asynchronous callbacks delivered by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    AdvertisementAlive(Advertisement),
    SearchResult(Advertisement),
    AdvertisementByeBye {
        device_id: String,
    },
    SearchTimeout,

    /// A SOAP action finished; `outcome` holds the response body
    ActionComplete {
        control_url: String,
        action: String,
        outcome: Result<String, TransportError>,
    },

    /// A `QueryStateVariable` finished; `outcome` holds the value
    StateVariableComplete {
        control_url: String,
        variable: String,
        outcome: Result<String, TransportError>,
    },

    /// A GENA NOTIFY arrived
    EventReceived {
        sid: String,
        event_key: u32,
        body: String,
    },

    SubscribeComplete(SubscriptionUpdate),
    RenewalComplete(SubscriptionUpdate),
    UnsubscribeComplete(SubscriptionUpdate),
    AutoRenewalFailed(SubscriptionUpdate),
    SubscriptionExpired(SubscriptionUpdate),

    /// Inbound subscription request; only meaningful to devices
    SubscriptionRequest {
        sid: String,
    },
}

impl TransportEvent {
    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AdvertisementAlive(_) => "advertisement-alive",
            Self::SearchResult(_) => "search-result",
            Self::AdvertisementByeBye { .. } => "advertisement-byebye",
            Self::SearchTimeout => "search-timeout",
            Self::ActionComplete { .. } => "action-complete",
            Self::StateVariableComplete { .. } => "state-variable-complete",
            Self::EventReceived { .. } => "event-received",
            Self::SubscribeComplete(_) => "subscribe-complete",
            Self::RenewalComplete(_) => "renewal-complete",
            Self::UnsubscribeComplete(_) => "unsubscribe-complete",
            Self::AutoRenewalFailed(_) => "auto-renewal-failed",
            Self::SubscriptionExpired(_) => "subscription-expired",
            Self::SubscriptionRequest { .. } => "subscription-request",
        }
    }
}

/// Observable changes reported to the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    DeviceAdded {
        udn: String,
        friendly_name: String,
    },
    DeviceRemoved {
        udn: String,
    },

    /// A state variable changed; `parameters` holds the decoded pairs of an
    /// aggregated value and is empty otherwise
    StateUpdate {
        udn: String,
        service: Service,
        variable: String,
        value: String,
        parameters: Vec<ParameterValue>,
    },

    VariableQueried {
        udn: String,
        control_url: String,
        variable: String,
        value: String,
    },

    ActionCompleted {
        control_url: String,
        action: String,
        parameters: Vec<ParameterValue>,
    },
    ActionFailed {
        control_url: String,
        action: String,
        error: String,
    },
}

/// Sending half of the notification channel.
///
/// Sends never fail the caller: a front end that stopped listening only
/// loses its notifications.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    sender: Option<mpsc::Sender<Notification>>,
}

impl Notifier {
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A notifier that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Notifier plus the receiver it feeds
    pub fn channel() -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    pub fn notify(&self, notification: Notification) {
        if let Some(sender) = &self.sender {
            if sender.send(notification).is_err() {
                tracing::trace!("Notification receiver dropped");
            }
        }
    }
}
