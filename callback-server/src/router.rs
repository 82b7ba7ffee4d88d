//! Event routing for HTTP callback notifications.
//!
//! The `EventRouter` keeps the set of subscription IDs the control point owns
//! and forwards matching NOTIFY bodies to a channel.
//!
//! A device sends its initial event as soon as it has answered SUBSCRIBE, which
//! can be before the subscriber has learned the SID and registered it. Events
//! for unknown SIDs are therefore parked in a small buffer and released when
//! the SID is registered.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

/// Maximum number of events held for not-yet-registered subscriptions
pub const PENDING_CAPACITY: usize = 32;

/// Unparsed GENA event notification received via HTTP callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// The subscription ID from the `SID` header
    pub subscription_id: String,
    /// Event key from the `SEQ` header
    pub event_key: u32,
    /// The raw `propertyset` XML body
    pub event_xml: String,
}

/// What the router did with an incoming event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Sent to the channel
    Delivered,
    /// Held until its subscription is registered
    Deferred,
}

#[derive(Default)]
struct RouterState {
    active: HashSet<String>,
    pending: VecDeque<NotificationPayload>,
}

/// Routes events from HTTP callbacks to a channel.
#[derive(Clone)]
pub struct EventRouter {
    state: Arc<RwLock<RouterState>>,
    event_sender: mpsc::UnboundedSender<NotificationPayload>,
}

impl EventRouter {
    /// Create a new event router.
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use callback_server::router::{EventRouter, NotificationPayload};
    ///
    /// let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// let router = EventRouter::new(tx);
    /// ```
    pub fn new(event_sender: mpsc::UnboundedSender<NotificationPayload>) -> Self {
        Self {
            state: Arc::new(RwLock::new(RouterState::default())),
            event_sender,
        }
    }

    /// Register a subscription ID for event routing.
    ///
    /// Parked events for this subscription are delivered in arrival order.
    /// Returns how many were released.
    pub async fn register(&self, subscription_id: String) -> usize {
        let mut state = self.state.write().await;

        let mut released = 0;
        let mut kept = VecDeque::with_capacity(state.pending.len());
        for payload in state.pending.drain(..) {
            if payload.subscription_id == subscription_id {
                let _ = self.event_sender.send(payload);
                released += 1;
            } else {
                kept.push_back(payload);
            }
        }
        state.pending = kept;
        state.active.insert(subscription_id);

        if released > 0 {
            debug!(released, "Released parked events for new subscription");
        }
        released
    }

    /// Unregister a subscription ID.
    ///
    /// Later events for this subscription are parked like any unknown SID.
    pub async fn unregister(&self, subscription_id: &str) {
        let mut state = self.state.write().await;
        state.active.remove(subscription_id);
        state
            .pending
            .retain(|payload| payload.subscription_id != subscription_id);
    }

    /// Whether `subscription_id` is currently registered
    pub async fn is_registered(&self, subscription_id: &str) -> bool {
        self.state.read().await.active.contains(subscription_id)
    }

    /// Route an incoming event to the channel.
    pub async fn route_event(&self, payload: NotificationPayload) -> RouteOutcome {
        {
            let state = self.state.read().await;
            if state.active.contains(&payload.subscription_id) {
                // Send errors only mean the receiver is gone
                let _ = self.event_sender.send(payload);
                return RouteOutcome::Delivered;
            }
        }

        let mut state = self.state.write().await;
        // Registration may have happened between the two locks
        if state.active.contains(&payload.subscription_id) {
            let _ = self.event_sender.send(payload);
            return RouteOutcome::Delivered;
        }

        trace!(sid = %payload.subscription_id, "Parking event for unknown subscription");
        if state.pending.len() == PENDING_CAPACITY {
            state.pending.pop_front();
        }
        state.pending.push_back(payload);
        RouteOutcome::Deferred
    }
}
