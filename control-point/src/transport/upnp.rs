//! [`Transport`] over real UPnP networking.
//!
//! Composes the SSDP client and listener, the description fetcher, the SOAP
//! client and a GENA callback server. The callback server runs on a private
//! tokio runtime; everything else is blocking and runs on short-lived
//! threads, so the core never has to be async.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use callback_server::{CallbackServer, EventRouter, NotificationPayload};
use parking_lot::Mutex;
use soap_client::SoapClient;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use upnp_discovery::{DescriptionFetcher, SsdpAdvertisement, SsdpClient, SsdpListener, SsdpNotification};

use super::renewal::{RenewalManager, RenewalPolicy, SubscriptionTable};
use super::{ActionRequest, Subscription, Transport};
use crate::codec;
use crate::config::ControlPointConfig;
use crate::error::{ControlPointError, TransportError};
use crate::event::{Advertisement, SubscriptionUpdate, TransportEvent};

/// Lifetime assumed for advertisements without `CACHE-CONTROL: max-age`
const DEFAULT_ADVERTISEMENT_LIFETIME: i64 = 1800;

/// Settings for [`UpnpTransport`]
#[derive(Debug, Clone)]
pub struct UpnpTransportConfig {
    pub callback_port_range: (u16, u16),
    /// Path appended to the callback server's base URL
    pub callback_path: String,
    /// Timeout for description downloads and SOAP reads
    pub http_timeout: Duration,
    /// Listen for multicast NOTIFY announcements
    pub listen_for_notify: bool,
    /// Only `ssdp:alive` messages whose NT starts with this are forwarded
    pub notify_filter: Option<String>,
    pub renewal_check_interval: Duration,
    pub renewal_threshold: Duration,
    pub max_retry_attempts: u32,
    pub retry_backoff_base: Duration,
}

impl Default for UpnpTransportConfig {
    fn default() -> Self {
        Self {
            callback_port_range: (3400, 3500),
            callback_path: "/notify".to_string(),
            http_timeout: Duration::from_secs(10),
            listen_for_notify: true,
            notify_filter: None,
            renewal_check_interval: Duration::from_secs(5),
            renewal_threshold: Duration::from_secs(300),
            max_retry_attempts: 3,
            retry_backoff_base: Duration::from_secs(2),
        }
    }
}

impl UpnpTransportConfig {
    /// Transport settings matching a control point configuration
    pub fn for_control_point(config: &ControlPointConfig) -> Self {
        // Five minutes ahead, or halfway through for short subscriptions
        let renewal_threshold = Duration::from_secs(300).min(config.subscription_timeout / 2);

        Self {
            callback_port_range: config.callback_port_range,
            callback_path: config.callback_path.clone(),
            notify_filter: Some(config.device_type.clone()),
            renewal_threshold,
            ..Default::default()
        }
    }
}

/// UPnP networking behind the [`Transport`] trait
pub struct UpnpTransport {
    runtime: Runtime,
    server: Mutex<Option<CallbackServer>>,
    router: Arc<EventRouter>,
    callback_url: String,
    soap: SoapClient,
    fetcher: DescriptionFetcher,
    subscriptions: SubscriptionTable,
    events: mpsc::Sender<TransportEvent>,
    running: Arc<AtomicBool>,
    renewal: Mutex<Option<RenewalManager>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl UpnpTransport {
    /// Start the callback server, NOTIFY listener and renewal thread.
    ///
    /// Returns the transport and the receiving end of its event channel.
    pub fn start(
        config: UpnpTransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), ControlPointError> {
        let network = |context: &str, e: &dyn std::fmt::Display| {
            ControlPointError::Transport(TransportError::Network(format!("{context}: {e}")))
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("cms-callback")
            .enable_all()
            .build()
            .map_err(|e| network("Failed to build runtime", &e))?;

        let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel::<NotificationPayload>();
        let server = runtime
            .block_on(CallbackServer::new(config.callback_port_range, notify_tx))
            .map_err(|e| network("Failed to start callback server", &e))?;
        let router = Arc::clone(server.router());
        let callback_url = format!("{}{}", server.base_url(), config.callback_path);

        let (events, events_rx) = mpsc::channel();

        let forward = events.clone();
        runtime.spawn(async move {
            while let Some(payload) = notify_rx.recv().await {
                let event = TransportEvent::EventReceived {
                    sid: payload.subscription_id,
                    event_key: payload.event_key,
                    body: payload.event_xml,
                };
                if forward.send(event).is_err() {
                    break;
                }
            }
        });

        let soap = SoapClient::with_timeouts(Duration::from_secs(5), config.http_timeout);
        let fetcher = DescriptionFetcher::new(config.http_timeout).map_err(TransportError::from)?;
        let subscriptions = SubscriptionTable::default();
        let running = Arc::new(AtomicBool::new(true));

        let renewal = RenewalManager::start(
            subscriptions.clone(),
            soap.clone(),
            Arc::clone(&router),
            runtime.handle().clone(),
            events.clone(),
            RenewalPolicy {
                check_interval: config.renewal_check_interval,
                renewal_threshold: config.renewal_threshold,
                max_retry_attempts: config.max_retry_attempts,
                retry_backoff_base: config.retry_backoff_base,
            },
        )
        .map_err(|e| network("Failed to start renewal thread", &e))?;

        let listener = if config.listen_for_notify {
            Some(
                spawn_listener(events.clone(), Arc::clone(&running), config.notify_filter.clone())
                    .map_err(|e| network("Failed to start SSDP listener", &e))?,
            )
        } else {
            None
        };

        info!(callback_url = %callback_url, "UPnP transport started");
        Ok((
            Self {
                runtime,
                server: Mutex::new(Some(server)),
                router,
                callback_url,
                soap,
                fetcher,
                subscriptions,
                events,
                running,
                renewal: Mutex::new(Some(renewal)),
                listener: Mutex::new(listener),
            },
            events_rx,
        ))
    }

    /// URL handed to devices in SUBSCRIBE requests
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    fn ensure_running(&self) -> Result<(), TransportError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Transport event receiver dropped");
        }
    }
}

impl Transport for UpnpTransport {
    fn search(&self, target: &str, mx: u32) -> Result<(), TransportError> {
        self.ensure_running()?;

        // Responses may take up to MX seconds; allow one more for the network
        let client = SsdpClient::new(Duration::from_secs(u64::from(mx) + 1))?;
        let events = self.events.clone();
        let target = target.to_string();

        thread::Builder::new()
            .name("cms-ssdp-search".to_string())
            .spawn(move || {
                match client.search(&target, mx) {
                    Ok(responses) => {
                        for response in responses {
                            match response {
                                Ok(advertisement) => {
                                    let event = TransportEvent::SearchResult(to_advertisement(advertisement));
                                    if events.send(event).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => warn!(target = %target, error = %e, "Search response error"),
                            }
                        }
                    }
                    Err(e) => warn!(target = %target, error = %e, "M-SEARCH failed"),
                }
                let _ = events.send(TransportEvent::SearchTimeout);
            })
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(())
    }

    fn download_description(&self, location: &str) -> Result<String, TransportError> {
        self.ensure_running()?;
        Ok(self.fetcher.fetch(location)?)
    }

    fn subscribe(&self, event_url: &str, timeout_secs: u32) -> Result<Subscription, TransportError> {
        self.ensure_running()?;

        let response = self.soap.subscribe(event_url, &self.callback_url, timeout_secs)?;
        let released = self.runtime.block_on(self.router.register(response.sid.clone()));
        if released > 0 {
            debug!(sid = %response.sid, released, "Delivered events that arrived before SUBSCRIBE returned");
        }
        self.subscriptions
            .track(&response.sid, event_url, timeout_secs, response.timeout_seconds);

        self.emit(TransportEvent::SubscribeComplete(SubscriptionUpdate {
            publisher_url: event_url.to_string(),
            sid: response.sid.clone(),
            timeout: response.timeout_seconds,
            outcome: Ok(()),
        }));

        Ok(Subscription {
            sid: response.sid,
            timeout_secs: response.timeout_seconds,
        })
    }

    fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), TransportError> {
        self.subscriptions.untrack(sid);
        self.runtime.block_on(self.router.unregister(sid));
        self.ensure_running()?;

        self.soap.unsubscribe(event_url, sid)?;
        self.emit(TransportEvent::UnsubscribeComplete(SubscriptionUpdate {
            publisher_url: event_url.to_string(),
            sid: sid.to_string(),
            timeout: 0,
            outcome: Ok(()),
        }));
        Ok(())
    }

    fn holds_subscription(&self, sid: &str) -> bool {
        self.subscriptions.contains(sid)
    }

    fn send_action(&self, request: ActionRequest) -> Result<(), TransportError> {
        self.ensure_running()?;

        let soap = self.soap.clone();
        let events = self.events.clone();
        thread::Builder::new()
            .name("cms-soap-action".to_string())
            .spawn(move || {
                let payload: String = request
                    .arguments
                    .iter()
                    .map(|(name, value)| format!("<{name}>{}</{name}>", codec::escape(value)))
                    .collect();

                let outcome = soap
                    .call(&request.control_url, &request.service_type, &request.action, &payload)
                    .map_err(TransportError::from)
                    .and_then(|response| {
                        let mut body = Vec::new();
                        response
                            .write(&mut body)
                            .map_err(|e| TransportError::Malformed(e.to_string()))?;
                        String::from_utf8(body).map_err(|e| TransportError::Malformed(e.to_string()))
                    });

                let _ = events.send(TransportEvent::ActionComplete {
                    control_url: request.control_url,
                    action: request.action,
                    outcome,
                });
            })
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(())
    }

    fn query_variable(&self, control_url: &str, variable: &str) -> Result<(), TransportError> {
        self.ensure_running()?;

        let soap = self.soap.clone();
        let events = self.events.clone();
        let control_url = control_url.to_string();
        let variable = variable.to_string();
        thread::Builder::new()
            .name("cms-query-variable".to_string())
            .spawn(move || {
                let outcome = soap
                    .query_state_variable(&control_url, &variable)
                    .map_err(TransportError::from);
                let _ = events.send(TransportEvent::StateVariableComplete {
                    control_url,
                    variable,
                    outcome,
                });
            })
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(())
    }

    fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(mut renewal) = self.renewal.lock().take() {
            renewal.shutdown();
        }
        if let Some(listener) = self.listener.lock().take() {
            if listener.join().is_err() {
                warn!("SSDP listener thread panicked");
            }
        }
        if let Some(server) = self.server.lock().take() {
            self.runtime.block_on(server.shutdown());
        }
        info!(
            leftover_subscriptions = self.subscriptions.len(),
            "UPnP transport stopped"
        );
    }
}

impl Drop for UpnpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn to_advertisement(advertisement: SsdpAdvertisement) -> Advertisement {
    Advertisement {
        device_id: advertisement.udn().to_string(),
        expires: advertisement
            .max_age
            .map_or(DEFAULT_ADVERTISEMENT_LIFETIME, i64::from),
        location: advertisement.location,
        target: advertisement.target,
    }
}

fn spawn_listener(
    events: mpsc::Sender<TransportEvent>,
    running: Arc<AtomicBool>,
    filter: Option<String>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("cms-ssdp-listener".to_string())
        .spawn(move || {
            let mut listener = match SsdpListener::bind(Duration::from_millis(500)) {
                Ok(listener) => listener,
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SSDP announcements, relying on search only");
                    return;
                }
            };

            while running.load(Ordering::SeqCst) {
                let event = match listener.recv() {
                    Ok(Some(SsdpNotification::Alive(advertisement))) => {
                        let wanted = filter.as_deref().map_or(true, |prefix| {
                            advertisement
                                .target
                                .get(..prefix.len())
                                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
                        });
                        if !wanted {
                            continue;
                        }
                        TransportEvent::AdvertisementAlive(to_advertisement(advertisement))
                    }
                    Ok(Some(SsdpNotification::ByeBye { usn, .. })) => TransportEvent::AdvertisementByeBye {
                        device_id: upnp_discovery::udn_from_usn(&usn).to_string(),
                    },
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "SSDP listener error");
                        continue;
                    }
                };

                if events.send(event).is_err() {
                    break;
                }
            }
            debug!("SSDP listener stopped");
        })
}
