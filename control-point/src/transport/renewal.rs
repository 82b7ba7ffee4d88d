//! Automatic GENA subscription renewal.
//!
//! A background thread renews every tracked subscription once it is within
//! the renewal threshold of expiring. Failed renewals are retried with
//! exponential backoff; a subscription that runs out of attempts, or lapses
//! while retrying, is dropped and reported so the control point can
//! subscribe again.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use callback_server::EventRouter;
use parking_lot::Mutex;
use soap_client::SoapClient;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::event::{SubscriptionUpdate, TransportEvent};

/// Renewal timing
#[derive(Debug, Clone)]
pub(crate) struct RenewalPolicy {
    /// How often tracked subscriptions are checked
    pub check_interval: Duration,
    /// Renew once a subscription is this close to expiring
    pub renewal_threshold: Duration,
    pub max_retry_attempts: u32,
    /// First retry delay, doubled on every further failure
    pub retry_backoff_base: Duration,
}

#[derive(Debug, Clone)]
struct TrackedSubscription {
    event_url: String,
    requested_timeout: u32,
    expires_at: Instant,
    failures: u32,
    retry_at: Option<Instant>,
}

impl TrackedSubscription {
    fn is_due(&self, now: Instant, threshold: Duration) -> bool {
        match self.retry_at {
            Some(retry_at) => now >= retry_at,
            None => self.expires_at.saturating_duration_since(now) <= threshold,
        }
    }
}

/// Subscriptions the transport currently holds, keyed by SID
#[derive(Debug, Clone, Default)]
pub(crate) struct SubscriptionTable {
    inner: Arc<Mutex<HashMap<String, TrackedSubscription>>>,
}

impl SubscriptionTable {
    pub fn track(&self, sid: &str, event_url: &str, requested_timeout: u32, granted_timeout: u32) {
        self.inner.lock().insert(
            sid.to_string(),
            TrackedSubscription {
                event_url: event_url.to_string(),
                requested_timeout,
                expires_at: Instant::now() + Duration::from_secs(u64::from(granted_timeout)),
                failures: 0,
                retry_at: None,
            },
        );
    }

    pub fn untrack(&self, sid: &str) -> bool {
        self.inner.lock().remove(sid).is_some()
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.inner.lock().contains_key(sid)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// `(sid, event_url, requested_timeout)` of every subscription due now
    fn due(&self, threshold: Duration) -> Vec<(String, String, u32)> {
        let now = Instant::now();
        self.inner
            .lock()
            .iter()
            .filter(|(_, tracked)| tracked.is_due(now, threshold))
            .map(|(sid, tracked)| (sid.clone(), tracked.event_url.clone(), tracked.requested_timeout))
            .collect()
    }

    fn renewed(&self, sid: &str, granted_timeout: u32) {
        if let Some(tracked) = self.inner.lock().get_mut(sid) {
            tracked.expires_at = Instant::now() + Duration::from_secs(u64::from(granted_timeout));
            tracked.failures = 0;
            tracked.retry_at = None;
        }
    }

    /// Record a failed renewal and decide what happens next
    fn failed(&self, sid: &str, policy: &RenewalPolicy) -> RenewalVerdict {
        let mut inner = self.inner.lock();
        let Some(tracked) = inner.get_mut(sid) else {
            return RenewalVerdict::Gone;
        };

        let now = Instant::now();
        tracked.failures += 1;

        if now >= tracked.expires_at {
            inner.remove(sid);
            return RenewalVerdict::Expired;
        }
        if tracked.failures >= policy.max_retry_attempts {
            inner.remove(sid);
            return RenewalVerdict::GaveUp;
        }

        let backoff = policy.retry_backoff_base * 2u32.pow(tracked.failures - 1);
        tracked.retry_at = Some(now + backoff);
        RenewalVerdict::Retry(backoff)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RenewalVerdict {
    Retry(Duration),
    GaveUp,
    Expired,
    /// Untracked while the renewal was in flight
    Gone,
}

/// Background renewal thread
pub(crate) struct RenewalManager {
    thread: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl RenewalManager {
    pub fn start(
        table: SubscriptionTable,
        soap: SoapClient,
        router: Arc<EventRouter>,
        runtime: tokio::runtime::Handle,
        events: mpsc::Sender<TransportEvent>,
        policy: RenewalPolicy,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("cms-renewal".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(policy.check_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        check_and_renew(&table, &soap, &router, &runtime, &events, &policy);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            thread: Some(thread),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Renewal thread panicked");
            }
        }
    }
}

impl Drop for RenewalManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_and_renew(
    table: &SubscriptionTable,
    soap: &SoapClient,
    router: &EventRouter,
    runtime: &tokio::runtime::Handle,
    events: &mpsc::Sender<TransportEvent>,
    policy: &RenewalPolicy,
) {
    for (sid, event_url, requested_timeout) in table.due(policy.renewal_threshold) {
        let event = match soap.renew_subscription(&event_url, &sid, requested_timeout) {
            Ok(granted) => {
                debug!(sid = %sid, granted, "Subscription renewed");
                table.renewed(&sid, granted);
                TransportEvent::RenewalComplete(SubscriptionUpdate {
                    publisher_url: event_url,
                    sid,
                    timeout: granted,
                    outcome: Ok(()),
                })
            }
            Err(e) => {
                let error = TransportError::from(e);
                let update = SubscriptionUpdate {
                    publisher_url: event_url,
                    sid: sid.clone(),
                    timeout: 0,
                    outcome: Err(error.clone()),
                };

                match table.failed(&sid, policy) {
                    RenewalVerdict::Retry(backoff) => {
                        warn!(sid = %sid, error = %error, ?backoff, "Renewal failed, retrying");
                        continue;
                    }
                    RenewalVerdict::Gone => continue,
                    RenewalVerdict::GaveUp => {
                        warn!(sid = %sid, error = %error, "Renewal failed, giving up");
                        runtime.block_on(router.unregister(&sid));
                        TransportEvent::AutoRenewalFailed(update)
                    }
                    RenewalVerdict::Expired => {
                        warn!(sid = %sid, error = %error, "Subscription expired");
                        runtime.block_on(router.unregister(&sid));
                        TransportEvent::SubscriptionExpired(update)
                    }
                }
            }
        };

        if events.send(event).is_err() {
            debug!("Transport event receiver dropped");
            return;
        }
    }
}
