//! HTTP server for receiving GENA event notifications.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warp::http::{Method, StatusCode};
use warp::{Filter, Rejection, Reply};

use crate::error::CallbackServerError;
use crate::router::{EventRouter, NotificationPayload, RouteOutcome};

/// HTTP server that turns GENA `NOTIFY` requests into [`NotificationPayload`]s.
///
/// Binds the first free port of a range and accepts `NOTIFY` on any path.
/// Requests with a usable `SID` and `SEQ` are handed to the server's
/// [`EventRouter`]; anything else is answered with a GENA error status.
///
/// ```no_run
/// use tokio::sync::mpsc;
/// use callback_server::CallbackServer;
///
/// # async fn run() -> Result<(), callback_server::CallbackServerError> {
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let server = CallbackServer::new((3400, 3500), tx).await?;
/// println!("Deliver events to {}", server.base_url());
///
/// while let Some(notification) = rx.recv().await {
///     println!("SEQ {} for {}", notification.event_key, notification.subscription_id);
/// }
/// # Ok(())
/// # }
/// ```
pub struct CallbackServer {
    port: u16,
    base_url: String,
    router: Arc<EventRouter>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Start on the first free port of `port_range`, advertising the address
    /// of the interface used for outbound traffic.
    pub async fn new(
        port_range: (u16, u16),
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self, CallbackServerError> {
        let local_ip = outbound_ip().ok_or(CallbackServerError::LocalIpUnavailable)?;
        Self::with_address(port_range, local_ip, event_sender).await
    }

    /// Start on the first free port of `port_range`, advertising `advertised_ip`.
    pub async fn with_address(
        port_range: (u16, u16),
        advertised_ip: IpAddr,
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self, CallbackServerError> {
        let (start, end) = port_range;
        let port = Self::find_available_port(start, end)
            .ok_or(CallbackServerError::NoAvailablePort { start, end })?;

        let router = Arc::new(EventRouter::new(event_sender));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(serve(port, Arc::clone(&router), shutdown_rx, ready_tx));

        if ready_rx.await != Ok(true) {
            return Err(CallbackServerError::StartFailed);
        }

        let base_url = format!("http://{advertised_ip}:{port}");
        info!(%base_url, "Callback server listening");
        Ok(Self {
            port,
            base_url,
            router,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Base URL (`http://ip:port`) to hand out as the GENA callback
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(port = self.port, "Callback server stopped");
    }

    fn find_available_port(start: u16, end: u16) -> Option<u16> {
        (start..=end).find(|&port| Self::is_port_available(port))
    }

    fn is_port_available(port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).is_ok()
    }
}

/// Address of the interface that routes to the outside world.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip())
}

async fn serve(
    port: u16,
    router: Arc<EventRouter>,
    shutdown_rx: oneshot::Receiver<()>,
    ready_tx: oneshot::Sender<bool>,
) {
    let routes = notify_filter(router).recover(reject_to_status);
    let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let bound = warp::serve(routes).try_bind_with_graceful_shutdown(address, async move {
        let _ = shutdown_rx.await;
    });

    match bound {
        Ok((addr, server)) => {
            debug!(%addr, "Callback server bound");
            let _ = ready_tx.send(true);
            server.await;
        }
        Err(e) => {
            warn!(port, error = %e, "Callback server failed to bind");
            let _ = ready_tx.send(false);
        }
    }
}

/// `NOTIFY` on any path, with the GENA headers collected
fn notify_filter(
    router: Arc<EventRouter>,
) -> impl Filter<Extract = (StatusCode,), Error = Rejection> + Clone {
    let headers = warp::header::optional::<String>("sid")
        .and(warp::header::optional::<String>("nt"))
        .and(warp::header::optional::<String>("nts"))
        .and(warp::header::optional::<String>("seq"))
        .map(|sid, nt, nts, seq| GenaHeaders { sid, nt, nts, seq });

    warp::method()
        .and_then(|method: Method| async move {
            if method.as_str() == "NOTIFY" {
                Ok(())
            } else {
                Err(warp::reject::not_found())
            }
        })
        .untuple_one()
        .and(headers)
        .and(warp::body::bytes())
        .and_then(move |headers: GenaHeaders, body: bytes::Bytes| {
            let router = Arc::clone(&router);
            async move { deliver(&router, headers, &body).await }
        })
}

async fn deliver(
    router: &EventRouter,
    headers: GenaHeaders,
    body: &[u8],
) -> Result<StatusCode, Rejection> {
    let (subscription_id, event_key) = headers.validate().map_err(|problem| {
        warn!(?problem, "Rejecting NOTIFY");
        warp::reject::custom(problem)
    })?;

    debug!(sid = %subscription_id, seq = event_key, bytes = body.len(), "Received NOTIFY");
    let payload = NotificationPayload {
        subscription_id,
        event_key,
        event_xml: String::from_utf8_lossy(body).into_owned(),
    };
    if router.route_event(payload).await == RouteOutcome::Deferred {
        debug!("NOTIFY parked until its subscription is registered");
    }
    Ok(StatusCode::OK)
}

/// GENA headers of one `NOTIFY` request
#[derive(Debug, Default)]
struct GenaHeaders {
    sid: Option<String>,
    nt: Option<String>,
    nts: Option<String>,
    seq: Option<String>,
}

impl GenaHeaders {
    /// Subscription ID and event key, or why the request is unacceptable.
    ///
    /// `NT`/`NTS` are optional but must be `upnp:event`/`upnp:propchange`
    /// when present. A missing `SEQ` counts as the initial event.
    fn validate(self) -> Result<(String, u32), HeaderProblem> {
        let sid = self
            .sid
            .filter(|sid| !sid.trim().is_empty())
            .ok_or(HeaderProblem::MissingSid)?;

        let nt_ok = self.nt.as_deref().map_or(true, |nt| nt == "upnp:event");
        let nts_ok = self.nts.as_deref().map_or(true, |nts| nts == "upnp:propchange");
        if !(nt_ok && nts_ok) {
            return Err(HeaderProblem::NotAnEvent);
        }

        let event_key = match self.seq.as_deref() {
            None => 0,
            Some(seq) => seq.trim().parse().map_err(|_| HeaderProblem::BadSequence)?,
        };
        Ok((sid, event_key))
    }
}

/// Why a `NOTIFY` was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderProblem {
    MissingSid,
    NotAnEvent,
    BadSequence,
}

impl warp::reject::Reject for HeaderProblem {}

impl HeaderProblem {
    fn status(self) -> StatusCode {
        match self {
            HeaderProblem::MissingSid | HeaderProblem::NotAnEvent => StatusCode::PRECONDITION_FAILED,
            HeaderProblem::BadSequence => StatusCode::BAD_REQUEST,
        }
    }
}

async fn reject_to_status(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let status = if rejection.is_not_found() {
        StatusCode::NOT_FOUND
    } else if let Some(problem) = rejection.find::<HeaderProblem>() {
        problem.status()
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok(status)
}
