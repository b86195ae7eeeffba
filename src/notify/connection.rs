//! Connection lifecycle for notify sessions.
//!
//! The manager owns at most one live [`Link`] at a time. Every successful
//! dial starts a new epoch with its own cancellation token and heartbeat;
//! a loss report for the live epoch tears the link down and starts the
//! fixed-interval reconnect loop. Reports for stale epochs are ignored, so
//! the heartbeat, the read loop and callers can all report the same failure
//! and only one reconnect runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, NOTIFY_API, USER_AGENT};
use crate::notify::codec::Codec;
use crate::notify::error::NotifyError;
use crate::notify::heartbeat;
use crate::notify::proto::Command;
use crate::notify::transport::{
    Dialer, FrameSink, FrameSource, Transport, TransportError, UpgradeRequest,
};
use crate::retry::{retry_at_interval, ReconnectPolicy};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NotifyDefaults;

impl NotifyDefaults {
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(8);
    pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
}

#[derive(Clone, Debug)]
pub struct NotifyOptions {
    /// Period between heartbeat commands.
    pub heartbeat_interval: Duration,
    /// Delay before every reconnect attempt. Attempts never stop while the
    /// session is open.
    pub reconnect_interval: Duration,
    /// Upper bound for flushing a close frame on teardown.
    pub close_timeout: Duration,
}

impl NotifyOptions {
    pub(crate) fn validate(&self) -> Result<(), NotifyError> {
        if self.heartbeat_interval.is_zero() {
            return Err(NotifyError::Configuration(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_interval.is_zero() {
            return Err(NotifyError::Configuration(
                "reconnect_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for NotifyOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: NotifyDefaults::HEARTBEAT_INTERVAL,
            reconnect_interval: NotifyDefaults::RECONNECT_INTERVAL,
            close_timeout: NotifyDefaults::CLOSE_TIMEOUT,
        }
    }
}

/// Observable connection lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Idle,
    Dialing,
    Connected,
    Disconnected,
    Reconnecting,
    /// The last reconnect attempt failed; another one is scheduled.
    Failed,
    Closed,
}

/// One connection epoch.
pub(crate) struct Link {
    epoch: u64,
    token: CancellationToken,
    sink: AsyncMutex<Box<dyn FrameSink>>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    fn new(epoch: u64, token: CancellationToken, transport: Transport) -> Self {
        Self {
            epoch,
            token,
            sink: AsyncMutex::new(transport.sink),
            source: Mutex::new(Some(transport.source)),
            heartbeat: Mutex::new(None),
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Cancelled when this epoch ends. Also the heartbeat's stop signal.
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Hands the read half to a reader. Only one reader holds it at a time.
    pub(crate) fn take_source(&self) -> Option<Box<dyn FrameSource>> {
        self.source.lock().ok().and_then(|mut source| source.take())
    }

    pub(crate) fn restore_source(&self, source: Box<dyn FrameSource>) {
        if let Ok(mut slot) = self.source.lock() {
            *slot = Some(source);
        }
    }

    /// Writes one frame. Writers are serialized on the sink lock and give up
    /// once the epoch ends.
    pub(crate) async fn write(&self, frame: String) -> Result<(), TransportError> {
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send_frame(frame).await
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TransportError::Closed),
            result = write => result,
        }
    }

    fn set_heartbeat(&self, task: JoinHandle<()>) {
        if let Ok(mut slot) = self.heartbeat.lock() {
            *slot = Some(task);
        }
    }

    /// Stops the heartbeat, then closes the sink.
    async fn teardown(&self, close_timeout: Duration) {
        self.token.cancel();

        let heartbeat = self.heartbeat.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = heartbeat {
            let _ = task.await;
        }

        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(close_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(event = "notify_close_failed", epoch = self.epoch, error = %err),
            Err(_) => debug!(event = "notify_close_timed_out", epoch = self.epoch),
        }
    }
}

pub(crate) struct ConnectionManager {
    api: ApiClient,
    codec: Codec,
    dialer: Arc<dyn Dialer>,
    options: NotifyOptions,
    link: watch::Sender<Option<Arc<Link>>>,
    state: watch::Sender<ConnectionState>,
    epochs: AtomicU64,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub(crate) fn new(api: ApiClient, dialer: Arc<dyn Dialer>, options: NotifyOptions) -> Arc<Self> {
        Arc::new(Self {
            codec: api.codec(),
            api,
            dialer,
            options,
            link: watch::channel(None).0,
            state: watch::channel(ConnectionState::Idle).0,
            epochs: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    pub(crate) fn api(&self) -> &ApiClient {
        &self.api
    }

    pub(crate) fn codec(&self) -> &Codec {
        &self.codec
    }

    pub(crate) fn options(&self) -> &NotifyOptions {
        &self.options
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    pub(crate) fn current(&self) -> Option<Arc<Link>> {
        self.link.borrow().clone()
    }

    /// Live link, or the error explaining why there is none.
    pub(crate) fn require_link(&self) -> Result<Arc<Link>, NotifyError> {
        match self.current() {
            Some(link) => Ok(link),
            None if self.is_shut_down() => Err(NotifyError::Closed),
            None => Err(NotifyError::NotConnected),
        }
    }

    /// Builds the signed websocket upgrade for the notify endpoint.
    pub(crate) fn upgrade_request(&self) -> Result<UpgradeRequest, NotifyError> {
        let mut url = self.api.server().clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(NotifyError::Configuration(format!(
                    "cannot upgrade {other:?} server url to websocket"
                )))
            }
        };
        url.set_scheme(scheme).map_err(|()| {
            NotifyError::Configuration(format!("cannot switch server url to {scheme}"))
        })?;

        let pairs = self.api.authenticated_pairs(&url, NOTIFY_API, None)?;
        url.set_query(None);
        url.query_pairs_mut().extend_pairs(&pairs);

        let mut headers = vec![("User-Agent".to_string(), USER_AGENT.to_string())];
        if let Some(token) = self.api.oauth_token() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        Ok(UpgradeRequest { url, headers })
    }

    /// Dials a new epoch and starts its heartbeat.
    ///
    /// Failures leave subscription state untouched.
    pub(crate) async fn dial(self: &Arc<Self>) -> Result<Arc<Link>, NotifyError> {
        if self.is_shut_down() {
            return Err(NotifyError::Closed);
        }

        let request = self.upgrade_request()?;
        let transport = self.dialer.dial(request).await?;

        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let link = Arc::new(Link::new(epoch, self.shutdown.child_token(), transport));
        link.set_heartbeat(heartbeat::spawn(Arc::clone(self), Arc::clone(&link)));
        self.link.send_replace(Some(Arc::clone(&link)));

        if self.is_shut_down() {
            self.link.send_replace(None);
            link.teardown(self.options.close_timeout).await;
            return Err(NotifyError::Closed);
        }

        self.set_state(ConnectionState::Connected);
        info!(event = "notify_connected", epoch);
        Ok(link)
    }

    /// Encodes and writes `command` on `link`.
    ///
    /// A write failure reports the epoch as lost before returning.
    pub(crate) async fn send(self: &Arc<Self>, link: &Link, command: &Command) -> Result<(), NotifyError> {
        let frame = self.codec.encode(command)?;
        if let Err(err) = link.write(frame).await {
            self.report_lost(link.epoch(), &err.to_string());
            return Err(NotifyError::Transport(err));
        }
        debug!(
            event = "notify_command_sent",
            command = command.name(),
            request_id = command.request_id.as_deref().unwrap_or(""),
            epoch = link.epoch()
        );
        Ok(())
    }

    /// Sends `command` on the live link.
    pub(crate) async fn send_current(self: &Arc<Self>, command: &Command) -> Result<(), NotifyError> {
        let link = self.require_link()?;
        self.send(&link, command).await
    }

    /// Marks `epoch` as lost. Only the first report for the live epoch
    /// starts a reconnect.
    pub(crate) fn report_lost(self: &Arc<Self>, epoch: u64, reason: &str) {
        let mut lost = None;
        self.link.send_if_modified(|current| {
            if current.as_ref().is_some_and(|link| link.epoch() == epoch) {
                lost = current.take();
                true
            } else {
                false
            }
        });
        let Some(link) = lost else {
            return;
        };

        link.token().cancel();
        if self.is_shut_down() {
            return;
        }

        warn!(event = "notify_connection_lost", epoch, reason);
        self.set_state(ConnectionState::Disconnected);
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            link.teardown(manager.options.close_timeout).await;
            manager.reconnect().await;
        });
    }

    async fn reconnect(self: Arc<Self>) {
        let policy = ReconnectPolicy {
            interval: self.options.reconnect_interval,
        };
        let manager = &self;
        let outcome = retry_at_interval(policy, &self.shutdown, |attempt| async move {
            manager.set_state(ConnectionState::Reconnecting);
            info!(event = "notify_reconnect_attempt", attempt);
            let result = manager.dial().await;
            if result.is_err() {
                manager.set_state(ConnectionState::Failed);
            }
            result
        })
        .await;

        if let Some(link) = outcome {
            info!(event = "notify_reconnected", epoch = link.epoch());
        }
    }

    /// Waits for a live link newer than `epoch`. `None` once shut down.
    pub(crate) async fn next_link_after(&self, epoch: u64) -> Option<Arc<Link>> {
        let mut links = self.link.subscribe();
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            next = links.wait_for(|link| link.as_ref().is_some_and(|link| link.epoch() > epoch)) => {
                next.ok().and_then(|link| (*link).clone())
            }
        }
    }

    /// Stops background work without waiting for teardown.
    pub(crate) fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Cancels every epoch, stops the heartbeat, then closes the transport.
    pub(crate) async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(link) = self.link.send_replace(None) {
            link.teardown(self.options.close_timeout).await;
        }
        self.set_state(ConnectionState::Closed);
        info!(event = "notify_closed");
    }
}
