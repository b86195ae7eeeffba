//! Public notify session: subscribe, publish and acknowledge.
//!
//! A [`NotifySession`] owns one reconnecting connection. It supports a single
//! subscription at a time; messages for that subscription are delivered on a
//! [`DeliveryQueue`] that survives reconnects. After a reconnect the reader
//! re-sends the subscribe command for the same topic and keeps feeding the
//! same queue.

use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use tokio::sync::{mpsc, watch};
use tracing::{info, trace, warn};

use crate::api::ApiClient;
use crate::notify::connection::{ConnectionManager, ConnectionState, Link, NotifyOptions};
use crate::notify::error::NotifyError;
use crate::notify::proto::{Command, MsgData, ResponseResult};
use crate::notify::transport::{Dialer, WebSocketDialer};

/// Connected notify session.
///
/// Dropping the session stops its background tasks. Call
/// [`NotifySession::close`] to also flush the close frame.
#[derive(Debug)]
pub struct NotifySession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    manager: Arc<ConnectionManager>,
    topic: Mutex<Option<String>>,
}

impl std::fmt::Debug for SessionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInner")
            .field("state", &self.manager.state())
            .field("topic", &self.subscribed_topic())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn subscribed_topic(&self) -> Option<String> {
        self.topic.lock().ok().and_then(|topic| topic.clone())
    }

    /// Claims the single subscription slot for `topic`.
    fn reserve(&self, topic: &str) -> Result<(), NotifyError> {
        let mut slot = self
            .topic
            .lock()
            .map_err(|_| NotifyError::Configuration("subscription state poisoned".to_string()))?;
        if let Some(active) = slot.as_ref() {
            return Err(NotifyError::AlreadySubscribed {
                topic: active.clone(),
            });
        }
        *slot = Some(topic.to_string());
        Ok(())
    }

    fn release(&self, topic: &str) {
        if let Ok(mut slot) = self.topic.lock() {
            if slot.as_deref() == Some(topic) {
                *slot = None;
            }
        }
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.topic.lock() {
            *slot = None;
        }
    }

    async fn acknowledge(&self, message: &MsgData) -> Result<(), NotifyError> {
        let command = Command::acknowledge(self.manager.api().next_request_id(), message);
        self.manager.send_current(&command).await?;
        trace!(
            event = "notify_acknowledged",
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset
        );
        Ok(())
    }
}

impl NotifySession {
    /// Connects to the notify endpoint of `api`'s server over websocket.
    pub async fn connect(api: ApiClient, options: NotifyOptions) -> Result<Self, NotifyError> {
        Self::connect_with(api, Arc::new(WebSocketDialer::new()), options).await
    }

    /// Connects through a custom [`Dialer`].
    ///
    /// Fails if the first dial fails; reconnects only start once a session
    /// has been established.
    pub async fn connect_with(
        api: ApiClient,
        dialer: Arc<dyn Dialer>,
        options: NotifyOptions,
    ) -> Result<Self, NotifyError> {
        options.validate()?;
        let manager = ConnectionManager::new(api, dialer, options);
        manager.set_state(ConnectionState::Dialing);
        if let Err(err) = manager.dial().await {
            manager.cancel();
            return Err(err);
        }

        Ok(Self {
            inner: Arc::new(SessionInner {
                manager,
                topic: Mutex::new(None),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Subscribes to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.manager.watch_state()
    }

    pub fn subscribed_topic(&self) -> Option<String> {
        self.inner.subscribed_topic()
    }

    /// Subscribes to `topic` and starts reading deliveries.
    ///
    /// Only one subscription may be active per session. The topic stays
    /// taken until the returned queue is dropped and its reader has stopped,
    /// or until the session is closed.
    pub async fn subscribe(&self, topic: &str) -> Result<DeliveryQueue, NotifyError> {
        if topic.is_empty() {
            return Err(NotifyError::Configuration("topic must not be empty".to_string()));
        }
        self.inner.reserve(topic)?;

        let manager = &self.inner.manager;
        let subscribed = async {
            let link = manager.require_link()?;
            manager.send(&link, &Command::subscribe(topic)).await?;
            Ok::<_, NotifyError>(link)
        }
        .await;
        let link = match subscribed {
            Ok(link) => link,
            Err(err) => {
                self.inner.release(topic);
                return Err(err);
            }
        };

        info!(event = "notify_subscribed", topic, epoch = link.epoch());
        let (sender, receiver) = mpsc::unbounded_channel();
        let reader = Reader {
            manager: Arc::clone(manager),
            session: Arc::downgrade(&self.inner),
            topic: topic.to_string(),
            deliveries: sender,
        };
        tokio::spawn(reader.run(link));

        Ok(DeliveryQueue {
            receiver,
            topic: topic.to_string(),
        })
    }

    /// Publishes `payload` under `key` to `topic`.
    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), NotifyError> {
        if topic.is_empty() {
            return Err(NotifyError::Configuration("topic must not be empty".to_string()));
        }
        let command = Command::publish(self.inner.manager.api().next_request_id(), topic, key, payload);
        self.inner.manager.send_current(&command).await
    }

    /// Acknowledges a delivery. Equivalent to [`Delivery::ack`].
    pub async fn acknowledge(&self, delivery: &Delivery) -> Result<(), NotifyError> {
        self.inner.acknowledge(&delivery.message).await
    }

    /// Stops the heartbeat and reconnects, closes the connection and clears
    /// the subscription. The session cannot be reused afterwards.
    pub async fn close(&self) {
        self.inner.manager.shutdown().await;
        self.inner.clear();
    }
}

impl Drop for NotifySession {
    fn drop(&mut self) {
        self.inner.manager.cancel();
    }
}

/// One message received on the subscribed topic.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub app_key: String,
    pub message: MsgData,
    pub received_at: SystemTime,
    session: Weak<SessionInner>,
}

impl Delivery {
    /// Acknowledges this message on the session that received it.
    ///
    /// Not retried. Returns [`NotifyError::SessionGone`] once the session has
    /// been dropped.
    pub async fn ack(&self) -> Result<(), NotifyError> {
        let session = self.session.upgrade().ok_or(NotifyError::SessionGone)?;
        session.acknowledge(&self.message).await
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct DeliveryQueue {
    receiver: mpsc::UnboundedReceiver<Delivery>,
    topic: String,
}

impl DeliveryQueue {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next delivery. `None` once the session has closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }
}

enum EpochOutcome {
    QueueDropped,
    Lost(String),
}

struct Reader {
    manager: Arc<ConnectionManager>,
    session: Weak<SessionInner>,
    topic: String,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl Reader {
    async fn run(self, mut link: Arc<Link>) {
        loop {
            match self.read_epoch(&link).await {
                EpochOutcome::QueueDropped => {
                    info!(event = "notify_queue_dropped", topic = %self.topic);
                    break;
                }
                EpochOutcome::Lost(reason) => {
                    self.manager.report_lost(link.epoch(), &reason);
                    match self.resume(link.epoch()).await {
                        Some(next) => link = next,
                        None => break,
                    }
                }
            }
        }

        if let Some(session) = self.session.upgrade() {
            session.release(&self.topic);
        }
        trace!(event = "notify_reader_stopped", topic = %self.topic);
    }

    async fn read_epoch(&self, link: &Link) -> EpochOutcome {
        let Some(mut source) = link.take_source() else {
            return EpochOutcome::Lost("frame source already taken".to_string());
        };

        loop {
            let frame = tokio::select! {
                biased;
                _ = link.token().cancelled() => {
                    return EpochOutcome::Lost("connection cancelled".to_string());
                }
                _ = self.deliveries.closed() => {
                    link.restore_source(source);
                    return EpochOutcome::QueueDropped;
                }
                frame = source.next_frame() => frame,
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => return EpochOutcome::Lost(err.to_string()),
            };
            self.handle_frame(&frame, link.epoch());
        }
    }

    fn handle_frame(&self, frame: &[u8], epoch: u64) {
        let response = match self.manager.codec().decode(frame) {
            Ok(response) => response,
            Err(err) => {
                warn!(event = "notify_frame_dropped", epoch, bytes = frame.len(), error = %err);
                return;
            }
        };

        match response.result {
            ResponseResult::Message(message) => {
                trace!(
                    event = "notify_delivery",
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset
                );
                let delivery = Delivery {
                    app_key: self.manager.api().app_key().to_string(),
                    message,
                    received_at: SystemTime::now(),
                    session: self.session.clone(),
                };
                // A closed queue is noticed by the select in `read_epoch`.
                let _ = self.deliveries.send(delivery);
            }
            ResponseResult::Error(error) => warn!(
                event = "notify_server_error",
                command = %response.command,
                request_id = response.request_id.as_deref().unwrap_or(""),
                code = %error.code,
                message = %error.message
            ),
            ResponseResult::Other(_) => trace!(
                event = "notify_response_ignored",
                command = %response.command,
                request_id = response.request_id.as_deref().unwrap_or("")
            ),
        }
    }

    /// Waits for the next epoch and re-subscribes on it. Gives up once the
    /// queue is dropped.
    async fn resume(&self, mut epoch: u64) -> Option<Arc<Link>> {
        loop {
            let link = tokio::select! {
                biased;
                _ = self.deliveries.closed() => {
                    info!(event = "notify_queue_dropped", topic = %self.topic);
                    return None;
                }
                link = self.manager.next_link_after(epoch) => link?,
            };
            if self.deliveries.is_closed() {
                return None;
            }
            match self.manager.send(&link, &Command::subscribe(self.topic.as_str())).await {
                Ok(()) => {
                    info!(event = "notify_resubscribed", topic = %self.topic, epoch = link.epoch());
                    return Some(link);
                }
                Err(NotifyError::Codec(err)) => {
                    warn!(event = "notify_resubscribe_encode_failed", topic = %self.topic, error = %err);
                    return None;
                }
                Err(err) => {
                    warn!(event = "notify_resubscribe_failed", topic = %self.topic, error = %err);
                    epoch = link.epoch();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use secrecy::SecretString;
    use tokio::time::Instant;

    use super::NotifySession;
    use crate::api::ApiClient;
    use crate::notify::codec::Codec;
    use crate::notify::connection::{ConnectionState, NotifyOptions};
    use crate::notify::error::NotifyError;
    use crate::notify::proto::{AckBody, Command, CommandBody, MsgData, Response};
    use crate::notify::transport::mock::{DialPlan, MockConnection, MockDialer};
    use crate::sign::verify;

    const APP_KEY: &str = "4234";
    const SECRET: &str = "4242342423434";

    fn api() -> ApiClient {
        ApiClient::new(
            "http://api.teegon.com/router",
            APP_KEY,
            SecretString::from(SECRET.to_string()),
        )
        .expect("api client")
    }

    fn options() -> NotifyOptions {
        NotifyOptions {
            heartbeat_interval: Duration::from_secs(3600),
            reconnect_interval: Duration::from_secs(30),
            close_timeout: Duration::from_secs(1),
        }
    }

    fn codec() -> Codec {
        Codec::new(APP_KEY, SecretString::from(SECRET.to_string()))
    }

    async fn connect(dialer: &Arc<MockDialer>, options: NotifyOptions) -> NotifySession {
        NotifySession::connect_with(api(), dialer.clone(), options)
            .await
            .expect("connect")
    }

    async fn next_command(connection: &MockConnection) -> Command {
        let frame = connection.next_sent().await.expect("frame written");
        codec().open(frame.as_bytes()).expect("valid envelope")
    }

    fn assert_signed_upgrade(connection: &MockConnection) {
        let url = &connection.request.url;
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let signature = pairs
            .iter()
            .find(|(key, _)| key == "sign")
            .map(|(_, value)| value.clone())
            .expect("signed upgrade");
        assert!(pairs
            .iter()
            .any(|(key, value)| key == "method" && value == "platform/notify"));
        assert!(verify(&pairs, SECRET, &signature).expect("verify"));
    }

    fn message(offset: i64) -> MsgData {
        MsgData {
            group: "g1".to_string(),
            topic: "sendmsg".to_string(),
            partition: 3,
            offset,
            key: Some("k".to_string()),
            data: Some("hello".to_string()),
        }
    }

    fn notification(offset: i64) -> String {
        Response::notification(message(offset))
            .to_text()
            .expect("encode notification")
    }

    #[tokio::test(start_paused = true)]
    async fn second_subscribe_conflicts_without_writing() {
        let dialer = MockDialer::accepting();
        let session = connect(&dialer, options()).await;
        let connection = dialer.connection(0).await;

        let _queue = session.subscribe("sendmsg").await.expect("subscribe");
        assert_eq!(next_command(&connection).await, Command::subscribe("sendmsg"));

        let err = session.subscribe("other").await.expect_err("conflict");
        assert!(matches!(err, NotifyError::AlreadySubscribed { ref topic } if topic == "sendmsg"));
        assert!(connection.try_next_sent().is_none());
        assert_eq!(session.subscribed_topic().as_deref(), Some("sendmsg"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_topic_is_rejected_without_io() {
        let dialer = MockDialer::accepting();
        let session = connect(&dialer, options()).await;
        let connection = dialer.connection(0).await;

        assert!(matches!(
            session.subscribe("").await,
            Err(NotifyError::Configuration(_))
        ));
        assert!(matches!(
            session.publish("", "k", "v").await,
            Err(NotifyError::Configuration(_))
        ));
        assert_eq!(connection.sent_count(), 0);
        assert!(session.subscribed_topic().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_rejects_zero_intervals() {
        let dialer = MockDialer::accepting();
        let err = NotifySession::connect_with(
            api(),
            dialer.clone(),
            NotifyOptions {
                heartbeat_interval: Duration::ZERO,
                ..options()
            },
        )
        .await
        .expect_err("zero heartbeat");
        assert!(matches!(err, NotifyError::Configuration(_)));
        assert!(dialer.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_fails_when_first_dial_fails() {
        let dialer = MockDialer::new([], DialPlan::Refuse);
        let err = NotifySession::connect_with(api(), dialer.clone(), options())
            .await
            .expect_err("refused");
        assert!(err.is_transport());

        tokio::time::sleep(options().reconnect_interval * 3).await;
        assert_eq!(dialer.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledge_mirrors_delivery() {
        let dialer = MockDialer::accepting();
        let session = connect(&dialer, options()).await;
        let connection = dialer.connection(0).await;

        let mut queue = session.subscribe("sendmsg").await.expect("subscribe");
        next_command(&connection).await;

        connection.push_frame(notification(77));
        let delivery = queue.recv().await.expect("delivery");
        assert_eq!(delivery.app_key, APP_KEY);
        assert_eq!(delivery.message, message(77));

        delivery.ack().await.expect("ack");
        let ack = next_command(&connection).await;
        assert!(ack.request_id.is_some());
        assert_eq!(
            ack.body,
            CommandBody::Acknowledge(AckBody {
                group: "g1".to_string(),
                topic: "sendmsg".to_string(),
                msg_id: 77,
                partition: 3,
            })
        );

        session.acknowledge(&delivery).await.expect("second ack");
        let again = next_command(&connection).await;
        assert_eq!(again.body, ack.body);
        assert_ne!(again.request_id, ack.request_id);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_resubscribes_on_same_queue() {
        let dialer = MockDialer::accepting();
        let session = connect(&dialer, options()).await;
        let first = dialer.connection(0).await;

        let mut queue = session.subscribe("sendmsg").await.expect("subscribe");
        next_command(&first).await;
        first.push_frame(notification(1));
        assert_eq!(queue.recv().await.expect("first delivery").message.offset, 1);

        first.fail_read();
        let second = dialer.connection(1).await;
        assert_eq!(next_command(&second).await, Command::subscribe("sendmsg"));
        assert_signed_upgrade(&first);
        assert_signed_upgrade(&second);

        let attempts = dialer.attempts();
        assert_eq!(
            attempts[1].duration_since(attempts[0]),
            options().reconnect_interval
        );

        second.push_frame(notification(2));
        assert_eq!(queue.recv().await.expect("resumed delivery").message.offset, 2);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.subscribed_topic().as_deref(), Some("sendmsg"));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_redials_repeat_at_fixed_interval() {
        let dialer = MockDialer::new([DialPlan::Accept], DialPlan::Refuse);
        let opts = options();
        let session = connect(&dialer, opts.clone()).await;
        let connection = dialer.connection(0).await;

        let _queue = session.subscribe("sendmsg").await.expect("subscribe");
        next_command(&connection).await;
        connection.fail_read();

        tokio::time::sleep(opts.reconnect_interval * 3 + Duration::from_secs(1)).await;
        let attempts = dialer.attempts();
        assert!(attempts.len() >= 4, "expected 3 redials, got {}", attempts.len() - 1);
        for pair in attempts[1..].windows(2) {
            assert_eq!(pair[1].duration_since(pair[0]), opts.reconnect_interval);
        }
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(matches!(
            session.publish("sendmsg", "k", "v").await,
            Err(NotifyError::NotConnected)
        ));

        session.close().await;
        let settled = dialer.attempts().len();
        tokio::time::sleep(opts.reconnect_interval * 2).await;
        assert_eq!(dialer.attempts().len(), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_sends_write_command() {
        let dialer = MockDialer::accepting();
        let session = connect(&dialer, options()).await;
        let connection = dialer.connection(0).await;

        session.publish("sendmsg", "order-1", "{\"id\":1}").await.expect("publish");
        let command = next_command(&connection).await;
        assert_eq!(command.name(), "write");
        assert_eq!(
            command,
            Command::publish(
                command.request_id.clone().expect("request id"),
                "sendmsg",
                "order-1",
                "{\"id\":1}"
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped() {
        let dialer = MockDialer::accepting();
        let session = connect(&dialer, options()).await;
        let connection = dialer.connection(0).await;

        let mut queue = session.subscribe("sendmsg").await.expect("subscribe");
        connection.push_frame("{not json");
        connection.push_frame(r#"{"Command":"write","RequestId":"9","Result":{}}"#);
        connection.push_frame(notification(5));

        assert_eq!(queue.recv().await.expect("delivery").message.offset, 5);
        assert!(queue.try_recv().is_none());
        assert_eq!(dialer.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_starts_one_interval_after_connect() {
        let dialer = MockDialer::accepting();
        let opts = NotifyOptions {
            heartbeat_interval: Duration::from_secs(8),
            ..options()
        };
        let started = Instant::now();
        let _session = connect(&dialer, opts).await;
        let connection = dialer.connection(0).await;

        let first = next_command(&connection).await;
        assert_eq!(first.name(), "heartbeat");
        assert!(first.request_id.is_some());
        assert_eq!(started.elapsed(), Duration::from_secs(8));

        let second = next_command(&connection).await;
        assert_eq!(second.name(), "heartbeat");
        assert_ne!(second.request_id, first.request_id);
        assert_eq!(started.elapsed(), Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_heartbeat_write_reconnects() {
        let dialer = MockDialer::new([DialPlan::AcceptBrokenWrites], DialPlan::Accept);
        let opts = NotifyOptions {
            heartbeat_interval: Duration::from_secs(8),
            ..options()
        };
        let session = connect(&dialer, opts.clone()).await;

        let second = dialer.connection(1).await;
        let attempts = dialer.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(
            attempts[1].duration_since(attempts[0]),
            opts.heartbeat_interval + opts.reconnect_interval
        );

        let mut state = session.watch_state();
        state
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .expect("state sender alive");

        let heartbeat = next_command(&second).await;
        assert_eq!(heartbeat.name(), "heartbeat");
        assert_eq!(attempts[1].elapsed(), opts.heartbeat_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_queue_during_outage_releases_topic() {
        let dialer = MockDialer::new([DialPlan::Accept], DialPlan::Refuse);
        let opts = options();
        let session = connect(&dialer, opts.clone()).await;
        let connection = dialer.connection(0).await;

        let queue = session.subscribe("sendmsg").await.expect("subscribe");
        next_command(&connection).await;
        connection.fail_read();
        drop(queue);

        for _ in 0..100 {
            if session.subscribed_topic().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(session.subscribed_topic().is_none());
        assert!(Instant::now().duration_since(dialer.attempts()[0]) < opts.reconnect_interval);
        assert_eq!(dialer.attempts().len(), 1);

        assert!(matches!(
            session.subscribe("other").await,
            Err(NotifyError::NotConnected)
        ));
        assert!(session.subscribed_topic().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_terminal() {
        let dialer = MockDialer::accepting();
        let session = connect(&dialer, options()).await;
        let mut queue = session.subscribe("sendmsg").await.expect("subscribe");

        session.close().await;
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(session.subscribed_topic().is_none());
        assert!(queue.recv().await.is_none());
        assert!(matches!(
            session.publish("sendmsg", "k", "v").await,
            Err(NotifyError::Closed)
        ));
        assert!(matches!(
            session.subscribe("sendmsg").await,
            Err(NotifyError::Closed)
        ));
        assert!(session.subscribed_topic().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_queue_releases_topic() {
        let dialer = MockDialer::accepting();
        let session = connect(&dialer, options()).await;
        let connection = dialer.connection(0).await;

        let queue = session.subscribe("sendmsg").await.expect("subscribe");
        next_command(&connection).await;
        drop(queue);

        while session.subscribed_topic().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut queue = session.subscribe("sendmsg").await.expect("resubscribe");
        next_command(&connection).await;
        connection.push_frame(notification(9));
        assert_eq!(queue.recv().await.expect("delivery").message.offset, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_after_session_drop_reports_gone() {
        let dialer = MockDialer::accepting();
        let session = connect(&dialer, options()).await;
        let connection = dialer.connection(0).await;

        let mut queue = session.subscribe("sendmsg").await.expect("subscribe");
        connection.push_frame(notification(4));
        let delivery = queue.recv().await.expect("delivery");

        drop(session);
        assert!(matches!(delivery.ack().await, Err(NotifyError::SessionGone)));
    }
}
