//! Dial seam for notify connections.
//!
//! A [`Dialer`] turns a signed upgrade request into a [`Transport`]: a frame
//! sink owned by the shared write path and a frame source owned by the read
//! loop. [`WebSocketDialer`] is the production implementation.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// Signed websocket upgrade request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// `ws`/`wss` URL including the signed query string.
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Waits for the next data frame. Control frames are handled internally.
    async fn next_frame(&mut self) -> Result<Vec<u8>, TransportError>;
}

pub struct Transport {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, request: UpgradeRequest) -> Result<Transport, TransportError>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("connection closed")]
    Closed,

    #[error("invalid upgrade request: {0}")]
    InvalidRequest(String),

    #[error("i/o error: {0}")]
    Io(String),
}

/// Dials notify servers over websocket.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketDialer;

impl WebSocketDialer {
    pub fn new() -> Self {
        Self
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, request: UpgradeRequest) -> Result<Transport, TransportError> {
        let mut ws_request = request.url.as_str().into_client_request()?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
            ws_request.headers_mut().insert(name, value);
        }

        let (socket, _) = connect_async(ws_request).await?;
        let (sink, stream) = socket.split();
        Ok(Transport {
            sink: Box::new(WebSocketSink { sink }),
            source: Box::new(WebSocketSource { stream }),
        })
    }
}

struct WebSocketSink {
    sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.sink.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await?;
        Ok(())
    }
}

struct WebSocketSource {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Err(err)) => return Err(TransportError::WebSocket(err)),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory dialer for session tests.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
    use tokio::time::Instant;

    use super::{Dialer, FrameSink, FrameSource, Transport, TransportError, UpgradeRequest};

    /// Test-side handle to one dialed connection.
    #[derive(Clone)]
    pub(crate) struct MockConnection {
        inbound: mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
        sent: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
        sent_count: Arc<Mutex<usize>>,
        pub(crate) request: UpgradeRequest,
    }

    impl MockConnection {
        pub(crate) fn push_frame(&self, frame: impl Into<Vec<u8>>) {
            let _ = self.inbound.send(Ok(frame.into()));
        }

        pub(crate) fn fail_read(&self) {
            let _ = self.inbound.send(Err(TransportError::Io("connection reset".to_string())));
        }

        /// Waits for the next frame the client wrote.
        pub(crate) async fn next_sent(&self) -> Option<String> {
            self.sent.lock().await.recv().await
        }

        /// Returns an already written frame without waiting.
        pub(crate) fn try_next_sent(&self) -> Option<String> {
            self.sent.try_lock().ok()?.try_recv().ok()
        }

        pub(crate) fn sent_count(&self) -> usize {
            *self.sent_count.lock().expect("count lock")
        }
    }

    struct MockSink {
        sent: mpsc::UnboundedSender<String>,
        sent_count: Arc<Mutex<usize>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl FrameSink for MockSink {
        async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
            if self.fail_writes {
                return Err(TransportError::Io("broken pipe".to_string()));
            }
            *self.sent_count.lock().expect("count lock") += 1;
            self.sent.send(frame).map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct MockSource {
        inbound: mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>,
    }

    #[async_trait]
    impl FrameSource for MockSource {
        async fn next_frame(&mut self) -> Result<Vec<u8>, TransportError> {
            match self.inbound.recv().await {
                Some(frame) => frame,
                None => Err(TransportError::Closed),
            }
        }
    }

    /// What the next dial attempt does.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub(crate) enum DialPlan {
        Accept,
        AcceptBrokenWrites,
        Refuse,
    }

    pub(crate) struct MockDialer {
        plan: Mutex<VecDeque<DialPlan>>,
        fallback: DialPlan,
        attempts: Mutex<Vec<Instant>>,
        connections: Mutex<Vec<MockConnection>>,
        dialed: watch::Sender<usize>,
    }

    impl MockDialer {
        pub(crate) fn new(plan: impl IntoIterator<Item = DialPlan>, fallback: DialPlan) -> Arc<Self> {
            Arc::new(Self {
                plan: Mutex::new(plan.into_iter().collect()),
                fallback,
                attempts: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
                dialed: watch::channel(0).0,
            })
        }

        pub(crate) fn accepting() -> Arc<Self> {
            Self::new([], DialPlan::Accept)
        }

        pub(crate) fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().expect("attempts lock").clone()
        }

        /// Waits for the connection accepted at `index`.
        pub(crate) async fn connection(&self, index: usize) -> MockConnection {
            let mut dialed = self.dialed.subscribe();
            dialed
                .wait_for(|count| *count > index)
                .await
                .expect("dialer alive");
            self.connections.lock().expect("connections lock")[index].clone()
        }
    }

    #[async_trait]
    impl Dialer for MockDialer {
        async fn dial(&self, request: UpgradeRequest) -> Result<Transport, TransportError> {
            self.attempts
                .lock()
                .expect("attempts lock")
                .push(Instant::now());
            let plan = self
                .plan
                .lock()
                .expect("plan lock")
                .pop_front()
                .unwrap_or(self.fallback);
            if plan == DialPlan::Refuse {
                return Err(TransportError::Io("connection refused".to_string()));
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let sent_count = Arc::new(Mutex::new(0));
            let connection = MockConnection {
                inbound: inbound_tx,
                sent: Arc::new(AsyncMutex::new(sent_rx)),
                sent_count: Arc::clone(&sent_count),
                request,
            };
            let count = {
                let mut connections = self.connections.lock().expect("connections lock");
                connections.push(connection);
                connections.len()
            };
            self.dialed.send_replace(count);

            Ok(Transport {
                sink: Box::new(MockSink {
                    sent: sent_tx,
                    sent_count,
                    fail_writes: plan == DialPlan::AcceptBrokenWrites,
                }),
                source: Box::new(MockSource {
                    inbound: inbound_rx,
                }),
            })
        }
    }
}
