use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use stream_protocol::{ClientCommand, StreamEvent};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::frame::FrameDecoder;
use crate::retry::{is_retryable_connect_error, reconnect_delay};
use crate::url::stream_url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of the stream socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Everything the transport reports to its consumer, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded inbound event.
    Event(StreamEvent),
    /// The socket dropped unexpectedly; a reconnect is being attempted.
    ConnectionLost { reason: String },
    /// A replacement connection is open. The server resends state for any
    /// in-progress block.
    Reconnected,
    /// Reconnect attempts are exhausted or the server rejected the session.
    GaveUp {
        attempts: u32,
        last_error: Option<String>,
    },
}

/// The session's single WebSocket connection.
///
/// Inbound events are delivered on the sink passed to [`Transport::connect`].
/// Outbound commands are queued on an unbounded channel and written by the
/// connection task, so [`Transport::send`] never blocks.
pub struct Transport {
    config: TransportConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state: Arc::new(state),
            outbound: Arc::new(Mutex::new(None)),
            shutdown: None,
            task: None,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Opens the connection and keeps it open until [`Transport::close`].
    ///
    /// Also used to start over after the transport gave up; the attempt
    /// counter starts from zero again.
    pub fn connect(&mut self, sink: mpsc::UnboundedSender<TransportEvent>) -> Result<(), TransportError> {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(TransportError::AlreadyRunning);
        }
        let url = stream_url(&self.config.base_url, &self.config.session_id)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);
        let task = ConnectionTask {
            url,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            outbound: Arc::clone(&self.outbound),
            sink,
            shutdown: shutdown_rx,
        };
        self.task = Some(tokio::spawn(task.run()));
        Ok(())
    }

    /// Queues a command for the server.
    pub fn send(&self, command: &ClientCommand) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let text = command.to_json()?;
        let outbound = lock_unpoisoned(&self.outbound);
        let sender = outbound.as_ref().ok_or(TransportError::NotConnected)?;
        sender.send(text).map_err(|_| TransportError::NotConnected)
    }

    /// Closes the socket and stops reconnecting. Idempotent.
    pub async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::warn!(%error, "stream connection task ended abnormally");
            }
        }
        lock_unpoisoned(&self.outbound).take();
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ConnectionTask {
    url: Url,
    config: TransportConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    sink: mpsc::UnboundedSender<TransportEvent>,
    shutdown: watch::Receiver<bool>,
}

enum PumpExit {
    Shutdown,
    SinkClosed,
    Lost(String),
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut decoder = FrameDecoder::default();
        let mut attempt: u32 = 0;
        let mut connected_before = false;

        loop {
            self.state.send_replace(if attempt == 0 && !connected_before {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            let handshake =
                tokio::time::timeout(self.config.handshake_timeout, connect_async(self.url.as_str()));
            let result = tokio::select! {
                _ = self.shutdown.changed() => break,
                result = handshake => result,
            };

            let failure = match result {
                Ok(Ok((socket, _response))) => {
                    attempt = 0;
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    *lock_unpoisoned(&self.outbound) = Some(outbound_tx);
                    self.state.send_replace(ConnectionState::Connected);
                    tracing::debug!(url = %self.url, "stream connected");

                    if connected_before && self.sink.send(TransportEvent::Reconnected).is_err() {
                        break;
                    }
                    connected_before = true;

                    let exit = self.pump(socket, outbound_rx, &mut decoder).await;
                    lock_unpoisoned(&self.outbound).take();
                    match exit {
                        PumpExit::Shutdown | PumpExit::SinkClosed => break,
                        PumpExit::Lost(reason) => {
                            tracing::warn!(%reason, "stream connection lost");
                            let lost = TransportEvent::ConnectionLost {
                                reason: reason.clone(),
                            };
                            if self.sink.send(lost).is_err() {
                                break;
                            }
                            reason
                        }
                    }
                }
                Ok(Err(error)) => {
                    let error = TransportError::from(error);
                    let message = error.to_string();
                    if !is_retryable_connect_error(error.status(), &message) {
                        tracing::warn!(%message, "stream handshake rejected");
                        self.give_up(attempt + 1, Some(message));
                        return;
                    }
                    tracing::warn!(%message, attempt, "stream handshake failed");
                    message
                }
                Err(_) => {
                    TransportError::HandshakeTimeout(self.config.handshake_timeout).to_string()
                }
            };

            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                self.give_up(attempt, Some(failure));
                return;
            }

            self.state.send_replace(ConnectionState::Reconnecting);
            let delay = reconnect_delay(
                self.config.reconnect_base_delay,
                attempt,
                self.config.max_reconnect_delay,
            );
            tracing::info!(attempt, ?delay, "reconnecting stream");
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn pump(
        &mut self,
        socket: Socket,
        mut outbound: mpsc::UnboundedReceiver<String>,
        decoder: &mut FrameDecoder,
    ) -> PumpExit {
        let (mut writer, mut reader) = socket.split();

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if let Err(error) = writer.send(Message::Close(None)).await {
                        tracing::debug!(%error, "close frame not delivered");
                    }
                    return PumpExit::Shutdown;
                }
                Some(text) = outbound.recv() => {
                    if let Err(error) = writer.send(Message::text(text)).await {
                        return PumpExit::Lost(format!("send failed: {error}"));
                    }
                }
                message = reader.next() => match message {
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|frame| format!("server closed the stream ({})", frame.code))
                            .unwrap_or_else(|| "server closed the stream".to_string());
                        return PumpExit::Lost(reason);
                    }
                    Some(Ok(message)) => {
                        if let Some(event) = decoder.decode(&message) {
                            if self.sink.send(TransportEvent::Event(event)).is_err() {
                                return PumpExit::SinkClosed;
                            }
                        }
                    }
                    Some(Err(error)) => return PumpExit::Lost(error.to_string()),
                    None => return PumpExit::Lost("stream ended".to_string()),
                },
            }
        }
    }

    fn give_up(&self, attempts: u32, last_error: Option<String>) {
        tracing::error!(attempts, ?last_error, "giving up on stream connection");
        self.state.send_replace(ConnectionState::Disconnected);
        let _ = self.sink.send(TransportEvent::GaveUp {
            attempts,
            last_error,
        });
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
