//! Deterministic far end of the conversation stream.
//!
//! [`MockStreamServer`] listens on a loopback port and speaks both surfaces a
//! client uses: the WebSocket stream endpoint and the REST block listing. Each
//! stream connection plays a scripted sequence of frames, records the commands
//! it receives, and answers them with scripted replies. Tests drive reconnects
//! by asking the server to drop the live connection.

pub mod scripts;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use stream_protocol::{ClientCommand, ContentBlock, StreamEvent};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Session id the mock advertises. Any id is accepted on the wire.
pub const MOCK_SESSION_ID: &str = "mock-session";

const HEAD_PEEK_LIMIT: usize = 8 * 1024;
const HEAD_PEEK_INTERVAL: Duration = Duration::from_millis(5);

/// One step of a scripted connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Sends a raw text frame. Frames need not be valid events.
    Frame(String),
    Pause(Duration),
    /// Drops the connection without a close handshake.
    Disconnect,
}

impl ScriptStep {
    pub fn event(event: &StreamEvent) -> Self {
        Self::Frame(serde_json::to_string(event).unwrap_or_default())
    }

    pub fn json(value: Value) -> Self {
        Self::Frame(value.to_string())
    }

    pub fn pause_ms(millis: u64) -> Self {
        Self::Pause(Duration::from_millis(millis))
    }
}

type Reply = Arc<dyn Fn(&str) -> Vec<ScriptStep> + Send + Sync>;

/// Behaviour of a [`MockStreamServer`].
#[derive(Clone, Default)]
pub struct MockScript {
    connections: Vec<Vec<ScriptStep>>,
    reply: Option<Reply>,
    cancel_reply: Vec<ScriptStep>,
    blocks: Vec<ContentBlock>,
    reject_stream: Option<u16>,
}

impl MockScript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps played when the next stream connection opens. The first call
    /// scripts the first connection, the second call the reconnect, and so on.
    #[must_use]
    pub fn on_connect(mut self, steps: Vec<ScriptStep>) -> Self {
        self.connections.push(steps);
        self
    }

    /// Steps played in answer to each `message` command.
    #[must_use]
    pub fn on_message<F>(mut self, reply: F) -> Self
    where
        F: Fn(&str) -> Vec<ScriptStep> + Send + Sync + 'static,
    {
        self.reply = Some(Arc::new(reply));
        self
    }

    /// Steps played in answer to `cancel`. Unsent steps of the current reply
    /// are discarded first.
    #[must_use]
    pub fn on_cancel(mut self, steps: Vec<ScriptStep>) -> Self {
        self.cancel_reply = steps;
        self
    }

    /// Blocks served by the REST listing.
    #[must_use]
    pub fn with_blocks(mut self, blocks: Vec<ContentBlock>) -> Self {
        self.blocks = blocks;
        self
    }

    /// Refuses every stream handshake with the given HTTP status.
    #[must_use]
    pub fn reject_stream(mut self, status: u16) -> Self {
        self.reject_stream = Some(status);
        self
    }
}

struct Shared {
    script: MockScript,
    commands: Mutex<Vec<ClientCommand>>,
    connections: AtomicUsize,
    block_requests: AtomicUsize,
    live: Mutex<Option<mpsc::UnboundedSender<ScriptStep>>>,
}

/// Loopback server playing a [`MockScript`].
pub struct MockStreamServer {
    base_url: String,
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl MockStreamServer {
    pub async fn start(script: MockScript) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let shared = Arc::new(Shared {
            script,
            commands: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            block_requests: AtomicUsize::new(0),
            live: Mutex::new(None),
        });

        let handle = tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(accepted) => accepted,
                        Err(error) => {
                            tracing::warn!(%error, "mock server accept failed");
                            continue;
                        }
                    };
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Err(error) = serve(socket, shared).await {
                            tracing::debug!(%error, "mock connection ended with error");
                        }
                    });
                }
            }
        });

        Ok(Self {
            base_url,
            shared,
            handle,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_id(&self) -> &str {
        MOCK_SESSION_ID
    }

    /// Queues a step on the live stream connection. Returns false when no
    /// connection is open.
    pub fn push(&self, step: ScriptStep) -> bool {
        lock_unpoisoned(&self.shared.live)
            .as_ref()
            .is_some_and(|live| live.send(step).is_ok())
    }

    pub fn push_event(&self, event: &StreamEvent) -> bool {
        self.push(ScriptStep::event(event))
    }

    /// Drops the live stream connection as if the network failed.
    pub fn disconnect(&self) -> bool {
        self.push(ScriptStep::Disconnect)
    }

    /// Commands received so far, across all connections.
    pub fn commands(&self) -> Vec<ClientCommand> {
        lock_unpoisoned(&self.shared.commands).clone()
    }

    /// Stream connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn block_requests(&self) -> usize {
        self.shared.block_requests.load(Ordering::SeqCst)
    }

    /// Polls until at least `count` commands arrived or `timeout` elapses.
    pub async fn wait_for_commands(&self, count: usize, timeout: Duration) -> Vec<ClientCommand> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let commands = self.commands();
            if commands.len() >= count || tokio::time::Instant::now() >= deadline {
                return commands;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Polls until `count` stream connections were accepted or `timeout` elapses.
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.connection_count() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

impl Drop for MockStreamServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(socket: TcpStream, shared: Arc<Shared>) -> io::Result<()> {
    let head = peek_request_head(&socket).await?;
    let target = request_target(&head).unwrap_or_default().to_string();
    let path = target.split('?').next().unwrap_or_default();

    if path.ends_with("/stream") {
        if let Some(status) = shared.script.reject_stream {
            return write_http(socket, status, &json!({"detail": "stream rejected"})).await;
        }
        return serve_stream(socket, shared).await;
    }

    shared.block_requests.fetch_add(1, Ordering::SeqCst);
    let (status, body) = blocks_response(&shared.script.blocks, &target);
    write_http(socket, status, &body).await
}

async fn serve_stream(socket: TcpStream, shared: Arc<Shared>) -> io::Result<()> {
    let websocket = tokio_tungstenite::accept_async(socket)
        .await
        .map_err(io::Error::other)?;
    let (mut writer, mut reader) = websocket.split();

    let (live_tx, mut live_rx) = mpsc::unbounded_channel();
    *lock_unpoisoned(&shared.live) = Some(live_tx.clone());
    let index = shared.connections.fetch_add(1, Ordering::SeqCst);
    for step in shared.script.connections.get(index).cloned().unwrap_or_default() {
        let _ = live_tx.send(step);
    }

    loop {
        tokio::select! {
            Some(step) = live_rx.recv() => match step {
                ScriptStep::Frame(text) => {
                    writer.send(Message::text(text)).await.map_err(io::Error::other)?;
                }
                ScriptStep::Pause(delay) => tokio::time::sleep(delay).await,
                ScriptStep::Disconnect => {
                    tracing::debug!(connection = index, "mock dropping stream connection");
                    return Ok(());
                }
            },
            message = reader.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let command = match serde_json::from_str::<ClientCommand>(text.as_str()) {
                        Ok(command) => command,
                        Err(error) => {
                            tracing::warn!(%error, "mock ignoring unparseable command");
                            continue;
                        }
                    };
                    lock_unpoisoned(&shared.commands).push(command.clone());

                    let replies = match &command {
                        ClientCommand::Message { content } => shared
                            .script
                            .reply
                            .as_ref()
                            .map(|reply| reply(content))
                            .unwrap_or_default(),
                        ClientCommand::Cancel => {
                            while live_rx.try_recv().is_ok() {}
                            shared.script.cancel_reply.clone()
                        }
                    };
                    for step in replies {
                        let _ = live_tx.send(step);
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Err(error)) => return Err(io::Error::other(error)),
                Some(Ok(_)) => {}
            },
        }
    }
}

fn blocks_response(blocks: &[ContentBlock], target: &str) -> (u16, Value) {
    let path = target.split('?').next().unwrap_or_default();
    let query = target.split_once('?').map(|(_, query)| query).unwrap_or_default();

    if path.ends_with("/blocks") {
        let skip = query_usize(query, "skip").unwrap_or(0);
        let limit = query_usize(query, "limit").unwrap_or(500);
        let page: Vec<&ContentBlock> = blocks.iter().skip(skip).take(limit).collect();
        return (200, json!({"blocks": page, "total": blocks.len()}));
    }

    let block_id = path.rsplit('/').next().unwrap_or_default();
    match blocks.iter().find(|block| block.id == block_id) {
        Some(block) => (200, json!(block)),
        None => (
            404,
            json!({"detail": format!("Content block {block_id} not found")}),
        ),
    }
}

fn query_usize(query: &str, key: &str) -> Option<usize> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == key)
        .and_then(|(_, value)| value.parse().ok())
}

async fn write_http(mut socket: TcpStream, status: u16, body: &Value) -> io::Result<()> {
    let body = body.to_string();
    let reason = match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

/// Reads the request head without consuming it, so the WebSocket handshake
/// can still parse it.
async fn peek_request_head(socket: &TcpStream) -> io::Result<String> {
    let mut buffer = vec![0_u8; HEAD_PEEK_LIMIT];
    loop {
        let read = socket.peek(&mut buffer).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before request",
            ));
        }
        let head = &buffer[..read];
        if head.windows(4).any(|window| window == b"\r\n\r\n") || read == buffer.len() {
            return Ok(String::from_utf8_lossy(head).into_owned());
        }
        tokio::time::sleep(HEAD_PEEK_INTERVAL).await;
    }
}

fn request_target(head: &str) -> Option<&str> {
    head.lines().next()?.split_whitespace().nth(1)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
