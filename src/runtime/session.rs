//! Session lifecycle: owns the transport, the batcher, the engine and the
//! viewport policy, and drives events through them in arrival order.

use std::time::Instant;

use stream_protocol::{ClientCommand, ContentBlock, StreamEvent};
use stream_transport::{BlocksClient, ConnectionState, Transport, TransportEvent};
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};

use crate::batcher::{EventBatcher, PushHint};
use crate::config::SessionConfig;
use crate::engine::{BatchSummary, BlockChange, BlockPreview, ConversationEngine, TurnOutcome};
use crate::error::SessionError;
use crate::runtime::viewport::{ScrollAttribution, ScrollRequest, ViewportPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Started,
    TornDown,
}

/// Connection change reported alongside an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    Lost(String),
    Reconnected,
    /// Terminal; only [`Session::reconnect`] leaves this state.
    GaveUp {
        attempts: u32,
        last_error: Option<String>,
    },
}

/// What one flush did.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub batch: BatchSummary,
    pub changes: Vec<BlockChange>,
    pub scroll: Option<ScrollRequest>,
    pub signal: Option<ConnectionSignal>,
    pub connection: ConnectionState,
}

/// Read-only snapshot for rendering.
#[derive(Debug)]
pub struct SessionView<'a> {
    pub blocks: Vec<&'a ContentBlock>,
    pub previews: Vec<BlockPreview>,
    pub thought: Option<&'a str>,
    pub outcome: &'a TurnOutcome,
    pub error: Option<&'a str>,
    pub connection: ConnectionState,
    pub connection_error: Option<&'a str>,
    pub title: Option<&'a str>,
    pub cancel_pending: bool,
    pub auto_follow: bool,
}

enum Wake {
    Inbound(Option<TransportEvent>),
    Tick,
}

/// One logical conversation stream.
pub struct Session {
    config: SessionConfig,
    transport: Transport,
    engine: ConversationEngine,
    viewport: ViewportPolicy,
    batcher: EventBatcher,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    inbound_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ticker: Option<Interval>,
    lifecycle: Lifecycle,
    events_received: u64,
    title: Option<String>,
    cancel_pending: bool,
    connection_error: Option<String>,
}

impl Session {
    pub fn init(config: SessionConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            transport: Transport::new(config.transport.clone()),
            viewport: ViewportPolicy::new(config.scroll_settle_timeout),
            engine: ConversationEngine::new(),
            batcher: EventBatcher::new(),
            inbound_tx,
            inbound_rx,
            ticker: None,
            lifecycle: Lifecycle::Idle,
            events_received: 0,
            title: None,
            cancel_pending: false,
            connection_error: None,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens the stream connection.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Started => return Err(SessionError::AlreadyStarted),
            Lifecycle::TornDown => return Err(SessionError::TornDown),
        }
        self.transport.connect(self.inbound_tx.clone())?;
        self.lifecycle = Lifecycle::Started;
        tracing::info!(session = %self.config.transport.session_id, "session started");
        Ok(())
    }

    /// Restarts the connection after the transport gave up, with a fresh
    /// attempt budget.
    pub fn reconnect(&mut self) -> Result<(), SessionError> {
        self.ensure_live()?;
        self.transport.connect(self.inbound_tx.clone())?;
        self.lifecycle = Lifecycle::Started;
        self.connection_error = None;
        tracing::info!(session = %self.config.transport.session_id, "manual reconnect");
        Ok(())
    }

    /// Closes the connection and destroys all in-progress state.
    /// Materialized blocks stay readable.
    pub async fn teardown(&mut self) {
        if self.lifecycle == Lifecycle::TornDown {
            return;
        }
        self.transport.close().await;
        let pending = self.batcher.clear();
        let open = self.engine.teardown();
        self.ticker = None;
        self.lifecycle = Lifecycle::TornDown;
        tracing::info!(pending, open, "session torn down");
    }

    pub fn send_message(&mut self, content: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        self.transport.send(&ClientCommand::message(content))?;
        self.engine.begin_turn();
        self.cancel_pending = false;
        Ok(())
    }

    /// Stops the active run. Open blocks close locally before any queued
    /// event is applied; the cancel command goes out once and is not
    /// retried. Returns false when a cancel is already pending. A failed
    /// send leaves no cancel pending.
    pub fn cancel(&mut self) -> Result<bool, SessionError> {
        self.ensure_live()?;
        if self.cancel_pending {
            return Ok(false);
        }
        if self.engine.cancel_open().is_changed() {
            self.viewport.note_content_changed();
        }
        self.transport.send(&ClientCommand::Cancel)?;
        self.cancel_pending = true;
        Ok(true)
    }

    /// Waits for the next flush. Returns `None` once torn down.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            if self.lifecycle == Lifecycle::TornDown {
                return None;
            }

            let wake = {
                let flush_interval = self.config.flush_interval;
                let ticker = self.ticker.get_or_insert_with(|| {
                    let mut ticker = tokio::time::interval(flush_interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker
                });
                tokio::select! {
                    received = self.inbound_rx.recv() => Wake::Inbound(received),
                    _ = ticker.tick() => Wake::Tick,
                }
            };

            match wake {
                Wake::Inbound(None) => return None,
                Wake::Inbound(Some(TransportEvent::Event(event))) => {
                    self.events_received += 1;
                    if self.batcher.push(event) == PushHint::FlushNow {
                        return Some(self.flush(Instant::now(), None));
                    }
                }
                Wake::Inbound(Some(other)) => {
                    let signal = self.note_signal(other);
                    return Some(self.flush(Instant::now(), signal));
                }
                Wake::Tick => {
                    if !self.batcher.is_empty() {
                        return Some(self.flush(Instant::now(), None));
                    }
                }
            }
        }
    }

    /// Applies events as one flush, bypassing the transport and timer.
    pub fn apply_batch(&mut self, events: Vec<StreamEvent>, now: Instant) -> SessionUpdate {
        self.events_received += events.len() as u64;
        self.apply_events(&events, now, None)
    }

    /// Fetches the persisted blocks over REST and merges them.
    pub async fn load_history(&mut self, client: &BlocksClient) -> Result<SessionUpdate, SessionError> {
        self.ensure_live()?;
        let blocks = client.list_blocks().await?;
        Ok(self.apply_snapshot(blocks, Instant::now()))
    }

    pub fn apply_snapshot(&mut self, blocks: Vec<ContentBlock>, now: Instant) -> SessionUpdate {
        let count = blocks.len();
        let applied = self.engine.apply_snapshot(blocks);
        let batch = BatchSummary {
            applied: count,
            changed: usize::from(applied.is_changed()),
            dropped: 0,
        };
        self.finish(batch, now, None)
    }

    /// REST client for this session's blocks.
    pub fn blocks_client(&self) -> Result<BlocksClient, SessionError> {
        Ok(BlocksClient::new(self.config.transport.clone())?)
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            blocks: self.engine.blocks().collect(),
            previews: self.engine.previews(),
            thought: self.engine.thought(),
            outcome: self.engine.outcome(),
            error: self.engine.error(),
            connection: self.transport.state(),
            connection_error: self.connection_error.as_deref(),
            title: self.title.as_deref(),
            cancel_pending: self.cancel_pending,
            auto_follow: self.viewport.auto_follow_enabled(),
        }
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    pub fn viewport(&self) -> &ViewportPolicy {
        &self.viewport
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.transport.subscribe_state()
    }

    /// Inbound events received since init.
    pub fn events_received(&self) -> u64 {
        self.events_received
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn cancel_pending(&self) -> bool {
        self.cancel_pending
    }

    pub fn set_auto_follow(&mut self, enabled: bool) {
        self.viewport.set_auto_follow(enabled);
    }

    pub fn update_viewport(&mut self, total_lines: usize, viewport_height: usize) {
        self.viewport.update_geometry(total_lines, viewport_height);
    }

    pub fn on_scroll_event(&mut self, now: Instant, offset_from_tail: usize) -> ScrollAttribution {
        self.viewport.on_scroll_event(now, offset_from_tail)
    }

    pub fn on_scroll_settled(&mut self, request_id: u64) -> bool {
        self.viewport.on_scroll_settled(request_id)
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.lifecycle == Lifecycle::TornDown {
            Err(SessionError::TornDown)
        } else {
            Ok(())
        }
    }

    fn flush(&mut self, now: Instant, signal: Option<ConnectionSignal>) -> SessionUpdate {
        let events = self.batcher.take_batch().unwrap_or_default();
        self.apply_events(&events, now, signal)
    }

    fn apply_events(
        &mut self,
        events: &[StreamEvent],
        now: Instant,
        signal: Option<ConnectionSignal>,
    ) -> SessionUpdate {
        for event in events {
            self.observe(event);
        }
        let batch = self.engine.apply_all(events);
        self.finish(batch, now, signal)
    }

    fn finish(
        &mut self,
        batch: BatchSummary,
        now: Instant,
        signal: Option<ConnectionSignal>,
    ) -> SessionUpdate {
        let changes = self.engine.take_changes();
        if batch.changed > 0 || !changes.is_empty() {
            self.viewport.note_content_changed();
        }
        SessionUpdate {
            batch,
            changes,
            scroll: self.viewport.finish_flush(now),
            signal,
            connection: self.transport.state(),
        }
    }

    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::CancelAcknowledged | StreamEvent::Cancelled { .. } => {
                self.cancel_pending = false;
            }
            StreamEvent::TitleUpdated { title, .. } => {
                self.title = Some(title.clone());
            }
            StreamEvent::Error { content } => {
                tracing::warn!(message = %content, "server reported a session error");
            }
            _ => {}
        }
    }

    fn note_signal(&mut self, event: TransportEvent) -> Option<ConnectionSignal> {
        match event {
            TransportEvent::Event(_) => None,
            TransportEvent::ConnectionLost { reason } => Some(ConnectionSignal::Lost(reason)),
            TransportEvent::Reconnected => {
                self.connection_error = None;
                Some(ConnectionSignal::Reconnected)
            }
            TransportEvent::GaveUp {
                attempts,
                last_error,
            } => {
                tracing::warn!(attempts, ?last_error, "stream connection abandoned");
                self.connection_error = Some(
                    last_error
                        .clone()
                        .unwrap_or_else(|| "connection lost".to_string()),
                );
                Some(ConnectionSignal::GaveUp {
                    attempts,
                    last_error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use stream_protocol::StreamEvent;

    use super::Session;
    use crate::config::SessionConfig;
    use crate::error::SessionError;

    fn session() -> Session {
        Session::init(SessionConfig::new("http://127.0.0.1:1", "s-1"))
    }

    #[test]
    fn title_and_cancel_ack_are_session_level() {
        let mut session = session();
        let update = session.apply_batch(
            vec![
                StreamEvent::TitleUpdated {
                    session_id: Some("s-1".to_string()),
                    title: "Listing files".to_string(),
                },
                StreamEvent::CancelAcknowledged,
            ],
            Instant::now(),
        );

        assert_eq!(session.title(), Some("Listing files"));
        assert!(!session.cancel_pending());
        assert_eq!(update.batch.changed, 0);
        assert!(update.scroll.is_none());
        assert_eq!(session.events_received(), 2);
    }

    #[test]
    fn commands_fail_fast_while_disconnected() {
        let mut session = session();
        let error = session.send_message("hello").expect_err("not connected");
        assert!(error.is_not_connected());
    }

    #[test]
    fn failed_cancel_send_leaves_nothing_pending() {
        let mut session = session();
        session.apply_batch(
            vec![
                StreamEvent::AssistantTextStart {
                    block_id: Some("a".to_string()),
                    sequence_number: Some(1),
                },
                StreamEvent::Chunk {
                    content: "partial".to_string(),
                    block_id: Some("a".to_string()),
                },
            ],
            Instant::now(),
        );

        let error = session.cancel().expect_err("not connected");
        assert!(error.is_not_connected());
        assert!(!session.cancel_pending());
        assert_eq!(session.engine().open_count(), 0);

        let again = session.cancel().expect_err("still not connected");
        assert!(again.is_not_connected());
        assert!(!session.cancel_pending());
    }

    #[tokio::test]
    async fn torn_down_session_rejects_everything() {
        let mut session = session();
        session.teardown().await;

        assert!(matches!(session.start(), Err(SessionError::TornDown)));
        assert!(matches!(session.cancel(), Err(SessionError::TornDown)));
        assert!(session.next_update().await.is_none());
    }
}
