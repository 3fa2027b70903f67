use std::collections::HashMap;

use chat_stream::engine::is_local_id;
use chat_stream::protocol::{BlockContent, BlockType, ContentBlock};
use chat_stream::{ConnectionSignal, SessionView, TurnOutcome};

use crate::commands::{parse_slash_command, SlashCommand};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Idle,
    Streaming,
    Exiting,
}

/// What the console needs from a live session.
pub trait HostOps {
    fn send_message(&mut self, content: &str) -> Result<(), String>;
    /// Returns false when a cancel is already pending.
    fn cancel(&mut self) -> Result<bool, String>;
    fn follow_enabled(&self) -> bool;
    fn set_follow(&mut self, enabled: bool);
    fn reconnect(&mut self) -> Result<(), String>;
    fn request_history(&mut self);
    fn request_stop(&mut self);
}

pub const HELP_TEXT: &str =
    "Commands: /cancel, /follow [on|off], /reconnect, /history, /help, /quit. Any other line is sent as a message.";
const RESULT_PREVIEW_CHARS: usize = 160;

/// Line-oriented transcript state. Each materialized block is printed when it
/// first appears and again whenever its rendering changes.
#[derive(Debug, Default)]
pub struct App {
    pub mode: Mode,
    printed: HashMap<String, String>,
    output: Vec<String>,
    title: Option<String>,
    last_error: Option<String>,
    pub should_exit: bool,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the lines queued for printing.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn on_submit<H: HostOps>(&mut self, line: &str, host: &mut H) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let Some(command) = parse_slash_command(line) else {
            match host.send_message(line) {
                Ok(()) => self.mode = Mode::Streaming,
                Err(error) => self.notice(format!("not sent: {error}")),
            }
            return;
        };

        match command {
            SlashCommand::Help => self.notice(HELP_TEXT),
            SlashCommand::Cancel => match host.cancel() {
                Ok(true) => self.notice("cancelling"),
                Ok(false) => self.notice("cancel already pending"),
                Err(error) => self.notice(format!("cancel failed: {error}")),
            },
            SlashCommand::Follow(switch) => {
                let enabled = switch.unwrap_or(!host.follow_enabled());
                host.set_follow(enabled);
                self.notice(if enabled { "follow on" } else { "follow off" });
            }
            SlashCommand::Reconnect => match host.reconnect() {
                Ok(()) => self.notice("reconnecting"),
                Err(error) => self.notice(format!("reconnect failed: {error}")),
            },
            SlashCommand::History => host.request_history(),
            SlashCommand::Quit => {
                self.mode = Mode::Exiting;
                self.should_exit = true;
                host.request_stop();
            }
            SlashCommand::Unknown(command) => {
                self.notice(format!("unknown command {command}; try /help"));
            }
        }
    }

    /// Folds one session flush into printable lines.
    pub fn on_update(&mut self, view: &SessionView<'_>, signal: Option<&ConnectionSignal>) {
        if let Some(signal) = signal {
            self.notice(describe_signal(signal));
        }

        let settled = !matches!(view.outcome, TurnOutcome::Streaming);
        for block in &view.blocks {
            // Local reconstructions usually get replaced by the persisted
            // block within the same turn.
            if is_local_id(&block.id) && !settled {
                continue;
            }
            let rendered = render_block(block);
            if self.printed.get(&block.id) != Some(&rendered) {
                self.output.push(rendered.clone());
                self.printed.insert(block.id.clone(), rendered);
            }
        }

        if view.title != self.title.as_deref() {
            self.title = view.title.map(str::to_string);
            if let Some(title) = &self.title {
                self.output.push(format!("== {title} =="));
            }
        }

        if view.error != self.last_error.as_deref() {
            self.last_error = view.error.map(str::to_string);
            if let Some(error) = &self.last_error {
                self.output.push(format!("! {error}"));
            }
        }

        if self.mode == Mode::Streaming && settled && view.previews.is_empty() {
            self.mode = Mode::Idle;
        }
    }

    fn notice(&mut self, text: impl Into<String>) {
        self.output.push(format!("* {}", text.into()));
    }
}

pub fn describe_signal(signal: &ConnectionSignal) -> String {
    match signal {
        ConnectionSignal::Lost(reason) => format!("connection lost ({reason}); reconnecting"),
        ConnectionSignal::Reconnected => "reconnected".to_string(),
        ConnectionSignal::GaveUp {
            attempts,
            last_error,
        } => match last_error {
            Some(error) => format!("gave up after {attempts} attempts: {error}; /reconnect to retry"),
            None => format!("gave up after {attempts} attempts; /reconnect to retry"),
        },
    }
}

pub fn render_block(block: &ContentBlock) -> String {
    match &block.content {
        BlockContent::Text(text) => {
            let speaker = match block.block_type {
                BlockType::UserText => "you",
                BlockType::System => "system",
                _ => "assistant",
            };
            let mut line = format!("{speaker}> {}", text.text);
            if block.metadata.get("cancelled").and_then(|value| value.as_bool()) == Some(true) {
                line.push_str(" [cancelled]");
            }
            if block.metadata.get("error").and_then(|value| value.as_bool()) == Some(true) {
                line.push_str(" [error]");
            }
            line
        }
        BlockContent::ToolCall(call) => {
            format!("tool> {}({}) [{}]", call.tool_name, call.arguments, call.status.as_str())
        }
        BlockContent::ToolResult(result) => {
            let marker = if result.success { "ok" } else { "failed" };
            let body = if result.is_binary {
                let kind = result.binary_type.as_deref().unwrap_or("data");
                match result.decode_binary() {
                    Some(Ok(bytes)) => format!("<{kind}, {} bytes>", bytes.len()),
                    _ => format!("<{kind}, undecodable>"),
                }
            } else {
                let text = result
                    .error
                    .as_deref()
                    .or(result.result.as_deref())
                    .unwrap_or_default();
                truncate(text, RESULT_PREVIEW_CHARS)
            };
            format!("result> {} {marker}: {body}", result.tool_name)
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flattened = text.replace('\n', " | ");
    match flattened.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flattened[..cut]),
        None => flattened,
    }
}
