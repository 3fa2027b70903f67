//! Ready-made turns in the shape the server streams them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use stream_protocol::{BlockType, ContentBlock, StreamEvent, ToolStatus};

use crate::ScriptStep;

/// Persisted user message echo.
pub fn user_message(block_id: &str, sequence_number: u64, text: &str) -> Vec<ScriptStep> {
    vec![ScriptStep::event(&StreamEvent::UserTextBlock {
        block: ContentBlock::text(block_id, sequence_number, BlockType::UserText, text),
    })]
}

/// Assistant text block streamed as `chunks`, then closed.
pub fn assistant_text(block_id: &str, sequence_number: u64, chunks: &[&str]) -> Vec<ScriptStep> {
    let mut steps = vec![ScriptStep::event(&StreamEvent::AssistantTextStart {
        block_id: Some(block_id.to_string()),
        sequence_number: Some(sequence_number),
    })];
    steps.extend(chunks.iter().map(|chunk| {
        ScriptStep::event(&StreamEvent::Chunk {
            content: (*chunk).to_string(),
            block_id: Some(block_id.to_string()),
        })
    }));
    steps.push(ScriptStep::event(&StreamEvent::AssistantTextEnd {
        block_id: Some(block_id.to_string()),
        cancelled: false,
        has_error: false,
    }));
    steps
}

/// Full tool exchange: argument streaming in cumulative prefixes, the
/// completed call, its persisted block, then the observation and result block.
pub fn tool_exchange(
    tool: &str,
    arguments: Value,
    result: &str,
    call_id: &str,
    call_sequence: u64,
) -> Vec<ScriptStep> {
    let serialized = arguments.to_string();
    let mut steps = vec![ScriptStep::event(&StreamEvent::ActionStreaming {
        tool: tool.to_string(),
        status: Some("streaming".to_string()),
        step: 0,
    })];
    for prefix in prefixes(&serialized, 3) {
        steps.push(ScriptStep::event(&StreamEvent::ActionArgsChunk {
            tool: tool.to_string(),
            partial_args: prefix,
            step: 0,
        }));
    }
    steps.push(ScriptStep::event(&StreamEvent::Action {
        tool: tool.to_string(),
        args: arguments.clone(),
        step: 0,
    }));
    steps.push(ScriptStep::event(&StreamEvent::ToolCallBlock {
        block: ContentBlock::tool_call(
            call_id,
            call_sequence,
            tool,
            arguments,
            ToolStatus::Running,
        ),
    }));
    steps.push(ScriptStep::event(&StreamEvent::Observation {
        content: result.to_string(),
        success: true,
        metadata: Map::new(),
        tool: Some(tool.to_string()),
    }));
    steps.push(ScriptStep::event(&StreamEvent::ToolResultBlock {
        block: ContentBlock::tool_result(
            format!("{call_id}-result"),
            call_sequence + 1,
            tool,
            result,
            true,
        )
        .with_parent(call_id),
    }));
    steps
}

pub fn cancelled() -> Vec<ScriptStep> {
    vec![
        ScriptStep::event(&StreamEvent::CancelAcknowledged),
        ScriptStep::event(&StreamEvent::Cancelled {
            content: Some("Response cancelled by user".to_string()),
            partial_content: None,
        }),
    ]
}

/// Reply generator for interactive runs: echoes the message, thinks briefly,
/// lists a directory and answers in a few chunks. Sequence numbers continue
/// across replies.
pub fn demo_reply() -> impl Fn(&str) -> Vec<ScriptStep> + Send + Sync + 'static {
    demo_reply_after(0)
}

/// [`demo_reply`] whose first block takes `first_sequence`, for sessions that
/// already hold persisted history.
pub fn demo_reply_after(first_sequence: u64) -> impl Fn(&str) -> Vec<ScriptStep> + Send + Sync + 'static {
    let next_sequence = Arc::new(AtomicU64::new(first_sequence));
    move |message: &str| {
        let base = next_sequence.fetch_add(4, Ordering::SeqCst);
        let turn = (base - first_sequence) / 4;
        let mut steps = user_message(&format!("user-{turn}"), base, message);
        steps.push(ScriptStep::event(&StreamEvent::Thought {
            content: "Looking at the workspace first.".to_string(),
        }));
        steps.push(ScriptStep::pause_ms(40));
        steps.extend(tool_exchange(
            "list_files",
            serde_json::json!({"path": "."}),
            "Cargo.toml\nsrc/\ncrates/",
            &format!("call-{turn}"),
            base + 1,
        ));
        let answer = format!("You said: {message}. The workspace has a Cargo manifest.");
        let chunks: Vec<&str> = answer.split_inclusive(' ').collect();
        let block_id = format!("assistant-{turn}");
        for step in assistant_text(&block_id, base + 3, &chunks) {
            steps.push(step);
            steps.push(ScriptStep::pause_ms(15));
        }
        steps
    }
}

fn prefixes(text: &str, parts: usize) -> Vec<String> {
    let boundaries: Vec<usize> = text.char_indices().map(|(index, _)| index).collect();
    if boundaries.is_empty() {
        return Vec::new();
    }
    let step = boundaries.len().div_ceil(parts.max(1));
    let mut out: Vec<String> = boundaries
        .iter()
        .skip(step)
        .step_by(step)
        .map(|end| text[..*end].to_string())
        .collect();
    out.push(text.to_string());
    out
}
