use std::time::{Duration, Instant};

use serde_json::{json, Map};
use stream_protocol::{BlockContent, BlockType, ContentBlock, StreamEvent, ToolStatus};

use chat_stream::engine::is_local_id;
use chat_stream::{ConversationEngine, Session, SessionConfig};

const SOAK_RUNS: usize = 20;

fn text_turn(id: &str, seq: u64, chunks: &[&str]) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::AssistantTextStart {
        block_id: Some(id.to_string()),
        sequence_number: Some(seq),
    }];
    events.extend(chunks.iter().map(|chunk| StreamEvent::Chunk {
        content: (*chunk).to_string(),
        block_id: Some(id.to_string()),
    }));
    events.push(StreamEvent::AssistantTextEnd {
        block_id: Some(id.to_string()),
        cancelled: false,
        has_error: false,
    });
    events
}

fn tool_turn(tool: &str, call_id: &str, seq: u64, args: serde_json::Value) -> Vec<StreamEvent> {
    let serialized = args.to_string();
    let mut events = vec![StreamEvent::ActionStreaming {
        tool: tool.to_string(),
        status: None,
        step: 0,
    }];
    for end in (1..=serialized.len()).step_by(4) {
        events.push(StreamEvent::ActionArgsChunk {
            tool: tool.to_string(),
            partial_args: serialized[..end].to_string(),
            step: 0,
        });
    }
    events.push(StreamEvent::Action {
        tool: tool.to_string(),
        args: args.clone(),
        step: 0,
    });
    // Late argument chunk after the call completed.
    events.push(StreamEvent::ActionArgsChunk {
        tool: tool.to_string(),
        partial_args: serialized.clone(),
        step: 0,
    });
    events.push(StreamEvent::ToolCallBlock {
        block: ContentBlock::tool_call(call_id, seq, tool, args, ToolStatus::Running),
    });
    events.push(StreamEvent::Observation {
        content: format!("{tool} ok"),
        success: true,
        metadata: Map::new(),
        tool: Some(tool.to_string()),
    });
    events.push(StreamEvent::ToolResultBlock {
        block: ContentBlock::tool_result(format!("{call_id}-r"), seq + 1, tool, format!("{tool} ok"), true)
            .with_parent(call_id),
    });
    events
}

fn conversation() -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::UserTextBlock {
        block: ContentBlock::text("u-0", 0, BlockType::UserText, "read the manifest"),
    }];
    events.push(StreamEvent::Thought {
        content: "Reading first.".to_string(),
    });
    events.extend(tool_turn("read_file", "c-0", 1, json!({"path": "Cargo.toml", "limit": 40})));
    let mut answer = text_turn("a-0", 3, &["The ", "manifest ", "names ", "one ", "crate."]);
    // Authoritative snapshot in the middle of the answer.
    answer.insert(
        3,
        StreamEvent::StreamSync {
            block_id: "a-0".to_string(),
            accumulated_content: "The manifest ".to_string(),
            streaming: true,
            sequence_number: 3,
        },
    );
    events.extend(answer);
    // Redelivered tail of the closed block.
    events.push(StreamEvent::Chunk {
        content: "crate.".to_string(),
        block_id: Some("a-0".to_string()),
    });

    events.push(StreamEvent::UserTextBlock {
        block: ContentBlock::text("u-1", 4, BlockType::UserText, "and the tests?"),
    });
    events.extend(tool_turn("list_files", "c-1", 5, json!({"path": "tests"})));
    events.extend(text_turn("a-1", 7, &["Four ", "test ", "files."]));
    events.push(StreamEvent::TitleUpdated {
        session_id: None,
        title: "Manifest review".to_string(),
    });
    events
}

/// Block shape with local ids masked.
fn normalized(blocks: Vec<&ContentBlock>) -> Vec<(u64, String, String, Option<String>)> {
    blocks
        .into_iter()
        .map(|block| {
            let id = if is_local_id(&block.id) {
                "local".to_string()
            } else {
                block.id.clone()
            };
            let body = match &block.content {
                BlockContent::Text(text) => text.text.clone(),
                BlockContent::ToolCall(call) => format!("{}:{}", call.tool_name, call.status.as_str()),
                BlockContent::ToolResult(result) => result.result.clone().unwrap_or_default(),
            };
            (block.sequence_number, id, body, block.parent_block_id.clone())
        })
        .collect()
}

#[test]
fn batch_boundaries_do_not_change_the_projection() {
    let events = conversation();
    let mut reference = ConversationEngine::new();
    reference.apply_all(&events);
    let expected = normalized(reference.blocks().collect());

    assert_eq!(
        expected.iter().map(|(_, id, _, _)| id.as_str()).collect::<Vec<_>>(),
        vec!["u-0", "c-0", "c-0-r", "a-0", "u-1", "c-1", "c-1-r", "a-1"]
    );
    assert_eq!(expected[3].2, "The manifest names one crate.");
    assert_eq!(expected[2].3.as_deref(), Some("c-0"));

    for run in 0..SOAK_RUNS {
        let batch_size = run % 7 + 1;
        let mut session = Session::init(SessionConfig::new("http://127.0.0.1:1", "soak"));
        let start = Instant::now();
        let mut flushes = 0u64;

        for (index, batch) in events.chunks(batch_size).enumerate() {
            let now = start + Duration::from_millis(32 * index as u64);
            let update = session.apply_batch(batch.to_vec(), now);
            flushes += 1;
            if let Some(request) = update.scroll {
                session.on_scroll_settled(request.id);
            }
        }

        let view = session.view();
        assert_eq!(normalized(view.blocks), expected, "run {run} batch size {batch_size}");
        assert!(view.previews.is_empty(), "run {run} left blocks open");
        assert_eq!(view.title, Some("Manifest review"));
        assert!(session.viewport().requests_issued() <= flushes);
        assert_eq!(session.events_received(), events.len() as u64);
    }
}
