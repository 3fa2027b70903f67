use pretty_assertions::assert_eq;
use serde_json::json;
use stream_protocol::{BlockType, ContentBlock, StreamEvent, ToolStatus};

use chat_stream::{Applied, BlockKey, ConversationEngine, DropReason, TurnOutcome};

fn start(id: &str, seq: u64) -> StreamEvent {
    StreamEvent::AssistantTextStart {
        block_id: Some(id.to_string()),
        sequence_number: Some(seq),
    }
}

fn chunk(id: &str, text: &str) -> StreamEvent {
    StreamEvent::Chunk {
        content: text.to_string(),
        block_id: Some(id.to_string()),
    }
}

fn end(id: &str) -> StreamEvent {
    StreamEvent::AssistantTextEnd {
        block_id: Some(id.to_string()),
        cancelled: false,
        has_error: false,
    }
}

fn sync(id: &str, text: &str, streaming: bool, seq: u64) -> StreamEvent {
    StreamEvent::StreamSync {
        block_id: id.to_string(),
        accumulated_content: text.to_string(),
        streaming,
        sequence_number: seq,
    }
}

fn args_chunk(tool: &str, partial: &str) -> StreamEvent {
    StreamEvent::ActionArgsChunk {
        tool: tool.to_string(),
        partial_args: partial.to_string(),
        step: 0,
    }
}

fn texts(engine: &ConversationEngine) -> Vec<String> {
    engine
        .blocks()
        .filter_map(|block| block.text_content().map(str::to_string))
        .collect()
}

#[test]
fn chunks_concatenate_in_arrival_order() {
    let pieces = ["The ", "quick ", "", "brown ", "fox"];
    let mut engine = ConversationEngine::new();
    let mut events = vec![start("a", 1)];
    events.extend(pieces.iter().map(|piece| chunk("a", piece)));
    events.push(end("a"));

    engine.apply_all(&events);

    assert_eq!(texts(&engine), vec![pieces.concat()]);
    assert_eq!(engine.open_count(), 0);
    assert_eq!(engine.outcome(), &TurnOutcome::Completed);
}

#[test]
fn hello_scenario_yields_one_block() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[start("a", 3), chunk("a", "Hel"), chunk("a", "lo"), end("a")]);

    let blocks: Vec<&ContentBlock> = engine.blocks().collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].id, "a");
    assert_eq!(blocks[0].sequence_number, 3);
    assert_eq!(blocks[0].block_type, BlockType::AssistantText);
    assert_eq!(blocks[0].text_content(), Some("Hello"));
}

#[test]
fn chunks_without_block_id_follow_the_open_text_block() {
    let mut engine = ConversationEngine::new();
    for text in ["a", "b"] {
        engine.apply(&StreamEvent::Chunk {
            content: text.to_string(),
            block_id: None,
        });
    }
    engine.apply(&StreamEvent::AssistantTextEnd {
        block_id: None,
        cancelled: false,
        has_error: false,
    });

    assert_eq!(texts(&engine), vec!["ab".to_string()]);
}

#[test]
fn stream_sync_is_idempotent() {
    let mut once = ConversationEngine::new();
    once.apply_all(&[start("a", 4), chunk("a", "par")]);
    let snapshot = sync("a", "partial text", true, 4);

    once.apply(&snapshot);
    let previews_once = once.previews();
    assert_eq!(once.apply(&snapshot), Applied::Unchanged);
    assert_eq!(once.previews(), previews_once);
    assert_eq!(previews_once[0].raw, "partial text");

    let closing = sync("a", "partial text, done", false, 4);
    once.apply(&closing);
    let blocks = once.projection().to_vec();
    assert_eq!(once.apply(&closing), Applied::Unchanged);
    assert_eq!(once.projection().to_vec(), blocks);
}

#[test]
fn stale_stream_sync_is_rejected() {
    let mut engine = ConversationEngine::new();
    engine.apply(&sync("a", "newer", true, 7));

    assert_eq!(
        engine.apply(&sync("a", "older", true, 6)),
        Applied::Dropped(DropReason::StaleSync)
    );
    assert_eq!(engine.previews()[0].raw, "newer");
    assert_eq!(engine.reconciler().applied_sequence("a"), Some(7));
    assert_eq!(engine.reconciler().rejected(), 1);
}

#[test]
fn stream_sync_replaces_local_text_and_resumes_chunks() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[start("a", 2), chunk("a", "Hel")]);
    // Chunks lost while disconnected; the snapshot carries the truth.
    engine.apply(&sync("a", "Hello wor", true, 2));
    engine.apply_all(&[chunk("a", "ld"), end("a")]);

    assert_eq!(texts(&engine), vec!["Hello world".to_string()]);
}

#[test]
fn stream_sync_discards_argument_phase_tool_state() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[
        StreamEvent::ActionStreaming {
            tool: "bash".to_string(),
            status: None,
            step: 0,
        },
        args_chunk("bash", r#"{"cmd":"l"#),
    ]);
    assert!(engine.state(&BlockKey::tool("bash")).is_some());

    engine.apply(&sync("a", "text", true, 1));
    assert!(engine.state(&BlockKey::tool("bash")).is_none());
}

#[test]
fn tool_call_scenario_stays_running_until_observation() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[
        StreamEvent::ActionStreaming {
            tool: "A".to_string(),
            status: Some("streaming".to_string()),
            step: 0,
        },
        args_chunk("A", r#"{"x":1"#),
        StreamEvent::Action {
            tool: "A".to_string(),
            args: json!({"x": 1, "y": 2}),
            step: 0,
        },
    ]);

    let calls: Vec<&ContentBlock> = engine
        .blocks()
        .filter(|block| block.block_type == BlockType::ToolCall)
        .collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool_status(), Some(ToolStatus::Running));
    let call_id = calls[0].id.clone();
    let stream_protocol::BlockContent::ToolCall(content) = &calls[0].content else {
        panic!("tool call payload");
    };
    assert_eq!(content.arguments, json!({"x": 1, "y": 2}));

    engine.apply(&StreamEvent::Observation {
        content: "ok".to_string(),
        success: true,
        metadata: Default::default(),
        tool: Some("A".to_string()),
    });

    assert_eq!(
        engine.block(&call_id).and_then(ContentBlock::tool_status),
        Some(ToolStatus::Complete)
    );
    let result = engine
        .blocks()
        .find(|block| block.block_type == BlockType::ToolResult)
        .expect("result block");
    assert_eq!(result.parent_block_id.as_deref(), Some(call_id.as_str()));
    assert_eq!(engine.open_count(), 0);
}

#[test]
fn argument_chunks_after_action_are_suppressed() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[
        args_chunk("A", r#"{"x""#),
        args_chunk("A", r#"{"x""#),
        args_chunk("A", r#"{"x":1"#),
    ]);
    let preview = &engine.previews()[0];
    assert_eq!(preview.raw, r#"{"x":1"#);
    assert_eq!(preview.arguments, Some(json!({"x": 1})));

    engine.apply(&StreamEvent::Action {
        tool: "A".to_string(),
        args: json!({"x": 1}),
        step: 0,
    });
    assert_eq!(
        engine.apply(&args_chunk("A", r#"{"x":1}"#)),
        Applied::Dropped(DropReason::SuppressedArguments)
    );
    assert!(engine.state(&BlockKey::tool("A")).is_none());
}

#[test]
fn stale_shorter_argument_prefix_is_ignored() {
    let mut engine = ConversationEngine::new();
    engine.apply(&args_chunk("A", r#"{"path":"src"#));
    assert_eq!(
        engine.apply(&args_chunk("A", r#"{"pa"#)),
        Applied::Dropped(DropReason::StaleArguments)
    );
    assert_eq!(engine.previews()[0].raw, r#"{"path":"src"#);
}

#[test]
fn cancellation_closes_everything_as_incomplete_and_poisons_keys() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[
        start("a", 1),
        chunk("a", "partial"),
        args_chunk("bash", r#"{"cmd":"ls"#),
        StreamEvent::Cancelled {
            content: Some("cancelled".to_string()),
            partial_content: None,
        },
    ]);

    assert_eq!(engine.open_count(), 0);
    assert_eq!(engine.outcome(), &TurnOutcome::Cancelled);
    let text = engine.block("a").expect("materialized text");
    assert_eq!(text.text_content(), Some("partial"));
    assert_eq!(text.metadata.get("cancelled"), Some(&json!(true)));
    let call = engine
        .blocks()
        .find(|block| block.block_type == BlockType::ToolCall)
        .expect("incomplete call");
    assert_eq!(call.tool_status(), Some(ToolStatus::Incomplete));

    assert_eq!(
        engine.apply(&chunk("a", " more")),
        Applied::Dropped(DropReason::CancelledKey)
    );
    assert_eq!(
        engine.apply(&StreamEvent::Chunk {
            content: "stray".to_string(),
            block_id: None,
        }),
        Applied::Dropped(DropReason::CancelledKey)
    );
    assert_eq!(
        engine.apply(&args_chunk("bash", r#"{"cmd":"ls -la"#)),
        Applied::Dropped(DropReason::CancelledKey)
    );
    assert_eq!(engine.block("a").and_then(ContentBlock::text_content), Some("partial"));
}

fn cancel() -> StreamEvent {
    StreamEvent::Cancelled {
        content: Some("cancelled".to_string()),
        partial_content: None,
    }
}

fn action_streaming(tool: &str) -> StreamEvent {
    StreamEvent::ActionStreaming {
        tool: tool.to_string(),
        status: None,
        step: 0,
    }
}

fn action(tool: &str, args: serde_json::Value) -> StreamEvent {
    StreamEvent::Action {
        tool: tool.to_string(),
        args,
        step: 0,
    }
}

#[test]
fn late_argument_streaming_cannot_reopen_a_cancelled_tool() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[
        action_streaming("bash"),
        args_chunk("bash", r#"{"cmd":"l"#),
        cancel(),
    ]);

    assert_eq!(
        engine.apply(&action_streaming("bash")),
        Applied::Dropped(DropReason::CancelledKey)
    );
    assert_eq!(
        engine.apply(&args_chunk("bash", r#"{"cmd":"ls"#)),
        Applied::Dropped(DropReason::CancelledKey)
    );
    assert_eq!(engine.open_count(), 0);
    assert!(engine.is_cancelled(&BlockKey::tool("bash")));
    assert_eq!(engine.outcome(), &TurnOutcome::Cancelled);
}

#[test]
fn redelivered_action_after_cancel_leaves_no_running_call() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[action("bash", json!({"cmd": "ls"})), cancel()]);

    assert_eq!(
        engine.apply(&action("bash", json!({"cmd": "ls"}))),
        Applied::Dropped(DropReason::CancelledKey)
    );
    let statuses: Vec<Option<ToolStatus>> = engine
        .blocks()
        .filter(|block| block.block_type == BlockType::ToolCall)
        .map(ContentBlock::tool_status)
        .collect();
    assert_eq!(statuses, vec![Some(ToolStatus::Incomplete)]);
    assert_eq!(engine.open_count(), 0);
}

#[test]
fn next_turn_accepts_the_cancelled_tool_again() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[action("bash", json!({"cmd": "ls"})), cancel()]);

    engine.begin_turn();
    assert_eq!(engine.apply(&action_streaming("bash")), Applied::Changed);
    assert_eq!(engine.apply(&action("bash", json!({"cmd": "ls"}))), Applied::Changed);
    assert_eq!(engine.open_count(), 1);
}

#[test]
fn error_keeps_blocks_open_until_next_turn() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[
        start("a", 1),
        chunk("a", "half"),
        StreamEvent::Error {
            content: "model overloaded".to_string(),
        },
    ]);

    assert_eq!(engine.open_count(), 1);
    assert_eq!(engine.error(), Some("model overloaded"));
    assert_eq!(
        engine.outcome(),
        &TurnOutcome::Errored("model overloaded".to_string())
    );
    assert_eq!(engine.previews()[0].status, ToolStatus::Error);

    engine.apply(&StreamEvent::UserTextBlock {
        block: ContentBlock::text("u-2", 5, BlockType::UserText, "try again"),
    });
    assert_eq!(engine.open_count(), 0);
    assert_eq!(engine.error(), None);
    let failed = engine.block("a").expect("finalized block");
    assert_eq!(failed.metadata.get("error"), Some(&json!(true)));
}

#[test]
fn persisted_tool_call_replaces_local_reconstruction() {
    let mut engine = ConversationEngine::new();
    engine.apply(&StreamEvent::Action {
        tool: "read".to_string(),
        args: json!({"path": "a"}),
        step: 0,
    });
    let persisted = ContentBlock::tool_call(
        "call-1",
        8,
        "read",
        json!({"path": "a", "limit": 10}),
        ToolStatus::Running,
    );
    engine.apply(&StreamEvent::ToolCallBlock {
        block: persisted.clone(),
    });

    let calls: Vec<&ContentBlock> = engine
        .blocks()
        .filter(|block| block.block_type == BlockType::ToolCall)
        .collect();
    assert_eq!(calls, vec![&persisted]);
    assert!(engine.state(&BlockKey::block("call-1")).is_some());

    engine.apply(&StreamEvent::Observation {
        content: "file body".to_string(),
        success: false,
        metadata: Default::default(),
        tool: None,
    });
    let result_block = ContentBlock::tool_result("res-1", 9, "read", "file body", false)
        .with_parent("call-1");
    engine.apply(&StreamEvent::ToolResultBlock {
        block: result_block.clone(),
    });

    let results: Vec<&ContentBlock> = engine
        .blocks()
        .filter(|block| block.block_type == BlockType::ToolResult)
        .collect();
    assert_eq!(results, vec![&result_block]);
    assert_eq!(
        engine.block("call-1").and_then(ContentBlock::tool_status),
        Some(ToolStatus::Error)
    );
}

#[test]
fn redelivered_events_are_idempotent() {
    let mut engine = ConversationEngine::new();
    let user = StreamEvent::UserTextBlock {
        block: ContentBlock::text("u-1", 0, BlockType::UserText, "hi"),
    };
    let turn = [user.clone(), start("a", 1), chunk("a", "Hi!"), end("a")];
    engine.apply_all(&turn);
    let before = engine.projection().to_vec();

    assert_eq!(engine.apply(&start("a", 1)), Applied::Dropped(DropReason::Redelivered));
    assert_eq!(engine.apply(&chunk("a", "Hi!")), Applied::Dropped(DropReason::Redelivered));
    engine.apply(&user);

    assert_eq!(engine.projection().to_vec(), before);
}

#[test]
fn snapshot_replaces_local_blocks_with_persisted_ones() {
    let mut engine = ConversationEngine::new();
    engine.apply_all(&[
        StreamEvent::Chunk {
            content: "local copy".to_string(),
            block_id: None,
        },
        StreamEvent::AssistantTextEnd {
            block_id: None,
            cancelled: false,
            has_error: false,
        },
    ]);
    assert!(engine.blocks().all(|block| block.id.starts_with("local-")));

    let persisted = vec![
        ContentBlock::text("u-1", 0, BlockType::UserText, "hi"),
        ContentBlock::text("a-1", 1, BlockType::AssistantText, "server copy"),
    ];
    engine.apply_snapshot(persisted.clone());

    assert_eq!(engine.projection().to_vec(), persisted);
}
