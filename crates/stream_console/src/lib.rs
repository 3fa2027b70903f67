//! Line-oriented console for a live conversation stream.
//!
//! Reads commands and messages from stdin and prints each content block once
//! it materializes. Configuration comes from the `CHAT_STREAM_*` environment
//! variables; `--mock` runs against an in-process scripted server instead.

pub mod app;
pub mod commands;
pub mod host;
