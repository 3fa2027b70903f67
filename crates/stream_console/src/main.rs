use std::io;

use chat_stream::logging::init_tracing;
use chat_stream::protocol::{BlockType, ContentBlock};
use chat_stream::{EnvConfig, Session, SessionUpdate};
use stream_console::app::{App, HostOps, HELP_TEXT};
use stream_console::host::SessionHost;
use stream_mock::{scripts, MockScript, MockStreamServer};
use tokio::io::{AsyncBufReadExt, BufReader};

enum Wake {
    Line(io::Result<Option<String>>),
    Update(Option<SessionUpdate>),
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let env = EnvConfig::from_env();
    init_tracing(env.log_filter.as_deref());
    let use_mock = std::env::args().skip(1).any(|arg| arg == "--mock");

    let mut config = env.session_config();
    // Keeps the scripted server alive for the whole run.
    let _server = if use_mock {
        let server = MockStreamServer::start(mock_script()).await?;
        config.transport.base_url = server.base_url().to_string();
        config.transport.session_id = server.session_id().to_string();
        Some(server)
    } else {
        None
    };
    if config.transport.session_id.is_empty() {
        return Err(io::Error::other(
            "set CHAT_STREAM_SESSION_ID or pass --mock",
        ));
    }

    let mut session = Session::init(config);
    session.start().map_err(io::Error::other)?;
    let mut host = SessionHost::new(session);
    let mut app = App::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("* {HELP_TEXT}");
    host.request_history();

    loop {
        if let Some(result) = host.load_requested_history().await {
            match result {
                Ok(update) => app.on_update(&host.session().view(), update.signal.as_ref()),
                Err(error) => println!("* history unavailable: {error}"),
            }
        }
        for line in app.take_output() {
            println!("{line}");
        }
        if app.should_exit || host.stop_requested() {
            break;
        }

        let wake = tokio::select! {
            line = lines.next_line() => Wake::Line(line),
            update = host.session_mut().next_update() => Wake::Update(update),
        };
        match wake {
            Wake::Line(Ok(Some(line))) => app.on_submit(&line, &mut host),
            Wake::Line(Ok(None)) | Wake::Update(None) => break,
            Wake::Line(Err(error)) => return Err(error),
            Wake::Update(Some(update)) => {
                // Nothing scrolls in a line console; settle right away.
                if let Some(request) = update.scroll {
                    host.session_mut().on_scroll_settled(request.id);
                }
                app.on_update(&host.session().view(), update.signal.as_ref());
            }
        }
    }

    host.session_mut().teardown().await;
    Ok(())
}

fn mock_script() -> MockScript {
    let history = vec![
        ContentBlock::text("history-user", 0, BlockType::UserText, "What is in this workspace?"),
        ContentBlock::text(
            "history-assistant",
            1,
            BlockType::AssistantText,
            "A Rust workspace with an engine crate and four satellites.",
        ),
    ];
    MockScript::new()
        .with_blocks(history)
        .on_message(scripts::demo_reply_after(2))
        .on_cancel(scripts::cancelled())
}
