#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Cancel,
    /// `None` toggles.
    Follow(Option<bool>),
    Reconnect,
    History,
    Quit,
    Unknown(String),
}

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let command = words.next().unwrap_or(trimmed).to_string();

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/cancel" => SlashCommand::Cancel,
        "/follow" => match words.next() {
            None => SlashCommand::Follow(None),
            Some("on") => SlashCommand::Follow(Some(true)),
            Some("off") => SlashCommand::Follow(Some(false)),
            Some(other) => SlashCommand::Unknown(format!("/follow {other}")),
        },
        "/reconnect" => SlashCommand::Reconnect,
        "/history" => SlashCommand::History,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}
