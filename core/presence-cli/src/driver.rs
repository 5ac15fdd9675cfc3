//! Interactive driver: one session, controlled by line commands on stdin.

use std::io::{self, BufRead};

use presence_core::{ActivityUpdate, PresenceSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Details(String),
    State(String),
    Image { slot: ImageSlot, key: String },
    Status,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSlot {
    Large,
    Small,
}

/// `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match (word.to_ascii_lowercase().as_str(), rest) {
        ("pause", "") => Command::Pause,
        ("resume", "") => Command::Resume,
        ("status", "") => Command::Status,
        ("stop" | "quit" | "exit", "") => Command::Stop,
        ("details", text) if !text.is_empty() => Command::Details(text.to_string()),
        ("state", text) if !text.is_empty() => Command::State(text.to_string()),
        ("image", args) => parse_image(args)?,
        _ => return Err(format!("unrecognized command: {}", line)),
    };
    Ok(Some(command))
}

fn parse_image(args: &str) -> Result<Command, String> {
    let mut parts = args.split_whitespace();
    let slot = match parts.next() {
        Some("large") => ImageSlot::Large,
        Some("small") => ImageSlot::Small,
        _ => return Err("usage: image large|small <key>".to_string()),
    };
    match (parts.next(), parts.next()) {
        (Some(key), None) => Ok(Command::Image {
            slot,
            key: key.to_string(),
        }),
        _ => Err("usage: image large|small <key>".to_string()),
    }
}

/// Applies one command. Returns `false` once the session should end.
pub fn apply(session: &PresenceSession, command: Command) -> bool {
    match command {
        Command::Pause => session.pause(),
        Command::Resume => session.resume(),
        Command::Details(text) => session.update(ActivityUpdate::new().details(text)),
        Command::State(text) => session.update(ActivityUpdate::new().state(text)),
        Command::Image { slot, key } => {
            let update = match slot {
                ImageSlot::Large => ActivityUpdate::new().large_image(key),
                ImageSlot::Small => ActivityUpdate::new().small_image(key),
            };
            session.update(update);
        }
        Command::Status => println!("{}", status_line(session)),
        Command::Stop => return false,
    }
    true
}

fn status_line(session: &PresenceSession) -> String {
    let Some(activity) = session.activity() else {
        return "stopped".to_string();
    };
    let mode = if session.is_paused() { "paused" } else { "running" };
    let assets: Vec<String> = activity
        .assets
        .iter()
        .map(|(slot, key)| format!("{}={}", slot, key))
        .collect();
    format!(
        "{} details={:?} state={:?} assets=[{}] since={}",
        mode,
        activity.details.as_deref().unwrap_or(""),
        activity.state.as_deref().unwrap_or(""),
        assets.join(", "),
        activity.start_timestamp()
    )
}

/// Starts `session` and feeds it commands from `input` until `stop` or EOF.
pub fn run<R: BufRead>(session: &PresenceSession, input: R) -> io::Result<()> {
    session.start();
    tracing::info!(
        transport = session.transport().name(),
        "Presence running; commands: pause, resume, details <text>, state <text>, image large|small <key>, status, stop"
    );

    for line in input.lines() {
        match parse_line(&line?) {
            Ok(Some(command)) => {
                if !apply(session, command) {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => tracing::warn!("{}", message),
        }
    }

    session.stop();
    Ok(())
}
