use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};

use crate::chat::{ChatEvent, ChatHandle, ChatSnapshot, GenerationStateChanged};
use crate::config::{self, ChatConfig, ConfigStore};
use crate::error::Error;
use crate::models::ModelCatalog;

const HELP: &str = "Commands: /models, /model <id>, /retry, /background, /quit. Anything else is sent to the model.";

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Models,
    Model(String),
    Retry,
    Background,
    Quit,
    Help,
    Message(String),
    Empty,
}

fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };

    match (name, argument) {
        ("models", _) => Input::Models,
        ("model", "") => Input::Help,
        ("model", id) => Input::Model(id.to_string()),
        ("retry", _) => Input::Retry,
        ("background", _) => Input::Background,
        ("quit" | "exit", _) => Input::Quit,
        _ => Input::Help,
    }
}

/// Read stdin until EOF or `/quit`, forwarding intents to the controller.
pub async fn run(
    handle: ChatHandle,
    catalog: ModelCatalog,
    store: &impl ConfigStore,
    mut chat_config: ChatConfig,
) -> Result<(), Error> {
    let renderer = tokio::spawn(render(
        handle.subscribe_events(),
        handle.subscribe_snapshots(),
    ));

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Input::Empty => {}
            Input::Help => println!("{}", HELP),
            Input::Quit => break,
            Input::Models => {
                let selected = handle.snapshot().selected_model;
                for listing in catalog.list() {
                    let marker = if selected.as_deref() == Some(listing.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{} {:<22} {}", marker, listing.id, listing.display_label);
                }
            }
            Input::Model(id) => {
                if catalog.contains(&id) {
                    chat_config.selected_model = Some(id.clone());
                    if let Err(e) = config::save_chat_config(store, &chat_config) {
                        log::warn!("Failed to persist selected model: {}", e);
                    }
                }
                handle.select_model(id).await?;
            }
            Input::Retry => handle.retry_load().await?,
            Input::Background => handle.enter_background().await?,
            Input::Message(text) => handle.send_message(text).await?,
        }
    }

    renderer.abort();
    Ok(())
}

async fn render(
    mut events: broadcast::Receiver<ChatEvent>,
    mut snapshots: watch::Receiver<ChatSnapshot>,
) {
    let mut status = String::new();
    // Reply text already on screen for the current generation
    let mut shown = String::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ChatEvent::Generation(event)) => render_generation(event, &mut shown),
                Ok(ChatEvent::Loading(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Renderer skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let label = snapshots.borrow_and_update().status_label.clone();
                if label != status {
                    println!("[{}]", label);
                    status = label;
                }
            }
        }
    }
}

fn render_generation(event: GenerationStateChanged, shown: &mut String) {
    match event {
        GenerationStateChanged::Started { .. } => shown.clear(),
        GenerationStateChanged::Partial { text, .. } => print_delta(shown, &text),
        GenerationStateChanged::Complete {
            text,
            tokens_per_second,
            ..
        } => {
            print_delta(shown, &text);
            println!();
            println!("Tokens/second: {:.3}", tokens_per_second);
        }
        GenerationStateChanged::Cancelled => println!("\n{}", crate::chat::CANCELLED_MESSAGE),
        GenerationStateChanged::Error { user_message, .. } => {
            println!("\nError: {}", user_message);
        }
    }
}

/// Print only what `text` adds to what is already on screen.
fn print_delta(shown: &mut String, text: &str) {
    match text.strip_prefix(shown.as_str()) {
        Some(delta) => print!("{}", delta),
        None => print!("\n{}", text),
    }
    let _ = std::io::stdout().flush();
    *shown = text.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let cases = vec![
            ("", Input::Empty),
            ("   ", Input::Empty),
            ("/models", Input::Models),
            ("/model llama3.2-1b-4bit", Input::Model("llama3.2-1b-4bit".into())),
            ("/model   phi-4bit  ", Input::Model("phi-4bit".into())),
            ("/model", Input::Help),
            ("/retry", Input::Retry),
            ("/background", Input::Background),
            ("/quit", Input::Quit),
            ("/exit", Input::Quit),
            ("/nope", Input::Help),
            ("hi", Input::Message("hi".into())),
            ("  what is rust?  ", Input::Message("what is rust?".into())),
        ];

        for (line, expected) in cases {
            assert_eq!(parse_line(line), expected, "line: {:?}", line);
        }
    }
}
