//! Interactive chat surface.
//!
//! A line-oriented loop over [`ConversationSync`]: plain input is sent as a
//! prompt, slash commands manage the conversation list. All state lives in
//! the synchronizer; this module only prints snapshots.

use std::error::Error;
use std::sync::Arc;

use chrono::Local;

use crate::auth::IdentityProvider;
use crate::cli::prompt;
use crate::core::conversation::ConversationSync;
use crate::core::message::{Message, Sender};
use crate::core::segment::Segment;
use crate::utils::input::sanitize_text_input;
use crate::utils::logging::LoggingState;

pub async fn run_chat(
    sync: &mut ConversationSync,
    identity: &Arc<dyn IdentityProvider>,
    logging: &mut LoggingState,
) -> Result<(), Box<dyn Error>> {
    if let Err(err) = sync.refresh_summaries().await {
        println!("Could not fetch conversations: {err}");
    }
    print_summaries(sync);
    println!("Start a new conversation by typing a message, or see /help for commands.");

    loop {
        let line = prompt("> ")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let command = parts.next().unwrap_or("");
            let argument = parts.next().map(str::trim).unwrap_or("");
            match command {
                "help" => print_help(),
                "list" => {
                    if let Err(err) = sync.refresh_summaries().await {
                        println!("Could not fetch conversations: {err}");
                    }
                    print_summaries(sync);
                }
                "open" => open_conversation(sync, argument).await,
                "new" => {
                    sync.start_new();
                    println!("Started a new conversation.");
                }
                "delete" => delete_conversation(sync, argument).await,
                "log" => handle_log(logging, argument),
                "logout" => {
                    identity.sign_out().await?;
                    println!("Signed out.");
                    return Ok(());
                }
                "quit" | "q" => return Ok(()),
                other => println!("Unknown command: /{other}"),
            }
            continue;
        }

        let text = sanitize_text_input(line);
        if let Err(err) = logging.log_message(&format!("you: {text}")) {
            eprintln!("Failed to log message: {err}");
        }
        let before = sync.active().map(|conv| conv.messages.len()).unwrap_or(0);
        sync.send(&text).await;
        print_replies(sync, before, logging);
    }
}

/// Resolves a `/open` or `/delete` argument: a 1-based list number or a raw
/// conversation id.
fn resolve_id(sync: &ConversationSync, argument: &str) -> Option<String> {
    if let Ok(index) = argument.parse::<usize>() {
        if index >= 1 {
            return sync
                .summaries()
                .get(index - 1)
                .map(|summary| summary.id.clone());
        }
        return None;
    }
    Some(argument.to_string())
}

async fn open_conversation(sync: &mut ConversationSync, argument: &str) {
    if argument.is_empty() {
        println!("Usage: /open <number|id>");
        return;
    }
    let Some(id) = resolve_id(sync, argument) else {
        println!("No such conversation: {argument}");
        return;
    };
    match sync.select(&id).await {
        Ok(()) => {
            if let Some(conversation) = sync.active() {
                for message in &conversation.messages {
                    print_message(message);
                }
            }
        }
        Err(err) => println!("Could not open conversation: {err}"),
    }
}

async fn delete_conversation(sync: &mut ConversationSync, argument: &str) {
    if argument.is_empty() {
        println!("Usage: /delete <number|id>");
        return;
    }
    let Some(id) = resolve_id(sync, argument) else {
        println!("No such conversation: {argument}");
        return;
    };
    match sync.delete(&id).await {
        Ok(()) => println!("Deleted."),
        Err(err) => println!("Could not delete conversation: {err}"),
    }
}

fn handle_log(logging: &mut LoggingState, argument: &str) {
    let outcome = if argument.is_empty() {
        logging.toggle_logging()
    } else {
        logging.set_log_file(argument.to_string())
    };
    match outcome {
        Ok(message) => println!("{message}"),
        Err(err) => println!("{err}"),
    }
}

fn print_help() {
    println!("/list             List stored conversations");
    println!("/open <n|id>      Open a conversation by list number or id");
    println!("/new              Start a new conversation");
    println!("/delete <n|id>    Delete a conversation");
    println!("/log [file]       Enable or toggle transcript logging");
    println!("/logout           Sign out");
    println!("/quit             Leave the chat");
}

fn print_summaries(sync: &ConversationSync) {
    if sync.summaries().is_empty() {
        println!("No stored conversations.");
        return;
    }
    println!("Conversations:");
    for (index, summary) in sync.summaries().iter().enumerate() {
        let marker = if sync.active_id() == Some(summary.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {}. {}", index + 1, summary.title);
    }
}

/// Prints everything appended past `before` — the assistant reply, or the
/// inline error entry a failed send leaves behind.
fn print_replies(sync: &ConversationSync, before: usize, logging: &LoggingState) {
    let Some(conversation) = sync.active() else {
        return;
    };
    for message in conversation.messages.iter().skip(before) {
        if message.sender == Sender::User {
            continue;
        }
        print_message(message);
        if let Err(err) =
            logging.log_message(&format!("{}: {}", message.sender.as_str(), message.raw_content))
        {
            eprintln!("Failed to log message: {err}");
        }
    }
}

fn print_message(message: &Message) {
    let stamp = message
        .created_at
        .with_timezone(&Local)
        .format("%H:%M");
    println!("[{stamp}] {}:", message.sender.as_str());
    for segment in message.segments() {
        match segment {
            Segment::Text(content) => println!("{content}"),
            Segment::Code { language, content } => {
                println!("```{language}");
                println!("{content}");
                println!("```");
            }
        }
    }
}
