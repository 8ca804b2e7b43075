//! Slash commands for interactive mode

mod session;

pub use session::SessionCommand;

use quill_agent::Chat;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the model)
    Message(String),
    /// List stored conversations
    List,
    /// Save the conversation now
    Save,
    /// Clear the screen; the conversation is kept
    Clear,
    /// Save and exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command. `?` is shorthand for `/help`.
pub fn execute_command(input: &str, chat: &Chat) -> Option<CommandResult> {
    let input = input.trim();

    let command = if input == "?" {
        "help".to_string()
    } else {
        input.strip_prefix('/')?.trim().to_lowercase()
    };

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "list" | "ls" => CommandResult::List,

        "save" => CommandResult::Save,

        "clear" | "c" => CommandResult::Clear,

        "session" | "s" => SessionCommand::execute(chat),

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  ?, /help, /h         Show this help message
  /list, /ls           List saved conversations
  /session, /s         Show conversation info and estimated tokens
  /save                Save the conversation now
  /clear, /c           Clear the screen (history is kept)
  /quit, /exit, /q     Save and exit quill

Ctrl-C cancels a reply in progress. Ctrl-D saves and exits."#
        .to_string()
}
