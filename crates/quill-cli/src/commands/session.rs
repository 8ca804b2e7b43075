//! /session command - show conversation info

use super::CommandResult;
use crate::utils::format_number;
use quill_agent::{Chat, compaction::is_rolling_summary};

pub struct SessionCommand;

impl SessionCommand {
    pub fn execute(chat: &Chat) -> CommandResult {
        let conversation = chat.conversation();
        let compaction = &chat.config().compaction;

        let mut output = String::from("Conversation Info\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');

        output.push_str(&format!("ID:         {}\n", conversation.id));
        output.push_str(&format!(
            "Created:    {}\n",
            conversation.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output.push_str(&format!("Model:      {}\n", chat.config().model));
        output.push('\n');

        output.push_str(&format!("Turns:      {}\n", conversation.len()));
        if conversation.turns.first().is_some_and(is_rolling_summary) {
            output.push_str("            (earlier turns summarized)\n");
        }
        output.push('\n');

        let estimate = chat.estimate();
        output.push_str(&format!(
            "Estimated tokens: ~{}\n",
            format_number(estimate)
        ));
        if compaction.enabled {
            output.push_str(&format!(
                "Compaction at:    ~{}\n",
                format_number(compaction.threshold)
            ));
        } else {
            output.push_str("Compaction:       off\n");
        }

        CommandResult::Message(output)
    }
}
