//! quill - streaming chat in the terminal with durable, compacting history

mod commands;
mod config;
mod utils;

use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use quill_agent::{Chat, ChatConfig, ChatEvent, Error as ChatError, RetryTransport, TranscriptStore};
use quill_ai::providers::openai::OpenAIProvider;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::utils::{format_number, one_line, truncate_chars};

const DIM: &str = "\x1b[2m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

const PREVIEW_CHARS: usize = 40;

/// quill - streaming chat in the terminal
#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: gpt-4o)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Continue a saved conversation by id
    #[arg(short = 'c', long = "continue", value_name = "ID")]
    resume: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List saved conversations
    #[command(alias = "ls")]
    List,
    /// Print a saved conversation as JSON
    Export { id: String },
    /// Manage the config file
    Config {
        /// Store an API key
        #[arg(long)]
        key: Option<String>,
        /// Write a default config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Quiet by default; --verbose or RUST_LOG opt in
    let filter = if args.verbose {
        EnvFilter::new("quill=debug,quill_ai=debug,quill_agent=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = Config::load();
    let store = TranscriptStore::filesystem(cfg.data_dir(), cfg.checkpoints);

    match args.command {
        Some(Command::List) => return list_conversations(&store).await,
        Some(Command::Export { id }) => {
            println!("{}", store.export(&id).await?);
            return Ok(());
        }
        Some(Command::Config { key, init }) => return configure(key, init),
        None => {}
    }

    let Some(api_key) = cfg.api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set one with: quill config --key <your-key>");
        eprintln!("Or export OPENAI_API_KEY=your-key");
        std::process::exit(1);
    };

    let mut provider = OpenAIProvider::new(api_key);
    if let Some(ref base_url) = cfg.base_url {
        provider = provider.with_base_url(base_url);
    }
    let transport = Arc::new(RetryTransport::new(Arc::new(provider), cfg.retry_config()));

    let config = ChatConfig {
        model: args.model.unwrap_or_else(|| cfg.model()),
        max_tokens: cfg.max_tokens,
        compaction: cfg.compaction_config(),
    };
    let mut chat = Chat::new(config, transport).with_store(store.clone());

    if let Some(ref id) = args.resume {
        match store.load(id).await {
            Ok(conversation) => {
                println!(
                    "Resuming conversation {} ({} turns)",
                    conversation.id,
                    conversation.len()
                );
                chat.resume(conversation);
            }
            Err(e) => {
                eprintln!("Error loading conversation: {}", e);
                std::process::exit(1);
            }
        }
    }

    run_interactive(&mut chat, &store).await
}

fn configure(key: Option<String>, init: bool) -> anyhow::Result<()> {
    if let Some(key) = key {
        let path = Config::set_api_key(&key)?;
        println!("API key saved to: {}", path.display());
    } else if init {
        let path = Config::init()?;
        println!("Config file at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
    } else {
        eprintln!("Usage: quill config --key <key> | quill config --init");
        std::process::exit(1);
    }
    Ok(())
}

async fn list_conversations(store: &TranscriptStore) -> anyhow::Result<()> {
    let conversations = store.list().await?;
    if conversations.is_empty() {
        println!("No saved conversations found.");
        return Ok(());
    }

    println!("{:<16} {:<6} First message", "ID", "Turns");
    println!("{}", "-".repeat(70));
    for info in conversations {
        let preview = info
            .preview
            .map(|p| truncate_chars(&one_line(&p), PREVIEW_CHARS))
            .unwrap_or_default();
        println!("{:<16} {:<6} {}", info.id, info.turn_count, preview);
    }
    println!("\nContinue with: quill -c <id>");
    Ok(())
}

async fn show_welcome(chat: &Chat, store: &TranscriptStore) {
    let conversation = chat.conversation();
    println!(
        "{DIM}──{RESET} {CYAN}quill{RESET} {DIM}{}{RESET}",
        "─".repeat(50)
    );
    println!("  {DIM}{} · {CYAN}{}{RESET}", chat.config().model, conversation.id);
    println!();

    match store.list().await {
        Ok(recent) if !recent.is_empty() => {
            println!("  {YELLOW}Recent conversations{RESET}");
            for info in recent.iter().rev().take(3) {
                let preview = info.preview.as_deref().map(one_line).unwrap_or_default();
                println!("  {DIM}{}{RESET} {}", info.id, truncate_chars(&preview, 25));
            }
            println!();
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("could not list conversations: {}", e),
    }

    println!("{DIM}  ? for help{RESET}");
    println!();
}

/// Print streamed events; signals `done` after every terminal event
fn spawn_printer(chat: &Chat, done: mpsc::UnboundedSender<()>) -> tokio::task::JoinHandle<()> {
    let mut receiver = chat.subscribe();

    tokio::spawn(async move {
        let mut started = false;
        let mut notice = None;
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "printer fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                ChatEvent::TurnStart { estimated_tokens } => {
                    started = false;
                    println!(
                        "{DIM}(ctrl+c to cancel · ↑{} tokens){RESET}",
                        format_number(estimated_tokens)
                    );
                }
                ChatEvent::Compacted {
                    dropped_turns,
                    estimated_tokens_saved,
                } => {
                    notice = Some(format!(
                        "{DIM}(compacted {} earlier turns, saved ~{} tokens){RESET}",
                        dropped_turns, estimated_tokens_saved
                    ));
                }
                ChatEvent::TextDelta { delta } => {
                    if !started {
                        print!("{DIM}│{RESET} ");
                        started = true;
                    }
                    print!("{}", delta.replace('\n', &format!("\n{DIM}│{RESET} ")));
                    let _ = std::io::stdout().flush();
                }
                ChatEvent::TurnEnd { .. } | ChatEvent::Error { .. } => {
                    if started {
                        println!("\n");
                    }
                    if let Some(notice) = notice.take() {
                        println!("{}\n", notice);
                    }
                    let _ = done.send(());
                }
            }
        }
    })
}

async fn save(chat: &Chat) {
    match chat.save().await {
        Ok(_) => {}
        Err(e) => eprintln!("{YELLOW}Error saving conversation: {}{RESET}", e),
    }
}

async fn run_interactive(chat: &mut Chat, store: &TranscriptStore) -> anyhow::Result<()> {
    show_welcome(chat, store).await;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let printer = spawn_printer(chat, done_tx);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("{DIM}{}{RESET}", "─".repeat(60));
        print!("{CYAN}❯{RESET} ");
        std::io::stdout().flush()?;

        // Ctrl-C at the prompt behaves like EOF
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            save(chat).await;
            println!("\n{DIM}Conversation saved{RESET}");
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input, chat) {
            println!();
            match result {
                commands::CommandResult::Message(msg) => println!("{}", msg),
                commands::CommandResult::List => list_conversations(store).await?,
                commands::CommandResult::Save => {
                    save(chat).await;
                    println!("{DIM}Saved{RESET}");
                }
                commands::CommandResult::Clear => {
                    print!("\x1b[2J\x1b[H");
                    show_welcome(chat, store).await;
                }
                commands::CommandResult::Exit => {
                    save(chat).await;
                    println!("{DIM}Conversation saved, bye!{RESET}");
                    break;
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("{DIM}Unknown command: /{}{RESET}", cmd);
                    println!("Type ? for available commands.");
                }
            }
            println!();
            continue;
        }

        println!();
        let result = prompt(chat, input).await;
        let _ = done_rx.recv().await;
        match result {
            Ok(_) => {}
            Err(e) if e.is_aborted() => println!("{DIM}(cancelled){RESET}\n"),
            Err(e) => println!("{YELLOW}Error: {}{RESET}\n", e),
        }
    }

    printer.abort();
    Ok(())
}

/// Run one prompt, cancelling it on Ctrl-C
async fn prompt(chat: &mut Chat, input: &str) -> Result<String, ChatError> {
    let handle = chat.handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let result = chat.prompt(input).await;
    watcher.abort();
    result
}
