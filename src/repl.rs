//! Interactive chat loop for `kbchat chat`.
//!
//! Lines starting with `/` are commands; everything else is sent as a
//! message. While a reply is pending, Ctrl-C cancels the request and returns
//! to the prompt; at the prompt it exits.

use anyhow::{Context, Result};
use base64::Engine;
use console::style;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::error::ChatError;
use crate::export::{self, ExportFormat, ExportInput};
use crate::models::ImageSource;
use crate::render;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Clear,
    Stats,
    Image(PathBuf),
    ImagesClear,
    Summarize,
    WebSearch,
    Export { format: String, path: PathBuf },
    Load(PathBuf),
    Quit,
    Invalid(String),
}

/// Parse a `/command` line. Returns `None` for ordinary messages.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let rest = line.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let cmd = match (name, arg) {
        ("help", _) => Command::Help,
        ("clear", _) => Command::Clear,
        ("stats", _) => Command::Stats,
        ("quit" | "exit", _) => Command::Quit,
        ("summarize", _) => Command::Summarize,
        ("websearch", _) => Command::WebSearch,
        ("images", "clear") => Command::ImagesClear,
        ("image", path) if !path.is_empty() => Command::Image(PathBuf::from(path)),
        ("load", path) if !path.is_empty() => Command::Load(PathBuf::from(path)),
        ("export", arg) => match arg.split_once(char::is_whitespace) {
            Some((format, path)) if !path.trim().is_empty() => Command::Export {
                format: format.to_string(),
                path: PathBuf::from(path.trim()),
            },
            _ => Command::Invalid("usage: /export <markdown|html|json> <path>".into()),
        },
        _ => Command::Invalid(format!("unknown command: {}", line)),
    };
    Some(cmd)
}

/// Media type by file extension; unknown extensions are sent as JPEG.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Read an image file and encode it for attachment.
pub fn load_image(path: &Path) -> Result<ImageSource> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(ImageSource::base64(media_type_for(path), data))
}

const HELP: &str = "\
Commands:
  /help                               show this help
  /clear                              clear the conversation
  /stats                              show token usage and cost
  /image <path>                       attach an image to the next message
  /images clear                       drop pending images
  /summarize                          summarize the conversation
  /websearch                          toggle the web search hint
  /export <markdown|html|json> <path> export the conversation
  /load <path>                        load a JSON export
  /quit                               exit";

/// Read stdin lines on a plain thread. The thread is never joined, so a
/// pending read does not hold up exit.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub async fn run(session: &mut Session) -> Result<()> {
    let mut lines = spawn_stdin_reader();
    let mut pending_images: Vec<ImageSource> = Vec::new();

    println!(
        "{} {} documents loaded. Type /help for commands.",
        style("kbchat").bold().cyan(),
        session.store().len()
    );

    loop {
        let line = match prompt_line(&mut lines, &session.settings().user_name).await? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Some(Command::Quit) => break,
            Some(cmd) => handle_command(session, cmd, &mut pending_images, &mut lines).await?,
            None => {
                let images = std::mem::take(&mut pending_images);
                if let Err(e) = session.submit(line, &images) {
                    pending_images = images;
                    print_error(&e.to_string());
                    continue;
                }
                let outcome = tokio::select! {
                    result = session.finish() => Some(result),
                    _ = tokio::signal::ctrl_c() => None,
                };
                match outcome {
                    Some(Ok(reply)) => print_reply(session, &reply),
                    Some(Err(e)) => print_error(&e.to_string()),
                    None => {
                        session.cancel();
                        println!("{}", style("(cancelled)").dim());
                    }
                }
            }
        }
    }
    Ok(())
}

/// Print the prompt and read one line. `None` on end of input or Ctrl-C.
async fn prompt_line(lines: &mut mpsc::Receiver<String>, user_name: &str) -> Result<Option<String>> {
    print!("{}> ", style(user_name).green().bold());
    std::io::stdout().flush()?;
    tokio::select! {
        line = lines.recv() => Ok(line),
        _ = tokio::signal::ctrl_c() => {
            println!();
            Ok(None)
        }
    }
}

async fn handle_command(
    session: &mut Session,
    cmd: Command,
    pending_images: &mut Vec<ImageSource>,
    lines: &mut mpsc::Receiver<String>,
) -> Result<()> {
    match cmd {
        Command::Help => println!("{}", HELP),
        Command::Clear => {
            session.clear();
            println!("Conversation cleared.");
        }
        Command::Stats => println!("{}", session.usage_summary()),
        Command::Image(path) => match load_image(&path) {
            Ok(image) => {
                pending_images.push(image);
                println!("Attached {} ({} pending)", path.display(), pending_images.len());
            }
            Err(e) => print_error(&format!("{:#}", e)),
        },
        Command::ImagesClear => {
            pending_images.clear();
            println!("Pending images cleared.");
        }
        Command::Summarize => summarize(session, lines).await?,
        Command::WebSearch => {
            let state = if session.toggle_web_search() { "on" } else { "off" };
            println!("Web search {}.", state);
        }
        Command::Export { format, path } => {
            if session.history().is_empty() {
                print_error("nothing to export");
                return Ok(());
            }
            let result = format.parse::<ExportFormat>().and_then(|format| {
                let input = ExportInput {
                    history: session.history(),
                    system_prompt: &session.settings().system_prompt,
                    usage: session.usage(),
                    pricing: &session.config().pricing,
                };
                export::write(&path, format, &input)
            });
            match result {
                Ok(()) => println!("Exported to {}", path.display()),
                Err(e) => print_error(&e.to_string()),
            }
        }
        Command::Load(path) => match export::load_json(&path) {
            Ok(messages) => {
                let count = messages.len();
                let images: usize = messages.iter().map(|m| m.content.image_count()).sum();
                session.load_history(messages);
                println!(
                    "Loaded {} messages ({} images) from {}",
                    count,
                    images,
                    path.display()
                );
            }
            Err(e) => print_error(&e.to_string()),
        },
        Command::Invalid(msg) => print_error(&msg),
        Command::Quit => {}
    }
    Ok(())
}

async fn summarize(session: &mut Session, lines: &mut mpsc::Receiver<String>) -> Result<()> {
    println!("{}", style("Summarizing...").dim());
    let summary = tokio::select! {
        result = session.summarize() => result,
        _ = tokio::signal::ctrl_c() => Err(ChatError::Cancelled),
    };
    let summary = match summary {
        Ok(summary) => summary,
        Err(e) => {
            print_error(&e.to_string());
            return Ok(());
        }
    };

    println!("{}", style("Summary").bold().cyan());
    println!("{}", render::to_terminal(&summary));
    print!("Replace the conversation with this summary? [y/N] ");
    std::io::stdout().flush()?;
    let answer = lines.recv().await.unwrap_or_default();
    if answer.trim().eq_ignore_ascii_case("y") {
        session.replace_with_summary(&summary);
        println!("Conversation replaced with summary.");
    }
    Ok(())
}

fn print_reply(session: &Session, reply: &str) {
    println!("{}", style(&session.settings().ai_name).magenta().bold());
    println!("{}", render::to_terminal(reply));
    println!("{}", style(session.usage_summary()).dim());
}

fn print_error(msg: &str) {
    eprintln!("{} {}", style("error:").red().bold(), msg);
}
