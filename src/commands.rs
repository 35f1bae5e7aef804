//! Terminal front end: one function per CLI subcommand.

use chrono::{Local, TimeZone};
use colored::*;
use std::io::{self, BufRead, Read, Write};
use std::path::Path;

use crate::cli::HistoryAction;
use crate::config::Config;
use crate::error::Result;
use crate::modes::OptimizationMode;
use crate::session::{HistoryEntry, SessionState};
use crate::store;
use crate::{Optimizer, Progress};

const PREVIEW_CHARS: usize = 120;

pub fn open_session(config: &Config) -> Result<SessionState> {
    let store = store::open(config.storage.backend, &config.storage.resolved_path())?;
    Ok(SessionState::load(store))
}

/// Positional text, else the file, else all of stdin.
pub fn read_input(text: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = file {
        return Ok(std::fs::read_to_string(path)?);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

/// Cut `text` to `max` characters, appending "..." when shortened.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

pub fn format_timestamp(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub fn format_history_line(entry: &HistoryEntry) -> String {
    format!(
        "{}  {:<12}  {}  {}",
        entry.id.bright_black(),
        entry.mode.to_string().bright_cyan(),
        format_timestamp(entry.timestamp),
        truncate(&entry.original.replace('\n', " "), PREVIEW_CHARS)
    )
}

// ---------------------------------------------------------------------------
// optimize
// ---------------------------------------------------------------------------

pub struct OptimizeRequest {
    pub content: String,
    pub mode: OptimizationMode,
    pub custom: Option<String>,
    pub accept: bool,
    pub stream: bool,
}

/// Run one optimization through `session`, printing the rewrite to stdout
/// and the reasoning to stderr.
pub async fn run_optimize(optimizer: &Optimizer, session: &mut SessionState, req: OptimizeRequest) -> Result<()> {
    crate::validate_content(&req.content)?;
    session.set_mode(req.mode, req.custom);
    let custom = session.custom_for_request().map(str::to_string);
    let generation = session.begin_optimization(&req.content);

    let result = if req.stream {
        let mut printed = 0usize;
        let mut out = io::stdout();
        let on_progress = |p: Progress| {
            match &p {
                Progress::Reasoning(mods) => {
                    if let Some(reasoning) = mods.first().and_then(|m| m.reasoning.as_deref()) {
                        eprintln!("{}\n{}\n", "Approach:".bright_yellow().bold(), reasoning.dimmed());
                    }
                }
                Progress::Text(full) => {
                    // The accumulator only grows, so the old length is a char boundary.
                    let _ = write!(out, "{}", &full[printed..]);
                    let _ = out.flush();
                    printed = full.len();
                }
                Progress::Complete { .. } => {
                    let _ = writeln!(out);
                }
            }
            session.apply_progress(generation, &p);
        };
        optimizer.optimize(&req.content, req.mode, custom.as_deref(), on_progress).await
    } else {
        let result = optimizer.optimize_once(&req.content, req.mode, custom.as_deref()).await;
        if let Ok(done) = &result {
            if let Some(reasoning) = done.modifications.first().and_then(|m| m.reasoning.as_deref()) {
                eprintln!("{}\n{}\n", "Approach:".bright_yellow().bold(), reasoning.dimmed());
            }
            println!("{}", done.optimized_content);
        }
        result
    };

    session.finish_optimization(generation, result.as_ref());
    result?;

    if req.accept {
        if let Some(entry) = session.accept_optimization()? {
            eprintln!("{} {}", "Saved to history:".bright_green(), entry.id);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// modes
// ---------------------------------------------------------------------------

pub fn print_modes() {
    for mode in OptimizationMode::all() {
        println!("{:<14}{}", mode.to_string().bright_cyan(), mode.description());
    }
}

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

pub fn run_history(session: &mut SessionState, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List { limit } => {
            let entries = session.history();
            if entries.is_empty() {
                println!("{}", "No saved optimizations yet.".dimmed());
                return Ok(());
            }
            for entry in entries.iter().take(limit.unwrap_or(usize::MAX)) {
                println!("{}", format_history_line(entry));
            }
        }
        HistoryAction::Show { id } => match session.find_history(&id) {
            Some(entry) => {
                println!("{} {}", entry.mode.to_string().bright_cyan(), format_timestamp(entry.timestamp));
                println!("\n{}\n{}", "Original:".bold(), entry.original);
                println!("\n{}\n{}", "Optimized:".bold(), entry.optimized);
            }
            None => eprintln!("{} {}", "No history entry with id".bright_red(), id),
        },
        HistoryAction::Delete { id } => {
            if session.delete_history_item(&id)? {
                eprintln!("{}", "History item deleted".bright_green());
            } else {
                eprintln!("{} {}", "No history entry with id".bright_red(), id);
            }
        }
        HistoryAction::Clear { yes } => {
            if !yes && !confirm("Delete all history items? This cannot be undone. [y/N] ")? {
                eprintln!("Cancelled.");
                return Ok(());
            }
            let n = session.clear_history()?;
            eprintln!("{} {}", "Deleted history items:".bright_green(), n);
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{}", prompt);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}
