use crate::modes::OptimizationMode;
use crate::store::StoreBackend;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "flow-scribe")]
#[command(version)]
#[command(about = "Rewrite text with an LLM, review it side by side, keep a local history")]
pub struct Args {
    /// Path to a TOML config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the history storage backend
    #[arg(long, global = true, value_enum)]
    pub store: Option<StoreBackend>,

    /// Override the storage path (directory for file, database for sqlite)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the model name
    #[arg(long, global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Optimize a piece of text and stream the rewrite to stdout
    Optimize {
        /// Text to optimize; read from --file or stdin when omitted
        text: Option<String>,

        /// Read the text from a file
        #[arg(long, short, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Rewriting style
        #[arg(long, short, value_enum, default_value = "improve")]
        mode: OptimizationMode,

        /// Instruction used with --mode custom
        #[arg(long)]
        custom: Option<String>,

        /// Save the result to history as accepted
        #[arg(long)]
        accept: bool,

        /// Wait for the full result instead of streaming
        #[arg(long)]
        no_stream: bool,
    },

    /// List the available optimization modes
    Modes,

    /// Inspect or edit the saved history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Serve the editor and history pages on localhost
    Serve {
        /// Port for the web UI (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Do not try to open a browser
        #[arg(long)]
        no_open: bool,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum HistoryAction {
    /// List entries, newest first
    List {
        /// Show at most this many entries
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Print one entry in full
    Show { id: String },
    /// Delete one entry
    Delete { id: String },
    /// Delete every entry
    Clear {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}
