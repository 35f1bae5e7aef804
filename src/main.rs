use clap::{CommandFactory, Parser};
use colored::*;
use tracing_subscriber::EnvFilter;

use flow_scribe::cli::{Args, Command};
use flow_scribe::commands::{self, OptimizeRequest};
use flow_scribe::config::Config;
use flow_scribe::error::Result;
use flow_scribe::web::{self, AppState};
use flow_scribe::Optimizer;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flow_scribe=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Config file, then environment, then command-line overrides.
fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(backend) = args.store {
        config.storage.backend = backend;
    }
    if let Some(dir) = &args.data_dir {
        config.storage.path = dir.clone();
    }
    if let Some(model) = &args.model {
        config.api.model = model.clone();
    }
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    if let Command::Completions { shell } = &args.command {
        let mut cmd = Args::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(*shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }
    if let Command::Modes = &args.command {
        commands::print_modes();
        return Ok(());
    }

    let config = resolve_config(&args)?;
    tracing::debug!(backend = %config.storage.backend, path = %config.storage.path.display(), "storage");
    let mut session = commands::open_session(&config)?;

    match args.command {
        Command::Optimize { text, file, mode, custom, accept, no_stream } => {
            let content = commands::read_input(text, file.as_deref())?;
            let optimizer = Optimizer::new(config.api.clone());
            let req = OptimizeRequest { content, mode, custom, accept, stream: !no_stream };
            commands::run_optimize(&optimizer, &mut session, req).await
        }
        Command::History { action } => commands::run_history(&mut session, action),
        Command::Serve { port, no_open } => {
            let port = port.unwrap_or(config.server.port);
            let state = AppState::new(session, Optimizer::new(config.api.clone()));
            web::serve(port, state, !no_open).await?;
            Ok(())
        }
        Command::Modes | Command::Completions { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("{} {}", format!("[{}]", e.kind()).bright_red().bold(), e.to_string().bright_red());
        std::process::exit(1);
    }
}
