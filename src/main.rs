//! # Canvas Runtime CLI (`canvas`)
//!
//! Drives the canvas runtime from the command line: diff two files, run a
//! file through the connector that matches its language, and inspect the
//! registered connectors and capabilities.
//!
//! ## Usage
//!
//! ```bash
//! canvas --config ./config/canvas.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `canvas diff <old> <new>` | Line diff of two files with stats |
//! | `canvas run <file>` | Present and execute a file |
//! | `canvas connectors` | List connectors and their health |
//! | `canvas capabilities` | List capabilities, optionally for one language |
//! | `canvas completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Run a Lua script in the sandbox
//! canvas run ./scripts/report.lua
//!
//! # Run a SQL file against a named connection, JSON output
//! canvas run ./queries/top.sql --connection warehouse --json
//!
//! # Which capabilities would a Python document get?
//! canvas capabilities --language python
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use canvas_runtime::commands::{self, RunOptions};
use canvas_runtime::config;
use canvas_runtime::connector_interpreter::TerminalInputProvider;
use canvas_runtime::orchestrator::Workspace;
use canvas_runtime_core::models::Language;

/// Canvas runtime CLI.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/canvas.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "canvas",
    about = "Canvas runtime: versioned documents, pluggable capabilities, sandboxed execution",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/canvas.toml`; a missing file at the default
    /// path means built-in defaults.
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a line diff between two files.
    Diff {
        old: PathBuf,
        new: PathBuf,
    },

    /// Present a file and execute it through its connector.
    ///
    /// The language is taken from the file extension unless `--language`
    /// is given. Prompts for `input()` values are asked on the terminal.
    Run {
        file: PathBuf,

        /// Content language (e.g. `python`, `lua`, `sql`).
        #[arg(long)]
        language: Option<Language>,

        /// Connector id to bind instead of the first language match.
        #[arg(long)]
        connector: Option<String>,

        /// Named connection for delegated execution.
        #[arg(long)]
        connection: Option<String>,

        /// Print the result envelope as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List connectors and their status.
    Connectors,

    /// List capabilities in registration order.
    Capabilities {
        /// Only capabilities active for this language.
        #[arg(long)]
        language: Option<Language>,
    },

    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "canvas_runtime=debug"
    } else {
        "canvas_runtime=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut stdout = std::io::stdout();

    // Commands that don't require config
    match &cli.command {
        Commands::Diff { old, new } => {
            commands::diff_files(old, new, &mut stdout)?;
            return Ok(());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "canvas", &mut stdout);
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;
    let workspace = Arc::new(Workspace::from_config(
        cfg,
        Arc::new(TerminalInputProvider::new()),
    )?);

    match cli.command {
        Commands::Run {
            file,
            language,
            connector,
            connection,
            json,
        } => {
            let options = RunOptions {
                language,
                connector,
                connection,
                json,
            };
            commands::run_file(workspace, &file, &options, &mut stdout).await?;
        }
        Commands::Connectors => {
            commands::list_connectors(&workspace.connectors, &mut stdout)?;
        }
        Commands::Capabilities { language } => {
            commands::list_capabilities(&workspace.capabilities, language, &mut stdout)?;
        }
        Commands::Diff { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}
