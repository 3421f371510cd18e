mod logging;

use clap::{Args, Parser, Subcommand};
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tm_chat_export::utils::{resolve_host, resolve_output_dir};
use tm_chat_export::{ChatSelection, Directory, ExportConfig, ExportOutcome, Store, exporter};
use url::Url;

/// Export locally stored chat history to Markdown.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the app's key-value database (SQLite).
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Directory to write exports into.
    /// Defaults to the current directory if not set in config.
    #[arg(short, long, value_name = "DIR", global = true)]
    out: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/tm-chat-export/config.toml
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log what is being read and written.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress progress and summary output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export all chats into a ZIP archive, one directory per folder.
    All {
        /// Host name used in the archive name.
        #[arg(long, value_name = "HOST", conflicts_with = "url")]
        host: Option<String>,

        /// Page URL to take the host name from.
        #[arg(long, value_name = "URL")]
        url: Option<Url>,
    },
    /// Export the current chat as a single Markdown file.
    Current(CurrentArgs),
    /// Render a chat record (JSON file) to stdout.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct CurrentArgs {
    /// Page URL whose `#chat=<id>` fragment selects the chat.
    #[arg(long, value_name = "URL")]
    url: Option<Url>,

    /// Location hash, e.g. `#chat=<id>`.
    #[arg(long, value_name = "HASH")]
    hash: Option<String>,

    /// Chat id.
    #[arg(long, value_name = "ID")]
    id: Option<String>,
}

impl CurrentArgs {
    fn selection(self) -> ChatSelection {
        match (self.url, self.hash, self.id) {
            (Some(url), _, _) => ChatSelection::Url(url),
            (_, Some(hash), _) => ChatSelection::Hash(hash),
            (_, _, Some(id)) => ChatSelection::Id(id),
            (None, None, None) => ChatSelection::Hash(String::new()),
        }
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    db_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    host: Option<String>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("tm-chat-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            tracing::debug!(path = %p.display(), "loading config");
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn open_store(db_path: Option<PathBuf>) -> Result<Store> {
    let db_path = db_path.ok_or_else(|| {
        eyre!("No database given.\nUse --db to specify it, or set db_path in config.toml.")
    })?;
    Store::open(&db_path)
}

fn report(outcome: &ExportOutcome, quiet: bool) {
    if quiet {
        return;
    }
    match outcome {
        ExportOutcome::Archive { path, chats } => {
            eprintln!("Done. {} chat(s) exported to {}", chats, path.display())
        }
        ExportOutcome::Markdown { path } => eprintln!("Done. Wrote {}", path.display()),
        ExportOutcome::NoChats => eprintln!("No chats found to export."),
        ExportOutcome::NoChatSelected => eprintln!("No chat selected."),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve db and output dir (CLI > Config > Default)
    let db_path = cli.db.or(file_cfg.db_path);
    let output_dir = resolve_output_dir(cli.out, file_cfg.output_dir);

    match cli.command {
        Command::All { host, url } => {
            // 3. Resolve host (--host > --url > Config > Default)
            let host = resolve_host(host, url.as_ref(), file_cfg.host);
            let config = ExportConfig {
                output_dir,
                host,
                quiet: cli.quiet,
            };
            let store = open_store(db_path)?;
            let outcome = exporter::export_all(&store, &config)
                .wrap_err("An error occurred while exporting chats")?;
            report(&outcome, cli.quiet);
        }
        Command::Current(args) => {
            let config = ExportConfig {
                output_dir,
                host: resolve_host(None, None, file_cfg.host),
                quiet: cli.quiet,
            };
            let store = open_store(db_path)?;
            let outcome = exporter::export_current(&store, &args.selection(), &config)
                .wrap_err("An error occurred while exporting the current chat")?;
            report(&outcome, cli.quiet);
        }
        Command::Render { file } => {
            let directory = match db_path {
                Some(path) => Store::open(&path)?.directory()?,
                None => Directory::default(),
            };
            let markdown = exporter::render_file(&file, &directory)?;
            exporter::write_markdown(&mut std::io::stdout().lock(), &markdown)?;
        }
    }

    Ok(())
}
