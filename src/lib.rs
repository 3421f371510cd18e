//! # tm-chat-export
//!
//! Export chat history kept by a browser-based chat app to Markdown.
//!
//! ## What it does
//!
//! The app persists each chat as a JSON record under a `CHAT_<id>` key in its
//! key-value store, with folders and tags in local storage. This crate reads a
//! SQLite mirror of that store, renders every chat as a Markdown document with
//! YAML frontmatter (id, title, model, timestamps, parameters, token usage and
//! tags), and writes either
//!
//! - one `.md` file for a single chat, or
//! - a ZIP archive of all chats, with one directory per folder.
//!
//! The database is snapshotted and opened **read-only**; your data is never
//! modified.
//!
//! ## Usage
//!
//! ```sh
//! # Everything, into ./chat.example.com_chats_<date>.zip
//! tm-chat-export --db app.db all --host chat.example.com
//!
//! # The chat open at a given page URL
//! tm-chat-export --db app.db current --url 'https://chat.example.com/#chat=abc123'
//!
//! # Render a single exported chat record to stdout
//! tm-chat-export render chat.json
//! ```
//!
//! Preferences can be persisted in `~/.config/tm-chat-export/config.toml`.
pub mod archive;
pub mod exporter;
pub mod importer;
pub mod renderer;
pub mod store;
pub mod utils;

pub use exporter::{export_all, export_current, render_file};
pub use importer::{ChatRecord, Directory};
pub use renderer::{RenderedChat, chat_to_markdown};
pub use store::Store;
pub use utils::{ChatSelection, ExportConfig, ExportOutcome};
