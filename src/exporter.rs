use crate::archive::{ChatArchive, archive_name};
use crate::importer::{ChatRecord, Directory};
use crate::renderer::{RenderedChat, chat_to_markdown};
use crate::store::Store;
use crate::utils::{ChatSelection, ExportConfig, ExportOutcome};
use chrono::Local;
use eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Export every chat into `<output_dir>/<host>_chats_<date>.zip`.
///
/// Rendering stops at the first chat that fails, and no archive is left
/// behind in that case.
pub fn export_all(store: &Store, config: &ExportConfig) -> Result<ExportOutcome> {
    let chats = store.chats()?;
    if chats.is_empty() {
        return Ok(ExportOutcome::NoChats);
    }
    let directory = store.directory()?;

    let pb = progress_bar(chats.len() as u64, config.quiet)?;
    let mut rendered = Vec::with_capacity(chats.len());
    for (key, value) in chats {
        let chat = render_record(value, &directory)
            .wrap_err_with(|| format!("Failed to export {}", key))?;
        tracing::debug!(%key, file = %chat.filename, folder = ?chat.folder, "rendered chat");
        rendered.push(chat);
        pb.inc(1);
    }
    pb.finish_and_clear();

    fs::create_dir_all(&config.output_dir).wrap_err_with(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_dir.display()
        )
    })?;

    let now = Local::now();
    let dest = config
        .output_dir
        .join(archive_name(&config.host, now.date_naive()));

    // Written next to the destination and moved into place once complete.
    let tmp = NamedTempFile::new_in(&config.output_dir)
        .wrap_err("Failed to create temporary archive")?;
    let mut archive = ChatArchive::new(BufWriter::new(tmp), now.naive_local());
    for chat in &rendered {
        let path = archive.add(chat)?;
        if path != entry_path(chat) {
            tracing::warn!(%path, "name already taken in archive; stored under a suffixed name");
        }
    }
    let chats = archive.len();
    let tmp = archive
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())
        .wrap_err("Failed to flush archive")?;
    tmp.persist(&dest)
        .wrap_err_with(|| format!("Failed to write archive: {}", dest.display()))?;

    Ok(ExportOutcome::Archive { path: dest, chats })
}

/// Export the selected chat as `<output_dir>/<filename>`.
pub fn export_current(
    store: &Store,
    selection: &ChatSelection,
    config: &ExportConfig,
) -> Result<ExportOutcome> {
    let Some(chat_id) = selection.chat_id() else {
        return Ok(ExportOutcome::NoChatSelected);
    };
    tracing::debug!(%chat_id, "exporting current chat");

    let value = store.chat_by_id(&chat_id)?;
    let directory = store.directory()?;
    let chat = render_record(value, &directory)
        .wrap_err_with(|| format!("Failed to export chat {}", chat_id))?;

    fs::create_dir_all(&config.output_dir).wrap_err_with(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_dir.display()
        )
    })?;
    let dest = config.output_dir.join(&chat.filename);
    fs::write(&dest, chat.markdown.as_bytes())
        .wrap_err_with(|| format!("Failed to write: {}", dest.display()))?;

    Ok(ExportOutcome::Markdown { path: dest })
}

/// Render a chat record stored as a standalone JSON file.
pub fn render_file(path: &Path, directory: &Directory) -> Result<String> {
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read: {}", path.display()))?;
    let value = serde_json::from_str(&text)
        .wrap_err_with(|| format!("Malformed JSON in {}", path.display()))?;
    Ok(render_record(value, directory)?.markdown)
}

/// Print a rendered document to `writer`.
pub fn write_markdown<W: Write>(writer: &mut W, markdown: &str) -> Result<()> {
    writer
        .write_all(markdown.as_bytes())
        .and_then(|()| writer.flush())
        .wrap_err("Failed to write markdown")
}

fn render_record(value: serde_json::Value, directory: &Directory) -> Result<RenderedChat> {
    let chat = ChatRecord::from_value(value)?;
    chat_to_markdown(&chat, directory, &Local)
}

fn entry_path(chat: &RenderedChat) -> String {
    match &chat.folder {
        Some(folder) => format!("{}/{}", folder, chat.filename),
        None => chat.filename.clone(),
    }
}

fn progress_bar(len: u64, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)",
        )
        .wrap_err("Invalid progress template")?
        .progress_chars("=>-"),
    );
    Ok(bar)
}
