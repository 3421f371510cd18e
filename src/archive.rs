use crate::renderer::RenderedChat;
use crate::utils::sanitize_host;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use eyre::{Context, Result};
use std::collections::HashSet;
use std::io::{Seek, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// `<host>_chats_<YYYY-MM-DD>.zip`
pub fn archive_name(host: &str, date: NaiveDate) -> String {
    format!("{}_chats_{}.zip", sanitize_host(host), date.format("%Y-%m-%d"))
}

/// Streams rendered chats into a ZIP, one directory per folder.
pub struct ChatArchive<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: SimpleFileOptions,
    folders: HashSet<String>,
    paths: HashSet<String>,
}

impl<W: Write + Seek> ChatArchive<W> {
    /// `modified` is stamped on every entry.
    pub fn new(writer: W, modified: NaiveDateTime) -> Self {
        let stamp = DateTime::from_date_and_time(
            u16::try_from(modified.year()).unwrap_or(1980),
            modified.month() as u8,
            modified.day() as u8,
            modified.hour() as u8,
            modified.minute() as u8,
            modified.second() as u8,
        )
        .unwrap_or_default();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(stamp);
        Self {
            zip: ZipWriter::new(writer),
            options,
            folders: HashSet::new(),
            paths: HashSet::new(),
        }
    }

    /// Add one chat and return the path it was stored under.
    pub fn add(&mut self, chat: &RenderedChat) -> Result<String> {
        // `.` and `..` survive sanitizing but would escape the archive root.
        let folder = chat
            .folder
            .as_deref()
            .filter(|folder| !matches!(*folder, "." | ".."));
        if let Some(folder) = folder
            && self.folders.insert(folder.to_owned())
        {
            self.zip
                .add_directory(format!("{}/", folder), self.options)
                .wrap_err_with(|| format!("Failed to add folder {}", folder))?;
        }

        let path = self.claim_path(folder, &chat.filename);
        self.zip
            .start_file(path.as_str(), self.options)
            .wrap_err_with(|| format!("Failed to start entry {}", path))?;
        self.zip
            .write_all(chat.markdown.as_bytes())
            .wrap_err_with(|| format!("Failed to write entry {}", path))?;
        Ok(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn finish(self) -> Result<W> {
        self.zip.finish().wrap_err("Failed to finalize archive")
    }

    // Two chats with the same date and title in the same folder would share a
    // path; later ones get `-2`, `-3`, ... before the extension.
    fn claim_path(&mut self, folder: Option<&str>, filename: &str) -> String {
        let (stem, ext) = filename
            .strip_suffix(".md")
            .map(|stem| (stem, ".md"))
            .unwrap_or((filename, ""));
        let join = |name: &str| match folder {
            Some(folder) => format!("{}/{}", folder, name),
            None => name.to_owned(),
        };

        let mut candidate = join(filename);
        let mut n = 2;
        while self.paths.contains(&candidate) {
            candidate = join(&format!("{}-{}{}", stem, n, ext));
            n += 1;
        }
        self.paths.insert(candidate.clone());
        candidate
    }
}
