use std::path::PathBuf;
use url::Url;

/// Host used in the archive name when neither the CLI nor the config names one.
pub const DEFAULT_HOST: &str = "localhost";

/// Configuration required to run an export.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub host: String,
    pub quiet: bool,
}

/// What an export run produced.
#[derive(Debug, PartialEq, Eq)]
pub enum ExportOutcome {
    Archive { path: PathBuf, chats: usize },
    Markdown { path: PathBuf },
    NoChats,
    NoChatSelected,
}

/// How the "current" chat is identified.
#[derive(Clone, Debug)]
pub enum ChatSelection {
    /// A full page URL; the chat id lives in its `#chat=` fragment.
    Url(Url),
    /// A raw location hash such as `#chat=abc&tab=1`.
    Hash(String),
    /// A bare chat id.
    Id(String),
}

impl ChatSelection {
    pub fn chat_id(&self) -> Option<String> {
        match self {
            ChatSelection::Url(url) => url
                .fragment()
                .and_then(|frag| chat_id_from_hash(&format!("#{}", frag)).map(str::to_owned)),
            ChatSelection::Hash(hash) => chat_id_from_hash(hash).map(str::to_owned),
            ChatSelection::Id(id) => {
                let id = id.trim();
                (!id.is_empty()).then(|| id.to_owned())
            }
        }
    }
}

/// Extract the chat id from a location hash: the first `#chat=` followed by
/// a non-empty run of characters up to the next `&`.
pub fn chat_id_from_hash(hash: &str) -> Option<&str> {
    const MARKER: &str = "#chat=";
    hash.match_indices(MARKER).find_map(|(pos, _)| {
        let rest = &hash[pos + MARKER.len()..];
        let id = rest.split('&').next().unwrap_or_default();
        (!id.is_empty()).then_some(id)
    })
}

/// `host[:port]` of a page URL, the way a browser reports `location.host`.
pub fn host_from_url(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_owned(),
    })
}

/// Host for the archive name: `--host` > host of the page URL > config > default.
pub fn resolve_host(
    cli_host: Option<String>,
    url: Option<&Url>,
    config_host: Option<String>,
) -> String {
    cli_host
        .or_else(|| url.and_then(host_from_url))
        .or(config_host)
        .unwrap_or_else(|| DEFAULT_HOST.to_owned())
}

/// Output directory: CLI > config > current directory.
pub fn resolve_output_dir(cli: Option<PathBuf>, config: Option<PathBuf>) -> PathBuf {
    cli.or(config).unwrap_or_else(|| PathBuf::from("."))
}

/// Replace every character outside `[A-Za-z0-9-_.]` with `_`.
pub fn sanitize_host(host: &str) -> String {
    host.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Turn a chat or folder title into something safe to use as a path segment.
///
/// Reserved filesystem characters and control characters are removed, leading
/// quotes/asterisks are stripped, anything outside `[A-Za-z0-9 -_.()]` is
/// dropped and each whitespace run becomes a single `_`.
pub fn sanitize_name(raw: &str) -> String {
    let without_reserved: String = raw
        .chars()
        .filter(|&c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|&c| !('\u{0}'..='\u{1f}').contains(&c))
        .collect();

    let unquoted = without_reserved
        .trim()
        .trim_start_matches(['\'', '"', '*'])
        .trim();

    let kept = unquoted.chars().filter(|&c| {
        c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '_' | '.' | '(' | ')')
    });

    let mut out = String::with_capacity(unquoted.len());
    let mut in_space = false;
    for c in kept {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}
