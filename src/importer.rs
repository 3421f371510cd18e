//! Loosely typed view over the chat records kept in the key-value store.
//!
//! Records are schema-less JSON written by the web app. Every accessor here
//! follows the app's own fallback rules: a field counts as present only when
//! it is "truthy" (not null, false, 0, NaN or the empty string), and the
//! next candidate field is tried otherwise.
//!
//! Keys:
//! - `CHAT_<id>` in the `keyval` object store holds one chat record.
//! - `TM_useFolderList` in local storage holds `[{"id": .., "title": ..}, ..]`.
//! - `TM_useChatUniqeTags` in local storage holds `[{"id": .., "name": ..}, ..]`.
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use eyre::{Result, eyre};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

pub const CHAT_KEY_PREFIX: &str = "CHAT_";
pub const FOLDER_LIST_KEY: &str = "TM_useFolderList";
pub const TAG_LIST_KEY: &str = "TM_useChatUniqeTags";
pub const UNTITLED_CHAT: &str = "Untitled Chat";

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Whether a value counts as set under the app's fallback rules.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form of a value as the web app would print it (`String(value)`).
/// `None` stands for an absent field and prints as `undefined`.
pub fn display_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_owned(),
        Some(Value::Null) => "null".to_owned(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => display_number(n),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => display_string(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Object(_)) => "[object Object]".to_owned(),
    }
}

fn display_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Key under which an id is stored in a lookup map. Ids may be strings or
/// numbers in the records, and both must find the same entry.
pub fn lookup_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => display_string(Some(other)),
    }
}

/// ISO 8601 date-time forms without an offset; these are local time.
const LOCAL_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse a stored timestamp: RFC 3339, ISO 8601 date-time without offset
/// (local time), a bare `YYYY-MM-DD`, `YYYY-MM` or `YYYY` (UTC midnight), or
/// epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp_millis(millis)
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Some(naive) = LOCAL_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            {
                return Local
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            parse_date_only(s)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

fn parse_date_only(s: &str) -> Option<NaiveDate> {
    if !s.is_ascii() {
        return None;
    }
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    match s.len() {
        10 => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
        7 if s.as_bytes()[4] == b'-' && digits(&s[..4]) && digits(&s[5..]) => {
            NaiveDate::from_ymd_opt(s[..4].parse().ok()?, s[5..].parse().ok()?, 1)
        }
        4 if digits(s) => NaiveDate::from_ymd_opt(s.parse().ok()?, 1, 1),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Chat record
// ---------------------------------------------------------------------------

/// One chat as persisted by the web app.
#[derive(Debug, Clone)]
pub struct ChatRecord {
    fields: Map<String, Value>,
}

impl ChatRecord {
    /// Objects are taken as they are. Any other non-null value has no fields
    /// to read and renders as an untitled, empty chat.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            Value::Null => Err(eyre!("chat record is null")),
            other => {
                tracing::warn!(
                    "chat record is a {}, not an object; exporting it empty",
                    type_name(&other)
                );
                Ok(Self { fields: Map::new() })
            }
        }
    }

    /// First field among `keys` holding a truthy value.
    fn first_set(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .filter_map(|k| self.fields.get(*k))
            .find(|v| is_truthy(v))
    }

    /// A field's value, or `""` when it is unset.
    pub fn field_or_empty(&self, key: &str) -> Value {
        self.first_set(&[key])
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()))
    }

    pub fn id(&self) -> Value {
        self.first_set(&["chatID", "id"])
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()))
    }

    pub fn title_value(&self) -> Value {
        self.first_set(&["chatTitle", "title"])
            .cloned()
            .unwrap_or_else(|| Value::String(UNTITLED_CHAT.to_owned()))
    }

    pub fn title(&self) -> String {
        display_string(Some(&self.title_value()))
    }

    pub fn messages(&self) -> Result<&[Value]> {
        match self.first_set(&["messages", "conversation"]) {
            None => Ok(&[]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(other) => Err(eyre!(
                "chat messages are not a list (got {})",
                type_name(other)
            )),
        }
    }

    /// Raw `createdAt`, if set.
    pub fn created_at_value(&self) -> Option<&Value> {
        self.first_set(&["createdAt"])
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at_value().and_then(parse_timestamp)
    }

    pub fn folder_id(&self) -> Option<&Value> {
        self.first_set(&["folderID", "folderId"])
    }

    /// `chatParams` without the system message, plus the system message on its own.
    pub fn chat_params(&self) -> (Map<String, Value>, Option<Value>) {
        let mut params = match self.fields.get("chatParams") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let system = params.shift_remove("systemMessage").filter(is_truthy);
        (params, system)
    }

    pub fn token_usage(&self) -> Option<&Value> {
        self.first_set(&["tokenUsage"])
    }

    pub fn tags(&self) -> Option<&[Value]> {
        match self.fields.get("tags") {
            Some(Value::Array(items)) => Some(items.as_slice()),
            _ => None,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Folder / tag directory
// ---------------------------------------------------------------------------

/// Folder and tag lookups shared by every chat in one export.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    folders: HashMap<String, Value>,
    tags: HashMap<String, Value>,
}

impl Directory {
    /// Build the lookups from the raw folder and tag lists. Entries that are
    /// not objects are ignored; later duplicates win.
    pub fn from_lists(folders: &Value, tags: &Value) -> Self {
        Self {
            folders: index_list(folders, "title"),
            tags: index_list(tags, "name"),
        }
    }

    pub fn folder_title(&self, id: &Value) -> Option<&Value> {
        self.folders.get(&lookup_key(id)).filter(|v| is_truthy(v))
    }

    pub fn tag_name(&self, id: &Value) -> Option<&Value> {
        self.tags.get(&lookup_key(id)).filter(|v| is_truthy(v))
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}

fn index_list(list: &Value, label_field: &str) -> HashMap<String, Value> {
    let Value::Array(items) = list else {
        if !list.is_null() {
            tracing::warn!("expected a list, got {}; ignoring it", type_name(list));
        }
        return HashMap::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| {
            let id = entry.get("id").map(lookup_key).unwrap_or_else(|| "undefined".into());
            let label = entry.get(label_field).cloned().unwrap_or(Value::Null);
            (id, label)
        })
        .collect()
}
