use crate::importer::{ChatRecord, Directory, display_string, is_truthy};
use crate::utils::sanitize_name;
use chrono::{TimeZone, Utc};
use eyre::{Context, Result, eyre};
use serde_json::{Map, Value, json};
use std::fmt::Write;

/// Separator written after every message body.
pub const MESSAGE_DELIMITER: &str = "\n\n=~=~=\n\n";

/// A chat turned into a Markdown document, plus where it belongs on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChat {
    pub markdown: String,
    /// `<YYYY-MM-DD>-<sanitized title>.md`
    pub filename: String,
    /// Sanitized folder name, when the chat sits in a known folder.
    pub folder: Option<String>,
}

/// Render one chat. Dates in the filename are taken in `tz`.
pub fn chat_to_markdown<Tz: TimeZone>(
    chat: &ChatRecord,
    directory: &Directory,
    tz: &Tz,
) -> Result<RenderedChat> {
    let title = chat.title();
    let created = chat.created_at().unwrap_or_else(|| {
        if let Some(raw) = chat.created_at_value() {
            tracing::warn!("unparsable createdAt {} for {:?}; using current time", raw, title);
        }
        Utc::now()
    });
    let created_date = created.with_timezone(tz).date_naive();
    let filename = format!("{}-{}.md", created_date.format("%Y-%m-%d"), sanitize_name(&title));

    let (params, system_message) = chat.chat_params();

    let mut out = String::new();
    write_frontmatter(&mut out, chat, &params, directory)?;
    write!(out, "# {}\n\n", title)?;

    if let Some(system) = system_message {
        write_message(&mut out, &json!({ "role": "system", "content": system }))
            .wrap_err("Failed to render system message")?;
    }
    for (index, message) in chat.messages()?.iter().enumerate() {
        write_message(&mut out, message)
            .wrap_err_with(|| format!("Failed to render message #{}", index + 1))?;
    }

    let folder = chat
        .folder_id()
        .and_then(|id| directory.folder_title(id))
        .map(|name| sanitize_name(&display_string(Some(name))))
        .filter(|name| !name.is_empty());

    Ok(RenderedChat {
        markdown: out,
        filename,
        folder,
    })
}

fn json_scalar(value: &Value) -> Result<String> {
    serde_json::to_string(value).wrap_err("Failed to encode front matter value")
}

fn write_frontmatter(
    out: &mut String,
    chat: &ChatRecord,
    params: &Map<String, Value>,
    directory: &Directory,
) -> Result<()> {
    writeln!(out, "---")?;
    writeln!(out, "chatID: {}", json_scalar(&chat.id())?)?;
    writeln!(out, "chatTitle: {}", json_scalar(&chat.title_value())?)?;
    writeln!(out, "model: {}", json_scalar(&chat.field_or_empty("model"))?)?;
    writeln!(out, "createdAt: {}", json_scalar(&chat.field_or_empty("createdAt"))?)?;
    writeln!(out, "updatedAt: {}", json_scalar(&chat.field_or_empty("updatedAt"))?)?;

    if !params.is_empty() {
        writeln!(out, "chatParams:")?;
        for (key, value) in params {
            writeln!(out, "  {}: {}", key, json_scalar(value)?)?;
        }
    }

    if let Some(usage) = chat.token_usage() {
        writeln!(out, "tokenUsage:")?;
        match usage {
            Value::Object(fields) => {
                for (key, value) in fields {
                    writeln!(out, "  {}: {}", key, json_scalar(value)?)?;
                }
            }
            Value::Array(items) => {
                for (index, value) in items.iter().enumerate() {
                    writeln!(out, "  {}: {}", index, json_scalar(value)?)?;
                }
            }
            _ => {}
        }
    }

    let tags = tag_names(chat, directory);
    if !tags.is_empty() {
        writeln!(out, "tags:")?;
        for tag in tags {
            writeln!(out, "  - {}", json_scalar(tag)?)?;
        }
    }

    write!(out, "---\n\n")?;
    Ok(())
}

/// Tags are stored either as full objects (`{id, name}`) or as bare ids that
/// have to be resolved through the directory. The first element decides.
fn tag_names<'a>(chat: &'a ChatRecord, directory: &'a Directory) -> Vec<&'a Value> {
    let Some(tags) = chat.tags() else {
        return Vec::new();
    };
    match tags.first() {
        None => Vec::new(),
        Some(Value::Object(_) | Value::Array(_) | Value::Null) => tags
            .iter()
            .filter_map(|tag| tag.get("name"))
            .filter(|name| is_truthy(name))
            .collect(),
        Some(_) => tags.iter().filter_map(|id| directory.tag_name(id)).collect(),
    }
}

fn write_message(out: &mut String, message: &Value) -> Result<()> {
    let Value::Object(fields) = message else {
        return Err(eyre!("message is not an object"));
    };
    if fields.get("type").and_then(Value::as_str) == Some("clear-context") {
        return Ok(());
    }
    let role = fields
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| eyre!("message has no role"))?;

    let content = flatten_content(fields.get("content"))?;
    write!(out, "**{}:**\n\n{}{}", capitalize(role), content, MESSAGE_DELIMITER)?;
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Flatten message content into plain text. Text blocks contribute their text;
/// any other block is kept verbatim as pretty-printed JSON.
fn flatten_content(content: Option<&Value>) -> Result<String> {
    match content {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Array(blocks)) => {
            let mut out = String::new();
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    write!(out, "{}\n\n", display_string(block.get("text")))?;
                } else {
                    write!(out, "{}\n\n", pretty_json(block)?)?;
                }
            }
            Ok(out)
        }
        Some(object @ Value::Object(_)) => Ok(format!("{}\n\n", pretty_json(object)?)),
        other => Ok(display_string(other)),
    }
}

fn pretty_json(value: &Value) -> Result<String> {
    serde_json::to_string_pretty(value).wrap_err("Failed to encode content block")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(value: Value) -> RenderedChat {
        render_with(value, &Directory::default())
    }

    fn render_with(value: Value, directory: &Directory) -> RenderedChat {
        let chat = ChatRecord::from_value(value).unwrap();
        chat_to_markdown(&chat, directory, &Utc).unwrap()
    }

    fn frontmatter(markdown: &str) -> &str {
        let body = markdown.strip_prefix("---\n").unwrap();
        let end = body.find("\n---\n").unwrap();
        &body[..end + 1]
    }

    #[test]
    fn renders_full_document() {
        let rendered = render(json!({
            "chatID": "abc",
            "chatTitle": "Plan the trip",
            "model": "gpt-4o",
            "createdAt": "2024-03-05T10:00:00Z",
            "updatedAt": "2024-03-06T08:00:00Z",
            "messages": [
                {"role": "user", "content": "Where to?"},
                {"role": "assistant", "content": "Lisbon."}
            ]
        }));

        let expected = "---\n\
            chatID: \"abc\"\n\
            chatTitle: \"Plan the trip\"\n\
            model: \"gpt-4o\"\n\
            createdAt: \"2024-03-05T10:00:00Z\"\n\
            updatedAt: \"2024-03-06T08:00:00Z\"\n\
            ---\n\n\
            # Plan the trip\n\n\
            **User:**\n\nWhere to?\n\n=~=~=\n\n\
            **Assistant:**\n\nLisbon.\n\n=~=~=\n\n";
        assert_eq!(rendered.markdown, expected);
        assert_eq!(rendered.filename, "2024-03-05-Plan_the_trip.md");
        assert_eq!(rendered.folder, None);
    }

    #[test]
    fn empty_chat_uses_defaults() {
        let rendered = render(json!({}));
        assert!(rendered.markdown.starts_with(
            "---\nchatID: \"\"\nchatTitle: \"Untitled Chat\"\nmodel: \"\"\ncreatedAt: \"\"\nupdatedAt: \"\"\n---\n\n# Untitled Chat\n\n"
        ));
        assert!(rendered.filename.ends_with("-Untitled_Chat.md"));
    }

    #[test]
    fn numeric_created_at_is_kept_as_number() {
        let rendered = render(json!({"title": "T", "createdAt": 1709632800000i64}));
        assert!(rendered.markdown.contains("createdAt: 1709632800000\n"));
        assert_eq!(rendered.filename, "2024-03-05-T.md");
    }

    #[test]
    fn unparsable_created_at_uses_today() {
        let before = Utc::now().date_naive();
        let rendered = render(json!({"title": "T", "createdAt": "garbage"}));
        let after = Utc::now().date_naive();

        let named = |date: chrono::NaiveDate| format!("{}-T.md", date.format("%Y-%m-%d"));
        assert!(
            rendered.filename == named(before) || rendered.filename == named(after),
            "{}",
            rendered.filename
        );
        assert!(rendered.markdown.contains("createdAt: \"garbage\"\n"));
    }

    #[test]
    fn chat_params_and_token_usage_are_nested() {
        let rendered = render(json!({
            "title": "T",
            "createdAt": "2024-01-01T00:00:00Z",
            "chatParams": {"temperature": 0.7, "systemMessage": "Be terse", "stop": ["\n"]},
            "tokenUsage": {"inputTokens": 10, "outputTokens": 20}
        }));
        let fm = frontmatter(&rendered.markdown);
        assert!(fm.contains("chatParams:\n  temperature: 0.7\n  stop: [\"\\n\"]\n"));
        assert!(!fm.contains("systemMessage"));
        assert!(fm.contains("tokenUsage:\n  inputTokens: 10\n  outputTokens: 20\n"));

        // The system message becomes the first message.
        let body = rendered.markdown.split("# T\n\n").nth(1).unwrap();
        assert!(body.starts_with("**System:**\n\nBe terse\n\n=~=~=\n\n"));
    }

    #[test]
    fn params_with_only_system_message_are_omitted() {
        let rendered = render(json!({"chatParams": {"systemMessage": "x"}}));
        assert!(!rendered.markdown.contains("chatParams:"));
        assert!(rendered.markdown.contains("**System:**\n\nx"));
    }

    #[test]
    fn front_matter_is_valid_yaml() {
        let rendered = render(json!({
            "chatID": "id-1",
            "chatTitle": "Quotes \"and\" colons: yes",
            "createdAt": "2024-01-01T00:00:00Z",
            "chatParams": {"temperature": 1, "plugins": ["web"]},
            "tags": [{"id": "a", "name": "deep: work"}]
        }));
        let yaml: serde_yaml::Value = serde_yaml::from_str(frontmatter(&rendered.markdown)).unwrap();
        assert_eq!(yaml["chatTitle"].as_str(), Some("Quotes \"and\" colons: yes"));
        assert_eq!(yaml["chatParams"]["temperature"].as_i64(), Some(1));
        assert_eq!(yaml["chatParams"]["plugins"][0].as_str(), Some("web"));
        assert_eq!(yaml["tags"][0].as_str(), Some("deep: work"));
    }

    #[test]
    fn tags_resolve_from_objects_or_ids() {
        let directory = Directory::from_lists(
            &json!([]),
            &json!([{"id": "t1", "name": "rust"}, {"id": "t2", "name": "cli"}]),
        );

        let by_id = render_with(json!({"tags": ["t1", "missing", "t2"]}), &directory);
        assert!(by_id.markdown.contains("tags:\n  - \"rust\"\n  - \"cli\"\n---"));

        let by_object = render_with(
            json!({"tags": [{"id": "x", "name": "inline"}, {"id": "y"}]}),
            &directory,
        );
        assert!(by_object.markdown.contains("tags:\n  - \"inline\"\n---"));

        let none = render_with(json!({"tags": ["missing"]}), &directory);
        assert!(!none.markdown.contains("tags:"));
    }

    #[test]
    fn content_blocks_are_flattened() {
        let rendered = render(json!({
            "title": "Blocks",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "Look at this"},
                    {"type": "image_url", "image_url": {"url": "data:x"}}
                ]
            }]
        }));
        let expected = "**User:**\n\nLook at this\n\n{\n  \"type\": \"image_url\",\n  \"image_url\": {\n    \"url\": \"data:x\"\n  }\n}\n\n\n\n=~=~=\n\n";
        assert!(rendered.markdown.ends_with(expected), "{}", rendered.markdown);
    }

    #[test]
    fn object_and_scalar_content() {
        let rendered = render(json!({
            "messages": [
                {"role": "tool", "content": {"result": 1}},
                {"role": "assistant", "content": null},
                {"role": "assistant"},
                {"role": "assistant", "content": 3}
            ]
        }));
        let md = &rendered.markdown;
        assert!(md.contains("**Tool:**\n\n{\n  \"result\": 1\n}\n\n\n\n=~=~=\n\n"));
        assert!(md.contains("**Assistant:**\n\nnull\n\n=~=~=\n\n"));
        assert!(md.contains("**Assistant:**\n\nundefined\n\n=~=~=\n\n"));
        assert!(md.contains("**Assistant:**\n\n3\n\n=~=~=\n\n"));
    }

    #[test]
    fn clear_context_markers_are_skipped() {
        let rendered = render(json!({
            "messages": [
                {"role": "user", "content": "one"},
                {"type": "clear-context"},
                {"role": "user", "content": "two"}
            ]
        }));
        assert_eq!(rendered.markdown.matches(MESSAGE_DELIMITER).count(), 2);
    }

    #[test]
    fn message_without_role_fails() {
        let chat = ChatRecord::from_value(json!({"messages": [{"content": "x"}]})).unwrap();
        let err = chat_to_markdown(&chat, &Directory::default(), &Utc).unwrap_err();
        assert!(format!("{:#}", err).contains("message has no role"));
    }

    #[test]
    fn folder_is_resolved_and_sanitized() {
        let directory = Directory::from_lists(
            &json!([{"id": "f1", "title": "  My: Projects "}, {"id": "f2", "title": "日本"}]),
            &json!([]),
        );
        let rendered = render_with(json!({"folderID": "f1"}), &directory);
        assert_eq!(rendered.folder.as_deref(), Some("My_Projects"));

        let rendered = render_with(json!({"folderId": "f1"}), &directory);
        assert_eq!(rendered.folder.as_deref(), Some("My_Projects"));

        // Sanitizes down to nothing, so the chat stays at the root.
        let rendered = render_with(json!({"folderID": "f2"}), &directory);
        assert_eq!(rendered.folder, None);

        let rendered = render_with(json!({"folderID": "unknown"}), &directory);
        assert_eq!(rendered.folder, None);
    }

    #[test]
    fn capitalize_only_touches_first_char() {
        assert_eq!(capitalize("assistant"), "Assistant");
        assert_eq!(capitalize("USER"), "USER");
        assert_eq!(capitalize(""), "");
    }
}
