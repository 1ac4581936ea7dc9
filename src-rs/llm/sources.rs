use serde_json::Value;
use thiserror::Error;

pub const SOURCES_HEADER: &str = "\n\n**🔍 Sources:**\n";
pub const SOURCES_UNAVAILABLE_NOTE: &str = "\n\n*Could not extract sources*";

const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("grounding metadata is not an object")]
    NotAnObject,
    #[error("{field} is present but is not a list")]
    NotAList { field: &'static str },
}

/// Markdown link lines for the first non-empty source family in `metadata`:
/// citations, then grounding chunks, then search entry points.
pub fn extract_sources(metadata: &Value) -> Result<Vec<String>, SourceError> {
    let meta = metadata.as_object().ok_or(SourceError::NotAnObject)?;

    let sources = collect_links(lenient_list(meta.get("citations")), |item| {
        (
            first_str(item, &["/uri", "/sourceUri", "/source/uri"]),
            first_str(item, &["/title", "/sourceTitle", "/source/title"]),
        )
    });
    if !sources.is_empty() {
        return Ok(sources);
    }

    let sources = collect_links(lenient_list(meta.get("groundingChunks")), |item| {
        (
            first_str(item, &["/web/uri", "/source/uri"]),
            first_str(item, &["/web/title", "/title", "/source/title"]),
        )
    });
    if !sources.is_empty() {
        return Ok(sources);
    }

    let entries = list_field(meta.get("searchEntryPoints"), "searchEntryPoints")?;
    Ok(entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            entry.get("renderedContent")?;
            let url = entry.get("url").and_then(Value::as_str)?;
            let title = entry
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Search result {}", i + 1));
            Some(format!("- [{}]({})", title, url))
        })
        .collect())
}

pub fn render_sources(sources: &[String]) -> String {
    format!("{}{}", SOURCES_HEADER, sources.join("\n"))
}

// Citations and grounding chunks of any other shape are skipped.
fn lenient_list(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

fn list_field<'a>(
    value: Option<&'a Value>,
    field: &'static str,
) -> Result<&'a [Value], SourceError> {
    match value {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(SourceError::NotAList { field }),
    }
}

fn first_str<'a>(item: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .find_map(|p| item.pointer(p).and_then(Value::as_str).filter(|s| !s.is_empty()))
}

fn collect_links<F>(items: &[Value], fields: F) -> Vec<String>
where
    F: Fn(&Value) -> (Option<&str>, Option<&str>),
{
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let (uri, title) = fields(item);
            let uri = uri.filter(|u| u.starts_with("http"))?;
            let title = match title {
                Some(title) => shorten_title(title),
                None => format!("Source {}", i + 1),
            };
            Some(format!("- [{}]({})", title, uri))
        })
        .collect()
}

fn shorten_title(title: &str) -> String {
    if title.chars().count() > MAX_TITLE_CHARS {
        let cut: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{}...", cut)
    } else {
        title.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn citations_win_over_chunks() {
        let meta = json!({
            "citations": [{"uri": "https://a.example", "title": "A"}, {"sourceUri": "ftp://skip"}],
            "groundingChunks": [{"web": {"uri": "https://b.example", "title": "B"}}]
        });
        assert_eq!(extract_sources(&meta).unwrap(), vec!["- [A](https://a.example)"]);
    }

    #[test]
    fn chunks_used_when_no_citations() {
        let long_title = "x".repeat(100);
        let meta = json!({
            "citations": [],
            "groundingChunks": [
                {"web": {"uri": "https://b.example", "title": long_title}},
                {"web": {"uri": "https://c.example"}}
            ]
        });
        let sources = extract_sources(&meta).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0], format!("- [{}...](https://b.example)", "x".repeat(77)));
        assert_eq!(sources[1], "- [Source 2](https://c.example)");
    }

    #[test]
    fn entry_points_are_last_resort() {
        let meta = json!({
            "searchEntryPoints": [
                {"renderedContent": "<div/>", "url": "https://s.example"},
                {"url": "https://no-render.example"}
            ]
        });
        assert_eq!(
            extract_sources(&meta).unwrap(),
            vec!["- [Search result 1](https://s.example)"]
        );
    }

    #[test]
    fn malformed_metadata_is_an_error() {
        assert!(extract_sources(&json!("nope")).is_err());
        assert!(extract_sources(&json!({"searchEntryPoints": {"url": "x"}})).is_err());
        assert!(extract_sources(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn odd_citations_and_chunks_are_skipped() {
        let meta = json!({
            "citations": "oops",
            "groundingChunks": {"web": {"uri": "https://x.example"}},
            "searchEntryPoints": [{"renderedContent": "<div/>", "url": "https://s.example", "title": "S"}]
        });
        assert_eq!(extract_sources(&meta).unwrap(), vec!["- [S](https://s.example)"]);
        assert!(extract_sources(&json!({"citations": 3})).unwrap().is_empty());
    }

    #[test]
    fn render_joins_lines() {
        let out = render_sources(&["- [A](https://a)".to_string(), "- [B](https://b)".to_string()]);
        assert_eq!(out, "\n\n**🔍 Sources:**\n- [A](https://a)\n- [B](https://b)");
    }
}
