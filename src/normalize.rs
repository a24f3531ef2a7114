use serde_json::{Map, Value};

use crate::models::{DocumentChunk, NormalizedResult, SourceRef};

/// Field names probed for the answer text, in priority order.
const TEXT_KEYS: &[&str] = &[
    "answer",
    "content",
    "text",
    "output_text",
    "result",
    "message",
    "response",
];

/// Field names probed for iterables of document-like items. Every present
/// array key contributes, in order.
const SOURCE_KEYS: &[&str] = &[
    "source_documents",
    "sources",
    "context",
    "documents",
    "docs",
    "relevant_docs",
    "retrieved_docs",
];

const ORIGIN_KEYS: &[&str] = &["source", "file_path", "path", "url"];

const PAGE_KEYS: &[&str] = &["page_number", "page", "page_index", "pageIndex", "page_label"];

const CONTENT_KEYS: &[&str] = &["page_content", "content", "text"];

/// A generator response of one of the shapes we know how to decode. Each
/// variant has its own decoding path behind `answer_text` / `source_items`;
/// callers never inspect the shape themselves.
#[derive(Debug, Clone)]
pub enum GeneratorResponse {
    /// Attribute-style typed response, as produced by our own client.
    Structured(StructuredResponse),
    /// Mapping-style response of unknown layout.
    Json(Value),
    /// An unstructured value carrying only text.
    Text(String),
}

#[derive(Debug, Clone)]
pub struct StructuredResponse {
    pub answer: String,
    pub context: Vec<DocumentChunk>,
}

impl GeneratorResponse {
    fn answer_text(&self) -> String {
        match self {
            GeneratorResponse::Structured(resp) => resp.answer.clone(),
            GeneratorResponse::Json(value) => json_answer_text(value),
            GeneratorResponse::Text(text) => text.clone(),
        }
    }

    fn source_items(&self, snippet_limit: usize) -> Vec<SourceRef> {
        match self {
            GeneratorResponse::Structured(resp) => resp
                .context
                .iter()
                .map(|chunk| SourceRef {
                    origin: chunk.metadata.source.clone(),
                    page: chunk.metadata.page,
                    snippet: make_snippet(&chunk.content, snippet_limit),
                })
                .collect(),
            GeneratorResponse::Json(value) => json_source_items(value, snippet_limit),
            GeneratorResponse::Text(_) => Vec::new(),
        }
    }
}

/// Convert one generator response into a `NormalizedResult`. Probes that fail
/// to resolve simply yield "absent"; this function never errors, because the
/// response shape is unknown at call time and must not crash the turn.
pub fn normalize(
    response: &GeneratorResponse,
    top_k: Option<usize>,
    snippet_limit: usize,
) -> NormalizedResult {
    let mut answer_text = response.answer_text();
    // A literal quoted empty string counts as a true empty answer.
    if matches!(answer_text.trim(), "\"\"" | "''") {
        answer_text = String::new();
    }

    let mut sources = Vec::new();
    let mut seen: Vec<(String, Option<u32>)> = Vec::new();
    for item in response.source_items(snippet_limit) {
        let key = (item.origin.clone(), item.page);
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        sources.push(item);
    }

    if let Some(k) = top_k {
        sources.truncate(k);
    }

    NormalizedResult {
        answer_text,
        sources,
    }
}

/// Truncate to the configured code-point limit with a trailing ellipsis.
pub fn make_snippet(text: &str, limit: usize) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().count() <= limit {
        return Some(trimmed.to_string());
    }
    let mut out: String = trimmed.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    Some(out)
}

fn json_answer_text(value: &Value) -> String {
    if let Some(object) = value.as_object() {
        for key in TEXT_KEYS {
            if let Some(text) = object.get(*key).and_then(Value::as_str) {
                if !text.is_empty() {
                    return text.to_string();
                }
            }
        }
    }

    // No probe matched: fall back to the value's textual representation.
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn json_source_items(value: &Value, snippet_limit: usize) -> Vec<SourceRef> {
    let Some(object) = value.as_object() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for key in SOURCE_KEYS {
        let Some(items) = object.get(*key).and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            if let Some(source) = decode_source_item(item, snippet_limit) {
                out.push(source);
            }
        }
    }
    out
}

/// Decode one document-like item. Items lacking a resolvable origin are
/// dropped; absence of citation metadata is expected for some shapes.
fn decode_source_item(item: &Value, snippet_limit: usize) -> Option<SourceRef> {
    let item = item.as_object()?;

    // Metadata-nested fields win over item-level ones.
    let meta = item
        .get("metadata")
        .and_then(Value::as_object)
        .unwrap_or(item);

    let mut origin = first_string(meta, ORIGIN_KEYS);
    let mut page = page_from_meta(meta);

    if origin.is_none() {
        origin = first_string(item, &["source", "url", "path"]);
        if page.is_none() {
            page = page_from_meta(item);
        }
    }

    let origin = origin?;
    let snippet = first_string(item, CONTENT_KEYS)
        .and_then(|content| make_snippet(&content, snippet_limit));

    Some(SourceRef {
        origin,
        page,
        snippet,
    })
}

fn first_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

fn page_from_meta(meta: &Map<String, Value>) -> Option<u32> {
    let mut candidates: Vec<&Value> = Vec::new();
    for key in PAGE_KEYS {
        if let Some(value) = meta.get(*key) {
            candidates.push(value);
        }
    }
    if let Some(loc) = meta.get("loc").and_then(Value::as_object) {
        for key in PAGE_KEYS {
            if let Some(value) = loc.get(*key) {
                candidates.push(value);
            }
        }
    }

    candidates.into_iter().find_map(coerce_page)
}

/// Non-negative integers pass through; all-digit strings coerce; everything
/// else is absent.
fn coerce_page(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => {
            let trimmed = text.trim();
            if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
                trimmed.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}
